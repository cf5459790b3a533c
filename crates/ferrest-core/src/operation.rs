use serde::{Deserialize, Serialize};

/// The operations a resource can dispatch.
///
/// `Read` is the list operation; `Post` is the resource-specific custom
/// operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Read,
    Get,
    Create,
    Update,
    Delete,
    Post,
}

impl OperationKind {
    /// Every operation, in routing order.
    pub const ALL: [OperationKind; 6] = [
        Self::Read,
        Self::Get,
        Self::Create,
        Self::Update,
        Self::Delete,
        Self::Post,
    ];

    /// Return the string representation of this operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Get => "get",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Post => "post",
        }
    }

    /// Whether the operation leaves persisted state untouched.
    pub fn is_safe(&self) -> bool {
        matches!(self, Self::Read | Self::Get)
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_read_and_get_are_safe() {
        let safe: Vec<_> = OperationKind::ALL.iter().filter(|k| k.is_safe()).collect();
        assert_eq!(safe, vec![&OperationKind::Read, &OperationKind::Get]);
    }

    #[test]
    fn serde_uses_snake_case_names() {
        let json = serde_json::to_value(OperationKind::Delete).unwrap();
        assert_eq!(json, "delete");
        let back: OperationKind = serde_json::from_value(serde_json::json!("post")).unwrap();
        assert_eq!(back, OperationKind::Post);
    }
}

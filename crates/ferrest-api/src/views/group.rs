//! `group`: read-only, members embedded.

use ferrest_auth::accounts::entities;
use ferrest_core::OperationKind;
use ferrest_policy::{Expr, IsAuthenticated};
use ferrest_schema::{SchemaDeriver, SchemaIntent, SchemaRequest};

use crate::resource::{Resource, ResourceError};

pub fn resource(deriver: &SchemaDeriver) -> Result<Resource, ResourceError> {
    Resource::builder("group", entities::GROUP)
        .protect_by(Expr::leaf::<IsAuthenticated>())
        .search(["name"])
        .ordering(["name", "id"])
        .default_ordering("name")
        .exclude([OperationKind::Create, OperationKind::Update, OperationKind::Delete])
        .list_schema(SchemaRequest::new(
            entities::GROUP,
            "GroupRead",
            SchemaIntent::ReadWithRelations,
        ))
        .get_schema(SchemaRequest::new(
            entities::GROUP,
            "GroupGet",
            SchemaIntent::ReadWithRelations,
        ))
        .build(deriver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrest_auth::accounts;
    use ferrest_core::Catalog;
    use std::sync::Arc;

    #[test]
    fn only_reads_are_routed() {
        let mut catalog = Catalog::new();
        accounts::register(&mut catalog).unwrap();
        let group = resource(&SchemaDeriver::new(Arc::new(catalog))).unwrap();

        assert_eq!(group.operations(), vec![OperationKind::Read, OperationKind::Get]);
        assert!(group.schemas().list.field("users").is_some());
        assert!(group.tag_description().starts_with("*`IsAuthenticated`*"));
    }
}

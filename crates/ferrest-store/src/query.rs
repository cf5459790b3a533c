//! # Query Builder
//!
//! Backend-neutral description of a read against one table. Backends
//! interpret the same [`Query`] value: the in-memory store evaluates it
//! directly, the PostgreSQL store renders it to SQL.
//!
//! Only the primitives the dispatcher needs are representable: equality and
//! membership filters, a case-insensitive substring search OR-ed across
//! columns, ordering, and offset/limit.

use ferrest_core::EntityDescription;
use serde_json::Value;

/// Physical table plus its primary key column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub name: String,
    pub primary_key: String,
}

impl TableRef {
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.into(),
        }
    }

    /// The table backing an entity.
    pub fn of(entity: &EntityDescription) -> Self {
        Self::new(entity.table.clone(), entity.primary_key.clone())
    }
}

/// A row predicate. All filters on a query are AND-ed.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq { column: String, value: Value },
    In { column: String, values: Vec<Value> },
    /// Case-insensitive substring match of `term`, OR-ed across `columns`.
    Search { columns: Vec<String>, term: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// One ordering key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ordering {
    pub column: String,
    pub direction: Direction,
}

impl Ordering {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Desc,
        }
    }

    /// Parse `field` or `-field`.
    pub fn parse(spec: &str) -> Self {
        match spec.strip_prefix('-') {
            Some(column) => Self::desc(column),
            None => Self::asc(spec),
        }
    }
}

/// A read against one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: TableRef,
    pub filters: Vec<Filter>,
    pub order: Vec<Ordering>,
    pub offset: u64,
    pub limit: Option<u64>,
}

impl Query {
    /// Every row of `table`.
    pub fn table(table: TableRef) -> Self {
        Self {
            table,
            filters: Vec::new(),
            order: Vec::new(),
            offset: 0,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn filter_eq(self, column: impl Into<String>, value: Value) -> Self {
        self.filter(Filter::Eq {
            column: column.into(),
            value,
        })
    }

    pub fn filter_in(self, column: impl Into<String>, values: Vec<Value>) -> Self {
        self.filter(Filter::In {
            column: column.into(),
            values,
        })
    }

    /// Narrow to the row whose primary key equals `key`.
    pub fn by_key(self, key: Value) -> Self {
        let pk = self.table.primary_key.clone();
        self.filter_eq(pk, key)
    }

    /// Add a search filter. No-op when there are no columns or the term is
    /// empty.
    pub fn search(self, columns: &[String], term: &str) -> Self {
        if columns.is_empty() || term.is_empty() {
            return self;
        }
        self.filter(Filter::Search {
            columns: columns.to_vec(),
            term: term.to_string(),
        })
    }

    pub fn order_by(mut self, ordering: Ordering) -> Self {
        self.order.push(ordering);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Same filters, no ordering or pagination. Used for counting.
    pub fn unpaginated(&self) -> Self {
        Self {
            table: self.table.clone(),
            filters: self.filters.clone(),
            order: Vec::new(),
            offset: 0,
            limit: None,
        }
    }

    /// Every column the query references, for identifier validation.
    pub fn referenced_columns(&self) -> Vec<&str> {
        let mut cols: Vec<&str> = vec![self.table.primary_key.as_str()];
        for filter in &self.filters {
            match filter {
                Filter::Eq { column, .. } | Filter::In { column, .. } => cols.push(column),
                Filter::Search { columns, .. } => cols.extend(columns.iter().map(String::as_str)),
            }
        }
        cols.extend(self.order.iter().map(|o| o.column.as_str()));
        cols
    }
}

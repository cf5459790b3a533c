//! Serializing stored rows through a view schema, loading nested
//! relationships on the way.

use std::future::Future;
use std::pin::Pin;

use ferrest_core::{Catalog, EntityDescription, Join, Relationship, Row};
use ferrest_schema::{FieldKind, ViewSchema};
use ferrest_store::{Query, StoreError, TableRef, Transaction};
use serde_json::Value;

use crate::error::AppError;

type ShapeFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, AppError>> + Send + 'a>>;

/// Render `row` through `schema`. Nested fields are loaded with `tx`, so a
/// response reads from the same transaction as the row it embeds.
///
/// Nested schemas are derived with a bounded depth and carry no relations at
/// the bottom, so the recursion always terminates.
pub fn shape<'a>(
    tx: &'a mut dyn Transaction,
    catalog: &'a Catalog,
    schema: &'a ViewSchema,
    row: &'a Row,
) -> ShapeFuture<'a> {
    Box::pin(async move {
        let mut out = schema.project(row);
        if !schema.has_relations() {
            return Ok(Value::Object(out));
        }

        let entity = catalog
            .get(schema.entity())
            .map_err(|e| AppError::Internal(e.to_string()))?;
        for field in schema.fields() {
            let FieldKind::Nested {
                schema: nested,
                relationship,
                many,
            } = &field.kind
            else {
                continue;
            };
            let relationship = entity
                .relationships
                .iter()
                .find(|r| &r.name == relationship)
                .ok_or_else(|| {
                    AppError::Internal(format!("'{}' has no relationship '{relationship}'", entity.name))
                })?;
            let target = catalog
                .get(&relationship.target)
                .map_err(|e| AppError::Internal(e.to_string()))?;

            let related = related_rows(&mut *tx, &entity, &target, relationship, row).await?;
            let mut shaped = Vec::with_capacity(related.len());
            for child in &related {
                shaped.push(shape(&mut *tx, catalog, nested, child).await?);
            }
            let value = if *many {
                Value::Array(shaped)
            } else {
                shaped.into_iter().next().unwrap_or(Value::Null)
            };
            out.insert(field.name.clone(), value);
        }
        Ok(Value::Object(out))
    })
}

/// Rows of `target` reachable from `row` through `relationship`.
async fn related_rows(
    tx: &mut dyn Transaction,
    entity: &EntityDescription,
    target: &EntityDescription,
    relationship: &Relationship,
    row: &Row,
) -> Result<Vec<Row>, StoreError> {
    let targets = Query::table(TableRef::of(target));
    let local_key = row.get(&entity.primary_key).filter(|v| !v.is_null()).cloned();

    match &relationship.join {
        Join::ForeignKey { column } => match row.get(column) {
            Some(key) if !key.is_null() => Ok(tx.fetch_one(&targets.by_key(key.clone())).await?.into_iter().collect()),
            _ => Ok(Vec::new()),
        },
        Join::Reverse { column } => {
            let Some(key) = local_key else {
                return Ok(Vec::new());
            };
            tx.fetch(&targets.filter_eq(column.clone(), key)).await
        }
        Join::Association { table, local, remote } => {
            let Some(key) = local_key else {
                return Ok(Vec::new());
            };
            let links = tx
                .fetch(&Query::table(TableRef::new(table.clone(), "id")).filter_eq(local.clone(), key))
                .await?;
            let keys: Vec<Value> = links.iter().filter_map(|l| l.get(remote).cloned()).collect();
            if keys.is_empty() {
                return Ok(Vec::new());
            }
            tx.fetch(&targets.filter_in(target.primary_key.clone(), keys)).await
        }
    }
}

//! Document store CRUD probe

use mongodb::bson::{doc, Bson, Document};
use mongodb::Collection;

use super::CrudReport;
use crate::backend::{ConnectionError, MongoConnection};
use crate::target::BackendKind;

pub const TEST_DATABASE: &str = "test_infrastructure_db";
pub const TEST_COLLECTION: &str = "test_collection";

fn op_err(e: mongodb::error::Error) -> ConnectionError {
    ConnectionError::operation(BackendKind::Document, e)
}

/// Numeric field as i64, whatever integer width the server stored
fn int_field(document: &Document, key: &str) -> Option<i64> {
    match document.get(key)? {
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Int64(v) => Some(*v),
        _ => None,
    }
}

pub async fn crud(conn: &mut MongoConnection) -> Result<CrudReport, ConnectionError> {
    let collection: Collection<Document> = conn
        .database(TEST_DATABASE)?
        .collection(TEST_COLLECTION);
    let mut report = CrudReport::default();

    collection.drop().await.map_err(op_err)?;

    let inserted = collection
        .insert_one(doc! { "name": "test_record", "value": 42, "type": "test" })
        .await
        .map_err(op_err)?;
    let id = inserted.inserted_id;
    report.create = !matches!(id, Bson::Null);

    let by_id = doc! { "_id": id.clone() };

    if let Some(found) = collection.find_one(by_id.clone()).await.map_err(op_err)? {
        report.read = found.get_str("name").ok() == Some("test_record")
            && int_field(&found, "value") == Some(42);
    }

    let updated = collection
        .update_one(by_id.clone(), doc! { "$set": { "value": 84 } })
        .await
        .map_err(op_err)?;
    if updated.modified_count > 0 {
        if let Some(found) = collection.find_one(by_id.clone()).await.map_err(op_err)? {
            report.update = int_field(&found, "value") == Some(84);
        }
    }

    let deleted = collection.delete_one(by_id.clone()).await.map_err(op_err)?;
    if deleted.deleted_count > 0 {
        report.delete = collection
            .find_one(by_id)
            .await
            .map_err(op_err)?
            .is_none();
    }

    collection.drop().await.map_err(op_err)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_field_accepts_both_widths() {
        let d = doc! { "a": 42_i32, "b": 84_i64, "c": "x" };
        assert_eq!(int_field(&d, "a"), Some(42));
        assert_eq!(int_field(&d, "b"), Some(84));
        assert_eq!(int_field(&d, "c"), None);
        assert_eq!(int_field(&d, "missing"), None);
    }
}

//! Key-value probe
//!
//! Exercises strings, hashes, lists, sets and key expiry. The categories are
//! independent: a wrong answer in one does not stop the others, a driver error
//! stops everything.

use std::collections::HashMap;

use fred::prelude::*;
use fred::types::Expiration;

use super::KeyValueReport;
use crate::backend::{ConnectionError, RedisConnection};
use crate::target::BackendKind;

pub const STRING_KEY: &str = "test_string";
pub const HASH_KEY: &str = "test_hash";
pub const LIST_KEY: &str = "test_list";
pub const SET_KEY: &str = "test_set";
pub const EXPIRE_KEY: &str = "test_expire";

pub const SCRATCH_KEYS: [&str; 5] = [STRING_KEY, HASH_KEY, LIST_KEY, SET_KEY, EXPIRE_KEY];

/// Expiry set on [`EXPIRE_KEY`], in seconds
pub const EXPIRE_SECONDS: i64 = 2;

fn op_err(e: fred::error::Error) -> ConnectionError {
    ConnectionError::operation(BackendKind::KeyValue, e)
}

pub async fn operations(conn: &mut RedisConnection) -> Result<KeyValueReport, ConnectionError> {
    let client = conn.client()?;
    let mut report = KeyValueReport::default();

    delete_scratch_keys(client).await?;

    // Strings
    client
        .set::<(), _, _>(STRING_KEY, "test_value", None, None, false)
        .await
        .map_err(op_err)?;
    let value: Option<Vec<u8>> = client.get(STRING_KEY).await.map_err(op_err)?;
    report.string_ops = value.as_deref() == Some(b"test_value".as_slice());

    // Hashes
    let fields: HashMap<&str, &str> = [("field1", "value1"), ("field2", "value2")]
        .into_iter()
        .collect();
    client
        .hset::<(), _, _>(HASH_KEY, fields)
        .await
        .map_err(op_err)?;
    let field: Option<String> = client.hget(HASH_KEY, "field1").await.map_err(op_err)?;
    let len: i64 = client.hlen(HASH_KEY).await.map_err(op_err)?;
    report.hash_ops = field.as_deref() == Some("value1") && len == 2;

    // Lists: LPUSH prepends, so the first pushed item sits at the tail
    client
        .lpush::<(), _, _>(LIST_KEY, vec!["item1", "item2", "item3"])
        .await
        .map_err(op_err)?;
    let len: i64 = client.llen(LIST_KEY).await.map_err(op_err)?;
    let tail: Option<String> = client.rpop(LIST_KEY, None).await.map_err(op_err)?;
    report.list_ops = len == 3 && tail.as_deref() == Some("item1");

    // Sets
    client
        .sadd::<(), _, _>(SET_KEY, vec!["member1", "member2", "member3"])
        .await
        .map_err(op_err)?;
    let card: i64 = client.scard(SET_KEY).await.map_err(op_err)?;
    let is_member: bool = client.sismember(SET_KEY, "member1").await.map_err(op_err)?;
    report.set_ops = card == 3 && is_member;

    // Expiry
    client
        .set::<(), _, _>(
            EXPIRE_KEY,
            "expire_value",
            Some(Expiration::EX(EXPIRE_SECONDS)),
            None,
            false,
        )
        .await
        .map_err(op_err)?;
    let ttl: i64 = client.ttl(EXPIRE_KEY).await.map_err(op_err)?;
    report.expiry = ttl_in_window(ttl);

    delete_scratch_keys(client).await?;
    Ok(report)
}

async fn delete_scratch_keys(client: &Client) -> Result<(), ConnectionError> {
    client
        .del::<i64, _>(SCRATCH_KEYS.to_vec())
        .await
        .map_err(op_err)?;
    Ok(())
}

/// A freshly set key must report a remaining life in `(0, EXPIRE_SECONDS]`
fn ttl_in_window(ttl: i64) -> bool {
    ttl > 0 && ttl <= EXPIRE_SECONDS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_window() {
        assert!(ttl_in_window(2));
        assert!(ttl_in_window(1));
        // -1: no expiry, -2: missing key
        assert!(!ttl_in_window(0));
        assert!(!ttl_in_window(-1));
        assert!(!ttl_in_window(-2));
        assert!(!ttl_in_window(3));
    }

    #[test]
    fn test_scratch_keys_cover_every_category() {
        assert_eq!(SCRATCH_KEYS.len(), 5);
        assert!(SCRATCH_KEYS.contains(&EXPIRE_KEY));
    }
}

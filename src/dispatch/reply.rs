//! Reply shape conversions.
//!
//! Each helper takes a reply that already passed [`check_reply`] and turns it
//! into the Rust type an operation returns. A shape mismatch is a protocol
//! error.
//!
//! [`check_reply`]: crate::connector::check_reply

use crate::connector::{LinkError, LinkResult};
use crate::protocol::RedisValue;
use bytes::Bytes;
use std::collections::BTreeMap;

/// `+OK`.
pub fn ok(value: RedisValue) -> LinkResult<()> {
    if value.is_ok_status() {
        Ok(())
    } else {
        Err(LinkError::unexpected("OK", &value))
    }
}

/// Any status reply, e.g. `+PONG` or a TYPE name.
pub fn status(value: RedisValue) -> LinkResult<String> {
    match value {
        RedisValue::SimpleString(s) => Ok(s),
        other => Err(LinkError::unexpected("status", &other)),
    }
}

pub fn integer(value: RedisValue) -> LinkResult<i64> {
    value
        .as_int()
        .ok_or_else(|| LinkError::unexpected("integer", &value))
}

/// Integer reply read as a flag (`:1` / `:0`).
pub fn flag(value: RedisValue) -> LinkResult<bool> {
    integer(value).map(|n| n != 0)
}

/// Reply of a conditional SET: `+OK` when written, nil when skipped.
pub fn written(value: RedisValue) -> LinkResult<bool> {
    match value {
        RedisValue::Null => Ok(false),
        other => ok(other).map(|_| true),
    }
}

pub fn optional_bytes(value: RedisValue) -> LinkResult<Option<Bytes>> {
    match value {
        RedisValue::Null => Ok(None),
        RedisValue::BulkString(b) => Ok(Some(b)),
        RedisValue::SimpleString(s) => Ok(Some(Bytes::from(s))),
        other => Err(LinkError::unexpected("bulk string", &other)),
    }
}

pub fn bytes_list(value: RedisValue) -> LinkResult<Vec<Bytes>> {
    array(value)?
        .into_iter()
        .map(|item| optional_bytes(item)?.ok_or_else(|| LinkError::Protocol("nil in array".into())))
        .collect()
}

pub fn optional_bytes_list(value: RedisValue) -> LinkResult<Vec<Option<Bytes>>> {
    array(value)?.into_iter().map(optional_bytes).collect()
}

pub fn strings(value: RedisValue) -> LinkResult<Vec<String>> {
    bytes_list(value).map(|items| items.iter().map(|b| lossy(b)).collect())
}

/// Flat `field value field value ...` array.
pub fn field_map(value: RedisValue) -> LinkResult<BTreeMap<String, Bytes>> {
    let items = bytes_list(value)?;
    if items.len() % 2 != 0 {
        return Err(LinkError::Protocol("odd number of hash elements".into()));
    }
    Ok(items
        .chunks(2)
        .map(|pair| (lossy(&pair[0]), pair[1].clone()))
        .collect())
}

pub fn float(value: RedisValue) -> LinkResult<f64> {
    optional_float(value)?.ok_or_else(|| LinkError::Protocol("nil where a float was expected".into()))
}

pub fn optional_float(value: RedisValue) -> LinkResult<Option<f64>> {
    match optional_bytes(value)? {
        None => Ok(None),
        Some(raw) => {
            let text = lossy(&raw);
            let parsed = match text.as_str() {
                "inf" | "+inf" => f64::INFINITY,
                "-inf" => f64::NEG_INFINITY,
                other => other
                    .parse()
                    .map_err(|_| LinkError::Protocol(format!("invalid float '{}'", other)))?,
            };
            Ok(Some(parsed))
        }
    }
}

/// `[cursor, [keys...]]` from SCAN.
pub fn scan_page(value: RedisValue) -> LinkResult<(String, Vec<String>)> {
    let mut items = array(value)?.into_iter();
    match (items.next(), items.next()) {
        (Some(cursor), Some(keys)) => {
            let cursor = optional_bytes(cursor)?
                .map(|c| lossy(&c))
                .ok_or_else(|| LinkError::Protocol("nil scan cursor".into()))?;
            Ok((cursor, strings(keys)?))
        }
        _ => Err(LinkError::Protocol("short scan reply".into())),
    }
}

fn array(value: RedisValue) -> LinkResult<Vec<RedisValue>> {
    match value {
        RedisValue::Array(items) => Ok(items),
        other => Err(LinkError::unexpected("array", &other)),
    }
}

fn lossy(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_written_distinguishes_skip() {
        assert!(written(RedisValue::ok()).unwrap());
        assert!(!written(RedisValue::Null).unwrap());
        assert!(written(RedisValue::integer(1)).is_err());
    }

    #[test]
    fn test_field_map() {
        let reply = RedisValue::array(vec![
            RedisValue::bulk_string("a"),
            RedisValue::bulk_string("1"),
            RedisValue::bulk_string("b"),
            RedisValue::bulk_string("2"),
        ]);
        let map = field_map(reply).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["b"], Bytes::from("2"));
    }

    #[test]
    fn test_float_accepts_infinity() {
        assert_eq!(float(RedisValue::bulk_string("-inf")).unwrap(), f64::NEG_INFINITY);
        assert_eq!(float(RedisValue::bulk_string("1.5")).unwrap(), 1.5);
        assert_eq!(optional_float(RedisValue::Null).unwrap(), None);
    }

    #[test]
    fn test_scan_page() {
        let reply = RedisValue::array(vec![
            RedisValue::bulk_string("17"),
            RedisValue::array(vec![RedisValue::bulk_string("k1")]),
        ]);
        let (cursor, keys) = scan_page(reply).unwrap();
        assert_eq!(cursor, "17");
        assert_eq!(keys, vec!["k1".to_string()]);
    }
}

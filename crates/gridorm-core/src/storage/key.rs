//! Order-preserving key encoding.
//!
//! Primary key tuples are encoded so that byte order matches value order, and
//! the encoding of a tuple is a prefix of the encoding of any tuple extending
//! it. Interleaved children therefore sort directly after their parent key.

use crate::value::Value;

const TAG_NULL: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_FLOAT: u8 = 0x03;
const TAG_STRING: u8 = 0x04;
const TAG_BYTES: u8 = 0x05;
const TAG_TIMESTAMP: u8 = 0x06;
const TAG_ARRAY: u8 = 0x07;

/// Separator between table name and key bytes.
const TABLE_SEPARATOR: u8 = 0x00;

/// Current time in microseconds since the Unix epoch.
pub fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

/// Encode a key tuple.
pub fn encode_key(values: &[Value]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 9);
    for value in values {
        encode_value(value, &mut out);
    }
    out
}

/// Full storage key for a row of `table`.
pub fn row_key(table: &str, key: &[u8]) -> Vec<u8> {
    let mut out = table_prefix(table);
    out.extend_from_slice(key);
    out
}

/// Prefix shared by every row of `table`.
pub fn table_prefix(table: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(table.len() + 1);
    out.extend_from_slice(table.as_bytes());
    out.push(TABLE_SEPARATOR);
    out
}

fn encode_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(v) => {
            out.push(TAG_BOOL);
            out.push(*v as u8);
        }
        Value::Int64(v) => {
            out.push(TAG_INT);
            out.extend_from_slice(&((*v as u64) ^ (1 << 63)).to_be_bytes());
        }
        Value::Float64(v) => {
            out.push(TAG_FLOAT);
            let bits = v.to_bits();
            let ordered = if bits >> 63 == 1 { !bits } else { bits | (1 << 63) };
            out.extend_from_slice(&ordered.to_be_bytes());
        }
        Value::String(v) => {
            out.push(TAG_STRING);
            encode_bytes(v.as_bytes(), out);
        }
        Value::Bytes(v) => {
            out.push(TAG_BYTES);
            encode_bytes(v, out);
        }
        Value::Timestamp(v) => {
            out.push(TAG_TIMESTAMP);
            out.extend_from_slice(&((*v as u64) ^ (1 << 63)).to_be_bytes());
        }
        Value::StringArray(items) => {
            out.push(TAG_ARRAY);
            for item in items {
                out.push(0x01);
                encode_bytes(item.as_bytes(), out);
            }
            out.push(0x00);
        }
    }
}

/// Zero bytes are escaped as `00 FF`; the terminator is `00 01`.
fn encode_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    for &b in bytes {
        out.push(b);
        if b == 0x00 {
            out.push(0xFF);
        }
    }
    out.push(0x00);
    out.push(0x01);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_order() {
        let values = [i64::MIN, -5, -1, 0, 1, 42, i64::MAX];
        let encoded: Vec<Vec<u8>> = values.iter().map(|v| encode_key(&[Value::Int64(*v)])).collect();
        let mut sorted = encoded.clone();
        sorted.sort();
        assert_eq!(encoded, sorted);
    }

    #[test]
    fn test_float_order() {
        let values = [-10.5, -0.25, 0.0, 0.5, 3.0];
        let encoded: Vec<Vec<u8>> = values
            .iter()
            .map(|v| encode_key(&[Value::Float64(*v)]))
            .collect();
        let mut sorted = encoded.clone();
        sorted.sort();
        assert_eq!(encoded, sorted);
    }

    #[test]
    fn test_string_order_and_escaping() {
        let a = encode_key(&[Value::from("a")]);
        let ab = encode_key(&[Value::from("ab")]);
        let b = encode_key(&[Value::from("b")]);
        assert!(a < ab && ab < b);

        let with_nul = encode_key(&[Value::from("a\0b")]);
        assert_ne!(with_nul, encode_key(&[Value::from("a")]));
    }

    #[test]
    fn test_parent_key_is_prefix() {
        let parent = encode_key(&[Value::from("p1")]);
        let child = encode_key(&[Value::from("p1"), Value::Int64(7)]);
        assert!(child.starts_with(&parent));

        let other = encode_key(&[Value::from("p10"), Value::Int64(7)]);
        assert!(!other.starts_with(&parent));
    }

    #[test]
    fn test_row_key_prefix() {
        let key = row_key("users", &encode_key(&[Value::from("a")]));
        assert!(key.starts_with(&table_prefix("users")));
        assert!(!key.starts_with(&table_prefix("user")));
    }
}

//! Stored row format.

use rkyv::{Archive, Deserialize, Serialize};

use crate::error::Error;
use crate::value::Value;

/// A row as stored in the data tree.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct StoredRow {
    /// Commit sequence number of the last write to this row.
    pub version: u64,
    /// Commit timestamp in microseconds since Unix epoch.
    pub updated_at: i64,
    /// Column values.
    pub values: Vec<(String, Value)>,
}

impl StoredRow {
    /// Create a stored row.
    pub fn new(version: u64, values: Vec<(String, Value)>) -> Self {
        Self {
            version,
            updated_at: super::key::current_timestamp(),
            values,
        }
    }

    /// Get a column value.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.iter().find(|(n, _)| n == column).map(|(_, v)| v)
    }

    /// Overwrite the given columns, adding any that are missing.
    pub fn merge(&mut self, values: &[(String, Value)]) {
        for (name, value) in values {
            match self.values.iter_mut().find(|(n, _)| n == name) {
                Some((_, existing)) => *existing = value.clone(),
                None => self.values.push((name.clone(), value.clone())),
            }
        }
    }

    /// Serialize the row to bytes using rkyv.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a row from bytes using rkyv.
    ///
    /// sled does not guarantee buffer alignment, so bytes are copied first.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

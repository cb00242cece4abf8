use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use tracing::debug;

use super::{JwkError, Key};

/// An ordered JSON Web Key Set
///
/// Entries that fail to decode are dropped while parsing; one malformed or
/// unsupported key does not make the remaining keys unusable.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: Vec<Key>,
}

impl KeySet {
    pub fn new(keys: Vec<Key>) -> Self {
        Self { keys }
    }

    pub fn parse(data: &[u8]) -> Result<Self, JwkError> {
        #[derive(Deserialize)]
        struct RawSet {
            keys: Vec<Value>,
        }

        let raw: RawSet = serde_json::from_slice(data).map_err(|e| JwkError::Json(e.to_string()))?;
        let mut keys = Vec::with_capacity(raw.keys.len());
        for (index, value) in raw.keys.iter().enumerate() {
            match Key::from_value(value) {
                Ok(key) => keys.push(key),
                Err(e) => debug!(index, error = %e, "skipping undecodable key"),
            }
        }
        Ok(Self { keys })
    }

    /// First key whose `kid` equals `kid`
    pub fn find(&self, kid: &str) -> Option<&Key> {
        self.keys.iter().find(|key| key.key_id() == Some(kid))
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl Serialize for KeySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct RawSet<'a> {
            keys: &'a [Key],
        }
        RawSet { keys: &self.keys }.serialize(serializer)
    }
}

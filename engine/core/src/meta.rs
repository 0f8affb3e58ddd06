use crate::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

pub const KEY_DATASET_NAME: &str = "dataset-name";
pub const KEY_NUM_BLOCKS: &str = "num-blocks";
pub const KEY_ROOT_IDX: &str = "root-idx";
pub const KEY_DIGEST: &str = "digest";
pub const KEY_SOURCE: &str = "source";

#[derive(Error, Debug, Clone)]
pub enum MetaError {
    #[error("malformed metadata object: {0}")]
    Malformed(String),

    #[error("metadata key {0} is missing")]
    MissingKey(&'static str),

    #[error("metadata key {key} cannot be updated in {mode:?} mode with the given value")]
    IncompatibleUpdate { key: String, mode: MetaUpdateMode },
}

/// How [`DatasetMeta::update_key`] combines the new value with the existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetaUpdateMode {
    /// Add numerically, or concatenate for strings
    Append,
    /// Replace the existing value
    Override,
}

impl std::str::FromStr for MetaUpdateMode {
    type Err = MetaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "append" => Ok(Self::Append),
            "override" => Ok(Self::Override),
            other => Err(MetaError::Malformed(format!("unknown update mode: {other}"))),
        }
    }
}

/// The dataset metadata object held in the owner's metadata slot.
///
/// Schema-open by design: the gateway tier is free to attach additional keys
/// and maintain them through `update_meta_key`, so the representation is a
/// JSON object with typed accessors for the well-known keys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetMeta(Map<String, JsonValue>);

impl DatasetMeta {
    pub fn new(dataset_name: &str, digest: &str, source: &str) -> Self {
        let mut map = Map::new();
        map.insert(KEY_DATASET_NAME.into(), dataset_name.into());
        map.insert(KEY_NUM_BLOCKS.into(), 0u64.into());
        map.insert(KEY_DIGEST.into(), digest.into());
        map.insert(KEY_SOURCE.into(), source.into());
        Self(map)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MetaError> {
        serde_json::from_slice(bytes).map_err(|err| MetaError::Malformed(err.to_string()))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.0).expect("a json map is always serializable")
    }

    pub fn dataset_name(&self) -> Result<&str, MetaError> {
        self.0.get(KEY_DATASET_NAME).and_then(JsonValue::as_str).ok_or(MetaError::MissingKey(KEY_DATASET_NAME))
    }

    pub fn num_blocks(&self) -> u64 {
        self.0.get(KEY_NUM_BLOCKS).and_then(JsonValue::as_u64).unwrap_or(0)
    }

    pub fn root_idx(&self) -> Result<NodeId, MetaError> {
        self.0.get(KEY_ROOT_IDX).and_then(JsonValue::as_u64).map(|idx| idx as NodeId).ok_or(MetaError::MissingKey(KEY_ROOT_IDX))
    }

    /// Stamped once by the node that first accepts the dataset
    pub fn set_root_idx(&mut self, node_idx: NodeId) {
        self.0.insert(KEY_ROOT_IDX.into(), (node_idx as u64).into());
    }

    pub fn digest(&self) -> Result<&str, MetaError> {
        self.0.get(KEY_DIGEST).and_then(JsonValue::as_str).ok_or(MetaError::MissingKey(KEY_DIGEST))
    }

    pub fn source(&self) -> Result<&str, MetaError> {
        self.0.get(KEY_SOURCE).and_then(JsonValue::as_str).ok_or(MetaError::MissingKey(KEY_SOURCE))
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    /// Applies a gateway-driven update to an arbitrary metadata key.
    ///
    /// `Append` adds numerically for numbers and concatenates for strings; an
    /// absent key behaves like `Override`.
    pub fn update_key(&mut self, mode: MetaUpdateMode, key: &str, value: JsonValue) -> Result<(), MetaError> {
        match (mode, self.0.get(key)) {
            (MetaUpdateMode::Override, _) | (MetaUpdateMode::Append, None) => {
                self.0.insert(key.into(), value);
                Ok(())
            }
            (MetaUpdateMode::Append, Some(existing)) => {
                let combined = match (existing, &value) {
                    (JsonValue::Number(a), JsonValue::Number(b)) => match (a.as_i64(), b.as_i64()) {
                        (Some(a), Some(b)) => JsonValue::from(a + b),
                        _ => match (a.as_f64(), b.as_f64()) {
                            (Some(a), Some(b)) => JsonValue::from(a + b),
                            _ => return Err(MetaError::IncompatibleUpdate { key: key.into(), mode }),
                        },
                    },
                    (JsonValue::String(a), JsonValue::String(b)) => JsonValue::from(format!("{a}{b}")),
                    _ => return Err(MetaError::IncompatibleUpdate { key: key.into(), mode }),
                };
                self.0.insert(key.into(), combined);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_and_accessors() {
        let mut meta = DatasetMeta::new("ocean-temps", "ff00", "class OceanTemps: ...");
        meta.set_root_idx(2);
        let decoded = DatasetMeta::from_bytes(&meta.to_bytes()).unwrap();
        assert_eq!(decoded.dataset_name().unwrap(), "ocean-temps");
        assert_eq!(decoded.num_blocks(), 0);
        assert_eq!(decoded.root_idx().unwrap(), 2);
        assert_eq!(decoded.digest().unwrap(), "ff00");
    }

    #[test]
    fn test_update_key_append_and_override() {
        let mut meta = DatasetMeta::new("d", "x", "y");
        meta.update_key(MetaUpdateMode::Append, KEY_NUM_BLOCKS, 1.into()).unwrap();
        meta.update_key(MetaUpdateMode::Append, KEY_NUM_BLOCKS, 2.into()).unwrap();
        assert_eq!(meta.num_blocks(), 3);

        meta.update_key(MetaUpdateMode::Override, KEY_NUM_BLOCKS, 7.into()).unwrap();
        assert_eq!(meta.num_blocks(), 7);

        meta.update_key(MetaUpdateMode::Append, "description", "large ".into()).unwrap();
        meta.update_key(MetaUpdateMode::Append, "description", "grid".into()).unwrap();
        assert_eq!(meta.get("description").and_then(JsonValue::as_str), Some("large grid"));

        assert!(meta.update_key(MetaUpdateMode::Append, KEY_NUM_BLOCKS, "oops".into()).is_err());
    }
}

//! Hierarchical key/value configuration store.
//!
//! The frontend reads its settings from an online database organised as a
//! tree of `/`-separated paths (for example
//! `/Equipment/sinus/Settings/waveform_length`). The store is also the key
//! registry: reading a key that does not exist creates it with the caller's
//! default, so that operators can discover and edit every parameter.
//!
//! [`ConfigStore`] is the narrow seam to whatever database the host provides.
//! Values travel as [`toml::Value`] and are converted to typed Rust values by
//! the [`StoreExt`] helpers. [`MemoryStore`] is a thread-safe in-process
//! implementation that can be seeded from (and dumped to) a TOML table.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace};

/// Separator between path segments.
pub const PATH_SEPARATOR: char = '/';

/// Errors raised by configuration store access.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The path is not an absolute, well-formed store path.
    #[error("Invalid store path '{path}': {reason}")]
    InvalidPath {
        /// Offending path
        path: String,
        /// Why the path was rejected
        reason: &'static str,
    },

    /// The stored value cannot be read as the requested type.
    #[error("Value at '{path}' is not a valid {expected}: {message}")]
    TypeMismatch {
        /// Path of the value
        path: String,
        /// Rust type that was requested
        expected: &'static str,
        /// Conversion error reported by the deserializer
        message: String,
    },

    /// A default value could not be encoded for storage.
    #[error("Cannot encode value for '{path}': {message}")]
    Encode {
        /// Path being written
        path: String,
        /// Serializer error
        message: String,
    },

    /// A seed document could not be parsed.
    #[error("Cannot parse store seed: {0}")]
    Parse(String),
}

/// Access to a hierarchical configuration store.
///
/// Implementations must be safe to share between the lifecycle thread and the
/// maintenance call site.
pub trait ConfigStore: Send + Sync {
    /// Read the value at `path`, if present.
    fn get(&self, path: &str) -> Result<Option<toml::Value>, StoreError>;

    /// Write `value` at `path`, replacing any previous value.
    fn set(&self, path: &str, value: toml::Value) -> Result<(), StoreError>;

    /// Read the value at `path`, creating it with `default` when absent.
    ///
    /// The default implementation is not atomic with respect to concurrent
    /// writers; stores that can do better should override it.
    fn get_or_insert(&self, path: &str, default: toml::Value) -> Result<toml::Value, StoreError> {
        match self.get(path)? {
            Some(value) => Ok(value),
            None => {
                self.set(path, default.clone())?;
                Ok(default)
            }
        }
    }
}

/// Typed helpers layered over any [`ConfigStore`].
pub trait StoreExt: ConfigStore {
    /// Read a scalar, creating it with `default` when absent.
    fn get_scalar<T>(&self, path: &str, default: T) -> Result<T, StoreError>
    where
        T: Serialize + DeserializeOwned,
    {
        let value = self.get_or_insert(path, encode(path, &default)?)?;
        decode(path, value)
    }

    /// Read a fixed-length array, creating it filled with `default` when
    /// absent.
    ///
    /// A stored array of the wrong length is resized to exactly `len`
    /// (truncated, or padded with `default`) and written back.
    fn get_array<T>(&self, path: &str, len: usize, default: T) -> Result<Vec<T>, StoreError>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        let value = self.get_or_insert(path, encode(path, &vec![default.clone(); len])?)?;
        let mut items: Vec<T> = decode(path, value)?;
        if items.len() != len {
            debug!(
                path,
                stored = items.len(),
                expected = len,
                "Resizing store array"
            );
            items.resize(len, default);
            self.set(path, encode(path, &items)?)?;
        }
        Ok(items)
    }
}

impl<S: ConfigStore + ?Sized> StoreExt for S {}

/// Path of a frontend setting: `/Equipment/<equipment>/Settings/<name>`.
pub fn settings_key(equipment: &str, name: &str) -> String {
    format!("/Equipment/{equipment}/Settings/{name}")
}

fn encode<T: Serialize>(path: &str, value: &T) -> Result<toml::Value, StoreError> {
    toml::Value::try_from(value).map_err(|e| StoreError::Encode {
        path: path.to_string(),
        message: e.to_string(),
    })
}

fn decode<T: DeserializeOwned>(path: &str, value: toml::Value) -> Result<T, StoreError> {
    value.try_into().map_err(|e: toml::de::Error| StoreError::TypeMismatch {
        path: path.to_string(),
        expected: std::any::type_name::<T>(),
        message: e.to_string(),
    })
}

fn validate_path(path: &str) -> Result<(), StoreError> {
    let invalid = |reason| StoreError::InvalidPath {
        path: path.to_string(),
        reason,
    };
    if !path.starts_with(PATH_SEPARATOR) {
        return Err(invalid("must start with '/'"));
    }
    if path.len() == 1 {
        return Err(invalid("root is not a key"));
    }
    if path[1..].split(PATH_SEPARATOR).any(str::is_empty) {
        return Err(invalid("empty path segment"));
    }
    Ok(())
}

// =============================================================================
// MemoryStore - In-process store
// =============================================================================

/// Thread-safe in-memory configuration store.
///
/// Keys are absolute paths; values are TOML leaves (scalars or arrays).
///
/// # Example
///
/// ```
/// use sinus_daq::store::{MemoryStore, StoreExt};
///
/// let store = MemoryStore::from_toml_str(r#"
///     [Equipment.sinus.Settings]
///     waveform_length = 16
/// "#).unwrap();
///
/// let len: u32 = store.get_scalar("/Equipment/sinus/Settings/waveform_length", 1024).unwrap();
/// assert_eq!(len, 16);
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, toml::Value>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose keys are the leaves of `table`.
    ///
    /// Nested tables become path segments: `[Equipment.sinus.Settings]` with
    /// `waveform_length = 16` is stored at
    /// `/Equipment/sinus/Settings/waveform_length`.
    pub fn from_toml(table: &toml::Table) -> Self {
        let mut entries = BTreeMap::new();
        flatten_into(&mut entries, "", table);
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Parse a TOML document and use it as the seed.
    pub fn from_toml_str(source: &str) -> Result<Self, StoreError> {
        let table: toml::Table = source
            .parse()
            .map_err(|e: toml::de::Error| StoreError::Parse(e.to_string()))?;
        Ok(Self::from_toml(&table))
    }

    /// Dump the store back into a nested TOML table.
    pub fn to_toml(&self) -> toml::Table {
        let mut root = toml::Table::new();
        for (path, value) in self.entries.read().iter() {
            let segments: Vec<&str> = path[1..].split(PATH_SEPARATOR).collect();
            insert_nested(&mut root, &segments, value.clone());
        }
        root
    }

    /// All keys currently registered, in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no key is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

fn flatten_into(entries: &mut BTreeMap<String, toml::Value>, prefix: &str, table: &toml::Table) {
    for (name, value) in table {
        let path = format!("{prefix}{PATH_SEPARATOR}{name}");
        match value {
            toml::Value::Table(inner) => flatten_into(entries, &path, inner),
            leaf => {
                entries.insert(path, leaf.clone());
            }
        }
    }
}

fn insert_nested(table: &mut toml::Table, segments: &[&str], value: toml::Value) {
    match segments {
        [] => {}
        [leaf] => {
            table.insert(leaf.to_string(), value);
        }
        [head, rest @ ..] => {
            let entry = table
                .entry(head.to_string())
                .or_insert_with(|| toml::Value::Table(toml::Table::new()));
            // A subtree replaces a leaf of the same name.
            if !entry.is_table() {
                *entry = toml::Value::Table(toml::Table::new());
            }
            if let toml::Value::Table(inner) = entry {
                insert_nested(inner, rest, value);
            }
        }
    }
}

impl ConfigStore for MemoryStore {
    fn get(&self, path: &str) -> Result<Option<toml::Value>, StoreError> {
        validate_path(path)?;
        Ok(self.entries.read().get(path).cloned())
    }

    fn set(&self, path: &str, value: toml::Value) -> Result<(), StoreError> {
        validate_path(path)?;
        trace!(path, %value, "Store write");
        self.entries.write().insert(path.to_string(), value);
        Ok(())
    }

    fn get_or_insert(&self, path: &str, default: toml::Value) -> Result<toml::Value, StoreError> {
        validate_path(path)?;
        if let Some(value) = self.entries.read().get(path) {
            return Ok(value.clone());
        }
        let mut entries = self.entries.write();
        let value = entries.entry(path.to_string()).or_insert_with(|| {
            debug!(path, %default, "Creating store key with default");
            default
        });
        Ok(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "/Equipment/sinus/Settings/waveform_length";

    #[test]
    fn test_settings_key_layout() {
        assert_eq!(settings_key("sinus", "waveform_length"), KEY);
    }

    #[test]
    fn test_missing_scalar_is_created_with_default() {
        let store = MemoryStore::new();
        let value: u32 = store.get_scalar(KEY, 1024).unwrap();
        assert_eq!(value, 1024);
        assert_eq!(store.get(KEY).unwrap(), Some(toml::Value::Integer(1024)));
    }

    #[test]
    fn test_existing_scalar_wins_over_default() {
        let store = MemoryStore::new();
        store.set(KEY, toml::Value::Integer(16)).unwrap();
        let value: u32 = store.get_scalar(KEY, 1024).unwrap();
        assert_eq!(value, 16);
    }

    #[test]
    fn test_type_mismatch_is_reported() {
        let store = MemoryStore::new();
        store
            .set(KEY, toml::Value::String("long".to_string()))
            .unwrap();
        let err = store.get_scalar::<u32>(KEY, 1024).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { expected: "u32", .. }));
    }

    #[test]
    fn test_out_of_type_range_is_a_mismatch() {
        let store = MemoryStore::new();
        store.set(KEY, toml::Value::Integer(70_000)).unwrap();
        assert!(store.get_scalar::<u16>(KEY, 0).is_err());
    }

    #[test]
    fn test_array_created_with_default_elements() {
        let store = MemoryStore::new();
        let values: Vec<bool> = store.get_array("/a/enabled", 8, true).unwrap();
        assert_eq!(values, vec![true; 8]);
        assert!(store.get("/a/enabled").unwrap().unwrap().is_array());
    }

    #[test]
    fn test_short_array_is_padded_and_written_back() {
        let store = MemoryStore::from_toml_str("a = { offsets = [1, 2, 3] }").unwrap();
        let values: Vec<u16> = store.get_array("/a/offsets", 8, 7).unwrap();
        assert_eq!(values, vec![1, 2, 3, 7, 7, 7, 7, 7]);

        let stored: Vec<u16> = store.get("/a/offsets").unwrap().unwrap().try_into().unwrap();
        assert_eq!(stored, values);
    }

    #[test]
    fn test_long_array_is_truncated() {
        let store = MemoryStore::from_toml_str("a = { phase = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9] }")
            .unwrap();
        let values: Vec<i32> = store.get_array("/a/phase", 8, 0).unwrap();
        assert_eq!(values, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_invalid_paths_are_rejected() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get("relative/key"),
            Err(StoreError::InvalidPath { .. })
        ));
        assert!(store.get("/").is_err());
        assert!(store.set("/a//b", toml::Value::Boolean(true)).is_err());
    }

    #[test]
    fn test_seed_round_trips_through_nested_tables() {
        let source = r#"
            [Equipment.sinus.Settings]
            waveform_length = 16
            channel_enabled = [true, false]
        "#;
        let store = MemoryStore::from_toml_str(source).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(
            store.keys(),
            vec![
                "/Equipment/sinus/Settings/channel_enabled".to_string(),
                "/Equipment/sinus/Settings/waveform_length".to_string(),
            ]
        );

        let dumped = store.to_toml();
        let reparsed = MemoryStore::from_toml(&dumped);
        assert_eq!(reparsed.keys(), store.keys());
    }

    #[test]
    fn test_malformed_seed_is_a_parse_error() {
        assert!(matches!(
            MemoryStore::from_toml_str("this is = = not toml"),
            Err(StoreError::Parse(_))
        ));
    }
}

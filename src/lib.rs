//! # Packed Annotations - Compact Per-Item Value Storage
//!
//! `packed-annotations` stores many small, heterogeneous values per item
//! (booleans, integers, floats, doubles, substituted objects) inside one
//! shared byte arena:
//!
//! - **Fixed-width slots**: one slot per item, every field at a computed offset
//! - **Bit-packing**: boolean fields share trailing bytes
//! - **Optimistic reads**: readers validate against a sequence lock and only
//!   fall back to a lock when they raced a writer
//! - **Dynamic schema**: fields can be added and removed while in use
//!
//! ## Quick Start
//!
//! ```rust
//! use packed_annotations::{AnnotationSpec, AnnotationStorage, ManagerOptions, Result};
//!
//! # fn main() -> Result<()> {
//! let storage = AnnotationStorage::<u64>::create(
//!     vec![
//!         AnnotationSpec::integer("position", -1),
//!         AnnotationSpec::boolean("stopword", false),
//!     ],
//!     ManagerOptions::default(),
//! )?;
//!
//! storage.set_integer(&42, "position", 3)?;
//! storage.set_boolean(&42, "stopword", true)?;
//!
//! assert_eq!(storage.get_integer(&42, "position")?, 3);
//! assert_eq!(storage.get_integer(&7, "position")?, -1);
//! assert_eq!(storage.annotation_keys(&42)?, vec!["position", "stopword"]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Sharing a Manager
//!
//! ```rust
//! use std::sync::Arc;
//! use packed_annotations::{
//!     AnnotationSpec, AnnotationStorage, HeapArena, PackedDataManagerBuilder, Result,
//! };
//!
//! # fn main() -> Result<()> {
//! let manager = Arc::new(
//!     PackedDataManagerBuilder::<u64>::new()
//!         .arena_factory(HeapArena::factory())
//!         .allow_dynamic_schema(true)
//!         .build()?,
//! );
//!
//! let lemmas = AnnotationStorage::shared(manager.clone(), vec![AnnotationSpec::string("lemma", None)])?;
//! let scores = AnnotationStorage::shared(manager.clone(), vec![AnnotationSpec::double("score", 0.0)])?;
//!
//! lemmas.set_string(&1, "lemma", Some("run"))?;
//! scores.set_double(&1, "score", 0.5)?;
//! assert_eq!(manager.use_count(), 2);
//! # Ok(())
//! # }
//! ```

pub mod core;

// Re-export core modules so crate:: paths in core resolve
#[allow(unused_imports)]
pub(crate) use self::core::{
    arena, config, converter, error, handle, layout, manager, seqlock, stats, substitute, value,
};

pub use crate::core::{
    arena::{ArenaFactory, ByteArena, HeapArena, SlotCursor},
    config::{ManagerOptions, PackedDataManagerBuilder},
    converter::BytePackConverter,
    error::{ErrorKind, PackError, Result},
    handle::{PackageHandle, SlotLayout},
    manager::{PackedDataManager, SlotState},
    stats::ManagerStats,
    substitute::{SubstitutingConverter, Substitutor},
    value::{ObjectRef, Value, ValueKind},
};

use ahash::{AHashMap, AHashSet};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, warn};

/// Schema entry from which an annotation handle is derived
#[derive(Debug, Clone)]
pub struct AnnotationSpec {
    pub key: String,
    pub kind: ValueKind,
    pub default: Value,
}

impl AnnotationSpec {
    pub fn new(key: impl Into<String>, kind: ValueKind, default: Value) -> Self {
        AnnotationSpec {
            key: key.into(),
            kind,
            default,
        }
    }

    pub fn boolean(key: impl Into<String>, default: bool) -> Self {
        Self::new(key, ValueKind::Boolean, Value::Boolean(default))
    }

    pub fn integer(key: impl Into<String>, default: i32) -> Self {
        Self::new(key, ValueKind::Integer, Value::Integer(default))
    }

    pub fn long(key: impl Into<String>, default: i64) -> Self {
        Self::new(key, ValueKind::Long, Value::Long(default))
    }

    pub fn float(key: impl Into<String>, default: f32) -> Self {
        Self::new(key, ValueKind::Float, Value::Float(default))
    }

    pub fn double(key: impl Into<String>, default: f64) -> Self {
        Self::new(key, ValueKind::Double, Value::Double(default))
    }

    pub fn string(key: impl Into<String>, default: Option<&str>) -> Self {
        let default = default.map_or_else(Value::null, Value::text);
        Self::new(key, ValueKind::String, default)
    }

    /// Derive the package handle; booleans are bit-packed when allowed
    pub fn to_handle(&self, allow_bit_packing: bool) -> Result<Arc<PackageHandle>> {
        let bit_packed = allow_bit_packing && self.kind == ValueKind::Boolean;
        PackageHandle::for_kind(self.key.clone(), self.kind, self.default.clone(), bit_packed)
    }
}

/// Annotation storage facade over a [`PackedDataManager`]
///
/// Maps annotation keys to package handles and forwards typed calls. The
/// storage is a client of its manager: it attaches on construction and
/// detaches on drop. A storage created with [`AnnotationStorage::shared`]
/// also removes its handles from the manager on drop.
pub struct AnnotationStorage<K>
where
    K: Hash + Eq + Clone + Send + Sync + fmt::Debug,
{
    manager: Arc<PackedDataManager<K>>,
    handles: AHashMap<String, Arc<PackageHandle>>,
    ordered: Vec<Arc<PackageHandle>>,
    owns_handles: bool,
}

impl<K> AnnotationStorage<K>
where
    K: Hash + Eq + Clone + Send + Sync + fmt::Debug,
{
    /// Create a storage with a private heap-backed manager
    pub fn create(specs: Vec<AnnotationSpec>, options: ManagerOptions) -> Result<Self> {
        let ordered = derive_handles(&specs, options.allow_bit_packing)?;
        let manager = PackedDataManagerBuilder::new()
            .arena_factory(HeapArena::factory())
            .options(options)
            .handles(ordered.iter().cloned())
            .build()?;
        Ok(Self::attach(Arc::new(manager), ordered, false))
    }

    /// Add this storage's handles to a dynamic-schema manager shared with
    /// other clients
    pub fn shared(manager: Arc<PackedDataManager<K>>, specs: Vec<AnnotationSpec>) -> Result<Self> {
        let ordered = derive_handles(&specs, manager.options().allow_bit_packing)?;
        manager.add_handles(&ordered)?;
        Ok(Self::attach(manager, ordered, true))
    }

    fn attach(
        manager: Arc<PackedDataManager<K>>,
        ordered: Vec<Arc<PackageHandle>>,
        owns_handles: bool,
    ) -> Self {
        let clients = manager.attach();
        debug!(clients, annotations = ordered.len(), "Attached annotation storage");
        let handles = ordered
            .iter()
            .map(|h| (h.key().to_string(), h.clone()))
            .collect();
        AnnotationStorage {
            manager,
            handles,
            ordered,
            owns_handles,
        }
    }

    pub fn manager(&self) -> &Arc<PackedDataManager<K>> {
        &self.manager
    }

    pub fn handle(&self, key: &str) -> Result<&Arc<PackageHandle>> {
        self.handles
            .get(key)
            .ok_or_else(|| PackError::UnknownAnnotation(key.to_string()))
    }

    /// Annotation keys in declaration order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.ordered.iter().map(|h| h.key())
    }

    pub fn get_boolean(&self, item: &K, key: &str) -> Result<bool> {
        self.manager.get_boolean(item, self.handle(key)?)
    }

    pub fn set_boolean(&self, item: &K, key: &str, value: bool) -> Result<()> {
        self.manager.set_boolean(item, self.handle(key)?, value)
    }

    pub fn get_integer(&self, item: &K, key: &str) -> Result<i32> {
        self.manager.get_integer(item, self.handle(key)?)
    }

    pub fn set_integer(&self, item: &K, key: &str, value: i32) -> Result<()> {
        self.manager.set_integer(item, self.handle(key)?, value)
    }

    pub fn get_long(&self, item: &K, key: &str) -> Result<i64> {
        self.manager.get_long(item, self.handle(key)?)
    }

    pub fn set_long(&self, item: &K, key: &str, value: i64) -> Result<()> {
        self.manager.set_long(item, self.handle(key)?, value)
    }

    pub fn get_float(&self, item: &K, key: &str) -> Result<f32> {
        self.manager.get_float(item, self.handle(key)?)
    }

    pub fn set_float(&self, item: &K, key: &str, value: f32) -> Result<()> {
        self.manager.set_float(item, self.handle(key)?, value)
    }

    pub fn get_double(&self, item: &K, key: &str) -> Result<f64> {
        self.manager.get_double(item, self.handle(key)?)
    }

    pub fn set_double(&self, item: &K, key: &str, value: f64) -> Result<()> {
        self.manager.set_double(item, self.handle(key)?, value)
    }

    pub fn get_string(&self, item: &K, key: &str) -> Result<Option<String>> {
        self.manager.get_string(item, self.handle(key)?)
    }

    pub fn set_string(&self, item: &K, key: &str, value: Option<&str>) -> Result<()> {
        self.manager.set_string(item, self.handle(key)?, value)
    }

    pub fn get_value(&self, item: &K, key: &str) -> Result<Value> {
        self.manager.get_value(item, self.handle(key)?)
    }

    pub fn set_value(&self, item: &K, key: &str, value: &Value) -> Result<()> {
        self.manager.set_value(item, self.handle(key)?, value)
    }

    /// Whether any annotation of this storage holds a non-default value
    pub fn has_annotations(&self, item: &K) -> Result<bool> {
        self.manager.has_values(item, &self.ordered)
    }

    /// Keys of annotations holding non-default values, in declaration order
    pub fn annotation_keys(&self, item: &K) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        self.manager
            .collect_used(item, &self.ordered, |h| keys.push(h.key().to_string()))?;
        Ok(keys)
    }

    /// Drop every value stored for `item`
    pub fn remove_item(&self, item: &K) -> Result<bool> {
        self.manager.unregister(item)
    }

    /// Reset the given annotations to their defaults on every item
    pub fn clear_annotations(&self, keys: &[&str]) -> Result<usize> {
        let handles = keys
            .iter()
            .map(|key| self.handle(key).cloned())
            .collect::<Result<Vec<_>>>()?;
        self.manager.clear_all(&handles)
    }
}

impl<K> Drop for AnnotationStorage<K>
where
    K: Hash + Eq + Clone + Send + Sync + fmt::Debug,
{
    fn drop(&mut self) {
        if self.owns_handles {
            if let Err(err) = self.manager.remove_handles(&self.ordered) {
                warn!(error = %err, "Failed to remove annotation handles");
            }
        }
        if let Err(err) = self.manager.detach() {
            warn!(error = %err, "Failed to detach annotation storage");
        }
    }
}

impl<K> fmt::Debug for AnnotationStorage<K>
where
    K: Hash + Eq + Clone + Send + Sync + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnotationStorage")
            .field("annotations", &self.keys().collect::<Vec<_>>())
            .field("owns_handles", &self.owns_handles)
            .finish()
    }
}

fn derive_handles(specs: &[AnnotationSpec], allow_bit_packing: bool) -> Result<Vec<Arc<PackageHandle>>> {
    let mut seen = AHashSet::new();
    specs
        .iter()
        .map(|spec| {
            if !seen.insert(spec.key.as_str()) {
                return Err(PackError::DuplicateHandle(spec.key.clone()));
            }
            spec.to_handle(allow_bit_packing)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs() -> Vec<AnnotationSpec> {
        vec![
            AnnotationSpec::integer("position", -1),
            AnnotationSpec::boolean("stopword", false),
            AnnotationSpec::string("lemma", None),
        ]
    }

    #[test]
    fn test_create_and_forward() {
        let storage = AnnotationStorage::<u32>::create(specs(), ManagerOptions::default()).unwrap();
        assert_eq!(storage.manager().use_count(), 1);

        storage.set_string(&1, "lemma", Some("be")).unwrap();
        assert_eq!(storage.get_string(&1, "lemma").unwrap().as_deref(), Some("be"));
        assert_eq!(storage.get_string(&2, "lemma").unwrap(), None);
        assert!(storage.handle("stopword").unwrap().is_bit_packed());
    }

    #[test]
    fn test_unknown_key() {
        let storage = AnnotationStorage::<u32>::create(specs(), ManagerOptions::default()).unwrap();
        assert!(matches!(
            storage.get_integer(&1, "missing"),
            Err(PackError::UnknownAnnotation(_))
        ));
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let result = AnnotationStorage::<u32>::create(
            vec![
                AnnotationSpec::integer("a", 0),
                AnnotationSpec::long("a", 0),
            ],
            ManagerOptions::default(),
        );
        assert!(matches!(result, Err(PackError::DuplicateHandle(_))));
    }

    #[test]
    fn test_no_bit_packing_option() {
        let options = ManagerOptions {
            allow_bit_packing: false,
            ..ManagerOptions::default()
        };
        let storage = AnnotationStorage::<u32>::create(specs(), options).unwrap();
        assert!(!storage.handle("stopword").unwrap().is_bit_packed());
        assert_eq!(storage.manager().slot_width(), 4 + 1 + 4);
    }

    #[test]
    fn test_annotation_keys_and_removal() {
        let storage = AnnotationStorage::<u32>::create(specs(), ManagerOptions::default()).unwrap();
        assert!(!storage.has_annotations(&1).unwrap());

        storage.set_boolean(&1, "stopword", true).unwrap();
        storage.set_string(&1, "lemma", Some("the")).unwrap();
        assert_eq!(storage.annotation_keys(&1).unwrap(), vec!["stopword", "lemma"]);

        assert_eq!(storage.clear_annotations(&["lemma"]).unwrap(), 1);
        assert_eq!(storage.annotation_keys(&1).unwrap(), vec!["stopword"]);

        assert!(storage.remove_item(&1).unwrap());
        assert!(!storage.has_annotations(&1).unwrap());
    }
}

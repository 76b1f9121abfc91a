//! Manager configuration: serializable options and the fluent builder

use crate::arena::ArenaFactory;
use crate::error::{PackError, Result};
use crate::handle::PackageHandle;
use crate::manager::PackedDataManager;
use serde::{Deserialize, Serialize};
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

/// Upper bound for optimistic read attempts before falling back to the lock
pub const MAX_OPTIMISTIC_ATTEMPTS: usize = 64;

/// Flags fixed at manager construction
///
/// Loadable from TOML:
///
/// ```
/// use packed_annotations::ManagerOptions;
///
/// let options = ManagerOptions::from_toml_str(
///     r#"
///     allow_dynamic_schema = true
///     collect_stats = true
///     "#,
/// ).unwrap();
/// assert!(options.allow_dynamic_schema);
/// assert!(options.allow_bit_packing);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerOptions {
    /// Initial number of slots requested from the arena
    pub initial_capacity: usize,
    /// Allow boolean handles to share bytes
    pub allow_bit_packing: bool,
    /// Allow adding and removing handles after construction
    pub allow_dynamic_schema: bool,
    /// Register unknown items on first write
    pub auto_register: bool,
    /// Fail reads of never-written items instead of returning the default
    pub fail_on_unwritten_read: bool,
    pub collect_stats: bool,
    /// Optimistic read passes before taking the shared lock
    pub optimistic_attempts: usize,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        ManagerOptions {
            initial_capacity: 1024,
            allow_bit_packing: true,
            allow_dynamic_schema: false,
            auto_register: true,
            fail_on_unwritten_read: false,
            collect_stats: false,
            optimistic_attempts: 3,
        }
    }
}

impl ManagerOptions {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let options: ManagerOptions = toml::from_str(source)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.optimistic_attempts == 0 || self.optimistic_attempts > MAX_OPTIMISTIC_ATTEMPTS {
            return Err(PackError::InvalidConfig(format!(
                "optimistic_attempts must be within 1..={}, got {}",
                MAX_OPTIMISTIC_ATTEMPTS, self.optimistic_attempts
            )));
        }
        Ok(())
    }
}

/// Builder for [`PackedDataManager`]
///
/// # Examples
///
/// ```
/// use packed_annotations::{HeapArena, PackageHandle, PackedDataManagerBuilder, Value, ValueKind};
///
/// # fn main() -> packed_annotations::Result<()> {
/// let lemma = PackageHandle::for_kind("freq", ValueKind::Integer, Value::Integer(0), false)?;
/// let manager = PackedDataManagerBuilder::<u64>::new()
///     .arena_factory(HeapArena::factory())
///     .handles(vec![lemma.clone()])
///     .collect_stats(true)
///     .build()?;
///
/// manager.attach();
/// manager.set_integer(&7, &lemma, 12)?;
/// assert_eq!(manager.get_integer(&7, &lemma)?, 12);
/// # Ok(())
/// # }
/// ```
pub struct PackedDataManagerBuilder<K> {
    factory: Option<ArenaFactory>,
    options: ManagerOptions,
    handles: Vec<Arc<PackageHandle>>,
    _items: PhantomData<fn(K)>,
}

impl<K> PackedDataManagerBuilder<K>
where
    K: Hash + Eq + Clone + Send + Sync + std::fmt::Debug,
{
    pub fn new() -> Self {
        PackedDataManagerBuilder {
            factory: None,
            options: ManagerOptions::default(),
            handles: Vec::new(),
            _items: PhantomData,
        }
    }

    /// Set the arena factory (mandatory)
    pub fn arena_factory(mut self, factory: ArenaFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Replace all flags at once
    pub fn options(mut self, options: ManagerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.options.initial_capacity = capacity;
        self
    }

    pub fn allow_bit_packing(mut self, allow: bool) -> Self {
        self.options.allow_bit_packing = allow;
        self
    }

    pub fn allow_dynamic_schema(mut self, allow: bool) -> Self {
        self.options.allow_dynamic_schema = allow;
        self
    }

    pub fn auto_register(mut self, enabled: bool) -> Self {
        self.options.auto_register = enabled;
        self
    }

    pub fn fail_on_unwritten_read(mut self, enabled: bool) -> Self {
        self.options.fail_on_unwritten_read = enabled;
        self
    }

    pub fn collect_stats(mut self, enabled: bool) -> Self {
        self.options.collect_stats = enabled;
        self
    }

    pub fn optimistic_attempts(mut self, attempts: usize) -> Self {
        self.options.optimistic_attempts = attempts;
        self
    }

    /// Initial handle set, mandatory unless dynamic schema is allowed
    pub fn handles(mut self, handles: impl IntoIterator<Item = Arc<PackageHandle>>) -> Self {
        self.handles.extend(handles);
        self
    }

    pub fn build(self) -> Result<PackedDataManager<K>> {
        let factory = self
            .factory
            .ok_or(PackError::MissingParameter("arena_factory"))?;
        self.options.validate()?;
        if self.handles.is_empty() && !self.options.allow_dynamic_schema {
            return Err(PackError::MissingParameter("handles"));
        }
        PackedDataManager::from_parts(self.options, factory, self.handles)
    }
}

impl<K> Default for PackedDataManagerBuilder<K>
where
    K: Hash + Eq + Clone + Send + Sync + std::fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

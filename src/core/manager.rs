//! Packed data manager
//!
//! Stores the values of many small fields for many items in one shared byte
//! arena. Every item owns one fixed-width slot; every [`PackageHandle`]
//! describes where its value lives inside that slot.
//!
//! ## Locking
//!
//! - `structure` (read/write lock) guards the arena, the item → slot map and
//!   the handle list. Registration, removal and schema changes take it
//!   exclusively; everything else holds it shared.
//! - `values` (read/write lock) serializes value writers. Writers hold it
//!   exclusively, readers only take it shared as a fallback.
//! - `version` is a sequence lock bumped by every writer. Readers first try
//!   a bounded number of unlocked passes validated against it and only then
//!   fall back to `values`.
//!
//! Lock order is always `structure` before `values`.

use crate::arena::{ArenaFactory, ByteArena, SlotCursor};
use crate::config::ManagerOptions;
use crate::error::{ErrorKind, PackError, Result};
use crate::handle::PackageHandle;
use crate::layout::{plan_layout, required_width};
use crate::seqlock::VersionStamp;
use crate::stats::{ManagerStats, StatCounters};
use crate::value::{ObjectRef, Value, ValueKind};
use ahash::AHashMap;
use parking_lot::{RwLock, RwLockWriteGuard};
use std::any::Any;
use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registration state of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Unregistered,
    /// Slot reserved, nothing written yet
    Reserved(usize),
    Written(usize),
}

struct SlotEntry {
    slot: usize,
    written: AtomicBool,
}

impl SlotEntry {
    fn state(&self) -> SlotState {
        if self.written.load(Ordering::Relaxed) {
            SlotState::Written(self.slot)
        } else {
            SlotState::Reserved(self.slot)
        }
    }
}

struct Structure<K> {
    use_count: usize,
    arena: Option<Box<dyn ByteArena>>,
    items: AHashMap<K, SlotEntry>,
    handles: Vec<Arc<PackageHandle>>,
    slot_width: usize,
}

impl<K: Hash + Eq> Structure<K> {
    fn state(&self, item: &K) -> SlotState {
        self.items
            .get(item)
            .map_or(SlotState::Unregistered, SlotEntry::state)
    }

    fn owns(&self, handle: &PackageHandle) -> bool {
        handle
            .layout()
            .and_then(|layout| self.handles.get(layout.index))
            .is_some_and(|installed| std::ptr::eq(&**installed, handle))
    }

    fn check_handle(&self, handle: &PackageHandle) -> Result<()> {
        if self.owns(handle) {
            Ok(())
        } else {
            Err(PackError::UnknownHandle(handle.key().to_string()))
        }
    }

    fn contains(&self, handle: &Arc<PackageHandle>) -> bool {
        self.handles.iter().any(|h| PackageHandle::same(h, handle))
    }
}

pub struct PackedDataManager<K> {
    options: ManagerOptions,
    factory: ArenaFactory,
    structure: RwLock<Structure<K>>,
    values: RwLock<()>,
    version: VersionStamp,
    stats: Option<StatCounters>,
}

impl<K> PackedDataManager<K>
where
    K: Hash + Eq + Clone + Send + Sync + fmt::Debug,
{
    pub(crate) fn from_parts(
        options: ManagerOptions,
        factory: ArenaFactory,
        handles: Vec<Arc<PackageHandle>>,
    ) -> Result<Self> {
        check_new_handles(&[], &handles)?;
        let plan = plan_layout(&handles, 0, 0, options.allow_bit_packing)?;
        plan.apply(&handles);

        let stats = options.collect_stats.then(StatCounters::default);
        Ok(PackedDataManager {
            structure: RwLock::new(Structure {
                use_count: 0,
                arena: None,
                items: AHashMap::new(),
                handles,
                slot_width: plan.width,
            }),
            values: RwLock::new(()),
            version: VersionStamp::new(),
            stats,
            options,
            factory,
        })
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    // ---------------------------------------------------------------------
    // Client lifecycle
    // ---------------------------------------------------------------------

    /// Register a client; the first one creates the arena
    ///
    /// Returns the new number of clients.
    pub fn attach(&self) -> usize {
        let mut structure = self.structure.write();
        structure.use_count += 1;
        if structure.use_count == 1 {
            self.ensure_arena(&mut structure);
        }
        structure.use_count
    }

    /// Unregister a client; the last one releases the arena and all items
    pub fn detach(&self) -> Result<usize> {
        let mut structure = self.structure.write();
        if structure.use_count == 0 {
            return Err(PackError::NotInUse);
        }
        structure.use_count -= 1;
        if structure.use_count == 0 {
            let _section = self.version.write();
            let items = structure.items.len();
            structure.items.clear();
            structure.arena = None;
            info!(items, "Released packed data arena");
        }
        Ok(structure.use_count)
    }

    pub fn use_count(&self) -> usize {
        self.structure.read().use_count
    }

    pub fn is_in_use(&self) -> bool {
        self.use_count() > 0
    }

    fn ensure_arena(&self, structure: &mut Structure<K>) {
        if structure.arena.is_none() && structure.use_count > 0 {
            let arena = (self.factory)(structure.slot_width, self.options.initial_capacity);
            info!(
                slot_width = structure.slot_width,
                capacity = arena.capacity(),
                "Created packed data arena"
            );
            structure.arena = Some(arena);
        }
    }

    // ---------------------------------------------------------------------
    // Item registration
    // ---------------------------------------------------------------------

    /// Reserve a slot for `item`
    ///
    /// Returns `false` if the item was already registered.
    pub fn register(&self, item: &K) -> Result<bool> {
        let mut structure = self.structure.write();
        self.register_locked(&mut structure, item)
    }

    fn register_locked(&self, structure: &mut Structure<K>, item: &K) -> Result<bool> {
        if structure.use_count == 0 {
            return Err(PackError::NotInUse);
        }
        if structure.items.contains_key(item) {
            return Ok(false);
        }
        self.ensure_arena(structure);
        let arena = structure.arena.as_mut().ok_or(PackError::NotInUse)?;
        let slot = arena.alloc()?;
        structure.items.insert(
            item.clone(),
            SlotEntry {
                slot,
                written: AtomicBool::new(false),
            },
        );
        Ok(true)
    }

    /// Release the slot of `item`
    ///
    /// Returns `false` if the item was not registered.
    pub fn unregister(&self, item: &K) -> Result<bool> {
        let mut structure = self.structure.write();
        let _section = self.version.write();
        Self::unregister_locked(&mut structure, item)
    }

    /// Release many items inside one exclusive section
    ///
    /// Items are pulled from `items` until it is exhausted. Returns the
    /// number of items that were registered.
    pub fn unregister_all<I>(&self, items: I) -> Result<usize>
    where
        I: IntoIterator,
        I::Item: Borrow<K>,
    {
        let mut structure = self.structure.write();
        let _section = self.version.write();
        let mut released = 0;
        for item in items {
            if Self::unregister_locked(&mut structure, item.borrow())? {
                released += 1;
            }
        }
        debug!(released, "Bulk unregistered items");
        Ok(released)
    }

    fn unregister_locked(structure: &mut Structure<K>, item: &K) -> Result<bool> {
        let Some(entry) = structure.items.remove(item) else {
            return Ok(false);
        };
        if let Some(arena) = structure.arena.as_mut() {
            arena.free(entry.slot)?;
        }
        Ok(true)
    }

    pub fn slot_state(&self, item: &K) -> SlotState {
        self.structure.read().state(item)
    }

    pub fn is_registered(&self, item: &K) -> bool {
        self.slot_state(item) != SlotState::Unregistered
    }

    pub fn is_written(&self, item: &K) -> bool {
        matches!(self.slot_state(item), SlotState::Written(_))
    }

    pub fn registered_count(&self) -> usize {
        self.structure.read().items.len()
    }

    // ---------------------------------------------------------------------
    // Read path
    // ---------------------------------------------------------------------

    /// Decode from the slot of `item`, `None` if it was never written
    ///
    /// Runs up to `optimistic_attempts` unlocked passes validated against the
    /// version stamp, then repeats the read under the shared value lock.
    fn read_slot<R>(
        &self,
        structure: &Structure<K>,
        item: &K,
        decode: impl Fn(SlotCursor<'_>) -> Result<R>,
    ) -> Result<Option<R>> {
        let read_once = || -> Result<Option<R>> {
            match (structure.state(item), structure.arena.as_deref()) {
                (SlotState::Written(slot), Some(arena)) => {
                    decode(SlotCursor::new(arena, slot)).map(Some)
                }
                _ => Ok(None),
            }
        };

        for _ in 0..self.options.optimistic_attempts {
            let Some(stamp) = self.version.read_begin() else {
                std::hint::spin_loop();
                continue;
            };
            let outcome = read_once();
            let consistent = self.version.validate(stamp);
            match outcome {
                Ok(value) if consistent => {
                    self.record(StatCounters::record_optimistic);
                    return Ok(value);
                }
                Ok(_) => continue,
                Err(err) if consistent && err.kind() != ErrorKind::TornRead => return Err(err),
                Err(err) => {
                    debug!(error = %err, "Optimistic read hit torn state");
                    self.record(StatCounters::record_torn);
                    break;
                }
            }
        }

        let _values = self.values.read();
        self.record(StatCounters::record_pessimistic);
        read_once()
    }

    fn read_typed<R>(
        &self,
        item: &K,
        handle: &PackageHandle,
        kind: ValueKind,
        decode: impl Fn(SlotCursor<'_>) -> Result<R>,
        from_default: impl FnOnce(&Value) -> Option<R>,
    ) -> Result<R> {
        let structure = self.structure.read();
        structure.check_handle(handle)?;
        if let Some(value) = self.read_slot(&structure, item, decode)? {
            return Ok(value);
        }
        drop(structure);

        self.record(StatCounters::record_unwritten);
        if self.options.fail_on_unwritten_read {
            return Err(PackError::UnwrittenItem(format!("{item:?}")));
        }
        from_default(handle.default_value())
            .ok_or_else(|| PackError::unsupported(handle.converter().name(), kind))
    }

    pub fn get_boolean(&self, item: &K, handle: &PackageHandle) -> Result<bool> {
        let converter = handle.converter();
        self.read_typed(
            item,
            handle,
            ValueKind::Boolean,
            |cursor| converter.get_boolean(cursor, handle),
            Value::as_bool,
        )
    }

    pub fn get_integer(&self, item: &K, handle: &PackageHandle) -> Result<i32> {
        let converter = handle.converter();
        self.read_typed(
            item,
            handle,
            ValueKind::Integer,
            |cursor| converter.get_integer(cursor, handle),
            Value::as_i32,
        )
    }

    pub fn get_long(&self, item: &K, handle: &PackageHandle) -> Result<i64> {
        let converter = handle.converter();
        self.read_typed(
            item,
            handle,
            ValueKind::Long,
            |cursor| converter.get_long(cursor, handle),
            Value::as_i64,
        )
    }

    pub fn get_float(&self, item: &K, handle: &PackageHandle) -> Result<f32> {
        let converter = handle.converter();
        self.read_typed(
            item,
            handle,
            ValueKind::Float,
            |cursor| converter.get_float(cursor, handle),
            Value::as_f32,
        )
    }

    pub fn get_double(&self, item: &K, handle: &PackageHandle) -> Result<f64> {
        let converter = handle.converter();
        self.read_typed(
            item,
            handle,
            ValueKind::Double,
            |cursor| converter.get_double(cursor, handle),
            Value::as_f64,
        )
    }

    /// Untyped object read, `None` for a null value
    pub fn get_object_ref(&self, item: &K, handle: &PackageHandle) -> Result<Option<ObjectRef>> {
        let converter = handle.converter();
        self.read_typed(
            item,
            handle,
            ValueKind::Object,
            |cursor| converter.get_object(cursor, handle),
            |default| match default {
                Value::Object(object) => Some(object.clone()),
                _ => None,
            },
        )
    }

    pub fn get_object<T: Any + Send + Sync>(
        &self,
        item: &K,
        handle: &PackageHandle,
    ) -> Result<Option<Arc<T>>> {
        match self.get_object_ref(item, handle)? {
            None => Ok(None),
            Some(object) => object
                .downcast::<T>()
                .map(Some)
                .map_err(|_| PackError::unsupported(handle.converter().name(), ValueKind::Object)),
        }
    }

    pub fn get_string(&self, item: &K, handle: &PackageHandle) -> Result<Option<String>> {
        Ok(self
            .get_object::<String>(item, handle)?
            .map(|s| String::clone(&s)))
    }

    /// Read whatever kind the handle stores
    pub fn get_value(&self, item: &K, handle: &PackageHandle) -> Result<Value> {
        let converter = handle.converter();
        self.read_typed(
            item,
            handle,
            converter.value_kind(),
            |cursor| converter.get_value(cursor, handle),
            |default| Some(default.clone()),
        )
    }

    // ---------------------------------------------------------------------
    // Write path
    // ---------------------------------------------------------------------

    /// Encode into the slot of `item` under the exclusive value lock
    ///
    /// The slot is zeroed on the first write so stale bytes of a previous
    /// owner read as defaults.
    fn write_slot(
        &self,
        item: &K,
        handle: &PackageHandle,
        encode: impl FnOnce(SlotCursor<'_>) -> Result<()>,
    ) -> Result<()> {
        let mut structure = self.structure.read();
        structure.check_handle(handle)?;
        if structure.use_count == 0 {
            return Err(PackError::NotInUse);
        }

        if structure.state(item) == SlotState::Unregistered {
            if !self.options.auto_register {
                return Err(PackError::UnregisteredItem(format!("{item:?}")));
            }
            drop(structure);
            let mut exclusive = self.structure.write();
            self.register_locked(&mut exclusive, item)?;
            structure = RwLockWriteGuard::downgrade(exclusive);
            structure.check_handle(handle)?;
        }

        let entry = structure
            .items
            .get(item)
            .ok_or_else(|| PackError::UnregisteredItem(format!("{item:?}")))?;
        let arena = structure.arena.as_deref().ok_or(PackError::NotInUse)?;

        let _values = self.values.write();
        let _section = self.version.write();
        let cursor = SlotCursor::new(arena, entry.slot);
        if !entry.written.load(Ordering::Relaxed) {
            cursor.clear();
        }
        encode(cursor)?;
        entry.written.store(true, Ordering::Relaxed);
        self.record(StatCounters::record_write);
        Ok(())
    }

    pub fn set_boolean(&self, item: &K, handle: &PackageHandle, value: bool) -> Result<()> {
        self.write_slot(item, handle, |cursor| {
            handle.converter().set_boolean(cursor, handle, value)
        })
    }

    pub fn set_integer(&self, item: &K, handle: &PackageHandle, value: i32) -> Result<()> {
        self.write_slot(item, handle, |cursor| {
            handle.converter().set_integer(cursor, handle, value)
        })
    }

    pub fn set_long(&self, item: &K, handle: &PackageHandle, value: i64) -> Result<()> {
        self.write_slot(item, handle, |cursor| {
            handle.converter().set_long(cursor, handle, value)
        })
    }

    pub fn set_float(&self, item: &K, handle: &PackageHandle, value: f32) -> Result<()> {
        self.write_slot(item, handle, |cursor| {
            handle.converter().set_float(cursor, handle, value)
        })
    }

    pub fn set_double(&self, item: &K, handle: &PackageHandle, value: f64) -> Result<()> {
        self.write_slot(item, handle, |cursor| {
            handle.converter().set_double(cursor, handle, value)
        })
    }

    pub fn set_object_ref(
        &self,
        item: &K,
        handle: &PackageHandle,
        value: Option<ObjectRef>,
    ) -> Result<()> {
        self.write_slot(item, handle, |cursor| {
            handle.converter().set_object(cursor, handle, value.as_ref())
        })
    }

    pub fn set_object<T: Any + Send + Sync>(
        &self,
        item: &K,
        handle: &PackageHandle,
        value: Option<T>,
    ) -> Result<()> {
        let object = value.map(|v| Arc::new(v) as ObjectRef);
        self.set_object_ref(item, handle, object)
    }

    pub fn set_string(&self, item: &K, handle: &PackageHandle, value: Option<&str>) -> Result<()> {
        self.set_object(item, handle, value.map(str::to_string))
    }

    pub fn set_value(&self, item: &K, handle: &PackageHandle, value: &Value) -> Result<()> {
        self.write_slot(item, handle, |cursor| {
            handle.converter().set_value(cursor, handle, value)
        })
    }

    // ---------------------------------------------------------------------
    // Bulk clear and used-value queries
    // ---------------------------------------------------------------------

    /// Reset `handles` to their defaults for every written item in `items`
    ///
    /// Items stay marked written. Returns the number of items touched.
    pub fn clear_items<I>(&self, items: I, handles: &[Arc<PackageHandle>]) -> Result<usize>
    where
        I: IntoIterator,
        I::Item: Borrow<K>,
    {
        let structure = self.structure.read();
        for handle in handles {
            structure.check_handle(handle)?;
        }
        let Some(arena) = structure.arena.as_deref() else {
            return Ok(0);
        };

        let _values = self.values.write();
        let _section = self.version.write();
        let mut cleared = 0;
        for item in items {
            if let SlotState::Written(slot) = structure.state(item.borrow()) {
                reset_slot(SlotCursor::new(arena, slot), handles)?;
                cleared += 1;
            }
        }
        self.record_cleared(cleared);
        Ok(cleared)
    }

    /// Reset `handles` for every written item
    ///
    /// Scans the whole item map; prefer [`Self::clear_items`] when the
    /// affected items are known.
    pub fn clear_all(&self, handles: &[Arc<PackageHandle>]) -> Result<usize> {
        let structure = self.structure.read();
        for handle in handles {
            structure.check_handle(handle)?;
        }
        let Some(arena) = structure.arena.as_deref() else {
            return Ok(0);
        };

        let _values = self.values.write();
        let _section = self.version.write();
        let mut cleared = 0;
        for entry in structure.items.values() {
            if let SlotState::Written(slot) = entry.state() {
                reset_slot(SlotCursor::new(arena, slot), handles)?;
                cleared += 1;
            }
        }
        debug!(cleared, handles = handles.len(), "Cleared handles on all items");
        self.record_cleared(cleared);
        Ok(cleared)
    }

    /// Call `action` for every handle in `handles` holding a non-default
    /// value for `item`; returns how many did
    pub fn collect_used(
        &self,
        item: &K,
        handles: &[Arc<PackageHandle>],
        mut action: impl FnMut(&Arc<PackageHandle>),
    ) -> Result<usize> {
        let structure = self.structure.read();
        for handle in handles {
            structure.check_handle(handle)?;
        }
        let used = self
            .read_slot(&structure, item, |cursor| {
                let mut used = Vec::new();
                for (i, handle) in handles.iter().enumerate() {
                    if !handle.converter().is_default(cursor, handle)? {
                        used.push(i);
                    }
                }
                Ok(used)
            })?
            .unwrap_or_default();
        drop(structure);

        for &i in &used {
            action(&handles[i]);
        }
        Ok(used.len())
    }

    /// Whether any of `handles` holds a non-default value for `item`
    pub fn has_values(&self, item: &K, handles: &[Arc<PackageHandle>]) -> Result<bool> {
        Ok(self.collect_used(item, handles, |_| {})? > 0)
    }

    // ---------------------------------------------------------------------
    // Schema
    // ---------------------------------------------------------------------

    pub fn handles(&self) -> Vec<Arc<PackageHandle>> {
        self.structure.read().handles.clone()
    }

    pub fn contains_handle(&self, handle: &Arc<PackageHandle>) -> bool {
        self.structure.read().contains(handle)
    }

    /// Current slot width in bytes
    pub fn slot_width(&self) -> usize {
        self.structure.read().slot_width
    }

    /// Install additional handles, widening the slots
    ///
    /// Existing values keep their offsets; new handles read as their default
    /// for items written before the change.
    pub fn add_handles(&self, handles: &[Arc<PackageHandle>]) -> Result<()> {
        if !self.options.allow_dynamic_schema {
            return Err(PackError::SchemaLocked);
        }
        let mut structure = self.structure.write();
        check_new_handles(&structure.handles, handles)?;

        let plan = plan_layout(
            handles,
            structure.handles.len(),
            structure.slot_width,
            self.options.allow_bit_packing,
        )?;

        let _section = self.version.write();
        plan.apply(handles);
        structure.handles.extend(handles.iter().cloned());
        let previous = structure.slot_width;
        structure.slot_width = plan.width;
        if let Some(arena) = structure.arena.as_mut() {
            arena.resize_slot_width(plan.width);
        }
        info!(
            added = handles.len(),
            from = previous,
            to = plan.width,
            "Added package handles"
        );
        Ok(())
    }

    /// Uninstall handles
    ///
    /// Slots shrink only when the remaining handles need strictly less space
    /// than the current width; gaps left in the middle are not compacted.
    /// Removing the last handle releases the arena and every item.
    pub fn remove_handles(&self, handles: &[Arc<PackageHandle>]) -> Result<()> {
        if !self.options.allow_dynamic_schema {
            return Err(PackError::SchemaLocked);
        }
        let mut structure = self.structure.write();
        if let Some(missing) = handles.iter().find(|h| !structure.contains(h)) {
            return Err(PackError::UnknownHandle(missing.key().to_string()));
        }

        let _section = self.version.write();
        structure
            .handles
            .retain(|h| !handles.iter().any(|removed| PackageHandle::same(h, removed)));
        for handle in handles {
            handle.uninstall();
        }
        for (index, handle) in structure.handles.iter().enumerate() {
            handle.set_index(index);
        }

        if structure.handles.is_empty() {
            let items = structure.items.len();
            if items > 0 {
                warn!(items, "Last handle removed, releasing registered items");
            }
            structure.items.clear();
            structure.arena = None;
            structure.slot_width = 0;
            info!("Released packed data arena after schema became empty");
            return Ok(());
        }

        let required = required_width(&structure.handles);
        if required < structure.slot_width {
            debug!(from = structure.slot_width, to = required, "Shrinking slots");
            structure.slot_width = required;
            if let Some(arena) = structure.arena.as_mut() {
                arena.resize_slot_width(required);
            }
        }
        info!(removed = handles.len(), "Removed package handles");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Statistics
    // ---------------------------------------------------------------------

    pub fn stats(&self) -> Option<ManagerStats> {
        self.stats.as_ref().map(StatCounters::snapshot)
    }

    pub fn reset_stats(&self) {
        if let Some(stats) = &self.stats {
            stats.reset();
        }
    }

    fn record(&self, event: fn(&StatCounters)) {
        if let Some(stats) = &self.stats {
            event(stats);
        }
    }

    /// Bulk clears count one write per rewritten slot
    fn record_cleared(&self, cleared: usize) {
        if let Some(stats) = &self.stats {
            stats.record_writes(cleared as u64);
        }
    }
}

fn reset_slot(cursor: SlotCursor<'_>, handles: &[Arc<PackageHandle>]) -> Result<()> {
    for handle in handles {
        handle
            .converter()
            .set_value(cursor, handle, handle.default_value())?;
    }
    Ok(())
}

/// Reject handles that are duplicated, already present or installed elsewhere
fn check_new_handles(existing: &[Arc<PackageHandle>], added: &[Arc<PackageHandle>]) -> Result<()> {
    for (i, handle) in added.iter().enumerate() {
        let duplicate = existing.iter().any(|h| PackageHandle::same(h, handle))
            || added[..i].iter().any(|h| PackageHandle::same(h, handle));
        if duplicate {
            return Err(PackError::DuplicateHandle(handle.key().to_string()));
        }
        if handle.is_installed() {
            return Err(PackError::HandleAlreadyInstalled(handle.key().to_string()));
        }
    }
    Ok(())
}

/// Installed handles are released so they can join another manager
impl<K> Drop for PackedDataManager<K> {
    fn drop(&mut self) {
        let structure = self.structure.get_mut();
        for handle in &structure.handles {
            handle.uninstall();
        }
        debug!(handles = structure.handles.len(), "Released package handles");
    }
}

impl<K> fmt::Debug for PackedDataManager<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let structure = self.structure.read();
        f.debug_struct("PackedDataManager")
            .field("options", &self.options)
            .field("use_count", &structure.use_count)
            .field("items", &structure.items.len())
            .field("handles", &structure.handles.len())
            .field("slot_width", &structure.slot_width)
            .field("arena", &structure.arena)
            .finish()
    }
}

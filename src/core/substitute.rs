//! Substitution of arbitrary objects by fixed-width integer indices
//!
//! A [`Substitutor`] is a grow-only bidirectional table between objects and
//! indices starting at 1; index 0 stands for "no object". The
//! [`SubstitutingConverter`] stores the index of a value in `width` bytes of
//! the slot, XOR the index of the handle's default.

use crate::arena::SlotCursor;
use crate::converter::BytePackConverter;
use crate::error::{PackError, Result};
use crate::handle::PackageHandle;
use crate::value::{ObjectRef, Value, ValueKind};
use ahash::AHashMap;
use parking_lot::RwLock;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// Default index width in bytes
pub const DEFAULT_INDEX_WIDTH: usize = 4;

struct Table<T> {
    objects: Vec<Arc<T>>,
    indices: AHashMap<Arc<T>, u32>,
}

/// Bidirectional object ↔ index table
///
/// Shareable between handles so several fields can substitute from the
/// same vocabulary.
pub struct Substitutor<T> {
    table: RwLock<Table<T>>,
}

impl<T: Hash + Eq> Substitutor<T> {
    pub fn new() -> Self {
        Substitutor {
            table: RwLock::new(Table {
                objects: Vec::new(),
                indices: AHashMap::new(),
            }),
        }
    }

    pub fn index_of(&self, value: &T) -> Option<u32> {
        self.table.read().indices.get(value).copied()
    }

    /// Index of `value`, inserting it if it is new
    pub fn substitute(&self, value: Arc<T>) -> u32 {
        if let Some(index) = self.index_of(&value) {
            return index;
        }

        let mut table = self.table.write();
        if let Some(&index) = table.indices.get(&value) {
            return index;
        }
        table.objects.push(value.clone());
        let index = table.objects.len() as u32;
        table.indices.insert(value, index);
        index
    }

    pub fn resolve(&self, index: u32) -> Option<Arc<T>> {
        if index == 0 {
            return None;
        }
        self.table.read().objects.get(index as usize - 1).cloned()
    }

    pub fn len(&self) -> usize {
        self.table.read().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Hash + Eq> Default for Substitutor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Substitutor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Substitutor")
            .field("len", &self.table.read().objects.len())
            .finish()
    }
}

/// Converter storing objects as substitution indices
pub struct SubstitutingConverter<T> {
    table: Arc<Substitutor<T>>,
    width: usize,
    kind: ValueKind,
}

impl<T> SubstitutingConverter<T>
where
    T: Hash + Eq + Send + Sync + 'static,
{
    pub fn new(table: Arc<Substitutor<T>>) -> Self {
        SubstitutingConverter {
            table,
            width: DEFAULT_INDEX_WIDTH,
            kind: ValueKind::Object,
        }
    }

    /// Store indices in `width` bytes (1..=4)
    pub fn with_width(mut self, width: usize) -> Result<Self> {
        if !(1..=4).contains(&width) {
            return Err(PackError::InvalidConfig(format!(
                "substitution index width must be 1..=4 bytes, got {width}"
            )));
        }
        self.width = width;
        Ok(self)
    }

    pub fn table(&self) -> &Arc<Substitutor<T>> {
        &self.table
    }

    fn max_index(&self) -> u32 {
        if self.width == 4 {
            u32::MAX
        } else {
            (1u32 << (8 * self.width)) - 1
        }
    }

    fn index_for(&self, value: Option<&ObjectRef>) -> Result<u32> {
        let Some(object) = value else {
            return Ok(0);
        };
        let typed = object
            .clone()
            .downcast::<T>()
            .map_err(|_| PackError::unsupported(self.name(), ValueKind::Object))?;
        let index = self.table.substitute(typed);
        if index > self.max_index() {
            return Err(PackError::OutOfCapacity);
        }
        Ok(index)
    }
}

impl SubstitutingConverter<String> {
    pub fn strings(table: Arc<Substitutor<String>>) -> Self {
        SubstitutingConverter {
            kind: ValueKind::String,
            ..SubstitutingConverter::new(table)
        }
    }
}

impl<T> BytePackConverter for SubstitutingConverter<T>
where
    T: Hash + Eq + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        "substitute"
    }

    fn value_kind(&self) -> ValueKind {
        self.kind
    }

    fn size_in_bytes(&self) -> usize {
        self.width
    }

    fn default_pattern(&self, default: &Value) -> Result<u64> {
        match default {
            Value::Object(object) => self.index_for(object.as_ref()).map(u64::from),
            other => Err(PackError::unsupported(self.name(), other.kind())),
        }
    }

    fn get_object(
        &self,
        cursor: SlotCursor<'_>,
        handle: &PackageHandle,
    ) -> Result<Option<ObjectRef>> {
        let index = cursor.get_nbytes(handle.offset(), self.width) ^ handle.pattern() as u32;
        if index == 0 {
            return Ok(None);
        }
        match self.table.resolve(index) {
            Some(object) => Ok(Some(object as ObjectRef)),
            None => Err(PackError::UnknownSubstitute(index)),
        }
    }

    fn set_object(
        &self,
        cursor: SlotCursor<'_>,
        handle: &PackageHandle,
        value: Option<&ObjectRef>,
    ) -> Result<()> {
        let index = self.index_for(value)?;
        cursor.set_nbytes(handle.offset(), self.width, index ^ handle.pattern() as u32);
        Ok(())
    }

    fn get_value(&self, cursor: SlotCursor<'_>, handle: &PackageHandle) -> Result<Value> {
        self.get_object(cursor, handle).map(Value::Object)
    }

    fn set_value(&self, cursor: SlotCursor<'_>, handle: &PackageHandle, value: &Value) -> Result<()> {
        match value {
            Value::Object(object) => self.set_object(cursor, handle, object.as_ref()),
            other => Err(PackError::unsupported(self.name(), other.kind())),
        }
    }

    fn equal(&self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Object(None), Value::Object(None)) => true,
            (Value::Object(Some(x)), Value::Object(Some(y))) => {
                if Arc::ptr_eq(x, y) {
                    return true;
                }
                match (x.downcast_ref::<T>(), y.downcast_ref::<T>()) {
                    (Some(x), Some(y)) => x == y,
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// Index 0 after un-XORing is the default, no table lookup needed
    fn is_default(&self, cursor: SlotCursor<'_>, handle: &PackageHandle) -> Result<bool> {
        Ok(cursor.get_nbytes(handle.offset(), self.width) == 0)
    }
}

impl<T> fmt::Debug for SubstitutingConverter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubstitutingConverter")
            .field("kind", &self.kind)
            .field("width", &self.width)
            .field("table", &self.table)
            .finish()
    }
}

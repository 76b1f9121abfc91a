//! Package handles: descriptors of one packed field inside a slot
//!
//! A handle is created by a client from schema metadata and shared as an
//! `Arc<PackageHandle>`. Identity is the allocation itself: two handles with
//! the same key are still different fields. The layout fields are written by
//! the manager when the handle is installed and cleared again on removal.

use crate::converter::{self, BytePackConverter};
use crate::error::{PackError, Result};
use crate::substitute::{SubstitutingConverter, Substitutor};
use crate::value::{Value, ValueKind};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

const UNSET: usize = usize::MAX;
const NO_BIT: u8 = u8::MAX;

/// Position of an installed handle within a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    /// Position in the manager's handle list
    pub index: usize,
    /// Byte offset within the slot
    pub offset: usize,
    /// Bit within the byte at `offset`, for bit-packed handles
    pub bit: Option<u8>,
}

pub struct PackageHandle {
    key: String,
    default: Value,
    /// Encoded form of `default`, used by converters to store values relative to it
    pattern: u64,
    converter: Arc<dyn BytePackConverter>,
    index: AtomicUsize,
    offset: AtomicUsize,
    bit: AtomicU8,
}

impl PackageHandle {
    pub fn new(
        key: impl Into<String>,
        default: Value,
        converter: Arc<dyn BytePackConverter>,
    ) -> Result<Arc<Self>> {
        let pattern = converter.default_pattern(&default)?;
        Ok(Arc::new(PackageHandle {
            key: key.into(),
            default,
            pattern,
            converter,
            index: AtomicUsize::new(UNSET),
            offset: AtomicUsize::new(0),
            bit: AtomicU8::new(NO_BIT),
        }))
    }

    /// Build a handle from a (key, kind, default) triple
    ///
    /// Primitive kinds use the built-in converters; `bit_packed` selects the
    /// single-bit boolean converter. Strings get a private substitution
    /// table. Arbitrary objects need a typed table, see [`Self::substituted`].
    pub fn for_kind(
        key: impl Into<String>,
        kind: ValueKind,
        default: Value,
        bit_packed: bool,
    ) -> Result<Arc<Self>> {
        let key = key.into();
        match kind {
            ValueKind::String => {
                let converter = SubstitutingConverter::strings(Arc::new(Substitutor::new()));
                PackageHandle::new(key, default, Arc::new(converter))
            }
            ValueKind::Object => Err(PackError::InvalidConfig(format!(
                "object handle {key} needs a typed substitution table"
            ))),
            primitive => {
                let converter = converter::for_kind(primitive, bit_packed)?;
                PackageHandle::new(key, default, converter)
            }
        }
    }

    /// Build an object handle backed by a substitution table
    ///
    /// Passing `None` creates a table owned by this handle alone.
    pub fn substituted<T>(
        key: impl Into<String>,
        default: Option<T>,
        table: Option<Arc<Substitutor<T>>>,
    ) -> Result<Arc<Self>>
    where
        T: Hash + Eq + Send + Sync + 'static,
    {
        let table = table.unwrap_or_else(|| Arc::new(Substitutor::new()));
        let default = match default {
            Some(value) => Value::object(value),
            None => Value::null(),
        };
        PackageHandle::new(key, default, Arc::new(SubstitutingConverter::new(table)))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn default_value(&self) -> &Value {
        &self.default
    }

    pub fn pattern(&self) -> u64 {
        self.pattern
    }

    pub fn converter(&self) -> &Arc<dyn BytePackConverter> {
        &self.converter
    }

    pub fn value_kind(&self) -> ValueKind {
        self.converter.value_kind()
    }

    /// Handles compare by identity, not by key
    pub fn same(a: &Arc<PackageHandle>, b: &Arc<PackageHandle>) -> bool {
        Arc::ptr_eq(a, b)
    }

    pub fn is_bit_packed(&self) -> bool {
        self.converter.size_in_bytes() == 0 && self.converter.size_in_bits() > 0
    }

    pub fn is_installed(&self) -> bool {
        self.index.load(Ordering::Relaxed) != UNSET
    }

    pub fn layout(&self) -> Option<SlotLayout> {
        let index = self.index.load(Ordering::Relaxed);
        if index == UNSET {
            return None;
        }
        Some(SlotLayout {
            index,
            offset: self.offset(),
            bit: self.bit(),
        })
    }

    pub fn offset(&self) -> usize {
        self.offset.load(Ordering::Relaxed)
    }

    pub fn bit(&self) -> Option<u8> {
        match self.bit.load(Ordering::Relaxed) {
            NO_BIT => None,
            bit => Some(bit),
        }
    }

    /// Last byte (exclusive) this handle occupies within a slot
    pub(crate) fn end_offset(&self) -> usize {
        self.offset() + self.converter.size_in_bytes().max(1)
    }

    pub(crate) fn install(&self, layout: SlotLayout) {
        self.offset.store(layout.offset, Ordering::Relaxed);
        self.bit
            .store(layout.bit.unwrap_or(NO_BIT), Ordering::Relaxed);
        self.index.store(layout.index, Ordering::Relaxed);
    }

    pub(crate) fn set_index(&self, index: usize) {
        self.index.store(index, Ordering::Relaxed);
    }

    pub(crate) fn uninstall(&self) {
        self.index.store(UNSET, Ordering::Relaxed);
        self.offset.store(0, Ordering::Relaxed);
        self.bit.store(NO_BIT, Ordering::Relaxed);
    }
}

impl fmt::Debug for PackageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageHandle")
            .field("key", &self.key)
            .field("kind", &self.converter.value_kind())
            .field("default", &self.default)
            .field("layout", &self.layout())
            .finish()
    }
}

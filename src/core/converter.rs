//! Byte-pack converters: typed encode/decode at a handle's slot position
//!
//! Every converter stores a value relative to the handle's default: the
//! stored bits are `value ^ default`. All-zero bytes therefore always decode
//! to the default, which is what lets the manager widen slots without
//! touching existing items.
//!
//! Typed accessors a converter does not implement fail with
//! [`PackError::UnsupportedKind`].

use crate::arena::SlotCursor;
use crate::error::{PackError, Result};
use crate::handle::PackageHandle;
use crate::value::{ObjectRef, Value, ValueKind};
use std::fmt;
use std::sync::Arc;

pub trait BytePackConverter: Send + Sync + fmt::Debug {
    /// Short name used in error messages
    fn name(&self) -> &'static str;

    fn value_kind(&self) -> ValueKind;

    /// Width in whole bytes, 0 if the converter is bit-packed
    fn size_in_bytes(&self) -> usize;

    /// Width in bits for bit-packed converters
    fn size_in_bits(&self) -> usize {
        0
    }

    /// Encoded form of a default value
    fn default_pattern(&self, default: &Value) -> Result<u64>;

    fn get_boolean(&self, _cursor: SlotCursor<'_>, _handle: &PackageHandle) -> Result<bool> {
        Err(PackError::unsupported(self.name(), ValueKind::Boolean))
    }

    fn set_boolean(
        &self,
        _cursor: SlotCursor<'_>,
        _handle: &PackageHandle,
        _value: bool,
    ) -> Result<()> {
        Err(PackError::unsupported(self.name(), ValueKind::Boolean))
    }

    fn get_integer(&self, _cursor: SlotCursor<'_>, _handle: &PackageHandle) -> Result<i32> {
        Err(PackError::unsupported(self.name(), ValueKind::Integer))
    }

    fn set_integer(
        &self,
        _cursor: SlotCursor<'_>,
        _handle: &PackageHandle,
        _value: i32,
    ) -> Result<()> {
        Err(PackError::unsupported(self.name(), ValueKind::Integer))
    }

    fn get_long(&self, _cursor: SlotCursor<'_>, _handle: &PackageHandle) -> Result<i64> {
        Err(PackError::unsupported(self.name(), ValueKind::Long))
    }

    fn set_long(&self, _cursor: SlotCursor<'_>, _handle: &PackageHandle, _value: i64) -> Result<()> {
        Err(PackError::unsupported(self.name(), ValueKind::Long))
    }

    fn get_float(&self, _cursor: SlotCursor<'_>, _handle: &PackageHandle) -> Result<f32> {
        Err(PackError::unsupported(self.name(), ValueKind::Float))
    }

    fn set_float(&self, _cursor: SlotCursor<'_>, _handle: &PackageHandle, _value: f32) -> Result<()> {
        Err(PackError::unsupported(self.name(), ValueKind::Float))
    }

    fn get_double(&self, _cursor: SlotCursor<'_>, _handle: &PackageHandle) -> Result<f64> {
        Err(PackError::unsupported(self.name(), ValueKind::Double))
    }

    fn set_double(
        &self,
        _cursor: SlotCursor<'_>,
        _handle: &PackageHandle,
        _value: f64,
    ) -> Result<()> {
        Err(PackError::unsupported(self.name(), ValueKind::Double))
    }

    fn get_object(
        &self,
        _cursor: SlotCursor<'_>,
        _handle: &PackageHandle,
    ) -> Result<Option<ObjectRef>> {
        Err(PackError::unsupported(self.name(), ValueKind::Object))
    }

    fn set_object(
        &self,
        _cursor: SlotCursor<'_>,
        _handle: &PackageHandle,
        _value: Option<&ObjectRef>,
    ) -> Result<()> {
        Err(PackError::unsupported(self.name(), ValueKind::Object))
    }

    fn get_value(&self, cursor: SlotCursor<'_>, handle: &PackageHandle) -> Result<Value>;

    fn set_value(&self, cursor: SlotCursor<'_>, handle: &PackageHandle, value: &Value)
        -> Result<()>;

    /// Equality of two decoded values
    fn equal(&self, a: &Value, b: &Value) -> bool;

    /// Whether the slot holds the handle's default
    fn is_default(&self, cursor: SlotCursor<'_>, handle: &PackageHandle) -> Result<bool> {
        let value = self.get_value(cursor, handle)?;
        Ok(self.equal(&value, handle.default_value()))
    }
}

/// Built-in converter for a primitive kind
pub fn for_kind(kind: ValueKind, bit_packed: bool) -> Result<Arc<dyn BytePackConverter>> {
    let converter: Arc<dyn BytePackConverter> = match kind {
        ValueKind::Boolean if bit_packed => Arc::new(BitwiseBooleanConverter),
        ValueKind::Boolean => Arc::new(BooleanConverter),
        ValueKind::Integer => Arc::new(IntegerConverter),
        ValueKind::Long => Arc::new(LongConverter),
        ValueKind::Float => Arc::new(FloatConverter),
        ValueKind::Double => Arc::new(DoubleConverter),
        other => return Err(PackError::unsupported("primitive", other)),
    };
    Ok(converter)
}

fn mismatch(converter: &'static str, value: &Value) -> PackError {
    PackError::unsupported(converter, value.kind())
}

/// Boolean stored in a full byte
#[derive(Debug, Default, Clone, Copy)]
pub struct BooleanConverter;

impl BytePackConverter for BooleanConverter {
    fn name(&self) -> &'static str {
        "boolean"
    }

    fn value_kind(&self) -> ValueKind {
        ValueKind::Boolean
    }

    fn size_in_bytes(&self) -> usize {
        1
    }

    fn default_pattern(&self, default: &Value) -> Result<u64> {
        default
            .as_bool()
            .map(u64::from)
            .ok_or_else(|| mismatch(self.name(), default))
    }

    fn get_boolean(&self, cursor: SlotCursor<'_>, handle: &PackageHandle) -> Result<bool> {
        let stored = cursor.get_byte(handle.offset()) != 0;
        Ok(stored ^ (handle.pattern() != 0))
    }

    fn set_boolean(&self, cursor: SlotCursor<'_>, handle: &PackageHandle, value: bool) -> Result<()> {
        let stored = value ^ (handle.pattern() != 0);
        cursor.set_byte(handle.offset(), u8::from(stored));
        Ok(())
    }

    fn get_value(&self, cursor: SlotCursor<'_>, handle: &PackageHandle) -> Result<Value> {
        self.get_boolean(cursor, handle).map(Value::Boolean)
    }

    fn set_value(&self, cursor: SlotCursor<'_>, handle: &PackageHandle, value: &Value) -> Result<()> {
        match value {
            Value::Boolean(v) => self.set_boolean(cursor, handle, *v),
            other => Err(mismatch(self.name(), other)),
        }
    }

    fn equal(&self, a: &Value, b: &Value) -> bool {
        matches!((a, b), (Value::Boolean(x), Value::Boolean(y)) if x == y)
    }
}

/// Boolean stored as a single bit, packed with its neighbours
///
/// Bit 0 is the most significant bit of the byte.
#[derive(Debug, Default, Clone, Copy)]
pub struct BitwiseBooleanConverter;

impl BitwiseBooleanConverter {
    fn mask(handle: &PackageHandle) -> u8 {
        0x80 >> handle.bit().unwrap_or(0)
    }
}

impl BytePackConverter for BitwiseBooleanConverter {
    fn name(&self) -> &'static str {
        "bitwise-boolean"
    }

    fn value_kind(&self) -> ValueKind {
        ValueKind::Boolean
    }

    fn size_in_bytes(&self) -> usize {
        0
    }

    fn size_in_bits(&self) -> usize {
        1
    }

    fn default_pattern(&self, default: &Value) -> Result<u64> {
        BooleanConverter.default_pattern(default)
    }

    fn get_boolean(&self, cursor: SlotCursor<'_>, handle: &PackageHandle) -> Result<bool> {
        let stored = cursor.get_byte(handle.offset()) & Self::mask(handle) != 0;
        Ok(stored ^ (handle.pattern() != 0))
    }

    fn set_boolean(&self, cursor: SlotCursor<'_>, handle: &PackageHandle, value: bool) -> Result<()> {
        let offset = handle.offset();
        let mask = Self::mask(handle);
        let byte = cursor.get_byte(offset);
        let byte = if value ^ (handle.pattern() != 0) {
            byte | mask
        } else {
            byte & !mask
        };
        cursor.set_byte(offset, byte);
        Ok(())
    }

    fn get_value(&self, cursor: SlotCursor<'_>, handle: &PackageHandle) -> Result<Value> {
        self.get_boolean(cursor, handle).map(Value::Boolean)
    }

    fn set_value(&self, cursor: SlotCursor<'_>, handle: &PackageHandle, value: &Value) -> Result<()> {
        match value {
            Value::Boolean(v) => self.set_boolean(cursor, handle, *v),
            other => Err(mismatch(self.name(), other)),
        }
    }

    fn equal(&self, a: &Value, b: &Value) -> bool {
        BooleanConverter.equal(a, b)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IntegerConverter;

impl BytePackConverter for IntegerConverter {
    fn name(&self) -> &'static str {
        "int"
    }

    fn value_kind(&self) -> ValueKind {
        ValueKind::Integer
    }

    fn size_in_bytes(&self) -> usize {
        4
    }

    fn default_pattern(&self, default: &Value) -> Result<u64> {
        default
            .as_i32()
            .map(|v| v as u32 as u64)
            .ok_or_else(|| mismatch(self.name(), default))
    }

    fn get_integer(&self, cursor: SlotCursor<'_>, handle: &PackageHandle) -> Result<i32> {
        Ok(cursor.get_int(handle.offset()) ^ handle.pattern() as u32 as i32)
    }

    fn set_integer(&self, cursor: SlotCursor<'_>, handle: &PackageHandle, value: i32) -> Result<()> {
        cursor.set_int(handle.offset(), value ^ handle.pattern() as u32 as i32);
        Ok(())
    }

    fn get_value(&self, cursor: SlotCursor<'_>, handle: &PackageHandle) -> Result<Value> {
        self.get_integer(cursor, handle).map(Value::Integer)
    }

    fn set_value(&self, cursor: SlotCursor<'_>, handle: &PackageHandle, value: &Value) -> Result<()> {
        match value {
            Value::Integer(v) => self.set_integer(cursor, handle, *v),
            other => Err(mismatch(self.name(), other)),
        }
    }

    fn equal(&self, a: &Value, b: &Value) -> bool {
        matches!((a, b), (Value::Integer(x), Value::Integer(y)) if x == y)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LongConverter;

impl BytePackConverter for LongConverter {
    fn name(&self) -> &'static str {
        "long"
    }

    fn value_kind(&self) -> ValueKind {
        ValueKind::Long
    }

    fn size_in_bytes(&self) -> usize {
        8
    }

    fn default_pattern(&self, default: &Value) -> Result<u64> {
        default
            .as_i64()
            .map(|v| v as u64)
            .ok_or_else(|| mismatch(self.name(), default))
    }

    fn get_long(&self, cursor: SlotCursor<'_>, handle: &PackageHandle) -> Result<i64> {
        Ok(cursor.get_long(handle.offset()) ^ handle.pattern() as i64)
    }

    fn set_long(&self, cursor: SlotCursor<'_>, handle: &PackageHandle, value: i64) -> Result<()> {
        cursor.set_long(handle.offset(), value ^ handle.pattern() as i64);
        Ok(())
    }

    fn get_value(&self, cursor: SlotCursor<'_>, handle: &PackageHandle) -> Result<Value> {
        self.get_long(cursor, handle).map(Value::Long)
    }

    fn set_value(&self, cursor: SlotCursor<'_>, handle: &PackageHandle, value: &Value) -> Result<()> {
        match value {
            Value::Long(v) => self.set_long(cursor, handle, *v),
            other => Err(mismatch(self.name(), other)),
        }
    }

    fn equal(&self, a: &Value, b: &Value) -> bool {
        matches!((a, b), (Value::Long(x), Value::Long(y)) if x == y)
    }
}

/// Floats are stored by bit pattern, so NaN payloads survive a round trip
#[derive(Debug, Default, Clone, Copy)]
pub struct FloatConverter;

impl BytePackConverter for FloatConverter {
    fn name(&self) -> &'static str {
        "float"
    }

    fn value_kind(&self) -> ValueKind {
        ValueKind::Float
    }

    fn size_in_bytes(&self) -> usize {
        4
    }

    fn default_pattern(&self, default: &Value) -> Result<u64> {
        default
            .as_f32()
            .map(|v| v.to_bits() as u64)
            .ok_or_else(|| mismatch(self.name(), default))
    }

    fn get_float(&self, cursor: SlotCursor<'_>, handle: &PackageHandle) -> Result<f32> {
        let bits = cursor.get_int(handle.offset()) as u32 ^ handle.pattern() as u32;
        Ok(f32::from_bits(bits))
    }

    fn set_float(&self, cursor: SlotCursor<'_>, handle: &PackageHandle, value: f32) -> Result<()> {
        let bits = value.to_bits() ^ handle.pattern() as u32;
        cursor.set_int(handle.offset(), bits as i32);
        Ok(())
    }

    fn get_value(&self, cursor: SlotCursor<'_>, handle: &PackageHandle) -> Result<Value> {
        self.get_float(cursor, handle).map(Value::Float)
    }

    fn set_value(&self, cursor: SlotCursor<'_>, handle: &PackageHandle, value: &Value) -> Result<()> {
        match value {
            Value::Float(v) => self.set_float(cursor, handle, *v),
            other => Err(mismatch(self.name(), other)),
        }
    }

    fn equal(&self, a: &Value, b: &Value) -> bool {
        matches!((a, b), (Value::Float(x), Value::Float(y)) if x.to_bits() == y.to_bits())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DoubleConverter;

impl BytePackConverter for DoubleConverter {
    fn name(&self) -> &'static str {
        "double"
    }

    fn value_kind(&self) -> ValueKind {
        ValueKind::Double
    }

    fn size_in_bytes(&self) -> usize {
        8
    }

    fn default_pattern(&self, default: &Value) -> Result<u64> {
        default
            .as_f64()
            .map(f64::to_bits)
            .ok_or_else(|| mismatch(self.name(), default))
    }

    fn get_double(&self, cursor: SlotCursor<'_>, handle: &PackageHandle) -> Result<f64> {
        let bits = cursor.get_long(handle.offset()) as u64 ^ handle.pattern();
        Ok(f64::from_bits(bits))
    }

    fn set_double(&self, cursor: SlotCursor<'_>, handle: &PackageHandle, value: f64) -> Result<()> {
        let bits = value.to_bits() ^ handle.pattern();
        cursor.set_long(handle.offset(), bits as i64);
        Ok(())
    }

    fn get_value(&self, cursor: SlotCursor<'_>, handle: &PackageHandle) -> Result<Value> {
        self.get_double(cursor, handle).map(Value::Double)
    }

    fn set_value(&self, cursor: SlotCursor<'_>, handle: &PackageHandle, value: &Value) -> Result<()> {
        match value {
            Value::Double(v) => self.set_double(cursor, handle, *v),
            other => Err(mismatch(self.name(), other)),
        }
    }

    fn equal(&self, a: &Value, b: &Value) -> bool {
        matches!((a, b), (Value::Double(x), Value::Double(y)) if x.to_bits() == y.to_bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{ByteArena, HeapArena};
    use crate::handle::SlotLayout;

    fn installed(kind: ValueKind, default: Value, offset: usize, bit: Option<u8>) -> Arc<PackageHandle> {
        let handle = PackageHandle::for_kind("test", kind, default, bit.is_some()).unwrap();
        handle.install(SlotLayout {
            index: 0,
            offset,
            bit,
        });
        handle
    }

    fn arena(width: usize) -> (HeapArena, usize) {
        let mut arena = HeapArena::new(width, 1);
        let slot = arena.alloc().unwrap();
        (arena, slot)
    }

    #[test]
    fn test_zero_bytes_decode_to_default() {
        let (arena, slot) = arena(8);
        let cursor = SlotCursor::new(&arena, slot);

        let int = installed(ValueKind::Integer, Value::Integer(-1), 0, None);
        assert_eq!(int.converter().get_integer(cursor, &int).unwrap(), -1);

        let double = installed(ValueKind::Double, Value::Double(f64::NAN), 0, None);
        assert!(double.converter().get_double(cursor, &double).unwrap().is_nan());

        let flag = installed(ValueKind::Boolean, Value::Boolean(true), 0, Some(3));
        assert!(flag.converter().get_boolean(cursor, &flag).unwrap());
        assert!(flag.converter().is_default(cursor, &flag).unwrap());
    }

    #[test]
    fn test_boundary_values() {
        let (arena, slot) = arena(8);
        let cursor = SlotCursor::new(&arena, slot);

        let int = installed(ValueKind::Integer, Value::Integer(7), 0, None);
        for v in [0, i32::MIN, i32::MAX, -1] {
            int.converter().set_integer(cursor, &int, v).unwrap();
            assert_eq!(int.converter().get_integer(cursor, &int).unwrap(), v);
        }

        let long = installed(ValueKind::Long, Value::Long(0), 0, None);
        for v in [0, i64::MIN, i64::MAX] {
            long.converter().set_long(cursor, &long, v).unwrap();
            assert_eq!(long.converter().get_long(cursor, &long).unwrap(), v);
        }

        let float = installed(ValueKind::Float, Value::Float(0.0), 0, None);
        for v in [f32::INFINITY, f32::NEG_INFINITY, f32::MIN_POSITIVE, -0.0] {
            float.converter().set_float(cursor, &float, v).unwrap();
            let read = float.converter().get_float(cursor, &float).unwrap();
            assert_eq!(read.to_bits(), v.to_bits());
        }
        float.converter().set_float(cursor, &float, f32::NAN).unwrap();
        assert!(float.converter().get_float(cursor, &float).unwrap().is_nan());
    }

    #[test]
    fn test_bits_share_a_byte() {
        let (arena, slot) = arena(1);
        let cursor = SlotCursor::new(&arena, slot);

        let flags: Vec<_> = (0..8)
            .map(|bit| installed(ValueKind::Boolean, Value::Boolean(false), 0, Some(bit)))
            .collect();

        flags[0].converter().set_boolean(cursor, &flags[0], true).unwrap();
        flags[7].converter().set_boolean(cursor, &flags[7], true).unwrap();
        assert_eq!(cursor.get_byte(0), 0b1000_0001);

        flags[0].converter().set_boolean(cursor, &flags[0], false).unwrap();
        assert_eq!(cursor.get_byte(0), 0b0000_0001);
        for (bit, flag) in flags.iter().enumerate() {
            let value = flag.converter().get_boolean(cursor, flag).unwrap();
            assert_eq!(value, bit == 7);
        }
    }

    #[test]
    fn test_unsupported_kind() {
        let (arena, slot) = arena(4);
        let cursor = SlotCursor::new(&arena, slot);
        let int = installed(ValueKind::Integer, Value::Integer(0), 0, None);

        let err = int.converter().get_double(cursor, &int).unwrap_err();
        assert!(matches!(
            err,
            PackError::UnsupportedKind {
                converter: "int",
                kind: ValueKind::Double
            }
        ));
        assert!(int
            .converter()
            .set_value(cursor, &int, &Value::Long(3))
            .is_err());
    }

    #[test]
    fn test_equality_by_bits() {
        let conv = DoubleConverter;
        assert!(conv.equal(&Value::Double(f64::NAN), &Value::Double(f64::NAN)));
        assert!(!conv.equal(&Value::Double(0.0), &Value::Double(-0.0)));
        assert!(!conv.equal(&Value::Double(1.0), &Value::Float(1.0)));
    }

    #[test]
    fn test_for_kind_rejects_objects() {
        assert!(for_kind(ValueKind::String, false).is_err());
        assert_eq!(for_kind(ValueKind::Boolean, true).unwrap().size_in_bits(), 1);
    }
}

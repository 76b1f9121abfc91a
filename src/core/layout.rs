//! Slot layout computation
//!
//! Full-byte handles are laid out in list order at increasing byte offsets.
//! Bit-packed handles follow in trailing bytes, filled left to right; a handle
//! that does not fit in the remaining bits of the current byte opens a new one.

use crate::error::{PackError, Result};
use crate::handle::{PackageHandle, SlotLayout};
use std::sync::Arc;

/// Positions computed for a batch of handles, not yet installed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutPlan {
    pub positions: Vec<SlotLayout>,
    /// Total slot width in bytes including the batch
    pub width: usize,
}

impl LayoutPlan {
    /// Write the computed positions into the handles
    pub fn apply(&self, handles: &[Arc<PackageHandle>]) {
        debug_assert_eq!(handles.len(), self.positions.len());
        for (handle, layout) in handles.iter().zip(&self.positions) {
            handle.install(*layout);
        }
    }
}

/// Plan positions for `handles`, which will occupy list positions from
/// `start_index` and slot bytes from `start_offset`
pub fn plan_layout(
    handles: &[Arc<PackageHandle>],
    start_index: usize,
    start_offset: usize,
    allow_bit_packing: bool,
) -> Result<LayoutPlan> {
    let mut positions = vec![
        SlotLayout {
            index: 0,
            offset: 0,
            bit: None,
        };
        handles.len()
    ];
    let mut offset = start_offset;
    let mut bitwise = Vec::new();

    for (i, handle) in handles.iter().enumerate() {
        let converter = handle.converter();
        let bytes = converter.size_in_bytes();
        let bits = converter.size_in_bits();

        if bytes > 0 {
            positions[i] = SlotLayout {
                index: start_index + i,
                offset,
                bit: None,
            };
            offset += bytes;
        } else if bits > 0 && bits <= 8 {
            if !allow_bit_packing {
                return Err(PackError::BitPackingDisabled(handle.key().to_string()));
            }
            bitwise.push((i, bits));
        } else {
            return Err(PackError::BitPackingUnsupported(format!(
                "{} declares {} bytes and {} bits",
                handle.key(),
                bytes,
                bits
            )));
        }
    }

    if !bitwise.is_empty() {
        let mut byte = offset;
        let mut bit = 0usize;
        offset += 1;

        for (i, bits) in bitwise {
            if bit + bits > 8 {
                byte += 1;
                offset += 1;
                bit = 0;
            }
            positions[i] = SlotLayout {
                index: start_index + i,
                offset: byte,
                bit: Some(bit as u8),
            };
            bit += bits;
        }
    }

    Ok(LayoutPlan {
        positions,
        width: offset,
    })
}

/// Smallest slot width that still covers every installed handle
pub fn required_width(handles: &[Arc<PackageHandle>]) -> usize {
    handles
        .iter()
        .map(|handle| handle.end_offset())
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Value, ValueKind};

    fn handle(kind: ValueKind, bit_packed: bool) -> Arc<PackageHandle> {
        let default = match kind {
            ValueKind::Boolean => Value::Boolean(false),
            ValueKind::Integer => Value::Integer(0),
            ValueKind::Long => Value::Long(0),
            ValueKind::Float => Value::Float(0.0),
            ValueKind::Double => Value::Double(0.0),
            _ => Value::null(),
        };
        PackageHandle::for_kind("h", kind, default, bit_packed).unwrap()
    }

    #[test]
    fn test_byte_offsets_follow_list_order() {
        let handles = vec![
            handle(ValueKind::Integer, false),
            handle(ValueKind::Double, false),
            handle(ValueKind::Boolean, false),
        ];
        let plan = plan_layout(&handles, 0, 0, false).unwrap();
        let offsets: Vec<_> = plan.positions.iter().map(|p| p.offset).collect();
        assert_eq!(offsets, vec![0, 4, 12]);
        assert_eq!(plan.width, 13);
    }

    #[test]
    fn test_bits_go_to_trailing_bytes() {
        let handles = vec![
            handle(ValueKind::Boolean, true),
            handle(ValueKind::Integer, false),
            handle(ValueKind::Boolean, true),
        ];
        let plan = plan_layout(&handles, 0, 0, true).unwrap();
        assert_eq!(
            plan.positions[1],
            SlotLayout {
                index: 1,
                offset: 0,
                bit: None
            }
        );
        assert_eq!(
            plan.positions[0],
            SlotLayout {
                index: 0,
                offset: 4,
                bit: Some(0)
            }
        );
        assert_eq!(plan.positions[2].bit, Some(1));
        assert_eq!(plan.positions[2].offset, 4);
        assert_eq!(plan.width, 5);
    }

    #[test]
    fn test_bit_density() {
        for n in [1usize, 7, 8, 9, 16, 17] {
            let handles: Vec<_> = (0..n).map(|_| handle(ValueKind::Boolean, true)).collect();
            let plan = plan_layout(&handles, 0, 0, true).unwrap();
            assert_eq!(plan.width, n.div_ceil(8), "n = {n}");
        }
    }

    #[test]
    fn test_bit_packing_disabled() {
        let handles = vec![handle(ValueKind::Boolean, true)];
        let result = plan_layout(&handles, 0, 0, false);
        assert!(matches!(result, Err(PackError::BitPackingDisabled(_))));
    }

    #[test]
    fn test_start_index_and_offset() {
        let handles = vec![handle(ValueKind::Long, false), handle(ValueKind::Boolean, true)];
        let plan = plan_layout(&handles, 3, 10, true).unwrap();
        assert_eq!(plan.positions[0].index, 3);
        assert_eq!(plan.positions[0].offset, 10);
        assert_eq!(plan.positions[1].offset, 18);
        assert_eq!(plan.width, 19);

        plan.apply(&handles);
        assert_eq!(required_width(&handles), 19);
        assert_eq!(required_width(&handles[..1]), 18);
        assert_eq!(required_width(&[]), 0);
    }
}

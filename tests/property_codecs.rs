//! Property-based tests for packed field encoding
//!
//! Uses proptest to check round-trips, defaults and field independence across
//! random values and schemas

use packed_annotations::{
    HeapArena, PackageHandle, PackedDataManager, PackedDataManagerBuilder, Value, ValueKind,
};
use proptest::prelude::*;
use std::sync::Arc;

fn build(handles: &[Arc<PackageHandle>]) -> PackedDataManager<u32> {
    let manager = PackedDataManagerBuilder::new()
        .arena_factory(HeapArena::factory())
        .initial_capacity(4)
        .handles(handles.iter().cloned())
        .build()
        .unwrap();
    manager.attach();
    manager
}

fn primitive(key: String, default: Value, bit_packed: bool) -> Arc<PackageHandle> {
    PackageHandle::for_kind(key, default.kind(), default, bit_packed).unwrap()
}

/// A default value of a random primitive kind
fn any_default() -> impl Strategy<Value = (Value, bool)> {
    prop_oneof![
        any::<bool>().prop_map(|v| (Value::Boolean(v), true)),
        any::<bool>().prop_map(|v| (Value::Boolean(v), false)),
        any::<i32>().prop_map(|v| (Value::Integer(v), false)),
        any::<i64>().prop_map(|v| (Value::Long(v), false)),
        any::<u32>().prop_map(|bits| (Value::Float(f32::from_bits(bits)), false)),
        any::<u64>().prop_map(|bits| (Value::Double(f64::from_bits(bits)), false)),
    ]
}

/// A value of the same kind as `default`
fn value_like(default: &Value) -> BoxedStrategy<Value> {
    match default {
        Value::Boolean(_) => any::<bool>().prop_map(Value::Boolean).boxed(),
        Value::Integer(_) => any::<i32>().prop_map(Value::Integer).boxed(),
        Value::Long(_) => any::<i64>().prop_map(Value::Long).boxed(),
        Value::Float(_) => any::<u32>()
            .prop_map(|bits| Value::Float(f32::from_bits(bits)))
            .boxed(),
        Value::Double(_) => any::<u64>()
            .prop_map(|bits| Value::Double(f64::from_bits(bits)))
            .boxed(),
        Value::Object(_) => Just(Value::null()).boxed(),
    }
}

/// Bitwise comparison so NaN payloads count as equal
fn same_bits(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Boolean(x), Value::Boolean(y)) => x == y,
        (Value::Integer(x), Value::Integer(y)) => x == y,
        (Value::Long(x), Value::Long(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
        (Value::Double(x), Value::Double(y)) => x.to_bits() == y.to_bits(),
        _ => false,
    }
}

proptest! {
    #[test]
    fn prop_integer_round_trip(default in any::<i32>(), value in any::<i32>()) {
        let h = primitive("n".into(), Value::Integer(default), false);
        let m = build(&[h.clone()]);
        prop_assert_eq!(m.get_integer(&1, &h).unwrap(), default);
        m.set_integer(&1, &h, value).unwrap();
        prop_assert_eq!(m.get_integer(&1, &h).unwrap(), value);
    }

    #[test]
    fn prop_long_round_trip(default in any::<i64>(), value in any::<i64>()) {
        let h = primitive("n".into(), Value::Long(default), false);
        let m = build(&[h.clone()]);
        m.set_long(&1, &h, value).unwrap();
        prop_assert_eq!(m.get_long(&1, &h).unwrap(), value);
    }

    #[test]
    fn prop_float_bits_survive(default in any::<u32>(), value in any::<u32>()) {
        let h = primitive("f".into(), Value::Float(f32::from_bits(default)), false);
        let m = build(&[h.clone()]);
        prop_assert_eq!(m.get_float(&1, &h).unwrap().to_bits(), default);
        m.set_float(&1, &h, f32::from_bits(value)).unwrap();
        prop_assert_eq!(m.get_float(&1, &h).unwrap().to_bits(), value);
    }

    #[test]
    fn prop_double_bits_survive(value in any::<u64>()) {
        let h = primitive("d".into(), Value::Double(f64::NAN), false);
        let m = build(&[h.clone()]);
        m.set_double(&1, &h, f64::from_bits(value)).unwrap();
        prop_assert_eq!(m.get_double(&1, &h).unwrap().to_bits(), value);
    }

    #[test]
    fn prop_string_round_trip(
        default in proptest::option::of("[a-z]{0,8}"),
        values in prop::collection::vec(proptest::option::of("[a-z]{0,8}"), 1..10)
    ) {
        let h = PackageHandle::for_kind(
            "s",
            ValueKind::String,
            default.clone().map_or_else(Value::null, Value::text),
            false,
        ).unwrap();
        let m = build(&[h.clone()]);
        prop_assert_eq!(m.get_string(&1, &h).unwrap(), default);
        for value in &values {
            m.set_string(&1, &h, value.as_deref()).unwrap();
            prop_assert_eq!(&m.get_string(&1, &h).unwrap(), value);
        }
    }

    #[test]
    fn prop_writes_leave_other_fields_alone(
        (defaults, writes) in prop::collection::vec(any_default(), 1..24)
            .prop_flat_map(|defaults| {
                let n = defaults.len();
                let writes = defaults
                    .iter()
                    .map(|(d, _)| value_like(d))
                    .collect::<Vec<_>>();
                let order = prop::collection::vec(0..n, 0..48);
                (Just(defaults), (writes, order))
            })
    ) {
        let (values, order) = writes;
        let handles: Vec<_> = defaults
            .iter()
            .enumerate()
            .map(|(i, (default, packed))| primitive(format!("h{i}"), default.clone(), *packed))
            .collect();
        let m = build(&handles);

        let mut expected: Vec<Value> = defaults.iter().map(|(d, _)| d.clone()).collect();
        for &i in &order {
            m.set_value(&7, &handles[i], &values[i]).unwrap();
            expected[i] = values[i].clone();

            for (j, handle) in handles.iter().enumerate() {
                let actual = m.get_value(&7, handle).unwrap();
                prop_assert!(
                    same_bits(&actual, &expected[j]),
                    "field {} is {:?}, expected {:?}",
                    j,
                    actual,
                    expected[j]
                );
            }
        }
    }

    #[test]
    fn prop_slot_width_counts_bits(bytes in 0usize..6, bits in 0usize..40) {
        let mut handles: Vec<_> = (0..bytes)
            .map(|i| primitive(format!("i{i}"), Value::Integer(0), false))
            .collect();
        handles.extend((0..bits).map(|i| primitive(format!("b{i}"), Value::Boolean(false), true)));
        prop_assume!(!handles.is_empty());
        let m = build(&handles);
        prop_assert_eq!(m.slot_width(), bytes * 4 + bits.div_ceil(8));
    }
}

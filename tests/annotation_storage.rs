//! Annotation storages as clients of packed data managers

use packed_annotations::{
    AnnotationSpec, AnnotationStorage, HeapArena, ManagerOptions, PackError, PackedDataManager,
    PackedDataManagerBuilder, Value,
};
use std::sync::Arc;

fn shared_manager() -> Arc<PackedDataManager<u64>> {
    Arc::new(
        PackedDataManagerBuilder::new()
            .arena_factory(HeapArena::factory())
            .allow_dynamic_schema(true)
            .build()
            .unwrap(),
    )
}

#[test]
fn test_storages_share_one_arena() {
    let manager = shared_manager();
    let tokens = AnnotationStorage::shared(
        manager.clone(),
        vec![
            AnnotationSpec::integer("start", -1),
            AnnotationSpec::integer("end", -1),
            AnnotationSpec::boolean("space_after", true),
        ],
    )
    .unwrap();
    let tags = AnnotationStorage::shared(
        manager.clone(),
        vec![
            AnnotationSpec::string("pos", None),
            AnnotationSpec::float("confidence", 0.0),
        ],
    )
    .unwrap();

    assert_eq!(manager.use_count(), 2);
    assert_eq!(manager.handles().len(), 5);
    assert_eq!(manager.slot_width(), 4 + 4 + 1 + 4 + 4);

    tokens.set_integer(&1, "start", 0).unwrap();
    tokens.set_integer(&1, "end", 5).unwrap();
    tags.set_string(&1, "pos", Some("NN")).unwrap();
    tags.set_float(&1, "confidence", 0.75).unwrap();

    assert_eq!(tokens.get_integer(&1, "end").unwrap(), 5);
    assert!(tokens.get_boolean(&1, "space_after").unwrap());
    assert_eq!(tags.get_string(&1, "pos").unwrap().as_deref(), Some("NN"));
    assert_eq!(tags.annotation_keys(&1).unwrap(), vec!["pos", "confidence"]);
    assert_eq!(tokens.annotation_keys(&1).unwrap(), vec!["start", "end"]);
    assert_eq!(manager.registered_count(), 1);
}

#[test]
fn test_dropping_a_storage_removes_its_fields() {
    let manager = shared_manager();
    let first = AnnotationStorage::shared(manager.clone(), vec![AnnotationSpec::long("id", 0)])
        .unwrap();
    let second =
        AnnotationStorage::shared(manager.clone(), vec![AnnotationSpec::double("score", 0.5)])
            .unwrap();

    first.set_long(&3, "id", 33).unwrap();
    second.set_double(&3, "score", 0.25).unwrap();

    drop(second);
    assert_eq!(manager.use_count(), 1);
    assert_eq!(manager.handles().len(), 1);
    assert_eq!(manager.slot_width(), 8);
    assert_eq!(first.get_long(&3, "id").unwrap(), 33);

    drop(first);
    assert!(!manager.is_in_use());
    assert!(manager.handles().is_empty());
    assert_eq!(manager.registered_count(), 0);
}

#[test]
fn test_shared_requires_dynamic_schema() {
    let manager = Arc::new(
        PackedDataManagerBuilder::<u64>::new()
            .arena_factory(HeapArena::factory())
            .handles([packed_annotations::PackageHandle::for_kind(
                "fixed",
                packed_annotations::ValueKind::Integer,
                Value::Integer(0),
                false,
            )
            .unwrap()])
            .build()
            .unwrap(),
    );
    let result = AnnotationStorage::shared(manager.clone(), vec![AnnotationSpec::integer("x", 0)]);
    assert!(matches!(result, Err(PackError::SchemaLocked)));
    assert_eq!(manager.use_count(), 0);
}

#[test]
fn test_private_storage_from_toml_options() {
    let options = ManagerOptions::from_toml_str(
        r#"
        initial_capacity = 4
        fail_on_unwritten_read = true
        "#,
    )
    .unwrap();
    let storage =
        AnnotationStorage::<u64>::create(vec![AnnotationSpec::integer("n", 0)], options).unwrap();

    assert!(matches!(
        storage.get_integer(&1, "n"),
        Err(PackError::UnwrittenItem(_))
    ));
    storage.set_value(&1, "n", &Value::Integer(8)).unwrap();
    assert_eq!(storage.get_value(&1, "n").unwrap().as_i32(), Some(8));
    assert_eq!(storage.keys().collect::<Vec<_>>(), vec!["n"]);
}

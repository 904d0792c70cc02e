#![cfg(feature = "serde_support")]

use pretty_assertions::assert_eq;
use protoarena::test_utils::{TEST_PACKAGE, populated_all_types, test_pool};
use protoarena::{Arena, EncodeOptions, Error, Global, JsonOptions, Value, decode_json, encode};
use serde_json::json;

fn deterministic() -> EncodeOptions {
    EncodeOptions::default()
        .with_deterministic(true)
        .with_check_required(false)
}

#[test]
fn fixture_survives_a_json_detour() {
    let pool = test_pool();
    let desc = pool
        .find_message_by_name(&format!("{TEST_PACKAGE}.TestAllTypes"))
        .unwrap();
    let mut arena = Arena::new(&Global);
    let msg = populated_all_types(&pool, &mut arena);

    for options in [
        JsonOptions::default(),
        JsonOptions::new().with_preserve_proto_field_names(true),
        JsonOptions::new().with_use_enum_numbers(true),
    ] {
        let text = arena.message(msg).unwrap().to_json_string(&options).unwrap();
        let back = decode_json(&mut arena, &desc, &text, &options).unwrap();
        assert_eq!(
            encode(&arena, back, &deterministic()).unwrap(),
            encode(&arena, msg, &deterministic()).unwrap(),
            "{text}"
        );
    }
}

#[test]
fn fixture_json_uses_canonical_forms() {
    let pool = test_pool();
    let mut arena = Arena::new(&Global);
    let msg = populated_all_types(&pool, &mut arena);
    let json = arena
        .message(msg)
        .unwrap()
        .to_json_value(&JsonOptions::default())
        .unwrap();

    assert_eq!(json["optionalInt32"], json!(-7));
    assert_eq!(json["optionalInt64"], json!("-1099511627776"));
    assert_eq!(json["optionalUint64"], json!("18446744073709551615"));
    assert_eq!(json["optionalBytes"], json!("AAH/"));
    assert_eq!(json["optionalKind"], json!("KIND_TWO"));
    assert_eq!(json["repeatedKind"], json!(["KIND_ONE"]));
    assert_eq!(json["optionalInner"], json!({"a": 1, "b": 2, "c": 3}));
    assert_eq!(json["optionalgroup"], json!({"x": 21}));
    assert_eq!(json["oneofString"], json!("picked"));
    assert_eq!(json["mapStringInt32"], json!({"one": 1, "two": 2}));
    assert_eq!(json["mapInt32Inner"], json!({"5": {"a": 5, "b": 5, "c": 5}}));
    assert!(json.get("oneofUint32").is_none());
    // Unset proto2 fields stay out even though they carry defaults.
    assert!(json.get("defaultedInt32").is_none());
}

#[test]
fn enum_aliases_parse_by_any_name() {
    let pool = test_pool();
    let desc = pool
        .find_message_by_name(&format!("{TEST_PACKAGE}.TestAllTypes"))
        .unwrap();
    let mut arena = Arena::new(&Global);
    let msg = decode_json(
        &mut arena,
        &desc,
        r#"{"optionalKind": "KIND_UNO", "repeatedKind": ["KIND_ONE", 2]}"#,
        &JsonOptions::default(),
    )
    .unwrap();
    let view = arena.message(msg).unwrap();
    assert_eq!(view.get_by_name("optional_kind").unwrap(), Some(Value::Enum(1)));
    assert_eq!(
        view.to_json_value(&JsonOptions::default()).unwrap()["optionalKind"],
        json!("KIND_ONE")
    );
    let kinds = view.get_by_name("repeated_kind").unwrap().unwrap().as_list().unwrap();
    assert_eq!(kinds.iter().collect::<Vec<_>>(), [Value::Enum(1), Value::Enum(2)]);
}

#[test]
fn unknown_keys_depend_on_strictness() {
    let pool = test_pool();
    let desc = pool
        .find_message_by_name(&format!("{TEST_PACKAGE}.TestAllTypes"))
        .unwrap();
    let mut arena = Arena::new(&Global);
    let json = r#"{"optionalInt32": 3, "noSuchField": {"deep": [1, 2]}}"#;

    let lenient = decode_json(&mut arena, &desc, json, &JsonOptions::default()).unwrap();
    assert_eq!(
        arena.message(lenient).unwrap().get_by_name("optional_int32").unwrap(),
        Some(Value::Int32(3))
    );

    let strict = JsonOptions::new().with_error_on_unknown_fields(true);
    assert!(matches!(
        decode_json(&mut arena, &desc, json, &strict),
        Err(Error::Json(_))
    ));
}

#[test]
fn extensions_are_bracketed_by_full_name() {
    let pool = test_pool();
    let desc = pool
        .find_message_by_name(&format!("{TEST_PACKAGE}.TestAllTypes"))
        .unwrap();
    let ext = pool
        .find_extension_by_name(&format!("{TEST_PACKAGE}.ext_int32"))
        .unwrap();
    let mut arena = Arena::new(&Global);
    let msg = arena.new_message(&desc);
    arena.message_mut(msg).unwrap().set(&ext, Value::Int32(9)).unwrap();

    let text = arena
        .message(msg)
        .unwrap()
        .to_json_string(&JsonOptions::default())
        .unwrap();
    assert_eq!(text, format!(r#"{{"[{TEST_PACKAGE}.ext_int32]":9}}"#));

    let back = decode_json(&mut arena, &desc, &text, &JsonOptions::default()).unwrap();
    assert_eq!(arena.message(back).unwrap().get(&ext).unwrap(), Some(Value::Int32(9)));
}

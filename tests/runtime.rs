use pretty_assertions::assert_eq;
use protoarena::descriptor_proto::{FieldDescriptorProto, FieldType, FileDescriptorProto, Label};
use protoarena::test_utils::{TEST_PACKAGE, populated_all_types, test_file, test_pool};
use protoarena::{
    Arena, DecodeOptions, DescriptorPool, EncodeOptions, Error, ExtensionRegistry, Global,
    MessageDescriptor, Value, decode, encode,
};

fn message_type(pool: &DescriptorPool, name: &str) -> MessageDescriptor {
    pool.find_message_by_name(&format!("{TEST_PACKAGE}.{name}"))
        .unwrap()
}

#[test]
fn missing_required_fields_are_reported_by_path() {
    let pool = test_pool();
    let mut arena = Arena::new(&Global);
    let msg = arena.new_message(&message_type(&pool, "TestRequired"));
    {
        let mut m = arena.message_mut(msg).unwrap();
        let mut list = m.list_mut_by_name("repeated_message").unwrap();
        list.add_message().unwrap();
        list.add_message().unwrap();
    }

    let expected = Error::MissingRequired {
        message: format!("{TEST_PACKAGE}.TestRequired"),
        missing_paths: [
            "repeated_message[0].a",
            "repeated_message[0].b",
            "repeated_message[0].c",
            "repeated_message[1].a",
            "repeated_message[1].b",
            "repeated_message[1].c",
        ]
        .map(String::from)
        .to_vec(),
    };
    assert!(!arena.message(msg).unwrap().is_initialized());
    assert_eq!(encode(&arena, msg, &EncodeOptions::default()).unwrap_err(), expected);
    assert_eq!(arena.message_mut(msg).unwrap().build().unwrap_err(), expected);

    // The partial path never fails and the bytes decode back.
    let partial = arena.message(msg).unwrap().encode_partial_vec().unwrap();
    assert_eq!(partial, vec![0x12, 0x00, 0x12, 0x00]);
    arena.message_mut(msg).unwrap().build_partial();
    assert!(arena.message(msg).unwrap().is_frozen());

    let mut other = Arena::new(&Global);
    let strict = DecodeOptions::default().with_check_required(true);
    assert_eq!(
        decode(&mut other, &message_type(&pool, "TestRequired"), &partial, &strict).unwrap_err(),
        expected
    );
}

#[test]
fn nested_singular_paths_come_before_repeated_ones() {
    let pool = test_pool();
    let mut arena = Arena::new(&Global);
    let msg = arena.new_message(&message_type(&pool, "TestRequired"));
    {
        let mut m = arena.message_mut(msg).unwrap();
        m.list_mut_by_name("repeated_message")
            .unwrap()
            .add_message_mut()
            .unwrap()
            .set_by_name("b", Value::Int32(1))
            .unwrap();
        m.child_mut_by_name("optional_message")
            .unwrap()
            .set_by_name("a", Value::Int32(1))
            .unwrap();
    }
    assert_eq!(
        arena.message(msg).unwrap().find_initialization_errors(),
        vec![
            "optional_message.b",
            "optional_message.c",
            "repeated_message[0].a",
            "repeated_message[0].c",
        ]
    );
}

#[test]
fn setting_a_oneof_member_clears_the_others() {
    let pool = test_pool();
    let desc = message_type(&pool, "TestAllTypes");
    let choice = desc.oneof_by_name("choice").unwrap();
    let as_uint = desc.field_by_name("oneof_uint32").unwrap();
    let as_string = desc.field_by_name("oneof_string").unwrap();
    let as_inner = desc.field_by_name("oneof_inner").unwrap();

    let mut arena = Arena::new(&Global);
    let msg = arena.new_message(&desc);
    let mut m = arena.message_mut(msg).unwrap();
    assert_eq!(m.which_oneof(&choice).unwrap(), None);

    m.set(&as_uint, Value::UInt32(5)).unwrap();
    m.set(&as_string, Value::String("s")).unwrap();
    assert!(!m.has(&as_uint).unwrap());
    assert_eq!(m.which_oneof(&choice).unwrap(), Some(as_string.clone()));
    // A cleared member reads as its default.
    assert_eq!(m.get(&as_uint).unwrap(), Some(Value::UInt32(0)));

    m.child_mut(&as_inner).unwrap().set_by_name("a", Value::Int32(1)).unwrap();
    assert!(!m.has(&as_string).unwrap());
    assert_eq!(m.which_oneof(&choice).unwrap(), Some(as_inner.clone()));

    // Clearing an inactive member leaves the active one alone.
    m.clear(&as_uint).unwrap();
    assert_eq!(m.which_oneof(&choice).unwrap(), Some(as_inner));
}

#[test]
fn last_oneof_member_on_the_wire_wins() {
    let pool = test_pool();
    let desc = message_type(&pool, "TestAllTypes");
    let mut arena = Arena::new(&Global);
    // oneof_uint32 = 1, then oneof_string = "z".
    let bytes = [0x98, 0x03, 0x01, 0xA2, 0x03, 0x01, b'z'];
    let msg = decode(&mut arena, &desc, &bytes, &DecodeOptions::default()).unwrap();
    let view = arena.message(msg).unwrap();
    let choice = desc.oneof_by_name("choice").unwrap();
    assert_eq!(
        view.which_oneof(&choice).unwrap().map(|f| f.name().to_string()),
        Some("oneof_string".to_string())
    );
    assert_eq!(view.encode_vec().unwrap(), bytes[3..]);
}

#[test]
fn presence_follows_the_syntax() {
    let pool = test_pool();
    let mut arena = Arena::new(&Global);
    let p3 = arena.new_message(&message_type(&pool, "Proto3Types"));
    {
        let mut m = arena.message_mut(p3).unwrap();
        assert!(matches!(
            m.as_ref().has_by_name("plain_int32"),
            Err(Error::NoPresenceTracking { .. })
        ));
        m.set_by_name("plain_int32", Value::Int32(0)).unwrap();
        m.set_by_name("maybe", Value::Int32(0)).unwrap();
        m.set_by_name("color", Value::Enum(9)).unwrap();
        assert!(m.as_ref().has_by_name("maybe").unwrap());
    }
    let view = arena.message(p3).unwrap();
    let synthetic = view.descriptor().oneof_by_name("_maybe").unwrap();
    assert!(synthetic.is_synthetic());
    assert_eq!(
        view.which_oneof(&synthetic).unwrap().map(|f| f.number()),
        Some(6)
    );
    // Implicit-presence zero is not written; explicit presence is. Open enums
    // keep undeclared numbers.
    assert_eq!(view.encode_vec().unwrap(), vec![0x18, 0x09, 0x30, 0x00]);

    let p2 = arena.new_message(&message_type(&pool, "TestAllTypes"));
    let view = arena.message(p2).unwrap();
    assert_eq!(view.get_by_name("defaulted_int32").unwrap(), Some(Value::Int32(41)));
    assert_eq!(view.get_by_name("defaulted_string").unwrap(), Some(Value::String("hello")));
    assert_eq!(view.get_by_name("optional_kind").unwrap(), Some(Value::Enum(0)));
    assert!(!view.has_by_name("defaulted_int32").unwrap());
    assert!(view.encode_vec().unwrap().is_empty());
}

#[test]
fn set_rejects_values_of_the_wrong_type() {
    let pool = test_pool();
    let mut arena = Arena::new(&Global);
    let msg = arena.new_message(&message_type(&pool, "TestAllTypes"));
    let other = arena.new_message(&message_type(&pool, "TestRequired"));
    let inner_field = message_type(&pool, "TestAllTypes")
        .field_by_name("optional_inner")
        .unwrap();
    let mut m = arena.message_mut(msg).unwrap();
    assert!(matches!(
        m.set_by_name("optional_int32", Value::Int64(1)),
        Err(Error::TypeMismatch(_))
    ));
    assert!(matches!(
        m.set_by_name("optional_kind", Value::Enum(7)),
        Err(Error::TypeMismatch(_))
    ));
    assert!(matches!(m.set_message(&inner_field, other), Err(Error::TypeMismatch(_))));
    assert!(matches!(
        m.set_by_name("no_such_field", Value::Int32(1)),
        Err(Error::UnknownFieldName(_))
    ));
}

#[test]
fn enum_numbers_are_judged_by_the_receiving_field() {
    let pool = test_pool();
    let mut arena = Arena::new(&Global);
    let p3 = arena.new_message(&message_type(&pool, "Proto3Types"));
    arena.message_mut(p3).unwrap().set_by_name("color", Value::Enum(1)).unwrap();
    let red = arena.message(p3).unwrap().get_by_name("color").unwrap();
    let Some(Value::Enum(red)) = red else { panic!("color: {red:?}") };

    // A `Color` number lands in a `Kind` field when `Kind` declares it.
    let kind_type = message_type(&pool, "TestAllTypes");
    let msg = arena.new_message(&kind_type);
    let mut m = arena.message_mut(msg).unwrap();
    m.set_by_name("optional_kind", Value::Enum(red)).unwrap();
    assert!(matches!(
        m.list_mut_by_name("repeated_kind").unwrap().push(Value::Int32(5)),
        Err(Error::TypeMismatch(_))
    ));
    let number = m.as_ref().get_by_name("optional_kind").unwrap().and_then(|v| v.as_i32()).unwrap();
    let kind = kind_type.field_by_name("optional_kind").unwrap().enum_type().unwrap();
    assert_eq!(kind.value_by_number(number).unwrap().name(), "KIND_ONE");
}

#[test]
fn extensions_from_another_pool_keep_their_own_defaults() {
    let pool = test_pool();
    let mut arena = Arena::new(&Global);
    let msg = arena.new_message(&message_type(&pool, "TestAllTypes"));

    // Same schema plus extensions the message's pool has never seen.
    let mut other = DescriptorPool::new();
    let base = other.add_file_descriptor_proto(test_file()).unwrap();
    other
        .add_file_descriptor_proto(
            FileDescriptorProto::new("more.proto", TEST_PACKAGE, "proto2")
                .with_dependency(base.name())
                .with_extension(
                    FieldDescriptorProto::new("more_int32", 150, Label::Optional, FieldType::Int32)
                        .with_extendee("TestAllTypes")
                        .with_default("42"),
                )
                .with_extension(
                    FieldDescriptorProto::new("more_string", 151, Label::Optional, FieldType::String)
                        .with_extendee("TestAllTypes")
                        .with_default("fallback"),
                ),
        )
        .unwrap();
    let more_int32 = other
        .find_extension_by_name(&format!("{TEST_PACKAGE}.more_int32"))
        .unwrap();
    let more_string = other
        .find_extension_by_name(&format!("{TEST_PACKAGE}.more_string"))
        .unwrap();

    let view = arena.message(msg).unwrap();
    assert_eq!(view.get(&more_int32).unwrap(), Some(Value::Int32(42)));
    let text = view.get(&more_string).unwrap();
    drop((more_int32, more_string, other));
    assert_eq!(text, Some(Value::String("fallback")));
}

#[test]
fn attaching_across_arenas_fuses_them() {
    let pool = test_pool();
    let outer_type = message_type(&pool, "TestAllTypes");
    let inner_field = outer_type.field_by_name("optional_inner").unwrap();

    let mut dst = Arena::new(&Global);
    let outer = dst.new_message(&outer_type);
    let attached = {
        let mut src = Arena::new(&Global);
        let inner = src.new_message(&message_type(&pool, "Inner"));
        src.message_mut(inner).unwrap().set_by_name("a", Value::Int32(9)).unwrap();

        // A raw handle from another arena cannot be stored directly.
        assert!(matches!(
            dst.message_mut(outer).unwrap().set_message(&inner_field, inner),
            Err(Error::TypeMismatch(_))
        ));

        let attached = dst
            .message_mut(outer)
            .unwrap()
            .attach_message(&inner_field, &src, inner)
            .unwrap();
        assert!(dst.is_fused_with(&src));
        attached
    };

    let view = dst.message(outer).unwrap();
    let inner = view.get_by_name("optional_inner").unwrap().unwrap().as_message().unwrap();
    assert_eq!(inner.handle(), attached);
    assert_eq!(inner.get_by_name("a").unwrap(), Some(Value::Int32(9)));
}

#[test]
fn frozen_messages_reject_mutation() {
    let pool = test_pool();
    let mut arena = Arena::new(&Global);
    let msg = populated_all_types(&pool, &mut arena);
    let inner = arena
        .message(msg)
        .unwrap()
        .get_by_name("optional_inner")
        .unwrap()
        .unwrap()
        .as_message()
        .unwrap()
        .handle();

    arena.message_mut(msg).unwrap().build().unwrap();
    let mut m = arena.message_mut(msg).unwrap();
    assert!(m.as_ref().is_frozen());
    assert_eq!(m.set_by_name("optional_int32", Value::Int32(1)), Err(Error::Frozen));
    assert_eq!(m.clear_by_name("optional_int32"), Err(Error::Frozen));
    assert_eq!(
        m.list_mut_by_name("repeated_int32")
            .and_then(|mut list| list.push(Value::Int32(1))),
        Err(Error::Frozen)
    );
    assert_eq!(
        m.map_mut_by_name("map_string_int32")
            .and_then(|mut map| map.insert(Value::String("k"), Value::Int32(1))),
        Err(Error::Frozen)
    );
    assert_eq!(m.merge_from_bytes(&[0x08, 0x01]), Err(Error::Frozen));
    assert_eq!(
        m.as_ref().get_by_name("optional_int32").unwrap(),
        Some(Value::Int32(-7))
    );

    // Freezing is not transitive.
    let mut child = arena.message_mut(inner).unwrap();
    assert!(!child.as_ref().is_frozen());
    child.set_by_name("a", Value::Int32(100)).unwrap();
}

#[test]
fn merge_appends_repeated_and_overwrites_scalars() {
    let pool = test_pool();
    let desc = message_type(&pool, "TestAllTypes");
    let mut src_arena = Arena::new(&Global);
    let src = populated_all_types(&pool, &mut src_arena);

    let mut arena = Arena::new(&Global);
    let msg = arena.new_message(&desc);
    {
        let mut m = arena.message_mut(msg).unwrap();
        m.set_by_name("optional_int32", Value::Int32(1)).unwrap();
        m.list_mut_by_name("repeated_int32").unwrap().push(Value::Int32(0)).unwrap();
        m.merge_from(src_arena.message(src).unwrap()).unwrap();
    }
    let view = arena.message(msg).unwrap();
    assert_eq!(view.get_by_name("optional_int32").unwrap(), Some(Value::Int32(-7)));
    let list = view.get_by_name("repeated_int32").unwrap().unwrap().as_list().unwrap();
    assert_eq!(
        list.iter().collect::<Vec<_>>(),
        vec![Value::Int32(0), Value::Int32(1), Value::Int32(-1)]
    );
}

#[test]
fn independent_arenas_work_on_separate_threads() {
    let pool = test_pool();
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let pool = pool.clone();
            std::thread::spawn(move || {
                let mut arena = Arena::new(&Global);
                let msg = populated_all_types(&pool, &mut arena);
                arena
                    .message_mut(msg)
                    .unwrap()
                    .set_by_name("optional_int32", Value::Int32(i))
                    .unwrap();
                encode(&arena, msg, &EncodeOptions::default().with_deterministic(true)).unwrap()
            })
        })
        .collect();
    let outputs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(outputs.len(), 4);
    assert_ne!(outputs[0], outputs[1]);
}

#[test]
fn schemas_are_shared_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<DescriptorPool>();
    assert_send_sync::<ExtensionRegistry>();
    assert_send_sync::<MessageDescriptor>();
}

use pretty_assertions::assert_eq;
use protoarena::descriptor_proto::{
    Codec, DescriptorProto, FieldDescriptorProto, FieldType, FileDescriptorProto, FileDescriptorSet,
    Label,
};
use protoarena::test_utils::{TEST_PACKAGE, proto3_file, test_file, test_pool};
use protoarena::{Arena, DecodeOptions, DescriptorPool, Error, Global, Syntax, Value, decode};

#[test]
fn descriptor_blob_closes_the_loop() {
    let pool = test_pool();
    let bytes = pool.to_file_descriptor_set().encode_to_vec();

    let rebuilt = DescriptorPool::decode_file_descriptor_set(&bytes).unwrap();
    assert_eq!(rebuilt.to_file_descriptor_set().encode_to_vec(), bytes);

    let original = pool.find_message_by_name(&format!("{TEST_PACKAGE}.TestAllTypes")).unwrap();
    let copy = rebuilt.find_message_by_name(&format!("{TEST_PACKAGE}.TestAllTypes")).unwrap();
    assert_eq!(original, copy);
    assert_eq!(
        original.fields().map(|f| (f.number(), f.field_type())).collect::<Vec<_>>(),
        copy.fields().map(|f| (f.number(), f.field_type())).collect::<Vec<_>>()
    );
}

#[test]
fn descriptor_blob_reads_as_a_dynamic_message() {
    let set = FileDescriptorSet {
        file: vec![test_file(), proto3_file()],
        ..Default::default()
    };
    let bytes = set.encode_to_vec();

    let schema = DescriptorPool::with_descriptor_schema().unwrap();
    let set_type = schema
        .find_message_by_name("google.protobuf.FileDescriptorSet")
        .unwrap();
    let mut arena = Arena::new(&Global);
    let msg = decode(&mut arena, &set_type, &bytes, &DecodeOptions::default()).unwrap();
    let view = arena.message(msg).unwrap();

    let files = view.get_by_name("file").unwrap().unwrap().as_list().unwrap();
    assert_eq!(files.len(), 2);
    let first = files.get(0).unwrap().as_message().unwrap();
    assert_eq!(
        first.get_by_name("name").unwrap(),
        Some(Value::String("protoarena/test.proto"))
    );
    assert_eq!(first.get_by_name("syntax").unwrap(), Some(Value::String("proto2")));
    assert!(view.unknown_fields().is_empty());
    assert_eq!(view.encode_vec().unwrap(), bytes);
}

#[test]
fn lookups_by_name_and_number() {
    let pool = test_pool();
    let file = pool.find_file_by_name("protoarena/test.proto").unwrap();
    assert_eq!(file.syntax(), Syntax::Proto2);
    assert_eq!(file.package(), TEST_PACKAGE);

    let desc = pool.find_message_by_name(&format!("{TEST_PACKAGE}.TestAllTypes")).unwrap();
    assert_eq!(desc.field_by_number(17).unwrap().name(), "optional_inner");
    assert_eq!(desc.field_by_name("optional_inner").unwrap().number(), 17);
    assert_eq!(desc.field_by_json_name("optionalInner").unwrap().number(), 17);
    assert!(desc.field_by_number(999).is_none());
    assert!(desc.is_extension_number(150));
    assert!(!desc.is_extension_number(200));

    let inner = desc.field_by_name("optional_inner").unwrap().message_type().unwrap();
    assert_eq!(inner.full_name(), format!("{TEST_PACKAGE}.Inner"));
    assert_eq!(inner.file().name(), "protoarena/test.proto");

    let group = desc.field_by_name("optionalgroup").unwrap();
    assert_eq!(group.field_type(), FieldType::Group);
    assert_eq!(
        group.message_type().unwrap().full_name(),
        format!("{TEST_PACKAGE}.TestAllTypes.OptionalGroup")
    );

    let map = desc.field_by_name("map_string_int32").unwrap();
    assert!(map.is_map());
    let entry = map.message_type().unwrap();
    assert!(entry.is_map_entry());
    assert_eq!(entry.map_entry_key_field().unwrap().field_type(), FieldType::String);

    let ext = pool.find_extension_by_name(&format!("{TEST_PACKAGE}.ext_int32")).unwrap();
    assert!(ext.is_extension());
    assert_eq!(ext.containing_type(), desc);
    assert_eq!(
        pool.find_extension_by_number(&desc, 100),
        Some(ext)
    );
}

#[test]
fn enum_aliases_resolve_to_the_first_name() {
    let pool = test_pool();
    let kind = pool.find_enum_by_name(&format!("{TEST_PACKAGE}.Kind")).unwrap();
    assert!(kind.is_closed());
    assert_eq!(kind.value_by_number(1).unwrap().name(), "KIND_ONE");
    assert_eq!(kind.value_by_name("KIND_UNO").unwrap().number(), 1);
    assert_eq!(kind.default_value().name(), "KIND_ZERO");
    assert_eq!(kind.values().count(), 4);

    let color = pool.find_enum_by_name(&format!("{TEST_PACKAGE}.Color")).unwrap();
    assert!(!color.is_closed());
}

#[test]
fn missing_dependencies_are_reported() {
    let mut pool = DescriptorPool::new();
    let file = FileDescriptorProto::new("user.proto", "user", "proto3")
        .with_dependency("base.proto")
        .with_message(
            DescriptorProto::new("User").with_field(
                FieldDescriptorProto::new("base", 1, Label::Optional, FieldType::Message)
                    .with_type_name(".base.Base"),
            ),
        );
    assert_eq!(
        pool.add_file_descriptor_proto(file.clone()).unwrap_err(),
        Error::DependencyNotFound("base.proto".to_string())
    );
    assert_eq!(pool.files().len(), 0);

    pool.add_file_descriptor_proto(
        FileDescriptorProto::new("base.proto", "base", "proto3").with_message(DescriptorProto::new("Base")),
    )
    .unwrap();
    let user = pool.add_file_descriptor_proto(file).unwrap();
    assert_eq!(user.dependencies().map(|d| d.name().to_string()).collect::<Vec<_>>(), ["base.proto"]);
}

#[test]
fn files_arrive_in_any_order_within_a_set() {
    let set = FileDescriptorSet {
        file: vec![
            FileDescriptorProto::new("b.proto", "p", "proto3")
                .with_dependency("a.proto")
                .with_message(DescriptorProto::new("B").with_field(
                    FieldDescriptorProto::new("a", 1, Label::Optional, FieldType::Message).with_type_name("A"),
                )),
            FileDescriptorProto::new("a.proto", "p", "proto3").with_message(DescriptorProto::new("A")),
        ],
        ..Default::default()
    };
    let pool = DescriptorPool::decode_file_descriptor_set(&set.encode_to_vec()).unwrap();
    let b = pool.find_message_by_name("p.B").unwrap();
    assert_eq!(
        b.field_by_name("a").unwrap().message_type().unwrap().full_name(),
        "p.A"
    );
}

#[test]
fn invalid_schemas_are_rejected() {
    let mut pool = DescriptorPool::new();
    let duplicate_numbers = FileDescriptorProto::new("dup.proto", "d", "proto2").with_message(
        DescriptorProto::new("M")
            .with_field(FieldDescriptorProto::new("a", 1, Label::Optional, FieldType::Int32))
            .with_field(FieldDescriptorProto::new("b", 1, Label::Optional, FieldType::Int32)),
    );
    assert!(pool.add_file_descriptor_proto(duplicate_numbers).is_err());

    let unresolved = FileDescriptorProto::new("u.proto", "u", "proto2").with_message(
        DescriptorProto::new("M").with_field(
            FieldDescriptorProto::new("a", 1, Label::Optional, FieldType::Message).with_type_name("Nope"),
        ),
    );
    assert_eq!(
        pool.add_file_descriptor_proto(unresolved).unwrap_err(),
        Error::UnknownTypeName("Nope".to_string())
    );
}

#[test]
fn long_import_chains_load_in_one_pass() {
    // chain_0 <- chain_1 <- ... listed newest first.
    const FILES: usize = 500;
    let files = (0..FILES)
        .rev()
        .map(|i| {
            let mut message = DescriptorProto::new(&format!("M{i}"));
            let mut file = FileDescriptorProto::new(&format!("chain_{i}.proto"), "chain", "proto3");
            if i > 0 {
                file = file.with_dependency(&format!("chain_{}.proto", i - 1));
                message = message.with_field(
                    FieldDescriptorProto::new("prev", 1, Label::Optional, FieldType::Message)
                        .with_type_name(&format!("M{}", i - 1)),
                );
            }
            file.with_message(message)
        })
        .collect();
    let mut pool = DescriptorPool::new();
    let added = pool
        .add_file_descriptor_set(FileDescriptorSet {
            file: files,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(added.len(), FILES);
    assert_eq!(added[0].name(), "chain_0.proto");
    assert_eq!(pool.files().len(), FILES);
    let last = pool.find_message_by_name(&format!("chain.M{}", FILES - 1)).unwrap();
    assert_eq!(
        last.field_by_name("prev").unwrap().message_type().unwrap().full_name(),
        format!("chain.M{}", FILES - 2)
    );
}

#[test]
fn a_failing_set_leaves_the_pool_untouched() {
    let mut pool = DescriptorPool::new();
    let set = FileDescriptorSet {
        file: vec![
            FileDescriptorProto::new("ok.proto", "p", "proto3").with_message(DescriptorProto::new("Ok")),
            FileDescriptorProto::new("bad.proto", "p", "proto3")
                .with_dependency("ok.proto")
                .with_dependency("absent.proto"),
        ],
        ..Default::default()
    };
    assert_eq!(
        pool.add_file_descriptor_set(set).unwrap_err(),
        Error::DependencyNotFound("absent.proto".to_string())
    );
    assert_eq!(pool.files().len(), 0);
    assert!(pool.find_message_by_name("p.Ok").is_none());

    let cycle = FileDescriptorSet {
        file: vec![
            FileDescriptorProto::new("a.proto", "p", "proto3").with_dependency("b.proto"),
            FileDescriptorProto::new("b.proto", "p", "proto3").with_dependency("a.proto"),
        ],
        ..Default::default()
    };
    assert_eq!(
        pool.add_file_descriptor_set(cycle).unwrap_err(),
        Error::DependencyNotFound("a.proto".to_string())
    );
    assert_eq!(pool.files().len(), 0);
}

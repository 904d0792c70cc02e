//! Fixture schemas and assertions shared by unit tests, integration tests and
//! benchmarks. Available to downstream crates for testing.

use crate::descriptor_proto::{
    DescriptorProto, EnumDescriptorProto, FieldDescriptorProto, FieldType, FileDescriptorProto,
    Label,
};
use crate::{
    Arena, DecodeOptions, DescriptorPool, EncodeOptions, ExtensionRegistry, Global, Message,
    Value, decode, encode,
};

/// Package of every fixture type.
pub const TEST_PACKAGE: &str = "protoarena.test";

/// Number of the `int32` extension of `TestAllTypes`.
pub const EXTENSION_NUMBER: u32 = 100;

/// Proto2 schema covering every field kind:
///
/// * `Kind`: closed enum with an alias (`KIND_ONE` and `KIND_UNO` share 1).
/// * `Inner`: three required `int32` fields `a`, `b`, `c`.
/// * `TestRequired`: `optional_message` and `repeated_message` of `Inner`.
/// * `TestAllTypes`: one optional and one repeated field per scalar kind,
///   nested messages, maps, a oneof, a group and extension range 100..200.
/// * `Proto3Types` lives in a second, proto3 file.
pub fn test_file() -> FileDescriptorProto {
    use FieldType as T;
    use Label::{Optional as Opt, Repeated as Rep, Required as Req};
    type F = FieldDescriptorProto;

    let mut all = DescriptorProto::new("TestAllTypes");
    let scalars = [
        ("int32", T::Int32),
        ("int64", T::Int64),
        ("uint32", T::UInt32),
        ("uint64", T::UInt64),
        ("sint32", T::SInt32),
        ("sint64", T::SInt64),
        ("fixed32", T::Fixed32),
        ("fixed64", T::Fixed64),
        ("sfixed32", T::SFixed32),
        ("sfixed64", T::SFixed64),
        ("float", T::Float),
        ("double", T::Double),
        ("bool", T::Bool),
        ("string", T::String),
        ("bytes", T::Bytes),
    ];
    for (i, (name, ty)) in scalars.iter().enumerate() {
        let n = i as i32 + 1;
        all = all
            .with_field(F::new(&format!("optional_{name}"), n, Opt, *ty))
            .with_field(F::new(&format!("repeated_{name}"), n + 30, Rep, *ty));
    }
    all = all
        .with_field(F::new("optional_kind", 16, Opt, T::Enum).with_type_name("Kind"))
        .with_field(F::new("optional_inner", 17, Opt, T::Message).with_type_name("Inner"))
        .with_field(F::new("repeated_kind", 46, Rep, T::Enum).with_type_name("Kind"))
        .with_field(F::new("repeated_inner", 47, Rep, T::Message).with_type_name("Inner"))
        .with_field(F::new("packed_int32", 48, Rep, T::Int32).with_packed(true))
        .with_field(F::new("defaulted_int32", 18, Opt, T::Int32).with_default("41"))
        .with_field(F::new("defaulted_string", 19, Opt, T::String).with_default("hello"))
        .with_field(F::new("optionalgroup", 20, Opt, T::Group).with_type_name("OptionalGroup"))
        .with_nested(
            DescriptorProto::new("OptionalGroup").with_field(F::new("x", 21, Opt, T::Int32)),
        )
        .with_oneof("choice")
        .with_field(F::new("oneof_uint32", 51, Opt, T::UInt32).with_oneof_index(0))
        .with_field(F::new("oneof_string", 52, Opt, T::String).with_oneof_index(0))
        .with_field(
            F::new("oneof_inner", 53, Opt, T::Message)
                .with_type_name("Inner")
                .with_oneof_index(0),
        )
        .with_map_field("map_string_int32", 60, T::String, T::Int32, None)
        .with_map_field("map_int32_inner", 61, T::Int32, T::Message, Some("Inner"))
        .with_extension_range(100, 200);

    FileDescriptorProto::new("protoarena/test.proto", TEST_PACKAGE, "proto2")
        .with_enum(
            EnumDescriptorProto::new(
                "Kind",
                &[("KIND_ZERO", 0), ("KIND_ONE", 1), ("KIND_UNO", 1), ("KIND_TWO", 2)],
            )
            .with_allow_alias(),
        )
        .with_message(
            DescriptorProto::new("Inner")
                .with_field(F::new("a", 1, Req, T::Int32))
                .with_field(F::new("b", 2, Req, T::Int32))
                .with_field(F::new("c", 3, Req, T::Int32)),
        )
        .with_message(
            DescriptorProto::new("TestRequired")
                .with_field(F::new("optional_message", 1, Opt, T::Message).with_type_name("Inner"))
                .with_field(F::new("repeated_message", 2, Rep, T::Message).with_type_name("Inner")),
        )
        .with_message(all)
        .with_extension(
            F::new("ext_int32", EXTENSION_NUMBER as i32, Opt, T::Int32).with_extendee("TestAllTypes"),
        )
}

/// Proto3 companion: implicit presence, open enum and a `proto3 optional`.
pub fn proto3_file() -> FileDescriptorProto {
    use FieldType as T;
    use Label::{Optional as Opt, Repeated as Rep};
    type F = FieldDescriptorProto;

    FileDescriptorProto::new("protoarena/test3.proto", TEST_PACKAGE, "proto3")
        .with_enum(EnumDescriptorProto::new("Color", &[("COLOR_UNSPECIFIED", 0), ("COLOR_RED", 1)]))
        .with_message(
            DescriptorProto::new("Proto3Types")
                .with_field(F::new("plain_int32", 1, Opt, T::Int32))
                .with_field(F::new("plain_string", 2, Opt, T::String))
                .with_field(F::new("color", 3, Opt, T::Enum).with_type_name("Color"))
                .with_field(F::new("values", 4, Rep, T::SInt64))
                .with_field(F::new("child", 5, Opt, T::Message).with_type_name("Proto3Types"))
                .with_oneof("_maybe")
                .with_field(
                    F::new("maybe", 6, Opt, T::Int32)
                        .with_proto3_optional()
                        .with_oneof_index(0),
                ),
        )
}

/// Pool holding [`test_file`] and [`proto3_file`].
pub fn test_pool() -> DescriptorPool {
    let mut pool = DescriptorPool::new();
    pool.add_file_descriptor_proto(test_file())
        .expect("fixture schema should build");
    pool.add_file_descriptor_proto(proto3_file())
        .expect("proto3 fixture schema should build");
    pool
}

/// Registry with every extension of [`test_pool`].
pub fn test_registry(pool: &DescriptorPool) -> ExtensionRegistry {
    ExtensionRegistry::from_pool(pool).expect("fixture extensions should register")
}

/// A `TestAllTypes` with every field kind populated.
pub fn populated_all_types(pool: &DescriptorPool, arena: &mut Arena<'_>) -> Message {
    let msg = pool
        .new_message(&format!("{TEST_PACKAGE}.TestAllTypes"), arena)
        .expect("TestAllTypes should exist");
    fill_all_types(arena, msg).expect("fixture values should type-check");
    msg
}

fn fill_all_types(arena: &mut Arena<'_>, msg: Message) -> crate::Result<()> {
    let mut m = arena.message_mut(msg)?;
    m.set_by_name("optional_int32", Value::Int32(-7))?;
    m.set_by_name("optional_int64", Value::Int64(-1 << 40))?;
    m.set_by_name("optional_uint32", Value::UInt32(u32::MAX))?;
    m.set_by_name("optional_uint64", Value::UInt64(u64::MAX))?;
    m.set_by_name("optional_sint32", Value::Int32(i32::MIN))?;
    m.set_by_name("optional_sint64", Value::Int64(i64::MIN))?;
    m.set_by_name("optional_fixed32", Value::UInt32(12345))?;
    m.set_by_name("optional_fixed64", Value::UInt64(1 << 50))?;
    m.set_by_name("optional_sfixed32", Value::Int32(-12345))?;
    m.set_by_name("optional_sfixed64", Value::Int64(-(1 << 50)))?;
    m.set_by_name("optional_float", Value::Float(1.5))?;
    m.set_by_name("optional_double", Value::Double(-0.25))?;
    m.set_by_name("optional_bool", Value::Bool(true))?;
    m.set_by_name("optional_string", Value::String("héllo"))?;
    m.set_by_name("optional_bytes", Value::Bytes(&[0, 1, 0xff]))?;
    m.set_by_name("optional_kind", Value::Enum(2))?;
    {
        let mut inner = m.child_mut_by_name("optional_inner")?;
        inner.set_by_name("a", Value::Int32(1))?;
        inner.set_by_name("b", Value::Int32(2))?;
        inner.set_by_name("c", Value::Int32(3))?;
    }
    m.child_mut_by_name("optionalgroup")?
        .set_by_name("x", Value::Int32(21))?;
    {
        let mut list = m.list_mut_by_name("repeated_int32")?;
        list.push(Value::Int32(1))?;
        list.push(Value::Int32(-1))?;
    }
    m.list_mut_by_name("repeated_string")?.push(Value::String("a"))?;
    m.list_mut_by_name("repeated_string")?.push(Value::String(""))?;
    m.list_mut_by_name("repeated_double")?.push(Value::Double(2.5))?;
    m.list_mut_by_name("repeated_kind")?.push(Value::Enum(1))?;
    for i in 0..3 {
        m.list_mut_by_name("packed_int32")?.push(Value::Int32(i * 100))?;
    }
    {
        let mut list = m.list_mut_by_name("repeated_inner")?;
        let mut inner = list.add_message_mut()?;
        inner.set_by_name("a", Value::Int32(10))?;
        inner.set_by_name("b", Value::Int32(20))?;
        inner.set_by_name("c", Value::Int32(30))?;
    }
    m.set_by_name("oneof_string", Value::String("picked"))?;
    {
        let mut map = m.map_mut_by_name("map_string_int32")?;
        map.insert(Value::String("one"), Value::Int32(1))?;
        map.insert(Value::String("two"), Value::Int32(2))?;
    }
    {
        let mut map = m.map_mut_by_name("map_int32_inner")?;
        let mut inner = map.entry_mut(Value::Int32(5))?;
        inner.set_by_name("a", Value::Int32(5))?;
        inner.set_by_name("b", Value::Int32(5))?;
        inner.set_by_name("c", Value::Int32(5))?;
    }
    Ok(())
}

/// Asserts that `msg` survives encode, decode into a fresh arena and encode
/// again with identical bytes and equal contents. Returns the encoding.
pub fn assert_roundtrip(arena: &Arena<'_>, msg: Message) -> Vec<u8> {
    assert_roundtrip_with(arena, msg, &DecodeOptions::default())
}

/// [`assert_roundtrip`] decoding with `options` (e.g. an extension registry).
pub fn assert_roundtrip_with(arena: &Arena<'_>, msg: Message, options: &DecodeOptions<'_>) -> Vec<u8> {
    let encode_options = EncodeOptions::default()
        .with_check_required(false)
        .with_deterministic(true);
    let view = arena.message(msg).expect("msg should be live");
    let data = encode(arena, msg, &encode_options).expect("msg should encode");

    let mut other = Arena::new(&Global);
    let decoded = decode(&mut other, view.descriptor(), &data, options).expect("msg should decode");
    tracing::debug!(
        message = view.descriptor().full_name(),
        bytes = data.len(),
        "round trip"
    );

    let roundtrip = encode(&other, decoded, &encode_options).expect("decoded msg should encode");
    assert_eq!(roundtrip, data, "re-encoding changed the bytes");
    let decoded_view = other.message(decoded).expect("decoded msg should be live");
    assert_eq!(
        format!("{decoded_view:?}"),
        format!("{view:?}"),
        "decoded message differs"
    );
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixtures_build_and_roundtrip() {
        let pool = test_pool();
        let mut arena = Arena::new(&Global);
        let msg = populated_all_types(&pool, &mut arena);
        let data = assert_roundtrip(&arena, msg);
        assert!(!data.is_empty());
        assert_eq!(test_registry(&pool).len(), 1);
    }
}

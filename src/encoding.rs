//! Wire-format encoding of arena messages.
//!
//! Known fields and extensions are written interleaved in field-number
//! order, followed by the unknown fields in the order they were read.
//! Repeated scalars use packed encoding when the field is packed; proto3
//! scalars without presence are skipped when zero.

use crate::arena::Arena;
use crate::base::{FieldSlot, Message, Scalar};
use crate::containers::MapKey;
use crate::descriptor_pool::FieldDescriptor;
use crate::descriptor_proto::FieldType;
use crate::wire::{DEFAULT_RECURSION_LIMIT, WireType, Writer, zigzag_encode32, zigzag_encode64};
use crate::{Error, Result};

/// Knobs for an encode call.
#[derive(Debug, Clone, Copy)]
pub struct EncodeOptions {
    /// Write map entries in key order instead of insertion order.
    pub deterministic: bool,
    pub skip_unknown_fields: bool,
    /// Fail with [`Error::MissingRequired`] when required fields are unset.
    pub check_required: bool,
    pub recursion_limit: u32,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        EncodeOptions {
            deterministic: false,
            skip_unknown_fields: false,
            check_required: true,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
        }
    }
}

impl EncodeOptions {
    pub fn with_deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }

    pub fn with_skip_unknown_fields(mut self, skip: bool) -> Self {
        self.skip_unknown_fields = skip;
        self
    }

    pub fn with_check_required(mut self, check: bool) -> Self {
        self.check_required = check;
        self
    }

    pub fn with_recursion_limit(mut self, limit: u32) -> Self {
        self.recursion_limit = limit;
        self
    }
}

/// Whether `value` is the zero value of its type. `-0.0` is not zero.
pub(crate) fn is_zero(value: &Scalar) -> bool {
    match value {
        Scalar::Bool(v) => !v,
        Scalar::Int32(v) | Scalar::Enum(v) => *v == 0,
        Scalar::Int64(v) => *v == 0,
        Scalar::UInt32(v) => *v == 0,
        Scalar::UInt64(v) => *v == 0,
        Scalar::Float(v) => v.to_bits() == 0,
        Scalar::Double(v) => v.to_bits() == 0,
        Scalar::String(v) => v.is_empty(),
        Scalar::Bytes(v) => v.is_empty(),
        Scalar::Message(_) => false,
    }
}

/// Serializes `msg` and everything reachable from it.
pub fn encode(arena: &Arena<'_>, msg: Message, options: &EncodeOptions) -> Result<Vec<u8>> {
    let mut w = Writer::new();
    encode_to(arena, msg, &mut w, options)?;
    Ok(w.into_inner())
}

/// Appends the serialization of `msg` to `w`.
pub fn encode_to(arena: &Arena<'_>, msg: Message, w: &mut Writer, options: &EncodeOptions) -> Result<()> {
    if options.check_required {
        arena.message(msg)?.check_initialized()?;
    }
    encode_message(arena, msg, w, options, 0)
}

/// Serializes `msg` behind a varint length prefix.
pub fn encode_length_delimited(arena: &Arena<'_>, msg: Message, options: &EncodeOptions) -> Result<Vec<u8>> {
    let body = encode(arena, msg, options)?;
    let mut w = Writer::with_capacity(body.len() + 5);
    w.write_length_delimited(&body);
    Ok(w.into_inner())
}

fn encode_message(
    arena: &Arena<'_>,
    msg: Message,
    w: &mut Writer,
    options: &EncodeOptions,
    depth: u32,
) -> Result<()> {
    if depth > options.recursion_limit {
        return Err(Error::MaxDepthExceeded {
            limit: options.recursion_limit,
        });
    }
    let object = arena.object(msg)?;
    let mut slots: Vec<(FieldDescriptor, &FieldSlot)> = object
        .descriptor
        .fields_in_number_order()
        .map(|f| {
            let slot = &object.fields[f.index()];
            (f, slot)
        })
        .collect();
    if !object.extensions.is_empty() {
        slots.extend(object.extensions.values().map(|e| (e.field.clone(), &e.slot)));
        slots.sort_by_key(|(f, _)| f.number());
    }
    for (field, slot) in &slots {
        encode_field(arena, field, slot, w, options, depth)?;
    }
    if !options.skip_unknown_fields {
        object.unknown.encode(w);
    }
    Ok(())
}

fn encode_field(
    arena: &Arena<'_>,
    field: &FieldDescriptor,
    slot: &FieldSlot,
    w: &mut Writer,
    options: &EncodeOptions,
    depth: u32,
) -> Result<()> {
    let number = field.number();
    let field_type = field.field_type();
    match slot {
        FieldSlot::Empty => {}
        FieldSlot::Singular(value) => {
            if field.has_presence() || !is_zero(value) {
                encode_value(arena, number, field_type, value, w, options, depth)?;
            }
        }
        FieldSlot::Repeated(values) if values.is_empty() => {}
        FieldSlot::Repeated(values) if field.is_packed() => {
            let mut packed = Writer::new();
            for i in 0..values.len() {
                if let Some(value) = values.get(i) {
                    write_scalar(&mut packed, field_type, &value)?;
                }
            }
            w.write_tag(number, WireType::LengthDelimited);
            w.write_length_delimited(packed.as_slice());
        }
        FieldSlot::Repeated(values) => {
            for i in 0..values.len() {
                if let Some(value) = values.get(i) {
                    encode_value(arena, number, field_type, &value, w, options, depth)?;
                }
            }
        }
        FieldSlot::Map(map) => {
            let entry_type = field.message_type().ok_or_else(|| {
                Error::InvalidDescriptor(format!("{} has no entry type", field.full_name()))
            })?;
            let (key_field, value_field) = entry_type
                .map_entry_key_field()
                .zip(entry_type.map_entry_value_field())
                .ok_or_else(|| Error::InvalidDescriptor(entry_type.full_name().to_string()))?;
            let entries = if options.deterministic {
                map.sorted_entries()
            } else {
                map.entries().to_vec()
            };
            for entry in &entries {
                let mut ew = Writer::new();
                let key = key_scalar(&entry.key);
                encode_value(arena, 1, key_field.field_type(), &key, &mut ew, options, depth + 1)?;
                encode_value(
                    arena,
                    2,
                    value_field.field_type(),
                    &entry.value,
                    &mut ew,
                    options,
                    depth + 1,
                )?;
                w.write_tag(number, WireType::LengthDelimited);
                w.write_length_delimited(ew.as_slice());
            }
        }
    }
    Ok(())
}

fn key_scalar(key: &MapKey) -> Scalar {
    match *key {
        MapKey::Bool(v) => Scalar::Bool(v),
        MapKey::Int32(v) => Scalar::Int32(v),
        MapKey::Int64(v) => Scalar::Int64(v),
        MapKey::UInt32(v) => Scalar::UInt32(v),
        MapKey::UInt64(v) => Scalar::UInt64(v),
        MapKey::String(v) => Scalar::String(v),
    }
}

fn encode_value(
    arena: &Arena<'_>,
    number: u32,
    field_type: FieldType,
    value: &Scalar,
    w: &mut Writer,
    options: &EncodeOptions,
    depth: u32,
) -> Result<()> {
    match (field_type, value) {
        (FieldType::Group, Scalar::Message(child)) => {
            w.write_tag(number, WireType::StartGroup);
            encode_message(arena, *child, w, options, depth + 1)?;
            w.write_tag(number, WireType::EndGroup);
        }
        (FieldType::Message, Scalar::Message(child)) => {
            let mut sub = Writer::new();
            encode_message(arena, *child, &mut sub, options, depth + 1)?;
            w.write_tag(number, WireType::LengthDelimited);
            w.write_length_delimited(sub.as_slice());
        }
        (FieldType::String, Scalar::String(s)) => {
            w.write_tag(number, WireType::LengthDelimited);
            w.write_length_delimited(s.as_str().as_bytes());
        }
        (FieldType::Bytes, Scalar::Bytes(b)) => {
            w.write_tag(number, WireType::LengthDelimited);
            w.write_length_delimited(b.as_slice());
        }
        _ => {
            w.write_tag(number, field_type.wire_type());
            write_scalar(w, field_type, value)?;
        }
    }
    Ok(())
}

// Payload of a numeric value, without tag.
fn write_scalar(w: &mut Writer, field_type: FieldType, value: &Scalar) -> Result<()> {
    use FieldType as T;
    match (field_type, *value) {
        (T::Bool, Scalar::Bool(v)) => w.write_varint(v as u64),
        // Negative int32 values are sign-extended to ten bytes.
        (T::Int32, Scalar::Int32(v)) => w.write_varint(v as i64 as u64),
        (T::SInt32, Scalar::Int32(v)) => w.write_varint(zigzag_encode32(v) as u64),
        (T::SFixed32, Scalar::Int32(v)) => w.write_fixed32(v as u32),
        (T::Int64, Scalar::Int64(v)) => w.write_varint(v as u64),
        (T::SInt64, Scalar::Int64(v)) => w.write_varint(zigzag_encode64(v)),
        (T::SFixed64, Scalar::Int64(v)) => w.write_fixed64(v as u64),
        (T::UInt32, Scalar::UInt32(v)) => w.write_varint(v as u64),
        (T::Fixed32, Scalar::UInt32(v)) => w.write_fixed32(v),
        (T::UInt64, Scalar::UInt64(v)) => w.write_varint(v),
        (T::Fixed64, Scalar::UInt64(v)) => w.write_fixed64(v),
        (T::Float, Scalar::Float(v)) => w.write_fixed32(v.to_bits()),
        (T::Double, Scalar::Double(v)) => w.write_fixed64(v.to_bits()),
        (T::Enum, Scalar::Enum(v)) => w.write_varint(v as i64 as u64),
        (t, v) => {
            return Err(Error::TypeMismatch(format!("cannot encode {v:?} as {t:?}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor_pool::DescriptorPool;
    use crate::descriptor_proto::{
        DescriptorProto as Msg, FieldDescriptorProto as Field, FileDescriptorProto, Label,
    };
    use crate::extension::ExtensionRegistry;
    use crate::{DecodeOptions, Global, Value};
    use pretty_assertions::assert_eq;

    use FieldType as T;
    use Label::{Optional as Opt, Repeated as Rep, Required as Req};

    fn pool() -> DescriptorPool {
        let mut pool = DescriptorPool::new();
        pool.add_file_descriptor_proto(
            FileDescriptorProto::new("p3.proto", "e", "proto3").with_message(
                Msg::new("Plain")
                    .with_field(Field::new("i", 1, Opt, T::Int32))
                    .with_field(Field::new("d", 2, Opt, T::Double))
                    .with_field(Field::new("o", 3, Opt, T::Int32).with_proto3_optional().with_oneof_index(0))
                    .with_field(Field::new("packed", 4, Rep, T::UInt32))
                    .with_field(Field::new("child", 5, Opt, T::Message).with_type_name("Plain"))
                    .with_map_field("m", 6, T::Int32, T::String, None)
                    .with_oneof("_o"),
            ),
        )
        .unwrap();
        pool.add_file_descriptor_proto(
            FileDescriptorProto::new("p2.proto", "e", "proto2")
                .with_message(
                    Msg::new("Old")
                        .with_field(Field::new("req", 1, Req, T::Int32))
                        .with_field(Field::new("opt", 20, Opt, T::Int32))
                        .with_extension_range(10, 20),
                )
                .with_extension(Field::new("ext", 15, Opt, T::SInt32).with_extendee("Old")),
        )
        .unwrap();
        pool
    }

    #[test]
    fn encodes_canonical_varint() {
        let pool = pool();
        let mut arena = Arena::new(&Global);
        let msg = pool.new_message("e.Plain", &mut arena).unwrap();
        arena.message_mut(msg).unwrap().set_by_name("i", Value::Int32(150)).unwrap();
        assert_eq!(arena.message(msg).unwrap().encode_vec().unwrap(), vec![0x08, 0x96, 0x01]);
    }

    #[test]
    fn implicit_presence_skips_zero_but_not_negative_zero() {
        let pool = pool();
        let mut arena = Arena::new(&Global);
        let msg = pool.new_message("e.Plain", &mut arena).unwrap();
        let mut m = arena.message_mut(msg).unwrap();
        m.set_by_name("i", Value::Int32(0)).unwrap();
        m.set_by_name("o", Value::Int32(0)).unwrap();
        assert_eq!(m.encode_vec().unwrap(), vec![0x18, 0x00]);
        m.set_by_name("d", Value::Double(-0.0)).unwrap();
        assert_eq!(
            m.encode_vec().unwrap(),
            vec![0x11, 0, 0, 0, 0, 0, 0, 0, 0x80, 0x18, 0x00]
        );
    }

    #[test]
    fn negative_int32_uses_ten_bytes() {
        let pool = pool();
        let mut arena = Arena::new(&Global);
        let msg = pool.new_message("e.Plain", &mut arena).unwrap();
        arena.message_mut(msg).unwrap().set_by_name("i", Value::Int32(-1)).unwrap();
        let bytes = arena.message(msg).unwrap().encode_vec().unwrap();
        assert_eq!(bytes.len(), 11);
        assert_eq!(bytes[10], 0x01);
    }

    #[test]
    fn proto3_repeated_scalars_are_packed() {
        let pool = pool();
        let mut arena = Arena::new(&Global);
        let msg = pool.new_message("e.Plain", &mut arena).unwrap();
        {
            let mut m = arena.message_mut(msg).unwrap();
            let mut packed = m.list_mut_by_name("packed").unwrap();
            packed.push(Value::UInt32(1)).unwrap();
            packed.push(Value::UInt32(300)).unwrap();
        }
        assert_eq!(
            arena.message(msg).unwrap().encode_vec().unwrap(),
            vec![0x22, 0x03, 0x01, 0xAC, 0x02]
        );
    }

    #[test]
    fn deterministic_maps_are_key_ordered() {
        let pool = pool();
        let mut arena = Arena::new(&Global);
        let msg = pool.new_message("e.Plain", &mut arena).unwrap();
        {
            let mut m = arena.message_mut(msg).unwrap();
            let mut map = m.map_mut_by_name("m").unwrap();
            map.insert(Value::Int32(2), Value::String("b")).unwrap();
            map.insert(Value::Int32(1), Value::String("a")).unwrap();
        }
        let view = arena.message(msg).unwrap();
        let sorted = view
            .encode_with(&EncodeOptions::default().with_deterministic(true))
            .unwrap();
        assert_eq!(
            sorted,
            vec![
                0x32, 0x05, 0x08, 0x01, 0x12, 0x01, b'a', //
                0x32, 0x05, 0x08, 0x02, 0x12, 0x01, b'b',
            ]
        );
        let insertion = view.encode_vec().unwrap();
        assert_eq!(&insertion[..7], &sorted[7..]);
    }

    #[test]
    fn extensions_interleave_with_fields_and_unknowns_come_last() {
        let pool = pool();
        let registry = ExtensionRegistry::from_pool(&pool).unwrap();
        let desc = pool.find_message_by_name("e.Old").unwrap();
        // unknown 30, opt = 2, ext = -1, req = 1
        let input = [0xF0, 0x01, 0x07, 0xA0, 0x01, 0x02, 0x78, 0x01, 0x08, 0x01];
        let mut arena = Arena::new(&Global);
        let options = DecodeOptions::default().with_extensions(&registry);
        let msg = crate::decoding::decode(&mut arena, &desc, &input, &options).unwrap();
        let view = arena.message(msg).unwrap();
        assert_eq!(
            view.encode_vec().unwrap(),
            vec![0x08, 0x01, 0x78, 0x01, 0xA0, 0x01, 0x02, 0xF0, 0x01, 0x07]
        );
        assert_eq!(
            view.encode_with(&EncodeOptions::default().with_skip_unknown_fields(true))
                .unwrap(),
            vec![0x08, 0x01, 0x78, 0x01, 0xA0, 0x01, 0x02]
        );
    }

    #[test]
    fn missing_required_fields_fail_unless_partial() {
        let pool = pool();
        let mut arena = Arena::new(&Global);
        let msg = pool.new_message("e.Old", &mut arena).unwrap();
        let view = arena.message(msg).unwrap();
        assert!(matches!(view.encode_vec(), Err(Error::MissingRequired { .. })));
        assert_eq!(view.encode_partial_vec().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn cyclic_graphs_hit_the_recursion_limit() {
        let pool = pool();
        let child = pool.find_message_by_name("e.Plain").unwrap().field_by_name("child").unwrap();
        let mut arena = Arena::new(&Global);
        let msg = pool.new_message("e.Plain", &mut arena).unwrap();
        arena.message_mut(msg).unwrap().set_message(&child, msg).unwrap();
        assert_eq!(
            arena.message(msg).unwrap().encode_vec(),
            Err(Error::MaxDepthExceeded {
                limit: DEFAULT_RECURSION_LIMIT
            })
        );
    }
}

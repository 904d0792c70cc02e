//! Wire-format decoding into arena messages.
//!
//! Decoding always merges into an existing message: singular scalars keep
//! the last value seen, repeated fields append, and singular sub-messages
//! merge recursively. Fields the schema does not know, fields whose wire
//! type disagrees with the schema, and closed-enum values outside the enum
//! are preserved in the unknown field set.

use crate::arena::{Arena, Bump};
use crate::base::{FieldSlot, Message, RepeatedSlot, Scalar};
use crate::containers::{Bytes, MapField, MapKey, String};
use crate::descriptor_pool::{DefaultValue, FieldDescriptor, MessageDescriptor};
use crate::descriptor_proto::FieldType;
use crate::extension::ExtensionRegistry;
use crate::unknown::{UnknownFieldSet, UnknownValue};
use crate::wire::{DEFAULT_RECURSION_LIMIT, ReadCursor, WireType, zigzag_decode32, zigzag_decode64};
use crate::{Error, Result};

/// Knobs for a decode call.
#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions<'r> {
    /// Maximum nesting of sub-messages and groups.
    pub recursion_limit: u32,
    /// Fail with [`Error::MissingRequired`] when required fields are unset
    /// after decoding.
    pub check_required: bool,
    pub discard_unknown_fields: bool,
    /// Extensions to recognize. Without a registry, extension data is kept
    /// as unknown fields.
    pub extensions: Option<&'r ExtensionRegistry>,
}

impl Default for DecodeOptions<'_> {
    fn default() -> Self {
        DecodeOptions {
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            check_required: false,
            discard_unknown_fields: false,
            extensions: None,
        }
    }
}

impl<'r> DecodeOptions<'r> {
    pub fn with_recursion_limit(mut self, limit: u32) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_check_required(mut self, check: bool) -> Self {
        self.check_required = check;
        self
    }

    pub fn with_discard_unknown_fields(mut self, discard: bool) -> Self {
        self.discard_unknown_fields = discard;
        self
    }

    pub fn with_extensions(mut self, registry: &'r ExtensionRegistry) -> Self {
        self.extensions = Some(registry);
        self
    }
}

/// Merges `bytes` into `msg`.
pub(crate) fn merge(
    arena: &mut Arena<'_>,
    msg: Message,
    bytes: &[u8],
    options: &DecodeOptions<'_>,
) -> Result<()> {
    arena.check_handle(msg)?;
    tracing::trace!(len = bytes.len(), "decoding message");
    let mut cursor = ReadCursor::new(bytes, options.recursion_limit);
    merge_message(arena, msg, &mut cursor, None, options)?;
    if options.check_required {
        arena.message(msg)?.check_initialized()?;
    }
    Ok(())
}

/// Merges one varint-length-prefixed message from the front of `input`.
/// Returns the number of bytes consumed, prefix included.
pub(crate) fn merge_length_delimited(
    arena: &mut Arena<'_>,
    msg: Message,
    input: &[u8],
    options: &DecodeOptions<'_>,
) -> Result<usize> {
    let mut outer = ReadCursor::new(input, options.recursion_limit);
    let payload = outer.read_length_delimited()?;
    merge(arena, msg, payload, options)?;
    Ok(outer.position())
}

/// Decodes a new message of type `descriptor` from `bytes`.
pub fn decode(
    arena: &mut Arena<'_>,
    descriptor: &MessageDescriptor,
    bytes: &[u8],
    options: &DecodeOptions<'_>,
) -> Result<Message> {
    let msg = arena.new_message(descriptor);
    merge(arena, msg, bytes, options)?;
    Ok(msg)
}

/// Decodes one length-prefixed message from the front of `input`, as
/// written by [`encode_length_delimited`](crate::encoding::encode_length_delimited).
pub fn decode_length_delimited(
    arena: &mut Arena<'_>,
    descriptor: &MessageDescriptor,
    input: &[u8],
    options: &DecodeOptions<'_>,
) -> Result<(Message, usize)> {
    let msg = arena.new_message(descriptor);
    let consumed = merge_length_delimited(arena, msg, input, options)?;
    Ok((msg, consumed))
}

// Reads fields until the end of the cursor, or until the end tag of
// `group` when decoding a group body.
fn merge_message(
    arena: &mut Arena<'_>,
    msg: Message,
    cursor: &mut ReadCursor<'_>,
    group: Option<u32>,
    options: &DecodeOptions<'_>,
) -> Result<()> {
    let desc = {
        let object = arena.object(msg)?;
        object.check_mutable()?;
        object.descriptor.clone()
    };
    loop {
        if cursor.is_at_end() {
            return match group {
                Some(_) => Err(Error::Malformed("unterminated group")),
                None => Ok(()),
            };
        }
        let (number, wire_type) = cursor.read_tag()?;
        if wire_type == WireType::EndGroup {
            return if group == Some(number) {
                Ok(())
            } else {
                Err(Error::Malformed("unexpected end group"))
            };
        }
        let field = desc.field_by_number(number).or_else(|| {
            if !desc.is_extension_number(number) {
                return None;
            }
            options
                .extensions
                .and_then(|registry| registry.lookup(desc.full_name(), number))
                .cloned()
        });
        match field {
            Some(field) if accepts(&field, wire_type) => {
                decode_field(arena, msg, &field, wire_type, cursor, options)?;
            }
            _ => {
                tracing::trace!(message = desc.full_name(), number, ?wire_type, "unknown field");
                let value = UnknownFieldSet::read_value(cursor, number, wire_type)?;
                push_unknown(arena, msg, number, value, options);
            }
        }
    }
}

fn accepts(field: &FieldDescriptor, wire_type: WireType) -> bool {
    // Repeated scalars accept both packed and unpacked encodings regardless
    // of how they are declared.
    field.wire_type() == wire_type
        || (field.is_repeated()
            && field.field_type().is_packable()
            && wire_type == WireType::LengthDelimited)
}

fn push_unknown(
    arena: &mut Arena<'_>,
    msg: Message,
    number: u32,
    value: UnknownValue,
    options: &DecodeOptions<'_>,
) {
    if !options.discard_unknown_fields {
        arena.objects[msg.slot() as usize].unknown.push(number, value);
    }
}

fn message_type(field: &FieldDescriptor) -> Result<MessageDescriptor> {
    field
        .message_type()
        .ok_or_else(|| Error::InvalidDescriptor(format!("{} has no message type", field.full_name())))
}

fn decode_field(
    arena: &mut Arena<'_>,
    msg: Message,
    field: &FieldDescriptor,
    wire_type: WireType,
    cursor: &mut ReadCursor<'_>,
    options: &DecodeOptions<'_>,
) -> Result<()> {
    if field.is_map() {
        return decode_map_entry(arena, msg, field, cursor, options);
    }
    let field_type = field.field_type();
    if field_type.is_message() {
        let child = if field.is_repeated() {
            let child = arena.new_message(&message_type(field)?);
            push_value(arena, msg, field, Scalar::Message(child))?;
            child
        } else {
            sub_message(arena, msg, field)?
        };
        if wire_type == WireType::StartGroup {
            cursor.enter_group()?;
            merge_message(arena, child, cursor, Some(field.number()), options)?;
            cursor.exit_group();
        } else {
            let payload = cursor.read_length_delimited()?;
            let mut nested = cursor.nested(payload)?;
            merge_message(arena, child, &mut nested, None, options)?;
        }
        return Ok(());
    }
    if wire_type == WireType::LengthDelimited && field_type.wire_type() != WireType::LengthDelimited {
        let payload = cursor.read_length_delimited()?;
        let mut packed = ReadCursor::new(payload, options.recursion_limit);
        while !packed.is_at_end() {
            let value = read_scalar(&mut packed, field_type, &mut arena.bump)?;
            store(arena, msg, field, value, options)?;
        }
        return Ok(());
    }
    let value = read_scalar(cursor, field_type, &mut arena.bump)?;
    store(arena, msg, field, value, options)
}

// Singular sub-message of `field`, created when unset.
fn sub_message(arena: &mut Arena<'_>, msg: Message, field: &FieldDescriptor) -> Result<Message> {
    let index = msg.slot() as usize;
    if let Some(FieldSlot::Singular(Scalar::Message(child))) = arena.objects[index].slot(field) {
        return Ok(*child);
    }
    let child = arena.new_message(&message_type(field)?);
    arena.objects[index].set_singular(field, Scalar::Message(child));
    Ok(child)
}

fn push_value(arena: &mut Arena<'_>, msg: Message, field: &FieldDescriptor, value: Scalar) -> Result<()> {
    let object = &mut arena.objects[msg.slot() as usize];
    let slot = object.slot_mut(field);
    if matches!(slot, FieldSlot::Empty) {
        *slot = FieldSlot::Repeated(RepeatedSlot::for_type(field.field_type()));
    }
    match slot {
        FieldSlot::Repeated(r) => r.push(value, &mut arena.bump),
        _ => Err(Error::TypeMismatch(format!("{} is not a repeated field", field.full_name()))),
    }
}

fn store(
    arena: &mut Arena<'_>,
    msg: Message,
    field: &FieldDescriptor,
    value: Scalar,
    options: &DecodeOptions<'_>,
) -> Result<()> {
    if let Scalar::Enum(number) = value {
        if !enum_accepts(field, number) {
            let raw = number as i64 as u64;
            push_unknown(arena, msg, field.number(), UnknownValue::Varint(raw), options);
            return Ok(());
        }
    }
    if field.is_repeated() {
        push_value(arena, msg, field, value)
    } else {
        arena.objects[msg.slot() as usize].set_singular(field, value);
        Ok(())
    }
}

fn enum_accepts(field: &FieldDescriptor, number: i32) -> bool {
    match field.enum_type() {
        Some(e) if e.is_closed() => e.value_by_number(number).is_some(),
        _ => true,
    }
}

fn read_scalar(cursor: &mut ReadCursor<'_>, field_type: FieldType, arena: &mut Bump<'_>) -> Result<Scalar> {
    use FieldType as T;
    Ok(match field_type {
        T::Bool => Scalar::Bool(cursor.read_varint()? != 0),
        T::Int32 => Scalar::Int32(cursor.read_varint()? as i32),
        T::SInt32 => Scalar::Int32(zigzag_decode32(cursor.read_varint()? as u32)),
        T::SFixed32 => Scalar::Int32(cursor.read_fixed32()? as i32),
        T::Int64 => Scalar::Int64(cursor.read_varint()? as i64),
        T::SInt64 => Scalar::Int64(zigzag_decode64(cursor.read_varint()?)),
        T::SFixed64 => Scalar::Int64(cursor.read_fixed64()? as i64),
        T::UInt32 => Scalar::UInt32(cursor.read_varint()? as u32),
        T::Fixed32 => Scalar::UInt32(cursor.read_fixed32()?),
        T::UInt64 => Scalar::UInt64(cursor.read_varint()?),
        T::Fixed64 => Scalar::UInt64(cursor.read_fixed64()?),
        T::Float => Scalar::Float(f32::from_bits(cursor.read_fixed32()?)),
        T::Double => Scalar::Double(f64::from_bits(cursor.read_fixed64()?)),
        T::Enum => Scalar::Enum(cursor.read_varint()? as i32),
        T::String => {
            let raw = cursor.read_length_delimited()?;
            let s = core::str::from_utf8(raw)
                .map_err(|_| Error::Malformed("invalid UTF-8 in string field"))?;
            Scalar::String(String::from_str(s, arena)?)
        }
        T::Bytes => Scalar::Bytes(Bytes::copy_from(cursor.read_length_delimited()?, arena)?),
        T::Message | T::Group => return Err(Error::Malformed("message field read as a scalar")),
    })
}

fn default_scalar(field: &FieldDescriptor, arena: &mut Bump<'_>) -> Result<Scalar> {
    Ok(match field.default_value() {
        Some(DefaultValue::Bool(v)) => Scalar::Bool(*v),
        Some(DefaultValue::Int32(v)) => Scalar::Int32(*v),
        Some(DefaultValue::Int64(v)) => Scalar::Int64(*v),
        Some(DefaultValue::UInt32(v)) => Scalar::UInt32(*v),
        Some(DefaultValue::UInt64(v)) => Scalar::UInt64(*v),
        Some(DefaultValue::Float(v)) => Scalar::Float(*v),
        Some(DefaultValue::Double(v)) => Scalar::Double(*v),
        Some(DefaultValue::Enum(v)) => Scalar::Enum(*v),
        Some(DefaultValue::String(v)) => Scalar::String(String::from_str(v, arena)?),
        Some(DefaultValue::Bytes(v)) => Scalar::Bytes(Bytes::copy_from(v, arena)?),
        None => {
            return Err(Error::InvalidDescriptor(format!(
                "{} has no default value",
                field.full_name()
            )));
        }
    })
}

fn scalar_to_key(scalar: Scalar) -> Result<MapKey> {
    Ok(match scalar {
        Scalar::Bool(v) => MapKey::Bool(v),
        Scalar::Int32(v) => MapKey::Int32(v),
        Scalar::Int64(v) => MapKey::Int64(v),
        Scalar::UInt32(v) => MapKey::UInt32(v),
        Scalar::UInt64(v) => MapKey::UInt64(v),
        Scalar::String(v) => MapKey::String(v),
        other => return Err(Error::TypeMismatch(format!("{other:?} cannot be a map key"))),
    })
}

// A map entry is a nested message with key = 1 and value = 2. Missing
// parts take their defaults; a later entry with the same key wins.
fn decode_map_entry(
    arena: &mut Arena<'_>,
    msg: Message,
    field: &FieldDescriptor,
    cursor: &mut ReadCursor<'_>,
    options: &DecodeOptions<'_>,
) -> Result<()> {
    let entry_type = message_type(field)?;
    let (key_field, value_field) = entry_type
        .map_entry_key_field()
        .zip(entry_type.map_entry_value_field())
        .ok_or_else(|| Error::InvalidDescriptor(format!("{} is not a map entry", entry_type.full_name())))?;
    let payload = cursor.read_length_delimited()?;
    let mut entry = cursor.nested(payload)?;

    let mut key = None;
    let mut value = None;
    while !entry.is_at_end() {
        let (number, wire_type) = entry.read_tag()?;
        match number {
            1 if wire_type == key_field.wire_type() => {
                key = Some(read_scalar(&mut entry, key_field.field_type(), &mut arena.bump)?);
            }
            2 if wire_type == value_field.wire_type() => {
                if value_field.field_type().is_message() {
                    let child = match value {
                        Some(Scalar::Message(child)) => child,
                        _ => arena.new_message(&message_type(&value_field)?),
                    };
                    let body = entry.read_length_delimited()?;
                    let mut nested = entry.nested(body)?;
                    merge_message(arena, child, &mut nested, None, options)?;
                    value = Some(Scalar::Message(child));
                } else {
                    value = Some(read_scalar(&mut entry, value_field.field_type(), &mut arena.bump)?);
                }
            }
            _ => {
                UnknownFieldSet::read_value(&mut entry, number, wire_type)?;
            }
        }
    }

    if let Some(Scalar::Enum(number)) = value {
        if !enum_accepts(&value_field, number) {
            let raw = UnknownValue::LengthDelimited(payload.to_vec());
            push_unknown(arena, msg, field.number(), raw, options);
            return Ok(());
        }
    }
    let key = match key {
        Some(key) => key,
        None => default_scalar(&key_field, &mut arena.bump)?,
    };
    let value = match value {
        Some(value) => value,
        None if value_field.field_type().is_message() => {
            Scalar::Message(arena.new_message(&message_type(&value_field)?))
        }
        None => default_scalar(&value_field, &mut arena.bump)?,
    };

    let object = &mut arena.objects[msg.slot() as usize];
    let slot = object.slot_mut(field);
    if matches!(slot, FieldSlot::Empty) {
        *slot = FieldSlot::Map(MapField::new());
    }
    if let FieldSlot::Map(map) = slot {
        map.insert(scalar_to_key(key)?, value, &mut arena.bump)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor_pool::DescriptorPool;
    use crate::descriptor_proto::{
        DescriptorProto as Msg, EnumDescriptorProto, FieldDescriptorProto as Field,
        FileDescriptorProto, Label,
    };
    use crate::{Global, Value};

    use FieldType as T;
    use Label::{Optional as Opt, Repeated as Rep};

    fn pool() -> DescriptorPool {
        let mut pool = DescriptorPool::new();
        pool.add_file_descriptor_proto(
            FileDescriptorProto::new("d.proto", "d", "proto2")
                .with_enum(EnumDescriptorProto::new("Kind", &[("A", 1), ("B", 2)]))
                .with_message(
                    Msg::new("Sample")
                        .with_field(Field::new("a", 1, Opt, T::Int32))
                        .with_field(Field::new("s", 2, Opt, T::String))
                        .with_field(Field::new("nums", 3, Rep, T::SInt32))
                        .with_field(Field::new("kind", 4, Opt, T::Enum).with_type_name("Kind"))
                        .with_field(Field::new("child", 5, Opt, T::Message).with_type_name("Sample"))
                        .with_field(Field::new("grp", 6, Opt, T::Group).with_type_name("Sample"))
                        .with_map_field("counts", 7, T::String, T::Enum, Some("Kind")),
                ),
        )
        .unwrap();
        pool
    }

    fn decode_sample<'a>(
        arena: &'a mut Arena<'static>,
        bytes: &[u8],
    ) -> Result<crate::DynamicMessageRef<'a, 'static>> {
        let desc = pool().find_message_by_name("d.Sample").unwrap();
        let msg = decode(arena, &desc, bytes, &DecodeOptions::default())?;
        arena.message(msg)
    }

    #[test]
    fn decodes_canonical_varint() {
        let mut arena = Arena::new(&Global);
        let msg = decode_sample(&mut arena, &[0x08, 0x96, 0x01]).unwrap();
        assert_eq!(msg.get_by_name("a").unwrap(), Some(Value::Int32(150)));
    }

    #[test]
    fn last_scalar_wins() {
        let mut arena = Arena::new(&Global);
        let msg = decode_sample(&mut arena, &[0x08, 0x01, 0x08, 0x02]).unwrap();
        assert_eq!(msg.get_by_name("a").unwrap(), Some(Value::Int32(2)));
    }

    #[test]
    fn packed_and_unpacked_forms_are_both_accepted() {
        let mut arena = Arena::new(&Global);
        // unpacked -1, then packed [1, -2]
        let msg = decode_sample(&mut arena, &[0x18, 0x01, 0x1A, 0x02, 0x02, 0x03]).unwrap();
        let nums = msg.get_by_name("nums").unwrap().unwrap().as_list().unwrap();
        let nums: Vec<_> = nums.iter().map(|v| v.as_i32().unwrap()).collect();
        assert_eq!(nums, vec![-1, 1, -2]);
    }

    #[test]
    fn wire_type_mismatch_goes_to_unknown_fields() {
        let mut arena = Arena::new(&Global);
        // field 1 as fixed32
        let msg = decode_sample(&mut arena, &[0x0D, 1, 0, 0, 0]).unwrap();
        assert!(!msg.has_by_name("a").unwrap());
        assert_eq!(
            msg.unknown_fields().get(1).collect::<Vec<_>>(),
            vec![&UnknownValue::Fixed32(1)]
        );
    }

    #[test]
    fn closed_enum_values_outside_the_enum_are_unknown() {
        let mut arena = Arena::new(&Global);
        let msg = decode_sample(&mut arena, &[0x20, 0x07]).unwrap();
        assert!(!msg.has_by_name("kind").unwrap());
        assert_eq!(
            msg.unknown_fields().get(4).collect::<Vec<_>>(),
            vec![&UnknownValue::Varint(7)]
        );
        assert_eq!(msg.encode_vec().unwrap(), vec![0x20, 0x07]);
    }

    #[test]
    fn sub_messages_and_groups_merge() {
        let mut arena = Arena::new(&Global);
        let bytes = [
            0x2A, 0x02, 0x08, 0x01, // child { a: 1 }
            0x2A, 0x02, 0x12, 0x00, // child { s: "" }
            0x33, 0x08, 0x05, 0x34, // grp { a: 5 }
        ];
        let msg = decode_sample(&mut arena, &bytes).unwrap();
        let child = msg.get_by_name("child").unwrap().unwrap().as_message().unwrap();
        assert_eq!(child.get_by_name("a").unwrap(), Some(Value::Int32(1)));
        assert!(child.has_by_name("s").unwrap());
        let grp = msg.get_by_name("grp").unwrap().unwrap().as_message().unwrap();
        assert_eq!(grp.get_by_name("a").unwrap(), Some(Value::Int32(5)));
    }

    #[test]
    fn map_entries_with_missing_parts_use_defaults() {
        let mut arena = Arena::new(&Global);
        // {"x": B}, {value: A} (key defaults to ""), {"x": A} replaces
        let bytes = [
            0x3A, 0x05, 0x0A, 0x01, b'x', 0x10, 0x02, //
            0x3A, 0x02, 0x10, 0x01, //
            0x3A, 0x05, 0x0A, 0x01, b'x', 0x10, 0x01,
        ];
        let msg = decode_sample(&mut arena, &bytes).unwrap();
        let counts = msg.get_by_name("counts").unwrap().unwrap().as_map().unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts.get(&Value::String("x")), Some(Value::Enum(1)));
        assert_eq!(counts.get(&Value::String("")), Some(Value::Enum(1)));
    }

    #[test]
    fn map_entry_with_unknown_closed_enum_value_is_kept_whole() {
        let mut arena = Arena::new(&Global);
        let bytes = [0x3A, 0x05, 0x0A, 0x01, b'y', 0x10, 0x09];
        let msg = decode_sample(&mut arena, &bytes).unwrap();
        assert!(msg.get_by_name("counts").unwrap().unwrap().as_map().unwrap().is_empty());
        assert_eq!(
            msg.unknown_fields().get(7).collect::<Vec<_>>(),
            vec![&UnknownValue::LengthDelimited(vec![0x0A, 0x01, b'y', 0x10, 0x09])]
        );
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        let cases: &[&[u8]] = &[
            &[0x08],                   // truncated varint
            &[0x12, 0x05, b'a'],       // length past the end
            &[0x12, 0x01, 0xFF],       // invalid UTF-8
            &[0x33, 0x08, 0x01],       // unterminated group
            &[0x34],                   // stray end group
            &[0x00],                   // field number 0
        ];
        for case in cases {
            let mut arena = Arena::new(&Global);
            assert!(
                matches!(decode_sample(&mut arena, case), Err(Error::Malformed(_))),
                "{case:?}"
            );
        }
    }

    #[test]
    fn recursion_limit_is_enforced() {
        let desc = pool().find_message_by_name("d.Sample").unwrap();
        // Nest `child` 3 levels deep.
        let bytes = [0x2A, 0x04, 0x2A, 0x02, 0x2A, 0x00];
        let mut arena = Arena::new(&Global);
        let options = DecodeOptions::default().with_recursion_limit(2);
        assert_eq!(
            decode(&mut arena, &desc, &bytes, &options).map(|_| ()),
            Err(Error::MaxDepthExceeded { limit: 2 })
        );
        let options = DecodeOptions::default().with_recursion_limit(3);
        assert!(decode(&mut arena, &desc, &bytes, &options).is_ok());
    }

    #[test]
    fn length_delimited_stream() {
        let desc = pool().find_message_by_name("d.Sample").unwrap();
        let stream = [0x02, 0x08, 0x01, 0x02, 0x08, 0x02];
        let mut arena = Arena::new(&Global);
        let options = DecodeOptions::default();
        let (first, used) = decode_length_delimited(&mut arena, &desc, &stream, &options).unwrap();
        let (second, _) = decode_length_delimited(&mut arena, &desc, &stream[used..], &options).unwrap();
        assert_eq!(used, 3);
        assert_eq!(
            arena.message(first).unwrap().get_by_name("a").unwrap(),
            Some(Value::Int32(1))
        );
        assert_eq!(
            arena.message(second).unwrap().get_by_name("a").unwrap(),
            Some(Value::Int32(2))
        );
    }

    #[test]
    fn frozen_messages_reject_merges() {
        let desc = pool().find_message_by_name("d.Sample").unwrap();
        let mut arena = Arena::new(&Global);
        let msg = arena.new_message(&desc);
        arena.message_mut(msg).unwrap().freeze();
        assert_eq!(
            merge(&mut arena, msg, &[0x08, 0x01], &DecodeOptions::default()),
            Err(Error::Frozen)
        );
    }
}

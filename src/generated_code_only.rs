//! Internal helpers for generated code. **Do not use directly.**
//!
//! Generated accessors address fields by number and forward to the
//! reflection runtime, so generated and dynamic access share one storage
//! path. These are not part of the stable public API and may change without
//! notice.

use std::sync::OnceLock;

use crate::arena::Arena;
use crate::base::Message;
use crate::descriptor_pool::{DescriptorPool, FieldDescriptor, MessageDescriptor};
use crate::reflection::{ListRef, MapRef, Value};
use crate::{Error, Result};

pub use crate::base::Protobuf;

/// Descriptor pool decoded on first use from an embedded, serialized
/// `FileDescriptorSet`.
pub struct LazyPool {
    bytes: &'static [u8],
    pool: OnceLock<Result<DescriptorPool>>,
}

impl LazyPool {
    pub const fn new(bytes: &'static [u8]) -> Self {
        LazyPool {
            bytes,
            pool: OnceLock::new(),
        }
    }

    pub fn get(&self) -> Result<&DescriptorPool> {
        self.pool
            .get_or_init(|| DescriptorPool::decode_file_descriptor_set(self.bytes))
            .as_ref()
            .map_err(Clone::clone)
    }

    pub fn message(&self, full_name: &str) -> Result<MessageDescriptor> {
        self.get()?
            .find_message_by_name(full_name)
            .ok_or_else(|| Error::UnknownTypeName(full_name.to_string()))
    }
}

fn field(arena: &Arena<'_>, msg: Message, number: u32) -> Result<FieldDescriptor> {
    let desc = arena.message(msg)?.descriptor();
    desc.field_by_number(number)
        .ok_or_else(|| Error::UnknownFieldName(format!("{}#{number}", desc.full_name())))
}

/// Fails unless `msg` is a live message of type `full_name`.
pub fn check_type(arena: &Arena<'_>, msg: Message, full_name: &str) -> Result<()> {
    let actual = arena.message(msg)?.descriptor().full_name();
    if actual != full_name {
        return Err(Error::TypeMismatch(format!("expected {full_name}, got {actual}")));
    }
    Ok(())
}

pub fn get<'a, 'alloc>(arena: &'a Arena<'alloc>, msg: Message, number: u32) -> Result<Option<Value<'a, 'alloc>>> {
    arena.message(msg)?.get(&field(arena, msg, number)?)
}

fn expect<T>(value: Option<T>, arena: &Arena<'_>, msg: Message, number: u32) -> Result<T> {
    value.ok_or_else(|| match field(arena, msg, number) {
        Ok(f) => Error::TypeMismatch(format!("unexpected value type for {}", f.full_name())),
        Err(e) => e,
    })
}

macro_rules! typed_getters {
    ($($name:ident => $ty:ty, $as:ident;)*) => {
        $(
            pub fn $name(arena: &Arena<'_>, msg: Message, number: u32) -> Result<$ty> {
                let value = get(arena, msg, number)?.and_then(|v| v.$as());
                expect(value, arena, msg, number)
            }
        )*
    };
}

typed_getters! {
    get_bool => bool, as_bool;
    get_i32 => i32, as_i32;
    get_i64 => i64, as_i64;
    get_u32 => u32, as_u32;
    get_u64 => u64, as_u64;
    get_f32 => f32, as_f32;
    get_f64 => f64, as_f64;
}

pub fn get_str<'a>(arena: &'a Arena<'_>, msg: Message, number: u32) -> Result<&'a str> {
    let value = get(arena, msg, number)?.and_then(|v| v.as_str());
    expect(value, arena, msg, number)
}

pub fn get_bytes<'a>(arena: &'a Arena<'_>, msg: Message, number: u32) -> Result<&'a [u8]> {
    let value = get(arena, msg, number)?.and_then(|v| v.as_bytes());
    expect(value, arena, msg, number)
}

/// Handle of a set singular message field.
pub fn get_message(arena: &Arena<'_>, msg: Message, number: u32) -> Result<Option<Message>> {
    Ok(get(arena, msg, number)?.and_then(|v| v.as_message()).map(|m| m.handle()))
}

pub fn has(arena: &Arena<'_>, msg: Message, number: u32) -> Result<bool> {
    arena.message(msg)?.has(&field(arena, msg, number)?)
}

pub fn set(arena: &mut Arena<'_>, msg: Message, number: u32, value: Value<'_, '_>) -> Result<()> {
    let f = field(arena, msg, number)?;
    arena.message_mut(msg)?.set(&f, value)
}

pub fn clear(arena: &mut Arena<'_>, msg: Message, number: u32) -> Result<()> {
    let f = field(arena, msg, number)?;
    arena.message_mut(msg)?.clear(&f)
}

pub fn set_message(arena: &mut Arena<'_>, msg: Message, number: u32, child: Message) -> Result<()> {
    let f = field(arena, msg, number)?;
    arena.message_mut(msg)?.set_message(&f, child)
}

pub fn mutable_message(arena: &mut Arena<'_>, msg: Message, number: u32) -> Result<Message> {
    let f = field(arena, msg, number)?;
    arena.message_mut(msg)?.mutable_message(&f)
}

/// Length of a repeated or map field.
pub fn len(arena: &Arena<'_>, msg: Message, number: u32) -> Result<usize> {
    Ok(match get(arena, msg, number)? {
        Some(Value::List(list)) => list.len(),
        Some(Value::Map(map)) => map.len(),
        _ => 0,
    })
}

pub fn get_at<'a, 'alloc>(
    arena: &'a Arena<'alloc>,
    msg: Message,
    number: u32,
    index: usize,
) -> Result<Value<'a, 'alloc>> {
    let list = arena.message(msg)?.list(&field(arena, msg, number)?)?;
    let len = list.len();
    list.get(index).ok_or(Error::IndexOutOfBounds { index, len })
}

pub fn push(arena: &mut Arena<'_>, msg: Message, number: u32, value: Value<'_, '_>) -> Result<()> {
    let f = field(arena, msg, number)?;
    arena.message_mut(msg)?.list_mut(&f)?.push(value)
}

pub fn add_message(arena: &mut Arena<'_>, msg: Message, number: u32) -> Result<Message> {
    let f = field(arena, msg, number)?;
    arena.message_mut(msg)?.list_mut(&f)?.add_message()
}

pub fn get_list<'a, 'alloc>(arena: &'a Arena<'alloc>, msg: Message, number: u32) -> Result<ListRef<'a, 'alloc>> {
    arena.message(msg)?.list(&field(arena, msg, number)?)
}

pub fn get_map<'a, 'alloc>(arena: &'a Arena<'alloc>, msg: Message, number: u32) -> Result<MapRef<'a, 'alloc>> {
    arena.message(msg)?.map(&field(arena, msg, number)?)
}

pub fn map_insert(
    arena: &mut Arena<'_>,
    msg: Message,
    number: u32,
    key: Value<'_, '_>,
    value: Value<'_, '_>,
) -> Result<()> {
    let f = field(arena, msg, number)?;
    arena.message_mut(msg)?.map_mut(&f)?.insert(key, value)
}

/// Message value under `key`, inserted empty when absent.
pub fn map_entry_message(arena: &mut Arena<'_>, msg: Message, number: u32, key: Value<'_, '_>) -> Result<Message> {
    let f = field(arena, msg, number)?;
    arena.message_mut(msg)?.map_mut(&f)?.entry_message(key)
}

/// Unwraps a converted value, reporting a mismatch against field `number`.
pub fn typed<T>(value: Option<T>, number: u32) -> Result<T> {
    value.ok_or_else(|| Error::TypeMismatch(format!("unexpected value type for field #{number}")))
}

/// Number of the active member of the oneof at `oneof_index`, or 0.
pub fn which_oneof(arena: &Arena<'_>, msg: Message, oneof_index: usize) -> Result<u32> {
    let view = arena.message(msg)?;
    let oneof = view
        .descriptor()
        .oneofs()
        .nth(oneof_index)
        .ok_or(Error::IndexOutOfBounds {
            index: oneof_index,
            len: view.descriptor().oneof_count(),
        })?;
    Ok(view.which_oneof(&oneof)?.map_or(0, |f| f.number()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Global;
    use crate::descriptor_proto::{
        Codec, DescriptorProto, FieldDescriptorProto, FieldType, FileDescriptorProto, FileDescriptorSet,
        Label,
    };

    static POOL: OnceLock<Vec<u8>> = OnceLock::new();

    fn schema() -> &'static [u8] {
        POOL.get_or_init(|| {
            FileDescriptorSet {
                file: vec![FileDescriptorProto::new("g.proto", "g", "proto3").with_message(
                    DescriptorProto::new("M")
                        .with_field(FieldDescriptorProto::new("n", 1, Label::Optional, FieldType::Int32))
                        .with_field(FieldDescriptorProto::new("s", 2, Label::Repeated, FieldType::String))
                        .with_oneof("pick")
                        .with_field(
                            FieldDescriptorProto::new("a", 3, Label::Optional, FieldType::Bool).with_oneof_index(0),
                        )
                        .with_field(
                            FieldDescriptorProto::new("b", 4, Label::Optional, FieldType::Bool).with_oneof_index(0),
                        ),
                )],
                ..Default::default()
            }
            .encode_to_vec()
        })
    }

    #[test]
    fn accessors_by_number() {
        let pool = LazyPool::new(schema());
        let desc = pool.message("g.M").unwrap();
        let mut arena = Arena::new(&Global);
        let msg = arena.new_message(&desc);

        assert_eq!(get_i32(&arena, msg, 1).unwrap(), 0);
        set(&mut arena, msg, 1, Value::Int32(9)).unwrap();
        assert_eq!(get_i32(&arena, msg, 1).unwrap(), 9);
        assert!(get_str(&arena, msg, 1).is_err());

        push(&mut arena, msg, 2, Value::String("x")).unwrap();
        push(&mut arena, msg, 2, Value::String("y")).unwrap();
        assert_eq!(len(&arena, msg, 2).unwrap(), 2);
        assert_eq!(get_at(&arena, msg, 2, 1).unwrap(), Value::String("y"));
        assert_eq!(
            get_at(&arena, msg, 2, 5).unwrap_err(),
            Error::IndexOutOfBounds { index: 5, len: 2 }
        );

        assert_eq!(which_oneof(&arena, msg, 0).unwrap(), 0);
        set(&mut arena, msg, 4, Value::Bool(true)).unwrap();
        assert_eq!(which_oneof(&arena, msg, 0).unwrap(), 4);
        assert!(matches!(get(&arena, msg, 99), Err(Error::UnknownFieldName(_))));
        check_type(&arena, msg, "g.M").unwrap();
        assert!(check_type(&arena, msg, "g.Other").is_err());
    }
}

//! Runtime reflection for protobuf messages.
//!
//! Every field access, generated or dynamic, goes through this module:
//! generated accessors are thin typed wrappers over the same calls.
//!
//! # Key Types
//!
//! - [`DynamicMessageRef`]: read-only view of a message for inspection and encoding
//! - [`DynamicMessage`]: mutable view for decoding and modification
//! - [`Value`]: any field value, borrowed from the arena
//! - [`RepeatedMut`] / [`MapMut`]: mutable views of repeated and map fields
//!
//! # Example
//!
//! ```
//! use protoarena::{Arena, DescriptorPool, Global, Value};
//! use protoarena::descriptor_proto::{
//!     DescriptorProto, FieldDescriptorProto, FieldType, FileDescriptorProto, Label,
//! };
//!
//! let mut pool = DescriptorPool::new();
//! pool.add_file_descriptor_proto(
//!     FileDescriptorProto::new("point.proto", "geo", "proto3").with_message(
//!         DescriptorProto::new("Point")
//!             .with_field(FieldDescriptorProto::new("x", 1, Label::Optional, FieldType::Int32)),
//!     ),
//! )
//! .unwrap();
//!
//! let mut arena = Arena::new(&Global);
//! let point = pool.new_message("geo.Point", &mut arena).unwrap();
//! arena.message_mut(point).unwrap().set_by_name("x", Value::Int32(7)).unwrap();
//! let x = arena.message(point).unwrap().get_by_name("x").unwrap();
//! assert_eq!(x, Some(Value::Int32(7)));
//! ```

use core::fmt::Debug;
use std::collections::HashSet;

use crate::arena::{Arena, Bump};
use crate::base::{FieldSlot, GraphCopier, Message, Object, RepeatedSlot, Scalar};
use crate::containers::{Bytes, MapEntry, MapField, MapKey, MapKeyRef, String};
use crate::decoding::{self, DecodeOptions};
use crate::descriptor_pool::{DefaultValue, FieldDescriptor, MessageDescriptor, OneofDescriptor};
use crate::descriptor_proto::FieldType;
use crate::encoding::{self, EncodeOptions};
use crate::extension::ExtensionRegistry;
use crate::unknown::UnknownFieldSet;
use crate::{Error, Result};

/// A dynamically-typed field value.
///
/// Returned by [`DynamicMessageRef::get`] and accepted by
/// [`DynamicMessage::set`]. Integer variants follow the storage type of the
/// field: `sint32` and `sfixed32` use `Int32`, `fixed64` uses `UInt64`, and
/// so on. Enum fields also accept `Int32` on input.
///
/// `Enum` carries a bare number, not its enum type. A value read from one
/// enum field can be stored in a field of another enum type; the receiving
/// field decides: closed enums reject numbers they do not declare and open
/// enums keep any number.
#[derive(Clone, Copy)]
pub enum Value<'a, 'alloc> {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    Enum(i32),
    String(&'a str),
    Bytes(&'a [u8]),
    Message(DynamicMessageRef<'a, 'alloc>),
    List(ListRef<'a, 'alloc>),
    Map(MapRef<'a, 'alloc>),
}

impl<'a, 'alloc> Value<'a, 'alloc> {
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            Value::Int32(v) | Value::Enum(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            Value::UInt32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::UInt64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            Value::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        match *self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        match *self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<DynamicMessageRef<'a, 'alloc>> {
        match *self {
            Value::Message(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<ListRef<'a, 'alloc>> {
        match *self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<MapRef<'a, 'alloc>> {
        match *self {
            Value::Map(v) => Some(v),
            _ => None,
        }
    }
}

impl core::fmt::Debug for Value<'_, '_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Value::Bool(v) => v.fmt(f),
            Value::Int32(v) => v.fmt(f),
            Value::Int64(v) => v.fmt(f),
            Value::UInt32(v) => v.fmt(f),
            Value::UInt64(v) => v.fmt(f),
            Value::Float(v) => v.fmt(f),
            Value::Double(v) => v.fmt(f),
            Value::Enum(v) => write!(f, "enum {v}"),
            Value::String(v) => v.fmt(f),
            Value::Bytes(v) => v.fmt(f),
            Value::Message(v) => v.fmt(f),
            Value::List(v) => f.debug_list().entries(v.iter()).finish(),
            Value::Map(v) => f.debug_map().entries(v.iter()).finish(),
        }
    }
}

impl PartialEq for Value<'_, '_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::UInt32(a), Value::UInt32(b)) => a == b,
            (Value::UInt64(a), Value::UInt64(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Enum(a), Value::Enum(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Message(a), Value::Message(b)) => a == b,
            (Value::List(a), Value::List(b)) => a.len() == b.len() && a.iter().eq(b.iter()),
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(&k) == Some(v))
            }
            _ => false,
        }
    }
}

pub(crate) fn scalar_value<'a, 'alloc>(arena: &'a Arena<'alloc>, scalar: &'a Scalar) -> Value<'a, 'alloc> {
    match scalar {
        Scalar::Bool(v) => Value::Bool(*v),
        Scalar::Int32(v) => Value::Int32(*v),
        Scalar::Int64(v) => Value::Int64(*v),
        Scalar::UInt32(v) => Value::UInt32(*v),
        Scalar::UInt64(v) => Value::UInt64(*v),
        Scalar::Float(v) => Value::Float(*v),
        Scalar::Double(v) => Value::Double(*v),
        Scalar::Enum(v) => Value::Enum(*v),
        Scalar::String(v) => Value::String(v.as_str()),
        Scalar::Bytes(v) => Value::Bytes(v.as_slice()),
        Scalar::Message(m) => Value::Message(DynamicMessageRef::new(arena, *m)),
    }
}

fn default_value<'a, 'alloc>(default: &'a DefaultValue) -> Value<'a, 'alloc> {
    match default {
        DefaultValue::Bool(v) => Value::Bool(*v),
        DefaultValue::Int32(v) => Value::Int32(*v),
        DefaultValue::Int64(v) => Value::Int64(*v),
        DefaultValue::UInt32(v) => Value::UInt32(*v),
        DefaultValue::UInt64(v) => Value::UInt64(*v),
        DefaultValue::Float(v) => Value::Float(*v),
        DefaultValue::Double(v) => Value::Double(*v),
        DefaultValue::Enum(v) => Value::Enum(*v),
        DefaultValue::String(v) => Value::String(v),
        DefaultValue::Bytes(v) => Value::Bytes(v),
    }
}

fn zero_value<'a, 'alloc>(field_type: FieldType) -> Value<'a, 'alloc> {
    use FieldType as T;
    match field_type {
        T::Bool => Value::Bool(false),
        T::Int32 | T::SInt32 | T::SFixed32 => Value::Int32(0),
        T::Int64 | T::SInt64 | T::SFixed64 => Value::Int64(0),
        T::UInt32 | T::Fixed32 => Value::UInt32(0),
        T::UInt64 | T::Fixed64 => Value::UInt64(0),
        T::Float => Value::Float(0.0),
        T::Double => Value::Double(0.0),
        T::Enum => Value::Enum(0),
        T::String => Value::String(""),
        T::Bytes | T::Message | T::Group => Value::Bytes(&[]),
    }
}

fn key_value<'a, 'alloc>(key: &'a MapKey) -> Value<'a, 'alloc> {
    match key {
        MapKey::Bool(v) => Value::Bool(*v),
        MapKey::Int32(v) => Value::Int32(*v),
        MapKey::Int64(v) => Value::Int64(*v),
        MapKey::UInt32(v) => Value::UInt32(*v),
        MapKey::UInt64(v) => Value::UInt64(*v),
        MapKey::String(v) => Value::String(v.as_str()),
    }
}

fn key_ref<'v>(value: &Value<'v, '_>) -> Option<MapKeyRef<'v>> {
    Some(match *value {
        Value::Bool(v) => MapKeyRef::Bool(v),
        Value::Int32(v) => MapKeyRef::Int32(v),
        Value::Int64(v) => MapKeyRef::Int64(v),
        Value::UInt32(v) => MapKeyRef::UInt32(v),
        Value::UInt64(v) => MapKeyRef::UInt64(v),
        Value::String(v) => MapKeyRef::String(v),
        _ => return None,
    })
}

fn find_entry<'m>(map: &'m MapField, key: &Value<'_, '_>) -> Option<&'m MapEntry> {
    map.find(key_ref(key)?).map(|i| &map.entries()[i])
}

fn to_map_key(key_field: &FieldDescriptor, value: &Value<'_, '_>, arena: &mut Bump<'_>) -> Result<MapKey> {
    use FieldType as T;
    Ok(match (key_field.field_type(), *value) {
        (T::Bool, Value::Bool(v)) => MapKey::Bool(v),
        (T::Int32 | T::SInt32 | T::SFixed32, Value::Int32(v)) => MapKey::Int32(v),
        (T::Int64 | T::SInt64 | T::SFixed64, Value::Int64(v)) => MapKey::Int64(v),
        (T::UInt32 | T::Fixed32, Value::UInt32(v)) => MapKey::UInt32(v),
        (T::UInt64 | T::Fixed64, Value::UInt64(v)) => MapKey::UInt64(v),
        (T::String, Value::String(v)) => MapKey::String(String::from_str(v, arena)?),
        (t, v) => {
            return Err(Error::TypeMismatch(format!(
                "{v:?} is not a valid {t:?} key for {}",
                key_field.full_name()
            )));
        }
    })
}

/// Converts an input value to the stored form of `field`, copying string
/// and bytes payloads into `arena`.
fn to_scalar(field: &FieldDescriptor, value: &Value<'_, '_>, arena: &mut Bump<'_>) -> Result<Scalar> {
    use FieldType as T;
    Ok(match (field.field_type(), *value) {
        (T::Bool, Value::Bool(v)) => Scalar::Bool(v),
        (T::Int32 | T::SInt32 | T::SFixed32, Value::Int32(v)) => Scalar::Int32(v),
        (T::Int64 | T::SInt64 | T::SFixed64, Value::Int64(v)) => Scalar::Int64(v),
        (T::Int64 | T::SInt64 | T::SFixed64, Value::Int32(v)) => Scalar::Int64(v.into()),
        (T::UInt32 | T::Fixed32, Value::UInt32(v)) => Scalar::UInt32(v),
        (T::UInt64 | T::Fixed64, Value::UInt64(v)) => Scalar::UInt64(v),
        (T::UInt64 | T::Fixed64, Value::UInt32(v)) => Scalar::UInt64(v.into()),
        (T::Float, Value::Float(v)) => Scalar::Float(v),
        (T::Double, Value::Double(v)) => Scalar::Double(v),
        (T::Double, Value::Float(v)) => Scalar::Double(v.into()),
        (T::Enum, Value::Enum(v) | Value::Int32(v)) => {
            if let Some(enum_type) = field.enum_type() {
                if enum_type.is_closed() && enum_type.value_by_number(v).is_none() {
                    return Err(Error::TypeMismatch(format!(
                        "{v} is not a value of closed enum {}",
                        enum_type.full_name()
                    )));
                }
            }
            Scalar::Enum(v)
        }
        (T::String, Value::String(v)) => Scalar::String(String::from_str(v, arena)?),
        (T::Bytes, Value::Bytes(v)) => Scalar::Bytes(Bytes::copy_from(v, arena)?),
        (T::Message | T::Group, Value::Message(_)) => {
            return Err(Error::TypeMismatch(format!(
                "{} takes a message from this arena; use set_message or attach_message",
                field.full_name()
            )));
        }
        (t, v) => {
            return Err(Error::TypeMismatch(format!(
                "cannot store {v:?} in {t:?} field {}",
                field.full_name()
            )));
        }
    })
}

/// Resolves `field` against the descriptor an object was created with.
///
/// Descriptors from another pool built from the same schema are accepted;
/// the field is looked up again by number so its index matches the object.
pub(crate) fn local_field(desc: &MessageDescriptor, field: &FieldDescriptor) -> Result<FieldDescriptor> {
    let mismatch = || {
        Error::TypeMismatch(format!(
            "{} is not a field of {}",
            field.full_name(),
            desc.full_name()
        ))
    };
    if field.containing_type().full_name() != desc.full_name() {
        return Err(mismatch());
    }
    if field.is_extension() {
        return Ok(field.clone());
    }
    desc.field_by_number(field.number())
        .filter(|local| local.field_type() == field.field_type() && local.label() == field.label())
        .ok_or_else(mismatch)
}

fn check_message_type(
    arena: &Arena<'_>,
    field: &FieldDescriptor,
    child: Message,
) -> Result<()> {
    let expected = field.message_type().ok_or_else(|| {
        Error::TypeMismatch(format!("{} is not a message field", field.full_name()))
    })?;
    let actual = arena.object(child)?.descriptor();
    if *actual != expected {
        return Err(Error::TypeMismatch(format!(
            "{} expects {}, got {}",
            field.full_name(),
            expected.full_name(),
            actual.full_name()
        )));
    }
    Ok(())
}

fn push_children(slot: &FieldSlot, out: &mut Vec<Message>) {
    match slot {
        FieldSlot::Singular(Scalar::Message(m)) => out.push(*m),
        FieldSlot::Repeated(RepeatedSlot::Message(rf)) => out.extend(rf.iter().copied()),
        FieldSlot::Map(map) => out.extend(map.entries().iter().filter_map(|e| e.value.as_message())),
        _ => {}
    }
}

/// Read-only view of a message.
///
/// Cheap to copy; everything it returns borrows from the arena.
#[derive(Clone, Copy)]
pub struct DynamicMessageRef<'a, 'alloc> {
    arena: &'a Arena<'alloc>,
    msg: Message,
}

impl<'a, 'alloc> DynamicMessageRef<'a, 'alloc> {
    /// `msg` must be a valid handle of `arena`.
    pub(crate) fn new(arena: &'a Arena<'alloc>, msg: Message) -> Self {
        DynamicMessageRef { arena, msg }
    }

    pub(crate) fn object(&self) -> &'a Object {
        &self.arena.objects[self.msg.slot() as usize]
    }

    pub fn arena(&self) -> &'a Arena<'alloc> {
        self.arena
    }

    pub fn handle(&self) -> Message {
        self.msg
    }

    pub fn descriptor(&self) -> &'a MessageDescriptor {
        &self.object().descriptor
    }

    pub fn is_frozen(&self) -> bool {
        self.object().frozen
    }

    fn field_named(&self, name: &str) -> Result<FieldDescriptor> {
        self.descriptor().field_by_name(name).ok_or_else(|| {
            Error::UnknownFieldName(format!("{}.{name}", self.descriptor().full_name()))
        })
    }

    /// Value of `field`.
    ///
    /// Unset scalars yield their default, repeated and map fields yield a
    /// (possibly empty) container, and an unset message field yields `None`.
    pub fn get(&self, field: &FieldDescriptor) -> Result<Option<Value<'a, 'alloc>>> {
        let object = self.object();
        let local = local_field(&object.descriptor, field)?;
        if local.is_map() {
            return Ok(Some(Value::Map(self.map_of(object, &local))));
        }
        if local.is_repeated() {
            return Ok(Some(Value::List(self.list_of(object, &local))));
        }
        match object.slot(&local) {
            Some(FieldSlot::Singular(v)) => Ok(Some(scalar_value(self.arena, v))),
            _ if local.field_type().is_message() => Ok(None),
            _ => {
                let desc = &object.descriptor;
                let default = if !local.is_extension() {
                    desc.field_default(local.index())
                } else if desc.pool().ptr_eq(local.pool()) {
                    desc.pool().default_of(&local)
                } else {
                    self.arena.retain_pool(local.pool()).default_of(&local)
                };
                Ok(Some(match default {
                    Some(d) => default_value(d),
                    None => zero_value(local.field_type()),
                }))
            }
        }
    }

    pub fn get_by_name(&self, name: &str) -> Result<Option<Value<'a, 'alloc>>> {
        self.get(&self.field_named(name)?)
    }

    fn list_of(&self, object: &'a Object, field: &FieldDescriptor) -> ListRef<'a, 'alloc> {
        let slot = match object.slot(field) {
            Some(FieldSlot::Repeated(r)) => Some(r),
            _ => None,
        };
        ListRef {
            arena: self.arena,
            slot,
        }
    }

    fn map_of(&self, object: &'a Object, field: &FieldDescriptor) -> MapRef<'a, 'alloc> {
        let map = match object.slot(field) {
            Some(FieldSlot::Map(m)) => Some(m),
            _ => None,
        };
        MapRef {
            arena: self.arena,
            map,
        }
    }

    /// Repeated field contents; fails for singular and map fields.
    pub fn list(&self, field: &FieldDescriptor) -> Result<ListRef<'a, 'alloc>> {
        match self.get(field)? {
            Some(Value::List(list)) => Ok(list),
            _ => Err(Error::TypeMismatch(format!("{} is not a repeated field", field.full_name()))),
        }
    }

    pub fn map(&self, field: &FieldDescriptor) -> Result<MapRef<'a, 'alloc>> {
        match self.get(field)? {
            Some(Value::Map(map)) => Ok(map),
            _ => Err(Error::TypeMismatch(format!("{} is not a map field", field.full_name()))),
        }
    }

    /// Sub-message stored in a singular message field, if set.
    pub fn message(&self, field: &FieldDescriptor) -> Result<Option<DynamicMessageRef<'a, 'alloc>>> {
        match self.get(field)? {
            Some(Value::Message(m)) => Ok(Some(m)),
            None => Ok(None),
            Some(_) => Err(Error::TypeMismatch(format!("{} is not a message field", field.full_name()))),
        }
    }

    /// Explicit presence of `field`. Fails with
    /// [`Error::NoPresenceTracking`] for repeated fields and proto3 scalars
    /// declared without `optional`.
    pub fn has(&self, field: &FieldDescriptor) -> Result<bool> {
        let object = self.object();
        let local = local_field(&object.descriptor, field)?;
        if !local.has_presence() {
            return Err(Error::NoPresenceTracking {
                field: local.full_name().to_string(),
            });
        }
        Ok(object.is_present(&local))
    }

    pub fn has_by_name(&self, name: &str) -> Result<bool> {
        self.has(&self.field_named(name)?)
    }

    /// The member of `oneof` currently set, if any.
    pub fn which_oneof(&self, oneof: &OneofDescriptor) -> Result<Option<FieldDescriptor>> {
        let object = self.object();
        if oneof.containing_type() != object.descriptor {
            return Err(Error::TypeMismatch(format!(
                "{} is not a oneof of {}",
                oneof.full_name(),
                object.descriptor.full_name()
            )));
        }
        let local = object
            .descriptor
            .oneof_by_name(oneof.name())
            .ok_or_else(|| Error::TypeMismatch(oneof.full_name().to_string()))?;
        match object.oneof_cases[local.index()] {
            0 => Ok(None),
            number => Ok(object.descriptor.field_by_number(number)),
        }
    }

    /// Set fields in field-number order, extensions included.
    ///
    /// Repeated and map fields are listed when non-empty; proto3 scalars
    /// without presence when they differ from zero.
    pub fn list_fields(&self) -> Vec<FieldDescriptor> {
        let object = self.object();
        let mut fields: Vec<FieldDescriptor> = object
            .descriptor
            .fields_in_number_order()
            .filter(|f| match &object.fields[f.index()] {
                FieldSlot::Empty => false,
                FieldSlot::Repeated(r) => !r.is_empty(),
                FieldSlot::Map(m) => !m.is_empty(),
                FieldSlot::Singular(v) => f.has_presence() || !encoding::is_zero(v),
            })
            .collect();
        let extensions = object.extensions.values().filter(|e| match &e.slot {
            FieldSlot::Empty => false,
            FieldSlot::Repeated(r) => !r.is_empty(),
            FieldSlot::Map(m) => !m.is_empty(),
            FieldSlot::Singular(_) => true,
        });
        fields.extend(extensions.map(|e| e.field.clone()));
        fields.sort_by_key(|f| f.number());
        fields
    }

    /// Extensions with a value on this message, in number order.
    pub fn extensions(&self) -> impl Iterator<Item = &'a FieldDescriptor> + 'a {
        self.object().extensions.values().map(|e| &e.field)
    }

    pub fn unknown_fields(&self) -> &'a UnknownFieldSet {
        &self.object().unknown
    }

    pub fn is_initialized(&self) -> bool {
        self.find_initialization_errors().is_empty()
    }

    /// Paths of every unset required field reachable from this message.
    ///
    /// Own fields come first in declaration order, then sub-messages in field
    /// number order as `name.`, `name[index].`, `name[key].` or
    /// `(extension.full_name).` prefixes.
    pub fn find_initialization_errors(&self) -> Vec<std::string::String> {
        let mut errors = Vec::new();
        let mut path = Vec::new();
        self.collect_initialization_errors(self.msg, "", &mut errors, &mut path);
        errors
    }

    fn collect_initialization_errors(
        &self,
        msg: Message,
        prefix: &str,
        errors: &mut Vec<std::string::String>,
        path: &mut Vec<Message>,
    ) {
        if path.contains(&msg) {
            return;
        }
        path.push(msg);
        let view = DynamicMessageRef::new(self.arena, msg);
        let object = view.object();
        for field in object.descriptor.fields() {
            if field.is_required() && !object.is_present(&field) {
                errors.push(format!("{prefix}{}", field.name()));
            }
        }
        for field in view.list_fields() {
            if !field.field_type().is_message() {
                continue;
            }
            let name = if field.is_extension() {
                format!("({})", field.full_name())
            } else {
                field.name().to_string()
            };
            match object.slot(&field) {
                Some(FieldSlot::Singular(Scalar::Message(child))) => {
                    self.collect_initialization_errors(*child, &format!("{prefix}{name}."), errors, path);
                }
                Some(FieldSlot::Repeated(RepeatedSlot::Message(rf))) => {
                    for (i, child) in rf.iter().enumerate() {
                        self.collect_initialization_errors(
                            *child,
                            &format!("{prefix}{name}[{i}]."),
                            errors,
                            path,
                        );
                    }
                }
                Some(FieldSlot::Map(map)) => {
                    for entry in map.entries() {
                        if let Scalar::Message(child) = entry.value {
                            self.collect_initialization_errors(
                                child,
                                &format!("{prefix}{name}[{}].", entry.key),
                                errors,
                                path,
                            );
                        }
                    }
                }
                _ => {}
            }
        }
        path.pop();
    }

    /// [`Error::MissingRequired`] listing every missing path, if any.
    pub fn check_initialized(&self) -> Result<()> {
        let missing_paths = self.find_initialization_errors();
        if missing_paths.is_empty() {
            Ok(())
        } else {
            Err(Error::MissingRequired {
                message: self.descriptor().full_name().to_string(),
                missing_paths,
            })
        }
    }

    /// Serializes the message, failing if required fields are missing.
    pub fn encode_vec(&self) -> Result<Vec<u8>> {
        self.encode_with(&EncodeOptions::default())
    }

    /// Serializes without checking required fields.
    pub fn encode_partial_vec(&self) -> Result<Vec<u8>> {
        self.encode_with(&EncodeOptions::default().with_check_required(false))
    }

    pub fn encode_with(&self, options: &EncodeOptions) -> Result<Vec<u8>> {
        encoding::encode(self.arena, self.msg, options)
    }

    /// Serializes with a varint length prefix, for message streams.
    pub fn encode_length_delimited(&self) -> Result<Vec<u8>> {
        encoding::encode_length_delimited(self.arena, self.msg, &EncodeOptions::default())
    }
}

// Two messages are equal when they have the same type and the same
// deterministic serialization.
impl PartialEq for DynamicMessageRef<'_, '_> {
    fn eq(&self, other: &Self) -> bool {
        if self.descriptor() != other.descriptor() {
            return false;
        }
        let options = EncodeOptions::default()
            .with_check_required(false)
            .with_deterministic(true);
        match (self.encode_with(&options), other.encode_with(&options)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl core::fmt::Debug for DynamicMessageRef<'_, '_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut debug_struct = f.debug_struct(self.descriptor().name());
        for field in self.list_fields() {
            if let Ok(Some(value)) = self.get(&field) {
                if field.is_extension() {
                    debug_struct.field(&format!("({})", field.full_name()), &value);
                } else {
                    debug_struct.field(field.name(), &value);
                }
            }
        }
        if !self.unknown_fields().is_empty() {
            debug_struct.field("unknown_fields", self.unknown_fields());
        }
        debug_struct.finish()
    }
}

/// Contents of a repeated field.
#[derive(Clone, Copy)]
pub struct ListRef<'a, 'alloc> {
    arena: &'a Arena<'alloc>,
    slot: Option<&'a RepeatedSlot>,
}

impl<'a, 'alloc> ListRef<'a, 'alloc> {
    pub fn len(&self) -> usize {
        self.slot.map_or(0, |s| s.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Value<'a, 'alloc>> {
        Some(match self.slot? {
            RepeatedSlot::Bool(rf) => Value::Bool(rf.get(index)?),
            RepeatedSlot::Int32(rf) => Value::Int32(rf.get(index)?),
            RepeatedSlot::Int64(rf) => Value::Int64(rf.get(index)?),
            RepeatedSlot::UInt32(rf) => Value::UInt32(rf.get(index)?),
            RepeatedSlot::UInt64(rf) => Value::UInt64(rf.get(index)?),
            RepeatedSlot::Float(rf) => Value::Float(rf.get(index)?),
            RepeatedSlot::Double(rf) => Value::Double(rf.get(index)?),
            RepeatedSlot::Enum(rf) => Value::Enum(rf.get(index)?),
            RepeatedSlot::String(rf) => Value::String(rf.slice().get(index)?.as_str()),
            RepeatedSlot::Bytes(rf) => Value::Bytes(rf.slice().get(index)?.as_slice()),
            RepeatedSlot::Message(rf) => {
                Value::Message(DynamicMessageRef::new(self.arena, rf.get(index)?))
            }
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Value<'a, 'alloc>> + 'a {
        let list = *self;
        (0..list.len()).filter_map(move |i| list.get(i))
    }

    pub fn is_frozen(&self) -> bool {
        self.slot.is_some_and(|s| s.is_frozen())
    }
}

impl core::fmt::Debug for ListRef<'_, '_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Contents of a map field, in insertion order.
#[derive(Clone, Copy)]
pub struct MapRef<'a, 'alloc> {
    arena: &'a Arena<'alloc>,
    map: Option<&'a MapField>,
}

impl<'a, 'alloc> MapRef<'a, 'alloc> {
    pub fn len(&self) -> usize {
        self.map.map_or(0, |m| m.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &Value<'_, '_>) -> Option<Value<'a, 'alloc>> {
        let map: &'a MapField = self.map?;
        let entry = find_entry(map, key)?;
        Some(scalar_value(self.arena, &entry.value))
    }

    pub fn contains_key(&self, key: &Value<'_, '_>) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Value<'a, 'alloc>, Value<'a, 'alloc>)> + 'a {
        let arena = self.arena;
        self.map
            .into_iter()
            .flat_map(|m| m.entries().iter())
            .map(move |e| (key_value(&e.key), scalar_value(arena, &e.value)))
    }

    /// Entries ordered by key.
    pub fn sorted(&self) -> Vec<(Value<'a, 'alloc>, Value<'a, 'alloc>)> {
        let Some(map) = self.map else {
            return Vec::new();
        };
        let mut entries: Vec<_> = map.entries().iter().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
            .into_iter()
            .map(|e| (key_value(&e.key), scalar_value(self.arena, &e.value)))
            .collect()
    }
}

impl core::fmt::Debug for MapRef<'_, '_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Mutable view of a message.
pub struct DynamicMessage<'a, 'alloc> {
    arena: &'a mut Arena<'alloc>,
    msg: Message,
}

impl<'a, 'alloc> DynamicMessage<'a, 'alloc> {
    /// `msg` must be a valid handle of `arena`.
    pub(crate) fn new(arena: &'a mut Arena<'alloc>, msg: Message) -> Self {
        DynamicMessage { arena, msg }
    }

    pub fn as_ref(&self) -> DynamicMessageRef<'_, 'alloc> {
        DynamicMessageRef::new(&*self.arena, self.msg)
    }

    pub fn into_ref(self) -> DynamicMessageRef<'a, 'alloc> {
        DynamicMessageRef::new(self.arena, self.msg)
    }

    pub fn reborrow(&mut self) -> DynamicMessage<'_, 'alloc> {
        DynamicMessage::new(&mut *self.arena, self.msg)
    }

    pub fn arena(&mut self) -> &mut Arena<'alloc> {
        self.arena
    }

    pub fn handle(&self) -> Message {
        self.msg
    }

    pub fn descriptor(&self) -> MessageDescriptor {
        self.object().descriptor.clone()
    }

    fn object(&self) -> &Object {
        &self.arena.objects[self.msg.slot() as usize]
    }

    fn object_mut(&mut self) -> &mut Object {
        &mut self.arena.objects[self.msg.slot() as usize]
    }

    fn mutable_object(&mut self) -> Result<&mut Object> {
        let object = self.object_mut();
        object.check_mutable()?;
        Ok(object)
    }

    fn local(&self, field: &FieldDescriptor) -> Result<FieldDescriptor> {
        local_field(&self.object().descriptor, field)
    }

    fn field_named(&self, name: &str) -> Result<FieldDescriptor> {
        self.as_ref().field_named(name)
    }

    pub fn get(&self, field: &FieldDescriptor) -> Result<Option<Value<'_, 'alloc>>> {
        self.as_ref().get(field)
    }

    pub fn has(&self, field: &FieldDescriptor) -> Result<bool> {
        self.as_ref().has(field)
    }

    pub fn which_oneof(&self, oneof: &OneofDescriptor) -> Result<Option<FieldDescriptor>> {
        self.as_ref().which_oneof(oneof)
    }

    /// Stores `value` in a singular field and marks it present. Setting a
    /// oneof member clears the member that was set before.
    pub fn set(&mut self, field: &FieldDescriptor, value: Value<'_, '_>) -> Result<()> {
        let local = self.local(field)?;
        if local.is_repeated() {
            return Err(Error::TypeMismatch(format!(
                "{} is repeated; use list_mut or map_mut",
                local.full_name()
            )));
        }
        self.mutable_object()?;
        let scalar = to_scalar(&local, &value, &mut self.arena.bump)?;
        self.object_mut().set_singular(&local, scalar);
        Ok(())
    }

    pub fn set_by_name(&mut self, name: &str, value: Value<'_, '_>) -> Result<()> {
        let field = self.field_named(name)?;
        self.set(&field, value)
    }

    /// Stores a sub-message of this arena in a singular message field.
    pub fn set_message(&mut self, field: &FieldDescriptor, child: Message) -> Result<()> {
        let local = self.local(field)?;
        if local.is_repeated() {
            return Err(Error::TypeMismatch(format!("{} is repeated", local.full_name())));
        }
        check_message_type(self.arena, &local, child)?;
        self.mutable_object()?.set_singular(&local, Scalar::Message(child));
        Ok(())
    }

    /// Sub-message of a singular message field, created empty when unset.
    pub fn mutable_message(&mut self, field: &FieldDescriptor) -> Result<Message> {
        let local = self.local(field)?;
        let child_type = match local.message_type() {
            Some(t) if !local.is_repeated() => t,
            _ => {
                return Err(Error::TypeMismatch(format!(
                    "{} is not a singular message field",
                    local.full_name()
                )));
            }
        };
        if let Some(FieldSlot::Singular(Scalar::Message(child))) = self.mutable_object()?.slot(&local) {
            return Ok(*child);
        }
        let child = self.arena.new_message(&child_type);
        self.object_mut().set_singular(&local, Scalar::Message(child));
        Ok(child)
    }

    pub fn child_mut(&mut self, field: &FieldDescriptor) -> Result<DynamicMessage<'_, 'alloc>> {
        let child = self.mutable_message(field)?;
        Ok(DynamicMessage::new(&mut *self.arena, child))
    }

    pub fn child_mut_by_name(&mut self, name: &str) -> Result<DynamicMessage<'_, 'alloc>> {
        let field = self.field_named(name)?;
        self.child_mut(&field)
    }

    /// Resets `field` to unset. A oneof's case is cleared only if `field`
    /// was its active member.
    pub fn clear(&mut self, field: &FieldDescriptor) -> Result<()> {
        let local = self.local(field)?;
        self.mutable_object()?.clear_field(&local);
        Ok(())
    }

    pub fn clear_by_name(&mut self, name: &str) -> Result<()> {
        let field = self.field_named(name)?;
        self.clear(&field)
    }

    /// Clears every field, extension and unknown field.
    pub fn clear_all(&mut self) -> Result<()> {
        let object = self.mutable_object()?;
        *object = Object::new(object.descriptor.clone());
        Ok(())
    }

    pub fn list_mut(&mut self, field: &FieldDescriptor) -> Result<RepeatedMut<'_, 'alloc>> {
        let local = self.local(field)?;
        if !local.is_repeated() || local.is_map() {
            return Err(Error::TypeMismatch(format!("{} is not a repeated field", local.full_name())));
        }
        let slot = self.mutable_object()?.slot_mut(&local);
        if matches!(slot, FieldSlot::Empty) {
            *slot = FieldSlot::Repeated(RepeatedSlot::for_type(local.field_type()));
        }
        Ok(RepeatedMut {
            arena: &mut *self.arena,
            msg: self.msg,
            field: local,
        })
    }

    pub fn list_mut_by_name(&mut self, name: &str) -> Result<RepeatedMut<'_, 'alloc>> {
        let field = self.field_named(name)?;
        self.list_mut(&field)
    }

    pub fn map_mut(&mut self, field: &FieldDescriptor) -> Result<MapMut<'_, 'alloc>> {
        let local = self.local(field)?;
        let entry = local.message_type().filter(|_| local.is_map()).ok_or_else(|| {
            Error::TypeMismatch(format!("{} is not a map field", local.full_name()))
        })?;
        let (key_field, value_field) = entry
            .map_entry_key_field()
            .zip(entry.map_entry_value_field())
            .ok_or_else(|| Error::InvalidDescriptor(entry.full_name().to_string()))?;
        let slot = self.mutable_object()?.slot_mut(&local);
        if matches!(slot, FieldSlot::Empty) {
            *slot = FieldSlot::Map(MapField::new());
        }
        Ok(MapMut {
            arena: &mut *self.arena,
            msg: self.msg,
            field: local,
            key_field,
            value_field,
        })
    }

    pub fn map_mut_by_name(&mut self, name: &str) -> Result<MapMut<'_, 'alloc>> {
        let field = self.field_named(name)?;
        self.map_mut(&field)
    }

    pub fn unknown_fields_mut(&mut self) -> Result<&mut UnknownFieldSet> {
        Ok(&mut self.mutable_object()?.unknown)
    }

    /// Drops unknown fields of this message and of every sub-message
    /// reachable from it.
    pub fn discard_unknown_fields(&mut self) -> Result<()> {
        let mut stack = vec![self.msg];
        let mut seen = HashSet::new();
        while let Some(msg) = stack.pop() {
            if !seen.insert(msg) {
                continue;
            }
            let object = self.arena.object_mut(msg)?;
            if !object.unknown.is_empty() {
                object.check_mutable()?;
                object.unknown.clear();
            }
            for slot in object.fields.iter().chain(object.extensions.values().map(|e| &e.slot)) {
                push_children(slot, &mut stack);
            }
        }
        Ok(())
    }

    /// Rejects further mutation of this message and its own containers.
    pub fn freeze(&mut self) {
        self.object_mut().freeze();
    }

    /// Checks required fields, then freezes the message.
    pub fn build(&mut self) -> Result<Message> {
        self.as_ref().check_initialized()?;
        self.freeze();
        Ok(self.msg)
    }

    /// Freezes the message without checking required fields.
    pub fn build_partial(&mut self) -> Message {
        self.freeze();
        self.msg
    }

    /// Deep copy of this message graph within the same arena. The copy is
    /// not frozen.
    pub fn duplicate(&mut self) -> Result<Message> {
        let arena = &mut *self.arena;
        let id = arena.id();
        let base = arena.objects.len() as u32;
        let mut copier = GraphCopier::new(&arena.objects, id, id, base);
        let copy = copier.copy(self.msg, &mut arena.bump)?;
        let objects = copier.finish();
        arena.objects.extend(objects);
        Ok(copy)
    }

    /// Copies `src` from another arena into `field`, fusing the arenas so
    /// payloads shared by the copy outlive `src_arena`. Repeated fields get
    /// the copy appended. Returns the handle of the copy.
    pub fn attach_message(
        &mut self,
        field: &FieldDescriptor,
        src_arena: &Arena<'alloc>,
        src: Message,
    ) -> Result<Message> {
        let local = self.local(field)?;
        check_message_type(src_arena, &local, src)?;
        self.mutable_object()?;
        self.arena.fuse(src_arena);

        let dst = self.arena.id();
        let base = self.arena.objects.len() as u32;
        let mut copier = GraphCopier::new(&src_arena.objects, src_arena.id(), dst, base);
        let copy = copier.copy(src, &mut self.arena.bump)?;
        self.arena.objects.extend(copier.finish());

        if local.is_repeated() {
            self.list_mut(&local)?.push_message(copy)?;
        } else {
            self.object_mut().set_singular(&local, Scalar::Message(copy));
        }
        Ok(copy)
    }

    /// Merges `other` into this message: scalars overwrite, repeated fields
    /// append, sub-messages merge recursively. `other` may live in any arena.
    pub fn merge_from(&mut self, other: DynamicMessageRef<'_, '_>) -> Result<()> {
        if *other.descriptor() != self.object().descriptor {
            return Err(Error::TypeMismatch(format!(
                "cannot merge {} into {}",
                other.descriptor().full_name(),
                self.object().descriptor.full_name()
            )));
        }
        let bytes = other.encode_partial_vec()?;
        let registry = extensions_in_graph(other)?;
        let options = DecodeOptions::default().with_extensions(&registry);
        self.merge_from_bytes_with(&bytes, &options)
    }

    /// Merges another message of the same arena into this one.
    pub fn merge_from_message(&mut self, other: Message) -> Result<()> {
        let other_ref = self.arena.message(other)?;
        if *other_ref.descriptor() != self.object().descriptor {
            return Err(Error::TypeMismatch(format!(
                "cannot merge {} into {}",
                other_ref.descriptor().full_name(),
                self.object().descriptor.full_name()
            )));
        }
        let bytes = other_ref.encode_partial_vec()?;
        let registry = extensions_in_graph(other_ref)?;
        let options = DecodeOptions::default().with_extensions(&registry);
        self.merge_from_bytes_with(&bytes, &options)
    }

    pub fn merge_from_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.merge_from_bytes_with(bytes, &DecodeOptions::default())
    }

    pub fn merge_from_bytes_with(&mut self, bytes: &[u8], options: &DecodeOptions<'_>) -> Result<()> {
        decoding::merge(&mut *self.arena, self.msg, bytes, options)
    }

    /// Merges one length-prefixed message from the front of `input` and
    /// returns the number of bytes consumed.
    pub fn merge_length_delimited(&mut self, input: &[u8], options: &DecodeOptions<'_>) -> Result<usize> {
        decoding::merge_length_delimited(&mut *self.arena, self.msg, input, options)
    }

    pub fn encode_vec(&self) -> Result<Vec<u8>> {
        self.as_ref().encode_vec()
    }

    pub fn encode_partial_vec(&self) -> Result<Vec<u8>> {
        self.as_ref().encode_partial_vec()
    }
}

impl core::fmt::Debug for DynamicMessage<'_, '_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.as_ref().fmt(f)
    }
}

// Extension descriptors attached anywhere in the graph rooted at `root`.
fn extensions_in_graph(root: DynamicMessageRef<'_, '_>) -> Result<ExtensionRegistry> {
    let mut registry = ExtensionRegistry::new();
    let mut stack = vec![root.handle()];
    let mut seen = HashSet::new();
    while let Some(msg) = stack.pop() {
        if !seen.insert(msg) {
            continue;
        }
        let object = root.arena().object(msg)?;
        for ext in object.extensions.values() {
            registry.register(ext.field.clone())?;
        }
        for slot in object.fields.iter().chain(object.extensions.values().map(|e| &e.slot)) {
            push_children(slot, &mut stack);
        }
    }
    Ok(registry)
}

fn repeated_parts<'x, 'alloc>(
    arena: &'x mut Arena<'alloc>,
    msg: Message,
    field: &FieldDescriptor,
) -> Result<(&'x mut RepeatedSlot, &'x mut Bump<'alloc>)> {
    let object = &mut arena.objects[msg.slot() as usize];
    object.check_mutable()?;
    let slot = object.slot_mut(field);
    if matches!(slot, FieldSlot::Empty) {
        *slot = FieldSlot::Repeated(RepeatedSlot::for_type(field.field_type()));
    }
    match slot {
        FieldSlot::Repeated(r) => Ok((r, &mut arena.bump)),
        _ => Err(Error::TypeMismatch(format!("{} is not a repeated field", field.full_name()))),
    }
}

/// Mutable view of a repeated field.
pub struct RepeatedMut<'a, 'alloc> {
    arena: &'a mut Arena<'alloc>,
    msg: Message,
    field: FieldDescriptor,
}

impl<'a, 'alloc> RepeatedMut<'a, 'alloc> {
    fn as_list(&self) -> ListRef<'_, 'alloc> {
        let object = &self.arena.objects[self.msg.slot() as usize];
        let slot = match object.slot(&self.field) {
            Some(FieldSlot::Repeated(r)) => Some(r),
            _ => None,
        };
        ListRef {
            arena: &*self.arena,
            slot,
        }
    }

    pub fn len(&self) -> usize {
        self.as_list().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Value<'_, 'alloc>> {
        self.as_list().get(index)
    }

    pub fn push(&mut self, value: Value<'_, '_>) -> Result<()> {
        let (slot, bump) = repeated_parts(&mut *self.arena, self.msg, &self.field)?;
        let scalar = to_scalar(&self.field, &value, bump)?;
        slot.push(scalar, bump)
    }

    pub fn set(&mut self, index: usize, value: Value<'_, '_>) -> Result<()> {
        let (slot, bump) = repeated_parts(&mut *self.arena, self.msg, &self.field)?;
        let len = slot.len();
        if index >= len {
            return Err(Error::IndexOutOfBounds { index, len });
        }
        let scalar = to_scalar(&self.field, &value, bump)?;
        slot.set(index, scalar)
    }

    pub fn remove(&mut self, index: usize) -> Result<()> {
        let (slot, _) = repeated_parts(&mut *self.arena, self.msg, &self.field)?;
        slot.remove(index)
    }

    pub fn clear(&mut self) -> Result<()> {
        let (slot, _) = repeated_parts(&mut *self.arena, self.msg, &self.field)?;
        slot.clear()
    }

    /// Appends an existing message of this arena.
    pub fn push_message(&mut self, child: Message) -> Result<()> {
        check_message_type(self.arena, &self.field, child)?;
        let (slot, bump) = repeated_parts(&mut *self.arena, self.msg, &self.field)?;
        slot.push(Scalar::Message(child), bump)
    }

    /// Appends a new empty message and returns its handle.
    pub fn add_message(&mut self) -> Result<Message> {
        let child_type = self.field.message_type().ok_or_else(|| {
            Error::TypeMismatch(format!("{} is not a message field", self.field.full_name()))
        })?;
        repeated_parts(&mut *self.arena, self.msg, &self.field)?;
        let child = self.arena.new_message(&child_type);
        let (slot, bump) = repeated_parts(&mut *self.arena, self.msg, &self.field)?;
        slot.push(Scalar::Message(child), bump)?;
        Ok(child)
    }

    pub fn add_message_mut(&mut self) -> Result<DynamicMessage<'_, 'alloc>> {
        let child = self.add_message()?;
        Ok(DynamicMessage::new(&mut *self.arena, child))
    }

    pub fn message_mut(&mut self, index: usize) -> Result<DynamicMessage<'_, 'alloc>> {
        let len = self.len();
        let child = self
            .as_list()
            .get(index)
            .and_then(|v| v.as_message())
            .map(|m| m.handle())
            .ok_or(Error::IndexOutOfBounds { index, len })?;
        Ok(DynamicMessage::new(&mut *self.arena, child))
    }

    /// Freezes this container only.
    pub fn freeze(&mut self) -> Result<()> {
        let object = &mut self.arena.objects[self.msg.slot() as usize];
        if let FieldSlot::Repeated(r) = object.slot_mut(&self.field) {
            r.freeze();
        }
        Ok(())
    }
}

fn map_parts<'x, 'alloc>(
    arena: &'x mut Arena<'alloc>,
    msg: Message,
    field: &FieldDescriptor,
) -> Result<(&'x mut MapField, &'x mut Bump<'alloc>)> {
    let object = &mut arena.objects[msg.slot() as usize];
    object.check_mutable()?;
    let slot = object.slot_mut(field);
    if matches!(slot, FieldSlot::Empty) {
        *slot = FieldSlot::Map(MapField::new());
    }
    match slot {
        FieldSlot::Map(m) => Ok((m, &mut arena.bump)),
        _ => Err(Error::TypeMismatch(format!("{} is not a map field", field.full_name()))),
    }
}

/// Mutable view of a map field.
pub struct MapMut<'a, 'alloc> {
    arena: &'a mut Arena<'alloc>,
    msg: Message,
    field: FieldDescriptor,
    key_field: FieldDescriptor,
    value_field: FieldDescriptor,
}

impl<'a, 'alloc> MapMut<'a, 'alloc> {
    fn as_map(&self) -> MapRef<'_, 'alloc> {
        let object = &self.arena.objects[self.msg.slot() as usize];
        let map = match object.slot(&self.field) {
            Some(FieldSlot::Map(m)) => Some(m),
            _ => None,
        };
        MapRef {
            arena: &*self.arena,
            map,
        }
    }

    pub fn len(&self) -> usize {
        self.as_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &Value<'_, '_>) -> Option<Value<'_, 'alloc>> {
        self.as_map().get(key)
    }

    /// Inserts or replaces the value under `key`.
    pub fn insert(&mut self, key: Value<'_, '_>, value: Value<'_, '_>) -> Result<()> {
        let (map, bump) = map_parts(&mut *self.arena, self.msg, &self.field)?;
        let key = to_map_key(&self.key_field, &key, bump)?;
        let value = to_scalar(&self.value_field, &value, bump)?;
        map.insert(key, value, bump)?;
        Ok(())
    }

    /// Returns whether an entry was removed.
    pub fn remove(&mut self, key: &Value<'_, '_>) -> Result<bool> {
        let (map, _) = map_parts(&mut *self.arena, self.msg, &self.field)?;
        let stored = find_entry(map, key).map(|e| e.key);
        match stored {
            Some(k) => Ok(map.remove(&k)?.is_some()),
            None => Ok(false),
        }
    }

    pub fn clear(&mut self) -> Result<()> {
        let (map, _) = map_parts(&mut *self.arena, self.msg, &self.field)?;
        map.clear()
    }

    /// Message value under `key`, inserted empty when absent.
    pub fn entry_message(&mut self, key: Value<'_, '_>) -> Result<Message> {
        let child_type = self.value_field.message_type().ok_or_else(|| {
            Error::TypeMismatch(format!("{} does not hold messages", self.field.full_name()))
        })?;
        let (map, _) = map_parts(&mut *self.arena, self.msg, &self.field)?;
        let existing = find_entry(map, &key).and_then(|e| e.value.as_message());
        if let Some(child) = existing {
            return Ok(child);
        }
        let child = self.arena.new_message(&child_type);
        let (map, bump) = map_parts(&mut *self.arena, self.msg, &self.field)?;
        let key = to_map_key(&self.key_field, &key, bump)?;
        map.insert(key, Scalar::Message(child), bump)?;
        Ok(child)
    }

    pub fn entry_mut(&mut self, key: Value<'_, '_>) -> Result<DynamicMessage<'_, 'alloc>> {
        let child = self.entry_message(key)?;
        Ok(DynamicMessage::new(&mut *self.arena, child))
    }

    /// Freezes this container only.
    pub fn freeze(&mut self) -> Result<()> {
        let object = &mut self.arena.objects[self.msg.slot() as usize];
        if let FieldSlot::Map(m) = object.slot_mut(&self.field) {
            m.freeze();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor_pool::DescriptorPool;
    use crate::descriptor_proto::{
        DescriptorProto as Msg, EnumDescriptorProto, FieldDescriptorProto as Field,
        FileDescriptorProto, Label,
    };
    use crate::Global;
    use pretty_assertions::assert_eq;

    use FieldType as T;
    use Label::{Optional as Opt, Repeated as Rep, Required as Req};

    fn pool() -> DescriptorPool {
        let mut pool = DescriptorPool::new();
        pool.add_file_descriptor_proto(
            FileDescriptorProto::new("r.proto", "r", "proto2")
                .with_enum(EnumDescriptorProto::new("Mood", &[("HAPPY", 1), ("SAD", 2)]))
                .with_message(
                    Msg::new("Leaf")
                        .with_field(Field::new("id", 1, Req, T::Int32))
                        .with_field(Field::new("note", 2, Opt, T::String).with_default("none")),
                )
                .with_message(
                    Msg::new("Tree")
                        .with_field(Field::new("mood", 1, Opt, T::Enum).with_type_name("Mood"))
                        .with_field(Field::new("leaf", 2, Opt, T::Message).with_type_name("Leaf"))
                        .with_field(Field::new("leaves", 3, Rep, T::Message).with_type_name("Leaf"))
                        .with_field(Field::new("count", 4, Opt, T::Int64).with_oneof_index(0))
                        .with_field(Field::new("label", 5, Opt, T::String).with_oneof_index(0))
                        .with_field(Field::new("tags", 6, Rep, T::String))
                        .with_oneof("choice"),
                ),
        )
        .unwrap();
        pool
    }

    #[test]
    fn defaults_and_presence() {
        let pool = pool();
        let mut arena = Arena::new(&Global);
        let leaf = pool.new_message("r.Leaf", &mut arena).unwrap();
        let view = arena.message(leaf).unwrap();
        assert_eq!(view.get_by_name("note").unwrap(), Some(Value::String("none")));
        assert_eq!(view.get_by_name("id").unwrap(), Some(Value::Int32(0)));
        assert!(!view.has_by_name("note").unwrap());

        let tree = pool.new_message("r.Tree", &mut arena).unwrap();
        let view = arena.message(tree).unwrap();
        assert_eq!(view.get_by_name("mood").unwrap(), Some(Value::Enum(1)));
        assert_eq!(view.get_by_name("leaf").unwrap(), None);
        assert!(matches!(
            view.has_by_name("tags"),
            Err(Error::NoPresenceTracking { .. })
        ));
        assert!(matches!(
            view.get_by_name("nope"),
            Err(Error::UnknownFieldName(_))
        ));
    }

    #[test]
    fn set_type_checks() {
        let pool = pool();
        let mut arena = Arena::new(&Global);
        let tree = pool.new_message("r.Tree", &mut arena).unwrap();
        let mut msg = arena.message_mut(tree).unwrap();
        assert!(matches!(
            msg.set_by_name("count", Value::String("x")),
            Err(Error::TypeMismatch(_))
        ));
        // Closed enum rejects undeclared numbers.
        assert!(matches!(
            msg.set_by_name("mood", Value::Enum(9)),
            Err(Error::TypeMismatch(_))
        ));
        msg.set_by_name("mood", Value::Int32(2)).unwrap();
        assert_eq!(msg.as_ref().get_by_name("mood").unwrap(), Some(Value::Enum(2)));

        let leaf_field = pool.find_message_by_name("r.Leaf").unwrap().field(0).unwrap();
        assert!(matches!(
            msg.set(&leaf_field, Value::Int32(1)),
            Err(Error::TypeMismatch(_))
        ));
    }

    #[test]
    fn oneof_members_are_exclusive() {
        let pool = pool();
        let tree_type = pool.find_message_by_name("r.Tree").unwrap();
        let count = tree_type.field_by_name("count").unwrap();
        let label = tree_type.field_by_name("label").unwrap();
        let choice = tree_type.oneof_by_name("choice").unwrap();

        let mut arena = Arena::new(&Global);
        let tree = arena.new_message(&tree_type);
        let mut msg = arena.message_mut(tree).unwrap();
        msg.set(&count, Value::Int64(3)).unwrap();
        msg.set(&label, Value::String("x")).unwrap();
        assert!(!msg.has(&count).unwrap());
        assert!(msg.has(&label).unwrap());
        assert_eq!(msg.which_oneof(&choice).unwrap(), Some(label.clone()));

        msg.clear(&count).unwrap();
        assert_eq!(msg.which_oneof(&choice).unwrap(), Some(label.clone()));
        msg.clear(&label).unwrap();
        assert_eq!(msg.which_oneof(&choice).unwrap(), None);
    }

    #[test]
    fn repeated_fields_and_sub_messages() {
        let pool = pool();
        let mut arena = Arena::new(&Global);
        let tree = pool.new_message("r.Tree", &mut arena).unwrap();
        let mut msg = arena.message_mut(tree).unwrap();
        {
            let mut tags = msg.list_mut_by_name("tags").unwrap();
            tags.push(Value::String("a")).unwrap();
            tags.push(Value::String("b")).unwrap();
            tags.set(0, Value::String("z")).unwrap();
            assert_eq!(tags.len(), 2);
            assert!(matches!(tags.push(Value::Int32(1)), Err(Error::TypeMismatch(_))));
        }
        {
            let mut leaves = msg.list_mut_by_name("leaves").unwrap();
            leaves.add_message_mut().unwrap().set_by_name("id", Value::Int32(1)).unwrap();
            leaves.add_message().unwrap();
        }
        msg.child_mut_by_name("leaf").unwrap().set_by_name("id", Value::Int32(5)).unwrap();

        let view = arena.message(tree).unwrap();
        let tags = view.get_by_name("tags").unwrap().unwrap().as_list().unwrap();
        assert_eq!(tags.iter().collect::<Vec<_>>(), vec![Value::String("z"), Value::String("b")]);
        let leaf = view.get_by_name("leaf").unwrap().unwrap().as_message().unwrap();
        assert_eq!(leaf.get_by_name("id").unwrap(), Some(Value::Int32(5)));
        assert_eq!(
            view.find_initialization_errors(),
            vec!["leaves[1].id".to_string()]
        );
    }

    #[test]
    fn build_freezes_and_checks_required() {
        let pool = pool();
        let mut arena = Arena::new(&Global);
        let leaf = pool.new_message("r.Leaf", &mut arena).unwrap();
        let mut msg = arena.message_mut(leaf).unwrap();
        assert_eq!(
            msg.build(),
            Err(Error::MissingRequired {
                message: "r.Leaf".to_string(),
                missing_paths: vec!["id".to_string()],
            })
        );
        msg.set_by_name("id", Value::Int32(1)).unwrap();
        assert_eq!(msg.build(), Ok(leaf));
        assert_eq!(msg.set_by_name("id", Value::Int32(2)), Err(Error::Frozen));
        assert!(arena.message(leaf).unwrap().is_frozen());
    }

    #[test]
    fn duplicate_is_deep_and_unfrozen() {
        let pool = pool();
        let mut arena = Arena::new(&Global);
        let tree = pool.new_message("r.Tree", &mut arena).unwrap();
        let mut msg = arena.message_mut(tree).unwrap();
        msg.child_mut_by_name("leaf").unwrap().set_by_name("id", Value::Int32(5)).unwrap();
        msg.build_partial();
        let copy = msg.duplicate().unwrap();

        let mut copy_msg = arena.message_mut(copy).unwrap();
        copy_msg.child_mut_by_name("leaf").unwrap().set_by_name("id", Value::Int32(6)).unwrap();
        let original = arena.message(tree).unwrap();
        let leaf = original.get_by_name("leaf").unwrap().unwrap().as_message().unwrap();
        assert_eq!(leaf.get_by_name("id").unwrap(), Some(Value::Int32(5)));
    }

    #[test]
    fn attach_message_fuses_arenas() {
        let pool = pool();
        let mut dst = Arena::new(&Global);
        let tree = pool.new_message("r.Tree", &mut dst).unwrap();
        let leaves = pool.find_message_by_name("r.Tree").unwrap().field_by_name("leaves").unwrap();
        {
            let mut src = Arena::new(&Global);
            let leaf = pool.new_message("r.Leaf", &mut src).unwrap();
            src.message_mut(leaf).unwrap().set_by_name("note", Value::String("kept")).unwrap();
            let mut msg = dst.message_mut(tree).unwrap();
            msg.attach_message(&leaves, &src, leaf).unwrap();
            assert!(dst.is_fused_with(&src));
        }
        let view = dst.message(tree).unwrap();
        let leaf = view.list(&leaves).unwrap().get(0).unwrap().as_message().unwrap();
        assert_eq!(leaf.get_by_name("note").unwrap(), Some(Value::String("kept")));
    }

    #[test]
    fn cross_arena_handles_are_rejected() {
        let pool = pool();
        let mut a = Arena::new(&Global);
        let mut b = Arena::new(&Global);
        let tree = pool.new_message("r.Tree", &mut a).unwrap();
        let leaf = pool.new_message("r.Leaf", &mut b).unwrap();
        let leaf_field = pool.find_message_by_name("r.Tree").unwrap().field_by_name("leaf").unwrap();
        assert!(matches!(
            a.message_mut(tree).unwrap().set_message(&leaf_field, leaf),
            Err(Error::TypeMismatch(_))
        ));
        assert!(matches!(a.message(leaf), Err(Error::TypeMismatch(_))));
    }
}

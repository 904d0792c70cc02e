//! Message storage.
//!
//! A message is an [`Object`] in its arena's slot table, addressed by a
//! [`Message`] handle of `(arena id, slot)`. Handle identity is plain value
//! equality; there is no pointer identity to preserve.
//!
//! Field values are closed variants: [`Scalar`] for a singular value (the
//! same type is used for map values), [`RepeatedSlot`] for a typed repeated
//! container and [`FieldSlot`] for whatever a field currently holds.

use std::collections::{BTreeMap, HashMap};

use crate::arena::{ArenaId, Bump};
use crate::containers::{Bytes, MapField, RepeatedField, String};
use crate::descriptor_pool::{FieldDescriptor, MessageDescriptor};
use crate::descriptor_proto::FieldType;
use crate::unknown::UnknownFieldSet;
use crate::{Error, Result};

/// Handle to a message object inside an [`Arena`](crate::Arena).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Message {
    arena: ArenaId,
    slot: u32,
}

impl Message {
    pub(crate) const fn new(arena: ArenaId, slot: u32) -> Self {
        Message { arena, slot }
    }

    pub const fn arena(&self) -> ArenaId {
        self.arena
    }

    pub const fn slot(&self) -> u32 {
        self.slot
    }
}

/// Implemented by generated message types.
///
/// A generated type is a `#[repr(transparent)]` wrapper of a [`Message`]
/// handle; its accessors go through the reflection runtime, so a message
/// built through generated code reads back identically through
/// [`DynamicMessageRef`](crate::DynamicMessageRef) and vice versa.
pub trait Protobuf: Copy {
    /// Fully-qualified protobuf name, e.g. `pkg.Outer.Inner`.
    const FULL_NAME: &'static str;

    fn descriptor() -> Result<MessageDescriptor>;

    /// Wraps `msg` without checking its type.
    fn from_message_unchecked(msg: Message) -> Self;

    fn as_message(&self) -> Message;
}

/// Stored form of one singular value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    Enum(i32),
    String(String),
    Bytes(Bytes),
    Message(Message),
}

impl Scalar {
    /// Whether a value of this shape may be stored in a field of `field_type`.
    pub fn fits(&self, field_type: FieldType) -> bool {
        use FieldType as T;
        matches!(
            (self, field_type),
            (Scalar::Bool(_), T::Bool)
                | (Scalar::Int32(_), T::Int32 | T::SInt32 | T::SFixed32)
                | (Scalar::Int64(_), T::Int64 | T::SInt64 | T::SFixed64)
                | (Scalar::UInt32(_), T::UInt32 | T::Fixed32)
                | (Scalar::UInt64(_), T::UInt64 | T::Fixed64)
                | (Scalar::Float(_), T::Float)
                | (Scalar::Double(_), T::Double)
                | (Scalar::Enum(_), T::Enum)
                | (Scalar::String(_), T::String)
                | (Scalar::Bytes(_), T::Bytes)
                | (Scalar::Message(_), T::Message | T::Group)
        )
    }

    pub fn as_message(&self) -> Option<Message> {
        match *self {
            Scalar::Message(m) => Some(m),
            _ => None,
        }
    }
}

/// Typed backing store of a repeated field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RepeatedSlot {
    Bool(RepeatedField<bool>),
    Int32(RepeatedField<i32>),
    Int64(RepeatedField<i64>),
    UInt32(RepeatedField<u32>),
    UInt64(RepeatedField<u64>),
    Float(RepeatedField<f32>),
    Double(RepeatedField<f64>),
    Enum(RepeatedField<i32>),
    String(RepeatedField<String>),
    Bytes(RepeatedField<Bytes>),
    Message(RepeatedField<Message>),
}

macro_rules! with_repeated {
    ($slot:expr, $rf:ident => $body:expr) => {
        match $slot {
            RepeatedSlot::Bool($rf) => $body,
            RepeatedSlot::Int32($rf) => $body,
            RepeatedSlot::Int64($rf) => $body,
            RepeatedSlot::UInt32($rf) => $body,
            RepeatedSlot::UInt64($rf) => $body,
            RepeatedSlot::Float($rf) => $body,
            RepeatedSlot::Double($rf) => $body,
            RepeatedSlot::Enum($rf) => $body,
            RepeatedSlot::String($rf) => $body,
            RepeatedSlot::Bytes($rf) => $body,
            RepeatedSlot::Message($rf) => $body,
        }
    };
}

impl RepeatedSlot {
    pub fn for_type(field_type: FieldType) -> Self {
        use FieldType as T;
        match field_type {
            T::Bool => RepeatedSlot::Bool(RepeatedField::new()),
            T::Int32 | T::SInt32 | T::SFixed32 => RepeatedSlot::Int32(RepeatedField::new()),
            T::Int64 | T::SInt64 | T::SFixed64 => RepeatedSlot::Int64(RepeatedField::new()),
            T::UInt32 | T::Fixed32 => RepeatedSlot::UInt32(RepeatedField::new()),
            T::UInt64 | T::Fixed64 => RepeatedSlot::UInt64(RepeatedField::new()),
            T::Float => RepeatedSlot::Float(RepeatedField::new()),
            T::Double => RepeatedSlot::Double(RepeatedField::new()),
            T::Enum => RepeatedSlot::Enum(RepeatedField::new()),
            T::String => RepeatedSlot::String(RepeatedField::new()),
            T::Bytes => RepeatedSlot::Bytes(RepeatedField::new()),
            T::Message | T::Group => RepeatedSlot::Message(RepeatedField::new()),
        }
    }

    pub fn len(&self) -> usize {
        with_repeated!(self, rf => rf.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_frozen(&self) -> bool {
        with_repeated!(self, rf => rf.is_frozen())
    }

    pub fn freeze(&mut self) {
        with_repeated!(self, rf => rf.freeze())
    }

    pub fn clear(&mut self) -> Result<()> {
        with_repeated!(self, rf => rf.clear())
    }

    pub fn get(&self, index: usize) -> Option<Scalar> {
        Some(match self {
            RepeatedSlot::Bool(rf) => Scalar::Bool(rf.get(index)?),
            RepeatedSlot::Int32(rf) => Scalar::Int32(rf.get(index)?),
            RepeatedSlot::Int64(rf) => Scalar::Int64(rf.get(index)?),
            RepeatedSlot::UInt32(rf) => Scalar::UInt32(rf.get(index)?),
            RepeatedSlot::UInt64(rf) => Scalar::UInt64(rf.get(index)?),
            RepeatedSlot::Float(rf) => Scalar::Float(rf.get(index)?),
            RepeatedSlot::Double(rf) => Scalar::Double(rf.get(index)?),
            RepeatedSlot::Enum(rf) => Scalar::Enum(rf.get(index)?),
            RepeatedSlot::String(rf) => Scalar::String(rf.get(index)?),
            RepeatedSlot::Bytes(rf) => Scalar::Bytes(rf.get(index)?),
            RepeatedSlot::Message(rf) => Scalar::Message(rf.get(index)?),
        })
    }

    pub fn push(&mut self, value: Scalar, arena: &mut Bump<'_>) -> Result<()> {
        match (self, value) {
            (RepeatedSlot::Bool(rf), Scalar::Bool(v)) => rf.push(v, arena),
            (RepeatedSlot::Int32(rf), Scalar::Int32(v)) => rf.push(v, arena),
            (RepeatedSlot::Int64(rf), Scalar::Int64(v)) => rf.push(v, arena),
            (RepeatedSlot::UInt32(rf), Scalar::UInt32(v)) => rf.push(v, arena),
            (RepeatedSlot::UInt64(rf), Scalar::UInt64(v)) => rf.push(v, arena),
            (RepeatedSlot::Float(rf), Scalar::Float(v)) => rf.push(v, arena),
            (RepeatedSlot::Double(rf), Scalar::Double(v)) => rf.push(v, arena),
            (RepeatedSlot::Enum(rf), Scalar::Enum(v)) => rf.push(v, arena),
            (RepeatedSlot::String(rf), Scalar::String(v)) => rf.push(v, arena),
            (RepeatedSlot::Bytes(rf), Scalar::Bytes(v)) => rf.push(v, arena),
            (RepeatedSlot::Message(rf), Scalar::Message(v)) => rf.push(v, arena),
            (slot, value) => Err(mismatch(slot, &value)),
        }
    }

    pub fn set(&mut self, index: usize, value: Scalar) -> Result<()> {
        match (self, value) {
            (RepeatedSlot::Bool(rf), Scalar::Bool(v)) => rf.set(index, v),
            (RepeatedSlot::Int32(rf), Scalar::Int32(v)) => rf.set(index, v),
            (RepeatedSlot::Int64(rf), Scalar::Int64(v)) => rf.set(index, v),
            (RepeatedSlot::UInt32(rf), Scalar::UInt32(v)) => rf.set(index, v),
            (RepeatedSlot::UInt64(rf), Scalar::UInt64(v)) => rf.set(index, v),
            (RepeatedSlot::Float(rf), Scalar::Float(v)) => rf.set(index, v),
            (RepeatedSlot::Double(rf), Scalar::Double(v)) => rf.set(index, v),
            (RepeatedSlot::Enum(rf), Scalar::Enum(v)) => rf.set(index, v),
            (RepeatedSlot::String(rf), Scalar::String(v)) => rf.set(index, v),
            (RepeatedSlot::Bytes(rf), Scalar::Bytes(v)) => rf.set(index, v),
            (RepeatedSlot::Message(rf), Scalar::Message(v)) => rf.set(index, v),
            (slot, value) => Err(mismatch(slot, &value)),
        }
    }

    pub fn remove(&mut self, index: usize) -> Result<()> {
        with_repeated!(self, rf => rf.remove(index).map(|_| ()))
    }

    pub fn clone_in(&self, arena: &mut Bump<'_>) -> Result<Self> {
        Ok(match self {
            RepeatedSlot::Bool(rf) => RepeatedSlot::Bool(rf.clone_in(arena)?),
            RepeatedSlot::Int32(rf) => RepeatedSlot::Int32(rf.clone_in(arena)?),
            RepeatedSlot::Int64(rf) => RepeatedSlot::Int64(rf.clone_in(arena)?),
            RepeatedSlot::UInt32(rf) => RepeatedSlot::UInt32(rf.clone_in(arena)?),
            RepeatedSlot::UInt64(rf) => RepeatedSlot::UInt64(rf.clone_in(arena)?),
            RepeatedSlot::Float(rf) => RepeatedSlot::Float(rf.clone_in(arena)?),
            RepeatedSlot::Double(rf) => RepeatedSlot::Double(rf.clone_in(arena)?),
            RepeatedSlot::Enum(rf) => RepeatedSlot::Enum(rf.clone_in(arena)?),
            RepeatedSlot::String(rf) => RepeatedSlot::String(rf.clone_in(arena)?),
            RepeatedSlot::Bytes(rf) => RepeatedSlot::Bytes(rf.clone_in(arena)?),
            RepeatedSlot::Message(rf) => RepeatedSlot::Message(rf.clone_in(arena)?),
        })
    }
}

fn mismatch(slot: &RepeatedSlot, value: &Scalar) -> Error {
    let kind = with_repeated!(slot, rf => core::any::type_name_of_val(rf));
    Error::TypeMismatch(format!("cannot store {value:?} in {kind}"))
}

/// What a field of an object currently holds.
#[derive(Debug, Clone, Copy, Default)]
pub enum FieldSlot {
    #[default]
    Empty,
    Singular(Scalar),
    Repeated(RepeatedSlot),
    Map(MapField),
}

impl FieldSlot {
    pub fn singular(&self) -> Option<Scalar> {
        match *self {
            FieldSlot::Singular(v) => Some(v),
            _ => None,
        }
    }
}

/// Value of one extension on an object.
#[derive(Debug, Clone)]
pub struct ExtensionSlot {
    pub field: FieldDescriptor,
    pub slot: FieldSlot,
}

/// One message instance.
///
/// `fields` is indexed by the declaration index of each field;
/// `has_bits` by the same index; `oneof_cases` holds the field number of the
/// active member per oneof, 0 when none is set.
#[derive(Debug, Clone)]
pub struct Object {
    pub(crate) descriptor: MessageDescriptor,
    pub(crate) fields: Vec<FieldSlot>,
    pub(crate) has_bits: Vec<u32>,
    pub(crate) oneof_cases: Vec<u32>,
    pub(crate) extensions: BTreeMap<u32, ExtensionSlot>,
    pub(crate) unknown: UnknownFieldSet,
    pub(crate) frozen: bool,
}

impl Object {
    pub(crate) fn new(descriptor: MessageDescriptor) -> Self {
        let num_fields = descriptor.field_count();
        let num_oneofs = descriptor.oneof_count();
        Object {
            descriptor,
            fields: vec![FieldSlot::Empty; num_fields],
            has_bits: vec![0; num_fields.div_ceil(32)],
            oneof_cases: vec![0; num_oneofs],
            extensions: BTreeMap::new(),
            unknown: UnknownFieldSet::new(),
            frozen: false,
        }
    }

    pub fn descriptor(&self) -> &MessageDescriptor {
        &self.descriptor
    }

    pub(crate) fn has_bit(&self, index: usize) -> bool {
        self.has_bits[index / 32] & (1 << (index % 32)) != 0
    }

    pub(crate) fn set_has_bit(&mut self, index: usize) {
        self.has_bits[index / 32] |= 1 << (index % 32);
    }

    pub(crate) fn clear_has_bit(&mut self, index: usize) {
        self.has_bits[index / 32] &= !(1 << (index % 32));
    }

    pub(crate) fn check_mutable(&self) -> Result<()> {
        if self.frozen { Err(Error::Frozen) } else { Ok(()) }
    }

    /// Storage of `field`. Regular fields must come from this object's own
    /// descriptor, so that their declaration index is meaningful here.
    pub(crate) fn slot(&self, field: &FieldDescriptor) -> Option<&FieldSlot> {
        if field.is_extension() {
            self.extensions.get(&field.number()).map(|e| &e.slot)
        } else {
            self.fields.get(field.index())
        }
    }

    pub(crate) fn slot_mut(&mut self, field: &FieldDescriptor) -> &mut FieldSlot {
        if field.is_extension() {
            &mut self
                .extensions
                .entry(field.number())
                .or_insert_with(|| ExtensionSlot {
                    field: field.clone(),
                    slot: FieldSlot::Empty,
                })
                .slot
        } else {
            &mut self.fields[field.index()]
        }
    }

    /// Explicit presence of a singular field.
    pub(crate) fn is_present(&self, field: &FieldDescriptor) -> bool {
        if field.is_extension() {
            self.extensions
                .get(&field.number())
                .is_some_and(|e| !matches!(e.slot, FieldSlot::Empty))
        } else {
            self.has_bit(field.index())
        }
    }

    pub(crate) fn set_singular(&mut self, field: &FieldDescriptor, value: Scalar) {
        if !field.is_extension() {
            self.activate_oneof_member(field);
            self.set_has_bit(field.index());
        }
        *self.slot_mut(field) = FieldSlot::Singular(value);
    }

    pub(crate) fn clear_field(&mut self, field: &FieldDescriptor) {
        if field.is_extension() {
            self.extensions.remove(&field.number());
            return;
        }
        let index = field.index();
        self.fields[index] = FieldSlot::Empty;
        self.clear_has_bit(index);
        if let Some(oneof) = field.containing_oneof() {
            let case = &mut self.oneof_cases[oneof.index()];
            if *case == field.number() {
                *case = 0;
            }
        }
    }

    /// Marks the object and its own containers frozen. Sub-messages are not
    /// affected.
    pub(crate) fn freeze(&mut self) {
        self.frozen = true;
        let slots = self
            .fields
            .iter_mut()
            .chain(self.extensions.values_mut().map(|e| &mut e.slot));
        for slot in slots {
            match slot {
                FieldSlot::Repeated(r) => r.freeze(),
                FieldSlot::Map(m) => m.freeze(),
                FieldSlot::Empty | FieldSlot::Singular(_) => {}
            }
        }
    }

    /// Makes `field` the active member of its oneof, clearing the previous one.
    pub(crate) fn activate_oneof_member(&mut self, field: &FieldDescriptor) {
        let Some(oneof) = field.containing_oneof() else {
            return;
        };
        let case = &mut self.oneof_cases[oneof.index()];
        let previous = *case;
        *case = field.number();
        if previous != 0 && previous != field.number() {
            if let Some(old) = self.descriptor.field_by_number(previous) {
                self.fields[old.index()] = FieldSlot::Empty;
                self.clear_has_bit(old.index());
            }
        }
    }
}

/// Deep copy of a message graph into a destination slot table.
///
/// Shared sub-messages stay shared and cycles are preserved. Repeated and
/// map storage is duplicated into the destination bump; string and bytes
/// payloads are immutable and stay where they are.
pub(crate) struct GraphCopier<'s> {
    src: &'s [Object],
    src_arena: ArenaId,
    dst_arena: ArenaId,
    base: u32,
    out: Vec<Object>,
    memo: HashMap<u32, u32>,
}

impl<'s> GraphCopier<'s> {
    pub(crate) fn new(src: &'s [Object], src_arena: ArenaId, dst_arena: ArenaId, base: u32) -> Self {
        GraphCopier {
            src,
            src_arena,
            dst_arena,
            base,
            out: Vec::new(),
            memo: HashMap::new(),
        }
    }

    pub(crate) fn copy(&mut self, msg: Message, bump: &mut Bump<'_>) -> Result<Message> {
        if msg.arena != self.src_arena || msg.slot as usize >= self.src.len() {
            return Err(Error::TypeMismatch(
                "message handle does not belong to the source arena".to_string(),
            ));
        }
        if let Some(&slot) = self.memo.get(&msg.slot) {
            return Ok(Message::new(self.dst_arena, slot));
        }
        let src_objects: &'s [Object] = self.src;
        let src = &src_objects[msg.slot as usize];
        let new_slot = self.base + self.out.len() as u32;
        self.memo.insert(msg.slot, new_slot);
        let mut copy = src.clone();
        copy.frozen = false;
        self.out.push(copy);

        let mut fields = Vec::with_capacity(src.fields.len());
        for slot in &src.fields {
            fields.push(self.copy_slot(slot, bump)?);
        }
        let mut extensions = BTreeMap::new();
        for (&number, ext) in &src.extensions {
            let slot = self.copy_slot(&ext.slot, bump)?;
            extensions.insert(
                number,
                ExtensionSlot {
                    field: ext.field.clone(),
                    slot,
                },
            );
        }
        let copy = &mut self.out[(new_slot - self.base) as usize];
        copy.fields = fields;
        copy.extensions = extensions;
        Ok(Message::new(self.dst_arena, new_slot))
    }

    fn copy_slot(&mut self, slot: &FieldSlot, bump: &mut Bump<'_>) -> Result<FieldSlot> {
        Ok(match *slot {
            FieldSlot::Empty => FieldSlot::Empty,
            FieldSlot::Singular(Scalar::Message(child)) => {
                FieldSlot::Singular(Scalar::Message(self.copy(child, bump)?))
            }
            FieldSlot::Singular(v) => FieldSlot::Singular(v),
            FieldSlot::Repeated(RepeatedSlot::Message(rf)) => {
                let mut copied = RepeatedField::new();
                copied.reserve(rf.len(), bump)?;
                for &child in rf.iter() {
                    let child = self.copy(child, bump)?;
                    copied.push(child, bump)?;
                }
                FieldSlot::Repeated(RepeatedSlot::Message(copied))
            }
            FieldSlot::Repeated(r) => FieldSlot::Repeated(r.clone_in(bump)?),
            FieldSlot::Map(map) => {
                let mut copied = map.clone_in(bump)?;
                let len = copied.len();
                for i in 0..len {
                    if let Scalar::Message(child) = copied.entries()[i].value {
                        let child = self.copy(child, bump)?;
                        copied.entries_mut()?[i].value = Scalar::Message(child);
                    }
                }
                FieldSlot::Map(copied)
            }
        })
    }

    pub(crate) fn finish(self) -> Vec<Object> {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Arena, Global};

    #[test]
    fn repeated_slot_type_checks() {
        let mut arena = Arena::new(&Global);
        let mut slot = RepeatedSlot::for_type(FieldType::SInt64);
        slot.push(Scalar::Int64(-5), &mut arena).unwrap();
        assert!(matches!(
            slot.push(Scalar::Int32(1), &mut arena),
            Err(Error::TypeMismatch(_))
        ));
        assert_eq!(slot.get(0), Some(Scalar::Int64(-5)));
        assert_eq!(slot.get(1), None);
        slot.freeze();
        assert_eq!(slot.set(0, Scalar::Int64(1)), Err(Error::Frozen));
    }

    #[test]
    fn scalar_fits_field_types() {
        assert!(Scalar::UInt32(1).fits(FieldType::Fixed32));
        assert!(!Scalar::UInt32(1).fits(FieldType::Int32));
        assert!(Scalar::Enum(1).fits(FieldType::Enum));
        assert!(!Scalar::Int32(1).fits(FieldType::Enum));
    }
}

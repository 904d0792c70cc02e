//! Preservation of fields the decoding schema does not know.

use crate::wire::{DEFAULT_RECURSION_LIMIT, ReadCursor, WireType, Writer};
use crate::{Error, Result};

/// Raw payload of one unknown field, keyed by its wire type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnknownValue {
    Varint(u64),
    Fixed32(u32),
    Fixed64(u64),
    LengthDelimited(Vec<u8>),
    Group(UnknownFieldSet),
}

impl UnknownValue {
    pub fn wire_type(&self) -> WireType {
        match self {
            UnknownValue::Varint(_) => WireType::Varint,
            UnknownValue::Fixed32(_) => WireType::Fixed32,
            UnknownValue::Fixed64(_) => WireType::Fixed64,
            UnknownValue::LengthDelimited(_) => WireType::LengthDelimited,
            UnknownValue::Group(_) => WireType::StartGroup,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownField {
    pub number: u32,
    pub value: UnknownValue,
}

/// Ordered multimap from field number to raw values, in wire order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnknownFieldSet {
    fields: Vec<UnknownField>,
}

impl UnknownFieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a whole buffer as unknown fields.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut cursor = ReadCursor::new(bytes, DEFAULT_RECURSION_LIMIT);
        let mut set = UnknownFieldSet::new();
        while !cursor.is_at_end() {
            let (number, wire_type) = cursor.read_tag()?;
            let value = Self::read_value(&mut cursor, number, wire_type)?;
            set.push(number, value);
        }
        Ok(set)
    }

    /// Reads the payload that follows a tag. Groups are read up to and
    /// including their matching end tag.
    pub fn read_value(
        cursor: &mut ReadCursor<'_>,
        number: u32,
        wire_type: WireType,
    ) -> Result<UnknownValue> {
        Ok(match wire_type {
            WireType::Varint => UnknownValue::Varint(cursor.read_varint()?),
            WireType::Fixed64 => UnknownValue::Fixed64(cursor.read_fixed64()?),
            WireType::Fixed32 => UnknownValue::Fixed32(cursor.read_fixed32()?),
            WireType::LengthDelimited => {
                UnknownValue::LengthDelimited(cursor.read_length_delimited()?.to_vec())
            }
            WireType::StartGroup => {
                cursor.enter_group()?;
                let mut group = UnknownFieldSet::new();
                loop {
                    if cursor.is_at_end() {
                        return Err(Error::Malformed("unterminated group"));
                    }
                    let (inner, inner_type) = cursor.read_tag()?;
                    if inner_type == WireType::EndGroup {
                        if inner != number {
                            return Err(Error::Malformed("mismatched end group"));
                        }
                        break;
                    }
                    let value = Self::read_value(cursor, inner, inner_type)?;
                    group.push(inner, value);
                }
                cursor.exit_group();
                UnknownValue::Group(group)
            }
            WireType::EndGroup => return Err(Error::Malformed("unexpected end group")),
        })
    }

    pub fn push(&mut self, number: u32, value: UnknownValue) {
        self.fields.push(UnknownField { number, value });
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> core::slice::Iter<'_, UnknownField> {
        self.fields.iter()
    }

    /// All values recorded for `number`, in wire order.
    pub fn get(&self, number: u32) -> impl Iterator<Item = &UnknownValue> {
        self.fields
            .iter()
            .filter(move |f| f.number == number)
            .map(|f| &f.value)
    }

    pub fn remove(&mut self, number: u32) {
        self.fields.retain(|f| f.number != number);
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }

    pub fn merge_from(&mut self, other: &UnknownFieldSet) {
        self.fields.extend(other.fields.iter().cloned());
    }

    pub fn encode(&self, w: &mut Writer) {
        for field in &self.fields {
            match &field.value {
                UnknownValue::Varint(v) => {
                    w.write_tag(field.number, WireType::Varint);
                    w.write_varint(*v);
                }
                UnknownValue::Fixed32(v) => {
                    w.write_tag(field.number, WireType::Fixed32);
                    w.write_fixed32(*v);
                }
                UnknownValue::Fixed64(v) => {
                    w.write_tag(field.number, WireType::Fixed64);
                    w.write_fixed64(*v);
                }
                UnknownValue::LengthDelimited(bytes) => {
                    w.write_tag(field.number, WireType::LengthDelimited);
                    w.write_length_delimited(bytes);
                }
                UnknownValue::Group(group) => {
                    w.write_tag(field.number, WireType::StartGroup);
                    group.encode(w);
                    w.write_tag(field.number, WireType::EndGroup);
                }
            }
        }
    }

    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.encode(&mut w);
        w.into_inner()
    }
}

impl<'a> IntoIterator for &'a UnknownFieldSet {
    type Item = &'a UnknownField;
    type IntoIter = core::slice::Iter<'a, UnknownField>;
    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

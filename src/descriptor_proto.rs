//! The descriptor interchange schema (`google/protobuf/descriptor.proto`).
//!
//! Only the parts the pool needs are modelled as typed fields. Everything
//! else (options we ignore, source info, editions features) is kept in each
//! struct's `unknown_fields` so a descriptor survives a decode/encode cycle.
//!
//! [`bootstrap_file`] describes these same structs as a schema, which lets
//! the dynamic runtime read descriptor blobs with no typed code at all.

use crate::unknown::UnknownFieldSet;
use crate::wire::{DEFAULT_RECURSION_LIMIT, ReadCursor, WireType, Writer};
use crate::{Error, Result};

/// Declared type of a field (`FieldDescriptorProto.Type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum FieldType {
    Double = 1,
    Float = 2,
    Int64 = 3,
    UInt64 = 4,
    Int32 = 5,
    Fixed64 = 6,
    Fixed32 = 7,
    Bool = 8,
    String = 9,
    Group = 10,
    Message = 11,
    Bytes = 12,
    UInt32 = 13,
    Enum = 14,
    SFixed32 = 15,
    SFixed64 = 16,
    SInt32 = 17,
    SInt64 = 18,
}

impl FieldType {
    pub const fn from_i32(value: i32) -> Option<FieldType> {
        use FieldType as T;
        Some(match value {
            1 => T::Double,
            2 => T::Float,
            3 => T::Int64,
            4 => T::UInt64,
            5 => T::Int32,
            6 => T::Fixed64,
            7 => T::Fixed32,
            8 => T::Bool,
            9 => T::String,
            10 => T::Group,
            11 => T::Message,
            12 => T::Bytes,
            13 => T::UInt32,
            14 => T::Enum,
            15 => T::SFixed32,
            16 => T::SFixed64,
            17 => T::SInt32,
            18 => T::SInt64,
            _ => return None,
        })
    }

    /// Wire type of a single, unpacked value.
    pub const fn wire_type(self) -> WireType {
        use FieldType as T;
        match self {
            T::Int32 | T::Int64 | T::UInt32 | T::UInt64 | T::SInt32 | T::SInt64 | T::Bool
            | T::Enum => WireType::Varint,
            T::Fixed64 | T::SFixed64 | T::Double => WireType::Fixed64,
            T::Fixed32 | T::SFixed32 | T::Float => WireType::Fixed32,
            T::String | T::Bytes | T::Message => WireType::LengthDelimited,
            T::Group => WireType::StartGroup,
        }
    }

    /// Numeric kinds that may use packed encoding when repeated.
    pub const fn is_packable(self) -> bool {
        !matches!(
            self,
            FieldType::String | FieldType::Bytes | FieldType::Message | FieldType::Group
        )
    }

    pub const fn is_message(self) -> bool {
        matches!(self, FieldType::Message | FieldType::Group)
    }

    /// Kinds that encode as 64-bit integers (JSON renders them as strings).
    pub const fn is_64_bit_integer(self) -> bool {
        matches!(
            self,
            FieldType::Int64
                | FieldType::UInt64
                | FieldType::SInt64
                | FieldType::Fixed64
                | FieldType::SFixed64
        )
    }

    /// Kinds allowed as map keys.
    pub const fn is_valid_map_key(self) -> bool {
        !matches!(
            self,
            FieldType::Double
                | FieldType::Float
                | FieldType::Bytes
                | FieldType::Message
                | FieldType::Group
                | FieldType::Enum
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Label {
    Optional = 1,
    Required = 2,
    Repeated = 3,
}

impl Label {
    pub const fn from_i32(value: i32) -> Option<Label> {
        match value {
            1 => Some(Label::Optional),
            2 => Some(Label::Required),
            3 => Some(Label::Repeated),
            _ => None,
        }
    }
}

/// Hand-written codec shared by every descriptor struct.
pub trait Codec: Default + Sized {
    /// Consumes field `number` if it is modelled. Returns `false` to have
    /// the caller keep it as an unknown field.
    fn merge_field(
        &mut self,
        number: u32,
        wire_type: WireType,
        cursor: &mut ReadCursor<'_>,
    ) -> Result<bool>;

    fn encode_fields(&self, w: &mut Writer);

    fn unknown_fields(&self) -> &UnknownFieldSet;

    fn unknown_fields_mut(&mut self) -> &mut UnknownFieldSet;

    fn merge_from_cursor(&mut self, cursor: &mut ReadCursor<'_>) -> Result<()> {
        while !cursor.is_at_end() {
            let (number, wire_type) = cursor.read_tag()?;
            if wire_type == WireType::EndGroup {
                return Err(Error::Malformed("unexpected end group"));
            }
            if !self.merge_field(number, wire_type, cursor)? {
                let value = UnknownFieldSet::read_value(cursor, number, wire_type)?;
                self.unknown_fields_mut().push(number, value);
            }
        }
        Ok(())
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut msg = Self::default();
        msg.merge_from_cursor(&mut ReadCursor::new(bytes, DEFAULT_RECURSION_LIMIT))?;
        Ok(msg)
    }

    fn encode(&self, w: &mut Writer) {
        self.encode_fields(w);
        self.unknown_fields().encode(w);
    }

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.encode(&mut w);
        w.into_inner()
    }
}

fn read_string(cursor: &mut ReadCursor<'_>) -> Result<String> {
    let bytes = cursor.read_length_delimited()?;
    core::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| Error::Malformed("invalid UTF-8 in string field"))
}

fn read_message<T: Codec>(cursor: &mut ReadCursor<'_>) -> Result<T> {
    let payload = cursor.read_length_delimited()?;
    let mut nested = cursor.nested(payload)?;
    let mut msg = T::default();
    msg.merge_from_cursor(&mut nested)?;
    Ok(msg)
}

fn merge_message<T: Codec>(slot: &mut Option<T>, cursor: &mut ReadCursor<'_>) -> Result<()> {
    let payload = cursor.read_length_delimited()?;
    let mut nested = cursor.nested(payload)?;
    slot.get_or_insert_with(T::default)
        .merge_from_cursor(&mut nested)
}

fn read_int32(cursor: &mut ReadCursor<'_>) -> Result<i32> {
    Ok(cursor.read_varint()? as i32)
}

fn read_bool(cursor: &mut ReadCursor<'_>) -> Result<bool> {
    Ok(cursor.read_varint()? != 0)
}

fn put_string(w: &mut Writer, number: u32, value: &str) {
    w.write_tag(number, WireType::LengthDelimited);
    w.write_length_delimited(value.as_bytes());
}

fn put_opt_string(w: &mut Writer, number: u32, value: &Option<String>) {
    if let Some(v) = value {
        put_string(w, number, v);
    }
}

fn put_int32(w: &mut Writer, number: u32, value: i32) {
    w.write_tag(number, WireType::Varint);
    w.write_varint(value as i64 as u64);
}

fn put_opt_int32(w: &mut Writer, number: u32, value: Option<i32>) {
    if let Some(v) = value {
        put_int32(w, number, v);
    }
}

fn put_opt_bool(w: &mut Writer, number: u32, value: Option<bool>) {
    if let Some(v) = value {
        w.write_tag(number, WireType::Varint);
        w.write_varint(v as u64);
    }
}

fn put_message<T: Codec>(w: &mut Writer, number: u32, value: &T) {
    w.write_tag(number, WireType::LengthDelimited);
    w.write_length_delimited(&value.encode_to_vec());
}

fn put_messages<T: Codec>(w: &mut Writer, number: u32, values: &[T]) {
    for v in values {
        put_message(w, number, v);
    }
}

// Reads a repeated int32 in either packed or unpacked form.
fn read_int32s(
    out: &mut Vec<i32>,
    wire_type: WireType,
    cursor: &mut ReadCursor<'_>,
) -> Result<bool> {
    match wire_type {
        WireType::Varint => out.push(read_int32(cursor)?),
        WireType::LengthDelimited => {
            let payload = cursor.read_length_delimited()?;
            let mut packed = cursor.nested(payload)?;
            while !packed.is_at_end() {
                out.push(read_int32(&mut packed)?);
            }
        }
        _ => return Ok(false),
    }
    Ok(true)
}

macro_rules! unknown_accessors {
    () => {
        fn unknown_fields(&self) -> &UnknownFieldSet {
            &self.unknown_fields
        }

        fn unknown_fields_mut(&mut self) -> &mut UnknownFieldSet {
            &mut self.unknown_fields
        }
    };
}

use WireType::{LengthDelimited as LEN, Varint as VARINT};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileDescriptorSet {
    pub file: Vec<FileDescriptorProto>,
    pub unknown_fields: UnknownFieldSet,
}

impl Codec for FileDescriptorSet {
    fn merge_field(&mut self, number: u32, wt: WireType, c: &mut ReadCursor<'_>) -> Result<bool> {
        match (number, wt) {
            (1, LEN) => self.file.push(read_message(c)?),
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn encode_fields(&self, w: &mut Writer) {
        put_messages(w, 1, &self.file);
    }

    unknown_accessors!();
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileDescriptorProto {
    pub name: Option<String>,
    pub package: Option<String>,
    pub dependency: Vec<String>,
    pub message_type: Vec<DescriptorProto>,
    pub enum_type: Vec<EnumDescriptorProto>,
    pub extension: Vec<FieldDescriptorProto>,
    pub public_dependency: Vec<i32>,
    pub weak_dependency: Vec<i32>,
    pub syntax: Option<String>,
    pub unknown_fields: UnknownFieldSet,
}

impl FileDescriptorProto {
    pub fn new(name: &str, package: &str, syntax: &str) -> Self {
        FileDescriptorProto {
            name: Some(name.to_string()),
            package: (!package.is_empty()).then(|| package.to_string()),
            syntax: Some(syntax.to_string()),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    pub fn package(&self) -> &str {
        self.package.as_deref().unwrap_or("")
    }

    pub fn with_dependency(mut self, name: &str) -> Self {
        self.dependency.push(name.to_string());
        self
    }

    pub fn with_message(mut self, message: DescriptorProto) -> Self {
        self.message_type.push(message);
        self
    }

    pub fn with_enum(mut self, enum_type: EnumDescriptorProto) -> Self {
        self.enum_type.push(enum_type);
        self
    }

    pub fn with_extension(mut self, field: FieldDescriptorProto) -> Self {
        self.extension.push(field);
        self
    }
}

impl Codec for FileDescriptorProto {
    fn merge_field(&mut self, number: u32, wt: WireType, c: &mut ReadCursor<'_>) -> Result<bool> {
        match (number, wt) {
            (1, LEN) => self.name = Some(read_string(c)?),
            (2, LEN) => self.package = Some(read_string(c)?),
            (3, LEN) => self.dependency.push(read_string(c)?),
            (4, LEN) => self.message_type.push(read_message(c)?),
            (5, LEN) => self.enum_type.push(read_message(c)?),
            (7, LEN) => self.extension.push(read_message(c)?),
            (10, _) => return read_int32s(&mut self.public_dependency, wt, c),
            (11, _) => return read_int32s(&mut self.weak_dependency, wt, c),
            (12, LEN) => self.syntax = Some(read_string(c)?),
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn encode_fields(&self, w: &mut Writer) {
        put_opt_string(w, 1, &self.name);
        put_opt_string(w, 2, &self.package);
        for dep in &self.dependency {
            put_string(w, 3, dep);
        }
        put_messages(w, 4, &self.message_type);
        put_messages(w, 5, &self.enum_type);
        put_messages(w, 7, &self.extension);
        for &dep in &self.public_dependency {
            put_int32(w, 10, dep);
        }
        for &dep in &self.weak_dependency {
            put_int32(w, 11, dep);
        }
        put_opt_string(w, 12, &self.syntax);
    }

    unknown_accessors!();
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtensionRange {
    pub start: Option<i32>,
    pub end: Option<i32>,
    pub unknown_fields: UnknownFieldSet,
}

impl Codec for ExtensionRange {
    fn merge_field(&mut self, number: u32, wt: WireType, c: &mut ReadCursor<'_>) -> Result<bool> {
        match (number, wt) {
            (1, VARINT) => self.start = Some(read_int32(c)?),
            (2, VARINT) => self.end = Some(read_int32(c)?),
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn encode_fields(&self, w: &mut Writer) {
        put_opt_int32(w, 1, self.start);
        put_opt_int32(w, 2, self.end);
    }

    unknown_accessors!();
}

/// Reserved field number range, `end` exclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReservedRange {
    pub start: Option<i32>,
    pub end: Option<i32>,
    pub unknown_fields: UnknownFieldSet,
}

impl Codec for ReservedRange {
    fn merge_field(&mut self, number: u32, wt: WireType, c: &mut ReadCursor<'_>) -> Result<bool> {
        match (number, wt) {
            (1, VARINT) => self.start = Some(read_int32(c)?),
            (2, VARINT) => self.end = Some(read_int32(c)?),
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn encode_fields(&self, w: &mut Writer) {
        put_opt_int32(w, 1, self.start);
        put_opt_int32(w, 2, self.end);
    }

    unknown_accessors!();
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageOptions {
    pub map_entry: Option<bool>,
    pub unknown_fields: UnknownFieldSet,
}

impl Codec for MessageOptions {
    fn merge_field(&mut self, number: u32, wt: WireType, c: &mut ReadCursor<'_>) -> Result<bool> {
        match (number, wt) {
            (7, VARINT) => self.map_entry = Some(read_bool(c)?),
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn encode_fields(&self, w: &mut Writer) {
        put_opt_bool(w, 7, self.map_entry);
    }

    unknown_accessors!();
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DescriptorProto {
    pub name: Option<String>,
    pub field: Vec<FieldDescriptorProto>,
    pub nested_type: Vec<DescriptorProto>,
    pub enum_type: Vec<EnumDescriptorProto>,
    pub extension_range: Vec<ExtensionRange>,
    pub extension: Vec<FieldDescriptorProto>,
    pub options: Option<MessageOptions>,
    pub oneof_decl: Vec<OneofDescriptorProto>,
    pub reserved_range: Vec<ReservedRange>,
    pub reserved_name: Vec<String>,
    pub unknown_fields: UnknownFieldSet,
}

impl DescriptorProto {
    pub fn new(name: &str) -> Self {
        DescriptorProto {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    pub fn is_map_entry(&self) -> bool {
        self.options
            .as_ref()
            .and_then(|o| o.map_entry)
            .unwrap_or(false)
    }

    pub fn with_field(mut self, field: FieldDescriptorProto) -> Self {
        self.field.push(field);
        self
    }

    pub fn with_nested(mut self, message: DescriptorProto) -> Self {
        self.nested_type.push(message);
        self
    }

    pub fn with_enum(mut self, enum_type: EnumDescriptorProto) -> Self {
        self.enum_type.push(enum_type);
        self
    }

    pub fn with_oneof(mut self, name: &str) -> Self {
        self.oneof_decl.push(OneofDescriptorProto {
            name: Some(name.to_string()),
            ..Default::default()
        });
        self
    }

    /// `end` is exclusive.
    pub fn with_extension_range(mut self, start: i32, end: i32) -> Self {
        self.extension_range.push(ExtensionRange {
            start: Some(start),
            end: Some(end),
            ..Default::default()
        });
        self
    }

    pub fn with_extension(mut self, field: FieldDescriptorProto) -> Self {
        self.extension.push(field);
        self
    }

    pub fn with_map_entry(mut self) -> Self {
        self.options
            .get_or_insert_with(MessageOptions::default)
            .map_entry = Some(true);
        self
    }

    /// Declares `map<key, value> name = number;` the way protoc lowers it: a
    /// nested `NameEntry` type and a repeated field of that type.
    /// `value_type_name` names the message or enum type of the value.
    pub fn with_map_field(
        self,
        name: &str,
        number: i32,
        key: FieldType,
        value: FieldType,
        value_type_name: Option<&str>,
    ) -> Self {
        let mut entry_name: String = name
            .split('_')
            .flat_map(|part| {
                let mut chars = part.chars();
                chars
                    .next()
                    .map(|c| c.to_ascii_uppercase())
                    .into_iter()
                    .chain(chars)
            })
            .collect();
        entry_name.push_str("Entry");
        let mut value_field = FieldDescriptorProto::new("value", 2, Label::Optional, value);
        if let Some(type_name) = value_type_name {
            value_field = value_field.with_type_name(type_name);
        }
        let entry = DescriptorProto::new(&entry_name)
            .with_field(FieldDescriptorProto::new("key", 1, Label::Optional, key))
            .with_field(value_field)
            .with_map_entry();
        self.with_nested(entry).with_field(
            FieldDescriptorProto::new(name, number, Label::Repeated, FieldType::Message)
                .with_type_name(&entry_name),
        )
    }
}

impl Codec for DescriptorProto {
    fn merge_field(&mut self, number: u32, wt: WireType, c: &mut ReadCursor<'_>) -> Result<bool> {
        match (number, wt) {
            (1, LEN) => self.name = Some(read_string(c)?),
            (2, LEN) => self.field.push(read_message(c)?),
            (3, LEN) => self.nested_type.push(read_message(c)?),
            (4, LEN) => self.enum_type.push(read_message(c)?),
            (5, LEN) => self.extension_range.push(read_message(c)?),
            (6, LEN) => self.extension.push(read_message(c)?),
            (7, LEN) => merge_message(&mut self.options, c)?,
            (8, LEN) => self.oneof_decl.push(read_message(c)?),
            (9, LEN) => self.reserved_range.push(read_message(c)?),
            (10, LEN) => self.reserved_name.push(read_string(c)?),
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn encode_fields(&self, w: &mut Writer) {
        put_opt_string(w, 1, &self.name);
        put_messages(w, 2, &self.field);
        put_messages(w, 3, &self.nested_type);
        put_messages(w, 4, &self.enum_type);
        put_messages(w, 5, &self.extension_range);
        put_messages(w, 6, &self.extension);
        if let Some(options) = &self.options {
            put_message(w, 7, options);
        }
        put_messages(w, 8, &self.oneof_decl);
        put_messages(w, 9, &self.reserved_range);
        for name in &self.reserved_name {
            put_string(w, 10, name);
        }
    }

    unknown_accessors!();
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldOptions {
    pub packed: Option<bool>,
    pub unknown_fields: UnknownFieldSet,
}

impl Codec for FieldOptions {
    fn merge_field(&mut self, number: u32, wt: WireType, c: &mut ReadCursor<'_>) -> Result<bool> {
        match (number, wt) {
            (2, VARINT) => self.packed = Some(read_bool(c)?),
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn encode_fields(&self, w: &mut Writer) {
        put_opt_bool(w, 2, self.packed);
    }

    unknown_accessors!();
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldDescriptorProto {
    pub name: Option<String>,
    pub extendee: Option<String>,
    pub number: Option<i32>,
    pub label: Option<Label>,
    pub r#type: Option<FieldType>,
    pub type_name: Option<String>,
    pub default_value: Option<String>,
    pub options: Option<FieldOptions>,
    pub oneof_index: Option<i32>,
    pub json_name: Option<String>,
    pub proto3_optional: Option<bool>,
    pub unknown_fields: UnknownFieldSet,
}

impl FieldDescriptorProto {
    pub fn new(name: &str, number: i32, label: Label, field_type: FieldType) -> Self {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            label: Some(label),
            r#type: Some(field_type),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    pub fn with_type_name(mut self, type_name: &str) -> Self {
        self.type_name = Some(type_name.to_string());
        self
    }

    pub fn with_extendee(mut self, extendee: &str) -> Self {
        self.extendee = Some(extendee.to_string());
        self
    }

    pub fn with_default(mut self, default_value: &str) -> Self {
        self.default_value = Some(default_value.to_string());
        self
    }

    pub fn with_oneof_index(mut self, index: i32) -> Self {
        self.oneof_index = Some(index);
        self
    }

    pub fn with_json_name(mut self, json_name: &str) -> Self {
        self.json_name = Some(json_name.to_string());
        self
    }

    pub fn with_packed(mut self, packed: bool) -> Self {
        self.options
            .get_or_insert_with(FieldOptions::default)
            .packed = Some(packed);
        self
    }

    pub fn with_proto3_optional(mut self) -> Self {
        self.proto3_optional = Some(true);
        self
    }
}

impl Codec for FieldDescriptorProto {
    fn merge_field(&mut self, number: u32, wt: WireType, c: &mut ReadCursor<'_>) -> Result<bool> {
        match (number, wt) {
            (1, LEN) => self.name = Some(read_string(c)?),
            (2, LEN) => self.extendee = Some(read_string(c)?),
            (3, VARINT) => self.number = Some(read_int32(c)?),
            (4, VARINT) => {
                let raw = read_int32(c)?;
                match Label::from_i32(raw) {
                    Some(label) => self.label = Some(label),
                    None => self
                        .unknown_fields
                        .push(4, crate::unknown::UnknownValue::Varint(raw as i64 as u64)),
                }
            }
            (5, VARINT) => {
                let raw = read_int32(c)?;
                match FieldType::from_i32(raw) {
                    Some(t) => self.r#type = Some(t),
                    None => self
                        .unknown_fields
                        .push(5, crate::unknown::UnknownValue::Varint(raw as i64 as u64)),
                }
            }
            (6, LEN) => self.type_name = Some(read_string(c)?),
            (7, LEN) => self.default_value = Some(read_string(c)?),
            (8, LEN) => merge_message(&mut self.options, c)?,
            (9, VARINT) => self.oneof_index = Some(read_int32(c)?),
            (10, LEN) => self.json_name = Some(read_string(c)?),
            (17, VARINT) => self.proto3_optional = Some(read_bool(c)?),
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn encode_fields(&self, w: &mut Writer) {
        put_opt_string(w, 1, &self.name);
        put_opt_string(w, 2, &self.extendee);
        put_opt_int32(w, 3, self.number);
        put_opt_int32(w, 4, self.label.map(|l| l as i32));
        put_opt_int32(w, 5, self.r#type.map(|t| t as i32));
        put_opt_string(w, 6, &self.type_name);
        put_opt_string(w, 7, &self.default_value);
        if let Some(options) = &self.options {
            put_message(w, 8, options);
        }
        put_opt_int32(w, 9, self.oneof_index);
        put_opt_string(w, 10, &self.json_name);
        put_opt_bool(w, 17, self.proto3_optional);
    }

    unknown_accessors!();
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OneofDescriptorProto {
    pub name: Option<String>,
    pub unknown_fields: UnknownFieldSet,
}

impl Codec for OneofDescriptorProto {
    fn merge_field(&mut self, number: u32, wt: WireType, c: &mut ReadCursor<'_>) -> Result<bool> {
        match (number, wt) {
            (1, LEN) => self.name = Some(read_string(c)?),
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn encode_fields(&self, w: &mut Writer) {
        put_opt_string(w, 1, &self.name);
    }

    unknown_accessors!();
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnumOptions {
    pub allow_alias: Option<bool>,
    pub unknown_fields: UnknownFieldSet,
}

impl Codec for EnumOptions {
    fn merge_field(&mut self, number: u32, wt: WireType, c: &mut ReadCursor<'_>) -> Result<bool> {
        match (number, wt) {
            (2, VARINT) => self.allow_alias = Some(read_bool(c)?),
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn encode_fields(&self, w: &mut Writer) {
        put_opt_bool(w, 2, self.allow_alias);
    }

    unknown_accessors!();
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnumDescriptorProto {
    pub name: Option<String>,
    pub value: Vec<EnumValueDescriptorProto>,
    pub options: Option<EnumOptions>,
    pub unknown_fields: UnknownFieldSet,
}

impl EnumDescriptorProto {
    pub fn new(name: &str, values: &[(&str, i32)]) -> Self {
        EnumDescriptorProto {
            name: Some(name.to_string()),
            value: values
                .iter()
                .map(|&(name, number)| EnumValueDescriptorProto {
                    name: Some(name.to_string()),
                    number: Some(number),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    pub fn with_allow_alias(mut self) -> Self {
        self.options
            .get_or_insert_with(EnumOptions::default)
            .allow_alias = Some(true);
        self
    }
}

impl Codec for EnumDescriptorProto {
    fn merge_field(&mut self, number: u32, wt: WireType, c: &mut ReadCursor<'_>) -> Result<bool> {
        match (number, wt) {
            (1, LEN) => self.name = Some(read_string(c)?),
            (2, LEN) => self.value.push(read_message(c)?),
            (3, LEN) => merge_message(&mut self.options, c)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn encode_fields(&self, w: &mut Writer) {
        put_opt_string(w, 1, &self.name);
        put_messages(w, 2, &self.value);
        if let Some(options) = &self.options {
            put_message(w, 3, options);
        }
    }

    unknown_accessors!();
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnumValueDescriptorProto {
    pub name: Option<String>,
    pub number: Option<i32>,
    pub unknown_fields: UnknownFieldSet,
}

impl Codec for EnumValueDescriptorProto {
    fn merge_field(&mut self, number: u32, wt: WireType, c: &mut ReadCursor<'_>) -> Result<bool> {
        match (number, wt) {
            (1, LEN) => self.name = Some(read_string(c)?),
            (2, VARINT) => self.number = Some(read_int32(c)?),
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn encode_fields(&self, w: &mut Writer) {
        put_opt_string(w, 1, &self.name);
        put_opt_int32(w, 2, self.number);
    }

    unknown_accessors!();
}

pub const DESCRIPTOR_FILE_NAME: &str = "google/protobuf/descriptor.proto";

/// Schema of the structs in this module, as a file descriptor.
pub fn bootstrap_file() -> FileDescriptorProto {
    use FieldType as T;
    use Label::{Optional as Opt, Repeated as Rep};

    let f = FieldDescriptorProto::new;
    let msg = |field: &str, number, label, type_name: &str| {
        f(field, number, label, T::Message).with_type_name(type_name)
    };

    let range = |name: &str| {
        DescriptorProto::new(name)
            .with_field(f("start", 1, Opt, T::Int32))
            .with_field(f("end", 2, Opt, T::Int32))
    };

    let field_type = EnumDescriptorProto::new(
        "Type",
        &[
            ("TYPE_DOUBLE", 1),
            ("TYPE_FLOAT", 2),
            ("TYPE_INT64", 3),
            ("TYPE_UINT64", 4),
            ("TYPE_INT32", 5),
            ("TYPE_FIXED64", 6),
            ("TYPE_FIXED32", 7),
            ("TYPE_BOOL", 8),
            ("TYPE_STRING", 9),
            ("TYPE_GROUP", 10),
            ("TYPE_MESSAGE", 11),
            ("TYPE_BYTES", 12),
            ("TYPE_UINT32", 13),
            ("TYPE_ENUM", 14),
            ("TYPE_SFIXED32", 15),
            ("TYPE_SFIXED64", 16),
            ("TYPE_SINT32", 17),
            ("TYPE_SINT64", 18),
        ],
    );
    let label = EnumDescriptorProto::new(
        "Label",
        &[
            ("LABEL_OPTIONAL", 1),
            ("LABEL_REQUIRED", 2),
            ("LABEL_REPEATED", 3),
        ],
    );

    FileDescriptorProto::new(DESCRIPTOR_FILE_NAME, "google.protobuf", "proto2")
        .with_message(DescriptorProto::new("FileDescriptorSet").with_field(msg(
            "file",
            1,
            Rep,
            ".google.protobuf.FileDescriptorProto",
        )))
        .with_message(
            DescriptorProto::new("FileDescriptorProto")
                .with_field(f("name", 1, Opt, T::String))
                .with_field(f("package", 2, Opt, T::String))
                .with_field(f("dependency", 3, Rep, T::String))
                .with_field(msg("message_type", 4, Rep, ".google.protobuf.DescriptorProto"))
                .with_field(msg("enum_type", 5, Rep, ".google.protobuf.EnumDescriptorProto"))
                .with_field(msg("extension", 7, Rep, ".google.protobuf.FieldDescriptorProto"))
                .with_field(f("public_dependency", 10, Rep, T::Int32))
                .with_field(f("weak_dependency", 11, Rep, T::Int32))
                .with_field(f("syntax", 12, Opt, T::String)),
        )
        .with_message(
            DescriptorProto::new("DescriptorProto")
                .with_field(f("name", 1, Opt, T::String))
                .with_field(msg("field", 2, Rep, ".google.protobuf.FieldDescriptorProto"))
                .with_field(msg("nested_type", 3, Rep, ".google.protobuf.DescriptorProto"))
                .with_field(msg("enum_type", 4, Rep, ".google.protobuf.EnumDescriptorProto"))
                .with_field(msg(
                    "extension_range",
                    5,
                    Rep,
                    ".google.protobuf.DescriptorProto.ExtensionRange",
                ))
                .with_field(msg("extension", 6, Rep, ".google.protobuf.FieldDescriptorProto"))
                .with_field(msg("options", 7, Opt, ".google.protobuf.MessageOptions"))
                .with_field(msg("oneof_decl", 8, Rep, ".google.protobuf.OneofDescriptorProto"))
                .with_field(msg(
                    "reserved_range",
                    9,
                    Rep,
                    ".google.protobuf.DescriptorProto.ReservedRange",
                ))
                .with_field(f("reserved_name", 10, Rep, T::String))
                .with_nested(range("ExtensionRange"))
                .with_nested(range("ReservedRange")),
        )
        .with_message(
            DescriptorProto::new("FieldDescriptorProto")
                .with_field(f("name", 1, Opt, T::String))
                .with_field(f("extendee", 2, Opt, T::String))
                .with_field(f("number", 3, Opt, T::Int32))
                .with_field(
                    f("label", 4, Opt, T::Enum)
                        .with_type_name(".google.protobuf.FieldDescriptorProto.Label"),
                )
                .with_field(
                    f("type", 5, Opt, T::Enum)
                        .with_type_name(".google.protobuf.FieldDescriptorProto.Type"),
                )
                .with_field(f("type_name", 6, Opt, T::String))
                .with_field(f("default_value", 7, Opt, T::String))
                .with_field(msg("options", 8, Opt, ".google.protobuf.FieldOptions"))
                .with_field(f("oneof_index", 9, Opt, T::Int32))
                .with_field(f("json_name", 10, Opt, T::String))
                .with_field(f("proto3_optional", 17, Opt, T::Bool))
                .with_enum(field_type)
                .with_enum(label),
        )
        .with_message(
            DescriptorProto::new("OneofDescriptorProto").with_field(f("name", 1, Opt, T::String)),
        )
        .with_message(
            DescriptorProto::new("EnumDescriptorProto")
                .with_field(f("name", 1, Opt, T::String))
                .with_field(msg(
                    "value",
                    2,
                    Rep,
                    ".google.protobuf.EnumValueDescriptorProto",
                ))
                .with_field(msg("options", 3, Opt, ".google.protobuf.EnumOptions")),
        )
        .with_message(
            DescriptorProto::new("EnumValueDescriptorProto")
                .with_field(f("name", 1, Opt, T::String))
                .with_field(f("number", 2, Opt, T::Int32)),
        )
        .with_message(
            DescriptorProto::new("MessageOptions")
                .with_field(f("map_entry", 7, Opt, T::Bool))
                .with_extension_range(1000, 536870912),
        )
        .with_message(
            DescriptorProto::new("FieldOptions")
                .with_field(f("packed", 2, Opt, T::Bool))
                .with_extension_range(1000, 536870912),
        )
        .with_message(
            DescriptorProto::new("EnumOptions")
                .with_field(f("allow_alias", 2, Opt, T::Bool))
                .with_extension_range(1000, 536870912),
        )
}

/// `google/protobuf/timestamp.proto`, `duration.proto` and `wrappers.proto`.
pub fn well_known_type_files() -> Vec<FileDescriptorProto> {
    use FieldType as T;

    let seconds_nanos = |name: &str| {
        DescriptorProto::new(name)
            .with_field(FieldDescriptorProto::new("seconds", 1, Label::Optional, T::Int64))
            .with_field(FieldDescriptorProto::new("nanos", 2, Label::Optional, T::Int32))
    };
    let file = |name: &str| FileDescriptorProto::new(name, "google.protobuf", "proto3");

    let mut wrappers = file("google/protobuf/wrappers.proto");
    for (name, ty) in [
        ("DoubleValue", T::Double),
        ("FloatValue", T::Float),
        ("Int64Value", T::Int64),
        ("UInt64Value", T::UInt64),
        ("Int32Value", T::Int32),
        ("UInt32Value", T::UInt32),
        ("BoolValue", T::Bool),
        ("StringValue", T::String),
        ("BytesValue", T::Bytes),
    ] {
        wrappers = wrappers.with_message(
            DescriptorProto::new(name)
                .with_field(FieldDescriptorProto::new("value", 1, Label::Optional, ty)),
        );
    }

    vec![
        file("google/protobuf/timestamp.proto").with_message(seconds_nanos("Timestamp")),
        file("google/protobuf/duration.proto").with_message(seconds_nanos("Duration")),
        wrappers,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn bootstrap_file_roundtrips() {
        let file = bootstrap_file();
        let bytes = file.encode_to_vec();
        let decoded = FileDescriptorProto::decode(&bytes).unwrap();
        assert_eq!(decoded, file);
        assert_eq!(decoded.encode_to_vec(), bytes);
    }

    #[test]
    fn unmodelled_fields_are_kept() {
        // FileDescriptorProto.options (8) and an unknown label value.
        let mut w = Writer::new();
        put_string(&mut w, 1, "a.proto");
        w.write_tag(8, WireType::LengthDelimited);
        w.write_length_delimited(&[0x08, 0x01]);
        let bytes = w.into_inner();

        let file = FileDescriptorProto::decode(&bytes).unwrap();
        assert_eq!(file.name(), "a.proto");
        assert_eq!(file.unknown_fields.len(), 1);
        assert_eq!(file.encode_to_vec(), bytes);

        let field = FieldDescriptorProto::decode(&[0x20, 0x07]).unwrap();
        assert_eq!(field.label, None);
        assert_eq!(field.encode_to_vec(), vec![0x20, 0x07]);
    }

    #[test]
    fn packed_and_unpacked_public_dependency() {
        let unpacked = FileDescriptorProto::decode(&[0x50, 0x01, 0x50, 0x02]).unwrap();
        let packed = FileDescriptorProto::decode(&[0x52, 0x02, 0x01, 0x02]).unwrap();
        assert_eq!(unpacked.public_dependency, vec![1, 2]);
        assert_eq!(packed.public_dependency, vec![1, 2]);
    }

    #[test]
    fn negative_int32_uses_ten_bytes() {
        let field = FieldDescriptorProto {
            number: Some(-1),
            ..Default::default()
        };
        let bytes = field.encode_to_vec();
        assert_eq!(bytes.len(), 11);
        assert_eq!(FieldDescriptorProto::decode(&bytes).unwrap().number, Some(-1));
    }
}

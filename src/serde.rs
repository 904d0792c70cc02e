//! Canonical protobuf JSON mapping on top of serde.
//!
//! Serialization walks a [`DynamicMessageRef`] through [`JsonMessage`];
//! parsing drives a [`DynamicMessage`] with `DeserializeSeed` visitors so
//! values land directly in the arena.

use std::borrow::Cow;

use ::serde::de::{self, DeserializeSeed, IgnoredAny, MapAccess, SeqAccess, Unexpected, Visitor};
use ::serde::de::Error as _;
use ::serde::ser::{self, Error as _, SerializeMap, SerializeSeq};
use ::serde::{Deserialize, Serialize, Serializer};
use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE_NO_PAD};

use crate::arena::Arena;
use crate::base::Message;
use crate::descriptor_pool::{EnumDescriptor, FieldDescriptor, MessageDescriptor, WellKnownType};
use crate::descriptor_proto::FieldType;
use crate::reflection::{DynamicMessage, DynamicMessageRef, Value};
use crate::wire::DEFAULT_RECURSION_LIMIT;
use crate::{Error, Result};

/// Knobs of the JSON mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsonOptions {
    /// Emit proto field names instead of lowerCamelCase JSON names.
    pub preserve_proto_field_names: bool,
    /// Emit enum values as numbers instead of names.
    pub use_enum_numbers: bool,
    /// Emit fields without presence even when they hold their default.
    pub emit_defaults: bool,
    /// Fail on JSON keys and enum names the schema does not know.
    pub error_on_unknown_fields: bool,
    pub recursion_limit: u32,
}

impl JsonOptions {
    pub const fn new() -> Self {
        JsonOptions {
            preserve_proto_field_names: false,
            use_enum_numbers: false,
            emit_defaults: false,
            error_on_unknown_fields: false,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
        }
    }

    pub const fn with_preserve_proto_field_names(mut self, preserve: bool) -> Self {
        self.preserve_proto_field_names = preserve;
        self
    }

    pub const fn with_use_enum_numbers(mut self, numbers: bool) -> Self {
        self.use_enum_numbers = numbers;
        self
    }

    pub const fn with_emit_defaults(mut self, emit: bool) -> Self {
        self.emit_defaults = emit;
        self
    }

    pub const fn with_error_on_unknown_fields(mut self, strict: bool) -> Self {
        self.error_on_unknown_fields = strict;
        self
    }

    pub const fn with_recursion_limit(mut self, limit: u32) -> Self {
        self.recursion_limit = limit;
        self
    }
}

impl Default for JsonOptions {
    fn default() -> Self {
        Self::new()
    }
}

static DEFAULT_OPTIONS: JsonOptions = JsonOptions::new();

const NULL_VALUE: &str = "google.protobuf.NullValue";

// Timestamp validation and formatting
fn validate_timestamp(seconds: i64, nanos: i32) -> Result<(), &'static str> {
    // 0001-01-01T00:00:00Z ..= 9999-12-31T23:59:59.999999999Z
    if !(-62_135_596_800..=253_402_300_799).contains(&seconds) {
        return Err("timestamp seconds out of range");
    }
    if !(0..=999_999_999).contains(&nanos) {
        return Err("timestamp nanos must be in [0, 999999999]");
    }
    Ok(())
}

// Fractions use 0, 3, 6 or 9 digits.
fn format_fraction(nanos: u32) -> std::string::String {
    if nanos == 0 {
        std::string::String::new()
    } else if nanos % 1_000_000 == 0 {
        format!(".{:03}", nanos / 1_000_000)
    } else if nanos % 1_000 == 0 {
        format!(".{:06}", nanos / 1_000)
    } else {
        format!(".{nanos:09}")
    }
}

fn format_timestamp(seconds: i64, nanos: i32) -> Result<std::string::String, &'static str> {
    validate_timestamp(seconds, nanos)?;
    let dt = time::OffsetDateTime::from_unix_timestamp(seconds).map_err(|_| "invalid timestamp")?;
    let date_time = dt
        .format(time::macros::format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second]"
        ))
        .map_err(|_| "format error")?;
    Ok(format!("{date_time}{}Z", format_fraction(nanos.unsigned_abs())))
}

fn parse_timestamp(s: &str) -> Result<(i64, i32), &'static str> {
    let dt = time::OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339)
        .map_err(|_| "invalid RFC 3339 timestamp")?;
    let seconds = dt.unix_timestamp();
    let nanos = dt.nanosecond() as i32;
    validate_timestamp(seconds, nanos)?;
    Ok((seconds, nanos))
}

// Duration validation and formatting
fn validate_duration(seconds: i64, nanos: i32) -> Result<(), &'static str> {
    // About 10,000 years either way.
    if !(-315_576_000_000..=315_576_000_000).contains(&seconds) {
        return Err("duration seconds out of range");
    }
    if !(-999_999_999..=999_999_999).contains(&nanos) {
        return Err("duration nanos must be in [-999999999, 999999999]");
    }
    if (seconds > 0 && nanos < 0) || (seconds < 0 && nanos > 0) {
        return Err("duration seconds and nanos must have the same sign");
    }
    Ok(())
}

fn format_duration(seconds: i64, nanos: i32) -> Result<std::string::String, &'static str> {
    validate_duration(seconds, nanos)?;
    let sign = if seconds < 0 || nanos < 0 { "-" } else { "" };
    Ok(format!(
        "{sign}{}{}s",
        seconds.unsigned_abs(),
        format_fraction(nanos.unsigned_abs())
    ))
}

fn parse_duration(s: &str) -> Result<(i64, i32), &'static str> {
    let body = s.strip_suffix('s').ok_or("duration must end with 's'")?;
    let (negative, body) = match body.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, body),
    };
    let (whole, fraction) = match body.split_once('.') {
        Some((_, "")) => return Err("empty duration fraction"),
        Some((whole, fraction)) => (whole, fraction),
        None => (body, ""),
    };
    let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if whole.is_empty() || !digits(whole) || !digits(fraction) || fraction.len() > 9 {
        return Err("invalid duration");
    }
    let mut seconds: i64 = whole.parse().map_err(|_| "duration seconds out of range")?;
    let mut nanos: i32 = if fraction.is_empty() {
        0
    } else {
        format!("{fraction:0<9}").parse().map_err(|_| "invalid duration")?
    };
    if negative {
        seconds = -seconds;
        nanos = -nanos;
    }
    validate_duration(seconds, nanos)?;
    Ok((seconds, nanos))
}

fn numbered_field(desc: &MessageDescriptor, number: u32) -> Result<FieldDescriptor> {
    desc.field_by_number(number)
        .ok_or_else(|| Error::InvalidDescriptor(format!("{} has no field {number}", desc.full_name())))
}

fn seconds_and_nanos(msg: DynamicMessageRef<'_, '_>) -> Result<(i64, i32)> {
    let desc = msg.descriptor();
    let seconds = msg.get(&numbered_field(desc, 1)?)?.and_then(|v| v.as_i64()).unwrap_or(0);
    let nanos = msg.get(&numbered_field(desc, 2)?)?.and_then(|v| v.as_i32()).unwrap_or(0);
    Ok((seconds, nanos))
}

fn set_seconds_and_nanos(msg: &mut DynamicMessage<'_, '_>, seconds: i64, nanos: i32) -> Result<()> {
    let desc = msg.descriptor();
    msg.set(&numbered_field(&desc, 1)?, Value::Int64(seconds))?;
    msg.set(&numbered_field(&desc, 2)?, Value::Int32(nanos))
}

fn wrapper_value_field(desc: &MessageDescriptor) -> Result<FieldDescriptor> {
    numbered_field(desc, 1)
}

fn non_finite(v: f64) -> &'static str {
    if v.is_nan() {
        "NaN"
    } else if v > 0.0 {
        "Infinity"
    } else {
        "-Infinity"
    }
}

/// JSON view of a message under a set of [`JsonOptions`].
#[derive(Clone, Copy)]
pub struct JsonMessage<'a, 'alloc, 'o> {
    msg: DynamicMessageRef<'a, 'alloc>,
    options: &'o JsonOptions,
    depth: u32,
}

impl JsonMessage<'_, '_, '_> {
    fn fields(&self) -> Vec<FieldDescriptor> {
        let msg = self.msg;
        if !self.options.emit_defaults {
            return msg.list_fields();
        }
        let mut fields: Vec<FieldDescriptor> = msg
            .descriptor()
            .fields_in_number_order()
            .filter(|f| f.is_repeated() || !f.has_presence() || msg.has(f).unwrap_or(false))
            .collect();
        fields.extend(msg.extensions().cloned());
        fields.sort_by_key(|f| f.number());
        fields
    }
}

impl Serialize for JsonMessage<'_, '_, '_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if self.depth >= self.options.recursion_limit {
            return Err(ser::Error::custom(Error::MaxDepthExceeded {
                limit: self.options.recursion_limit,
            }));
        }
        let msg = self.msg;
        let desc = msg.descriptor();
        match desc.well_known_type() {
            Some(wkt) if wkt.is_wrapper() => {
                let field = wrapper_value_field(desc).map_err(S::Error::custom)?;
                return match msg.get(&field).map_err(S::Error::custom)? {
                    Some(value) => JsonElement {
                        value,
                        field: &field,
                        options: self.options,
                        depth: self.depth,
                    }
                    .serialize(serializer),
                    None => serializer.serialize_none(),
                };
            }
            Some(WellKnownType::Timestamp) => {
                let (seconds, nanos) = seconds_and_nanos(msg).map_err(S::Error::custom)?;
                let text = format_timestamp(seconds, nanos).map_err(S::Error::custom)?;
                return serializer.serialize_str(&text);
            }
            Some(WellKnownType::Duration) => {
                let (seconds, nanos) = seconds_and_nanos(msg).map_err(S::Error::custom)?;
                let text = format_duration(seconds, nanos).map_err(S::Error::custom)?;
                return serializer.serialize_str(&text);
            }
            _ => {}
        }

        let fields = self.fields();
        let mut out = serializer.serialize_map(Some(fields.len()))?;
        for field in &fields {
            let Some(value) = msg.get(field).map_err(S::Error::custom)? else {
                continue;
            };
            let key: Cow<'_, str> = if field.is_extension() {
                Cow::Owned(format!("[{}]", field.full_name()))
            } else if self.options.preserve_proto_field_names {
                Cow::Borrowed(field.name())
            } else {
                Cow::Borrowed(field.json_name())
            };
            out.serialize_entry(
                &key,
                &JsonField {
                    value,
                    field,
                    options: self.options,
                    depth: self.depth,
                },
            )?;
        }
        out.end()
    }
}

// A whole field: a container or a single element.
struct JsonField<'v, 'alloc, 'o> {
    value: Value<'v, 'alloc>,
    field: &'v FieldDescriptor,
    options: &'o JsonOptions,
    depth: u32,
}

impl Serialize for JsonField<'_, '_, '_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self.value {
            Value::List(list) => {
                let mut seq = serializer.serialize_seq(Some(list.len()))?;
                for value in list.iter() {
                    seq.serialize_element(&JsonElement {
                        value,
                        field: self.field,
                        options: self.options,
                        depth: self.depth,
                    })?;
                }
                seq.end()
            }
            Value::Map(map) => {
                let value_field = self
                    .field
                    .message_type()
                    .and_then(|entry| entry.map_entry_value_field())
                    .ok_or_else(|| S::Error::custom(format!("{} is not a map", self.field.full_name())))?;
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map.sorted() {
                    out.serialize_entry(
                        &map_key_string(&key),
                        &JsonElement {
                            value,
                            field: &value_field,
                            options: self.options,
                            depth: self.depth,
                        },
                    )?;
                }
                out.end()
            }
            value => JsonElement {
                value,
                field: self.field,
                options: self.options,
                depth: self.depth,
            }
            .serialize(serializer),
        }
    }
}

fn map_key_string(key: &Value<'_, '_>) -> std::string::String {
    match key {
        Value::Bool(v) => v.to_string(),
        Value::Int32(v) => v.to_string(),
        Value::Int64(v) => v.to_string(),
        Value::UInt32(v) => v.to_string(),
        Value::UInt64(v) => v.to_string(),
        Value::String(v) => (*v).to_string(),
        other => format!("{other:?}"),
    }
}

// A single value of `field`'s element type.
struct JsonElement<'v, 'alloc, 'o> {
    value: Value<'v, 'alloc>,
    field: &'v FieldDescriptor,
    options: &'o JsonOptions,
    depth: u32,
}

impl Serialize for JsonElement<'_, '_, '_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self.value {
            Value::Bool(v) => serializer.serialize_bool(v),
            Value::Int32(v) => serializer.serialize_i32(v),
            Value::UInt32(v) => serializer.serialize_u32(v),
            // 64-bit integers are quoted
            Value::Int64(v) => serializer.collect_str(&v),
            Value::UInt64(v) => serializer.collect_str(&v),
            Value::Float(v) if v.is_finite() => serializer.serialize_f32(v),
            Value::Float(v) => serializer.serialize_str(non_finite(v.into())),
            Value::Double(v) if v.is_finite() => serializer.serialize_f64(v),
            Value::Double(v) => serializer.serialize_str(non_finite(v)),
            Value::Enum(v) => {
                let enum_type = self.field.enum_type();
                if enum_type.as_ref().is_some_and(|e| e.full_name() == NULL_VALUE) {
                    return serializer.serialize_unit();
                }
                if !self.options.use_enum_numbers {
                    if let Some(value) = enum_type.and_then(|e| e.value_by_number(v)) {
                        return serializer.serialize_str(value.name());
                    }
                }
                serializer.serialize_i32(v)
            }
            Value::String(v) => serializer.serialize_str(v),
            Value::Bytes(v) => serializer.serialize_str(&STANDARD.encode(v)),
            Value::Message(msg) => JsonMessage {
                msg,
                options: self.options,
                depth: self.depth + 1,
            }
            .serialize(serializer),
            Value::List(_) | Value::Map(_) => Err(ser::Error::custom(format!(
                "nested container in {}",
                self.field.full_name()
            ))),
        }
    }
}

impl Serialize for DynamicMessageRef<'_, '_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.json(&DEFAULT_OPTIONS).serialize(serializer)
    }
}

impl<'a, 'alloc> DynamicMessageRef<'a, 'alloc> {
    /// Serializable JSON view under `options`.
    pub fn json<'o>(&self, options: &'o JsonOptions) -> JsonMessage<'a, 'alloc, 'o> {
        JsonMessage {
            msg: *self,
            options,
            depth: 0,
        }
    }

    pub fn to_json_string(&self, options: &JsonOptions) -> Result<std::string::String> {
        serde_json::to_string(&self.json(options)).map_err(|e| Error::Json(e.to_string()))
    }

    pub fn to_json_string_pretty(&self, options: &JsonOptions) -> Result<std::string::String> {
        serde_json::to_string_pretty(&self.json(options)).map_err(|e| Error::Json(e.to_string()))
    }

    pub fn to_json_value(&self, options: &JsonOptions) -> Result<serde_json::Value> {
        serde_json::to_value(self.json(options)).map_err(|e| Error::Json(e.to_string()))
    }
}

impl<'alloc> DynamicMessage<'_, 'alloc> {
    /// Merges a JSON object into this message. Fields present in `json`
    /// overwrite, repeated fields append, `null` clears a field.
    pub fn merge_json_str(&mut self, json: &str, options: &JsonOptions) -> Result<()> {
        if self.as_ref().is_frozen() {
            return Err(Error::Frozen);
        }
        let mut deserializer = serde_json::Deserializer::from_str(json);
        MessageSeed {
            msg: self.reborrow(),
            options,
            depth: 0,
        }
        .deserialize(&mut deserializer)
        .map_err(|e| Error::Json(e.to_string()))?;
        deserializer.end().map_err(|e| Error::Json(e.to_string()))
    }

    pub fn merge_json_value(&mut self, json: &serde_json::Value, options: &JsonOptions) -> Result<()> {
        if self.as_ref().is_frozen() {
            return Err(Error::Frozen);
        }
        MessageSeed {
            msg: self.reborrow(),
            options,
            depth: 0,
        }
        .deserialize(json)
        .map_err(|e| Error::Json(e.to_string()))
    }

    pub fn to_json_string(&self, options: &JsonOptions) -> Result<std::string::String> {
        self.as_ref().to_json_string(options)
    }
}

/// Parses `json` into a new message of type `desc` allocated in `arena`.
pub fn decode_json(
    arena: &mut Arena<'_>,
    desc: &MessageDescriptor,
    json: &str,
    options: &JsonOptions,
) -> Result<Message> {
    let msg = arena.new_message(desc);
    arena.message_mut(msg)?.merge_json_str(json, options)?;
    Ok(msg)
}

fn lookup_field(desc: &MessageDescriptor, key: &str) -> Option<FieldDescriptor> {
    if let Some(name) = key.strip_prefix('[').and_then(|k| k.strip_suffix(']')) {
        return desc
            .file()
            .pool()
            .find_extension_by_name(name)
            .filter(|ext| ext.containing_type() == *desc);
    }
    desc.field_by_json_name(key).or_else(|| desc.field_by_name(key))
}

fn custom<E: de::Error>(err: Error) -> E {
    E::custom(err)
}

struct MessageSeed<'m, 'alloc, 'o> {
    msg: DynamicMessage<'m, 'alloc>,
    options: &'o JsonOptions,
    depth: u32,
}

impl<'de> DeserializeSeed<'de> for MessageSeed<'_, '_, '_> {
    type Value = ();

    fn deserialize<D>(mut self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        if self.depth >= self.options.recursion_limit {
            return Err(custom(Error::MaxDepthExceeded {
                limit: self.options.recursion_limit,
            }));
        }
        let desc = self.msg.descriptor();
        match desc.well_known_type() {
            Some(wkt) if wkt.is_wrapper() => {
                let field = wrapper_value_field(&desc).map_err(custom::<D::Error>)?;
                let parsed = ScalarSeed::new(&field, self.options).deserialize(deserializer)?;
                set_parsed(&mut self.msg, &field, &parsed).map_err(custom)
            }
            Some(WellKnownType::Timestamp) => {
                let text = std::string::String::deserialize(deserializer)?;
                let (seconds, nanos) = parse_timestamp(&text).map_err(D::Error::custom)?;
                set_seconds_and_nanos(&mut self.msg, seconds, nanos).map_err(custom)
            }
            Some(WellKnownType::Duration) => {
                let text = std::string::String::deserialize(deserializer)?;
                let (seconds, nanos) = parse_duration(&text).map_err(D::Error::custom)?;
                set_seconds_and_nanos(&mut self.msg, seconds, nanos).map_err(custom)
            }
            _ => deserializer.deserialize_map(MessageVisitor {
                msg: self.msg,
                desc,
                options: self.options,
                depth: self.depth,
            }),
        }
    }
}

struct MessageVisitor<'m, 'alloc, 'o> {
    msg: DynamicMessage<'m, 'alloc>,
    desc: MessageDescriptor,
    options: &'o JsonOptions,
    depth: u32,
}

impl<'de> Visitor<'de> for MessageVisitor<'_, '_, '_> {
    type Value = ();

    fn expecting(&self, formatter: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(formatter, "a JSON object for {}", self.desc.full_name())
    }

    fn visit_map<A>(mut self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        while let Some(key) = map.next_key::<std::string::String>()? {
            let Some(field) = lookup_field(&self.desc, &key) else {
                if self.options.error_on_unknown_fields {
                    return Err(de::Error::custom(format!(
                        "{} has no field named {key}",
                        self.desc.full_name()
                    )));
                }
                tracing::trace!(key = %key, message = %self.desc.full_name(), "ignoring unknown JSON field");
                map.next_value::<IgnoredAny>()?;
                continue;
            };
            map.next_value_seed(FieldSeed {
                msg: &mut self.msg,
                field: &field,
                options: self.options,
                depth: self.depth,
            })?;
        }
        Ok(())
    }
}

struct FieldSeed<'s, 'm, 'alloc, 'o> {
    msg: &'s mut DynamicMessage<'m, 'alloc>,
    field: &'s FieldDescriptor,
    options: &'o JsonOptions,
    depth: u32,
}

impl<'de> DeserializeSeed<'de> for FieldSeed<'_, '_, '_, '_> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_option(self)
    }
}

impl<'de> Visitor<'de> for FieldSeed<'_, '_, '_, '_> {
    type Value = ();

    fn expecting(&self, formatter: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(formatter, "a value for {}", self.field.full_name())
    }

    fn visit_none<E>(self) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        self.msg.clear(self.field).map_err(custom)
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        self.visit_none()
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        let FieldSeed {
            msg,
            field,
            options,
            depth,
        } = self;
        if field.is_map() {
            deserializer.deserialize_map(MapVisitor {
                msg,
                field,
                options,
                depth,
            })
        } else if field.is_repeated() {
            deserializer.deserialize_seq(ListVisitor {
                msg,
                field,
                options,
                depth,
            })
        } else if field.field_type().is_message() {
            let child = msg.child_mut(field).map_err(custom::<D::Error>)?;
            MessageSeed {
                msg: child,
                options,
                depth: depth + 1,
            }
            .deserialize(deserializer)
        } else {
            let parsed = ScalarSeed::new(field, options).deserialize(deserializer)?;
            set_parsed(msg, field, &parsed).map_err(custom)
        }
    }
}

struct ListVisitor<'s, 'm, 'alloc, 'o> {
    msg: &'s mut DynamicMessage<'m, 'alloc>,
    field: &'s FieldDescriptor,
    options: &'o JsonOptions,
    depth: u32,
}

impl<'de> Visitor<'de> for ListVisitor<'_, '_, '_, '_> {
    type Value = ();

    fn expecting(&self, formatter: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(formatter, "an array for {}", self.field.full_name())
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        while seq
            .next_element_seed(ElementSeed {
                msg: &mut *self.msg,
                field: self.field,
                options: self.options,
                depth: self.depth,
            })?
            .is_some()
        {}
        Ok(())
    }
}

// One array element; message elements are appended only once a value is seen.
struct ElementSeed<'s, 'm, 'alloc, 'o> {
    msg: &'s mut DynamicMessage<'m, 'alloc>,
    field: &'s FieldDescriptor,
    options: &'o JsonOptions,
    depth: u32,
}

impl<'de> DeserializeSeed<'de> for ElementSeed<'_, '_, '_, '_> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        let mut list = self.msg.list_mut(self.field).map_err(custom::<D::Error>)?;
        if self.field.field_type().is_message() {
            let child = list.add_message_mut().map_err(custom::<D::Error>)?;
            return MessageSeed {
                msg: child,
                options: self.options,
                depth: self.depth + 1,
            }
            .deserialize(deserializer);
        }
        let parsed = ScalarSeed::new(self.field, self.options).deserialize(deserializer)?;
        match parsed.value() {
            Some(value) => list.push(value).map_err(custom),
            None => Ok(()),
        }
    }
}

struct MapVisitor<'s, 'm, 'alloc, 'o> {
    msg: &'s mut DynamicMessage<'m, 'alloc>,
    field: &'s FieldDescriptor,
    options: &'o JsonOptions,
    depth: u32,
}

impl<'de> Visitor<'de> for MapVisitor<'_, '_, '_, '_> {
    type Value = ();

    fn expecting(&self, formatter: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(formatter, "an object for map {}", self.field.full_name())
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let entry = self.field.message_type();
        let (key_field, value_field) = entry
            .as_ref()
            .and_then(|e| e.map_entry_key_field().zip(e.map_entry_value_field()))
            .ok_or_else(|| custom::<A::Error>(Error::InvalidDescriptor(self.field.full_name().to_string())))?;

        while let Some(raw) = map.next_key::<std::string::String>()? {
            let key = parse_map_key(key_field.field_type(), &raw).ok_or_else(|| {
                A::Error::custom(format!("invalid key {raw:?} for map {}", self.field.full_name()))
            })?;
            let Some(key_value) = key.value() else {
                continue;
            };
            let mut entries = self.msg.map_mut(self.field).map_err(custom::<A::Error>)?;
            if value_field.field_type().is_message() {
                let child = entries.entry_mut(key_value).map_err(custom::<A::Error>)?;
                map.next_value_seed(MessageSeed {
                    msg: child,
                    options: self.options,
                    depth: self.depth + 1,
                })?;
            } else {
                let parsed = map.next_value_seed(ScalarSeed::new(&value_field, self.options))?;
                if let Some(value) = parsed.value() {
                    entries.insert(key_value, value).map_err(custom::<A::Error>)?;
                }
            }
        }
        Ok(())
    }
}

fn parse_map_key(key_type: FieldType, raw: &str) -> Option<Parsed> {
    use FieldType as T;
    Some(match key_type {
        T::Bool => match raw {
            "true" => Parsed::Bool(true),
            "false" => Parsed::Bool(false),
            _ => return None,
        },
        T::Int32 | T::SInt32 | T::SFixed32 => Parsed::Int32(raw.parse().ok()?),
        T::Int64 | T::SInt64 | T::SFixed64 => Parsed::Int64(raw.parse().ok()?),
        T::UInt32 | T::Fixed32 => Parsed::UInt32(raw.parse().ok()?),
        T::UInt64 | T::Fixed64 => Parsed::UInt64(raw.parse().ok()?),
        T::String => Parsed::String(raw.to_string()),
        _ => return None,
    })
}

// A JSON scalar converted to the storage type of its field.
#[derive(Debug, PartialEq)]
enum Parsed {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    Enum(i32),
    String(std::string::String),
    Bytes(Vec<u8>),
    // Unknown enum name, skipped in lenient mode.
    Ignored,
}

impl Parsed {
    fn value(&self) -> Option<Value<'_, 'static>> {
        Some(match self {
            Parsed::Bool(v) => Value::Bool(*v),
            Parsed::Int32(v) => Value::Int32(*v),
            Parsed::Int64(v) => Value::Int64(*v),
            Parsed::UInt32(v) => Value::UInt32(*v),
            Parsed::UInt64(v) => Value::UInt64(*v),
            Parsed::Float(v) => Value::Float(*v),
            Parsed::Double(v) => Value::Double(*v),
            Parsed::Enum(v) => Value::Enum(*v),
            Parsed::String(v) => Value::String(v),
            Parsed::Bytes(v) => Value::Bytes(v),
            Parsed::Ignored => return None,
        })
    }
}

fn set_parsed(msg: &mut DynamicMessage<'_, '_>, field: &FieldDescriptor, parsed: &Parsed) -> Result<()> {
    match parsed.value() {
        Some(value) => msg.set(field, value),
        None => Ok(()),
    }
}

/// Accepts padded or unpadded input in the standard or URL-safe alphabet.
fn decode_base64(s: &str) -> Option<Vec<u8>> {
    let trimmed = s.trim_end_matches('=');
    let engine = if trimmed.contains(['-', '_']) {
        &URL_SAFE_NO_PAD
    } else {
        &STANDARD_NO_PAD
    };
    engine.decode(trimmed).ok()
}

struct ScalarSeed {
    kind: FieldType,
    enum_type: Option<EnumDescriptor>,
    strict: bool,
}

impl ScalarSeed {
    fn new(field: &FieldDescriptor, options: &JsonOptions) -> Self {
        ScalarSeed {
            kind: field.field_type(),
            enum_type: field.enum_type(),
            strict: options.error_on_unknown_fields,
        }
    }

    fn out_of_range<E: de::Error>(&self, unexpected: Unexpected<'_>) -> E {
        E::invalid_value(unexpected, self)
    }

    fn from_i64<E: de::Error>(self, v: i64) -> Result<Parsed, E> {
        use FieldType as T;
        let unexpected = Unexpected::Signed(v);
        match self.kind {
            T::Int32 | T::SInt32 | T::SFixed32 => {
                i32::try_from(v).map(Parsed::Int32).map_err(|_| self.out_of_range(unexpected))
            }
            T::Int64 | T::SInt64 | T::SFixed64 => Ok(Parsed::Int64(v)),
            T::UInt32 | T::Fixed32 => {
                u32::try_from(v).map(Parsed::UInt32).map_err(|_| self.out_of_range(unexpected))
            }
            T::UInt64 | T::Fixed64 => {
                u64::try_from(v).map(Parsed::UInt64).map_err(|_| self.out_of_range(unexpected))
            }
            T::Float => Ok(Parsed::Float(v as f32)),
            T::Double => Ok(Parsed::Double(v as f64)),
            T::Enum => i32::try_from(v).map(Parsed::Enum).map_err(|_| self.out_of_range(unexpected)),
            _ => Err(E::invalid_type(unexpected, &self)),
        }
    }

    fn from_u64<E: de::Error>(self, v: u64) -> Result<Parsed, E> {
        use FieldType as T;
        match (i64::try_from(v), self.kind) {
            (Ok(signed), _) => self.from_i64(signed),
            (Err(_), T::UInt64 | T::Fixed64) => Ok(Parsed::UInt64(v)),
            (Err(_), T::Float) => Ok(Parsed::Float(v as f32)),
            (Err(_), T::Double) => Ok(Parsed::Double(v as f64)),
            (Err(_), _) => Err(self.out_of_range(Unexpected::Unsigned(v))),
        }
    }

    fn from_f64<E: de::Error>(self, v: f64) -> Result<Parsed, E> {
        use FieldType as T;
        match self.kind {
            T::Double => Ok(Parsed::Double(v)),
            T::Float if v.is_finite() && v.abs() > f64::from(f32::MAX) => {
                Err(self.out_of_range(Unexpected::Float(v)))
            }
            T::Float => Ok(Parsed::Float(v as f32)),
            // Integers written in exponent or decimal form must be exact.
            _ if v.fract() != 0.0 || !v.is_finite() => Err(E::invalid_type(Unexpected::Float(v), &self)),
            _ if v >= -9_223_372_036_854_775_808.0 && v < 9_223_372_036_854_775_808.0 => {
                self.from_i64(v as i64)
            }
            _ if v >= 0.0 && v < 18_446_744_073_709_551_616.0 => self.from_u64(v as u64),
            _ => Err(self.out_of_range(Unexpected::Float(v))),
        }
    }
}

impl<'de> DeserializeSeed<'de> for ScalarSeed {
    type Value = Parsed;

    fn deserialize<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_any(self)
    }
}

impl<'de> Visitor<'de> for ScalarSeed {
    type Value = Parsed;

    fn expecting(&self, formatter: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(formatter, "a JSON value for a {:?} field", self.kind)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
        match self.kind {
            FieldType::Bool => Ok(Parsed::Bool(v)),
            _ => Err(E::invalid_type(Unexpected::Bool(v), &self)),
        }
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        self.from_i64(v)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        self.from_u64(v)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        self.from_f64(v)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        use FieldType as T;
        match self.kind {
            T::String => Ok(Parsed::String(v.to_string())),
            T::Bytes => decode_base64(v)
                .map(Parsed::Bytes)
                .ok_or_else(|| E::invalid_value(Unexpected::Str(v), &"base64 data")),
            T::Enum => {
                let by_name = self.enum_type.as_ref().and_then(|e| e.value_by_name(v));
                match (by_name, v.parse::<i32>()) {
                    (Some(value), _) => Ok(Parsed::Enum(value.number())),
                    (None, Ok(number)) => Ok(Parsed::Enum(number)),
                    (None, Err(_)) if self.strict => Err(E::invalid_value(Unexpected::Str(v), &self)),
                    (None, Err(_)) => Ok(Parsed::Ignored),
                }
            }
            T::Float | T::Double => match v {
                "NaN" => self.from_f64(f64::NAN),
                "Infinity" => self.from_f64(f64::INFINITY),
                "-Infinity" => self.from_f64(f64::NEG_INFINITY),
                _ => match v.parse::<f64>() {
                    Ok(parsed) if parsed.is_finite() => self.from_f64(parsed),
                    _ => Err(E::invalid_value(Unexpected::Str(v), &self)),
                },
            },
            T::Bool | T::Message | T::Group => Err(E::invalid_type(Unexpected::Str(v), &self)),
            _ => {
                if let Ok(signed) = v.parse::<i64>() {
                    self.from_i64(signed)
                } else if let Ok(unsigned) = v.parse::<u64>() {
                    self.from_u64(unsigned)
                } else {
                    match v.parse::<f64>() {
                        Ok(parsed) => self.from_f64(parsed),
                        Err(_) => Err(E::invalid_value(Unexpected::Str(v), &self)),
                    }
                }
            }
        }
    }
}

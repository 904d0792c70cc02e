//! Immutable descriptor graph.
//!
//! All descriptors of a pool live in flat tables inside one `Arc`'d
//! [`PoolInner`] and refer to each other by index. The public descriptor
//! types are `(pool, index)` handles, cheap to clone and `Send + Sync`.
//!
//! Adding a file builds into a staged copy of the tables and publishes it
//! only once every check passed, so a failed add leaves the pool untouched.
//! Tables are append-only: handles obtained before an add stay valid.

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;

use crate::arena::Arena;
use crate::base::Message;
use crate::descriptor_proto::{
    Codec, DescriptorProto, EnumDescriptorProto, FieldDescriptorProto, FieldType,
    FileDescriptorProto, FileDescriptorSet, Label, bootstrap_file, well_known_type_files,
};
use crate::wire::{MAX_FIELD_NUMBER, RESERVED_FIELD_NUMBERS, WireType};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Syntax {
    Proto2,
    Proto3,
}

impl Syntax {
    pub fn as_str(self) -> &'static str {
        match self {
            Syntax::Proto2 => "proto2",
            Syntax::Proto3 => "proto3",
        }
    }
}

/// Default of a singular scalar field: the declared proto2 default, or the
/// zero value of its type.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    Enum(i32),
    String(String),
    Bytes(Vec<u8>),
}

/// Well-known types with a special JSON mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WellKnownType {
    DoubleValue,
    FloatValue,
    Int64Value,
    UInt64Value,
    Int32Value,
    UInt32Value,
    BoolValue,
    StringValue,
    BytesValue,
    Timestamp,
    Duration,
}

impl WellKnownType {
    fn from_full_name(name: &str) -> Option<Self> {
        use WellKnownType as W;
        Some(match name.strip_prefix("google.protobuf.")? {
            "DoubleValue" => W::DoubleValue,
            "FloatValue" => W::FloatValue,
            "Int64Value" => W::Int64Value,
            "UInt64Value" => W::UInt64Value,
            "Int32Value" => W::Int32Value,
            "UInt32Value" => W::UInt32Value,
            "BoolValue" => W::BoolValue,
            "StringValue" => W::StringValue,
            "BytesValue" => W::BytesValue,
            "Timestamp" => W::Timestamp,
            "Duration" => W::Duration,
            _ => return None,
        })
    }

    pub fn is_wrapper(self) -> bool {
        !matches!(self, WellKnownType::Timestamp | WellKnownType::Duration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeRef {
    None,
    Message(usize),
    Enum(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Symbol {
    Package,
    Message(usize),
    Enum(usize),
    EnumValue(usize),
    Field(usize),
    Oneof(usize),
}

impl Symbol {
    fn is_type(self) -> bool {
        matches!(self, Symbol::Message(_) | Symbol::Enum(_))
    }

    fn is_aggregate(self) -> bool {
        matches!(self, Symbol::Package | Symbol::Message(_))
    }
}

#[derive(Debug, Clone)]
struct FileEntry {
    proto: FileDescriptorProto,
    syntax: Syntax,
    dependencies: Vec<usize>,
    public_dependencies: Vec<usize>,
    messages: Vec<usize>,
    enums: Vec<usize>,
    extensions: Vec<usize>,
}

#[derive(Debug, Clone)]
struct MessageEntry {
    name: String,
    full_name: String,
    file: usize,
    parent: Option<usize>,
    fields: Vec<usize>,
    fields_in_number_order: Vec<usize>,
    by_number: HashMap<u32, usize>,
    by_name: HashMap<String, usize>,
    by_json_name: HashMap<String, usize>,
    oneofs: Vec<usize>,
    nested_messages: Vec<usize>,
    nested_enums: Vec<usize>,
    extensions: Vec<usize>,
    extension_ranges: Vec<Range<u32>>,
    reserved_ranges: Vec<Range<u32>>,
    reserved_names: Vec<String>,
    is_map_entry: bool,
    well_known: Option<WellKnownType>,
}

#[derive(Debug, Clone)]
struct FieldEntry {
    name: String,
    full_name: String,
    json_name: String,
    number: u32,
    // Declaration index within the containing message, or within the
    // declaring scope for extensions.
    index: usize,
    field_type: FieldType,
    label: Label,
    containing: usize,
    extension_scope: Option<usize>,
    is_extension: bool,
    file: usize,
    oneof: Option<usize>,
    type_ref: TypeRef,
    default: Option<DefaultValue>,
    has_explicit_default: bool,
    packed: bool,
    has_presence: bool,
    proto3_optional: bool,
}

#[derive(Debug, Clone)]
struct OneofEntry {
    name: String,
    full_name: String,
    index: usize,
    message: usize,
    fields: Vec<usize>,
    synthetic: bool,
}

#[derive(Debug, Clone)]
struct EnumEntry {
    name: String,
    full_name: String,
    file: usize,
    parent: Option<usize>,
    values: Vec<usize>,
    by_name: HashMap<String, usize>,
    by_number: HashMap<i32, usize>,
    closed: bool,
}

#[derive(Debug, Clone)]
struct EnumValueEntry {
    name: String,
    full_name: String,
    number: i32,
    index: usize,
    enum_index: usize,
}

#[derive(Debug, Clone, Default)]
struct PoolInner {
    files: Vec<FileEntry>,
    messages: Vec<MessageEntry>,
    fields: Vec<FieldEntry>,
    oneofs: Vec<OneofEntry>,
    enums: Vec<EnumEntry>,
    enum_values: Vec<EnumValueEntry>,
    extensions: Vec<usize>,
    file_by_name: HashMap<String, usize>,
    symbols: HashMap<String, (Symbol, Option<usize>)>,
    extension_by_key: HashMap<(usize, u32), usize>,
}

/// Registry of file descriptors, indexed by fully-qualified name.
///
/// Cloning is cheap and yields a pool sharing the same tables. Reads are
/// lock free from any thread; adding files needs `&mut self`.
#[derive(Clone, Default)]
pub struct DescriptorPool {
    inner: Arc<PoolInner>,
}

impl core::fmt::Debug for DescriptorPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DescriptorPool")
            .field("files", &self.inner.files.len())
            .field("messages", &self.inner.messages.len())
            .field("enums", &self.inner.enums.len())
            .finish()
    }
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidDescriptor(msg.into())
}

fn join(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{scope}.{name}")
    }
}

/// lowerCamelCase JSON name of a field, as protoc derives it.
pub fn to_json_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut capitalize_next = false;
    for c in name.chars() {
        if c == '_' {
            capitalize_next = true;
        } else if capitalize_next {
            out.extend(c.to_uppercase());
            capitalize_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

impl DescriptorPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether both handles refer to the same pool snapshot.
    pub fn ptr_eq(&self, other: &DescriptorPool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // Default of `field`, borrowed from this pool. `None` unless this pool
    // is the one `field` was resolved in.
    pub(crate) fn default_of(&self, field: &FieldDescriptor) -> Option<&DefaultValue> {
        if !self.ptr_eq(&field.pool) {
            return None;
        }
        self.inner.fields[field.index].default.as_ref()
    }

    /// A pool holding the descriptor schema itself, so descriptor blobs can be
    /// read as dynamic messages.
    pub fn with_descriptor_schema() -> Result<Self> {
        let mut pool = Self::new();
        pool.add_file_descriptor_proto(bootstrap_file())?;
        Ok(pool)
    }

    /// Adds the timestamp, duration and wrapper schemas, skipping any file
    /// already present under the same contents.
    pub fn add_well_known_types(&mut self) -> Result<()> {
        for file in well_known_type_files() {
            self.add_file_descriptor_proto(file)?;
        }
        Ok(())
    }

    /// Decodes a serialized `FileDescriptorSet` into a fresh pool.
    pub fn decode_file_descriptor_set(bytes: &[u8]) -> Result<Self> {
        let mut pool = Self::new();
        pool.add_file_descriptor_set(FileDescriptorSet::decode(bytes)?)?;
        Ok(pool)
    }

    /// Adds `proto` once all of its dependencies are present.
    ///
    /// Adding a file identical to one already present returns the existing
    /// file; a different file under the same name is rejected.
    pub fn add_file_descriptor_proto(&mut self, proto: FileDescriptorProto) -> Result<FileDescriptor> {
        if let Some(&existing) = self.inner.file_by_name.get(proto.name()) {
            if self.inner.files[existing].proto == proto {
                return Ok(FileDescriptor::new(self.clone(), existing));
            }
        }
        let mut staged = PoolInner::clone(&self.inner);
        let index = stage_file(&mut staged, proto)?;
        self.inner = Arc::new(staged);
        Ok(FileDescriptor::new(self.clone(), index))
    }

    /// Decodes and adds one serialized `FileDescriptorProto`.
    pub fn add_serialized_file(&mut self, bytes: &[u8]) -> Result<FileDescriptor> {
        self.add_file_descriptor_proto(FileDescriptorProto::decode(bytes)?)
    }

    /// Adds every file of `set`, in dependency order regardless of the order
    /// in which they appear. The set is added as a whole or not at all.
    pub fn add_file_descriptor_set(&mut self, set: FileDescriptorSet) -> Result<Vec<FileDescriptor>> {
        let mut order = Vec::with_capacity(set.file.len());
        let mut pending: HashMap<String, FileDescriptorProto> = HashMap::with_capacity(set.file.len());
        for file in set.file {
            match pending.get(file.name()) {
                Some(seen) if *seen == file => continue,
                Some(_) => {
                    return Err(invalid(format!(
                        "file {} appears twice with different contents",
                        file.name()
                    )));
                }
                None => {
                    order.push(file.name().to_string());
                    pending.insert(file.name().to_string(), file);
                }
            }
        }

        let mut staged = PoolInner::clone(&self.inner);
        let mut added = Vec::with_capacity(order.len());
        let mut visited = HashSet::new();
        for root in order {
            // Post-order walk: a file is staged after the pending files it imports.
            let mut stack = vec![(root, false)];
            while let Some((name, expanded)) = stack.pop() {
                if expanded {
                    if let Some(proto) = pending.remove(&name) {
                        added.push(stage_file(&mut staged, proto)?);
                    }
                    continue;
                }
                let Some(proto) = pending.get(&name) else {
                    continue;
                };
                if !visited.insert(name.clone()) {
                    continue;
                }
                let deps: Vec<String> = proto
                    .dependency
                    .iter()
                    .rev()
                    .filter(|dep| pending.contains_key(dep.as_str()) && !visited.contains(dep.as_str()))
                    .cloned()
                    .collect();
                stack.push((name, true));
                stack.extend(deps.into_iter().map(|dep| (dep, false)));
            }
        }
        self.inner = Arc::new(staged);
        Ok(added
            .into_iter()
            .map(|index| FileDescriptor::new(self.clone(), index))
            .collect())
    }

    /// All files, in the order they were added.
    pub fn to_file_descriptor_set(&self) -> FileDescriptorSet {
        FileDescriptorSet {
            file: self.inner.files.iter().map(|f| f.proto.clone()).collect(),
            ..Default::default()
        }
    }

    pub fn files(&self) -> impl ExactSizeIterator<Item = FileDescriptor> + '_ {
        (0..self.inner.files.len()).map(|i| FileDescriptor::new(self.clone(), i))
    }

    pub fn messages(&self) -> impl ExactSizeIterator<Item = MessageDescriptor> + '_ {
        (0..self.inner.messages.len()).map(|i| MessageDescriptor::new(self.clone(), i))
    }

    pub fn enums(&self) -> impl ExactSizeIterator<Item = EnumDescriptor> + '_ {
        (0..self.inner.enums.len()).map(|i| EnumDescriptor::new(self.clone(), i))
    }

    /// Every extension declared anywhere in the pool.
    pub fn extensions(&self) -> impl ExactSizeIterator<Item = FieldDescriptor> + '_ {
        self.inner
            .extensions
            .iter()
            .map(|&i| FieldDescriptor::new(self.clone(), i))
    }

    pub fn find_file_by_name(&self, name: &str) -> Option<FileDescriptor> {
        let index = *self.inner.file_by_name.get(name)?;
        Some(FileDescriptor::new(self.clone(), index))
    }

    pub fn find_message_by_name(&self, full_name: &str) -> Option<MessageDescriptor> {
        match self.inner.symbols.get(full_name.strip_prefix('.').unwrap_or(full_name))? {
            (Symbol::Message(i), _) => Some(MessageDescriptor::new(self.clone(), *i)),
            _ => None,
        }
    }

    pub fn find_enum_by_name(&self, full_name: &str) -> Option<EnumDescriptor> {
        match self.inner.symbols.get(full_name.strip_prefix('.').unwrap_or(full_name))? {
            (Symbol::Enum(i), _) => Some(EnumDescriptor::new(self.clone(), *i)),
            _ => None,
        }
    }

    pub fn find_extension_by_name(&self, full_name: &str) -> Option<FieldDescriptor> {
        match self.inner.symbols.get(full_name.strip_prefix('.').unwrap_or(full_name))? {
            (Symbol::Field(i), _) if self.inner.fields[*i].is_extension => {
                Some(FieldDescriptor::new(self.clone(), *i))
            }
            _ => None,
        }
    }

    /// Extension of `extendee` with field number `number`.
    pub fn find_extension_by_number(
        &self,
        extendee: &MessageDescriptor,
        number: u32,
    ) -> Option<FieldDescriptor> {
        let extendee = self.resolve_same(extendee)?;
        let index = *self.inner.extension_by_key.get(&(extendee, number))?;
        Some(FieldDescriptor::new(self.clone(), index))
    }

    // Index of `desc` in this pool, which may be a later snapshot of the pool
    // `desc` came from.
    fn resolve_same(&self, desc: &MessageDescriptor) -> Option<usize> {
        match self.inner.symbols.get(desc.full_name())? {
            (Symbol::Message(i), _) => Some(*i),
            _ => None,
        }
    }

    /// Creates an empty message of type `full_name` in `arena`.
    pub fn new_message(&self, full_name: &str, arena: &mut Arena<'_>) -> Result<Message> {
        let desc = self
            .find_message_by_name(full_name)
            .ok_or_else(|| Error::UnknownTypeName(full_name.to_string()))?;
        Ok(arena.new_message(&desc))
    }

    /// Decodes `data` as a message of type `full_name`, resolving extensions
    /// declared in this pool.
    pub fn decode_message(
        &self,
        full_name: &str,
        data: &[u8],
        arena: &mut Arena<'_>,
    ) -> Result<Message> {
        let msg = self.new_message(full_name, arena)?;
        let registry = crate::extension::ExtensionRegistry::from_pool(self)?;
        let options = crate::decoding::DecodeOptions::default().with_extensions(&registry);
        arena.message_mut(msg)?.merge_from_bytes_with(data, &options)?;
        Ok(msg)
    }
}

// Builds `proto` into `staged`, which is discarded by the caller on error.
fn stage_file(staged: &mut PoolInner, proto: FileDescriptorProto) -> Result<usize> {
    if let Some(&existing) = staged.file_by_name.get(proto.name()) {
        if staged.files[existing].proto == proto {
            return Ok(existing);
        }
        return Err(invalid(format!(
            "file {} is already in the pool with different contents",
            proto.name()
        )));
    }
    let index = FileBuilder::build(staged, proto)?;
    let file = &staged.files[index];
    tracing::debug!(
        file = file.proto.name(),
        messages = file.messages.len(),
        enums = file.enums.len(),
        "file added to descriptor pool"
    );
    Ok(index)
}

struct PendingField {
    field: usize,
    scope: String,
    proto: FieldDescriptorProto,
}

// Two-pass construction of one file into staged tables: pass one registers
// every symbol, pass two resolves type references and validates.
struct FileBuilder<'p> {
    pool: &'p mut PoolInner,
    file: usize,
    syntax: Syntax,
    visible: HashSet<usize>,
    pending: Vec<PendingField>,
}

impl<'p> FileBuilder<'p> {
    fn build(pool: &'p mut PoolInner, proto: FileDescriptorProto) -> Result<usize> {
        let syntax = match proto.syntax.as_deref() {
            None | Some("") | Some("proto2") => Syntax::Proto2,
            Some("proto3") => Syntax::Proto3,
            Some(other) => return Err(invalid(format!("unsupported syntax {other:?}"))),
        };
        if proto.name().is_empty() {
            return Err(invalid("file has no name"));
        }

        let mut dependencies = Vec::with_capacity(proto.dependency.len());
        for dep in &proto.dependency {
            let index = pool
                .file_by_name
                .get(dep)
                .copied()
                .ok_or_else(|| Error::DependencyNotFound(dep.clone()))?;
            dependencies.push(index);
        }
        let mut public_dependencies = Vec::new();
        for &i in &proto.public_dependency {
            let dep = usize::try_from(i)
                .ok()
                .and_then(|i| dependencies.get(i))
                .ok_or_else(|| invalid(format!("public dependency index {i} out of range")))?;
            public_dependencies.push(*dep);
        }

        let file = pool.files.len();
        // Direct imports plus whatever they re-export publicly.
        let mut visible = HashSet::from([file]);
        let mut stack = dependencies.clone();
        while let Some(dep) = stack.pop() {
            if visible.insert(dep) {
                stack.extend(pool.files[dep].public_dependencies.iter().copied());
            }
        }

        pool.file_by_name.insert(proto.name().to_string(), file);
        pool.files.push(FileEntry {
            proto: FileDescriptorProto::default(),
            syntax,
            dependencies,
            public_dependencies,
            messages: Vec::new(),
            enums: Vec::new(),
            extensions: Vec::new(),
        });

        let mut builder = FileBuilder {
            pool,
            file,
            syntax,
            visible,
            pending: Vec::new(),
        };
        let package = proto.package().to_string();
        let first_message = builder.pool.messages.len();
        builder.add_package(&package)?;
        for message in &proto.message_type {
            let index = builder.add_message(message, &package, None)?;
            builder.pool.files[file].messages.push(index);
        }
        for enum_type in &proto.enum_type {
            let index = builder.add_enum(enum_type, &package, None)?;
            builder.pool.files[file].enums.push(index);
        }
        for (i, ext) in proto.extension.iter().enumerate() {
            let index = builder.add_field(ext, &package, None, i, true)?;
            builder.pool.files[file].extensions.push(index);
        }

        for pending in core::mem::take(&mut builder.pending) {
            builder.resolve_field(pending)?;
        }
        for message in first_message..builder.pool.messages.len() {
            builder.index_message(message)?;
        }

        builder.pool.files[file].proto = proto;
        Ok(file)
    }

    fn add_symbol(&mut self, name: &str, symbol: Symbol) -> Result<()> {
        match self.pool.symbols.get(name) {
            None => {
                let file = (symbol != Symbol::Package).then_some(self.file);
                self.pool.symbols.insert(name.to_string(), (symbol, file));
                Ok(())
            }
            Some((Symbol::Package, _)) if symbol == Symbol::Package => Ok(()),
            Some(_) => Err(invalid(format!("{name} is already defined"))),
        }
    }

    fn add_package(&mut self, package: &str) -> Result<()> {
        if package.is_empty() {
            return Ok(());
        }
        let mut end = 0;
        for part in package.split('.') {
            if part.is_empty() {
                return Err(invalid(format!("invalid package name {package:?}")));
            }
            end += part.len();
            self.add_symbol(&package[..end], Symbol::Package)?;
            end += 1;
        }
        Ok(())
    }

    fn add_message(
        &mut self,
        proto: &DescriptorProto,
        scope: &str,
        parent: Option<usize>,
    ) -> Result<usize> {
        if proto.name().is_empty() {
            return Err(invalid(format!("message in {scope:?} has no name")));
        }
        let full_name = join(scope, proto.name());
        let index = self.pool.messages.len();
        self.add_symbol(&full_name, Symbol::Message(index))?;

        let range = |start: Option<i32>, end: Option<i32>| -> Result<Range<u32>> {
            let start = u32::try_from(start.unwrap_or(0)).unwrap_or(0);
            let end = u32::try_from(end.unwrap_or(0)).unwrap_or(0);
            if start == 0 || end <= start {
                return Err(invalid(format!("invalid range {start}..{end} in {full_name}")));
            }
            Ok(start..end)
        };
        let extension_ranges = proto
            .extension_range
            .iter()
            .map(|r| range(r.start, r.end))
            .collect::<Result<Vec<_>>>()?;
        let reserved_ranges = proto
            .reserved_range
            .iter()
            .map(|r| range(r.start, r.end))
            .collect::<Result<Vec<_>>>()?;

        self.pool.messages.push(MessageEntry {
            name: proto.name().to_string(),
            well_known: WellKnownType::from_full_name(&full_name),
            full_name: full_name.clone(),
            file: self.file,
            parent,
            fields: Vec::new(),
            fields_in_number_order: Vec::new(),
            by_number: HashMap::new(),
            by_name: HashMap::new(),
            by_json_name: HashMap::new(),
            oneofs: Vec::new(),
            nested_messages: Vec::new(),
            nested_enums: Vec::new(),
            extensions: Vec::new(),
            extension_ranges,
            reserved_ranges,
            reserved_names: proto.reserved_name.clone(),
            is_map_entry: proto.is_map_entry(),
        });

        for (i, oneof) in proto.oneof_decl.iter().enumerate() {
            let name = oneof.name.clone().unwrap_or_default();
            let oneof_full_name = join(&full_name, &name);
            let oneof_index = self.pool.oneofs.len();
            self.add_symbol(&oneof_full_name, Symbol::Oneof(oneof_index))?;
            self.pool.oneofs.push(OneofEntry {
                name,
                full_name: oneof_full_name,
                index: i,
                message: index,
                fields: Vec::new(),
                synthetic: false,
            });
            self.pool.messages[index].oneofs.push(oneof_index);
        }
        for (i, field) in proto.field.iter().enumerate() {
            let field = self.add_field(field, &full_name, Some(index), i, false)?;
            self.pool.messages[index].fields.push(field);
        }
        for nested in &proto.nested_type {
            let nested = self.add_message(nested, &full_name, Some(index))?;
            self.pool.messages[index].nested_messages.push(nested);
        }
        for enum_type in &proto.enum_type {
            let enum_index = self.add_enum(enum_type, &full_name, Some(index))?;
            self.pool.messages[index].nested_enums.push(enum_index);
        }
        for (i, ext) in proto.extension.iter().enumerate() {
            let ext = self.add_field(ext, &full_name, Some(index), i, true)?;
            self.pool.messages[index].extensions.push(ext);
        }
        Ok(index)
    }

    fn add_enum(
        &mut self,
        proto: &EnumDescriptorProto,
        scope: &str,
        parent: Option<usize>,
    ) -> Result<usize> {
        let full_name = join(scope, proto.name());
        let index = self.pool.enums.len();
        self.add_symbol(&full_name, Symbol::Enum(index))?;
        if proto.value.is_empty() {
            return Err(invalid(format!("enum {full_name} has no values")));
        }
        if self.syntax == Syntax::Proto3 && proto.value[0].number != Some(0) {
            return Err(invalid(format!(
                "the first value of proto3 enum {full_name} must be zero"
            )));
        }
        let allow_alias = proto
            .options
            .as_ref()
            .and_then(|o| o.allow_alias)
            .unwrap_or(false);

        let mut entry = EnumEntry {
            name: proto.name().to_string(),
            full_name: full_name.clone(),
            file: self.file,
            parent,
            values: Vec::with_capacity(proto.value.len()),
            by_name: HashMap::new(),
            by_number: HashMap::new(),
            closed: self.syntax == Syntax::Proto2,
        };
        for (i, value) in proto.value.iter().enumerate() {
            let name = value.name.clone().unwrap_or_default();
            let number = value.number.unwrap_or(0);
            // Enum values are siblings of their enum, not children.
            let value_full_name = join(scope, &name);
            let value_index = self.pool.enum_values.len();
            self.add_symbol(&value_full_name, Symbol::EnumValue(value_index))?;
            if entry.by_number.contains_key(&number) && !allow_alias {
                return Err(invalid(format!(
                    "{value_full_name} reuses number {number} without allow_alias"
                )));
            }
            entry.by_number.entry(number).or_insert(value_index);
            entry.by_name.insert(name.clone(), value_index);
            entry.values.push(value_index);
            self.pool.enum_values.push(EnumValueEntry {
                name,
                full_name: value_full_name,
                number,
                index: i,
                enum_index: index,
            });
        }
        self.pool.enums.push(entry);
        Ok(index)
    }

    fn add_field(
        &mut self,
        proto: &FieldDescriptorProto,
        scope: &str,
        message: Option<usize>,
        index: usize,
        is_extension: bool,
    ) -> Result<usize> {
        if proto.name().is_empty() {
            return Err(invalid(format!("field in {scope:?} has no name")));
        }
        let full_name = join(scope, proto.name());
        let field_index = self.pool.fields.len();
        self.add_symbol(&full_name, Symbol::Field(field_index))?;

        let number = proto
            .number
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| (1..=MAX_FIELD_NUMBER).contains(n))
            .ok_or_else(|| invalid(format!("{full_name} has an invalid field number")))?;
        if RESERVED_FIELD_NUMBERS.contains(&number) {
            return Err(invalid(format!(
                "{full_name} uses number {number}, which is reserved for the implementation"
            )));
        }

        let oneof = match proto.oneof_index {
            None => None,
            Some(_) if is_extension => {
                return Err(invalid(format!("extension {full_name} cannot be in a oneof")));
            }
            Some(i) => {
                let message = message.ok_or_else(|| invalid("oneof outside a message"))?;
                let oneof = usize::try_from(i)
                    .ok()
                    .and_then(|i| self.pool.messages[message].oneofs.get(i).copied())
                    .ok_or_else(|| invalid(format!("{full_name} has oneof index {i} out of range")))?;
                self.pool.oneofs[oneof].fields.push(field_index);
                Some(oneof)
            }
        };

        let field_type = proto.r#type.unwrap_or(FieldType::Message);
        let label = proto.label.unwrap_or(Label::Optional);
        self.pool.fields.push(FieldEntry {
            name: proto.name().to_string(),
            json_name: proto
                .json_name
                .clone()
                .unwrap_or_else(|| to_json_name(proto.name())),
            full_name: full_name.clone(),
            number,
            index,
            field_type,
            label,
            containing: message.unwrap_or(usize::MAX),
            extension_scope: if is_extension { message } else { None },
            is_extension,
            file: self.file,
            oneof,
            type_ref: TypeRef::None,
            default: None,
            has_explicit_default: proto.default_value.is_some(),
            packed: false,
            has_presence: false,
            proto3_optional: proto.proto3_optional.unwrap_or(false),
        });
        if is_extension {
            self.pool.extensions.push(field_index);
        }
        self.pending.push(PendingField {
            field: field_index,
            scope: scope.to_string(),
            proto: proto.clone(),
        });
        Ok(field_index)
    }

    fn lookup_visible(&self, name: &str) -> Option<Symbol> {
        match self.pool.symbols.get(name)? {
            (symbol, None) => Some(*symbol),
            (symbol, Some(file)) if self.visible.contains(file) => Some(*symbol),
            _ => None,
        }
    }

    /// Resolves a type name the way protoc does: fully-qualified names are
    /// looked up directly, relative names from the innermost scope outwards.
    fn resolve_type(&self, scope: &str, name: &str) -> Result<Symbol> {
        let not_found = || Error::UnknownTypeName(name.to_string());
        if let Some(absolute) = name.strip_prefix('.') {
            return self
                .lookup_visible(absolute)
                .filter(|s| s.is_type())
                .ok_or_else(not_found);
        }
        let first = name.split_once('.').map_or(name, |(first, _)| first);
        let mut scope = scope.to_string();
        loop {
            if let Some(symbol) = self.lookup_visible(&join(&scope, first)) {
                if first.len() == name.len() {
                    if symbol.is_type() {
                        return Ok(symbol);
                    }
                } else if symbol.is_aggregate() {
                    return self
                        .lookup_visible(&join(&scope, name))
                        .filter(|s| s.is_type())
                        .ok_or_else(not_found);
                }
            }
            if scope.is_empty() {
                return Err(not_found());
            }
            scope.truncate(scope.rfind('.').unwrap_or(0));
        }
    }

    fn resolve_field(&mut self, pending: PendingField) -> Result<()> {
        let PendingField { field, scope, proto } = pending;
        let full_name = self.pool.fields[field].full_name.clone();

        let type_ref = match proto.type_name.as_deref() {
            None => TypeRef::None,
            Some(name) => match self.resolve_type(&scope, name)? {
                Symbol::Message(i) => TypeRef::Message(i),
                Symbol::Enum(i) => TypeRef::Enum(i),
                _ => return Err(Error::UnknownTypeName(name.to_string())),
            },
        };
        let field_type = match (proto.r#type, type_ref) {
            (None, TypeRef::Message(_)) => FieldType::Message,
            (None, TypeRef::Enum(_)) => FieldType::Enum,
            (Some(t @ (FieldType::Message | FieldType::Group)), TypeRef::Message(_)) => t,
            (Some(FieldType::Enum), TypeRef::Enum(_)) => FieldType::Enum,
            (Some(t), TypeRef::None)
                if !matches!(t, FieldType::Message | FieldType::Group | FieldType::Enum) =>
            {
                t
            }
            _ => {
                return Err(invalid(format!(
                    "{full_name} has a type that does not match its type name"
                )));
            }
        };

        let label = self.pool.fields[field].label;
        if self.syntax == Syntax::Proto3 && label == Label::Required {
            return Err(invalid(format!("required field {full_name} in proto3")));
        }
        if self.syntax == Syntax::Proto3 && proto.default_value.is_some() {
            return Err(invalid(format!("explicit default on {full_name} in proto3")));
        }

        let number = self.pool.fields[field].number;
        let is_extension = self.pool.fields[field].is_extension;
        if is_extension {
            let extendee_name = proto
                .extendee
                .as_deref()
                .ok_or_else(|| invalid(format!("extension {full_name} has no extendee")))?;
            let extendee = match self.resolve_type(&scope, extendee_name)? {
                Symbol::Message(i) => i,
                _ => return Err(invalid(format!("extendee of {full_name} is not a message"))),
            };
            let target = &self.pool.messages[extendee];
            if !target.extension_ranges.iter().any(|r| r.contains(&number)) {
                return Err(invalid(format!(
                    "{full_name}: {} does not declare {number} as an extension number",
                    target.full_name
                )));
            }
            if let Some(&other) = self.pool.extension_by_key.get(&(extendee, number)) {
                return Err(invalid(format!(
                    "{full_name}: extension number {number} of {} is already used by {}",
                    target.full_name, self.pool.fields[other].full_name
                )));
            }
            self.pool.extension_by_key.insert((extendee, number), field);
            self.pool.fields[field].containing = extendee;
        }

        let oneof = self.pool.fields[field].oneof;
        let is_repeated = label == Label::Repeated;
        let default = if is_repeated || field_type.is_message() {
            None
        } else {
            Some(match proto.default_value.as_deref() {
                Some(text) => self.parse_default(&full_name, field_type, type_ref, text)?,
                None => self.zero_default(field_type, type_ref),
            })
        };
        let packed = is_repeated
            && field_type.is_packable()
            && match proto.options.as_ref().and_then(|o| o.packed) {
                Some(packed) => packed,
                None => self.syntax == Syntax::Proto3,
            };
        let has_presence = !is_repeated
            && (field_type.is_message()
                || oneof.is_some()
                || is_extension
                || self.syntax == Syntax::Proto2);

        let entry = &mut self.pool.fields[field];
        entry.field_type = field_type;
        entry.type_ref = type_ref;
        entry.default = default;
        entry.packed = packed;
        entry.has_presence = has_presence;
        Ok(())
    }

    fn zero_default(&self, field_type: FieldType, type_ref: TypeRef) -> DefaultValue {
        use FieldType as T;
        match field_type {
            T::Bool => DefaultValue::Bool(false),
            T::Int32 | T::SInt32 | T::SFixed32 => DefaultValue::Int32(0),
            T::Int64 | T::SInt64 | T::SFixed64 => DefaultValue::Int64(0),
            T::UInt32 | T::Fixed32 => DefaultValue::UInt32(0),
            T::UInt64 | T::Fixed64 => DefaultValue::UInt64(0),
            T::Float => DefaultValue::Float(0.0),
            T::Double => DefaultValue::Double(0.0),
            T::String => DefaultValue::String(String::new()),
            T::Bytes | T::Message | T::Group => DefaultValue::Bytes(Vec::new()),
            T::Enum => {
                let first = match type_ref {
                    TypeRef::Enum(e) => self.pool.enums[e]
                        .values
                        .first()
                        .map(|&v| self.pool.enum_values[v].number),
                    _ => None,
                };
                DefaultValue::Enum(first.unwrap_or(0))
            }
        }
    }

    fn parse_default(
        &self,
        full_name: &str,
        field_type: FieldType,
        type_ref: TypeRef,
        text: &str,
    ) -> Result<DefaultValue> {
        use FieldType as T;
        let bad = || invalid(format!("invalid default {text:?} for {full_name}"));
        Ok(match field_type {
            T::Bool => match text {
                "true" => DefaultValue::Bool(true),
                "false" => DefaultValue::Bool(false),
                _ => return Err(bad()),
            },
            T::Int32 | T::SInt32 | T::SFixed32 => {
                DefaultValue::Int32(parse_integer(text).and_then(|v| v.try_into().ok()).ok_or_else(bad)?)
            }
            T::Int64 | T::SInt64 | T::SFixed64 => {
                DefaultValue::Int64(parse_integer(text).and_then(|v| v.try_into().ok()).ok_or_else(bad)?)
            }
            T::UInt32 | T::Fixed32 => {
                DefaultValue::UInt32(parse_integer(text).and_then(|v| v.try_into().ok()).ok_or_else(bad)?)
            }
            T::UInt64 | T::Fixed64 => {
                DefaultValue::UInt64(parse_integer(text).and_then(|v| v.try_into().ok()).ok_or_else(bad)?)
            }
            T::Float => DefaultValue::Float(parse_float(text).ok_or_else(bad)? as f32),
            T::Double => DefaultValue::Double(parse_float(text).ok_or_else(bad)?),
            T::String => DefaultValue::String(text.to_string()),
            T::Bytes => DefaultValue::Bytes(unescape_bytes(text).ok_or_else(bad)?),
            T::Enum => {
                let TypeRef::Enum(e) = type_ref else {
                    return Err(bad());
                };
                let value = *self.pool.enums[e].by_name.get(text).ok_or_else(bad)?;
                DefaultValue::Enum(self.pool.enum_values[value].number)
            }
            T::Message | T::Group => return Err(bad()),
        })
    }

    fn index_message(&mut self, message: usize) -> Result<()> {
        let entry = &self.pool.messages[message];
        let full_name = entry.full_name.clone();
        let mut by_number = HashMap::with_capacity(entry.fields.len());
        let mut by_name = HashMap::with_capacity(entry.fields.len());
        let mut by_json_name = HashMap::with_capacity(entry.fields.len());
        for (local, &field) in entry.fields.iter().enumerate() {
            let f = &self.pool.fields[field];
            if by_number.insert(f.number, local).is_some() {
                return Err(invalid(format!(
                    "{full_name} uses field number {} more than once",
                    f.number
                )));
            }
            if entry.reserved_ranges.iter().any(|r| r.contains(&f.number)) {
                return Err(invalid(format!(
                    "{} uses reserved field number {}",
                    f.full_name, f.number
                )));
            }
            if entry.reserved_names.iter().any(|n| *n == f.name) {
                return Err(invalid(format!("{} uses a reserved name", f.full_name)));
            }
            if entry.extension_ranges.iter().any(|r| r.contains(&f.number)) {
                return Err(invalid(format!(
                    "{} overlaps an extension range",
                    f.full_name
                )));
            }
            by_name.insert(f.name.clone(), local);
            by_json_name.insert(f.json_name.clone(), local);
        }
        if entry.is_map_entry {
            let key = by_number.get(&1).map(|&i| &self.pool.fields[entry.fields[i]]);
            let value = by_number.get(&2).map(|&i| &self.pool.fields[entry.fields[i]]);
            let valid = match (key, value) {
                (Some(k), Some(v)) => {
                    entry.fields.len() == 2
                        && k.label == Label::Optional
                        && v.label == Label::Optional
                        && k.field_type.is_valid_map_key()
                }
                _ => false,
            };
            if !valid {
                return Err(invalid(format!("{full_name} is not a valid map entry")));
            }
        }
        let mut in_number_order = entry.fields.clone();
        in_number_order.sort_by_key(|&f| self.pool.fields[f].number);

        let oneofs = entry.oneofs.clone();
        for oneof in oneofs {
            let members = &self.pool.oneofs[oneof].fields;
            if members.is_empty() {
                return Err(invalid(format!(
                    "oneof {} has no fields",
                    self.pool.oneofs[oneof].full_name
                )));
            }
            let synthetic =
                members.len() == 1 && self.pool.fields[members[0]].proto3_optional;
            self.pool.oneofs[oneof].synthetic = synthetic;
        }

        let entry = &mut self.pool.messages[message];
        entry.by_number = by_number;
        entry.by_name = by_name;
        entry.by_json_name = by_json_name;
        entry.fields_in_number_order = in_number_order;
        Ok(())
    }
}

fn parse_integer(text: &str) -> Option<i128> {
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        i128::from_str_radix(hex, 16).ok()?
    } else if body.len() > 1 && body.starts_with('0') {
        i128::from_str_radix(&body[1..], 8).ok()?
    } else {
        body.parse().ok()?
    };
    Some(if negative { -value } else { value })
}

fn parse_float(text: &str) -> Option<f64> {
    match text {
        "inf" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        "nan" => Some(f64::NAN),
        _ => text.parse().ok(),
    }
}

/// Decodes the C escapes protoc uses for `bytes` defaults.
fn unescape_bytes(text: &str) -> Option<Vec<u8>> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        i += 1;
        if c != b'\\' {
            out.push(c);
            continue;
        }
        let escape = *bytes.get(i)?;
        i += 1;
        match escape {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0C),
            b'v' => out.push(0x0B),
            b'\\' | b'\'' | b'"' | b'?' => out.push(escape),
            b'0'..=b'7' => {
                let mut value = u32::from(escape - b'0');
                for _ in 0..2 {
                    match bytes.get(i) {
                        Some(&d @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(d - b'0');
                            i += 1;
                        }
                        _ => break,
                    }
                }
                out.push(u8::try_from(value).ok()?);
            }
            b'x' | b'X' => {
                let mut value = 0u32;
                let mut digits = 0;
                while digits < 2 {
                    match bytes.get(i).and_then(|&d| char::from(d).to_digit(16)) {
                        Some(d) => {
                            value = value * 16 + d;
                            i += 1;
                            digits += 1;
                        }
                        None => break,
                    }
                }
                if digits == 0 {
                    return None;
                }
                out.push(value as u8);
            }
            _ => return None,
        }
    }
    Some(out)
}

macro_rules! handle {
    ($name:ident, $table:ident, $entry:ty) => {
        #[derive(Clone)]
        pub struct $name {
            pool: DescriptorPool,
            index: usize,
        }

        impl $name {
            fn new(pool: DescriptorPool, index: usize) -> Self {
                $name { pool, index }
            }

            fn entry(&self) -> &$entry {
                &self.pool.inner.$table[self.index]
            }

            pub fn pool(&self) -> &DescriptorPool {
                &self.pool
            }

            pub fn full_name(&self) -> &str {
                &self.entry().full_name
            }
        }

        // Identity is the fully-qualified name, so descriptors from two pools
        // built from the same schema compare equal.
        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                (Arc::ptr_eq(&self.pool.inner, &other.pool.inner) && self.index == other.index)
                    || self.full_name() == other.full_name()
            }
        }

        impl Eq for $name {}

        impl core::hash::Hash for $name {
            fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
                self.full_name().hash(state)
            }
        }

        impl core::fmt::Debug for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.full_name())
            }
        }
    };
}

handle!(MessageDescriptor, messages, MessageEntry);
handle!(FieldDescriptor, fields, FieldEntry);
handle!(OneofDescriptor, oneofs, OneofEntry);
handle!(EnumDescriptor, enums, EnumEntry);
handle!(EnumValueDescriptor, enum_values, EnumValueEntry);

/// One schema file.
#[derive(Clone)]
pub struct FileDescriptor {
    pool: DescriptorPool,
    index: usize,
}

impl FileDescriptor {
    fn new(pool: DescriptorPool, index: usize) -> Self {
        FileDescriptor { pool, index }
    }

    fn entry(&self) -> &FileEntry {
        &self.pool.inner.files[self.index]
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    pub fn name(&self) -> &str {
        self.entry().proto.name()
    }

    pub fn package(&self) -> &str {
        self.entry().proto.package()
    }

    pub fn syntax(&self) -> Syntax {
        self.entry().syntax
    }

    pub fn dependencies(&self) -> impl ExactSizeIterator<Item = FileDescriptor> + '_ {
        self.entry()
            .dependencies
            .iter()
            .map(|&i| FileDescriptor::new(self.pool.clone(), i))
    }

    /// Top-level messages, in declaration order.
    pub fn messages(&self) -> impl ExactSizeIterator<Item = MessageDescriptor> + '_ {
        self.entry()
            .messages
            .iter()
            .map(|&i| MessageDescriptor::new(self.pool.clone(), i))
    }

    pub fn enums(&self) -> impl ExactSizeIterator<Item = EnumDescriptor> + '_ {
        self.entry()
            .enums
            .iter()
            .map(|&i| EnumDescriptor::new(self.pool.clone(), i))
    }

    /// Extensions declared at file scope.
    pub fn extensions(&self) -> impl ExactSizeIterator<Item = FieldDescriptor> + '_ {
        self.entry()
            .extensions
            .iter()
            .map(|&i| FieldDescriptor::new(self.pool.clone(), i))
    }

    /// The descriptor proto this file was built from.
    pub fn to_proto(&self) -> FileDescriptorProto {
        self.entry().proto.clone()
    }

    pub fn encode_to_vec(&self) -> Vec<u8> {
        self.entry().proto.encode_to_vec()
    }
}

impl PartialEq for FileDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for FileDescriptor {}

impl core::fmt::Debug for FileDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "FileDescriptor({})", self.name())
    }
}

impl MessageDescriptor {
    pub fn name(&self) -> &str {
        &self.entry().name
    }

    pub fn file(&self) -> FileDescriptor {
        FileDescriptor::new(self.pool.clone(), self.entry().file)
    }

    pub fn syntax(&self) -> Syntax {
        self.pool.inner.files[self.entry().file].syntax
    }

    /// Enclosing message of a nested type.
    pub fn parent_message(&self) -> Option<MessageDescriptor> {
        self.entry()
            .parent
            .map(|i| MessageDescriptor::new(self.pool.clone(), i))
    }

    pub fn field_count(&self) -> usize {
        self.entry().fields.len()
    }

    // Default of the field at declaration `index`, borrowed from the pool.
    pub(crate) fn field_default(&self, index: usize) -> Option<&DefaultValue> {
        let field = *self.entry().fields.get(index)?;
        self.pool.inner.fields[field].default.as_ref()
    }

    /// Field by declaration index.
    pub fn field(&self, index: usize) -> Option<FieldDescriptor> {
        let field = *self.entry().fields.get(index)?;
        Some(FieldDescriptor::new(self.pool.clone(), field))
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> impl ExactSizeIterator<Item = FieldDescriptor> + '_ {
        self.entry()
            .fields
            .iter()
            .map(|&i| FieldDescriptor::new(self.pool.clone(), i))
    }

    pub fn fields_in_number_order(&self) -> impl ExactSizeIterator<Item = FieldDescriptor> + '_ {
        self.entry()
            .fields_in_number_order
            .iter()
            .map(|&i| FieldDescriptor::new(self.pool.clone(), i))
    }

    pub fn field_by_number(&self, number: u32) -> Option<FieldDescriptor> {
        let local = *self.entry().by_number.get(&number)?;
        self.field(local)
    }

    pub fn field_by_name(&self, name: &str) -> Option<FieldDescriptor> {
        let local = *self.entry().by_name.get(name)?;
        self.field(local)
    }

    pub fn field_by_json_name(&self, json_name: &str) -> Option<FieldDescriptor> {
        let local = *self.entry().by_json_name.get(json_name)?;
        self.field(local)
    }

    /// Number of oneofs, synthetic ones included.
    pub fn oneof_count(&self) -> usize {
        self.entry().oneofs.len()
    }

    pub fn oneofs(&self) -> impl ExactSizeIterator<Item = OneofDescriptor> + '_ {
        self.entry()
            .oneofs
            .iter()
            .map(|&i| OneofDescriptor::new(self.pool.clone(), i))
    }

    pub fn oneof_by_name(&self, name: &str) -> Option<OneofDescriptor> {
        self.oneofs().find(|o| o.name() == name)
    }

    pub fn nested_messages(&self) -> impl ExactSizeIterator<Item = MessageDescriptor> + '_ {
        self.entry()
            .nested_messages
            .iter()
            .map(|&i| MessageDescriptor::new(self.pool.clone(), i))
    }

    pub fn nested_enums(&self) -> impl ExactSizeIterator<Item = EnumDescriptor> + '_ {
        self.entry()
            .nested_enums
            .iter()
            .map(|&i| EnumDescriptor::new(self.pool.clone(), i))
    }

    /// Extensions declared inside this message's scope (not extensions of it).
    pub fn extensions(&self) -> impl ExactSizeIterator<Item = FieldDescriptor> + '_ {
        self.entry()
            .extensions
            .iter()
            .map(|&i| FieldDescriptor::new(self.pool.clone(), i))
    }

    /// Half-open extension number ranges.
    pub fn extension_ranges(&self) -> &[Range<u32>] {
        &self.entry().extension_ranges
    }

    pub fn is_extension_number(&self, number: u32) -> bool {
        self.extension_ranges().iter().any(|r| r.contains(&number))
    }

    pub fn is_map_entry(&self) -> bool {
        self.entry().is_map_entry
    }

    pub fn map_entry_key_field(&self) -> Option<FieldDescriptor> {
        self.is_map_entry().then(|| self.field_by_number(1)).flatten()
    }

    pub fn map_entry_value_field(&self) -> Option<FieldDescriptor> {
        self.is_map_entry().then(|| self.field_by_number(2)).flatten()
    }

    pub fn well_known_type(&self) -> Option<WellKnownType> {
        self.entry().well_known
    }

    pub fn is_wrapper(&self) -> bool {
        self.well_known_type().is_some_and(WellKnownType::is_wrapper)
    }
}

impl FieldDescriptor {
    pub fn name(&self) -> &str {
        &self.entry().name
    }

    pub fn json_name(&self) -> &str {
        &self.entry().json_name
    }

    pub fn number(&self) -> u32 {
        self.entry().number
    }

    /// Declaration index within the containing message. For extensions, the
    /// index within the declaring scope.
    pub fn index(&self) -> usize {
        self.entry().index
    }

    pub fn field_type(&self) -> FieldType {
        self.entry().field_type
    }

    pub fn label(&self) -> Label {
        self.entry().label
    }

    pub fn is_repeated(&self) -> bool {
        self.label() == Label::Repeated
    }

    pub fn is_required(&self) -> bool {
        self.label() == Label::Required
    }

    pub fn is_map(&self) -> bool {
        self.is_repeated() && self.message_type().is_some_and(|m| m.is_map_entry())
    }

    pub fn is_packed(&self) -> bool {
        self.entry().packed
    }

    pub fn is_extension(&self) -> bool {
        self.entry().is_extension
    }

    pub fn is_proto3_optional(&self) -> bool {
        self.entry().proto3_optional
    }

    pub fn has_presence(&self) -> bool {
        self.entry().has_presence
    }

    /// The message this field belongs to; for an extension, the extendee.
    pub fn containing_type(&self) -> MessageDescriptor {
        MessageDescriptor::new(self.pool.clone(), self.entry().containing)
    }

    /// Message an extension is declared inside, if not at file scope.
    pub fn extension_scope(&self) -> Option<MessageDescriptor> {
        self.entry()
            .extension_scope
            .map(|i| MessageDescriptor::new(self.pool.clone(), i))
    }

    pub fn file(&self) -> FileDescriptor {
        FileDescriptor::new(self.pool.clone(), self.entry().file)
    }

    /// Containing oneof, synthetic proto3 `optional` oneofs included.
    pub fn containing_oneof(&self) -> Option<OneofDescriptor> {
        self.entry()
            .oneof
            .map(|i| OneofDescriptor::new(self.pool.clone(), i))
    }

    /// Containing oneof, unless it is synthetic.
    pub fn real_containing_oneof(&self) -> Option<OneofDescriptor> {
        self.containing_oneof().filter(|o| !o.is_synthetic())
    }

    pub fn message_type(&self) -> Option<MessageDescriptor> {
        match self.entry().type_ref {
            TypeRef::Message(i) => Some(MessageDescriptor::new(self.pool.clone(), i)),
            _ => None,
        }
    }

    pub fn enum_type(&self) -> Option<EnumDescriptor> {
        match self.entry().type_ref {
            TypeRef::Enum(i) => Some(EnumDescriptor::new(self.pool.clone(), i)),
            _ => None,
        }
    }

    /// Default of a singular scalar field; `None` for message and repeated fields.
    pub fn default_value(&self) -> Option<&DefaultValue> {
        self.entry().default.as_ref()
    }

    pub fn has_default_value(&self) -> bool {
        self.entry().has_explicit_default
    }

    /// Wire type of a single element, ignoring packing.
    pub fn wire_type(&self) -> WireType {
        self.field_type().wire_type()
    }

    /// Whether this field's enum rejects undeclared numbers.
    pub fn is_closed_enum(&self) -> bool {
        self.enum_type().is_some_and(|e| e.is_closed())
    }
}

impl OneofDescriptor {
    pub fn name(&self) -> &str {
        &self.entry().name
    }

    /// Position among the containing message's oneofs.
    pub fn index(&self) -> usize {
        self.entry().index
    }

    pub fn containing_type(&self) -> MessageDescriptor {
        MessageDescriptor::new(self.pool.clone(), self.entry().message)
    }

    pub fn fields(&self) -> impl ExactSizeIterator<Item = FieldDescriptor> + '_ {
        self.entry()
            .fields
            .iter()
            .map(|&i| FieldDescriptor::new(self.pool.clone(), i))
    }

    /// A oneof the compiler made up for a proto3 `optional` field.
    pub fn is_synthetic(&self) -> bool {
        self.entry().synthetic
    }
}

impl EnumDescriptor {
    pub fn name(&self) -> &str {
        &self.entry().name
    }

    pub fn file(&self) -> FileDescriptor {
        FileDescriptor::new(self.pool.clone(), self.entry().file)
    }

    pub fn parent_message(&self) -> Option<MessageDescriptor> {
        self.entry()
            .parent
            .map(|i| MessageDescriptor::new(self.pool.clone(), i))
    }

    pub fn values(&self) -> impl ExactSizeIterator<Item = EnumValueDescriptor> + '_ {
        self.entry()
            .values
            .iter()
            .map(|&i| EnumValueDescriptor::new(self.pool.clone(), i))
    }

    pub fn value_by_name(&self, name: &str) -> Option<EnumValueDescriptor> {
        let index = *self.entry().by_name.get(name)?;
        Some(EnumValueDescriptor::new(self.pool.clone(), index))
    }

    /// First declared value with `number`, when aliases share it.
    pub fn value_by_number(&self, number: i32) -> Option<EnumValueDescriptor> {
        let index = *self.entry().by_number.get(&number)?;
        Some(EnumValueDescriptor::new(self.pool.clone(), index))
    }

    pub fn default_value(&self) -> EnumValueDescriptor {
        EnumValueDescriptor::new(self.pool.clone(), self.entry().values[0])
    }

    /// Closed (proto2) enums reject numbers that are not declared.
    pub fn is_closed(&self) -> bool {
        self.entry().closed
    }
}

impl EnumValueDescriptor {
    pub fn name(&self) -> &str {
        &self.entry().name
    }

    pub fn number(&self) -> i32 {
        self.entry().number
    }

    pub fn index(&self) -> usize {
        self.entry().index
    }

    pub fn enum_type(&self) -> EnumDescriptor {
        EnumDescriptor::new(self.pool.clone(), self.entry().enum_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor_proto::{DescriptorProto as Msg, FieldDescriptorProto as Field};
    use pretty_assertions::assert_eq;

    use FieldType as T;
    use Label::{Optional as Opt, Repeated as Rep, Required as Req};

    fn shapes_file() -> FileDescriptorProto {
        FileDescriptorProto::new("shapes.proto", "demo.shapes", "proto2")
            .with_enum(EnumDescriptorProto::new(
                "Color",
                &[("RED", 1), ("CRIMSON", 1), ("BLUE", 2)],
            ).with_allow_alias())
            .with_message(
                Msg::new("Point")
                    .with_field(Field::new("x_pos", 1, Req, T::SInt32))
                    .with_field(Field::new("y_pos", 2, Opt, T::SInt32).with_default("-7"))
                    .with_field(Field::new("color", 3, Opt, T::Enum).with_type_name("Color"))
                    .with_field(Field::new("tag", 4, Opt, T::Bytes).with_default("a\\001\\x02"))
                    .with_field(Field::new("ratio", 5, Opt, T::Double).with_default("-inf"))
                    .with_extension_range(100, 200),
            )
            .with_message(
                Msg::new("Polygon")
                    .with_field(Field::new("points", 1, Rep, T::Message).with_type_name("Point"))
                    .with_field(
                        Field::new("labels", 2, Rep, T::Message).with_type_name("LabelsEntry"),
                    )
                    .with_field(Field::new("name", 3, Opt, T::String).with_oneof_index(0))
                    .with_field(Field::new("id", 4, Opt, T::Int64).with_oneof_index(0))
                    .with_oneof("ident")
                    .with_nested(
                        Msg::new("LabelsEntry")
                            .with_field(Field::new("key", 1, Opt, T::String))
                            .with_field(Field::new("value", 2, Opt, T::Int32))
                            .with_map_entry(),
                    ),
            )
            .with_extension(
                Field::new("weight", 100, Opt, T::Float).with_extendee(".demo.shapes.Point"),
            )
    }

    #[test]
    fn builds_and_indexes_a_file() {
        let mut pool = DescriptorPool::new();
        let file = pool.add_file_descriptor_proto(shapes_file()).unwrap();
        assert_eq!(file.syntax(), Syntax::Proto2);
        assert_eq!(file.messages().len(), 2);

        let point = pool.find_message_by_name("demo.shapes.Point").unwrap();
        let x = point.field_by_name("x_pos").unwrap();
        assert_eq!(x.json_name(), "xPos");
        assert!(x.is_required());
        assert_eq!(point.field_by_json_name("yPos").unwrap().number(), 2);
        assert_eq!(
            point.field_by_number(2).unwrap().default_value(),
            Some(&DefaultValue::Int32(-7))
        );
        assert_eq!(
            point.field_by_number(4).unwrap().default_value(),
            Some(&DefaultValue::Bytes(vec![b'a', 1, 2]))
        );
        assert_eq!(
            point.field_by_number(5).unwrap().default_value(),
            Some(&DefaultValue::Double(f64::NEG_INFINITY))
        );
        let color = point.field_by_name("color").unwrap();
        assert_eq!(color.enum_type().unwrap().full_name(), "demo.shapes.Color");
        assert_eq!(color.default_value(), Some(&DefaultValue::Enum(1)));
        assert!(color.is_closed_enum());

        let polygon = pool.find_message_by_name(".demo.shapes.Polygon").unwrap();
        assert!(polygon.field_by_name("labels").unwrap().is_map());
        assert!(!polygon.field_by_name("points").unwrap().is_map());
        let ident = polygon.oneof_by_name("ident").unwrap();
        assert_eq!(
            ident.fields().map(|f| f.number()).collect::<Vec<_>>(),
            vec![3, 4]
        );
        assert_eq!(
            polygon.field_by_number(4).unwrap().containing_oneof(),
            Some(ident)
        );

        let weight = pool.find_extension_by_name("demo.shapes.weight").unwrap();
        assert!(weight.is_extension());
        assert_eq!(weight.containing_type(), point);
        assert_eq!(pool.find_extension_by_number(&point, 100), Some(weight));
    }

    #[test]
    fn enum_aliases_resolve_to_first_name() {
        let mut pool = DescriptorPool::new();
        pool.add_file_descriptor_proto(shapes_file()).unwrap();
        let color = pool.find_enum_by_name("demo.shapes.Color").unwrap();
        assert_eq!(color.value_by_number(1).unwrap().name(), "RED");
        assert_eq!(color.value_by_name("CRIMSON").unwrap().number(), 1);
        assert_eq!(color.values().len(), 3);
    }

    #[test]
    fn missing_dependency_is_reported() {
        let mut pool = DescriptorPool::new();
        let file = FileDescriptorProto::new("b.proto", "b", "proto3").with_dependency("a.proto");
        assert_eq!(
            pool.add_file_descriptor_proto(file).unwrap_err(),
            Error::DependencyNotFound("a.proto".to_string())
        );
        assert_eq!(pool.files().len(), 0);
    }

    #[test]
    fn invalid_files_leave_the_pool_untouched() {
        let mut pool = DescriptorPool::new();
        let reserved = FileDescriptorProto::new("r.proto", "r", "proto2")
            .with_message(Msg::new("M").with_field(Field::new("f", 19_500, Opt, T::Int32)));
        assert!(matches!(
            pool.add_file_descriptor_proto(reserved),
            Err(Error::InvalidDescriptor(_))
        ));
        let duplicate = FileDescriptorProto::new("d.proto", "d", "proto2")
            .with_message(Msg::new("M").with_field(Field::new("f", 1, Opt, T::Int32)))
            .with_message(Msg::new("M"));
        assert!(matches!(
            pool.add_file_descriptor_proto(duplicate),
            Err(Error::InvalidDescriptor(_))
        ));
        let same_number = FileDescriptorProto::new("n.proto", "n", "proto2").with_message(
            Msg::new("M")
                .with_field(Field::new("a", 1, Opt, T::Int32))
                .with_field(Field::new("b", 1, Opt, T::Int32)),
        );
        assert!(pool.add_file_descriptor_proto(same_number).is_err());
        assert_eq!(pool.files().len(), 0);
        assert!(pool.find_message_by_name("d.M").is_none());
    }

    #[test]
    fn relative_names_resolve_from_inner_scope_outwards() {
        let mut pool = DescriptorPool::new();
        let file = FileDescriptorProto::new("scope.proto", "outer.inner", "proto3")
            .with_message(Msg::new("Leaf"))
            .with_message(
                Msg::new("Holder")
                    .with_nested(Msg::new("Leaf"))
                    .with_field(Field::new("near", 1, Opt, T::Message).with_type_name("Leaf"))
                    .with_field(
                        Field::new("far", 2, Opt, T::Message).with_type_name("inner.Leaf"),
                    )
                    .with_field(
                        Field::new("abs", 3, Opt, T::Message).with_type_name(".outer.inner.Leaf"),
                    ),
            );
        pool.add_file_descriptor_proto(file).unwrap();
        let holder = pool.find_message_by_name("outer.inner.Holder").unwrap();
        let target = |name: &str| {
            holder
                .field_by_name(name)
                .and_then(|f| f.message_type())
                .map(|m| m.full_name().to_string())
        };
        assert_eq!(target("near").as_deref(), Some("outer.inner.Holder.Leaf"));
        assert_eq!(target("far").as_deref(), Some("outer.inner.Leaf"));
        assert_eq!(target("abs").as_deref(), Some("outer.inner.Leaf"));
    }

    #[test]
    fn proto3_presence_and_packing() {
        let mut pool = DescriptorPool::new();
        let file = FileDescriptorProto::new("p3.proto", "p3", "proto3").with_message(
            Msg::new("M")
                .with_field(Field::new("plain", 1, Opt, T::Int32))
                .with_field(
                    Field::new("maybe", 2, Opt, T::Int32)
                        .with_oneof_index(0)
                        .with_proto3_optional(),
                )
                .with_field(Field::new("nums", 3, Rep, T::Int32))
                .with_field(Field::new("raw", 4, Rep, T::Int32).with_packed(false))
                .with_oneof("_maybe"),
        );
        pool.add_file_descriptor_proto(file).unwrap();
        let m = pool.find_message_by_name("p3.M").unwrap();
        assert!(!m.field_by_number(1).unwrap().has_presence());
        let maybe = m.field_by_number(2).unwrap();
        assert!(maybe.has_presence());
        assert!(maybe.containing_oneof().unwrap().is_synthetic());
        assert!(maybe.real_containing_oneof().is_none());
        assert!(m.field_by_number(3).unwrap().is_packed());
        assert!(!m.field_by_number(4).unwrap().is_packed());
    }

    #[test]
    fn file_set_loads_in_dependency_order() {
        let base = FileDescriptorProto::new("base.proto", "base", "proto3")
            .with_message(Msg::new("Id").with_field(Field::new("v", 1, Opt, T::UInt64)));
        let user = FileDescriptorProto::new("user.proto", "user", "proto3")
            .with_dependency("base.proto")
            .with_message(
                Msg::new("User").with_field(
                    Field::new("id", 1, Opt, T::Message).with_type_name(".base.Id"),
                ),
            );
        let set = FileDescriptorSet {
            file: vec![user, base],
            ..Default::default()
        };
        let pool = DescriptorPool::decode_file_descriptor_set(&set.encode_to_vec()).unwrap();
        assert_eq!(
            pool.files().map(|f| f.name().to_string()).collect::<Vec<_>>(),
            vec!["base.proto", "user.proto"]
        );
        let user = pool.find_message_by_name("user.User").unwrap();
        assert_eq!(
            user.field_by_number(1).unwrap().message_type().unwrap().full_name(),
            "base.Id"
        );
    }

    #[test]
    fn descriptor_schema_describes_itself() {
        let pool = DescriptorPool::with_descriptor_schema().unwrap();
        let file = pool.find_file_by_name("google/protobuf/descriptor.proto").unwrap();
        assert_eq!(file.to_proto(), bootstrap_file());
        let field = pool
            .find_message_by_name("google.protobuf.FieldDescriptorProto")
            .unwrap();
        let label = field.field_by_name("label").unwrap();
        assert_eq!(
            label.enum_type().unwrap().full_name(),
            "google.protobuf.FieldDescriptorProto.Label"
        );
        assert_eq!(field.field_by_name("proto3_optional").unwrap().json_name(), "proto3Optional");
    }

    #[test]
    fn json_names_follow_protoc() {
        assert_eq!(to_json_name("foo_bar_baz"), "fooBarBaz");
        assert_eq!(to_json_name("foo__bar"), "fooBar");
        assert_eq!(to_json_name("_foo"), "Foo");
        assert_eq!(to_json_name("field0name"), "field0name");
    }

    #[test]
    fn pool_is_shareable_across_threads() {
        let mut pool = DescriptorPool::new();
        pool.add_file_descriptor_proto(shapes_file()).unwrap();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || pool.find_message_by_name("demo.shapes.Point").is_some())
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap());
        }
    }
}

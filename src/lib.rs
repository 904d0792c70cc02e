//! Schema-driven protobuf binary codec with arena-owned messages.
//!
//! Messages are described at runtime by a [`DescriptorPool`] and live in an
//! [`Arena`] as [`Message`] handles. [`DynamicMessageRef`] and
//! [`DynamicMessage`] read and mutate them by field descriptor; generated
//! types (see [`Protobuf`]) are thin typed wrappers over the same runtime.
//!
//! ```
//! use protoarena::descriptor_proto::{
//!     DescriptorProto, FieldDescriptorProto, FieldType, FileDescriptorProto, Label,
//! };
//! use protoarena::{Arena, DecodeOptions, DescriptorPool, Global, Value};
//!
//! let mut pool = DescriptorPool::new();
//! pool.add_file_descriptor_proto(
//!     FileDescriptorProto::new("m.proto", "demo", "proto2").with_message(
//!         DescriptorProto::new("M").with_field(FieldDescriptorProto::new(
//!             "a",
//!             1,
//!             Label::Optional,
//!             FieldType::Int32,
//!         )),
//!     ),
//! )
//! .unwrap();
//! let desc = pool.find_message_by_name("demo.M").unwrap();
//!
//! let mut arena = Arena::new(&Global);
//! let msg = protoarena::decode(&mut arena, &desc, &[0x08, 0x96, 0x01], &DecodeOptions::default()).unwrap();
//! let view = arena.message(msg).unwrap();
//! assert_eq!(view.get_by_name("a").unwrap(), Some(Value::Int32(150)));
//! assert_eq!(view.encode_vec().unwrap(), [0x08, 0x96, 0x01]);
//! ```

pub mod arena;
pub mod base;
pub mod containers;
pub mod decoding;
pub mod descriptor_pool;
pub mod descriptor_proto;
pub mod encoding;
pub mod error;
pub mod extension;
pub mod reflection;
pub mod unknown;
pub mod wire;

#[cfg(feature = "serde_support")]
pub mod serde;

pub mod generated_code_only;
pub mod test_utils;

pub use allocator_api2::alloc::{Allocator, Global};

pub use arena::{Arena, ArenaId};
pub use base::{Message, Protobuf};
pub use decoding::{DecodeOptions, decode, decode_length_delimited};
pub use descriptor_pool::{
    DescriptorPool, EnumDescriptor, EnumValueDescriptor, FieldDescriptor, FileDescriptor,
    MessageDescriptor, OneofDescriptor, Syntax,
};
pub use encoding::{EncodeOptions, encode, encode_length_delimited};
pub use error::{Error, Result};
pub use extension::ExtensionRegistry;
pub use reflection::{DynamicMessage, DynamicMessageRef, ListRef, MapMut, MapRef, RepeatedMut, Value};
pub use unknown::UnknownFieldSet;

#[cfg(feature = "serde_support")]
pub use crate::serde::{JsonMessage, JsonOptions, decode_json};

/// Conveniences every generated type gets.
pub trait ProtobufExt: Protobuf {
    /// A new empty message in `arena`.
    fn new_in(arena: &mut Arena<'_>) -> Result<Self> {
        let desc = Self::descriptor()?;
        Ok(Self::from_message_unchecked(arena.new_message(&desc)))
    }

    /// Wraps `msg` after checking that it is a live `Self` in `arena`.
    fn from_message(arena: &Arena<'_>, msg: Message) -> Result<Self> {
        generated_code_only::check_type(arena, msg, Self::FULL_NAME)?;
        Ok(Self::from_message_unchecked(msg))
    }

    fn as_dyn<'a, 'alloc>(&self, arena: &'a Arena<'alloc>) -> Result<DynamicMessageRef<'a, 'alloc>> {
        arena.message(self.as_message())
    }

    fn as_dyn_mut<'a, 'alloc>(&self, arena: &'a mut Arena<'alloc>) -> Result<DynamicMessage<'a, 'alloc>> {
        arena.message_mut(self.as_message())
    }

    fn decode(arena: &mut Arena<'_>, bytes: &[u8]) -> Result<Self> {
        Self::decode_with(arena, bytes, &DecodeOptions::default())
    }

    fn decode_with(arena: &mut Arena<'_>, bytes: &[u8], options: &DecodeOptions<'_>) -> Result<Self> {
        let desc = Self::descriptor()?;
        Ok(Self::from_message_unchecked(decode(arena, &desc, bytes, options)?))
    }

    fn merge_from_bytes(&self, arena: &mut Arena<'_>, bytes: &[u8]) -> Result<()> {
        self.as_dyn_mut(arena)?.merge_from_bytes(bytes)
    }

    fn encode_vec(&self, arena: &Arena<'_>) -> Result<Vec<u8>> {
        encode(arena, self.as_message(), &EncodeOptions::default())
    }

    fn is_initialized(&self, arena: &Arena<'_>) -> Result<bool> {
        Ok(self.as_dyn(arena)?.is_initialized())
    }

    /// Checks required fields and freezes the message.
    fn build(&self, arena: &mut Arena<'_>) -> Result<Self> {
        self.as_dyn_mut(arena)?.build()?;
        Ok(*self)
    }

    fn build_partial(&self, arena: &mut Arena<'_>) -> Result<Self> {
        self.as_dyn_mut(arena)?.build_partial();
        Ok(*self)
    }
}

impl<T: Protobuf> ProtobufExt for T {}

//! Registry of extension fields consulted while decoding.

use std::collections::HashMap;

use crate::descriptor_pool::{DescriptorPool, FieldDescriptor};
use crate::{Error, Result};

/// Maps `(extendee full name, field number)` to the extension's descriptor.
///
/// Decoding without a registry keeps extension data in the unknown field
/// set; decoding with one recovers it into typed extension values.
#[derive(Debug, Clone, Default)]
pub struct ExtensionRegistry {
    by_key: HashMap<(String, u32), FieldDescriptor>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every extension declared in `pool`.
    pub fn from_pool(pool: &DescriptorPool) -> Result<Self> {
        let mut registry = Self::new();
        for ext in pool.extensions() {
            registry.register(ext)?;
        }
        Ok(registry)
    }

    /// Registering the same descriptor twice is a no-op; a different
    /// descriptor under an occupied key is rejected.
    pub fn register(&mut self, field: FieldDescriptor) -> Result<()> {
        if !field.is_extension() {
            return Err(Error::InvalidDescriptor(format!(
                "{} is not an extension",
                field.full_name()
            )));
        }
        let extendee = field.containing_type().full_name().to_string();
        let number = field.number();
        match self.by_key.get(&(extendee.clone(), number)) {
            Some(existing) if *existing == field => Ok(()),
            Some(_) => Err(Error::DuplicateExtension { extendee, number }),
            None => {
                self.by_key.insert((extendee, number), field);
                Ok(())
            }
        }
    }

    pub fn lookup(&self, extendee: &str, number: u32) -> Option<&FieldDescriptor> {
        self.by_key.get(&(extendee.to_string(), number))
    }

    /// Extension by its fully-qualified name.
    pub fn find_by_name(&self, full_name: &str) -> Option<&FieldDescriptor> {
        self.by_key.values().find(|f| f.full_name() == full_name)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.by_key.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor_proto::{
        DescriptorProto, FieldDescriptorProto, FieldType, FileDescriptorProto, Label,
    };

    fn pool(ext_name: &str, file_name: &str) -> DescriptorPool {
        let mut pool = DescriptorPool::new();
        pool.add_file_descriptor_proto(
            FileDescriptorProto::new(file_name, "ext", "proto2")
                .with_message(DescriptorProto::new("Base").with_extension_range(10, 20))
                .with_extension(
                    FieldDescriptorProto::new(ext_name, 10, Label::Optional, FieldType::Int32)
                        .with_extendee("Base"),
                ),
        )
        .unwrap();
        pool
    }

    #[test]
    fn register_and_lookup() {
        let pool = pool("count", "a.proto");
        let mut registry = ExtensionRegistry::from_pool(&pool).unwrap();
        assert_eq!(registry.len(), 1);
        let ext = registry.lookup("ext.Base", 10).unwrap().clone();
        assert_eq!(ext.full_name(), "ext.count");
        assert!(registry.lookup("ext.Base", 11).is_none());
        registry.register(ext).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.find_by_name("ext.count").is_some());
    }

    #[test]
    fn conflicting_registration_fails() {
        let mut registry = ExtensionRegistry::from_pool(&pool("count", "a.proto")).unwrap();
        let other = pool("total", "b.proto");
        let conflicting = other.find_extension_by_name("ext.total").unwrap();
        assert_eq!(
            registry.register(conflicting),
            Err(Error::DuplicateExtension {
                extendee: "ext.Base".to_string(),
                number: 10
            })
        );
    }

    #[test]
    fn regular_fields_are_rejected() {
        let mut pool = DescriptorPool::new();
        pool.add_file_descriptor_proto(
            FileDescriptorProto::new("c.proto", "c", "proto3").with_message(
                DescriptorProto::new("M").with_field(FieldDescriptorProto::new(
                    "f",
                    1,
                    Label::Optional,
                    FieldType::Int32,
                )),
            ),
        )
        .unwrap();
        let field = pool.find_message_by_name("c.M").unwrap().field(0).unwrap();
        assert!(matches!(
            ExtensionRegistry::new().register(field),
            Err(Error::InvalidDescriptor(_))
        ));
    }
}

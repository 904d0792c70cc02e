use std::collections::{BTreeMap, HashSet};

use anyhow::{Context, Result};
use proc_macro2::{Ident, Literal, TokenStream};
use protoarena::descriptor_proto::FieldType;
use protoarena::{DescriptorPool, EnumDescriptor, FieldDescriptor, MessageDescriptor, OneofDescriptor};
use quote::{format_ident, quote};

use super::names::{
    affixed_ident, field_ident, module_ident, relative_path, scalar_type_tokens,
    to_pascal_case, to_snake_case, value_accessor, value_variant,
};

type ModulePath = Vec<String>;

/// Items grouped by the module they are emitted into.
#[derive(Default)]
struct ModuleTree {
    items: BTreeMap<ModulePath, Vec<TokenStream>>,
}

impl ModuleTree {
    fn push(&mut self, path: &[String], item: TokenStream) {
        for len in 0..path.len() {
            self.items.entry(path[..len].to_vec()).or_default();
        }
        self.items.entry(path.to_vec()).or_default().push(item);
    }

    fn render(&self, path: &[String]) -> TokenStream {
        let items = self.items.get(path).into_iter().flatten();
        let children = self
            .items
            .keys()
            .filter(|k| k.len() == path.len() + 1 && k.starts_with(path))
            .map(|k| {
                let name = module_ident(&k[path.len()]);
                let body = self.render(k);
                quote! {
                    pub mod #name {
                        #body
                    }
                }
            });
        quote! {
            #(#items)*
            #(#children)*
        }
    }
}

fn package_path(package: &str) -> ModulePath {
    package
        .split('.')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Module holding message `desc`.
fn message_module(desc: &MessageDescriptor) -> ModulePath {
    let mut path = package_path(desc.file().package());
    let mut parents = Vec::new();
    let mut parent = desc.parent_message();
    while let Some(p) = parent {
        parents.push(to_snake_case(p.name()));
        parent = p.parent_message();
    }
    path.extend(parents.into_iter().rev());
    path
}

fn enum_module(desc: &EnumDescriptor) -> ModulePath {
    match desc.parent_message() {
        Some(parent) => {
            let mut path = message_module(&parent);
            path.push(to_snake_case(parent.name()));
            path
        }
        None => package_path(desc.file().package()),
    }
}

fn message_path(from: &[String], desc: &MessageDescriptor) -> TokenStream {
    relative_path(from, &message_module(desc), &format_ident!("{}", desc.name()))
}

fn enum_path(from: &[String], desc: &EnumDescriptor) -> TokenStream {
    relative_path(from, &enum_module(desc), &format_ident!("{}", desc.name()))
}

/// Generates the module tree for every file in `pool`. `descriptor_set` is
/// embedded so generated types resolve their descriptors at run time.
pub fn generate_pool(pool: &DescriptorPool, descriptor_set: &[u8]) -> Result<TokenStream> {
    let mut tree = ModuleTree::default();
    for file in pool.files() {
        tracing::debug!(file = file.name(), "generating");
        for desc in file.enums() {
            tree.push(&enum_module(&desc), generate_enum(&desc));
        }
        for desc in file.messages() {
            generate_message(&mut tree, &desc)
                .with_context(|| format!("generating {}", desc.full_name()))?;
        }
    }

    let bytes = Literal::byte_string(descriptor_set);
    let body = tree.render(&[]);
    Ok(quote! {
        /// Serialized `FileDescriptorSet` of every type below.
        pub const FILE_DESCRIPTOR_SET: &[u8] = #bytes;

        pub static DESCRIPTOR_POOL: ::protoarena::generated_code_only::LazyPool =
            ::protoarena::generated_code_only::LazyPool::new(FILE_DESCRIPTOR_SET);

        #body
    })
}

fn generate_enum(desc: &EnumDescriptor) -> TokenStream {
    let name = format_ident!("{}", desc.name());
    let full_name = desc.full_name();
    let consts = desc.values().map(|v| {
        let ident = format_ident!("{}", v.name());
        let number = Literal::i32_unsuffixed(v.number());
        quote! { pub const #ident: #name = #name(#number); }
    });
    let mut seen = HashSet::new();
    let arms: Vec<_> = desc
        .values()
        .filter(|v| seen.insert(v.number()))
        .map(|v| {
            let number = Literal::i32_unsuffixed(v.number());
            let value_name = v.name();
            quote! { #number => Some(#value_name), }
        })
        .collect();

    quote! {
        #[doc = concat!("`", #full_name, "`")]
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
        pub struct #name(pub i32);

        impl #name {
            #(#consts)*

            /// First declared name for this number.
            pub fn name(self) -> Option<&'static str> {
                match self.0 {
                    #(#arms)*
                    _ => None,
                }
            }
        }
    }
}

fn generate_message(tree: &mut ModuleTree, desc: &MessageDescriptor) -> Result<()> {
    if desc.is_map_entry() {
        return Ok(());
    }
    let module = message_module(desc);
    let mut inner_module = module.clone();
    inner_module.push(to_snake_case(desc.name()));

    let name = format_ident!("{}", desc.name());
    let full_name = desc.full_name();
    let pool = relative_path(&module, &[], &format_ident!("DESCRIPTOR_POOL"));

    let mut accessors = Vec::new();
    for field in desc.fields() {
        accessors.push(generate_field(&module, &field)?);
    }
    for oneof in desc.oneofs().filter(|o| !o.is_synthetic()) {
        let (case_enum, accessor) = generate_oneof(&module, &inner_module, desc, &oneof)?;
        tree.push(&inner_module, case_enum);
        accessors.push(accessor);
    }

    tree.push(
        &module,
        quote! {
            #[doc = concat!("`", #full_name, "`")]
            #[repr(transparent)]
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
            pub struct #name(::protoarena::Message);

            impl ::protoarena::Protobuf for #name {
                const FULL_NAME: &'static str = #full_name;

                fn descriptor() -> ::protoarena::Result<::protoarena::MessageDescriptor> {
                    #pool.message(Self::FULL_NAME)
                }

                fn from_message_unchecked(msg: ::protoarena::Message) -> Self {
                    #name(msg)
                }

                fn as_message(&self) -> ::protoarena::Message {
                    self.0
                }
            }

            impl #name {
                #(#accessors)*
            }
        },
    );

    for nested in desc.nested_enums() {
        tree.push(&inner_module, generate_enum(&nested));
    }
    for nested in desc.nested_messages() {
        generate_message(tree, &nested)?;
    }
    Ok(())
}

/// Element type as seen by accessors, with the expression turning a
/// `Value` named `v` into it.
struct Element {
    ty: TokenStream,
    setter_ty: TokenStream,
    from_value: TokenStream,
    to_value: TokenStream,
    borrows: bool,
}

fn element(module: &[String], field: &FieldDescriptor) -> Result<Element> {
    let ty = field.field_type();
    let accessor = value_accessor(ty);
    let variant = value_variant(ty);
    Ok(match ty {
        FieldType::Message | FieldType::Group => {
            let msg = field
                .message_type()
                .with_context(|| format!("{} has no message type", field.full_name()))?;
            let path = message_path(module, &msg);
            Element {
                ty: path.clone(),
                setter_ty: path.clone(),
                from_value: quote! {
                    v.as_message().map(|m| <#path as ::protoarena::Protobuf>::from_message_unchecked(m.handle()))
                },
                to_value: quote! {},
                borrows: false,
            }
        }
        FieldType::Enum => {
            let e = field
                .enum_type()
                .with_context(|| format!("{} has no enum type", field.full_name()))?;
            let path = enum_path(module, &e);
            Element {
                ty: path.clone(),
                setter_ty: path.clone(),
                from_value: quote! { v.as_i32().map(#path) },
                to_value: quote! { ::protoarena::Value::Enum(value.0) },
                borrows: false,
            }
        }
        FieldType::String => Element {
            ty: quote! { &'a str },
            setter_ty: quote! { &str },
            from_value: quote! { v.#accessor() },
            to_value: quote! { ::protoarena::Value::#variant(value) },
            borrows: true,
        },
        FieldType::Bytes => Element {
            ty: quote! { &'a [u8] },
            setter_ty: quote! { &[u8] },
            from_value: quote! { v.#accessor() },
            to_value: quote! { ::protoarena::Value::#variant(value) },
            borrows: true,
        },
        _ => {
            let rust = scalar_type_tokens(ty);
            Element {
                ty: rust.clone(),
                setter_ty: rust,
                from_value: quote! { v.#accessor() },
                to_value: quote! { ::protoarena::Value::#variant(value) },
                borrows: false,
            }
        }
    })
}

fn generate_field(module: &[String], field: &FieldDescriptor) -> Result<TokenStream> {
    let number = Literal::u32_unsuffixed(field.number());
    let name = field.name();
    let getter = field_ident(name);
    let clear = affixed_ident("clear_", name, "");
    let gc = quote! { ::protoarena::generated_code_only };

    let clear_fn = quote! {
        pub fn #clear(&self, arena: &mut ::protoarena::Arena<'_>) -> ::protoarena::Result<()> {
            #gc::clear(arena, self.0, #number)
        }
    };

    if field.is_map() {
        return generate_map_field(module, field);
    }

    let elem = element(module, field)?;
    let Element {
        ty,
        setter_ty,
        from_value,
        to_value,
        borrows,
    } = elem;
    let lifetime = if borrows { quote! { <'a> } } else { quote! {} };
    let arena_ref = if borrows {
        quote! { &'a ::protoarena::Arena<'_> }
    } else {
        quote! { &::protoarena::Arena<'_> }
    };

    if field.is_repeated() {
        let len = affixed_ident("", name, "_len");
        let at = affixed_ident("", name, "_at");
        let list = affixed_ident("", name, "_list");
        let add = affixed_ident("add_", name, "");
        let add_fn = if field.field_type().is_message() {
            quote! {
                pub fn #add(&self, arena: &mut ::protoarena::Arena<'_>) -> ::protoarena::Result<#ty> {
                    #gc::add_message(arena, self.0, #number)
                        .map(<#ty as ::protoarena::Protobuf>::from_message_unchecked)
                }
            }
        } else {
            quote! {
                pub fn #add(&self, arena: &mut ::protoarena::Arena<'_>, value: #setter_ty) -> ::protoarena::Result<()> {
                    #gc::push(arena, self.0, #number, #to_value)
                }
            }
        };
        return Ok(quote! {
            pub fn #len(&self, arena: &::protoarena::Arena<'_>) -> ::protoarena::Result<usize> {
                #gc::len(arena, self.0, #number)
            }

            pub fn #at #lifetime(&self, arena: #arena_ref, index: usize) -> ::protoarena::Result<#ty> {
                let v = #gc::get_at(arena, self.0, #number, index)?;
                #gc::typed(#from_value, #number)
            }

            pub fn #list<'a, 'alloc>(
                &self,
                arena: &'a ::protoarena::Arena<'alloc>,
            ) -> ::protoarena::Result<::protoarena::ListRef<'a, 'alloc>> {
                #gc::get_list(arena, self.0, #number)
            }

            #add_fn
            #clear_fn
        });
    }

    let has_fn = if field.has_presence() {
        let has = affixed_ident("has_", name, "");
        quote! {
            pub fn #has(&self, arena: &::protoarena::Arena<'_>) -> ::protoarena::Result<bool> {
                #gc::has(arena, self.0, #number)
            }
        }
    } else {
        quote! {}
    };
    let set = affixed_ident("set_", name, "");

    if field.field_type().is_message() {
        let get_mut = affixed_ident("", name, "_mut");
        return Ok(quote! {
            pub fn #getter(&self, arena: &::protoarena::Arena<'_>) -> ::protoarena::Result<Option<#ty>> {
                Ok(#gc::get_message(arena, self.0, #number)?
                    .map(<#ty as ::protoarena::Protobuf>::from_message_unchecked))
            }

            /// The sub-message, created empty when unset.
            pub fn #get_mut(&self, arena: &mut ::protoarena::Arena<'_>) -> ::protoarena::Result<#ty> {
                #gc::mutable_message(arena, self.0, #number)
                    .map(<#ty as ::protoarena::Protobuf>::from_message_unchecked)
            }

            pub fn #set(&self, arena: &mut ::protoarena::Arena<'_>, value: #ty) -> ::protoarena::Result<()> {
                #gc::set_message(arena, self.0, #number, ::protoarena::Protobuf::as_message(&value))
            }

            #has_fn
            #clear_fn
        });
    }

    Ok(quote! {
        pub fn #getter #lifetime(&self, arena: #arena_ref) -> ::protoarena::Result<#ty> {
            let v = #gc::get(arena, self.0, #number)?;
            #gc::typed(v.and_then(|v| #from_value), #number)
        }

        pub fn #set(&self, arena: &mut ::protoarena::Arena<'_>, value: #setter_ty) -> ::protoarena::Result<()> {
            #gc::set(arena, self.0, #number, #to_value)
        }

        #has_fn
        #clear_fn
    })
}

fn generate_map_field(module: &[String], field: &FieldDescriptor) -> Result<TokenStream> {
    let number = Literal::u32_unsuffixed(field.number());
    let name = field.name();
    let gc = quote! { ::protoarena::generated_code_only };
    let entry_type = field
        .message_type()
        .with_context(|| format!("{} has no entry type", field.full_name()))?;
    let key_field = entry_type
        .map_entry_key_field()
        .with_context(|| format!("{} has no key", entry_type.full_name()))?;
    let value_field = entry_type
        .map_entry_value_field()
        .with_context(|| format!("{} has no value", entry_type.full_name()))?;

    let key = element(module, &key_field)?;
    let value = element(module, &value_field)?;
    let key_ty = key.setter_ty;
    let key_variant = value_variant(key_field.field_type());

    let len = affixed_ident("", name, "_len");
    let map = affixed_ident("", name, "_map");
    let clear = affixed_ident("clear_", name, "");

    let mutate = if value_field.field_type().is_message() {
        let entry = affixed_ident("", name, "_entry");
        let value_ty = value.ty;
        quote! {
            /// Value under `key`, inserted empty when absent.
            pub fn #entry(&self, arena: &mut ::protoarena::Arena<'_>, key: #key_ty) -> ::protoarena::Result<#value_ty> {
                #gc::map_entry_message(arena, self.0, #number, ::protoarena::Value::#key_variant(key))
                    .map(<#value_ty as ::protoarena::Protobuf>::from_message_unchecked)
            }
        }
    } else {
        let insert = affixed_ident("insert_", name, "");
        let value_ty = value.setter_ty;
        let to_value = value.to_value;
        quote! {
            pub fn #insert(
                &self,
                arena: &mut ::protoarena::Arena<'_>,
                key: #key_ty,
                value: #value_ty,
            ) -> ::protoarena::Result<()> {
                #gc::map_insert(arena, self.0, #number, ::protoarena::Value::#key_variant(key), #to_value)
            }
        }
    };

    Ok(quote! {
        pub fn #len(&self, arena: &::protoarena::Arena<'_>) -> ::protoarena::Result<usize> {
            #gc::len(arena, self.0, #number)
        }

        pub fn #map<'a, 'alloc>(
            &self,
            arena: &'a ::protoarena::Arena<'alloc>,
        ) -> ::protoarena::Result<::protoarena::MapRef<'a, 'alloc>> {
            #gc::get_map(arena, self.0, #number)
        }

        #mutate

        pub fn #clear(&self, arena: &mut ::protoarena::Arena<'_>) -> ::protoarena::Result<()> {
            #gc::clear(arena, self.0, #number)
        }
    })
}

/// The case enum for `oneof` (emitted into `inner_module`) and the accessor
/// returning it.
fn generate_oneof(
    module: &[String],
    inner_module: &[String],
    desc: &MessageDescriptor,
    oneof: &OneofDescriptor,
) -> Result<(TokenStream, TokenStream)> {
    let case_name = format_ident!("{}", to_pascal_case(oneof.name()));
    let accessor = field_ident(oneof.name());
    let index = Literal::usize_unsuffixed(oneof.index());
    let gc = quote! { ::protoarena::generated_code_only };

    let mut variants = Vec::new();
    let mut arms = Vec::new();
    let mut borrows = false;
    for field in oneof.fields() {
        let variant = format_ident!("{}", to_pascal_case(field.name()));
        let elem = element(inner_module, &field)?;
        borrows |= elem.borrows;
        let ty = elem.ty;
        variants.push(quote! { #variant(#ty) });

        let number = Literal::u32_unsuffixed(field.number());
        let getter = field_ident(field.name());
        let value = if field.field_type().is_message() {
            quote! { #gc::typed(self.#getter(arena)?, #number)? }
        } else {
            quote! { self.#getter(arena)? }
        };
        arms.push((variant, number, value));
    }

    let lifetime = if borrows { quote! { <'a> } } else { quote! {} };
    let case_path = relative_path(module, inner_module, &case_name);
    let arms = arms.into_iter().map(|(variant, number, value): (Ident, Literal, TokenStream)| {
        quote! { #number => #case_path::#variant(#value), }
    });
    let oneof_full_name = format!("{}.{}", desc.full_name(), oneof.name());

    let case_enum = quote! {
        #[doc = concat!("Set member of `", #oneof_full_name, "`.")]
        #[derive(Clone, Copy, Debug, PartialEq)]
        pub enum #case_name #lifetime {
            #(#variants,)*
        }
    };
    let accessor = quote! {
        pub fn #accessor<'a>(&self, arena: &'a ::protoarena::Arena<'_>) -> ::protoarena::Result<Option<#case_path #lifetime>> {
            Ok(Some(match #gc::which_oneof(arena, self.0, #index)? {
                #(#arms)*
                _ => return Ok(None),
            }))
        }
    };
    Ok((case_enum, accessor))
}

use proc_macro2::{Ident, TokenStream};
use quote::{format_ident, quote};

use protoarena::descriptor_proto::FieldType;

const RUST_KEYWORDS: &[&str] = &[
    "as", "break", "const", "continue", "crate", "else", "enum", "extern", "false", "fn", "for",
    "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut", "pub", "ref", "return",
    "self", "Self", "static", "struct", "super", "trait", "true", "type", "unsafe", "use", "where",
    "while", "async", "await", "dyn", "gen", "abstract", "become", "box", "do", "final", "macro",
    "override", "priv", "try", "typeof", "unsized", "virtual", "yield",
];

// Keywords that cannot be raw identifiers.
const NON_RAW_KEYWORDS: &[&str] = &["crate", "self", "Self", "super"];

pub fn field_ident(name: &str) -> Ident {
    if NON_RAW_KEYWORDS.contains(&name) {
        format_ident!("{}_", name)
    } else if RUST_KEYWORDS.contains(&name) {
        format_ident!("r#{}", name)
    } else {
        format_ident!("{}", name)
    }
}

/// Identifier `prefix` + `name` + `suffix`; never a keyword.
pub fn affixed_ident(prefix: &str, name: &str, suffix: &str) -> Ident {
    format_ident!("{}{}{}", prefix, name, suffix)
}

/// snake_case to PascalCase.
pub fn to_pascal_case(name: &str) -> String {
    name.split('_')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                None => String::new(),
                Some(first) => first.to_uppercase().chain(chars).collect(),
            }
        })
        .collect()
}

/// PascalCase or camelCase to snake_case.
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else {
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
            out.push(c);
        }
    }
    out
}

/// Module names get a trailing underscore on keywords (`r#` is not allowed
/// on every module name).
pub fn module_ident(name: &str) -> Ident {
    if RUST_KEYWORDS.contains(&name) {
        format_ident!("{}_", name)
    } else {
        format_ident!("{}", name)
    }
}

/// Path from the module at `from` to the item `name` in the module at `to`.
pub fn relative_path(from: &[String], to: &[String], name: &Ident) -> TokenStream {
    let common = from.iter().zip(to).take_while(|(a, b)| a == b).count();
    let supers = (common..from.len()).map(|_| quote! { super:: });
    let downs = to[common..].iter().map(|m| module_ident(m));
    quote! { #(#supers)* #(#downs::)* #name }
}

/// Rust type of a single scalar value of `ty`.
pub fn scalar_type_tokens(ty: FieldType) -> TokenStream {
    use FieldType as T;
    match ty {
        T::Int32 | T::SInt32 | T::SFixed32 | T::Enum => quote! { i32 },
        T::Int64 | T::SInt64 | T::SFixed64 => quote! { i64 },
        T::UInt32 | T::Fixed32 => quote! { u32 },
        T::UInt64 | T::Fixed64 => quote! { u64 },
        T::Float => quote! { f32 },
        T::Double => quote! { f64 },
        T::Bool => quote! { bool },
        T::String => quote! { &'a str },
        T::Bytes => quote! { &'a [u8] },
        T::Message | T::Group => quote! { ::protoarena::Message },
    }
}

/// `Value` variant that carries `ty`.
pub fn value_variant(ty: FieldType) -> Ident {
    use FieldType as T;
    format_ident!(
        "{}",
        match ty {
            T::Int32 | T::SInt32 | T::SFixed32 => "Int32",
            T::Int64 | T::SInt64 | T::SFixed64 => "Int64",
            T::UInt32 | T::Fixed32 => "UInt32",
            T::UInt64 | T::Fixed64 => "UInt64",
            T::Float => "Float",
            T::Double => "Double",
            T::Bool => "Bool",
            T::Enum => "Enum",
            T::String => "String",
            T::Bytes => "Bytes",
            T::Message | T::Group => "Message",
        }
    )
}

/// `Value` accessor that extracts `ty`.
pub fn value_accessor(ty: FieldType) -> Ident {
    use FieldType as T;
    format_ident!(
        "{}",
        match ty {
            T::Int32 | T::SInt32 | T::SFixed32 | T::Enum => "as_i32",
            T::Int64 | T::SInt64 | T::SFixed64 => "as_i64",
            T::UInt32 | T::Fixed32 => "as_u32",
            T::UInt64 | T::Fixed64 => "as_u64",
            T::Float => "as_f32",
            T::Double => "as_f64",
            T::Bool => "as_bool",
            T::String => "as_str",
            T::Bytes => "as_bytes",
            T::Message | T::Group => "as_message",
        }
    )
}

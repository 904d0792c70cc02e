//! Rust code generation from a serialized `FileDescriptorSet`.
//!
//! Every message becomes a `Copy` handle type implementing
//! [`protoarena::Protobuf`] whose accessors forward to
//! `protoarena::generated_code_only`, so generated and dynamic access share
//! the same storage.

use anyhow::{Context, Result};
use protoarena::DescriptorPool;

mod generator;
mod names;

/// Generates Rust source for every file in `descriptor_bytes`.
pub fn generate(descriptor_bytes: &[u8]) -> Result<String> {
    let pool = DescriptorPool::decode_file_descriptor_set(descriptor_bytes)
        .context("failed to decode file descriptor set")?;
    let tokens = generator::generate_pool(&pool, descriptor_bytes)?;
    let file = quote::quote! {
        #[allow(
            clippy::all,
            dead_code,
            non_camel_case_types,
            non_snake_case,
            non_upper_case_globals
        )]
        pub mod generated {
            #tokens
        }
        pub use generated::*;
    };
    let syntax_tree = syn::parse2(file).context("generated code does not parse")?;
    Ok(prettyplease::unparse(&syntax_tree))
}

mod codegen;

use std::fs;
use std::io::{self, Read, Write};

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args: Vec<_> = std::env::args().collect();
    if args.len() < 2 {
        print_usage(&args[0]);
        return Ok(());
    }

    let descriptor_bytes = if args[1] == "-" {
        let mut buf = Vec::new();
        io::stdin().read_to_end(&mut buf)?;
        buf
    } else {
        fs::read(&args[1]).with_context(|| format!("reading {}", args[1]))?
    };
    tracing::info!(bytes = descriptor_bytes.len(), "read descriptor set");

    let code = codegen::generate(&descriptor_bytes)?;

    if let Some(out) = args.get(2) {
        fs::write(out, &code).with_context(|| format!("writing {out}"))?;
        tracing::info!(path = %out, "generated");
    } else {
        io::stdout().write_all(code.as_bytes())?;
    }
    Ok(())
}

fn print_usage(program: &str) {
    eprintln!("protoarena code generator");
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("  {program} <descriptor.pb> [output.rs]");
    eprintln!("  {program} - < descriptor.pb > output.rs");
    eprintln!();
    eprintln!("ARGUMENTS:");
    eprintln!("  descriptor.pb   FileDescriptorSet from protoc");
    eprintln!("  output.rs       Output Rust file (default: stdout)");
    eprintln!();
    eprintln!("EXAMPLE:");
    eprintln!("  protoc --descriptor_set_out=desc.pb --include_imports my.proto");
    eprintln!("  {program} desc.pb my.rs");
    eprintln!();
    eprintln!("Set RUST_LOG=debug for per-file progress.");
}

//! Generates the RSA key pair used for payload encryption.
//!
//! `private.pem` goes to the collector's `--crypto-key`, `public.pem` to the
//! agent's.

use anyhow::{Context, Result};
use clap::Parser;
use pulse_core::security::crypt::DEFAULT_KEY_BITS;
use pulse_core::security::generate_key_pair;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pulse-keygen")]
#[command(about = "Generate an RSA key pair for pulse payload encryption")]
struct Args {
    /// Output directory
    #[arg(short = 'o', long, default_value = ".")]
    out_dir: PathBuf,

    /// Key size in bits
    #[arg(short = 'b', long, default_value_t = DEFAULT_KEY_BITS)]
    bits: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let pair = generate_key_pair(args.bits).context("key generation failed")?;

    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("cannot create {}", args.out_dir.display()))?;
    let private = args.out_dir.join("private.pem");
    let public = args.out_dir.join("public.pem");

    std::fs::write(&private, pair.private)
        .with_context(|| format!("cannot write {}", private.display()))?;
    std::fs::write(&public, pair.public)
        .with_context(|| format!("cannot write {}", public.display()))?;

    println!("Wrote {} and {}", private.display(), public.display());
    Ok(())
}

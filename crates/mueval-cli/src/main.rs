//! mueval command-line driver
//!
//! Evaluates each file given on the command line to completion, then reads
//! from stdin until end of input.

use anyhow::{Context, Result};
use clap::Parser;
use mueval_core::{Interp, RingBuffer};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser)]
#[command(name = "mueval", version, about = "A small Scheme interpreter")]
struct Args {
    /// Scheme source files evaluated before the interactive session
    files: Vec<PathBuf>,

    /// Raise log verbosity to debug
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    debug!("mueval {}", mueval_core::VERSION);

    let mut interp = Interp::new().context("failed to initialize the interpreter")?;

    for path in &args.files {
        match File::open(path) {
            Err(e) => {
                eprintln!("couldn't open file \"{}\": {e}", path.display());
            }
            Ok(file) => {
                println!("Reading from file \"{}\".", path.display());
                let mut rb = RingBuffer::new(Box::new(BufReader::new(file)));
                interp.session(&mut rb);
                println!("End for file \"{}\".", path.display());
            }
        }
    }

    println!("Reading from stdin.");
    let mut rb = RingBuffer::new(Box::new(std::io::stdin()));
    interp.session(&mut rb);
    Ok(())
}

//! Command line argument parsing and validation.
//!
//! The binary is a thin shell over the library [`Binder`](crate::binder::Binder):
//! it loads a JSON table model, binds it, and reports the diagnostics.

use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;

/// Binds an installer table model into its deployment artifact
#[derive(Parser, Debug)]
#[command(
    name = "msikit",
    version,
    about = "Binds an installer table model into an .msi, .msm, .mst, .msp, or bundle .exe",
    long_about = "Reads a JSON table model produced by an upstream compiler and \
binds it into the concrete deployment artifact its output kind calls for.

Usage:
  msikit product.json -o product.msi
  msikit module.json -o module.msm --threads 4
  msikit bundle.json -o setup.exe --pdb setup.binder.json"
)]
pub struct Args {
    /// JSON table model to bind
    #[arg(index = 1, value_name = "MODEL")]
    pub model: PathBuf,

    /// Path of the artifact to produce
    #[arg(short, long, value_name = "PATH")]
    pub out: PathBuf,

    /// Default cabinet compression level (none, low, medium, high)
    #[arg(long, value_name = "LEVEL", default_value = "medium")]
    pub compression: String,

    /// Cabinet worker-pool size (defaults to the CPU count)
    #[arg(long, value_name = "N")]
    pub threads: Option<usize>,

    /// Generate backwards-compatible component GUIDs
    #[arg(long)]
    pub legacy_guids: bool,

    /// Bind variable override, repeatable (NAME=VALUE)
    #[arg(short = 'd', long = "define", value_name = "NAME=VALUE")]
    pub defines: Vec<String>,

    /// Validation cube file, repeatable
    #[arg(long = "cube", value_name = "PATH")]
    pub cubes: Vec<PathBuf>,

    /// ICE id to suppress, repeatable
    #[arg(long = "sice", value_name = "ICE")]
    pub suppressed_ices: Vec<String>,

    /// Skip external database validation
    #[arg(long)]
    pub no_validation: bool,

    /// Skip the generated _Validation table
    #[arg(long)]
    pub no_validation_table: bool,

    /// Skip layout transfers of loose files and external cabinets
    #[arg(long)]
    pub no_layout: bool,

    /// Layout directory (defaults to the output's directory)
    #[arg(long, value_name = "DIR")]
    pub layout_dir: Option<PathBuf>,

    /// Scratch directory (defaults to a per-bind temp directory)
    #[arg(long, value_name = "DIR")]
    pub scratch: Option<PathBuf>,

    /// Write a JSON debug database of the bound model
    #[arg(long, value_name = "PATH")]
    pub pdb: Option<PathBuf>,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate arguments for consistency
    pub fn validate(&self) -> Result<(), String> {
        if crate::model::CompressionLevel::parse(&self.compression).is_none() {
            return Err(format!(
                "Unknown compression level '{}' (expected none, low, medium, or high)",
                self.compression
            ));
        }
        if self.threads == Some(0) {
            return Err("Thread count must be at least 1".to_string());
        }
        for define in &self.defines {
            if !define.contains('=') {
                return Err(format!("Malformed bind variable '{define}' (expected NAME=VALUE)"));
            }
        }
        Ok(())
    }

    /// Parsed `NAME=VALUE` bind-variable overrides.
    pub fn bind_variables(&self) -> HashMap<String, String> {
        self.defines
            .iter()
            .filter_map(|d| d.split_once('='))
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }
}

//! Command line interface for msikit.
//!
//! A thin shell over the library binder: parse arguments, load the JSON
//! table model, bind it, and print the accumulated diagnostics.

mod args;
mod output;

pub use args::Args;
pub use output::OutputManager;

use crate::binder::messages::Messages;
use crate::binder::validate::ValidationOptions;
use crate::binder::{BindOptions, Binder};
use crate::error::{CliError, Result};
use crate::model::{CompressionLevel, Output};

/// Main CLI entry point
pub async fn run() -> Result<i32> {
    let args = Args::parse_args();
    execute(args).await
}

/// Executes a parsed invocation.
pub async fn execute(args: Args) -> Result<i32> {
    args.validate()
        .map_err(|reason| CliError::InvalidArguments { reason })?;
    let output_manager = OutputManager::new(args.quiet);

    let mut model = load_model(&args)?;
    let options = BindOptions {
        scratch_dir: args.scratch.clone(),
        default_compression: CompressionLevel::parse(&args.compression)
            .unwrap_or(CompressionLevel::Medium),
        cabinet_threads: args.threads,
        legacy_guids: args.legacy_guids,
        suppress_validation_table: args.no_validation_table,
        validation: ValidationOptions {
            suppress: args.no_validation,
            cubes: args.cubes.clone(),
            suppressed_ices: args.suppressed_ices.clone(),
        },
        suppress_layout: args.no_layout,
        layout_dir: args.layout_dir.clone(),
        bind_variables: args.bind_variables(),
        pdb_path: args.pdb.clone(),
    };

    let mut messages = Messages::new();
    let mut binder = Binder::new(options);
    let result = binder.bind(&mut model, &args.out, &mut messages).await;
    output_manager.report(&messages);

    match result {
        Ok(()) => {
            output_manager.success(&format!("bound {}", args.out.display()));
            Ok(0)
        }
        Err(error) => {
            output_manager.error(&error.to_string());
            Ok(1)
        }
    }
}

/// Loads the JSON table model named on the command line.
fn load_model(args: &Args) -> Result<Output> {
    let text = std::fs::read_to_string(&args.model).map_err(|error| CliError::UnreadableModel {
        path: args.model.display().to_string(),
        reason: error.to_string(),
    })?;
    let model = serde_json::from_str(&text).map_err(|error| CliError::UnreadableModel {
        path: args.model.display().to_string(),
        reason: error.to_string(),
    })?;
    Ok(model)
}

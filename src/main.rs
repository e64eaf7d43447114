//! msikit - binds installer table models into deployment artifacts.
//!
//! This binary reads a JSON table model and produces the Windows Installer
//! database, transform, patch, or bootstrapper bundle its output kind calls
//! for, reporting every authoring problem from a single run.

use msikit::cli;
use msikit::cli::OutputManager;
use std::process;

#[tokio::main]
async fn main() {
    env_logger::init();

    match cli::run().await {
        Ok(exit_code) => {
            process::exit(exit_code);
        }
        Err(e) => {
            // Never quiet for fatal errors
            let output = OutputManager::new(false);
            output.error(&format!("Fatal error: {e}"));

            let suggestions = e.recovery_suggestions();
            if !suggestions.is_empty() {
                output.println("\nRecovery suggestions:");
                for suggestion in suggestions {
                    output.indent(&suggestion);
                }
            }

            process::exit(1);
        }
    }
}

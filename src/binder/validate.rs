//! External database validation.
//!
//! ICE validation is delegated to an external validator executable probed
//! on PATH. The binder passes cube files and suppressed ICE ids through
//! and reads the validator's line output back into the message sink. A
//! machine without the validator downgrades to a warning; validation is a
//! quality gate, not a bind dependency.

use crate::binder::error::{Error, Result};
use crate::binder::messages::Messages;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Executable name probed on PATH.
const VALIDATOR_EXE: &str = "msival";

/// Options for the validation phase.
#[derive(Clone, Debug, Default)]
pub struct ValidationOptions {
    /// Skip validation entirely.
    pub suppress: bool,
    /// Validation cube files passed to the validator.
    pub cubes: Vec<PathBuf>,
    /// ICE ids whose findings are dropped.
    pub suppressed_ices: Vec<String>,
}

/// Runs the external validator against a bound database.
pub fn validate_database(
    database: &Path,
    options: &ValidationOptions,
    messages: &mut Messages,
) -> Result<()> {
    if options.suppress {
        log::debug!("validation suppressed");
        return Ok(());
    }
    let Ok(validator) = which::which(VALIDATOR_EXE) else {
        messages.warning(format!(
            "validator '{VALIDATOR_EXE}' not found on PATH; skipping database validation"
        ));
        return Ok(());
    };

    let mut command = Command::new(&validator);
    command.arg(database);
    for cube in &options.cubes {
        command.arg("-c").arg(cube);
    }
    for ice in &options.suppressed_ices {
        command.arg("-s").arg(ice);
    }

    log::debug!("running validator {}", validator.display());
    let output = command.output().map_err(|error| Error::CommandFailed {
        command: validator.display().to_string(),
        error,
    })?;

    for line in String::from_utf8_lossy(&output.stdout).lines() {
        report_validator_line(line, &options.suppressed_ices, messages);
    }
    if !output.status.success() && !messages.has_errors() {
        messages.error(format!(
            "validator exited with {} but reported no findings",
            output.status
        ));
    }
    Ok(())
}

/// Maps one `ICExx<TAB>severity<TAB>description` line to a diagnostic.
fn report_validator_line(line: &str, suppressed: &[String], messages: &mut Messages) {
    let mut parts = line.splitn(3, '\t');
    let (Some(ice), Some(severity), Some(description)) =
        (parts.next(), parts.next(), parts.next())
    else {
        if !line.trim().is_empty() {
            log::debug!("unparsed validator output: {line}");
        }
        return;
    };
    if suppressed.iter().any(|s| s == ice) {
        log::debug!("suppressed {ice}: {description}");
        return;
    }
    match severity {
        "3" => messages.error(format!("{ice}: {description}")),
        "2" => messages.warning(format!("{ice}: {description}")),
        _ => messages.info(format!("{ice}: {description}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severities_map_to_sink_levels() {
        let mut messages = Messages::new();
        report_validator_line("ICE03\t3\tbad foreign key", &[], &mut messages);
        report_validator_line("ICE33\t2\tregistry advice", &[], &mut messages);
        report_validator_line("ICE01\t1\tinformational", &[], &mut messages);
        assert_eq!(messages.error_count(), 1);
    }

    #[test]
    fn suppressed_ices_are_dropped() {
        let mut messages = Messages::new();
        report_validator_line(
            "ICE03\t3\tbad foreign key",
            &["ICE03".to_string()],
            &mut messages,
        );
        assert!(!messages.has_errors());
    }

    #[test]
    fn malformed_lines_are_ignored() {
        let mut messages = Messages::new();
        report_validator_line("no tabs here", &[], &mut messages);
        assert!(!messages.has_errors());
    }

    #[test]
    fn suppression_skips_the_probe() {
        let options = ValidationOptions {
            suppress: true,
            ..Default::default()
        };
        let mut messages = Messages::new();
        validate_database(Path::new("missing.msi"), &options, &mut messages).unwrap();
        assert!(!messages.has_errors());
    }
}

//! CLI error classification and exit-code mapping.
//!
//! Exit codes follow the usual Unix contract: 0 for success and for
//! user-cancelled prompts, 1 for runtime failures, 2 for usage errors.
//! Cancellation deliberately exits 0 without an error banner; dismissing
//! the port chooser is not a failure.

use console::style;
use thiserror::Error;

/// Errors that carry their own exit-code class.
///
/// Anything not wrapped in `CliError` is treated as a runtime failure
/// (exit code 1).
#[derive(Debug, Error)]
pub(crate) enum CliError {
    /// Bad invocation: wrong flags, no usable port in non-interactive
    /// mode, missing TTY for a prompt. Exit code 2.
    #[error("{0}")]
    Usage(String),

    /// The user backed out of a prompt. Exit code 0, no banner.
    #[error("{0}")]
    Cancelled(String),
}

/// Print `err` the way the command line expects and return its exit code.
pub(crate) fn report(err: &anyhow::Error) -> i32 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(message) => {
                eprintln!("{} {message}", style("Error:").red().bold());
                2
            },
            CliError::Cancelled(message) => {
                eprintln!("{}", style(message).dim());
                0
            },
        };
    }

    if let Some(lib_err) = err.downcast_ref::<mpbridge::Error>() {
        // Dismissing the port chooser is not a failure.
        if matches!(lib_err, mpbridge::Error::SelectionCancelled) {
            eprintln!("{}", style(lib_err).dim());
            return 0;
        }
    }

    eprintln!("{} {err:#}", style("Error:").red().bold());
    if let Some(lib_err) = err.downcast_ref::<mpbridge::Error>() {
        if let Some(advice) = lib_err.advice() {
            eprintln!("  {}", style(advice).dim());
        }
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_error_maps_to_exit_2() {
        let err: anyhow::Error = CliError::Usage("bad flag".to_string()).into();
        assert_eq!(report(&err), 2);
    }

    #[test]
    fn test_cancelled_maps_to_exit_0() {
        let err: anyhow::Error = CliError::Cancelled("selection cancelled".to_string()).into();
        assert_eq!(report(&err), 0);
    }

    #[test]
    fn test_selection_cancelled_maps_to_exit_0() {
        let err: anyhow::Error = mpbridge::Error::SelectionCancelled.into();
        assert_eq!(report(&err), 0);
    }

    #[test]
    fn test_library_error_maps_to_exit_1() {
        let err: anyhow::Error = mpbridge::Error::DeviceNotFound.into();
        assert_eq!(report(&err), 1);
    }

    #[test]
    fn test_plain_anyhow_error_maps_to_exit_1() {
        let err = anyhow::anyhow!("something else");
        assert_eq!(report(&err), 1);
    }
}

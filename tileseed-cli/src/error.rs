//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::process;

use tileseed::config::ConfigFileError;
use tileseed::source::SourceError;

/// Exit code for failed jobs and setup errors.
pub const EXIT_FAILURE: i32 = 1;

/// Exit code when the batch was interrupted.
pub const EXIT_CANCELLED: i32 = 130;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// Tile source could not be created
    Source(SourceError),
    /// Failed to start the async runtime
    Runtime(std::io::Error),
    /// Some jobs of the batch failed
    BatchFailed { failed: usize, total: usize },
    /// The batch was interrupted
    Cancelled,
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Source(SourceError::InvalidTemplate(_)) => {
                eprintln!();
                eprintln!("URL templates need {{x}}, {{z}} and either {{y}} or {{-y}}, e.g.");
                eprintln!("  https://tile.example.com/{{z}}/{{x}}/{{y}}.png");
            }
            CliError::BatchFailed { .. } => {
                eprintln!();
                eprintln!("Re-run the same command with --resume to continue from the last checkpoint.");
            }
            _ => {}
        }

        match self {
            CliError::Cancelled => process::exit(EXIT_CANCELLED),
            _ => process::exit(EXIT_FAILURE),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Source(e) => write!(f, "Failed to create tile source: {}", e),
            CliError::Runtime(e) => write!(f, "Failed to start runtime: {}", e),
            CliError::BatchFailed { failed, total } => {
                write!(f, "{} of {} jobs failed", failed, total)
            }
            CliError::Cancelled => write!(f, "Interrupted"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Source(e) => Some(e),
            CliError::Runtime(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<SourceError> for CliError {
    fn from(e: SourceError) -> Self {
        CliError::Source(e)
    }
}

//! Error types for backfill-core

use std::fmt::Write;
use thiserror::Error;

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a command
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for backfill-core
#[derive(Error, Debug)]
pub enum Error {
    /// Storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Runtime errors (blocking task join failures and the like)
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(StorageError::from(e))
    }
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Storage(err) => Some(err.remediation()),
            Self::Config(err) => Some(err.remediation()),
            Self::Io(_) => Some(
                Remediation::new("Check filesystem permissions and paths, then retry.")
                    .alternative("Verify the database directory exists and is writable."),
            ),
            Self::Json(_) => None,
            Self::Runtime(_) => Some(
                Remediation::new("Re-run the migration; committed corrections are kept.")
                    .command("Re-run", "backfill run"),
            ),
        }
    }

    /// Whether re-running the same migration is expected to make progress.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Storage(StorageError::Unavailable(_)) | Self::Runtime(_)
        )
    }
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Read or write against either store failed
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Invalid row in {table}: {details}")]
    InvalidRow { table: String, details: String },
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Unavailable(e.to_string())
    }
}

impl StorageError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Unavailable(_) => Remediation::new(
                "Database operation failed. Committed chunks are kept; \
                 re-run once the database is reachable.",
            )
            .command("Re-run", "backfill run")
            .command("Inspect state", "backfill status")
            .alternative("Check that no other process holds a write lock on the database."),
            Self::Schema(_) => Remediation::new(
                "The database schema does not match the expected allowance tables.",
            )
            .command("Inspect schema", "sqlite3 backfill.db .schema")
            .alternative("Point --db at the importer database."),
            Self::InvalidRow { .. } => Remediation::new(
                "A stored row could not be decoded. Fix the row by hand and re-run.",
            )
            .command("Inspect state", "backfill status"),
        }
    }
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::ReadFailed(path, _) => {
                Remediation::new(format!("Check that the config file is readable: {path}"))
                    .command("Show file", format!("ls -la \"{path}\""))
                    .alternative("Omit --config to run with defaults.")
            }
            Self::ParseFailed(_) => Remediation::new("Fix the TOML syntax in the config file.")
                .alternative(
                    "Compare against the documented [storage]/[migration]/[logging] sections.",
                ),
            Self::Invalid(_) => Remediation::new("Fix the offending config value and retry.")
                .alternative("Run `backfill --help` for accepted values."),
        }
    }
}

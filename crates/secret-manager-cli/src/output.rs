//! Output formatting for CLI commands.
//!
//! Supports table (human-readable) and JSON output formats.

use std::io::Write;

use secret_manager::SyncReport;
use serde::Serialize;

use crate::cli::Format;
use crate::error::CliError;

/// Output formatter that handles both table and JSON output.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Check if JSON format is selected.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, Format::Json)
    }

    /// Write a serializable value to the output.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> Result<(), CliError>
    where
        W: Write,
        T: Serialize + TableDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)
                    .map_err(|e| CliError::Format(format!("JSON serialization failed: {e}")))?;
                writeln!(writer)?;
            }
            Format::Table => {
                value.write_table(writer)?;
            }
        }
        Ok(())
    }

    /// Write a serializable value to a string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_string<T>(&self, value: &T) -> Result<String, CliError>
    where
        T: Serialize + TableDisplay,
    {
        let mut buf = Vec::new();
        self.write(&mut buf, value)?;
        String::from_utf8(buf).map_err(|e| CliError::Format(format!("UTF-8 error: {e}")))
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new(Format::Table)
    }
}

/// Trait for types that can be displayed as a table.
pub trait TableDisplay {
    /// Write the value as a human-readable table.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError>;
}

/// Reports for every manifest processed by one invocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncSummary {
    /// One report per manifest, in processing order.
    pub reports: Vec<SyncReport>,
    /// Set when the run stopped early.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl SyncSummary {
    /// Secrets failing verification across all reports.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.reports.iter().map(|r| r.failures().count()).sum()
    }
}

impl TableDisplay for SyncSummary {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        for (i, report) in self.reports.iter().enumerate() {
            if i > 0 {
                writeln!(writer)?;
            }
            report.write_table(writer)?;
        }
        if let Some(reason) = &self.aborted {
            writeln!(writer)?;
            writeln!(writer, "Run aborted: {reason}")?;
        }
        Ok(())
    }
}

impl TableDisplay for SyncReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        let mode = if self.verify_only { " (verify only)" } else { "" };
        writeln!(writer, "Manifest: {}{mode}", self.manifest)?;
        writeln!(writer, "══════════════════════════════════")?;

        if self.secrets.is_empty() {
            writeln!(writer, "No secrets processed")?;
        } else {
            writeln!(writer, "   {:<40}  {:<32}  STATUS", "SECRET", "TYPE")?;
            writeln!(writer, "{}", "─".repeat(96))?;
            for secret in &self.secrets {
                writeln!(
                    writer,
                    "{}  {:<40}  {:<32}  {}",
                    secret.outcome.icon(),
                    truncate(&secret.name, 40),
                    truncate(&secret.type_name, 32),
                    secret.status()
                )?;
            }
        }

        let problems = self.problems_by_secret();
        if !problems.is_empty() {
            writeln!(writer)?;
            writeln!(writer, "Problems")?;
            for (secret, messages) in problems {
                writeln!(writer, "  {secret}")?;
                for message in messages {
                    writeln!(writer, "    - {message}")?;
                }
            }
        }

        if !self.extra_secrets.is_empty() {
            writeln!(writer)?;
            writeln!(writer, "Secrets not in the manifest (consider deleting)")?;
            for name in &self.extra_secrets {
                writeln!(writer, "  {name}")?;
            }
        }

        if !self.ensured_keys.is_empty() {
            writeln!(writer)?;
            writeln!(writer, "Keys: {}", self.ensured_keys.join(", "))?;
        }

        let counts = self.bucket_counts();
        writeln!(writer)?;
        writeln!(
            writer,
            "Total: {} OK, {} rotated, {} failed, {} problem(s)",
            counts.get("OK").copied().unwrap_or(0),
            counts.get("Rotated").copied().unwrap_or(0),
            counts.get("Failed").copied().unwrap_or(0),
            self.problems.len()
        )?;
        Ok(())
    }
}

/// Truncate a string to a maximum length, adding "..." if truncated.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{kept}...")
    }
}

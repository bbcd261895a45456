//! Output formatting for probe results
//!
//! Results are always read back from the store and rendered here; nothing in
//! this module triggers probes. Two formatters exist: colored or plain text
//! for terminals, and JSON for scripts.

mod text;

pub use text::{ColorScheme, TextFormatter};

use crate::{
    error::{AppError, Result},
    models::ProbeResult,
    orchestrator::{ProbeEvent, ScanReport},
    security::SecuritySummary,
};

/// Main trait for output formatting
pub trait OutputFormatter: Send + Sync {
    /// Format one stored probe result
    fn format_result(&self, result: &ProbeResult) -> Result<String>;

    /// Format the outcome of a full scan
    fn format_scan_report(&self, report: &ScanReport) -> Result<String>;

    /// Format the derived security summary
    fn format_security(&self, summary: &SecuritySummary) -> Result<String>;

    /// Format a progress event; `None` when the formatter stays quiet
    fn format_event(&self, event: &ProbeEvent) -> Option<String>;
}

/// Machine-readable output, one JSON document per call
pub struct JsonFormatter;

impl JsonFormatter {
    fn render<T: serde::Serialize>(value: &T) -> Result<String> {
        serde_json::to_string_pretty(value)
            .map_err(|e| AppError::internal(format!("Failed to serialize output: {}", e)))
    }
}

impl OutputFormatter for JsonFormatter {
    fn format_result(&self, result: &ProbeResult) -> Result<String> {
        Self::render(result)
    }

    fn format_scan_report(&self, report: &ScanReport) -> Result<String> {
        Self::render(report)
    }

    fn format_security(&self, summary: &SecuritySummary) -> Result<String> {
        Self::render(summary)
    }

    fn format_event(&self, _event: &ProbeEvent) -> Option<String> {
        // stdout carries a single document
        None
    }
}

/// Output formatting factory for creating appropriate formatters
pub struct OutputFormatterFactory;

impl OutputFormatterFactory {
    /// Create a formatter based on output mode and color support
    pub fn create_formatter(json: bool, enable_color: bool, verbose: bool) -> Box<dyn OutputFormatter> {
        if json {
            Box::new(JsonFormatter)
        } else {
            Box::new(TextFormatter::new(enable_color, verbose))
        }
    }
}

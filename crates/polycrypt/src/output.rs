use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Outcome of one completed operation, as printed by `run`.
#[derive(Debug, Serialize)]
pub struct OperationReport {
    pub operation: String,
    pub operation_id: u64,
    pub algorithm: Value,
    pub status: String,
    pub result_size: Option<usize>,
    pub result_hex: Option<String>,
    pub result: Option<Value>,
}

impl OperationReport {
    pub fn new(
        operation: impl Into<String>,
        operation_id: u64,
        algorithm: Value,
        status: impl Into<String>,
        result: Option<Value>,
    ) -> Self {
        let bytes = result.as_ref().and_then(result_bytes);
        Self {
            operation: operation.into(),
            operation_id,
            algorithm,
            status: status.into(),
            result_size: bytes.as_ref().map(Vec::len),
            result_hex: bytes.as_deref().map(hex::encode),
            result,
        }
    }
}

pub fn print_report(report: &OperationReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(report).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["OPERATION", "ID", "STATUS", "SIZE", "RESULT"])
                .add_row(vec![
                    report.operation.clone(),
                    report.operation_id.to_string(),
                    report.status.clone(),
                    report
                        .result_size
                        .map(|size| size.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    result_preview(report),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "operation={} id={} status={} result={}",
                report.operation,
                report.operation_id,
                report.status,
                result_preview(report)
            );
        }
        OutputFormat::Raw => match result_bytes_or_json(report) {
            Some(bytes) => print_raw(&bytes),
            None => print_raw(b""),
        },
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

/// A JSON array of numbers in `0..=255` is a byte buffer on the wire.
pub fn result_bytes(value: &Value) -> Option<Vec<u8>> {
    value
        .as_array()?
        .iter()
        .map(|item| item.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect()
}

fn result_preview(report: &OperationReport) -> String {
    match (&report.result_hex, &report.result) {
        (Some(hex), _) => hex.clone(),
        (None, Some(value)) => value.to_string(),
        (None, None) => "-".to_string(),
    }
}

fn result_bytes_or_json(report: &OperationReport) -> Option<Vec<u8>> {
    let value = report.result.as_ref()?;
    result_bytes(value).or_else(|| serde_json::to_vec(value).ok())
}

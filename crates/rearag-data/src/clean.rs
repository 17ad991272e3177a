//! Filtering a trace file down to valid conversations

use std::path::Path;

use serde::Serialize;

use rearag_ai::Message;

use crate::error::Result;
use crate::store::{TraceRecord, read_jsonl_lossy, write_json_pretty};
use crate::validate::{ValidationFailure, Verdict, validate_trace};

/// One row of the validity report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidityEntry {
    pub conversation: Option<Vec<Message>>,
    pub valid: bool,
    pub valid_message: String,
}

/// Counts from a clean run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanSummary {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
}

/// Validate every record, in input order
pub fn assess(records: &[TraceRecord]) -> Vec<ValidityEntry> {
    records
        .iter()
        .map(|record| {
            let verdict = match record.conversation.as_deref() {
                Some(conv) if !conv.is_empty() => validate_trace(conv, &record.answer),
                _ => Verdict::fail(ValidationFailure::NoConversation),
            };
            if !verdict.valid {
                tracing::debug!(id = %record.id, reason = %verdict.reason, "trace rejected");
            }
            ValidityEntry {
                conversation: record.conversation.clone(),
                valid: verdict.valid,
                valid_message: verdict.reason,
            }
        })
        .collect()
}

/// Read `input` (skipping unreadable lines), write the validity report to `validity_path` and the valid
/// conversations to `clean_path`, both as pretty JSON
pub fn clean_traces(input: &Path, validity_path: &Path, clean_path: &Path) -> Result<CleanSummary> {
    let records: Vec<TraceRecord> = read_jsonl_lossy(input)?;
    tracing::info!(path = %input.display(), count = records.len(), "loaded traces");

    let report = assess(&records);
    write_json_pretty(validity_path, &report)?;

    let valid: Vec<&Vec<Message>> = report
        .iter()
        .filter(|e| e.valid)
        .filter_map(|e| e.conversation.as_ref())
        .collect();
    write_json_pretty(clean_path, &valid)?;

    let summary = CleanSummary {
        total: report.len(),
        valid: valid.len(),
        invalid: report.len() - valid.len(),
    };
    tracing::info!(
        valid = summary.valid,
        invalid = summary.invalid,
        "wrote {} and {}",
        validity_path.display(),
        clean_path.display()
    );
    Ok(summary)
}

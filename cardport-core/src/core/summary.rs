//! Per-record diagnostics, per-run reports and the importer's accumulated summary.

use std::fmt;

/// A recoverable anomaly noticed while importing one record.
///
/// Diagnostics never abort a run; their `Display` text is the line that
/// appears in the import log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordDiagnostic {
    /// A text record had more or fewer columns than the mapping expects.
    FieldCountMismatch { row: String, observed: usize, expected: usize },
    /// The record's first field was empty; it was imported as new and is
    /// never matched against.
    EmptyFirstField { fields: String },
    /// The first field was already seen earlier in the same file.
    AppearedTwice { key: String },
    /// Update mode: the record matched an existing note.
    FirstFieldMatched { key: String },
    /// Add mode: the record was added although a note with its key exists.
    AddedDuplicate { key: String },
    /// A referenced media file was stored under a derived name.
    MediaRenamed { from: String, to: String },
    /// A model changed and its notes were imported against a copy.
    ModelCopied { model: String },
}

impl fmt::Display for RecordDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FieldCountMismatch { row, observed, expected } => {
                write!(f, "‘{row}’ had {observed} fields, expected {expected}")
            }
            Self::EmptyFirstField { fields } => write!(f, "Empty first field: {fields}"),
            Self::AppearedTwice { key } => write!(f, "Appeared twice in file: {key}"),
            Self::FirstFieldMatched { key } => write!(f, "First field matched: {key}"),
            Self::AddedDuplicate { key } => write!(f, "Added duplicate with first field: {key}"),
            Self::MediaRenamed { from, to } => write!(f, "Media file {from} renamed to {to}"),
            Self::ModelCopied { model } => {
                write!(f, "Note type {model} changed; notes were imported into a copy")
            }
        }
    }
}

/// Counters and log lines of a single `run()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Notes created.
    pub added: usize,
    /// Existing notes whose stored content changed.
    pub updated: usize,
    /// Records that matched an existing note.
    pub dupes: usize,
    /// Matched notes left as they were.
    pub unchanged: usize,
    /// Notes this run added or accounted for as matched in update mode.
    pub total: usize,
    /// Diagnostics in input order, the summary line, then match lines.
    pub log: Vec<String>,
}

impl RunReport {
    /// `"N notes added, M notes updated, K notes unchanged."`
    pub fn summary_line(&self) -> String {
        format!(
            "{}, {}, {}.",
            plural(self.added, "added"),
            plural(self.updated, "updated"),
            plural(self.unchanged, "unchanged"),
        )
    }
}

fn plural(n: usize, what: &str) -> String {
    if n == 1 {
        format!("{n} note {what}")
    } else {
        format!("{n} notes {what}")
    }
}

/// Accumulator owned by an importer instance.
///
/// Each `run()` folds its [`RunReport`] in; nothing is cleared until the
/// caller calls [`reset`](Self::reset) or builds a new importer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub total: usize,
    pub added: usize,
    pub updated: usize,
    pub dupes: usize,
    pub unchanged: usize,
    pub log: Vec<String>,
    pub runs: usize,
}

impl ImportSummary {
    pub fn absorb(&mut self, report: &RunReport) {
        self.total += report.total;
        self.added += report.added;
        self.updated += report.updated;
        self.dupes += report.dupes;
        self.unchanged += report.unchanged;
        self.log.extend(report.log.iter().cloned());
        self.runs += 1;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

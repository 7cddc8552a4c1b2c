//! Import of delimited text files (tab, semicolon, comma or space separated).

use crate::core::collection::new_note;
use crate::core::importer::Importer;
use crate::core::mapping::{FieldMapping, MappedRecord};
use crate::core::matcher::{first_field_key, ImportMode, MatchKey, MatchOutcome, NoteMatcher};
use crate::core::media::{is_valid_media_name, MediaDir};
use crate::core::note::{normalize_tags, split_tags};
use crate::core::reconcile::MediaReconciler;
use crate::core::settings::ImportSettings;
use crate::core::summary::{ImportSummary, RecordDiagnostic, RunReport};
use crate::{Collection, Model, Note, Result};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Imports the records of a delimited text file as notes of one model.
///
/// Notes are matched by their first field against notes of the same model.
/// Per-record problems never abort a run; they are written to the log.
pub struct TextImporter<'c> {
    col: &'c mut Collection,
    data: Vec<u8>,
    mode: ImportMode,
    allow_html: bool,
    delimiter: Option<u8>,
    model_id: Option<i64>,
    tags_to_add: Vec<String>,
    mapping: Option<FieldMapping>,
    media_source: Option<PathBuf>,
    reconciler: MediaReconciler,
    summary: ImportSummary,
}

/// A parsed text file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedText {
    records: Vec<Vec<String>>,
    /// Tags from a leading `tags:` line.
    tags: Vec<String>,
}

impl<'c> TextImporter<'c> {
    /// Reads the file at `path` for import into `col`.
    pub fn open<P: AsRef<Path>>(col: &'c mut Collection, path: P) -> Result<Self> {
        let data = fs::read(path.as_ref())?;
        log::debug!("read {} bytes from {}", data.len(), path.as_ref().display());
        Ok(Self::from_bytes(col, data))
    }

    pub fn from_bytes(col: &'c mut Collection, data: impl Into<Vec<u8>>) -> Self {
        Self {
            col,
            data: data.into(),
            mode: ImportMode::default(),
            allow_html: false,
            delimiter: None,
            model_id: None,
            tags_to_add: Vec::new(),
            mapping: None,
            media_source: None,
            reconciler: MediaReconciler::new(),
            summary: ImportSummary::default(),
        }
    }

    pub fn collection(&self) -> &Collection {
        self.col
    }

    /// Gives access to the destination between runs.
    pub fn collection_mut(&mut self) -> &mut Collection {
        self.col
    }

    pub fn apply_settings(&mut self, settings: &ImportSettings) {
        self.mode = settings.import_mode;
        self.allow_html = settings.allow_html;
        self.delimiter = settings.delimiter_byte();
        self.tags_to_add = normalize_tags(&settings.tags_to_add);
    }

    /// Keeps field text verbatim when `true`; otherwise `&`, `<` and `>` are
    /// escaped and line breaks become `<br>`.
    pub fn set_allow_html(&mut self, allow: bool) {
        self.allow_html = allow;
    }

    /// Fixes the column separator instead of detecting it.
    pub fn set_delimiter(&mut self, delimiter: Option<u8>) {
        self.delimiter = delimiter;
    }

    /// Imports into `model_id` instead of the collection's current model.
    /// Any installed mapping is dropped.
    pub fn set_model(&mut self, model_id: i64) {
        self.model_id = Some(model_id);
        self.mapping = None;
    }

    pub fn set_tags_to_add(&mut self, tags: &[String]) {
        self.tags_to_add = normalize_tags(tags);
    }

    /// Directory that media referenced by the file is read from. Without
    /// one, references are imported as plain text.
    pub fn set_media_source<P: AsRef<Path>>(&mut self, dir: P) {
        self.media_source = Some(dir.as_ref().to_path_buf());
    }

    /// Installs the default mapping: the columns of the first record fill
    /// the model's fields in order and one more column holds tags. Records
    /// are still checked against the model's field count.
    pub fn init_mapping(&mut self) -> Result<()> {
        let model = self.model()?;
        let parsed = parse_text(&self.data, self.delimiter)?;
        self.mapping = Some(initial_mapping(&model, &parsed));
        Ok(())
    }

    /// Installs a custom mapping. It is replaced by the default mapping at
    /// the next run if its field count does not match the target model.
    pub fn set_mapping(&mut self, mapping: FieldMapping) {
        self.mapping = Some(mapping);
    }

    pub fn mapping(&self) -> Option<&FieldMapping> {
        self.mapping.as_ref()
    }

    fn model(&self) -> Result<Model> {
        match self.model_id {
            Some(id) => self.col.model(id),
            None => self.col.current_model(),
        }
    }

    fn import(&mut self) -> Result<RunReport> {
        let model = self.model()?;
        let parsed = parse_text(&self.data, self.delimiter)?;
        let mapping = match &self.mapping {
            Some(m) if m.field_count() == model.field_count() => m.clone(),
            _ => {
                let m = initial_mapping(&model, &parsed);
                self.mapping = Some(m.clone());
                m
            }
        };

        let mode = self.mode;
        let allow_html = self.allow_html;
        let reconciler = self.reconciler;
        let media_source = self.media_source.clone();
        let extra_tags = normalize_tags(parsed.tags.iter().chain(&self.tags_to_add));
        let disambiguator = model.id.to_string();
        log::info!(
            "importing {} text records into model '{}' ({mode:?})",
            parsed.records.len(),
            model.name
        );

        let tx = self.col.transaction()?;
        let existing = tx.notes_for_model(model.id)?;
        let mut matcher = NoteMatcher::from_notes(MatchKey::FirstField, &existing);
        let mut report = RunReport::default();
        let mut diagnostics: Vec<RecordDiagnostic> = Vec::new();
        let mut match_lines: Vec<RecordDiagnostic> = Vec::new();
        let mut seen_keys: HashSet<String> = HashSet::new();
        let mut added_dupes: Vec<String> = Vec::new();

        for raw in &parsed.records {
            let mut record = mapping.map(raw);
            let shown = record.first_field().unwrap_or_default().to_string();
            if let Some((observed, expected)) = record.mismatch {
                diagnostics.push(RecordDiagnostic::FieldCountMismatch {
                    row: raw.join(" "),
                    observed,
                    expected,
                });
            }
            if !allow_html {
                for value in record.fields.iter_mut().flatten() {
                    *value = escape_html(value);
                }
            }
            if let Some(dir) = &media_source {
                let renamed =
                    resolve_media(reconciler, tx.media(), dir, &mut record, &disambiguator)?;
                diagnostics.extend(renamed);
            }

            match first_field_key(record.first_field().unwrap_or("")) {
                None => {
                    let fields = raw.join(" ");
                    diagnostics.push(RecordDiagnostic::EmptyFirstField { fields });
                }
                Some(key) => {
                    if !seen_keys.insert(key) {
                        diagnostics.push(RecordDiagnostic::AppearedTwice { key: shown.clone() });
                    }
                }
            }

            let mut incoming = new_note(&model);
            incoming.fields = record.to_new_fields();
            incoming.tags = normalize_tags(record.tags.iter().flatten().chain(&extra_tags));

            // Matched notes that would actually change if updated.
            let mut changed: HashMap<i64, Note> = HashMap::new();
            if mode == ImportMode::Update {
                for id in matcher.lookup(&incoming) {
                    let existing = tx.get_note(id)?;
                    let merged = merge(&existing, &record, &extra_tags);
                    if merged.fields != existing.fields || merged.tags != existing.tags {
                        changed.insert(id, merged);
                    }
                }
            }

            match matcher.classify(&incoming, mode, |id| changed.contains_key(&id)) {
                MatchOutcome::New => {
                    tx.add_note(&mut incoming)?;
                    matcher.remember(&incoming);
                    report.added += 1;
                }
                MatchOutcome::NewDuplicate { .. } => {
                    tx.add_note(&mut incoming)?;
                    matcher.remember(&incoming);
                    report.added += 1;
                    report.dupes += 1;
                    if !added_dupes.contains(&shown) {
                        added_dupes.push(shown);
                    }
                }
                MatchOutcome::Duplicate { .. } => {
                    report.dupes += 1;
                    report.unchanged += 1;
                    if mode == ImportMode::Update {
                        match_lines.push(RecordDiagnostic::FirstFieldMatched { key: shown });
                    }
                }
                MatchOutcome::Update { targets, .. } => {
                    report.dupes += 1;
                    let mut any_changed = false;
                    for id in targets {
                        if let Some(mut note) = changed.remove(&id) {
                            note.modified_at = chrono::Utc::now().timestamp();
                            any_changed |= tx.update_note(&note)?;
                        }
                    }
                    if any_changed {
                        report.updated += 1;
                    } else {
                        report.unchanged += 1;
                    }
                    match_lines.push(RecordDiagnostic::FirstFieldMatched { key: shown });
                }
            }
        }

        tx.commit()?;

        report.total = match mode {
            ImportMode::Update => report.added + report.dupes,
            ImportMode::Ignore | ImportMode::Add => report.added,
        };
        if mode == ImportMode::Add {
            match_lines = added_dupes
                .into_iter()
                .map(|key| RecordDiagnostic::AddedDuplicate { key })
                .collect();
        }
        report.log = diagnostics.iter().map(ToString::to_string).collect();
        report.log.push(report.summary_line());
        report.log.extend(match_lines.iter().map(ToString::to_string));

        log::info!(
            "text import finished: {} added, {} updated, {} unchanged",
            report.added,
            report.updated,
            report.unchanged
        );
        Ok(report)
    }
}

impl Importer for TextImporter<'_> {
    fn run(&mut self) -> Result<RunReport> {
        let report = self.import()?;
        self.summary.absorb(&report);
        Ok(report)
    }

    fn summary(&self) -> &ImportSummary {
        &self.summary
    }

    fn reset_summary(&mut self) {
        self.summary.reset();
    }

    fn set_import_mode(&mut self, mode: ImportMode) {
        self.mode = mode;
    }

    fn import_mode(&self) -> ImportMode {
        self.mode
    }
}

fn initial_mapping(model: &Model, parsed: &ParsedText) -> FieldMapping {
    let columns = parsed
        .records
        .first()
        .map(Vec::len)
        .unwrap_or_else(|| model.field_count());
    FieldMapping::initial(model.field_count(), columns)
}

/// The content `existing` gets from `record`: mapped fields are replaced,
/// unmapped ones kept. Tags are replaced only when the record carries a tag
/// column; `extra_tags` are always added.
fn merge(existing: &Note, record: &MappedRecord, extra_tags: &[String]) -> Note {
    let mut merged = existing.clone();
    merged.fields = record.merge_into(&existing.fields);
    let base = record.tags.as_ref().unwrap_or(&existing.tags);
    merged.tags = normalize_tags(base.iter().chain(extra_tags));
    merged
}

/// Reconciles media referenced by the record's fields from `dir` into the
/// collection's media store and rewrites renamed references.
fn resolve_media(
    reconciler: MediaReconciler,
    store: &MediaDir,
    dir: &Path,
    record: &mut MappedRecord,
    disambiguator: &str,
) -> Result<Vec<RecordDiagnostic>> {
    let slots: Vec<usize> = (0..record.fields.len())
        .filter(|i| record.fields[*i].is_some())
        .collect();
    let values: Vec<String> = slots
        .iter()
        .map(|i| record.fields[*i].clone().unwrap_or_default())
        .collect();
    let out = reconciler.reconcile_fields(store, &values, disambiguator, |name| {
        read_source_file(dir, name)
    })?;
    for (slot, value) in slots.into_iter().zip(out.fields) {
        record.fields[slot] = Some(value);
    }
    Ok(out
        .files
        .iter()
        .filter_map(|f| f.rename())
        .map(|(from, to)| RecordDiagnostic::MediaRenamed {
            from: from.to_string(),
            to: to.to_string(),
        })
        .collect())
}

fn read_source_file(dir: &Path, name: &str) -> Result<Option<Vec<u8>>> {
    if !is_valid_media_name(name) {
        return Ok(None);
    }
    match fs::read(dir.join(name)) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace("\r\n", "<br>")
        .replace('\n', "<br>")
}

/// Splits off a leading `tags:` line.
fn split_tags_header(data: &[u8]) -> (Vec<String>, &[u8]) {
    let end = data.iter().position(|b| *b == b'\n').unwrap_or(data.len());
    let first = &data[..end];
    match first.strip_prefix(b"tags:") {
        Some(rest) => {
            let tags = split_tags(&String::from_utf8_lossy(rest));
            let body = data.get(end + 1..).unwrap_or(&[]);
            (tags, body)
        }
        None => (Vec::new(), data),
    }
}

/// Picks the separator from the first data line: tab, then `;`, then `,`,
/// falling back to a space.
fn sniff_delimiter(body: &[u8]) -> u8 {
    let line = body
        .split(|b| *b == b'\n')
        .map(|l| l.strip_suffix(b"\r").unwrap_or(l))
        .find(|l| !l.iter().all(u8::is_ascii_whitespace) && !l.starts_with(b"#"));
    let Some(line) = line else {
        return b'\t';
    };
    [b'\t', b';', b',']
        .into_iter()
        .find(|d| line.contains(d))
        .unwrap_or(b' ')
}

fn parse_text(data: &[u8], delimiter: Option<u8>) -> Result<ParsedText> {
    let data = data.strip_prefix(BOM).unwrap_or(data);
    let (tags, body) = split_tags_header(data);
    let delimiter = delimiter.unwrap_or_else(|| sniff_delimiter(body));

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .comment(Some(b'#'))
        .from_reader(body);

    // Invalid UTF-8 in one record must not cost the rest of the file.
    let mut records = Vec::new();
    for result in reader.byte_records() {
        let record = result?;
        records.push(
            record
                .iter()
                .map(|field| String::from_utf8_lossy(field).into_owned())
                .collect(),
        );
    }
    Ok(ParsedText { records, tags })
}

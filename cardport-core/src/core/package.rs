//! Import of packages: notes, cards and models of another collection plus
//! the media files they reference.

use crate::core::collection::CollectionTx;
use crate::core::export::{PackageContents, COLLECTION_ENTRY, MEDIA_ENTRY};
use crate::core::importer::Importer;
use crate::core::matcher::{ImportMode, MatchKey, MatchOutcome, NoteMatcher};
use crate::core::media::{is_valid_media_name, MediaStore};
use crate::core::model::SchemaDiff;
use crate::core::note::normalize_tags;
use crate::core::reconcile::{MediaReconciler, ReconciledFields};
use crate::core::settings::ImportSettings;
use crate::core::summary::{ImportSummary, RecordDiagnostic, RunReport};
use crate::{CardportError, Collection, Model, Note, Result};
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use zip::result::ZipError;
use zip::ZipArchive;

/// Supplies the contents of a package to a [`PackageImporter`].
pub trait PackageSource {
    /// Models, notes and cards of the package.
    fn contents(&self) -> &PackageContents;

    /// Filenames of all media in the package.
    fn media_names(&self) -> Vec<String>;

    /// Content of media file `filename`, or `None` if the package lacks it.
    fn media(&mut self, filename: &str) -> Result<Option<Vec<u8>>>;
}

/// A package stored as a zip archive on disk.
pub struct ZipPackage {
    archive: ZipArchive<File>,
    contents: PackageContents,
    /// Media filename -> archive entry name.
    entries: HashMap<String, String>,
}

impl ZipPackage {
    /// Opens the archive at `path` and reads its collection and media index.
    ///
    /// # Errors
    ///
    /// Returns [`CardportError::InvalidPackage`] if `collection.json` is
    /// missing, or a zip/JSON error if an entry cannot be decoded.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mut archive = ZipArchive::new(file)?;

        let contents: PackageContents = match read_entry(&mut archive, COLLECTION_ENTRY)? {
            Some(data) => serde_json::from_slice(&data)?,
            None => {
                return Err(CardportError::InvalidPackage(format!(
                    "{} has no {COLLECTION_ENTRY}",
                    path.as_ref().display()
                )))
            }
        };
        let index: HashMap<String, String> = match read_entry(&mut archive, MEDIA_ENTRY)? {
            Some(data) => serde_json::from_slice(&data)?,
            None => HashMap::new(),
        };
        let entries = index.into_iter().map(|(entry, name)| (name, entry)).collect();

        log::debug!(
            "opened package {} (format {}, {} notes)",
            path.as_ref().display(),
            contents.version,
            contents.notes.len()
        );
        Ok(Self { archive, contents, entries })
    }
}

impl PackageSource for ZipPackage {
    fn contents(&self) -> &PackageContents {
        &self.contents
    }

    fn media_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    fn media(&mut self, filename: &str) -> Result<Option<Vec<u8>>> {
        match self.entries.get(filename) {
            Some(entry) => read_entry(&mut self.archive, entry),
            None => Ok(None),
        }
    }
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> Result<Option<Vec<u8>>> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut data = Vec::new();
    entry.read_to_end(&mut data)?;
    Ok(Some(data))
}

/// Progress of a [`PackageImporter`] through its current or last run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportPhase {
    /// The package is open; nothing has been written.
    Opened,
    /// Every model used by the package has a destination model.
    SchemaReconciled,
    /// Notes are being applied.
    Applying,
    /// The run's changes are visible.
    Committed,
    /// The run failed and its changes were rolled back.
    Aborted,
}

/// Merges a package into a collection.
///
/// Notes are matched by GUID. Media referenced by written notes goes
/// through a [`MediaReconciler`] keyed by the source model id, so a file
/// whose name is taken by different content lands under `name_<mid>.ext`
/// and the note is rewritten to point at it.
pub struct PackageImporter<'c, S: PackageSource = ZipPackage> {
    col: &'c mut Collection,
    source: S,
    mode: ImportMode,
    dupe_on_schema_change: bool,
    tags_to_add: Vec<String>,
    phase: ImportPhase,
    reconciler: MediaReconciler,
    summary: ImportSummary,
}

impl<'c> PackageImporter<'c, ZipPackage> {
    /// Opens the package archive at `path` for import into `col`.
    pub fn open<P: AsRef<Path>>(col: &'c mut Collection, path: P) -> Result<Self> {
        Ok(Self::new(col, ZipPackage::open(path)?))
    }
}

impl<'c, S: PackageSource> PackageImporter<'c, S> {
    pub fn new(col: &'c mut Collection, source: S) -> Self {
        Self {
            col,
            source,
            mode: ImportMode::default(),
            dupe_on_schema_change: false,
            tags_to_add: Vec::new(),
            phase: ImportPhase::Opened,
            reconciler: MediaReconciler::new(),
            summary: ImportSummary::default(),
        }
    }

    pub fn collection(&self) -> &Collection {
        self.col
    }

    pub fn collection_mut(&mut self) -> &mut Collection {
        self.col
    }

    pub fn phase(&self) -> ImportPhase {
        self.phase
    }

    pub fn apply_settings(&mut self, settings: &ImportSettings) {
        self.mode = settings.import_mode;
        self.dupe_on_schema_change = settings.dupe_on_schema_change;
        self.tags_to_add = normalize_tags(&settings.tags_to_add);
    }

    /// Allows the package to change models that already have notes.
    ///
    /// Without it such a change fails the run with
    /// [`CardportError::SchemaConflict`].
    pub fn set_dupe_on_schema_change(&mut self, allow: bool) {
        self.dupe_on_schema_change = allow;
    }

    pub fn set_tags_to_add(&mut self, tags: &[String]) {
        self.tags_to_add = normalize_tags(tags);
    }

    fn import(&mut self) -> Result<RunReport> {
        self.phase = ImportPhase::Opened;
        let contents = self.source.contents().clone();
        let mode = self.mode;
        let reconciler = self.reconciler;
        let extra_tags = self.tags_to_add.clone();
        log::info!("importing package with {} notes ({mode:?})", contents.notes.len());

        let tx = self.col.transaction()?;
        let mut diagnostics: Vec<RecordDiagnostic> = Vec::new();

        let model_map =
            reconcile_models(&tx, &contents, self.dupe_on_schema_change, &mut diagnostics)?;
        self.phase = ImportPhase::SchemaReconciled;
        log::debug!("schema reconciled for {} models", model_map.len());

        self.phase = ImportPhase::Applying;
        let mut matcher = NoteMatcher::from_notes(MatchKey::Guid, &tx.list_notes()?);
        let mut report = RunReport::default();

        for incoming in &contents.notes {
            let target_model = *model_map.get(&incoming.model_id).ok_or_else(|| {
                CardportError::InvalidPackage(format!(
                    "note {} uses model {} which the package does not contain",
                    incoming.guid, incoming.model_id
                ))
            })?;

            // Matched notes the incoming copy is newer than.
            let mut newer_than: HashMap<i64, Note> = HashMap::new();
            if mode == ImportMode::Update {
                for id in matcher.lookup(incoming) {
                    let existing = tx.get_note(id)?;
                    if existing.model_id == target_model
                        && existing.modified_at < incoming.modified_at
                    {
                        newer_than.insert(id, existing);
                    }
                }
            }

            let disambiguator = incoming.model_id.to_string();
            let source = &mut self.source;
            let mut reconcile = |fields: &[String]| {
                reconciler.reconcile_fields(tx.media(), fields, &disambiguator, |name| {
                    source.media(name)
                })
            };
            let outcome = matcher.classify(incoming, mode, |id| newer_than.contains_key(&id));
            let is_dupe = matches!(outcome, MatchOutcome::NewDuplicate { .. });
            match outcome {
                MatchOutcome::New | MatchOutcome::NewDuplicate { .. } => {
                    let reconciled = reconcile(&incoming.fields)?;
                    diagnostics.extend(renames(&reconciled));

                    let mut note = Note {
                        id: if is_dupe { 0 } else { incoming.id },
                        guid: if is_dupe { String::new() } else { incoming.guid.clone() },
                        model_id: target_model,
                        fields: reconciled.fields,
                        tags: normalize_tags(incoming.tags.iter().chain(&extra_tags)),
                        modified_at: incoming.modified_at,
                    };
                    tx.add_note_with_cards(&mut note, &contents.cards_of_note(incoming.id))?;
                    matcher.remember(&note);
                    report.added += 1;
                    if is_dupe {
                        report.dupes += 1;
                    }
                }
                MatchOutcome::Duplicate { .. } => {
                    report.dupes += 1;
                    report.unchanged += 1;
                }
                MatchOutcome::Update { targets, .. } => {
                    report.dupes += 1;
                    let reconciled = reconcile(&incoming.fields)?;
                    diagnostics.extend(renames(&reconciled));

                    let mut any_changed = false;
                    for id in targets {
                        if let Some(mut note) = newer_than.remove(&id) {
                            note.fields = reconciled.fields.clone();
                            note.tags = normalize_tags(incoming.tags.iter().chain(&extra_tags));
                            note.modified_at = incoming.modified_at;
                            any_changed |= tx.update_note(&note)?;
                        }
                    }
                    if any_changed {
                        report.updated += 1;
                    } else {
                        report.unchanged += 1;
                    }
                }
            }
        }

        // Files templates use without any note referring to them.
        for name in self.source.media_names() {
            if !name.starts_with('_') || !is_valid_media_name(&name) {
                continue;
            }
            if tx.media().contains(&name) {
                continue;
            }
            if let Some(data) = self.source.media(&name)? {
                reconciler.reconcile(tx.media(), &name, &data, "static")?;
            }
        }

        tx.commit()?;

        report.total = match mode {
            ImportMode::Update => report.added + report.dupes,
            ImportMode::Ignore | ImportMode::Add => report.added,
        };
        report.log = diagnostics.iter().map(ToString::to_string).collect();
        report.log.push(report.summary_line());
        log::info!(
            "package import finished: {} added, {} updated, {} unchanged",
            report.added,
            report.updated,
            report.unchanged
        );
        Ok(report)
    }
}

impl<S: PackageSource> Importer for PackageImporter<'_, S> {
    fn run(&mut self) -> Result<RunReport> {
        match self.import() {
            Ok(report) => {
                self.phase = ImportPhase::Committed;
                self.summary.absorb(&report);
                Ok(report)
            }
            Err(e) => {
                self.phase = ImportPhase::Aborted;
                log::warn!("package import aborted: {e}");
                Err(e)
            }
        }
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

fn renames(reconciled: &ReconciledFields) -> Vec<RecordDiagnostic> {
    reconciled
        .files
        .iter()
        .filter_map(|f| f.rename())
        .map(|(from, to)| RecordDiagnostic::MediaRenamed {
            from: from.to_string(),
            to: to.to_string(),
        })
        .collect()
}

/// Finds or creates a destination model for every package model a note
/// uses and returns the source id -> destination id map.
///
/// Nothing is changed when a conflict is found: the error is returned
/// before any model is saved for the conflicting model, and the caller's
/// transaction rolls back whatever was saved before it.
fn reconcile_models(
    tx: &CollectionTx<'_>,
    contents: &PackageContents,
    allow_change: bool,
    diagnostics: &mut Vec<RecordDiagnostic>,
) -> Result<HashMap<i64, i64>> {
    let used: BTreeSet<i64> = contents.notes.iter().map(|n| n.model_id).collect();
    let mut map = HashMap::new();

    for model_id in used {
        let Some(incoming) = contents.model(model_id) else {
            continue;
        };
        let Some(existing) = tx.find_model(model_id)? else {
            tx.save_model(incoming)?;
            log::debug!("added model '{}' ({model_id})", incoming.name);
            map.insert(model_id, model_id);
            continue;
        };

        let diff = existing.diff(incoming);
        if diff == SchemaDiff::Identical {
            map.insert(model_id, model_id);
            continue;
        }
        if tx.note_count_for_model(model_id)? == 0 {
            tx.save_model(incoming)?;
            log::debug!("replaced unused model '{}' ({model_id})", incoming.name);
            map.insert(model_id, model_id);
            continue;
        }
        if !allow_change {
            return Err(CardportError::SchemaConflict {
                model: incoming.name.clone(),
            });
        }

        match diff {
            SchemaDiff::TemplatesChanged => {
                tx.save_model(incoming)?;
                log::info!("updated templates of model '{}' ({model_id})", incoming.name);
                map.insert(model_id, model_id);
            }
            _ => {
                let copy_id = copy_model(tx, incoming)?;
                diagnostics.push(RecordDiagnostic::ModelCopied {
                    model: incoming.name.clone(),
                });
                map.insert(model_id, copy_id);
            }
        }
    }
    Ok(map)
}

/// Returns the id of a model identical to `incoming` stored after its own
/// id, creating one under the next free id if there is none.
fn copy_model(tx: &CollectionTx<'_>, incoming: &Model) -> Result<i64> {
    let mut id = incoming.id + 1;
    loop {
        match tx.find_model(id)? {
            Some(candidate) if candidate.diff(incoming) == SchemaDiff::Identical => return Ok(id),
            Some(_) => id += 1,
            None => {
                let mut copy = incoming.clone();
                copy.id = id;
                tx.save_model(&copy)?;
                log::info!("model '{}' changed; imported as a copy ({id})", incoming.name);
                return Ok(id);
            }
        }
    }
}

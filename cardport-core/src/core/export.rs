//! The package format and collection export as `.zip` archives.
//!
//! A package holds three kinds of entries:
//!
//! - `collection.json`: a [`PackageContents`] with models, notes and cards.
//! - `media`: a JSON object mapping archive entry names (`"0"`, `"1"`, …)
//!   to media filenames.
//! - one entry per media file, named by its index.

use crate::core::media::{media_references, MediaStore};
use crate::core::note::Card;
use crate::{Collection, Model, Note, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Current package format version.
pub const PACKAGE_VERSION: u32 = 1;

/// Version of this crate, recorded in every package written.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const COLLECTION_ENTRY: &str = "collection.json";
pub const MEDIA_ENTRY: &str = "media";

/// Top-level JSON structure in `collection.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageContents {
    pub version: u32,
    pub app_version: String,
    pub models: Vec<Model>,
    pub notes: Vec<Note>,
    #[serde(default)]
    pub cards: Vec<Card>,
}

impl PackageContents {
    pub fn model(&self, model_id: i64) -> Option<&Model> {
        self.models.iter().find(|m| m.id == model_id)
    }

    /// Cards of `note_id`, in template order.
    pub fn cards_of_note(&self, note_id: i64) -> Vec<Card> {
        let mut cards: Vec<Card> = self
            .cards
            .iter()
            .filter(|c| c.note_id == note_id)
            .cloned()
            .collect();
        cards.sort_by_key(|c| c.ord);
        cards
    }
}

/// What [`export_package`] wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub note_count: usize,
    pub card_count: usize,
    /// Media filenames in archive order.
    pub media: Vec<String>,
}

/// Writes every model, note and card of `col` to a package at `path`.
///
/// Media files referenced by a note are included when present in the
/// collection's media store, as are `_`-prefixed files, which templates may
/// use without any note referring to them.
///
/// # Errors
///
/// Returns [`CardportError::Io`](crate::CardportError::Io) or
/// [`CardportError::Zip`](crate::CardportError::Zip) if the archive cannot be
/// written, or a storage error if the collection cannot be read.
pub fn export_package<P: AsRef<Path>>(col: &Collection, path: P) -> Result<ExportSummary> {
    let notes = col.list_notes()?;
    let mut cards = Vec::new();
    for note in &notes {
        cards.extend(col.cards_of_note(note.id)?);
    }
    let contents = PackageContents {
        version: PACKAGE_VERSION,
        app_version: APP_VERSION.to_string(),
        models: col.models()?,
        notes,
        cards,
    };

    let store = col.media();
    let mut names: Vec<String> = Vec::new();
    let referenced = contents
        .notes
        .iter()
        .flat_map(|n| n.fields.iter())
        .flat_map(|f| media_references(f));
    let statics = store.list()?.into_iter().filter(|name| name.starts_with('_'));
    for name in referenced.chain(statics) {
        if !names.contains(&name) && store.contains(&name) {
            names.push(name);
        }
    }

    let file = File::create(path.as_ref())?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(COLLECTION_ENTRY, options)?;
    zip.write_all(serde_json::to_string_pretty(&contents)?.as_bytes())?;

    let mut index: BTreeMap<String, String> = BTreeMap::new();
    let mut written = Vec::new();
    for name in names {
        let Some(data) = store.read(&name)? else {
            continue;
        };
        let entry = written.len().to_string();
        zip.start_file(entry.as_str(), options)?;
        zip.write_all(&data)?;
        index.insert(entry, name.clone());
        written.push(name);
    }

    zip.start_file(MEDIA_ENTRY, options)?;
    zip.write_all(serde_json::to_string(&index)?.as_bytes())?;
    zip.finish()?;

    log::info!(
        "exported {} notes and {} media files to {}",
        contents.notes.len(),
        written.len(),
        path.as_ref().display()
    );
    Ok(ExportSummary {
        note_count: contents.notes.len(),
        card_count: contents.cards.len(),
        media: written,
    })
}

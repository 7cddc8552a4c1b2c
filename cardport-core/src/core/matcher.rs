//! Classification of incoming notes against the notes already in a collection.

use crate::Note;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::LazyLock;

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap_or_else(|_| unreachable!()));

static SOUND_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[sound:[^\]]+\]").unwrap_or_else(|_| unreachable!()));

/// How matched notes are treated during one import run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImportMode {
    /// Add new notes, update matched notes whose content differs, skip the rest.
    #[default]
    Update,
    /// Add new notes only; matched notes are left alone.
    Ignore,
    /// Add every incoming note, even when it matches an existing one.
    Add,
}

/// What decides that two notes are the same note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKey {
    /// The canonical first field, scoped to notes of the same model.
    FirstField,
    /// The note GUID, across all models.
    Guid,
}

/// The decision for one incoming note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// No existing note shares the key, or the key is empty.
    New,
    /// Add mode: inserted as a new note although `existing` share its key.
    NewDuplicate { existing: Vec<i64> },
    /// Notes sharing the key exist and are left untouched.
    Duplicate { existing: Vec<i64> },
    /// Notes sharing the key exist; `targets` receive the incoming content.
    Update { existing: Vec<i64>, targets: Vec<i64> },
}

impl MatchOutcome {
    /// IDs of existing notes sharing the incoming note's key.
    pub fn existing(&self) -> &[i64] {
        match self {
            Self::New => &[],
            Self::NewDuplicate { existing }
            | Self::Duplicate { existing }
            | Self::Update { existing, .. } => existing,
        }
    }
}

/// Index of existing notes by matching key.
///
/// Notes with an empty key are never indexed, so they neither match nor are
/// matched by anything.
#[derive(Debug, Clone)]
pub struct NoteMatcher {
    key: MatchKey,
    index: HashMap<(i64, String), Vec<i64>>,
}

impl NoteMatcher {
    pub fn new(key: MatchKey) -> Self {
        Self { key, index: HashMap::new() }
    }

    /// Builds an index over `notes`.
    pub fn from_notes<'a, I>(key: MatchKey, notes: I) -> Self
    where
        I: IntoIterator<Item = &'a Note>,
    {
        let mut matcher = Self::new(key);
        for note in notes {
            matcher.remember(note);
        }
        matcher
    }

    pub fn key(&self) -> MatchKey {
        self.key
    }

    /// The matching key of `note`, or `None` when it has none.
    pub fn key_of(&self, note: &Note) -> Option<String> {
        match self.key {
            MatchKey::FirstField => first_field_key(note.first_field()),
            MatchKey::Guid => {
                let guid = note.guid.trim();
                (!guid.is_empty()).then(|| guid.to_string())
            }
        }
    }

    /// Adds a stored note to the index so later records can match it.
    pub fn remember(&mut self, note: &Note) {
        let Some(key) = self.key_of(note) else {
            return;
        };
        let ids = self.index.entry((self.scope(note), key)).or_default();
        if !ids.contains(&note.id) {
            ids.push(note.id);
        }
    }

    /// Drops a note from the index, e.g. after it was deleted.
    pub fn forget(&mut self, note: &Note) {
        if let Some(key) = self.key_of(note) {
            if let Some(ids) = self.index.get_mut(&(self.scope(note), key)) {
                ids.retain(|id| *id != note.id);
            }
        }
    }

    /// IDs of indexed notes sharing `note`'s key.
    pub fn lookup(&self, note: &Note) -> Vec<i64> {
        self.key_of(note)
            .and_then(|key| self.index.get(&(self.scope(note), key)))
            .cloned()
            .unwrap_or_default()
    }

    /// Classifies `note` under `mode`.
    ///
    /// In update mode `wants_update` is asked, per matched note, whether the
    /// incoming content should be written into it; matched notes it rejects
    /// count as unchanged duplicates.
    pub fn classify<F>(&self, note: &Note, mode: ImportMode, mut wants_update: F) -> MatchOutcome
    where
        F: FnMut(i64) -> bool,
    {
        let existing = self.lookup(note);
        if existing.is_empty() {
            return MatchOutcome::New;
        }
        match mode {
            ImportMode::Add => MatchOutcome::NewDuplicate { existing },
            ImportMode::Ignore => MatchOutcome::Duplicate { existing },
            ImportMode::Update => {
                let targets: Vec<i64> =
                    existing.iter().copied().filter(|id| wants_update(*id)).collect();
                if targets.is_empty() {
                    MatchOutcome::Duplicate { existing }
                } else {
                    MatchOutcome::Update { existing, targets }
                }
            }
        }
    }

    fn scope(&self, note: &Note) -> i64 {
        match self.key {
            MatchKey::FirstField => note.model_id,
            MatchKey::Guid => 0,
        }
    }
}

/// First field with markup and sound tags removed and whitespace trimmed.
pub fn canonical_first_field(field: &str) -> String {
    let without_sound = SOUND_TAG.replace_all(field, "");
    let text = HTML_TAG.replace_all(&without_sound, "");
    text.replace("&nbsp;", " ").trim().to_string()
}

/// SHA-256 of the canonical first field, or `None` when it is empty.
pub fn first_field_key(field: &str) -> Option<String> {
    let canonical = canonical_first_field(field);
    if canonical.is_empty() {
        return None;
    }
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Some(hex::encode(hasher.finalize()))
}

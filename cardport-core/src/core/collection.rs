//! The destination collection: notes, cards and models in SQLite plus a media directory.

use crate::core::media::MediaDir;
use crate::core::note::{normalize_tags, Card};
use crate::{CardportError, Model, Note, Result};
use rusqlite::{Connection, OptionalExtension, Transaction};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const CURRENT_MODEL_KEY: &str = "current_model_id";

/// Separator used when tags are aggregated into one column.
const TAG_SEP: char = '\u{1f}';

/// An open collection backed by a SQLite database and a media directory.
///
/// `Collection` is the storage service importers write into. Single-call
/// methods each run in their own transaction; [`transaction`](Self::transaction)
/// hands out a [`CollectionTx`] when several changes must become visible
/// together.
pub struct Collection {
    storage: crate::Storage,
    media: MediaDir,
    path: PathBuf,
}

impl Collection {
    /// Creates a new collection database at `path` with an empty media
    /// directory beside it, and seeds the stock "Basic" model as current.
    ///
    /// # Errors
    ///
    /// Returns [`CardportError::Database`] for any SQLite failure or
    /// [`CardportError::Io`] if the media directory cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut storage = crate::Storage::create(&path)?;
        let media = MediaDir::open(MediaDir::path_for_collection(path.as_ref()))?;

        let model = Model::basic(next_id(storage.connection(), "models")?);
        {
            let tx = storage.connection_mut().transaction()?;
            insert_model(&tx, &model)?;
            tx.execute(
                "INSERT INTO collection_meta (key, value) VALUES (?, ?)",
                rusqlite::params![CURRENT_MODEL_KEY, model.id.to_string()],
            )?;
            tx.commit()?;
        }
        log::debug!("created collection at {}", path.as_ref().display());

        Ok(Self {
            storage,
            media,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Opens an existing collection database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CardportError::InvalidCollection`] if the file is not a
    /// collection, or [`CardportError::Database`] for any SQLite failure.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let storage = crate::Storage::open(&path)?;
        let media = MediaDir::open(MediaDir::path_for_collection(path.as_ref()))?;
        Ok(Self {
            storage,
            media,
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The media store files referenced by notes are kept in.
    pub fn media(&self) -> &MediaDir {
        &self.media
    }

    /// Returns the underlying SQLite connection.
    pub fn connection(&self) -> &Connection {
        self.storage.connection()
    }

    /// Starts a write transaction covering notes, cards and models.
    ///
    /// Nothing done through the returned [`CollectionTx`] is visible to other
    /// connections until [`CollectionTx::commit`]; dropping it rolls back.
    /// Media writes are not part of the transaction.
    pub fn transaction(&mut self) -> Result<CollectionTx<'_>> {
        let tx = self.storage.connection_mut().transaction()?;
        Ok(CollectionTx { tx, media: &self.media })
    }

    // ── Models ────────────────────────────────────────────────────

    /// Returns the model new notes are created with by default.
    ///
    /// # Errors
    ///
    /// Returns [`CardportError::ModelNotFound`] if the stored current model
    /// no longer exists.
    pub fn current_model(&self) -> Result<Model> {
        current_model(self.connection())
    }

    /// Makes `model_id` the default model for new notes.
    pub fn set_current_model(&mut self, model_id: i64) -> Result<()> {
        // Validate before storing so a bad id cannot stick.
        self.model(model_id)?;
        self.connection().execute(
            "INSERT OR REPLACE INTO collection_meta (key, value) VALUES (?, ?)",
            rusqlite::params![CURRENT_MODEL_KEY, model_id.to_string()],
        )?;
        Ok(())
    }

    /// Fetches a model by ID.
    ///
    /// # Errors
    ///
    /// Returns [`CardportError::ModelNotFound`] if no such model exists.
    pub fn model(&self, model_id: i64) -> Result<Model> {
        find_model(self.connection(), model_id)?.ok_or(CardportError::ModelNotFound(model_id))
    }

    /// Returns all models ordered by ID.
    pub fn models(&self) -> Result<Vec<Model>> {
        list_models(self.connection())
    }

    /// Inserts or replaces `model`.
    ///
    /// When the model already exists and its field count changed, every note
    /// of the model is padded with empty fields (or truncated) in the same
    /// transaction so notes always match their model's layout.
    pub fn save_model(&mut self, model: &Model) -> Result<()> {
        let tx = self.transaction()?;
        tx.save_model(model)?;
        tx.commit()
    }

    // ── Notes ─────────────────────────────────────────────────────

    /// Returns an unsaved note of `model` with one empty string per field.
    pub fn new_note(&self, model: &Model) -> Note {
        new_note(model)
    }

    /// Stores `note`, generating its cards, and returns its ID.
    ///
    /// A fresh ID is assigned when `note.id` is zero or already taken, and a
    /// GUID when `note.guid` is empty; both are written back into `note`.
    ///
    /// # Errors
    ///
    /// Returns [`CardportError::ModelNotFound`] if the note's model does not
    /// exist, or [`CardportError::Database`] for any SQLite failure.
    pub fn add_note(&mut self, note: &mut Note) -> Result<i64> {
        let tx = self.transaction()?;
        let id = tx.add_note(note)?;
        tx.commit()?;
        Ok(id)
    }

    /// Fetches a single note by ID.
    ///
    /// # Errors
    ///
    /// Returns [`CardportError::NoteNotFound`] if no such note exists.
    pub fn get_note(&self, note_id: i64) -> Result<Note> {
        get_note(self.connection(), note_id)
    }

    /// Writes the fields and tags of an existing note, stamping it as
    /// modified now. Returns `true` if anything changed.
    ///
    /// # Errors
    ///
    /// Returns [`CardportError::NoteNotFound`] if the note does not exist.
    pub fn update_note(&mut self, note: &Note) -> Result<bool> {
        let mut note = note.clone();
        note.modified_at = chrono::Utc::now().timestamp();
        let tx = self.transaction()?;
        let changed = tx.update_note(&note)?;
        tx.commit()?;
        Ok(changed)
    }

    /// Returns all notes ordered by ID.
    pub fn list_notes(&self) -> Result<Vec<Note>> {
        query_notes(self.connection(), "", [])
    }

    /// Returns all notes of `model_id` ordered by ID.
    pub fn notes_for_model(&self, model_id: i64) -> Result<Vec<Note>> {
        notes_for_model(self.connection(), model_id)
    }

    pub fn note_count(&self) -> Result<usize> {
        count(self.connection(), "SELECT COUNT(*) FROM notes")
    }

    // ── Cards ─────────────────────────────────────────────────────

    pub fn card_count(&self) -> Result<usize> {
        count(self.connection(), "SELECT COUNT(*) FROM cards")
    }

    /// Returns the cards generated for `note_id`, ordered by template.
    pub fn cards_of_note(&self, note_id: i64) -> Result<Vec<Card>> {
        cards_of_note(self.connection(), note_id)
    }

    /// Returns the IDs of cards matching `query`, ordered by ID.
    ///
    /// Supported queries: `""` (all cards), `nid:<id>`, `mid:<id>`,
    /// `tag:<tag>`, and any other text, which matches cards whose note has a
    /// field containing it (case-insensitive).
    pub fn find_cards(&self, query: &str) -> Result<Vec<i64>> {
        let query = query.trim();
        let conn = self.connection();
        if query.is_empty() {
            return ids(conn, "SELECT id FROM cards ORDER BY id", []);
        }
        if let Some(nid) = query.strip_prefix("nid:").and_then(|s| s.parse::<i64>().ok()) {
            return ids(conn, "SELECT id FROM cards WHERE note_id = ? ORDER BY id", [nid]);
        }
        if let Some(mid) = query.strip_prefix("mid:").and_then(|s| s.parse::<i64>().ok()) {
            return ids(
                conn,
                "SELECT c.id FROM cards c JOIN notes n ON n.id = c.note_id
                 WHERE n.model_id = ? ORDER BY c.id",
                [mid],
            );
        }
        if let Some(tag) = query.strip_prefix("tag:") {
            return ids(
                conn,
                "SELECT c.id FROM cards c JOIN note_tags t ON t.note_id = c.note_id
                 WHERE t.tag = ? COLLATE NOCASE ORDER BY c.id",
                [tag],
            );
        }

        let needle = query.to_lowercase();
        let mut card_ids = Vec::new();
        for note in self.list_notes()? {
            if note.fields.iter().any(|f| f.to_lowercase().contains(&needle)) {
                card_ids.extend(self.cards_of_note(note.id)?.into_iter().map(|c| c.id));
            }
        }
        card_ids.sort_unstable();
        Ok(card_ids)
    }

    /// Deletes the given cards; notes left without any card are deleted too.
    ///
    /// Returns the number of cards removed.
    pub fn remove_cards(&mut self, card_ids: &[i64]) -> Result<usize> {
        let tx = self.transaction()?;
        let mut removed = 0;
        for id in card_ids {
            removed += tx.tx.execute("DELETE FROM cards WHERE id = ?", [id])?;
        }
        tx.tx.execute(
            "DELETE FROM note_tags WHERE note_id NOT IN (SELECT note_id FROM cards)",
            [],
        )?;
        let orphans = tx
            .tx
            .execute("DELETE FROM notes WHERE id NOT IN (SELECT note_id FROM cards)", [])?;
        tx.commit()?;
        log::debug!("removed {removed} cards and {orphans} orphaned notes");
        Ok(removed)
    }
}

/// A write transaction over a [`Collection`].
///
/// Importers route every note, card and model mutation of one run through a
/// single `CollectionTx` so the batch commits or rolls back as a whole.
pub struct CollectionTx<'a> {
    tx: Transaction<'a>,
    media: &'a MediaDir,
}

impl<'a> CollectionTx<'a> {
    pub fn media(&self) -> &'a MediaDir {
        self.media
    }

    pub fn current_model(&self) -> Result<Model> {
        current_model(&self.tx)
    }

    /// Fetches a model, or `None` when the ID is unused.
    pub fn find_model(&self, model_id: i64) -> Result<Option<Model>> {
        find_model(&self.tx, model_id)
    }

    pub fn model(&self, model_id: i64) -> Result<Model> {
        self.find_model(model_id)?.ok_or(CardportError::ModelNotFound(model_id))
    }

    pub fn models(&self) -> Result<Vec<Model>> {
        list_models(&self.tx)
    }

    /// See [`Collection::save_model`].
    pub fn save_model(&self, model: &Model) -> Result<()> {
        let Some(existing) = find_model(&self.tx, model.id)? else {
            return insert_model(&self.tx, model);
        };

        if existing.field_count() != model.field_count() {
            for mut note in notes_for_model(&self.tx, model.id)? {
                note.fields.resize(model.field_count(), String::new());
                self.tx.execute(
                    "UPDATE notes SET fields_json = ? WHERE id = ?",
                    rusqlite::params![serde_json::to_string(&note.fields)?, note.id],
                )?;
            }
        }

        self.tx.execute(
            "UPDATE models SET name = ?1, fields_json = ?2, templates_json = ?3, css = ?4, modified_at = ?5
             WHERE id = ?6",
            rusqlite::params![
                model.name,
                serde_json::to_string(&model.fields)?,
                serde_json::to_string(&model.templates)?,
                model.css,
                model.modified_at,
                model.id,
            ],
        )?;

        // New templates get a card for every existing note.
        if model.templates.len() > existing.templates.len() {
            for note in notes_for_model(&self.tx, model.id)? {
                for ord in existing.templates.len()..model.templates.len() {
                    insert_card(&self.tx, note.id, ord as u32, 0)?;
                }
            }
        }
        Ok(())
    }

    /// Returns the number of notes stored under `model_id`.
    pub fn note_count_for_model(&self, model_id: i64) -> Result<usize> {
        let n: i64 = self.tx.query_row(
            "SELECT COUNT(*) FROM notes WHERE model_id = ?",
            [model_id],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// See [`Collection::add_note`].
    pub fn add_note(&self, note: &mut Note) -> Result<i64> {
        let model = self.model(note.model_id)?;
        let id = self.insert_note_row(note, &model)?;
        for ord in 0..model.templates.len() {
            insert_card(&self.tx, id, ord as u32, note.modified_at)?;
        }
        Ok(id)
    }

    /// Stores `note` with the given cards instead of generating them.
    ///
    /// Card IDs are kept when free; cards whose template index is outside the
    /// model are skipped. Falls back to generated cards when none remain.
    pub fn add_note_with_cards(&self, note: &mut Note, cards: &[Card]) -> Result<i64> {
        let model = self.model(note.model_id)?;
        let id = self.insert_note_row(note, &model)?;
        let mut inserted = 0;
        for card in cards.iter().filter(|c| (c.ord as usize) < model.templates.len()) {
            let card_id = if card.id > 0 && !exists(&self.tx, "cards", card.id)? {
                card.id
            } else {
                next_id(&self.tx, "cards")?
            };
            self.tx.execute(
                "INSERT INTO cards (id, note_id, ord, modified_at) VALUES (?, ?, ?, ?)",
                rusqlite::params![card_id, id, card.ord, card.modified_at],
            )?;
            inserted += 1;
        }
        if inserted == 0 {
            for ord in 0..model.templates.len() {
                insert_card(&self.tx, id, ord as u32, note.modified_at)?;
            }
        }
        Ok(id)
    }

    /// Writes fields, tags and modification time of an existing note as
    /// given. Returns `true` if the fields or tags changed.
    pub fn update_note(&self, note: &Note) -> Result<bool> {
        let model = self.model(note.model_id)?;
        let mut fields = note.fields.clone();
        fields.resize(model.field_count(), String::new());
        let fields_json = serde_json::to_string(&fields)?;

        let existing = get_note(&self.tx, note.id)?;
        let fields_changed = self.tx.execute(
            "UPDATE notes SET fields_json = ?1, model_id = ?2, modified_at = ?3
             WHERE id = ?4 AND fields_json != ?1",
            rusqlite::params![fields_json, note.model_id, note.modified_at, note.id],
        )? > 0;

        let tags = normalize_tags(&note.tags);
        let tags_changed = tags != existing.tags;
        if tags_changed {
            write_tags(&self.tx, note.id, &tags)?;
            if !fields_changed {
                self.tx.execute(
                    "UPDATE notes SET modified_at = ? WHERE id = ?",
                    rusqlite::params![note.modified_at, note.id],
                )?;
            }
        }
        Ok(fields_changed || tags_changed)
    }

    pub fn get_note(&self, note_id: i64) -> Result<Note> {
        get_note(&self.tx, note_id)
    }

    pub fn list_notes(&self) -> Result<Vec<Note>> {
        query_notes(&self.tx, "", [])
    }

    pub fn notes_for_model(&self, model_id: i64) -> Result<Vec<Note>> {
        notes_for_model(&self.tx, model_id)
    }

    pub fn cards_of_note(&self, note_id: i64) -> Result<Vec<Card>> {
        cards_of_note(&self.tx, note_id)
    }

    /// Makes every change in this transaction visible.
    pub fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }

    fn insert_note_row(&self, note: &mut Note, model: &Model) -> Result<i64> {
        note.fields.resize(model.field_count(), String::new());
        note.tags = normalize_tags(&note.tags);
        if note.id <= 0 || exists(&self.tx, "notes", note.id)? {
            note.id = next_id(&self.tx, "notes")?;
        }
        if note.guid.is_empty() {
            note.guid = Uuid::new_v4().to_string();
        }
        if note.modified_at == 0 {
            note.modified_at = chrono::Utc::now().timestamp();
        }

        self.tx.execute(
            "INSERT INTO notes (id, guid, model_id, fields_json, modified_at) VALUES (?, ?, ?, ?, ?)",
            rusqlite::params![
                note.id,
                note.guid,
                note.model_id,
                serde_json::to_string(&note.fields)?,
                note.modified_at,
            ],
        )?;
        write_tags(&self.tx, note.id, &note.tags)?;
        Ok(note.id)
    }
}

// ── Row helpers shared by Collection and CollectionTx ─────────────

pub(crate) fn new_note(model: &Model) -> Note {
    Note {
        id: 0,
        guid: String::new(),
        model_id: model.id,
        fields: vec![String::new(); model.field_count()],
        tags: vec![],
        modified_at: 0,
    }
}

/// Returns a fresh ID for `table`: the current time in milliseconds, bumped
/// past the largest existing ID.
fn next_id(conn: &Connection, table: &str) -> Result<i64> {
    let max: i64 = conn.query_row(&format!("SELECT COALESCE(MAX(id), 0) FROM {table}"), [], |row| {
        row.get(0)
    })?;
    Ok(chrono::Utc::now().timestamp_millis().max(max + 1))
}

fn exists(conn: &Connection, table: &str, id: i64) -> Result<bool> {
    let found = conn
        .query_row(&format!("SELECT 1 FROM {table} WHERE id = ?"), [id], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

fn count(conn: &Connection, sql: &str) -> Result<usize> {
    let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(n as usize)
}

fn ids<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map(params, |row| row.get::<_, i64>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

fn current_model(conn: &Connection) -> Result<Model> {
    let id: Option<String> = conn
        .query_row(
            "SELECT value FROM collection_meta WHERE key = ?",
            [CURRENT_MODEL_KEY],
            |row| row.get(0),
        )
        .optional()?;
    let id = id
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or_else(|| CardportError::InvalidCollection("no current model".to_string()))?;
    find_model(conn, id)?.ok_or(CardportError::ModelNotFound(id))
}

type ModelRow = (i64, String, String, String, String, i64);

fn map_model_row(row: &rusqlite::Row) -> rusqlite::Result<ModelRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn model_from_row(
    (id, name, fields_json, templates_json, css, modified_at): ModelRow,
) -> Result<Model> {
    Ok(Model {
        id,
        name,
        fields: serde_json::from_str(&fields_json)?,
        templates: serde_json::from_str(&templates_json)?,
        css,
        modified_at,
    })
}

fn find_model(conn: &Connection, model_id: i64) -> Result<Option<Model>> {
    let row = conn
        .query_row(
            "SELECT id, name, fields_json, templates_json, css, modified_at FROM models WHERE id = ?",
            [model_id],
            map_model_row,
        )
        .optional()?;
    row.map(model_from_row).transpose()
}

fn list_models(conn: &Connection) -> Result<Vec<Model>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, fields_json, templates_json, css, modified_at FROM models ORDER BY id",
    )?;
    let rows = stmt
        .query_map([], map_model_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(model_from_row).collect()
}

fn insert_model(conn: &Connection, model: &Model) -> Result<()> {
    conn.execute(
        "INSERT INTO models (id, name, fields_json, templates_json, css, modified_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            model.id,
            model.name,
            serde_json::to_string(&model.fields)?,
            serde_json::to_string(&model.templates)?,
            model.css,
            model.modified_at,
        ],
    )?;
    Ok(())
}

type NoteRow = (i64, String, i64, String, i64, Option<String>);

/// Maps the six columns selected by [`query_notes`] into a tuple.
fn map_note_row(row: &rusqlite::Row) -> rusqlite::Result<NoteRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn note_from_row((id, guid, model_id, fields_json, modified_at, tags): NoteRow) -> Result<Note> {
    let mut tags: Vec<String> = tags
        .unwrap_or_default()
        .split(TAG_SEP)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    tags.sort();
    Ok(Note {
        id,
        guid,
        model_id,
        fields: serde_json::from_str(&fields_json)?,
        tags,
        modified_at,
    })
}

fn query_notes<P: rusqlite::Params>(
    conn: &Connection,
    filter: &str,
    params: P,
) -> Result<Vec<Note>> {
    let sql = format!(
        "SELECT n.id, n.guid, n.model_id, n.fields_json, n.modified_at,
                GROUP_CONCAT(t.tag, char(31)) AS tags
         FROM notes n
         LEFT JOIN note_tags t ON t.note_id = n.id
         {filter}
         GROUP BY n.id
         ORDER BY n.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, map_note_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(note_from_row).collect()
}

fn get_note(conn: &Connection, note_id: i64) -> Result<Note> {
    query_notes(conn, "WHERE n.id = ?", [note_id])?
        .pop()
        .ok_or(CardportError::NoteNotFound(note_id))
}

fn notes_for_model(conn: &Connection, model_id: i64) -> Result<Vec<Note>> {
    query_notes(conn, "WHERE n.model_id = ?", [model_id])
}

fn write_tags(conn: &Connection, note_id: i64, tags: &[String]) -> Result<()> {
    conn.execute("DELETE FROM note_tags WHERE note_id = ?", [note_id])?;
    for tag in tags {
        conn.execute(
            "INSERT INTO note_tags (note_id, tag) VALUES (?, ?)",
            rusqlite::params![note_id, tag],
        )?;
    }
    Ok(())
}

fn insert_card(conn: &Connection, note_id: i64, ord: u32, modified_at: i64) -> Result<i64> {
    let id = next_id(conn, "cards")?;
    let modified_at = if modified_at == 0 { chrono::Utc::now().timestamp() } else { modified_at };
    conn.execute(
        "INSERT INTO cards (id, note_id, ord, modified_at) VALUES (?, ?, ?, ?)",
        rusqlite::params![id, note_id, ord, modified_at],
    )?;
    Ok(id)
}

fn cards_of_note(conn: &Connection, note_id: i64) -> Result<Vec<Card>> {
    let mut stmt = conn.prepare(
        "SELECT id, note_id, ord, modified_at FROM cards WHERE note_id = ? ORDER BY ord, id",
    )?;
    let cards = stmt
        .query_map([note_id], |row| {
            Ok(Card {
                id: row.get(0)?,
                note_id: row.get(1)?,
                ord: row.get(2)?,
                modified_at: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(cards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MediaStore;
    use tempfile::TempDir;

    fn setup() -> (Collection, TempDir) {
        let tmp = TempDir::new().unwrap();
        let col = Collection::create(tmp.path().join("collection.db")).unwrap();
        (col, tmp)
    }

    fn add(col: &mut Collection, front: &str, back: &str) -> i64 {
        let model = col.current_model().unwrap();
        let mut note = col.new_note(&model);
        note.set_field(0, front);
        note.set_field(1, back);
        col.add_note(&mut note).unwrap()
    }

    #[test]
    fn test_create_collection_seeds_basic_model() {
        let (col, _tmp) = setup();
        let model = col.current_model().unwrap();
        assert_eq!(model.name, "Basic");
        assert_eq!(col.models().unwrap().len(), 1);
        assert_eq!(col.note_count().unwrap(), 0);
        assert!(col.media().dir().ends_with("collection.media"));
    }

    #[test]
    fn test_open_existing_collection() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("collection.db");
        {
            let mut col = Collection::create(&path).unwrap();
            add(&mut col, "hello", "world");
        }
        let col = Collection::open(&path).unwrap();
        assert_eq!(col.note_count().unwrap(), 1);
        assert_eq!(col.current_model().unwrap().name, "Basic");
    }

    #[test]
    fn test_add_and_get_note() {
        let (mut col, _tmp) = setup();
        let id = add(&mut col, "hello", "world");

        let note = col.get_note(id).unwrap();
        assert_eq!(note.fields, vec!["hello", "world"]);
        assert!(!note.guid.is_empty());
        assert_eq!(col.card_count().unwrap(), 1);
        assert_eq!(col.cards_of_note(id).unwrap()[0].ord, 0);
    }

    #[test]
    fn test_get_note_not_found() {
        let (col, _tmp) = setup();
        assert!(matches!(col.get_note(12345), Err(CardportError::NoteNotFound(12345))));
    }

    #[test]
    fn test_add_note_assigns_new_id_on_collision() {
        let (mut col, _tmp) = setup();
        let first = add(&mut col, "a", "b");
        let model = col.current_model().unwrap();
        let mut note = col.new_note(&model);
        note.id = first;
        let second = col.add_note(&mut note).unwrap();
        assert_ne!(first, second);
        assert_eq!(note.id, second);
    }

    #[test]
    fn test_update_note_reports_changes() {
        let (mut col, _tmp) = setup();
        let id = add(&mut col, "a", "b");
        let mut note = col.get_note(id).unwrap();

        assert!(!col.update_note(&note).unwrap());
        note.set_field(1, "c");
        assert!(col.update_note(&note).unwrap());
        note.add_tag("test");
        assert!(col.update_note(&note).unwrap());

        let stored = col.get_note(id).unwrap();
        assert_eq!(stored.fields, vec!["a", "c"]);
        assert_eq!(stored.tags, vec!["test"]);
    }

    #[test]
    fn test_tags_with_commas_roundtrip() {
        let (mut col, _tmp) = setup();
        let id = add(&mut col, "a", "b");
        let mut note = col.get_note(id).unwrap();
        note.tags = vec!["x,y".to_string(), "z".to_string()];
        col.update_note(&note).unwrap();
        assert_eq!(col.get_note(id).unwrap().tags, vec!["x,y", "z"]);
    }

    #[test]
    fn test_save_model_pads_existing_notes() {
        let (mut col, _tmp) = setup();
        let id = add(&mut col, "1", "2");

        let mut model = col.current_model().unwrap();
        model.add_field(Model::new_field("Three"));
        col.save_model(&model).unwrap();

        let note = col.get_note(id).unwrap();
        assert_eq!(note.fields, vec!["1", "2", ""]);
        assert_eq!(col.current_model().unwrap().field_count(), 3);
    }

    #[test]
    fn test_save_model_with_new_template_generates_cards() {
        let (mut col, _tmp) = setup();
        add(&mut col, "1", "2");
        let mut model = col.current_model().unwrap();
        model.templates.push(crate::CardTemplate {
            name: "Card 2".to_string(),
            front: "{{Back}}".to_string(),
            back: "{{Front}}".to_string(),
        });
        col.save_model(&model).unwrap();
        assert_eq!(col.card_count().unwrap(), 2);
    }

    #[test]
    fn test_find_cards_queries() {
        let (mut col, _tmp) = setup();
        let a = add(&mut col, "食べる", "to eat");
        let b = add(&mut col, "飲む", "to drink");
        let mut note = col.get_note(b).unwrap();
        note.add_tag("verbs");
        col.update_note(&note).unwrap();

        let mid = col.current_model().unwrap().id;
        assert_eq!(col.find_cards("").unwrap().len(), 2);
        let card_ids: Vec<i64> = col.cards_of_note(a).unwrap().iter().map(|c| c.id).collect();
        assert_eq!(col.find_cards(&format!("nid:{a}")).unwrap(), card_ids);
        assert_eq!(col.find_cards(&format!("mid:{mid}")).unwrap().len(), 2);
        assert_eq!(col.find_cards("tag:VERBS").unwrap().len(), 1);
        assert_eq!(col.find_cards("DRINK").unwrap().len(), 1);
        assert!(col.find_cards("nothing here").unwrap().is_empty());
    }

    #[test]
    fn test_remove_cards_removes_orphan_notes() {
        let (mut col, _tmp) = setup();
        add(&mut col, "a", "b");
        add(&mut col, "c", "d");
        let all = col.find_cards("").unwrap();

        let removed = col.remove_cards(&all[..1]).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(col.note_count().unwrap(), 1);

        col.remove_cards(&col.find_cards("").unwrap()).unwrap();
        assert_eq!(col.note_count().unwrap(), 0);
        assert_eq!(col.card_count().unwrap(), 0);
    }

    #[test]
    fn test_dropped_transaction_rolls_back() {
        let (mut col, _tmp) = setup();
        {
            let tx = col.transaction().unwrap();
            let model = tx.current_model().unwrap();
            let mut note = new_note(&model);
            note.set_field(0, "uncommitted");
            tx.add_note(&mut note).unwrap();
        }
        assert_eq!(col.note_count().unwrap(), 0);
    }

    #[test]
    fn test_set_current_model_rejects_unknown_id() {
        let (mut col, _tmp) = setup();
        assert!(matches!(col.set_current_model(1), Err(CardportError::ModelNotFound(1))));
    }
}

//! Content-addressed reconciliation of incoming media files.
//!
//! A file is matched against the destination store by name *and* bytes.
//! Same name with the same bytes is a no-op, a missing name is written
//! directly, and a name already holding different bytes is diverted to a
//! derived name `stem_<id>.ext` so the existing file is never overwritten.

use crate::core::media::{
    is_valid_media_name, media_references, rewrite_media_references, MediaStore,
};
use crate::{CardportError, Result};
use std::collections::HashMap;
use std::path::Path;

/// What reconciling one file did to the destination store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaAction {
    /// Identical content was already stored under the requested name.
    Unchanged,
    /// The requested name was free and the content was written under it.
    Written,
    /// The requested name held different content; the file lives at `to`.
    /// `written` is `false` when `to` already held identical content.
    Renamed { from: String, to: String, written: bool },
}

/// The name under which reconciled content now resides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub filename: String,
    pub action: MediaAction,
}

impl Reconciled {
    /// The `(old, new)` name pair when the file was diverted.
    pub fn rename(&self) -> Option<(&str, &str)> {
        match &self.action {
            MediaAction::Renamed { from, to, .. } => Some((from.as_str(), to.as_str())),
            _ => None,
        }
    }
}

/// Result of reconciling every media reference of a note's fields.
#[derive(Debug, Clone, Default)]
pub struct ReconciledFields {
    /// Field text with renamed references substituted.
    pub fields: Vec<String>,
    /// One entry per distinct referenced file that the source could supply.
    pub files: Vec<Reconciled>,
}

/// Stateless service deciding where incoming media content goes.
#[derive(Debug, Clone, Copy, Default)]
pub struct MediaReconciler;

impl MediaReconciler {
    pub fn new() -> Self {
        Self
    }

    /// Inserts `_<disambiguator>` before the extension of `filename`.
    pub fn derived_name(filename: &str, disambiguator: &str) -> String {
        let path = Path::new(filename);
        match (
            path.file_stem().and_then(|s| s.to_str()),
            path.extension().and_then(|s| s.to_str()),
        ) {
            (Some(stem), Some(ext)) => format!("{stem}_{disambiguator}.{ext}"),
            _ => format!("{filename}_{disambiguator}"),
        }
    }

    /// Stores `content` under `filename` or a derived name and reports which.
    ///
    /// Calling this again with the same arguments after it succeeded leaves
    /// the store unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`CardportError::MediaWrite`] if the store cannot be read or
    /// written.
    pub fn reconcile(
        &self,
        store: &dyn MediaStore,
        filename: &str,
        content: &[u8],
        disambiguator: &str,
    ) -> Result<Reconciled> {
        match read(store, filename)? {
            Some(existing) if existing == content => {
                log::debug!("media '{filename}' already present with identical content");
                return Ok(Reconciled {
                    filename: filename.to_string(),
                    action: MediaAction::Unchanged,
                });
            }
            None => {
                write(store, filename, content)?;
                log::debug!("media '{filename}' written");
                return Ok(Reconciled {
                    filename: filename.to_string(),
                    action: MediaAction::Written,
                });
            }
            Some(_) => {}
        }

        let derived = Self::derived_name(filename, disambiguator);
        let written = match read(store, &derived)? {
            Some(existing) if existing == content => false,
            _ => {
                write(store, &derived, content)?;
                true
            }
        };
        log::warn!("media '{filename}' differs from the local copy; stored as '{derived}'");
        Ok(Reconciled {
            filename: derived.clone(),
            action: MediaAction::Renamed {
                from: filename.to_string(),
                to: derived,
                written,
            },
        })
    }

    /// Reconciles every file referenced by `fields` and rewrites the
    /// references of renamed files.
    ///
    /// `source` supplies the incoming bytes for a filename; references it
    /// cannot supply, and references that are not plain filenames, are left
    /// untouched. The returned fields are only
    /// produced once every write succeeded, so a failed write leaves the
    /// caller's note content as it was.
    pub fn reconcile_fields<F>(
        &self,
        store: &dyn MediaStore,
        fields: &[String],
        disambiguator: &str,
        mut source: F,
    ) -> Result<ReconciledFields>
    where
        F: FnMut(&str) -> Result<Option<Vec<u8>>>,
    {
        let mut seen: Vec<String> = Vec::new();
        let mut files = Vec::new();
        let mut renames: HashMap<String, String> = HashMap::new();

        for name in fields.iter().flat_map(|f| media_references(f)) {
            if seen.contains(&name) {
                continue;
            }
            seen.push(name.clone());
            if !is_valid_media_name(&name) {
                log::warn!("media reference '{name}' is not a plain filename; left as is");
                continue;
            }
            let Some(content) = source(&name)? else {
                log::warn!("media '{name}' is referenced but not included in the source");
                continue;
            };
            let reconciled = self.reconcile(store, &name, &content, disambiguator)?;
            if let Some((from, to)) = reconciled.rename() {
                renames.insert(from.to_string(), to.to_string());
            }
            files.push(reconciled);
        }

        let fields = fields
            .iter()
            .map(|f| rewrite_media_references(f, &renames))
            .collect();
        Ok(ReconciledFields { fields, files })
    }
}

fn read(store: &dyn MediaStore, name: &str) -> Result<Option<Vec<u8>>> {
    store.read(name).map_err(|source| CardportError::MediaWrite {
        filename: name.to_string(),
        source,
    })
}

fn write(store: &dyn MediaStore, name: &str, content: &[u8]) -> Result<()> {
    store.write(name, content).map_err(|source| CardportError::MediaWrite {
        filename: name.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::media::MediaDir;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn store() -> (MediaDir, TempDir) {
        let tmp = TempDir::new().unwrap();
        (MediaDir::open(tmp.path()).unwrap(), tmp)
    }

    /// A store whose writes always fail.
    struct ReadOnlyStore(PathBuf);

    impl MediaStore for ReadOnlyStore {
        fn dir(&self) -> &Path {
            &self.0
        }
        fn list(&self) -> std::io::Result<Vec<String>> {
            Ok(vec![])
        }
        fn read(&self, _name: &str) -> std::io::Result<Option<Vec<u8>>> {
            Ok(None)
        }
        fn write(&self, _name: &str, _data: &[u8]) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"))
        }
    }

    #[test]
    fn test_derived_name() {
        assert_eq!(MediaReconciler::derived_name("foo.mp3", "42"), "foo_42.mp3");
        assert_eq!(MediaReconciler::derived_name("a.b.png", "7"), "a.b_7.png");
        assert_eq!(MediaReconciler::derived_name("noext", "7"), "noext_7");
    }

    #[test]
    fn test_missing_file_is_written() {
        let (media, _tmp) = store();
        let r = MediaReconciler::new().reconcile(&media, "foo.mp3", b"foo", "1").unwrap();
        assert_eq!(r.action, MediaAction::Written);
        assert_eq!(r.filename, "foo.mp3");
        assert_eq!(media.read("foo.mp3").unwrap(), Some(b"foo".to_vec()));
    }

    #[test]
    fn test_identical_content_is_noop_and_idempotent() {
        let (media, _tmp) = store();
        let rec = MediaReconciler::new();
        rec.reconcile(&media, "foo.mp3", b"foo", "1").unwrap();
        let again = rec.reconcile(&media, "foo.mp3", b"foo", "1").unwrap();
        assert_eq!(again.action, MediaAction::Unchanged);
        assert_eq!(media.list().unwrap(), vec!["foo.mp3"]);
    }

    #[test]
    fn test_different_content_is_renamed_without_clobbering() {
        let (media, _tmp) = store();
        media.write("foo.mp3", b"bar").unwrap();
        let rec = MediaReconciler::new();

        let r = rec.reconcile(&media, "foo.mp3", b"foo", "99").unwrap();
        assert_eq!(r.filename, "foo_99.mp3");
        assert_eq!(r.rename(), Some(("foo.mp3", "foo_99.mp3")));
        assert_eq!(media.read("foo.mp3").unwrap(), Some(b"bar".to_vec()));
        assert_eq!(media.read("foo_99.mp3").unwrap(), Some(b"foo".to_vec()));

        // Same input again: still renamed, nothing new written.
        let again = rec.reconcile(&media, "foo.mp3", b"foo", "99").unwrap();
        assert_eq!(
            again.action,
            MediaAction::Renamed {
                from: "foo.mp3".to_string(),
                to: "foo_99.mp3".to_string(),
                written: false,
            }
        );
        assert_eq!(media.list().unwrap(), vec!["foo.mp3", "foo_99.mp3"]);
    }

    #[test]
    fn test_stale_derived_name_is_overwritten() {
        let (media, _tmp) = store();
        media.write("foo.mp3", b"bar").unwrap();
        media.write("foo_99.mp3", b"old").unwrap();

        let r = MediaReconciler::new().reconcile(&media, "foo.mp3", b"foo", "99").unwrap();
        assert!(matches!(r.action, MediaAction::Renamed { written: true, .. }));
        assert_eq!(media.read("foo_99.mp3").unwrap(), Some(b"foo".to_vec()));
    }

    #[test]
    fn test_reconcile_fields_rewrites_renamed_references() {
        let (media, _tmp) = store();
        media.write("foo.mp3", b"bar").unwrap();
        let fields = vec!["[sound:foo.mp3]".to_string(), "<img src=\"pic.png\">".to_string()];

        let out = MediaReconciler::new()
            .reconcile_fields(&media, &fields, "5", |name| {
                Ok(match name {
                    "foo.mp3" => Some(b"foo".to_vec()),
                    _ => None,
                })
            })
            .unwrap();

        assert_eq!(out.fields, vec!["[sound:foo_5.mp3]", "<img src=\"pic.png\">"]);
        assert_eq!(out.files.len(), 1);
        assert!(!media.contains("pic.png"));
    }

    #[test]
    fn test_reference_outside_store_is_left_alone() {
        let (media, tmp) = store();
        std::fs::write(tmp.path().join("outside.mp3"), b"bar").unwrap();
        let fields = vec!["[sound:../outside.mp3]".to_string()];

        let mut asked = Vec::new();
        let out = MediaReconciler::new()
            .reconcile_fields(&media, &fields, "5", |name| {
                asked.push(name.to_string());
                Ok(Some(b"foo".to_vec()))
            })
            .unwrap();

        assert!(asked.is_empty());
        assert!(out.files.is_empty());
        assert_eq!(out.fields, fields);
        assert_eq!(std::fs::read(tmp.path().join("outside.mp3")).unwrap(), b"bar");
    }

    #[test]
    fn test_write_failure_is_media_write_error() {
        let store = ReadOnlyStore(PathBuf::from("/nonexistent"));
        let fields = vec!["[sound:foo.mp3]".to_string()];
        let err = MediaReconciler::new()
            .reconcile_fields(&store, &fields, "1", |_| Ok(Some(b"foo".to_vec())))
            .unwrap_err();
        assert!(matches!(
            err,
            CardportError::MediaWrite { ref filename, .. } if filename == "foo.mp3"
        ));
    }
}

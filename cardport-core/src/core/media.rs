//! Media store access and media references embedded in field text.
//!
//! A field refers to media with `[sound:NAME]` or an `<img src="NAME">` tag.
//! [`MediaStore`] is the destination side: a flat namespace of files keyed by
//! filename. [`MediaDir`] implements it on a directory next to the
//! collection database.

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static SOUND_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[sound:([^\]]+)\]").unwrap_or_else(|_| unreachable!())
});

static IMG_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<img[^>]*?\ssrc=(?:"([^"]+)"|'([^']+)'|([^\s>"']+))[^>]*>"#)
        .unwrap_or_else(|_| unreachable!())
});

/// Destination media storage keyed by filename.
///
/// Implementations must make writes all-or-nothing: after `write` returns,
/// the file holds exactly `data`; if it fails, the previous content (or
/// absence) is unchanged.
pub trait MediaStore {
    /// Directory the files live in.
    fn dir(&self) -> &Path;

    /// All filenames currently in the store, sorted.
    fn list(&self) -> std::io::Result<Vec<String>>;

    /// Content of `name`, or `None` when no such file exists.
    fn read(&self, name: &str) -> std::io::Result<Option<Vec<u8>>>;

    /// Adds `name`, or replaces its content.
    fn write(&self, name: &str, data: &[u8]) -> std::io::Result<()>;

    fn contains(&self, name: &str) -> bool {
        is_valid_media_name(name) && self.dir().join(name).is_file()
    }
}

/// Whether `name` is a plain filename that stays inside a media directory.
pub fn is_valid_media_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && name != "." && name != ".."
}

fn check_name(name: &str) -> std::io::Result<()> {
    if is_valid_media_name(name) {
        Ok(())
    } else {
        Err(std::io::Error::new(
            ErrorKind::InvalidInput,
            format!("invalid media filename '{name}'"),
        ))
    }
}

/// A [`MediaStore`] backed by a plain directory.
#[derive(Debug, Clone)]
pub struct MediaDir {
    dir: PathBuf,
}

impl MediaDir {
    /// Opens (creating if needed) the media directory at `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> std::io::Result<Self> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self { dir: dir.as_ref().to_path_buf() })
    }

    /// Media directory used for the collection database at `db_path`:
    /// `notes.db` keeps its media in `notes.media/`.
    pub fn path_for_collection(db_path: &Path) -> PathBuf {
        let stem = db_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("collection");
        db_path.with_file_name(format!("{stem}.media"))
    }
}

impl MediaStore for MediaDir {
    fn dir(&self) -> &Path {
        &self.dir
    }

    fn list(&self) -> std::io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                // Half-written temporaries are never listed.
                if !name.starts_with(".tmp") {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn read(&self, name: &str) -> std::io::Result<Option<Vec<u8>>> {
        check_name(name)?;
        match fs::read(self.dir.join(name)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, name: &str, data: &[u8]) -> std::io::Result<()> {
        check_name(name)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.dir.join(name)).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Returns every media filename referenced by `field`, in order of appearance.
pub fn media_references(field: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = Vec::new();
    for caps in SOUND_REF.captures_iter(field) {
        if let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) {
            found.push((whole.start(), name.as_str().to_string()));
        }
    }
    for caps in IMG_REF.captures_iter(field) {
        if let (Some(whole), Some(name)) = (caps.get(0), img_name(&caps)) {
            found.push((whole.start(), name.to_string()));
        }
    }
    found.sort_by_key(|(pos, _)| *pos);
    found.into_iter().map(|(_, name)| name).collect()
}

/// Replaces media filenames inside media tags of `field` according to
/// `renames`. Text outside `[sound:…]` and `<img>` tags is never touched.
pub fn rewrite_media_references(field: &str, renames: &HashMap<String, String>) -> String {
    if renames.is_empty() {
        return field.to_string();
    }
    let after_sound = SOUND_REF.replace_all(field, |caps: &Captures| {
        let (whole, name) = (&caps[0], &caps[1]);
        match renames.get(name) {
            // `[sound:` is seven bytes; the name runs up to the closing bracket.
            Some(new_name) => format!("{}{new_name}]", &whole[..7]),
            None => whole.to_string(),
        }
    });
    IMG_REF
        .replace_all(&after_sound, |caps: &Captures| {
            let whole = &caps[0];
            match img_name(caps).and_then(|name| renames.get(name).map(|n| (name, n))) {
                Some((old, new_name)) => {
                    let src_at = whole.to_ascii_lowercase().find("src=").unwrap_or(0);
                    let (head, tail) = whole.split_at(src_at);
                    format!("{head}{}", tail.replacen(old, new_name, 1))
                }
                None => whole.to_string(),
            }
        })
        .into_owned()
}

fn img_name<'a>(caps: &Captures<'a>) -> Option<&'a str> {
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_media_references_in_order() {
        let field = r#"<img src="a.png"> text [sound:b.mp3] <IMG class=x src='c d.jpg'> <img src=e.gif>"#;
        assert_eq!(media_references(field), vec!["a.png", "b.mp3", "c d.jpg", "e.gif"]);
    }

    #[test]
    fn test_media_references_none() {
        assert!(media_references("plain text, foo.mp3").is_empty());
    }

    #[test]
    fn test_rewrite_only_inside_tags() {
        let mut renames = HashMap::new();
        renames.insert("foo.mp3".to_string(), "foo_42.mp3".to_string());
        renames.insert("pic.png".to_string(), "pic_42.png".to_string());
        let field = r#"foo.mp3 [sound:foo.mp3] <img alt="pic.png" src="pic.png">"#;
        assert_eq!(
            rewrite_media_references(field, &renames),
            r#"foo.mp3 [sound:foo_42.mp3] <img alt="pic.png" src="pic_42.png">"#
        );
    }

    #[test]
    fn test_media_dir_write_read_list() {
        let tmp = TempDir::new().unwrap();
        let media = MediaDir::open(tmp.path().join("col.media")).unwrap();
        assert_eq!(media.read("foo.mp3").unwrap(), None);

        media.write("foo.mp3", b"foo").unwrap();
        media.write("foo.mp3", b"bar").unwrap();
        assert_eq!(media.read("foo.mp3").unwrap(), Some(b"bar".to_vec()));
        assert!(media.contains("foo.mp3"));
        assert_eq!(media.list().unwrap(), vec!["foo.mp3"]);
    }

    #[test]
    fn test_media_dir_rejects_path_traversal() {
        let tmp = TempDir::new().unwrap();
        let media = MediaDir::open(tmp.path()).unwrap();
        assert!(media.write("../escape.mp3", b"x").is_err());
        assert!(media.write("", b"x").is_err());
    }

    #[test]
    fn test_media_dir_reads_stay_inside_dir() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("secret.txt"), b"secret").unwrap();
        let media = MediaDir::open(tmp.path().join("col.media")).unwrap();

        assert!(!media.contains("../secret.txt"));
        assert!(media.read("../secret.txt").is_err());
        assert!(media.read("..").is_err());
        assert!(!is_valid_media_name("a\\b.png"));
        assert!(is_valid_media_name("_font.ttf"));
    }

    #[test]
    fn test_path_for_collection() {
        let p = MediaDir::path_for_collection(Path::new("/data/notes.db"));
        assert_eq!(p, PathBuf::from("/data/notes.media"));
    }
}

use serde::{Deserialize, Serialize};

/// A note: an ordered list of field values bound to a model.
///
/// The number of entries in `fields` always equals the field count of the
/// model identified by `model_id` once the note has been stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: i64,
    /// Globally unique identifier, stable across collections and packages.
    pub guid: String,
    pub model_id: i64,
    pub fields: Vec<String>,
    pub tags: Vec<String>,
    pub modified_at: i64,
}

impl Note {
    /// Returns the first field, or `""` for a note without fields.
    pub fn first_field(&self) -> &str {
        self.fields.first().map(String::as_str).unwrap_or("")
    }

    /// Sets field `index`, ignoring indices outside the model's layout.
    pub fn set_field(&mut self, index: usize, value: impl Into<String>) {
        if let Some(slot) = self.fields.get_mut(index) {
            *slot = value.into();
        }
    }

    /// Adds `tag` unless an equal tag (ignoring case) is already present.
    pub fn add_tag(&mut self, tag: &str) {
        let tag = tag.trim();
        if tag.is_empty() || self.has_tag(tag) {
            return;
        }
        self.tags.push(tag.to_string());
        self.tags.sort();
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// A card generated from one template of a note's model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: i64,
    pub note_id: i64,
    /// Index of the template this card was generated from.
    pub ord: u32,
    pub modified_at: i64,
}

/// Trims, drops empties, de-duplicates (ignoring case) and sorts `tags`.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if tag.is_empty() || out.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            continue;
        }
        out.push(tag.to_string());
    }
    out.sort();
    out
}

/// Splits a whitespace-separated tag string into normalised tags.
pub fn split_tags(tags: &str) -> Vec<String> {
    normalize_tags(tags.split_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(fields: &[&str]) -> Note {
        Note {
            id: 1,
            guid: "guid-1".to_string(),
            model_id: 10,
            fields: fields.iter().map(|s| s.to_string()).collect(),
            tags: vec![],
            modified_at: 1_700_000_000,
        }
    }

    #[test]
    fn test_first_field() {
        assert_eq!(note(&["front", "back"]).first_field(), "front");
        assert_eq!(note(&[]).first_field(), "");
    }

    #[test]
    fn test_set_field_out_of_range_is_ignored() {
        let mut n = note(&["a", "b"]);
        n.set_field(1, "x");
        n.set_field(5, "y");
        assert_eq!(n.fields, vec!["a", "x"]);
    }

    #[test]
    fn test_add_tag_deduplicates() {
        let mut n = note(&["a"]);
        n.add_tag("test");
        n.add_tag(" Test ");
        n.add_tag("");
        assert_eq!(n.tags, vec!["test"]);
    }

    #[test]
    fn test_split_tags() {
        assert_eq!(split_tags("  b a  A c "), vec!["a", "b", "c"]);
        assert!(split_tags("   ").is_empty());
    }
}

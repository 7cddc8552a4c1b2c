//! Note models: the ordered field layout and card templates of a note type.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Describes a single field slot within a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub name: String,
    /// Position of the field in every note of the model.
    pub ord: usize,
}

/// A card template rendered from a note's fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardTemplate {
    pub name: String,
    pub front: String,
    pub back: String,
}

/// A note type: an ordered list of fields and one or more card templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub id: i64,
    pub name: String,
    pub fields: Vec<FieldDefinition>,
    pub templates: Vec<CardTemplate>,
    #[serde(default)]
    pub css: String,
    pub modified_at: i64,
}

/// How two models with the same id relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaDiff {
    /// Fields, templates and styling are identical.
    Identical,
    /// Field and template names match; only template text or styling differs.
    TemplatesChanged,
    /// Field names, field order, or the set of templates differ.
    LayoutChanged,
}

impl Model {
    /// The stock two-field model seeded into every new collection.
    pub fn basic(id: i64) -> Self {
        Self {
            id,
            name: "Basic".to_string(),
            fields: vec![
                FieldDefinition { name: "Front".to_string(), ord: 0 },
                FieldDefinition { name: "Back".to_string(), ord: 1 },
            ],
            templates: vec![CardTemplate {
                name: "Card 1".to_string(),
                front: "{{Front}}".to_string(),
                back: "{{FrontSide}}<hr id=answer>{{Back}}".to_string(),
            }],
            css: String::new(),
            modified_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Creates an unattached field definition; [`add_field`](Self::add_field)
    /// assigns its position.
    pub fn new_field(name: &str) -> FieldDefinition {
        FieldDefinition { name: name.to_string(), ord: 0 }
    }

    /// Appends `field` as the last field of the model.
    ///
    /// Existing notes are padded when the model is saved through
    /// [`Collection::save_model`](crate::Collection::save_model).
    pub fn add_field(&mut self, mut field: FieldDefinition) {
        field.ord = self.fields.len();
        self.fields.push(field);
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Hash over field names and template names, in order.
    ///
    /// Two models with equal hashes can share notes without any field being
    /// moved or dropped.
    pub fn layout_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for f in &self.fields {
            hasher.update(f.name.as_bytes());
            hasher.update([0x1f]);
        }
        hasher.update([0x1e]);
        for t in &self.templates {
            hasher.update(t.name.as_bytes());
            hasher.update([0x1f]);
        }
        hex::encode(hasher.finalize())
    }

    /// Compares `self` (the destination) with `incoming`.
    pub fn diff(&self, incoming: &Model) -> SchemaDiff {
        if self.layout_hash() != incoming.layout_hash() {
            SchemaDiff::LayoutChanged
        } else if self.templates != incoming.templates || self.css != incoming.css {
            SchemaDiff::TemplatesChanged
        } else {
            SchemaDiff::Identical
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_model_layout() {
        let m = Model::basic(1);
        assert_eq!(m.field_names(), vec!["Front", "Back"]);
        assert_eq!(m.fields[1].ord, 1);
        assert_eq!(m.templates.len(), 1);
    }

    #[test]
    fn test_add_field_assigns_ord() {
        let mut m = Model::basic(1);
        m.add_field(Model::new_field("Three"));
        assert_eq!(m.field_count(), 3);
        assert_eq!(m.fields[2].ord, 2);
        assert_eq!(m.fields[2].name, "Three");
    }

    #[test]
    fn test_diff_identical() {
        let a = Model::basic(1);
        let mut b = a.clone();
        b.modified_at += 100;
        assert_eq!(a.diff(&b), SchemaDiff::Identical);
    }

    #[test]
    fn test_diff_template_text_only() {
        let a = Model::basic(1);
        let mut b = a.clone();
        b.templates[0].front = "Changed Front Template {{Front}}".to_string();
        assert_eq!(a.diff(&b), SchemaDiff::TemplatesChanged);
    }

    #[test]
    fn test_diff_field_layout() {
        let a = Model::basic(1);
        let mut b = a.clone();
        b.add_field(Model::new_field("Extra"));
        assert_eq!(a.diff(&b), SchemaDiff::LayoutChanged);

        let mut c = a.clone();
        c.fields.swap(0, 1);
        assert_eq!(a.diff(&c), SchemaDiff::LayoutChanged);
    }
}

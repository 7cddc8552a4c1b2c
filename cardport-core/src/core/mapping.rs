//! Mapping of delimited-text columns onto model field slots.

use crate::core::note::split_tags;

/// Where one column of a text record goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnTarget {
    /// Into the model field at this index.
    Field(usize),
    /// Into the note's tags (whitespace separated).
    Tags,
    /// Nowhere.
    Ignored,
}

/// Column-to-field assignment for one text import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    columns: Vec<ColumnTarget>,
    field_count: usize,
}

/// A raw record after mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedRecord {
    /// One slot per model field; `None` where no column supplied a value.
    pub fields: Vec<Option<String>>,
    /// Tags from the tag column, when one is mapped and present.
    pub tags: Option<Vec<String>>,
    /// `(observed, expected)` field counts when the record's columns did not
    /// supply exactly one value per model field. Tag and ignored columns are
    /// not counted.
    pub mismatch: Option<(usize, usize)>,
}

impl FieldMapping {
    /// Builds a mapping from explicit column targets. Field indices outside
    /// `0..field_count` are treated as [`ColumnTarget::Ignored`].
    pub fn new(columns: Vec<ColumnTarget>, field_count: usize) -> Self {
        let columns = columns
            .into_iter()
            .map(|c| match c {
                ColumnTarget::Field(i) if i >= field_count => ColumnTarget::Ignored,
                other => other,
            })
            .collect();
        Self { columns, field_count }
    }

    /// The default mapping for a file with `column_count` columns: leading
    /// columns fill fields in order and the next one (if any) holds tags.
    /// Columns past that are left unmapped and count as surplus fields.
    pub fn initial(field_count: usize, column_count: usize) -> Self {
        let columns = (0..column_count.min(field_count + 1))
            .map(|i| {
                if i < field_count {
                    ColumnTarget::Field(i)
                } else {
                    ColumnTarget::Tags
                }
            })
            .collect();
        Self { columns, field_count }
    }

    pub fn columns(&self) -> &[ColumnTarget] {
        &self.columns
    }

    pub fn field_count(&self) -> usize {
        self.field_count
    }

    pub fn tags_mapped(&self) -> bool {
        self.columns.contains(&ColumnTarget::Tags)
    }

    /// Whether some column feeds model field `index`.
    pub fn maps_field(&self, index: usize) -> bool {
        self.columns.contains(&ColumnTarget::Field(index))
    }

    /// Maps `raw` onto field slots.
    ///
    /// A record is expected to carry one value per model field. Field columns
    /// and columns past the end of the mapping count as fields; when their
    /// number differs from the model's field count the record is reported in
    /// [`MappedRecord::mismatch`]. Missing values leave their slots empty and
    /// surplus ones are dropped.
    pub fn map(&self, raw: &[String]) -> MappedRecord {
        let mut fields: Vec<Option<String>> = vec![None; self.field_count];
        let mut tags = None;
        let mut observed = 0;

        for (i, value) in raw.iter().enumerate() {
            match self.columns.get(i) {
                Some(ColumnTarget::Field(f)) => {
                    observed += 1;
                    fields[*f] = Some(value.clone());
                }
                Some(ColumnTarget::Tags) => tags = Some(split_tags(value)),
                Some(ColumnTarget::Ignored) => {}
                None => observed += 1,
            }
        }

        let expected = self.field_count;
        MappedRecord {
            fields,
            tags,
            mismatch: (observed != expected).then_some((observed, expected)),
        }
    }
}

impl MappedRecord {
    /// The incoming first field, if mapped.
    pub fn first_field(&self) -> Option<&str> {
        self.fields.first().and_then(|f| f.as_deref())
    }

    /// Field values for a new note: unmapped slots are empty.
    pub fn to_new_fields(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.clone().unwrap_or_default()).collect()
    }

    /// Field values for updating `existing`: unmapped slots keep their
    /// current content.
    pub fn merge_into(&self, existing: &[String]) -> Vec<String> {
        self.fields
            .iter()
            .enumerate()
            .map(|(i, f)| match f {
                Some(value) => value.clone(),
                None => existing.get(i).cloned().unwrap_or_default(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_initial_mapping() {
        assert_eq!(
            FieldMapping::initial(2, 4).columns(),
            &[ColumnTarget::Field(0), ColumnTarget::Field(1), ColumnTarget::Tags]
        );
        let narrow = FieldMapping::initial(3, 2);
        assert_eq!(narrow.columns(), &[ColumnTarget::Field(0), ColumnTarget::Field(1)]);
        assert!(!narrow.maps_field(2));
    }

    #[test]
    fn test_map_exact() {
        let m = FieldMapping::initial(2, 2);
        let rec = m.map(&raw(&["a", "b"]));
        assert_eq!(rec.to_new_fields(), vec!["a", "b"]);
        assert_eq!(rec.mismatch, None);
        assert_eq!(rec.tags, None);
    }

    #[test]
    fn test_map_too_few_fields() {
        let m = FieldMapping::initial(2, 2);
        let rec = m.map(&raw(&["only"]));
        assert_eq!(rec.mismatch, Some((1, 2)));
        assert_eq!(rec.to_new_fields(), vec!["only", ""]);
        assert_eq!(rec.merge_into(&raw(&["x", "keep"])), vec!["only", "keep"]);
    }

    #[test]
    fn test_map_too_many_fields() {
        let m = FieldMapping::initial(2, 2);
        let rec = m.map(&raw(&["a", "b", "c"]));
        assert_eq!(rec.mismatch, Some((3, 2)));
        assert_eq!(rec.to_new_fields(), vec!["a", "b"]);
    }

    #[test]
    fn test_tag_column_not_counted() {
        let m = FieldMapping::initial(2, 3);
        let with_tags = m.map(&raw(&["a", "b", "t1 t2"]));
        assert_eq!(with_tags.mismatch, None);
        assert_eq!(with_tags.tags, Some(raw(&["t1", "t2"])));

        let without_tags = m.map(&raw(&["a", "b"]));
        assert_eq!(without_tags.mismatch, None);
        assert_eq!(without_tags.tags, None);
    }

    #[test]
    fn test_unmapped_field_preserved_on_merge() {
        let m = FieldMapping::initial(3, 2);
        let rec = m.map(&raw(&["1", "x"]));
        assert_eq!(rec.mismatch, Some((2, 3)));
        assert_eq!(rec.merge_into(&raw(&["1", "2", "3"])), vec!["1", "x", "3"]);
    }

    #[test]
    fn test_surplus_beyond_tag_column_is_counted() {
        let m = FieldMapping::initial(2, 4);
        let rec = m.map(&raw(&["a", "b", "t", "extra"]));
        assert_eq!(rec.mismatch, Some((3, 2)));
        assert_eq!(rec.tags, Some(raw(&["t"])));
    }

    #[test]
    fn test_ignored_column_not_counted() {
        let m = FieldMapping::new(
            vec![ColumnTarget::Field(0), ColumnTarget::Ignored, ColumnTarget::Field(1)],
            2,
        );
        let rec = m.map(&raw(&["a", "junk", "b"]));
        assert_eq!(rec.mismatch, None);
        assert_eq!(rec.to_new_fields(), vec!["a", "b"]);
    }

    #[test]
    fn test_custom_mapping_out_of_range_is_ignored() {
        let m = FieldMapping::new(vec![ColumnTarget::Field(1), ColumnTarget::Field(7)], 2);
        assert_eq!(m.columns()[1], ColumnTarget::Ignored);
        let rec = m.map(&raw(&["back", "junk"]));
        assert_eq!(rec.fields, vec![None, Some("back".to_string())]);
        assert_eq!(rec.first_field(), None);
    }
}

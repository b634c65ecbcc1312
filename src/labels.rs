use std::collections::BTreeMap;

/// Class identifier produced by a detector backend.
pub type ClassId = i64;

/// Labels used when no table is configured.
pub const DEFAULT_LABELS: [(ClassId, &str); 5] = [
    (0, "bearing_defect"),
    (1, "coolant_hose_defect"),
    (2, "headlight_defect"),
    (3, "radiator_cap_defect"),
    (4, "spark_plug_defect"),
];

/// A class id that has no entry in the label table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("class id {0} has no label")]
pub struct UnknownClass(pub ClassId);

/// Static mapping from class id to defect name. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelTable {
    labels: BTreeMap<ClassId, String>,
}

impl LabelTable {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (ClassId, S)>,
        S: Into<String>,
    {
        Self {
            labels: entries
                .into_iter()
                .map(|(id, name)| (id, name.into()))
                .collect(),
        }
    }

    pub fn resolve(&self, class_id: ClassId) -> Result<&str, UnknownClass> {
        self.labels
            .get(&class_id)
            .map(String::as_str)
            .ok_or(UnknownClass(class_id))
    }

    /// Label used in place of an unmapped class id.
    pub fn unknown_label(class_id: ClassId) -> String {
        format!("unknown_class_{}", class_id)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl Default for LabelTable {
    fn default() -> Self {
        Self::new(DEFAULT_LABELS)
    }
}

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Ordered mapping from source field path to target column.
///
/// Order is significant: it fixes the column order of generated statements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMapping {
    entries: Vec<(String, String)>,
}

impl FieldMapping {
    pub fn new<I, S, T>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(s, t)| (s.into(), t.into()))
                .collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(s, t)| (s.as_str(), t.as_str()))
    }

    pub fn target_columns(&self) -> Vec<&str> {
        self.entries.iter().map(|(_, t)| t.as_str()).collect()
    }

    /// Source path feeding the given target column, if any.
    pub fn source_for(&self, column: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, t)| t == column)
            .map(|(s, _)| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for FieldMapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|(s, t)| (s.clone(), Value::String(t.clone())))
            .collect();
        map.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FieldMapping {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        let mut entries = Vec::with_capacity(map.len());
        for (source, target) in map {
            match target {
                Value::String(column) => entries.push((source, column)),
                other => {
                    return Err(serde::de::Error::custom(format!(
                        "field_mapping value for '{source}' must be a column name, got {other}"
                    )))
                }
            }
        }
        Ok(Self { entries })
    }
}

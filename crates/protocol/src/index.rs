use serde::{Deserialize, Serialize};

/// Column affinity for an index field. The default is `V32`, matching
/// spec.md's data model for a path with no declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexType {
    V8,
    V16,
    V32,
    #[serde(rename = "INT")]
    Int,
    #[serde(rename = "REAL")]
    Real,
    #[serde(rename = "BOOLEAN")]
    Boolean,
    #[serde(rename = "BLOB")]
    Blob,
    #[serde(rename = "TEXT")]
    Text,
}

impl Default for IndexType {
    fn default() -> Self {
        Self::V32
    }
}

/// One field of a (possibly compound) index: a dotted document path plus its
/// declared column type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexField {
    pub path: String,
    #[serde(default)]
    pub r#type: IndexType,
}

impl IndexField {
    pub fn new(path: impl Into<String>, r#type: IndexType) -> Self {
        Self {
            path: path.into(),
            r#type,
        }
    }

    /// The materialized column name for this field's path: dots become `__`.
    pub fn column(&self) -> String {
        path_to_column(&self.path)
    }
}

/// An index specification: a single indexed path, or an ordered compound of
/// several, each with its own declared type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexSpec {
    Single {
        path: String,
        #[serde(default)]
        r#type: IndexType,
        #[serde(default)]
        unique: bool,
    },
    Compound {
        fields: Vec<IndexField>,
        #[serde(default)]
        unique: bool,
    },
}

impl IndexSpec {
    pub fn single(path: impl Into<String>) -> Self {
        Self::Single {
            path: path.into(),
            r#type: IndexType::default(),
            unique: false,
        }
    }

    pub fn single_typed(path: impl Into<String>, r#type: IndexType) -> Self {
        Self::Single {
            path: path.into(),
            r#type,
            unique: false,
        }
    }

    pub fn compound(fields: Vec<IndexField>) -> Self {
        Self::Compound {
            fields,
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        match &mut self {
            Self::Single { unique, .. } => *unique = true,
            Self::Compound { unique, .. } => *unique = true,
        }
        self
    }

    pub fn is_unique(&self) -> bool {
        match self {
            Self::Single { unique, .. } => *unique,
            Self::Compound { unique, .. } => *unique,
        }
    }

    /// The ordered list of `(path, type)` pairs backing this index.
    pub fn fields(&self) -> Vec<(&str, IndexType)> {
        match self {
            Self::Single { path, r#type, .. } => vec![(path.as_str(), *r#type)],
            Self::Compound { fields, .. } => {
                fields.iter().map(|f| (f.path.as_str(), f.r#type)).collect()
            }
        }
    }

    /// The materialized column names this index requires, in declaration order.
    pub fn columns(&self) -> Vec<String> {
        self.fields()
            .into_iter()
            .map(|(path, _)| path_to_column(path))
            .collect()
    }

    /// The SQL index name: the single column name, or compound columns
    /// joined by `___`.
    pub fn index_name(&self) -> String {
        self.columns().join("___")
    }
}

pub fn path_to_column(path: &str) -> String {
    path.replace('.', "__")
}

pub fn column_to_path(column: &str) -> String {
    column.replace("__", ".")
}

//! Schema and metadata model for data sources
//!
//! [`DataSourceMeta`] is a sum type: a table source carries a
//! [`TableSchema`], an image source carries an [`ImageDimension`], and no
//! value can carry both.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sample::Split;

/// Column value type of a table source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableColumnType {
    /// Numeric values
    Number,
    /// Free text
    String,
    /// true / false
    Bool,
    /// Nested key/value data
    Map,
    /// Timestamps
    Datetime,
    /// Type could not be determined
    Unknown,
}

impl fmt::Display for TableColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TableColumnType::Number => "Number",
            TableColumnType::String => "String",
            TableColumnType::Bool => "Bool",
            TableColumnType::Map => "Map",
            TableColumnType::Datetime => "Datetime",
            TableColumnType::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// A named, typed column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableColumn {
    /// Name of the column, unique within its schema
    pub name: String,

    /// Value type of the column
    #[serde(rename = "type")]
    pub column_type: TableColumnType,
}

impl TableColumn {
    /// Create a new column
    pub fn new(name: &str, column_type: TableColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
        }
    }
}

impl fmt::Display for TableColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.column_type)
    }
}

/// Ordered column list; order defines positional correspondence with row data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<TableColumn>", into = "Vec<TableColumn>")]
pub struct TableSchema {
    /// Columns in positional order
    columns: Vec<TableColumn>,

    /// Column indices by name for faster lookup
    indices: HashMap<String, usize>,
}

impl TableSchema {
    /// Create a schema, rejecting duplicate column names
    pub fn new(columns: Vec<TableColumn>) -> Result<Self> {
        let mut indices = HashMap::with_capacity(columns.len());
        for (i, column) in columns.iter().enumerate() {
            if indices.insert(column.name.clone(), i).is_some() {
                return Err(Error::SchemaMismatch(format!(
                    "duplicate column name: {}",
                    column.name
                )));
            }
        }

        Ok(Self { columns, indices })
    }

    /// Get all columns
    pub fn columns(&self) -> &[TableColumn] {
        &self.columns
    }

    /// Get a column by position
    pub fn column(&self, index: usize) -> Option<&TableColumn> {
        self.columns.get(index)
    }

    /// Get the position of a column by name
    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.indices
            .get(name)
            .copied()
            .ok_or_else(|| Error::InvalidArgument(format!("Column not found: {name}")))
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the schema has no columns
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl TryFrom<Vec<TableColumn>> for TableSchema {
    type Error = Error;

    fn try_from(columns: Vec<TableColumn>) -> Result<Self> {
        Self::new(columns)
    }
}

impl From<TableSchema> for Vec<TableColumn> {
    fn from(schema: TableSchema) -> Self {
        schema.columns
    }
}

impl fmt::Display for TableSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "TableSchema: {} columns", self.columns.len())?;
        for column in &self.columns {
            writeln!(f, "  {column}")?;
        }
        Ok(())
    }
}

/// Fixed spatial shape shared by every image of a source (`z` is channel depth)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageDimension {
    /// Width
    pub x: u32,
    /// Height
    pub y: u32,
    /// Channels
    pub z: u32,
}

impl ImageDimension {
    /// Create a new dimension
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Number of values in one image
    pub fn volume(&self) -> usize {
        self.x as usize * self.y as usize * self.z as usize
    }
}

/// Exact number of samples in each split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceSize {
    /// Training samples
    pub train: usize,

    /// Test samples
    pub test: usize,

    /// Validation samples, present iff a validation split exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<usize>,
}

impl DataSourceSize {
    /// Create a size with no validation split
    pub fn new(train: usize, test: usize) -> Self {
        Self {
            train,
            test,
            validation: None,
        }
    }

    /// Add a validation split
    #[must_use]
    pub fn with_validation(mut self, validation: usize) -> Self {
        self.validation = Some(validation);
        self
    }

    /// Size of the given split, `None` if the split does not exist
    pub fn split(&self, split: Split) -> Option<usize> {
        match split {
            Split::Train => Some(self.train),
            Split::Test => Some(self.test),
            Split::Validation => self.validation,
        }
    }

    /// Total over all splits
    pub fn total(&self) -> usize {
        self.train + self.test + self.validation.unwrap_or(0)
    }
}

/// Mapping from label index to class name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelMap {
    entries: BTreeMap<u32, String>,
}

impl LabelMap {
    /// Create an empty label map
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a label map where each name's index is its position
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = (0u32..).zip(names.into_iter().map(Into::into)).collect();
        Self { entries }
    }

    /// Insert or replace an entry
    pub fn insert(&mut self, index: u32, name: impl Into<String>) {
        self.entries.insert(index, name.into());
    }

    /// Class name for a label index
    pub fn name(&self, index: u32) -> Option<&str> {
        self.entries.get(&index).map(String::as_str)
    }

    /// Resolve a class name into its label index
    pub fn index_of(&self, name: &str) -> Option<u32> {
        self.entries
            .iter()
            .find_map(|(index, entry)| (entry == name).then_some(*index))
    }

    /// Whether an entry exists for the label index
    pub fn contains(&self, index: u32) -> bool {
        self.entries.contains_key(&index)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in index order
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.entries.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

/// Discriminant of [`DataSourceMeta`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataSourceType {
    /// Tabular rows
    Table,
    /// Images
    Image,
}

/// Metadata of a table source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDataSourceMeta {
    /// Split sizes
    pub size: DataSourceSize,

    /// Column layout of the rows
    pub table_schema: TableSchema,

    /// Keys of the data fields, if the source exposes them
    #[serde(default)]
    pub data_keys: Option<Vec<String>>,

    /// Label vocabulary
    pub label_map: LabelMap,
}

/// Metadata of an image source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDataSourceMeta {
    /// Split sizes
    pub size: DataSourceSize,

    /// Shape shared by all images
    pub dimension: ImageDimension,

    /// Label vocabulary
    pub label_map: LabelMap,
}

/// Type-tagged description of a data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DataSourceMeta {
    /// Tabular source
    Table(TableDataSourceMeta),
    /// Image source
    Image(ImageDataSourceMeta),
}

impl DataSourceMeta {
    /// Discriminant of this metadata
    pub fn kind(&self) -> DataSourceType {
        match self {
            DataSourceMeta::Table(_) => DataSourceType::Table,
            DataSourceMeta::Image(_) => DataSourceType::Image,
        }
    }

    /// Split sizes
    pub fn size(&self) -> &DataSourceSize {
        match self {
            DataSourceMeta::Table(meta) => &meta.size,
            DataSourceMeta::Image(meta) => &meta.size,
        }
    }

    /// Mutable split sizes, for stages that reshape a source
    pub fn size_mut(&mut self) -> &mut DataSourceSize {
        match self {
            DataSourceMeta::Table(meta) => &mut meta.size,
            DataSourceMeta::Image(meta) => &mut meta.size,
        }
    }

    /// Label vocabulary
    pub fn label_map(&self) -> &LabelMap {
        match self {
            DataSourceMeta::Table(meta) => &meta.label_map,
            DataSourceMeta::Image(meta) => &meta.label_map,
        }
    }

    /// Table schema, present only for table sources
    pub fn table_schema(&self) -> Option<&TableSchema> {
        match self {
            DataSourceMeta::Table(meta) => Some(&meta.table_schema),
            DataSourceMeta::Image(_) => None,
        }
    }

    /// Image dimension, present only for image sources
    pub fn dimension(&self) -> Option<&ImageDimension> {
        match self {
            DataSourceMeta::Table(_) => None,
            DataSourceMeta::Image(meta) => Some(&meta.dimension),
        }
    }

    /// Check the structural invariants of the metadata
    pub fn validate(&self) -> Result<()> {
        match self {
            DataSourceMeta::Table(meta) => {
                if let Some(keys) = &meta.data_keys {
                    if let Some(key) = keys.iter().find(|k| meta.table_schema.index_of(k).is_err()) {
                        return Err(Error::InvalidMetadata(format!(
                            "data key '{key}' is not a schema column"
                        )));
                    }
                }
            }
            DataSourceMeta::Image(meta) => {
                if meta.dimension.volume() == 0 {
                    return Err(Error::InvalidMetadata(format!(
                        "image dimension must be non-zero, got {:?}",
                        meta.dimension
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn table_meta() -> DataSourceMeta {
        DataSourceMeta::Table(TableDataSourceMeta {
            size: DataSourceSize::new(3, 1),
            table_schema: TableSchema::new(vec![
                TableColumn::new("sepal", TableColumnType::Number),
                TableColumn::new("kind", TableColumnType::String),
            ])
            .unwrap(),
            data_keys: None,
            label_map: LabelMap::from_names(["setosa", "virginica"]),
        })
    }

    fn image_meta() -> DataSourceMeta {
        DataSourceMeta::Image(ImageDataSourceMeta {
            size: DataSourceSize::new(10, 2).with_validation(500),
            dimension: ImageDimension::new(28, 28, 1),
            label_map: LabelMap::from_names(["0", "1"]),
        })
    }

    #[test]
    fn test_duplicate_columns_rejected() {
        let result = TableSchema::new(vec![
            TableColumn::new("a", TableColumnType::Number),
            TableColumn::new("a", TableColumnType::String),
        ]);
        assert!(matches!(result, Err(Error::SchemaMismatch(_))));
    }

    #[test]
    fn test_schema_preserves_order() {
        let schema = TableSchema::new(vec![
            TableColumn::new("z", TableColumnType::Bool),
            TableColumn::new("a", TableColumnType::Datetime),
        ])
        .unwrap();
        assert_eq!(schema.index_of("z").unwrap(), 0);
        assert_eq!(schema.index_of("a").unwrap(), 1);
        assert!(schema.index_of("missing").is_err());
    }

    #[test]
    fn test_variant_shapes_are_exclusive() {
        for meta in [table_meta(), image_meta()] {
            match meta.kind() {
                DataSourceType::Table => {
                    assert!(meta.table_schema().is_some());
                    assert!(meta.dimension().is_none());
                }
                DataSourceType::Image => {
                    assert!(meta.table_schema().is_none());
                    assert!(meta.dimension().is_some());
                }
            }
        }
    }

    #[test]
    fn test_meta_json_is_type_tagged() {
        let json = serde_json::to_value(table_meta()).unwrap();
        assert_eq!(json["type"], "table");
        assert!(json.get("tableSchema").is_some());
        assert!(json.get("dimension").is_none());
        assert_eq!(json["size"], serde_json::json!({"train": 3, "test": 1}));

        let back: DataSourceMeta = serde_json::from_value(json).unwrap();
        assert_eq!(back, table_meta());
        assert_eq!(serde_json::to_value(image_meta()).unwrap()["type"], "image");
    }

    #[test]
    fn test_deserialized_schema_rejects_duplicates() {
        let json = serde_json::json!([
            {"name": "a", "type": "Number"},
            {"name": "a", "type": "Bool"}
        ]);
        assert!(serde_json::from_value::<TableSchema>(json).is_err());
    }

    #[test]
    fn test_deserialized_schema_supports_lookup() {
        let json = serde_json::json!([
            {"name": "a", "type": "Number"},
            {"name": "b", "type": "Map"}
        ]);
        let schema: TableSchema = serde_json::from_value(json).unwrap();
        assert_eq!(schema.index_of("b").unwrap(), 1);
    }

    #[test]
    fn test_label_map_lookup() {
        let labels = LabelMap::from_names(["cat", "dog"]);
        assert_eq!(labels.name(1), Some("dog"));
        assert_eq!(labels.index_of("cat"), Some(0));
        assert_eq!(labels.index_of("bird"), None);
        assert!(!labels.contains(2));
    }

    #[test_case(Split::Train, Some(10))]
    #[test_case(Split::Test, Some(2))]
    #[test_case(Split::Validation, Some(500))]
    fn test_split_size(split: Split, expected: Option<usize>) {
        assert_eq!(image_meta().size().split(split), expected);
    }

    #[test]
    fn test_zero_dimension_invalid() {
        let meta = DataSourceMeta::Image(ImageDataSourceMeta {
            size: DataSourceSize::new(0, 0),
            dimension: ImageDimension::new(28, 0, 1),
            label_map: LabelMap::new(),
        });
        assert!(matches!(meta.validate(), Err(Error::InvalidMetadata(_))));
    }

    #[test]
    fn test_unknown_data_key_invalid() {
        let mut meta = table_meta();
        if let DataSourceMeta::Table(table) = &mut meta {
            table.data_keys = Some(vec!["petal".into()]);
        }
        assert!(meta.validate().is_err());
    }
}

//! CSV table source
//!
//! Expects `train.csv`, `test.csv` and optionally `validation.csv` in one
//! directory, each starting with a header row. One column holds the class
//! name of the row; every other column becomes part of the table schema.
//!
//! Opening a source scans each file once to record where every row starts,
//! so split sizes are exact before anything is read. Rows are parsed lazily
//! by seeking to the recorded position.

use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use csv::{Position, ReaderBuilder, StringRecord};
use flowline_core::{
    DataSource, DataSourceEntry, DataSourceMeta, DataSourceSize, ExecutionContext, IndexedAccessor,
    LabelMap, Options, OptionsExt, RecordReader, Sample, Split, TableColumn, TableColumnType,
    TableDataSourceMeta, TableSchema,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Options for [`CsvTableSource`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CsvSourceOptions {
    /// Column holding the class name of each row
    pub label_column: String,

    /// Field delimiter, must be a single byte
    pub delimiter: char,

    /// Number of train rows sampled to infer column types
    pub infer_rows: usize,

    /// Columns a model should consume, all columns when unset
    pub data_keys: Option<Vec<String>>,
}

impl Default for CsvSourceOptions {
    fn default() -> Self {
        Self {
            label_column: "label".to_string(),
            delimiter: ',',
            infer_rows: 100,
            data_keys: None,
        }
    }
}

impl CsvSourceOptions {
    /// Read options from a script options map; unknown keys are ignored
    pub fn from_options(options: &Options) -> flowline_core::Result<Self> {
        serde_json::from_value(Value::Object(options.clone())).map_err(|e| {
            flowline_core::Error::InvalidOption {
                key: "csv".to_string(),
                reason: e.to_string(),
            }
        })
    }

    /// Apply a script options map over these options
    ///
    /// Keys missing from the map keep their current values.
    pub fn overlay(&self, options: &Options) -> flowline_core::Result<Self> {
        let mut merged = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => Options::new(),
        };
        merged.extend(options.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self::from_options(&merged)
    }

    fn delimiter_byte(&self) -> Result<u8> {
        u8::try_from(self.delimiter).map_err(|_| {
            Error::InvalidArgument(format!(
                "delimiter {:?} is not a single byte",
                self.delimiter
            ))
        })
    }
}

/// A single cell of a table row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TableValue {
    /// Empty cell
    Missing,
    /// Numeric cell
    Number(f64),
    /// Boolean cell
    Bool(bool),
    /// Text cell
    Text(String),
    /// RFC 3339 timestamp
    Datetime(DateTime<Utc>),
}

impl TableValue {
    /// Numeric view of the value, where one exists
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TableValue::Number(v) => Some(*v),
            TableValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }
}

/// A row of a table source, aligned with its [`TableSchema`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    /// One value per schema column
    pub values: Vec<TableValue>,
}

fn parse_bool(raw: &str) -> Option<bool> {
    if raw.eq_ignore_ascii_case("true") {
        Some(true)
    } else if raw.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn infer_type<'a>(values: impl Iterator<Item = &'a str>) -> TableColumnType {
    let values: Vec<&str> = values.map(str::trim).filter(|v| !v.is_empty()).collect();
    if values.is_empty() {
        TableColumnType::Unknown
    } else if values.iter().all(|v| v.parse::<f64>().is_ok()) {
        TableColumnType::Number
    } else if values.iter().all(|v| parse_bool(v).is_some()) {
        TableColumnType::Bool
    } else if values.iter().all(|v| DateTime::parse_from_rfc3339(v).is_ok()) {
        TableColumnType::Datetime
    } else {
        TableColumnType::String
    }
}

fn parse_value(raw: &str, column_type: TableColumnType) -> std::result::Result<TableValue, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(TableValue::Missing);
    }

    match column_type {
        TableColumnType::Number => raw
            .parse()
            .map(TableValue::Number)
            .map_err(|_| format!("'{raw}' is not a number")),
        TableColumnType::Bool => parse_bool(raw)
            .map(TableValue::Bool)
            .ok_or_else(|| format!("'{raw}' is not a boolean")),
        TableColumnType::Datetime => DateTime::parse_from_rfc3339(raw)
            .map(|dt| TableValue::Datetime(dt.with_timezone(&Utc)))
            .map_err(|e| format!("'{raw}' is not an RFC 3339 timestamp: {e}")),
        TableColumnType::String | TableColumnType::Map | TableColumnType::Unknown => {
            Ok(TableValue::Text(raw.to_string()))
        }
    }
}

/// Result of scanning one split file
struct SplitIndex {
    path: PathBuf,
    headers: StringRecord,
    label_field: usize,
    rows: Vec<(Position, String)>,
    sample: Vec<StringRecord>,
}

fn reader_builder(delimiter: u8) -> ReaderBuilder {
    let mut builder = ReaderBuilder::new();
    // Field count is checked per row when it is read
    builder.delimiter(delimiter).has_headers(true).flexible(true);
    builder
}

fn index_split(path: &Path, delimiter: u8, label_column: &str, infer_rows: usize) -> Result<SplitIndex> {
    let mut reader = reader_builder(delimiter).from_path(path)?;
    let headers = reader.headers()?.clone();
    let label_field = headers
        .iter()
        .position(|h| h.trim() == label_column)
        .ok_or_else(|| Error::Schema(format!("{} has no '{label_column}' column", path.display())))?;

    let mut rows = Vec::new();
    let mut sample = Vec::new();
    let mut record = StringRecord::new();
    loop {
        let pos = reader.position().clone();
        if !reader.read_record(&mut record)? {
            break;
        }

        let label = record
            .get(label_field)
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .ok_or_else(|| {
                Error::Format(format!("{} row {} has no label", path.display(), rows.len()))
            })?;
        rows.push((pos, label.to_string()));
        if sample.len() < infer_rows {
            sample.push(record.clone());
        }
    }

    debug!(path = %path.display(), rows = rows.len(), "indexed csv split");
    Ok(SplitIndex {
        path: path.to_path_buf(),
        headers,
        label_field,
        rows,
        sample,
    })
}

/// Lazy reader over one CSV split
pub struct CsvSplitReader {
    reader: csv::Reader<File>,
    rows: Vec<(Position, u32)>,
    fields: Arc<[(usize, TableColumnType)]>,
    width: usize,
    record: StringRecord,
}

impl CsvSplitReader {
    fn open(
        path: &Path,
        delimiter: u8,
        rows: Vec<(Position, u32)>,
        fields: Arc<[(usize, TableColumnType)]>,
        width: usize,
    ) -> Result<Self> {
        let mut reader = reader_builder(delimiter).from_path(path)?;
        reader.headers()?;
        Ok(Self {
            reader,
            rows,
            fields,
            width,
            record: StringRecord::new(),
        })
    }

    /// Read the record under the csv cursor and turn it into a row
    fn read_current(&mut self, index: usize) -> flowline_core::Result<TableRow> {
        let found = self
            .reader
            .read_record(&mut self.record)
            .map_err(|e| flowline_core::Error::materialization(index, e.to_string()))?;
        if !found {
            return Err(flowline_core::Error::materialization(
                index,
                "row is missing from the file",
            ));
        }
        if self.record.len() != self.width {
            return Err(flowline_core::Error::materialization(
                index,
                format!("expected {} fields, found {}", self.width, self.record.len()),
            ));
        }

        let values = self
            .fields
            .iter()
            .map(|&(field, column_type)| parse_value(&self.record[field], column_type))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|reason| flowline_core::Error::materialization(index, reason))?;
        Ok(TableRow { values })
    }

    fn seek_row(&mut self, index: usize) -> flowline_core::Result<u32> {
        let (pos, label) = self
            .rows
            .get(index)
            .cloned()
            .ok_or_else(|| flowline_core::Error::materialization(index, "row index out of range"))?;
        self.reader
            .seek(pos)
            .map_err(|e| flowline_core::Error::materialization(index, e.to_string()))?;
        Ok(label)
    }
}

#[async_trait]
impl RecordReader<TableRow> for CsvSplitReader {
    fn len(&self) -> usize {
        self.rows.len()
    }

    async fn read(&mut self, index: usize) -> flowline_core::Result<Sample<TableRow>> {
        let label = self.seek_row(index)?;
        Ok(Sample::new(label, self.read_current(index)?))
    }

    async fn read_range(&mut self, start: usize, end: usize) -> flowline_core::Result<Vec<Sample<TableRow>>> {
        if start >= end {
            return Ok(Vec::new());
        }

        self.seek_row(start)?;
        let mut samples = Vec::with_capacity(end - start);
        for index in start..end {
            let label = self.rows.get(index).map(|(_, label)| *label).ok_or_else(|| {
                flowline_core::Error::materialization(index, "row index out of range")
            })?;
            samples.push(Sample::new(label, self.read_current(index)?));
        }
        Ok(samples)
    }
}

/// Data source entry reading a directory of CSV split files
#[derive(Debug, Clone, Default)]
pub struct CsvTableSource {
    options: CsvSourceOptions,
}

impl CsvTableSource {
    /// Create a source with the given options
    pub fn new(options: CsvSourceOptions) -> Self {
        Self { options }
    }

    /// Open the split files under `dir`
    ///
    /// Blocks while the files are scanned.
    pub fn open(&self, dir: impl AsRef<Path>) -> Result<DataSource<TableRow>> {
        let dir = dir.as_ref();
        let delimiter = self.options.delimiter_byte()?;

        let mut splits = Vec::with_capacity(Split::ALL.len());
        for split in Split::ALL {
            let path = dir.join(format!("{split}.csv"));
            if split == Split::Validation && !path.exists() {
                continue;
            }
            let index = index_split(&path, delimiter, &self.options.label_column, self.options.infer_rows)?;
            splits.push((split, index));
        }

        let (headers, label_field) = match splits.first() {
            Some((_, train)) => (train.headers.clone(), train.label_field),
            None => return Err(Error::Format(format!("no train.csv in {}", dir.display()))),
        };
        for (split, index) in &splits {
            if index.headers != headers {
                return Err(Error::Schema(format!(
                    "{split} header {:?} differs from train header {:?}",
                    index.headers, headers
                )));
            }
        }

        // Types are inferred from train rows only
        let train_sample = &splits[0].1.sample;
        let fields: Arc<[(usize, TableColumnType)]> = (0..headers.len())
            .filter(|&field| field != label_field)
            .map(|field| {
                let values = train_sample.iter().map(|r| r.get(field).unwrap_or(""));
                (field, infer_type(values))
            })
            .collect();
        let table_schema = TableSchema::new(
            fields
                .iter()
                .map(|&(field, column_type)| TableColumn::new(headers[field].trim(), column_type))
                .collect(),
        )?;

        let vocabulary: Vec<String> = splits
            .iter()
            .flat_map(|(_, index)| index.rows.iter().map(|(_, label)| label.clone()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let count = |split: Split| {
            splits
                .iter()
                .find(|(s, _)| *s == split)
                .map(|(_, index)| index.rows.len())
        };
        let size = DataSourceSize {
            train: count(Split::Train).unwrap_or(0),
            test: count(Split::Test).unwrap_or(0),
            validation: count(Split::Validation),
        };
        let meta = DataSourceMeta::Table(TableDataSourceMeta {
            size,
            table_schema,
            data_keys: self.options.data_keys.clone(),
            label_map: LabelMap::from_names(vocabulary.iter().cloned()),
        });

        let mut builder = DataSource::builder(meta);
        for (split, index) in splits {
            let rows = index
                .rows
                .into_iter()
                .map(|(pos, label)| {
                    let label = vocabulary
                        .binary_search(&label)
                        .ok()
                        .and_then(|i| u32::try_from(i).ok())
                        .ok_or_else(|| Error::Format(format!("label '{label}' outside vocabulary")))?;
                    Ok((pos, label))
                })
                .collect::<Result<Vec<_>>>()?;
            let reader = CsvSplitReader::open(&index.path, delimiter, rows, Arc::clone(&fields), headers.len())?;
            let accessor = Box::new(IndexedAccessor::new(reader));
            builder = match split {
                Split::Train => builder.train(accessor),
                Split::Test => builder.test(accessor),
                Split::Validation => builder.validation(accessor),
            };
        }

        Ok(builder.build()?)
    }
}

#[async_trait]
impl DataSourceEntry<TableRow> for CsvTableSource {
    async fn load(
        &self,
        options: &Options,
        ctx: &ExecutionContext,
    ) -> flowline_core::Result<DataSource<TableRow>> {
        let dir = options
            .option_str("path")?
            .map_or_else(|| ctx.workspace.data_dir.clone(), PathBuf::from);
        let source = Self::new(self.options.overlay(options)?);

        info!(dir = %dir.display(), "opening csv table source");
        crate::blocking(move || source.open(dir)).await
    }
}

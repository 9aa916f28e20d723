//! Table to feature vector encoding

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use flowline_core::accessor::MapAccessor;
use flowline_core::{
    BoxedAccessor, DataAccessor, DataSource, DataSourceMeta, Dataflow, Error, ExecutionContext, Options,
    Result, Sample, TableColumn, TableColumnType, TableDataSourceMeta, TableSchema,
};
use flowline_readers::{TableRow, TableValue};
use tracing::debug;

use crate::DRAIN_BATCH;

/// Turns [`TableRow`]s into dense `Vec<f64>` features
///
/// Numbers pass through, booleans become 0 or 1, timestamps become Unix
/// seconds and missing cells become 0. Text is replaced by its index in a
/// per-column vocabulary learned from the train split; text never seen in
/// train maps to the vocabulary size. Only the `data_keys` columns are
/// encoded when the metadata names them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableEncodeStage;

struct Encoder {
    /// Schema positions of the encoded columns
    columns: Vec<usize>,
    /// Text vocabulary of each encoded column
    vocabularies: Vec<BTreeMap<String, usize>>,
}

impl Encoder {
    fn encode(&self, index: usize, row: &TableRow) -> Result<Vec<f64>> {
        self.columns
            .iter()
            .zip(&self.vocabularies)
            .map(|(&column, vocabulary)| {
                let value = row.values.get(column).ok_or_else(|| {
                    Error::materialization(index, format!("row has no value for column {column}"))
                })?;
                Ok(match value {
                    TableValue::Missing => 0.0,
                    TableValue::Number(v) => *v,
                    TableValue::Bool(b) => f64::from(u8::from(*b)),
                    TableValue::Datetime(dt) => dt.timestamp() as f64,
                    TableValue::Text(text) => {
                        vocabulary.get(text).copied().unwrap_or(vocabulary.len()) as f64
                    }
                })
            })
            .collect()
    }
}

async fn learn_vocabularies(train: &mut BoxedAccessor<TableRow>, columns: &[usize]) -> Result<Vec<BTreeMap<String, usize>>> {
    let mut seen = vec![BTreeSet::new(); columns.len()];
    train.seek(0).await?;
    while let Some(batch) = train.next_batch(DRAIN_BATCH).await? {
        for sample in &batch {
            for (slot, &column) in seen.iter_mut().zip(columns) {
                if let Some(TableValue::Text(text)) = sample.data.values.get(column) {
                    if !slot.contains(text) {
                        slot.insert(text.clone());
                    }
                }
            }
        }
    }
    train.seek(0).await?;

    Ok(seen
        .into_iter()
        .map(|words| words.into_iter().enumerate().map(|(i, w)| (w, i)).collect())
        .collect())
}

#[async_trait]
impl Dataflow<TableRow, Vec<f64>> for TableEncodeStage {
    fn name(&self) -> &str {
        "table-encode"
    }

    async fn apply(
        &self,
        input: DataSource<TableRow>,
        _options: &Options,
        _ctx: &ExecutionContext,
    ) -> Result<DataSource<Vec<f64>>> {
        let mut parts = input.into_parts();
        let DataSourceMeta::Table(table) = &parts.meta else {
            return Err(Error::SchemaMismatch(format!(
                "table encoding needs a table source, got {:?}",
                parts.meta.kind()
            )));
        };

        let columns = match &table.data_keys {
            Some(keys) => keys
                .iter()
                .map(|key| table.table_schema.index_of(key))
                .collect::<Result<Vec<_>>>()?,
            None => (0..table.table_schema.len()).collect(),
        };
        let table_schema = TableSchema::new(
            columns
                .iter()
                .filter_map(|&i| table.table_schema.column(i))
                .map(|column| TableColumn::new(&column.name, TableColumnType::Number))
                .collect(),
        )?;
        let meta = DataSourceMeta::Table(TableDataSourceMeta {
            size: table.size,
            table_schema,
            data_keys: table.data_keys.clone(),
            label_map: table.label_map.clone(),
        });

        let vocabularies = learn_vocabularies(&mut parts.train, &columns).await?;
        debug!(
            columns = columns.len(),
            categorical = vocabularies.iter().filter(|v| !v.is_empty()).count(),
            "learned table encoding"
        );
        let encoder = Arc::new(Encoder { columns, vocabularies });

        parts.meta = meta;
        parts
            .map_accessors(|_, accessor| -> BoxedAccessor<Vec<f64>> {
                let encoder = Arc::clone(&encoder);
                Box::new(MapAccessor::new(accessor, move |index, sample: Sample<TableRow>| {
                    let features = encoder.encode(index, &sample.data)?;
                    Ok(Sample::new(sample.label, features))
                }))
            })
            .guard_labels(false)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, numbered};
    use flowline_core::accessor::drain;
    use flowline_core::{DataSourceSize, LabelMap};
    use flowline_readers::memory_source;

    fn row(values: Vec<TableValue>) -> TableRow {
        TableRow { values }
    }

    fn table(data_keys: Option<Vec<String>>) -> DataSource<TableRow> {
        let meta = DataSourceMeta::Table(TableDataSourceMeta {
            size: DataSourceSize::new(0, 0),
            table_schema: TableSchema::new(vec![
                TableColumn::new("height", TableColumnType::Number),
                TableColumn::new("color", TableColumnType::String),
                TableColumn::new("ok", TableColumnType::Bool),
            ])
            .unwrap(),
            data_keys,
            label_map: LabelMap::from_names(["no", "yes"]),
        });
        let text = |s: &str| TableValue::Text(s.to_string());
        let train = vec![
            Sample::new(1, row(vec![TableValue::Number(1.5), text("red"), TableValue::Bool(true)])),
            Sample::new(0, row(vec![TableValue::Number(2.0), text("blue"), TableValue::Bool(false)])),
            Sample::new(1, row(vec![TableValue::Missing, text("red"), TableValue::Bool(true)])),
        ];
        let test = vec![Sample::new(0, row(vec![TableValue::Number(3.0), text("green"), TableValue::Bool(false)]))];
        memory_source(meta, train, test, None).unwrap()
    }

    #[tokio::test]
    async fn test_encode_rows() {
        let (_dir, ctx) = context().await;
        let mut out = TableEncodeStage.apply(table(None), &Options::new(), &ctx).await.unwrap();

        let schema = out.meta().table_schema().unwrap();
        assert!(schema.columns().iter().all(|c| c.column_type == TableColumnType::Number));

        let train = drain(&mut out.train, 2).await.unwrap();
        assert_eq!(train[0].data, vec![1.5, 1.0, 1.0]);
        assert_eq!(train[1].data, vec![2.0, 0.0, 0.0]);
        assert_eq!(train[2].data, vec![0.0, 1.0, 1.0]);
        assert_eq!(train[1].label, 0);

        // "green" never occurs in train
        let test = out.test.next().await.unwrap().unwrap();
        assert_eq!(test.data, vec![3.0, 2.0, 0.0]);
    }

    #[tokio::test]
    async fn test_encode_only_data_keys() {
        let (_dir, ctx) = context().await;
        let mut out = TableEncodeStage
            .apply(table(Some(vec!["color".into()])), &Options::new(), &ctx)
            .await
            .unwrap();
        assert_eq!(out.meta().table_schema().unwrap().len(), 1);
        assert_eq!(out.train.next().await.unwrap().unwrap().data, vec![1.0]);
    }

    #[tokio::test]
    async fn test_encode_rejects_image_source() {
        let (_dir, ctx) = context().await;
        let images = crate::map::MapStage::new("as-row", |_, s: Sample<u32>| {
            Ok(s.map(|_| row(Vec::new())))
        });
        let input: DataSource<TableRow> = images.apply(numbered(1, 1, None), &Options::new(), &ctx).await.unwrap();
        let err = TableEncodeStage.apply(input, &Options::new(), &ctx).await.unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)));
    }
}

//! Storage adapters for flowline data sources
//!
//! Every adapter implements [`RecordReader`](flowline_core::RecordReader)
//! for one split and is driven through an
//! [`IndexedAccessor`](flowline_core::IndexedAccessor), so the accessor
//! contract lives in one place.

#![warn(missing_docs)]

mod error;

pub mod binary;
pub mod image_folder;
pub mod memory;
pub mod table;

pub use binary::{BinaryRecordReader, BinaryRecordWriter};
pub use error::{Error, Result};
pub use image_folder::{ImageFolderOptions, ImageFolderReader, ImageFolderSource, ImagePayload};
pub use memory::{memory_accessor, memory_source, MemoryReader};
pub use table::{CsvSourceOptions, CsvSplitReader, CsvTableSource, TableRow, TableValue};

/// Run blocking filesystem work off the async executor
pub(crate) async fn blocking<T, F>(f: F) -> flowline_core::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| flowline_core::Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
        .map_err(Into::into)
}

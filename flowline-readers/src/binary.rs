//! Length-indexed binary record files
//!
//! Layout:
//!
//! ```text
//! magic "FLRC" | version u32 | records... | offsets [u64; count] | count u64 | table_start u64
//! ```
//!
//! Every record is a bincode-encoded [`Sample`]. The trailer makes the file
//! writable in one pass and readable by index without scanning.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use flowline_core::io::MemoryMappedFile;
use flowline_core::{RecordReader, Sample};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};

const MAGIC: &[u8; 4] = b"FLRC";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 8;
const TRAILER_LEN: usize = 16;

/// Streaming writer for a binary record file
pub struct BinaryRecordWriter<T> {
    writer: BufWriter<File>,
    path: PathBuf,
    offsets: Vec<u64>,
    written: u64,
    _marker: PhantomData<fn(&T)>,
}

impl<T: Serialize> BinaryRecordWriter<T> {
    /// Create or truncate `path` and write the header
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut writer = BufWriter::new(File::create(&path)?);
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        Ok(Self {
            writer,
            path,
            offsets: Vec::new(),
            written: HEADER_LEN as u64,
            _marker: PhantomData,
        })
    }

    /// Append one sample
    pub fn append(&mut self, sample: &Sample<T>) -> Result<()> {
        let bytes = bincode::serialize(sample)?;
        self.writer.write_all(&bytes)?;
        self.offsets.push(self.written);
        self.written += bytes.len() as u64;
        Ok(())
    }

    /// Number of samples appended so far
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Whether nothing was appended yet
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Write the offset table and trailer, returning the record count
    pub fn finish(mut self) -> Result<usize> {
        let table_start = self.written;
        for offset in &self.offsets {
            self.writer.write_all(&offset.to_le_bytes())?;
        }
        self.writer.write_all(&(self.offsets.len() as u64).to_le_bytes())?;
        self.writer.write_all(&table_start.to_le_bytes())?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        debug!(path = %self.path.display(), records = self.offsets.len(), "finished record file");
        Ok(self.offsets.len())
    }
}

/// Random-access reader over a binary record file
pub struct BinaryRecordReader<T> {
    file: MemoryMappedFile,
    /// Record boundaries, `count + 1` entries ending at the offset table
    bounds: Vec<usize>,
    _marker: PhantomData<fn() -> T>,
}

fn read_u64(bytes: &[u8]) -> Result<u64> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Format("truncated integer".into()))?;
    Ok(u64::from_le_bytes(array))
}

fn to_usize(value: u64) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::Format(format!("offset {value} does not fit in memory")))
}

impl<T> BinaryRecordReader<T> {
    /// Map `path` and validate its header and offset table
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = MemoryMappedFile::open(path)?;
        let size = file.size();
        if size < HEADER_LEN + TRAILER_LEN {
            return Err(Error::Format(format!("{} is too short", file.path().display())));
        }

        let header = file.slice(0, HEADER_LEN)?;
        if &header[..4] != MAGIC {
            return Err(Error::Format(format!("{} is not a record file", file.path().display())));
        }
        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if version != VERSION {
            return Err(Error::Format(format!("unsupported record file version {version}")));
        }

        let trailer = file.slice(size - TRAILER_LEN, TRAILER_LEN)?;
        let count = to_usize(read_u64(&trailer[..8])?)?;
        let table_start = to_usize(read_u64(&trailer[8..])?)?;
        let table_len = count
            .checked_mul(8)
            .filter(|&len| table_start.checked_add(len) == Some(size - TRAILER_LEN))
            .ok_or_else(|| Error::Format("offset table does not match file size".into()))?;

        let table = file.slice(table_start, table_len)?;
        let mut bounds = table
            .chunks_exact(8)
            .map(|chunk| read_u64(chunk).and_then(to_usize))
            .collect::<Result<Vec<_>>>()?;
        bounds.push(table_start);
        if bounds.first().is_some_and(|&first| first != HEADER_LEN) || bounds.windows(2).any(|w| w[0] > w[1]) {
            return Err(Error::Format("offset table is not monotonic".into()));
        }

        debug!(path = %file.path().display(), records = count, "opened record file");
        Ok(Self {
            file,
            bounds,
            _marker: PhantomData,
        })
    }

    /// Path of the underlying file
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    fn record_bytes(&self, index: usize) -> flowline_core::Result<&[u8]> {
        match (self.bounds.get(index), self.bounds.get(index + 1)) {
            (Some(&start), Some(&end)) => Ok(self.file.slice(start, end - start)?),
            _ => Err(flowline_core::Error::materialization(index, "record index out of range")),
        }
    }
}

#[async_trait]
impl<T> RecordReader<T> for BinaryRecordReader<T>
where
    T: DeserializeOwned + Send + 'static,
{
    fn len(&self) -> usize {
        self.bounds.len() - 1
    }

    async fn read(&mut self, index: usize) -> flowline_core::Result<Sample<T>> {
        let bytes = self.record_bytes(index)?;
        bincode::deserialize(bytes).map_err(|e| flowline_core::Error::materialization(index, e.to_string()))
    }
}

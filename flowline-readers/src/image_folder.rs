//! Image folder source
//!
//! Layout is `<root>/<split>/<class>/<image>`. `train` and `test` are
//! required, `validation` is optional. Class names are collected across all
//! splits and sorted, and a label is the position of its class name in that
//! order. Every image must share the width, height and channel depth of the
//! first train image.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use flowline_core::{
    DataSource, DataSourceEntry, DataSourceMeta, DataSourceSize, ExecutionContext, ImageDataSourceMeta,
    ImageDimension, IndexedAccessor, LabelMap, Options, OptionsExt, RecordReader, Sample, Split,
};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Options for [`ImageFolderSource`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImageFolderOptions {
    /// File extensions treated as images, compared case-insensitively
    pub extensions: Vec<String>,

    /// Convert every image to a single luminance channel
    pub grayscale: bool,
}

impl Default for ImageFolderOptions {
    fn default() -> Self {
        Self {
            extensions: vec!["png".into(), "jpg".into(), "jpeg".into(), "bmp".into()],
            grayscale: false,
        }
    }
}

impl ImageFolderOptions {
    /// Read options from a script options map; unknown keys are ignored
    pub fn from_options(options: &Options) -> flowline_core::Result<Self> {
        serde_json::from_value(Value::Object(options.clone())).map_err(|e| {
            flowline_core::Error::InvalidOption {
                key: "imageFolder".to_string(),
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

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }
}

/// Decoded image, pixels in row-major interleaved order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Channels per pixel
    pub channels: u8,
    /// `width * height * channels` bytes
    pub pixels: Vec<u8>,
}

fn channels_of(image: &DynamicImage, grayscale: bool) -> u32 {
    let color = image.color();
    if grayscale || (color.channel_count() == 1) {
        1
    } else if color.has_alpha() {
        4
    } else {
        3
    }
}

fn to_payload(image: DynamicImage, channels: u32) -> ImagePayload {
    let (width, height) = (image.width(), image.height());
    let (channels, pixels) = match channels {
        1 => (1, image.into_luma8().into_raw()),
        4 => (4, image.into_rgba8().into_raw()),
        _ => (3, image.into_rgb8().into_raw()),
    };
    ImagePayload {
        width,
        height,
        channels,
        pixels,
    }
}

/// Lazy reader over the image files of one split
pub struct ImageFolderReader {
    files: Vec<(PathBuf, u32)>,
    dimension: ImageDimension,
}

impl ImageFolderReader {
    /// Create a reader over labeled files sharing one dimension
    pub fn new(files: Vec<(PathBuf, u32)>, dimension: ImageDimension) -> Self {
        Self { files, dimension }
    }
}

#[async_trait]
impl RecordReader<ImagePayload> for ImageFolderReader {
    fn len(&self) -> usize {
        self.files.len()
    }

    async fn read(&mut self, index: usize) -> flowline_core::Result<Sample<ImagePayload>> {
        let (path, label) = self
            .files
            .get(index)
            .cloned()
            .ok_or_else(|| flowline_core::Error::materialization(index, "image index out of range"))?;
        let channels = self.dimension.z;

        let display = path.display().to_string();
        let payload = tokio::task::spawn_blocking(move || image::open(&path).map(|img| to_payload(img, channels)))
            .await
            .map_err(|e| flowline_core::Error::materialization(index, e.to_string()))?
            .map_err(|e| flowline_core::Error::materialization(index, format!("{display}: {e}")))?;

        if payload.width != self.dimension.x || payload.height != self.dimension.y {
            return Err(flowline_core::Error::materialization(
                index,
                format!(
                    "{display} is {}x{}, expected {}x{}",
                    payload.width, payload.height, self.dimension.x, self.dimension.y
                ),
            ));
        }
        Ok(Sample::new(label, payload))
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

/// `(class, file)` pairs of one split directory
fn scan_split(dir: &Path, options: &ImageFolderOptions) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for class_dir in sorted_entries(dir)? {
        if !class_dir.is_dir() {
            continue;
        }
        let class = class_dir
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| Error::Format(format!("{} is not valid UTF-8", class_dir.display())))?
            .to_string();
        for file in sorted_entries(&class_dir)? {
            if file.is_file() && options.accepts(&file) {
                files.push((class.clone(), file));
            }
        }
    }
    Ok(files)
}

/// Data source entry reading a directory of class folders
#[derive(Debug, Clone, Default)]
pub struct ImageFolderSource {
    options: ImageFolderOptions,
}

impl ImageFolderSource {
    /// Create a source with the given options
    pub fn new(options: ImageFolderOptions) -> Self {
        Self { options }
    }

    /// Scan `root` and probe the first image
    ///
    /// Blocks while the directories are listed.
    pub fn open(&self, root: impl AsRef<Path>) -> Result<DataSource<ImagePayload>> {
        let root = root.as_ref();

        let mut splits = Vec::with_capacity(Split::ALL.len());
        for split in Split::ALL {
            let dir = root.join(split.as_str());
            if !dir.is_dir() {
                if split == Split::Validation {
                    continue;
                }
                return Err(Error::Format(format!("missing split directory {}", dir.display())));
            }
            splits.push((split, scan_split(&dir, &self.options)?));
        }

        let classes: Vec<String> = splits
            .iter()
            .flat_map(|(_, files)| files.iter().map(|(class, _)| class.clone()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let probe_path = splits
            .iter()
            .find_map(|(_, files)| files.first().map(|(_, path)| path.clone()))
            .ok_or_else(|| Error::Format(format!("no images under {}", root.display())))?;
        let probe = image::open(&probe_path)?;
        let dimension = ImageDimension::new(
            probe.width(),
            probe.height(),
            channels_of(&probe, self.options.grayscale),
        );
        debug!(probe = %probe_path.display(), ?dimension, "probed image dimension");

        let count = |split: Split| {
            splits
                .iter()
                .find(|(s, _)| *s == split)
                .map(|(_, files)| files.len())
        };
        let meta = DataSourceMeta::Image(ImageDataSourceMeta {
            size: DataSourceSize {
                train: count(Split::Train).unwrap_or(0),
                test: count(Split::Test).unwrap_or(0),
                validation: count(Split::Validation),
            },
            dimension,
            label_map: LabelMap::from_names(classes.iter().cloned()),
        });

        let mut builder = DataSource::builder(meta);
        for (split, files) in splits {
            let files = files
                .into_iter()
                .map(|(class, path)| {
                    let label = classes
                        .binary_search(&class)
                        .ok()
                        .and_then(|i| u32::try_from(i).ok())
                        .ok_or_else(|| Error::Format(format!("class '{class}' outside label map")))?;
                    Ok((path, label))
                })
                .collect::<Result<Vec<_>>>()?;
            let accessor = Box::new(IndexedAccessor::new(ImageFolderReader::new(files, dimension)));
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
impl DataSourceEntry<ImagePayload> for ImageFolderSource {
    async fn load(
        &self,
        options: &Options,
        ctx: &ExecutionContext,
    ) -> flowline_core::Result<DataSource<ImagePayload>> {
        let root = options
            .option_str("path")?
            .map_or_else(|| ctx.workspace.data_dir.clone(), PathBuf::from);
        let source = Self::new(self.options.overlay(options)?);

        info!(root = %root.display(), "opening image folder source");
        crate::blocking(move || source.open(root)).await
    }
}

//! Data source: metadata plus one accessor per split

use std::sync::Arc;

use tracing::debug;

use crate::accessor::{BoxedAccessor, DataAccessor, LabelGuard};
use crate::error::{Error, Result};
use crate::sample::Split;
use crate::schema::DataSourceMeta;

/// An addressable bundle of split accessors and their metadata
///
/// The accessors are public fields so that distinct splits can be borrowed
/// and driven independently. Split sizes in the metadata match the
/// accessors; this is checked when the source is built.
pub struct DataSource<T: Send + 'static> {
    meta: DataSourceMeta,

    /// Training split
    pub train: BoxedAccessor<T>,

    /// Test split
    pub test: BoxedAccessor<T>,

    /// Validation split, present iff `meta.size().validation` is set
    pub validation: Option<BoxedAccessor<T>>,
}

impl<T: Send + 'static> DataSource<T> {
    /// Start building a data source
    pub fn builder(meta: DataSourceMeta) -> DataSourceBuilder<T> {
        DataSourceBuilder::new(meta)
    }

    /// Metadata of this source
    ///
    /// Computed at construction, so repeated calls are free and always
    /// return the same value.
    pub fn meta(&self) -> &DataSourceMeta {
        &self.meta
    }

    /// Owned copy of the metadata
    pub async fn data_source_meta(&self) -> Result<DataSourceMeta> {
        Ok(self.meta.clone())
    }

    /// Accessor for a split, `None` if the split does not exist
    pub fn split_mut(&mut self, split: Split) -> Option<&mut BoxedAccessor<T>> {
        match split {
            Split::Train => Some(&mut self.train),
            Split::Test => Some(&mut self.test),
            Split::Validation => self.validation.as_mut(),
        }
    }

    /// Take the source apart, for stages that wrap its accessors
    pub fn into_parts(self) -> DataSourceParts<T> {
        DataSourceParts {
            meta: self.meta,
            train: self.train,
            test: self.test,
            validation: self.validation,
        }
    }
}

impl<T: Send + 'static> std::fmt::Debug for DataSource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("meta", &self.meta)
            .field("validation", &self.validation.is_some())
            .finish_non_exhaustive()
    }
}

/// The pieces of a [`DataSource`]
pub struct DataSourceParts<T: Send + 'static> {
    /// Metadata
    pub meta: DataSourceMeta,
    /// Training split
    pub train: BoxedAccessor<T>,
    /// Test split
    pub test: BoxedAccessor<T>,
    /// Validation split
    pub validation: Option<BoxedAccessor<T>>,
}

impl<T: Send + 'static> DataSourceParts<T> {
    /// Apply the same rewrap to every split
    pub fn map_accessors<U, F>(self, mut f: F) -> DataSourceBuilder<U>
    where
        U: Send + 'static,
        F: FnMut(Split, BoxedAccessor<T>) -> BoxedAccessor<U>,
    {
        let mut builder = DataSourceBuilder::new(self.meta)
            .train(f(Split::Train, self.train))
            .test(f(Split::Test, self.test));
        if let Some(validation) = self.validation {
            builder = builder.validation(f(Split::Validation, validation));
        }
        builder
    }
}

/// A builder for creating data sources
pub struct DataSourceBuilder<T: Send + 'static> {
    meta: DataSourceMeta,
    train: Option<BoxedAccessor<T>>,
    test: Option<BoxedAccessor<T>>,
    validation: Option<BoxedAccessor<T>>,
    guard_labels: bool,
}

impl<T: Send + 'static> DataSourceBuilder<T> {
    /// Create a new builder
    pub fn new(meta: DataSourceMeta) -> Self {
        Self {
            meta,
            train: None,
            test: None,
            validation: None,
            guard_labels: true,
        }
    }

    /// Set the training accessor
    #[must_use]
    pub fn train(mut self, accessor: BoxedAccessor<T>) -> Self {
        self.train = Some(accessor);
        self
    }

    /// Set the test accessor
    #[must_use]
    pub fn test(mut self, accessor: BoxedAccessor<T>) -> Self {
        self.test = Some(accessor);
        self
    }

    /// Set the validation accessor
    #[must_use]
    pub fn validation(mut self, accessor: BoxedAccessor<T>) -> Self {
        self.validation = Some(accessor);
        self
    }

    /// Whether to wrap accessors in a [`LabelGuard`] (on by default)
    #[must_use]
    pub fn guard_labels(mut self, guard: bool) -> Self {
        self.guard_labels = guard;
        self
    }

    /// Mutable access to the metadata before it is frozen
    pub fn meta_mut(&mut self) -> &mut DataSourceMeta {
        &mut self.meta
    }

    /// Build the data source
    pub fn build(self) -> Result<DataSource<T>> {
        self.meta.validate()?;

        let train = self
            .train
            .ok_or_else(|| Error::InvalidArgument("Train accessor is required".into()))?;
        let test = self
            .test
            .ok_or_else(|| Error::InvalidArgument("Test accessor is required".into()))?;

        let size = *self.meta.size();
        match (size.validation, &self.validation) {
            (Some(_), None) => {
                return Err(Error::InvalidMetadata(
                    "metadata declares a validation split but no accessor was given".into(),
                ))
            }
            (None, Some(_)) => {
                return Err(Error::InvalidMetadata(
                    "validation accessor given but metadata declares no validation split".into(),
                ))
            }
            _ => {}
        }

        check_size(Split::Train, size.train, &*train)?;
        check_size(Split::Test, size.test, &*test)?;
        if let (Some(expected), Some(accessor)) = (size.validation, &self.validation) {
            check_size(Split::Validation, expected, &**accessor)?;
        }

        let (train, test, validation) = if self.guard_labels {
            let labels = Arc::new(self.meta.label_map().clone());
            let guard = |accessor: BoxedAccessor<T>| -> BoxedAccessor<T> {
                Box::new(LabelGuard::new(accessor, Arc::clone(&labels)))
            };
            (guard(train), guard(test), self.validation.map(guard))
        } else {
            (train, test, self.validation)
        };

        debug!(
            kind = ?self.meta.kind(),
            train = size.train,
            test = size.test,
            validation = ?size.validation,
            "built data source"
        );

        Ok(DataSource {
            meta: self.meta,
            train,
            test,
            validation,
        })
    }
}

fn check_size<T: Send + 'static>(
    split: Split,
    expected: usize,
    accessor: &dyn DataAccessor<T>,
) -> Result<()> {
    if accessor.size() != expected {
        return Err(Error::InvalidMetadata(format!(
            "{split} split declares {expected} samples but its accessor holds {}",
            accessor.size()
        )));
    }
    Ok(())
}

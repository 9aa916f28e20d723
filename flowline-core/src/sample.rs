//! The atomic unit flowing through a pipeline

use std::fmt;

use serde::{Deserialize, Serialize};

/// A labeled piece of data
///
/// `label` indexes into the label map of the source that produced the
/// sample. `data` is opaque to the accessor layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample<T> {
    /// Label index
    pub label: u32,

    /// Payload
    pub data: T,
}

impl<T> Sample<T> {
    /// Create a new sample
    pub fn new(label: u32, data: T) -> Self {
        Self { label, data }
    }

    /// Transform the payload, keeping the label
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Sample<U> {
        Sample {
            label: self.label,
            data: f(self.data),
        }
    }
}

/// One of the named partitions of a data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    /// Training split
    Train,
    /// Test split
    Test,
    /// Validation split
    Validation,
}

impl Split {
    /// All splits in canonical order
    pub const ALL: [Split; 3] = [Split::Train, Split::Test, Split::Validation];

    /// Lowercase name, also used as a directory or file stem by readers
    pub fn as_str(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
            Split::Validation => "validation",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

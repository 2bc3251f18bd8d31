//! Payload codecs for ports and streams
//!
//! A single generic port/stream engine handles every BulkIO data type. The
//! engine only needs a small capability set from the payload, expressed by
//! two traits:
//!
//! - [`PortData`] - anything a port can queue and send: element count,
//!   empty value, range copy, element width, and whether the payload may be
//!   fragmented or carries timestamps.
//! - [`SampleData`] - payloads that a buffered stream can stitch together
//!   across packets.
//!
//! # Payload types
//!
//! | Type | Element | Chunked | Timestamped |
//! |------|---------|---------|-------------|
//! | `Vec<T>` (numeric) | one scalar | yes | yes |
//! | [`BitBuffer`] | one bit | yes | yes |
//! | [`FileUri`] | whole URI | no | yes |
//! | [`XmlDocument`] | one byte | no | no |

mod bitbuffer;

pub use bitbuffer::BitBuffer;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Capability set required of every port payload
pub trait PortData: Clone + fmt::Debug + Send + Sync + 'static {
    /// Width of one element in bits, used for transfer budgeting and statistics
    const ELEMENT_BITS: usize;

    /// Whether oversized pushes may be split into several packets
    const CHUNKED: bool = true;

    /// Whether packets of this type carry meaningful timestamps
    const TIMESTAMPED: bool = true;

    /// Number of elements
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Zero-length payload, used for end-of-stream markers and flushed packets
    fn empty() -> Self;

    /// Copy elements `[start, end)`
    fn slice(&self, start: usize, end: usize) -> Self;
}

/// Payloads that can be reassembled across packet boundaries
pub trait SampleData: PortData {
    /// Append elements `[start, end)` of `other`
    fn extend_from(&mut self, other: &Self, start: usize, end: usize);
}

/// Numeric scalar carried in a `Vec<T>` payload
pub trait Sample: Copy + Default + fmt::Debug + PartialEq + Send + Sync + 'static {
    const BITS: usize;
    const NAME: &'static str;
}

macro_rules! impl_sample {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl Sample for $ty {
                const BITS: usize = std::mem::size_of::<$ty>() * 8;
                const NAME: &'static str = $name;
            }
        )*
    };
}

impl_sample! {
    i8 => "dataChar",
    u8 => "dataOctet",
    i16 => "dataShort",
    u16 => "dataUshort",
    i32 => "dataLong",
    u32 => "dataUlong",
    i64 => "dataLongLong",
    u64 => "dataUlongLong",
    f32 => "dataFloat",
    f64 => "dataDouble",
}

impl<T: Sample> PortData for Vec<T> {
    const ELEMENT_BITS: usize = T::BITS;

    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn empty() -> Self {
        Vec::new()
    }

    fn slice(&self, start: usize, end: usize) -> Self {
        self[start..end].to_vec()
    }
}

impl<T: Sample> SampleData for Vec<T> {
    fn extend_from(&mut self, other: &Self, start: usize, end: usize) {
        self.extend_from_slice(&other[start..end]);
    }
}

impl PortData for BitBuffer {
    const ELEMENT_BITS: usize = 1;

    fn len(&self) -> usize {
        BitBuffer::len(self)
    }

    fn empty() -> Self {
        BitBuffer::new()
    }

    fn slice(&self, start: usize, end: usize) -> Self {
        BitBuffer::slice(self, start, end)
    }
}

impl SampleData for BitBuffer {
    fn extend_from(&mut self, other: &Self, start: usize, end: usize) {
        BitBuffer::extend_from(self, other, start, end);
    }
}

/// Reference to a file by URI; one URI counts as a single element
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileUri(pub String);

impl FileUri {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PortData for FileUri {
    const ELEMENT_BITS: usize = 8;
    const CHUNKED: bool = false;

    fn len(&self) -> usize {
        usize::from(!self.0.is_empty())
    }

    fn empty() -> Self {
        Self::default()
    }

    fn slice(&self, start: usize, end: usize) -> Self {
        if start == 0 && end >= 1 {
            self.clone()
        } else {
            Self::default()
        }
    }
}

/// Raw XML text; elements are bytes and packets carry no timestamp
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct XmlDocument(pub String);

impl XmlDocument {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PortData for XmlDocument {
    const ELEMENT_BITS: usize = 8;
    const CHUNKED: bool = false;
    const TIMESTAMPED: bool = false;

    fn len(&self) -> usize {
        self.0.len()
    }

    fn empty() -> Self {
        Self::default()
    }

    fn slice(&self, start: usize, end: usize) -> Self {
        Self(String::from_utf8_lossy(&self.0.as_bytes()[start..end]).into_owned())
    }
}

//! Stream metadata (SRI)
//!
//! Every stream carries a [`StreamSri`] describing how to interpret its
//! samples: the time axis (`xstart`/`xdelta`/`xunits`), an optional framing
//! axis (`subsize`/`ystart`/`ydelta`/`yunits`), real vs. complex mode, the
//! backpressure request flag and free-form keywords.
//!
//! Ports never edit an SRI in place; a new header replaces the old one
//! wholesale and [`compare_fields`] reports which fields differ.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Platinum unit code for "no units"
pub const UNITS_NONE: i16 = 0;
/// Platinum unit code for time in seconds
pub const UNITS_TIME: i16 = 1;
/// Platinum unit code for frequency in hertz
pub const UNITS_FREQUENCY: i16 = 3;

/// Typed value for an SRI keyword
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum KeywordValue {
    Bool(bool),
    Octet(u8),
    Short(i16),
    UShort(u16),
    Long(i32),
    ULong(u32),
    LongLong(i64),
    ULongLong(u64),
    Float(f32),
    Double(f64),
    String(String),
}

impl fmt::Display for KeywordValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeywordValue::Bool(v) => write!(f, "{}", v),
            KeywordValue::Octet(v) => write!(f, "{}", v),
            KeywordValue::Short(v) => write!(f, "{}", v),
            KeywordValue::UShort(v) => write!(f, "{}", v),
            KeywordValue::Long(v) => write!(f, "{}", v),
            KeywordValue::ULong(v) => write!(f, "{}", v),
            KeywordValue::LongLong(v) => write!(f, "{}", v),
            KeywordValue::ULongLong(v) => write!(f, "{}", v),
            KeywordValue::Float(v) => write!(f, "{}", v),
            KeywordValue::Double(v) => write!(f, "{}", v),
            KeywordValue::String(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for KeywordValue {
    fn from(v: bool) -> Self {
        KeywordValue::Bool(v)
    }
}

impl From<i32> for KeywordValue {
    fn from(v: i32) -> Self {
        KeywordValue::Long(v)
    }
}

impl From<i64> for KeywordValue {
    fn from(v: i64) -> Self {
        KeywordValue::LongLong(v)
    }
}

impl From<f64> for KeywordValue {
    fn from(v: f64) -> Self {
        KeywordValue::Double(v)
    }
}

impl From<&str> for KeywordValue {
    fn from(v: &str) -> Self {
        KeywordValue::String(v.to_string())
    }
}

impl From<String> for KeywordValue {
    fn from(v: String) -> Self {
        KeywordValue::String(v)
    }
}

/// A single id/value keyword pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    pub id: String,
    pub value: KeywordValue,
}

impl Keyword {
    pub fn new(id: impl Into<String>, value: impl Into<KeywordValue>) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
        }
    }
}

bitflags::bitflags! {
    /// Bit set of SRI fields that differ between two headers
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SriFields: u32 {
        const HVERSION = 1 << 0;
        const XSTART = 1 << 1;
        const XDELTA = 1 << 2;
        const XUNITS = 1 << 3;
        const SUBSIZE = 1 << 4;
        const YSTART = 1 << 5;
        const YDELTA = 1 << 6;
        const YUNITS = 1 << 7;
        const MODE = 1 << 8;
        const STREAMID = 1 << 9;
        const BLOCKING = 1 << 10;
        const KEYWORDS = 1 << 11;
    }
}

/// Signal-related information for one stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSri {
    /// Header version
    pub hversion: i32,
    /// Start of the first axis
    pub xstart: f64,
    /// Spacing between samples on the first axis (sample period)
    pub xdelta: f64,
    /// Units of the first axis
    pub xunits: i16,
    /// Frame length; 0 for one-dimensional data
    pub subsize: i32,
    /// Start of the second axis
    pub ystart: f64,
    /// Spacing on the second axis
    pub ydelta: f64,
    /// Units of the second axis
    pub yunits: i16,
    /// 0 for real samples, 1 for complex
    pub mode: i16,
    /// Stream identifier
    pub stream_id: String,
    /// Whether the receiving port should exert backpressure
    pub blocking: bool,
    /// User-defined keywords, compared in order
    #[serde(default)]
    pub keywords: Vec<Keyword>,
}

impl Default for StreamSri {
    fn default() -> Self {
        create("defStream")
    }
}

impl StreamSri {
    /// Default SRI for `stream_id` (see [`create`])
    pub fn new(stream_id: impl Into<String>) -> Self {
        create(stream_id)
    }

    #[inline]
    pub fn is_complex(&self) -> bool {
        self.mode != 0
    }

    /// Scalars per sample: 2 for complex streams, 1 otherwise
    #[inline]
    pub fn item_size(&self) -> usize {
        if self.is_complex() {
            2
        } else {
            1
        }
    }

    /// Look up a keyword value by id
    pub fn keyword(&self, id: &str) -> Option<&KeywordValue> {
        self.keywords.iter().find(|kw| kw.id == id).map(|kw| &kw.value)
    }

    pub fn has_keyword(&self, id: &str) -> bool {
        self.keyword(id).is_some()
    }

    /// Insert or overwrite a keyword, keeping the original position on overwrite
    pub fn set_keyword(&mut self, id: impl Into<String>, value: impl Into<KeywordValue>) {
        let id = id.into();
        let value = value.into();
        match self.keywords.iter_mut().find(|kw| kw.id == id) {
            Some(kw) => kw.value = value,
            None => self.keywords.push(Keyword { id, value }),
        }
    }

    /// Remove a keyword; returns whether it was present
    pub fn erase_keyword(&mut self, id: &str) -> bool {
        let before = self.keywords.len();
        self.keywords.retain(|kw| kw.id != id);
        self.keywords.len() != before
    }
}

/// Create an SRI with default axis values
///
/// The time axis is in seconds with `xdelta = 1.0`, there is no framing, and
/// the stream is real-valued and non-blocking.
pub fn create(stream_id: impl Into<String>) -> StreamSri {
    create_with_rate(stream_id, 1.0, UNITS_TIME, false)
}

/// Create an SRI for a given sample rate and units
pub fn create_with_rate(
    stream_id: impl Into<String>,
    sample_rate: f64,
    xunits: i16,
    blocking: bool,
) -> StreamSri {
    StreamSri {
        hversion: 1,
        xstart: 0.0,
        xdelta: if sample_rate > 0.0 { 1.0 / sample_rate } else { 1.0 },
        xunits,
        subsize: 0,
        ystart: 0.0,
        ydelta: 0.0,
        yunits: UNITS_NONE,
        mode: 0,
        stream_id: stream_id.into(),
        blocking,
        keywords: Vec::new(),
    }
}

fn keywords_equal(lhs: &[Keyword], rhs: &[Keyword]) -> bool {
    lhs.len() == rhs.len()
        && lhs
            .iter()
            .zip(rhs)
            .all(|(a, b)| a.id == b.id && a.value == b.value)
}

/// Field-by-field comparison of two SRIs
pub fn compare_fields(lhs: &StreamSri, rhs: &StreamSri) -> SriFields {
    let mut flags = SriFields::empty();
    flags.set(SriFields::HVERSION, lhs.hversion != rhs.hversion);
    flags.set(SriFields::XSTART, lhs.xstart != rhs.xstart);
    flags.set(SriFields::XDELTA, lhs.xdelta != rhs.xdelta);
    flags.set(SriFields::XUNITS, lhs.xunits != rhs.xunits);
    flags.set(SriFields::SUBSIZE, lhs.subsize != rhs.subsize);
    flags.set(SriFields::YSTART, lhs.ystart != rhs.ystart);
    flags.set(SriFields::YDELTA, lhs.ydelta != rhs.ydelta);
    flags.set(SriFields::YUNITS, lhs.yunits != rhs.yunits);
    flags.set(SriFields::MODE, lhs.mode != rhs.mode);
    flags.set(SriFields::STREAMID, lhs.stream_id != rhs.stream_id);
    flags.set(SriFields::BLOCKING, lhs.blocking != rhs.blocking);
    flags.set(
        SriFields::KEYWORDS,
        !keywords_equal(&lhs.keywords, &rhs.keywords),
    );
    flags
}

/// Default SRI comparator: true when every field and keyword matches
pub fn default_comparator(lhs: &StreamSri, rhs: &StreamSri) -> bool {
    compare_fields(lhs, rhs).is_empty()
}

/// Signature for pluggable SRI comparison
pub type SriComparator = fn(&StreamSri, &StreamSri) -> bool;

//! Test data builders for creating test objects

use bulkio_rs::sri::{self, StreamSri};
use bulkio_rs::PrecisionTime;

/// Builder for creating test SRIs
pub struct SriBuilder {
    sri: StreamSri,
}

impl SriBuilder {
    pub fn new(stream_id: &str) -> Self {
        Self {
            sri: sri::create(stream_id),
        }
    }

    pub fn xdelta(mut self, xdelta: f64) -> Self {
        self.sri.xdelta = xdelta;
        self
    }

    pub fn complex(mut self) -> Self {
        self.sri.mode = 1;
        self
    }

    pub fn blocking(mut self) -> Self {
        self.sri.blocking = true;
        self
    }

    pub fn subsize(mut self, subsize: i32) -> Self {
        self.sri.subsize = subsize;
        self
    }

    pub fn keyword(mut self, id: &str, value: f64) -> Self {
        self.sri.set_keyword(id, value);
        self
    }

    pub fn build(self) -> StreamSri {
        self.sri
    }
}

/// A fixed, valid time so expected timestamps are easy to compute
pub fn epoch_time(seconds: f64) -> PrecisionTime {
    PrecisionTime::from_secs_f64(1_700_000_000.0 + seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sri_builder() {
        let sri = SriBuilder::new("test")
            .xdelta(0.5)
            .complex()
            .blocking()
            .keyword("COL_RF", 1.5e9)
            .build();

        assert_eq!(sri.stream_id, "test");
        assert_eq!(sri.xdelta, 0.5);
        assert!(sri.is_complex());
        assert!(sri.blocking);
        assert!(sri.has_keyword("COL_RF"));
    }
}

//! Blocks of data returned by input stream reads
//!
//! A [`DataBlock`] bundles the samples from a read with the SRI in effect,
//! one or more [`SampleTimestamp`]s, and the SRI-change / queue-flush flags
//! of the packet the read started in. Reads return a [`ReadResult`] so that
//! "nothing yet" and "stream ended" are distinct values.

use crate::data::{PortData, Sample};
use crate::error::{BulkioError, Result};
use crate::sri::{SriFields, StreamSri};
use crate::time::PrecisionTime;
use std::sync::Arc;

/// A timestamp pinned to a sample offset within a block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleTimestamp {
    pub time: PrecisionTime,
    /// Sample offset (complex samples for complex data)
    pub offset: usize,
    /// True if the time was interpolated rather than received
    pub synthetic: bool,
}

impl SampleTimestamp {
    pub fn new(time: PrecisionTime, offset: usize, synthetic: bool) -> Self {
        Self {
            time,
            offset,
            synthetic,
        }
    }
}

/// Data read from an input stream
#[derive(Debug, Clone)]
pub struct DataBlock<D: PortData> {
    sri: Arc<StreamSri>,
    data: D,
    timestamps: Vec<SampleTimestamp>,
    sri_change_flags: SriFields,
    input_queue_flushed: bool,
}

fn drift(begin: &SampleTimestamp, end: &SampleTimestamp, xdelta: f64) -> f64 {
    let real = end.time - begin.time;
    let expected = (end.offset as f64 - begin.offset as f64) * xdelta;
    real - expected
}

impl<D: PortData> DataBlock<D> {
    pub fn new(sri: Arc<StreamSri>, data: D) -> Self {
        Self {
            sri,
            data,
            timestamps: Vec::new(),
            sri_change_flags: SriFields::empty(),
            input_queue_flushed: false,
        }
    }

    pub(crate) fn with_flags(mut self, sri_change_flags: SriFields, flushed: bool) -> Self {
        self.sri_change_flags = sri_change_flags;
        self.input_queue_flushed = flushed;
        self
    }

    pub fn sri(&self) -> &StreamSri {
        &self.sri
    }

    pub fn xdelta(&self) -> f64 {
        self.sri.xdelta
    }

    pub fn data(&self) -> &D {
        &self.data
    }

    pub fn into_data(self) -> D {
        self.data
    }

    /// Number of elements (real scalars, bits, or bytes)
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn complex(&self) -> bool {
        self.sri.is_complex()
    }

    /// Number of complex samples (half the scalar count)
    pub fn cxsize(&self) -> usize {
        self.size() / 2
    }

    /// Insert a timestamp, keeping timestamps ordered by offset
    pub fn add_timestamp(&mut self, timestamp: SampleTimestamp) {
        let pos = self
            .timestamps
            .iter()
            .position(|ts| timestamp.offset < ts.offset)
            .unwrap_or(self.timestamps.len());
        self.timestamps.insert(pos, timestamp);
    }

    pub fn timestamps(&self) -> &[SampleTimestamp] {
        &self.timestamps
    }

    fn validate_timestamps(&self) -> Result<()> {
        match self.timestamps.first() {
            None => Err(BulkioError::usage("block contains no timestamps")),
            Some(ts) if ts.offset != 0 => Err(BulkioError::usage("no timestamp at offset 0")),
            Some(_) => Ok(()),
        }
    }

    /// Time of the first sample
    pub fn start_time(&self) -> Result<PrecisionTime> {
        self.validate_timestamps()?;
        Ok(self.timestamps[0].time)
    }

    /// Difference between the last timestamp and the time implied by the
    /// first timestamp plus `offset * xdelta`
    pub fn net_time_drift(&self) -> Result<f64> {
        self.validate_timestamps()?;
        let first = &self.timestamps[0];
        let last = &self.timestamps[self.timestamps.len() - 1];
        Ok(drift(first, last, self.xdelta()))
    }

    /// Largest drift between any two consecutive timestamps
    pub fn max_time_drift(&self) -> Result<f64> {
        self.validate_timestamps()?;
        let xdelta = self.xdelta();
        Ok(self
            .timestamps
            .windows(2)
            .map(|pair| drift(&pair[0], &pair[1], xdelta))
            .fold(0.0, |max, d| if d.abs() > f64::abs(max) { d } else { max }))
    }

    pub fn sri_changed(&self) -> bool {
        !self.sri_change_flags.is_empty()
    }

    pub fn sri_change_flags(&self) -> SriFields {
        self.sri_change_flags
    }

    pub fn input_queue_flushed(&self) -> bool {
        self.input_queue_flushed
    }
}

impl<T: Sample> DataBlock<Vec<T>> {
    pub fn samples(&self) -> &[T] {
        &self.data
    }

    /// Interleaved (re, im) pairs; an odd trailing scalar is ignored
    pub fn complex_samples(&self) -> impl Iterator<Item = (T, T)> + '_ {
        self.data.chunks_exact(2).map(|pair| (pair[0], pair[1]))
    }
}

/// Outcome of a stream read
#[derive(Debug, Clone)]
pub enum ReadResult<D: PortData> {
    /// A block of data
    Data(DataBlock<D>),
    /// No data right now; more may arrive later
    Empty,
    /// The stream has ended and no more data will arrive
    EndOfStream,
}

impl<D: PortData> ReadResult<D> {
    pub fn is_data(&self) -> bool {
        matches!(self, ReadResult::Data(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ReadResult::Empty)
    }

    pub fn is_eos(&self) -> bool {
        matches!(self, ReadResult::EndOfStream)
    }

    pub fn block(&self) -> Option<&DataBlock<D>> {
        match self {
            ReadResult::Data(block) => Some(block),
            _ => None,
        }
    }

    pub fn into_block(self) -> Option<DataBlock<D>> {
        match self {
            ReadResult::Data(block) => Some(block),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sri;

    fn block(xdelta: f64) -> DataBlock<Vec<f32>> {
        let mut sri = sri::create("blk");
        sri.xdelta = xdelta;
        DataBlock::new(Arc::new(sri), vec![0.0; 100])
    }

    #[test]
    fn test_timestamps_stay_ordered() {
        let mut blk = block(1.0);
        let t = PrecisionTime::new(0.0, 0.0);
        blk.add_timestamp(SampleTimestamp::new(t + 50.0, 50, false));
        blk.add_timestamp(SampleTimestamp::new(t, 0, false));
        blk.add_timestamp(SampleTimestamp::new(t + 20.0, 20, true));
        let offsets: Vec<usize> = blk.timestamps().iter().map(|ts| ts.offset).collect();
        assert_eq!(offsets, vec![0, 20, 50]);
    }

    #[test]
    fn test_start_time_requires_offset_zero() {
        let mut blk = block(1.0);
        assert!(blk.start_time().unwrap_err().is_usage());
        blk.add_timestamp(SampleTimestamp::new(PrecisionTime::new(5.0, 0.0), 10, false));
        assert!(blk.start_time().is_err());
        blk.add_timestamp(SampleTimestamp::new(PrecisionTime::new(4.0, 0.0), 0, false));
        assert_eq!(blk.start_time().unwrap().twsec, 4.0);
    }

    #[test]
    fn test_time_drift() {
        let mut blk = block(0.5);
        let t0 = PrecisionTime::new(10.0, 0.0);
        blk.add_timestamp(SampleTimestamp::new(t0, 0, false));
        // 10 samples at 0.5s = 5s expected; observed 5.25s
        blk.add_timestamp(SampleTimestamp::new(t0 + 5.25, 10, false));
        // 10 more samples, observed exactly 5s later
        blk.add_timestamp(SampleTimestamp::new(t0 + 10.25, 20, false));
        assert!((blk.net_time_drift().unwrap() - 0.25).abs() < 1e-9);
        assert!((blk.max_time_drift().unwrap() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_complex_samples() {
        let mut sri = sri::create("cx");
        sri.mode = 1;
        let blk = DataBlock::new(Arc::new(sri), vec![1i16, 2, 3, 4]);
        assert!(blk.complex());
        assert_eq!(blk.cxsize(), 2);
        let pairs: Vec<(i16, i16)> = blk.complex_samples().collect();
        assert_eq!(pairs, vec![(1, 2), (3, 4)]);
    }

    #[test]
    fn test_read_result_accessors() {
        let r: ReadResult<Vec<f32>> = ReadResult::Data(block(1.0));
        assert!(r.is_data());
        assert!(r.block().is_some());
        let e: ReadResult<Vec<f32>> = ReadResult::EndOfStream;
        assert!(e.is_eos());
        assert!(e.into_block().is_none());
    }
}

//! Splitting oversized pushes into transport-sized fragments
//!
//! Transports have a hard payload limit. A push larger than the usable part
//! of that limit is sent as several consecutive packets, each one a whole
//! number of frames (complex pairs times `subsize`), with timestamps
//! advanced by the samples already sent. Only the last fragment carries the
//! caller's end-of-stream flag.

use crate::data::PortData;
use crate::sri::StreamSri;
use crate::time::{PrecisionTime, TCS_VALID};

/// Maximum elements of `element_bits` bits that fit in `payload_bytes`
pub fn max_elements_per_push(payload_bytes: usize, element_bits: usize) -> usize {
    payload_bytes.saturating_mul(8) / element_bits.max(1)
}

/// Elements per fragment for `sri`, rounded down to whole frames but never
/// below one frame
pub fn max_push_size(max_elements: usize, sri: &StreamSri) -> usize {
    let item_size = sri.item_size();
    let frame_size = if sri.subsize > 0 {
        item_size * sri.subsize as usize
    } else {
        item_size
    };
    ((max_elements / frame_size) * frame_size).max(frame_size)
}

/// One packet produced by the chunker
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment<D: PortData> {
    pub data: D,
    pub time: PrecisionTime,
    pub eos: bool,
}

/// Iterator over the fragments of one push; always yields at least one
#[derive(Debug)]
pub struct Fragments<'a, D: PortData> {
    data: &'a D,
    time: PrecisionTime,
    eos: bool,
    xdelta: f64,
    item_size: usize,
    max_push: usize,
    offset: usize,
    done: bool,
}

impl<'a, D: PortData> Fragments<'a, D> {
    pub fn new(data: &'a D, time: PrecisionTime, eos: bool, sri: &StreamSri, payload_bytes: usize) -> Self {
        let max_push = if D::CHUNKED {
            max_push_size(max_elements_per_push(payload_bytes, D::ELEMENT_BITS), sri)
        } else {
            usize::MAX
        };
        Self {
            data,
            time,
            eos,
            xdelta: sri.xdelta,
            item_size: sri.item_size(),
            max_push,
            offset: 0,
            done: false,
        }
    }

    pub fn max_push(&self) -> usize {
        self.max_push
    }
}

impl<D: PortData> Iterator for Fragments<'_, D> {
    type Item = Fragment<D>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let len = self.data.len();
        let push = (len - self.offset).min(self.max_push);
        let last = self.offset + push >= len;

        let data = if self.offset == 0 && last {
            self.data.clone()
        } else {
            self.data.slice(self.offset, self.offset + push)
        };
        let fragment = Fragment {
            data,
            time: self.time,
            eos: last && self.eos,
        };

        if self.time.tcstatus == TCS_VALID {
            self.time += (push / self.item_size) as f64 * self.xdelta;
        }
        self.offset += push;
        self.done = last;
        Some(fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{BitBuffer, XmlDocument};
    use crate::sri;
    use proptest::prelude::*;

    const DEFAULT_PAYLOAD: usize = 1_887_436;

    #[test]
    fn test_million_floats_three_packets() {
        let data = vec![0.5f32; 1_000_000];
        let sri = sri::create("big");
        let t0 = PrecisionTime::new(100.0, 0.0);
        let fragments: Vec<_> = Fragments::new(&data, t0, true, &sri, DEFAULT_PAYLOAD).collect();

        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0].data.len(), 471_859);
        assert_eq!(fragments[1].data.len(), 471_859);
        assert_eq!(fragments[2].data.len(), 1_000_000 - 2 * 471_859);
        assert_eq!(fragments.iter().filter(|f| f.eos).count(), 1);
        assert!(fragments[2].eos);
        assert!((fragments[1].time - t0 - 471_859.0).abs() < 1e-6);
    }

    #[test]
    fn test_complex_frames_stay_whole() {
        let mut sri = sri::create("frames");
        sri.mode = 1;
        sri.subsize = 3;
        // 6 elements per frame; 40 bytes of i16 = 20 elements -> 18
        assert_eq!(max_push_size(max_elements_per_push(40, 16), &sri), 18);
        // Limit smaller than one frame still sends one frame
        assert_eq!(max_push_size(max_elements_per_push(4, 16), &sri), 6);
    }

    #[test]
    fn test_complex_time_advance() {
        let mut sri = sri::create("cx");
        sri.mode = 1;
        sri.xdelta = 0.5;
        let data = vec![0i16; 12];
        let t0 = PrecisionTime::new(0.0, 0.0);
        let fragments: Vec<_> = Fragments::new(&data, t0, false, &sri, 8).collect();
        // 4 elements (2 complex samples) per fragment, 1s each
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[2].time, PrecisionTime::new(2.0, 0.0));
    }

    #[test]
    fn test_invalid_time_not_advanced() {
        let sri = sri::create("t");
        let data = vec![0u8; 10];
        let fragments: Vec<_> = Fragments::new(&data, PrecisionTime::not_set(), false, &sri, 4).collect();
        assert_eq!(fragments.len(), 3);
        assert!(fragments.iter().all(|f| f.time == PrecisionTime::not_set()));
    }

    #[test]
    fn test_empty_push_yields_one_fragment() {
        let sri = sri::create("e");
        let data: Vec<f64> = Vec::new();
        let fragments: Vec<_> = Fragments::new(&data, PrecisionTime::not_set(), true, &sri, 64).collect();
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].eos);
        assert!(fragments[0].data.is_empty());
    }

    #[test]
    fn test_bits_counted_per_bit() {
        let sri = sri::create("bits");
        let data = BitBuffer::zeroed(100);
        let fragments: Vec<_> = Fragments::new(&data, PrecisionTime::not_set(), false, &sri, 4).collect();
        assert_eq!(fragments.len(), 4);
        assert_eq!(fragments[0].data.len(), 32);
        assert_eq!(fragments[3].data.len(), 4);
    }

    #[test]
    fn test_xml_never_chunked() {
        let sri = sri::create("xml");
        let doc = XmlDocument::new("<a>".repeat(100));
        let fragments: Vec<_> = Fragments::new(&doc, PrecisionTime::not_set(), false, &sri, 8).collect();
        assert_eq!(fragments.len(), 1);
    }

    proptest! {
        #[test]
        fn prop_fragments_reassemble(
            len in 0usize..2000,
            payload in 1usize..512,
            complex in any::<bool>(),
            subsize in 0i32..5,
        ) {
            let mut sri = sri::create("p");
            sri.mode = i16::from(complex);
            sri.subsize = subsize;
            let data: Vec<i32> = (0..len as i32).collect();
            let fragments = Fragments::new(&data, PrecisionTime::new(1.0, 0.0), true, &sri, payload);
            let max_push = fragments.max_push();
            let fragments: Vec<_> = fragments.collect();

            let joined: Vec<i32> = fragments.iter().flat_map(|f| f.data.iter().copied()).collect();
            prop_assert_eq!(joined, data);
            prop_assert!(fragments.iter().all(|f| f.data.len() <= max_push));
            prop_assert_eq!(fragments.iter().filter(|f| f.eos).count(), 1);
            prop_assert!(fragments.last().map(|f| f.eos).unwrap_or(false));
        }
    }
}

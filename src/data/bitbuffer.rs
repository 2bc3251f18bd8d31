//! Packed bit sequences
//!
//! Bits are stored MSB-first in a byte vector alongside an explicit bit
//! count, so a buffer can end part-way through its last byte. Reads that
//! span packets join buffers at arbitrary bit offsets; byte-level views are
//! only offered on byte boundaries.

use crate::error::{BulkioError, Result};
use std::fmt;

#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct BitBuffer {
    data: Vec<u8>,
    bits: usize,
}

#[inline]
fn bytes_for(bits: usize) -> usize {
    bits.div_ceil(8)
}

impl BitBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer of `bits` zero bits
    pub fn zeroed(bits: usize) -> Self {
        Self {
            data: vec![0; bytes_for(bits)],
            bits,
        }
    }

    /// Wrap packed bytes holding `bits` bits
    pub fn from_bytes(data: Vec<u8>, bits: usize) -> Result<Self> {
        if bits > data.len() * 8 {
            return Err(BulkioError::Usage(format!(
                "{} bits do not fit in {} bytes",
                bits,
                data.len()
            )));
        }
        let mut buffer = Self { data, bits };
        buffer.data.truncate(bytes_for(bits));
        buffer.clear_tail();
        Ok(buffer)
    }

    /// Parse a string of '0'/'1' characters (other characters are rejected)
    pub fn parse(text: &str) -> Result<Self> {
        text.chars()
            .map(|c| match c {
                '0' => Ok(false),
                '1' => Ok(true),
                other => Err(BulkioError::Usage(format!(
                    "invalid bit character '{}'",
                    other
                ))),
            })
            .collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bits
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Packed backing bytes; bits past `len()` in the last byte are zero
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn get(&self, index: usize) -> Option<bool> {
        if index >= self.bits {
            return None;
        }
        Some(self.data[index / 8] & (0x80 >> (index % 8)) != 0)
    }

    pub fn set(&mut self, index: usize, value: bool) -> Result<()> {
        if index >= self.bits {
            return Err(BulkioError::Usage(format!(
                "bit index {} out of range for {} bits",
                index, self.bits
            )));
        }
        let mask = 0x80u8 >> (index % 8);
        if value {
            self.data[index / 8] |= mask;
        } else {
            self.data[index / 8] &= !mask;
        }
        Ok(())
    }

    pub fn push(&mut self, value: bool) {
        if self.bits % 8 == 0 {
            self.data.push(0);
        }
        if value {
            self.data[self.bits / 8] |= 0x80 >> (self.bits % 8);
        }
        self.bits += 1;
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.bits).map(move |i| self.data[i / 8] & (0x80 >> (i % 8)) != 0)
    }

    /// Number of set bits
    pub fn popcount(&self) -> usize {
        self.data.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Copy bits `[start, end)` into a new buffer; any bit offset is allowed
    ///
    /// # Panics
    ///
    /// Panics if `start > end` or `end > len()`.
    pub fn slice(&self, start: usize, end: usize) -> Self {
        assert!(
            start <= end && end <= self.bits,
            "bit range {}..{} out of bounds for {} bits",
            start,
            end,
            self.bits
        );
        let mut out = Self::new();
        out.extend_from(self, start, end);
        out
    }

    /// Byte-addressed view of bits `[start, end)`
    ///
    /// Both ends must fall on byte boundaries (multiples of 8) unless `end`
    /// is the end of the buffer.
    pub fn byte_slice(&self, start: usize, end: usize) -> Result<Self> {
        if start > end || end > self.bits {
            return Err(BulkioError::Usage(format!(
                "bit range {}..{} out of bounds for {} bits",
                start, end, self.bits
            )));
        }
        if start % 8 != 0 || (end % 8 != 0 && end != self.bits) {
            return Err(BulkioError::Usage(format!(
                "bit range {}..{} is not byte-aligned",
                start, end
            )));
        }
        let bytes = self.data[start / 8..bytes_for(end)].to_vec();
        Self::from_bytes(bytes, end - start)
    }

    /// Append bits `[start, end)` of `other`
    pub fn extend_from(&mut self, other: &BitBuffer, start: usize, end: usize) {
        let end = end.min(other.bits);
        if start >= end {
            return;
        }
        if self.bits % 8 == 0 && start % 8 == 0 {
            // Both sides byte-aligned: copy whole bytes, then trim
            let count = end - start;
            self.data
                .extend_from_slice(&other.data[start / 8..bytes_for(end)]);
            self.bits += count;
            self.data.truncate(bytes_for(self.bits));
            self.clear_tail();
            return;
        }
        self.data.reserve(bytes_for(end - start) + 1);
        for i in start..end {
            self.push(other.data[i / 8] & (0x80 >> (i % 8)) != 0);
        }
    }

    fn clear_tail(&mut self) {
        let used = self.bits % 8;
        if used != 0 {
            if let Some(last) = self.data.last_mut() {
                *last &= 0xFFu8 << (8 - used);
            }
        }
    }
}

impl FromIterator<bool> for BitBuffer {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        let mut buffer = BitBuffer::new();
        for bit in iter {
            buffer.push(bit);
        }
        buffer
    }
}

impl fmt::Debug for BitBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitBuffer({} bits: {})", self.bits, self)
    }
}

impl fmt::Display for BitBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for bit in self.iter() {
            f.write_str(if bit { "1" } else { "0" })?;
        }
        Ok(())
    }
}

//! Per-field byte-dictionary LRU coder.
//!
//! Each `bytes` field keeps a bounded LRU list of blobs it has already
//! written. Entries do not own copies of the blobs: they record the byte
//! offset and length of the blob *inside the output stream*, which is why
//! new blobs are padded to a byte boundary before being written. A repeat
//! of the most recent blob costs one bit; a repeat of any dictionary blob
//! costs a small fixed-width index; only genuinely new blobs are written
//! in full.

use crate::codec::stream::BitWriter;
use crate::codec::{OP_BYTES_LRU_INDEX, OP_BYTES_NEW_BLOB, OP_CHANGE, OP_NO_CHANGE};
use crate::error::{CodecError, Result};
use ahash::AHasher;
use std::hash::Hasher;
use tracing::error;

/// One dictionary entry: a hash of the blob plus its location in the
/// stream.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DictEntry {
    pub(crate) hash: u64,
    pub(crate) start: usize,
    pub(crate) length: usize,
}

/// Bounded LRU of previously-written blobs for one `bytes` field. The most
/// recently used entry is at the tail.
#[derive(Debug)]
pub(crate) struct ByteDictionary {
    entries: Vec<DictEntry>,
    capacity: usize,
}

impl ByteDictionary {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            // The LRU size option is a positive integer; a zero-capacity
            // dictionary cannot hold the entry it just wrote.
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn entries(&self) -> &[DictEntry] {
        &self.entries
    }

    /// Returns the bytes an entry refers to, or a hard error if the entry
    /// points outside the stream.
    pub(crate) fn entry_bytes<'a>(
        &self,
        entry: &DictEntry,
        stream_bytes: &'a [u8],
    ) -> Result<&'a [u8]> {
        let end = entry.start.checked_add(entry.length);
        match end.and_then(|end| stream_bytes.get(entry.start..end)) {
            Some(bytes) => Ok(bytes),
            None => {
                error!(
                    stream_len = stream_bytes.len(),
                    start = entry.start,
                    length = entry.length,
                    "byte dictionary entry points outside stream bounds"
                );
                Err(CodecError::DictInconsistency {
                    stream_len: stream_bytes.len(),
                    start: entry.start,
                    length: entry.length,
                })
            }
        }
    }

    /// Moves the entry at `idx` to the most-recently-used position by
    /// rotating it and everything after it left by one. Entries before
    /// `idx` keep their indices.
    pub(crate) fn move_to_end(&mut self, idx: usize) {
        self.entries[idx..].rotate_left(1);
    }

    /// Appends an entry, evicting the least-recently-used entry by
    /// shifting the whole list down when full.
    pub(crate) fn push(&mut self, entry: DictEntry) {
        if self.entries.len() < self.capacity {
            self.entries.push(entry);
            return;
        }
        self.entries.rotate_left(1);
        *self.entries.last_mut().expect("dictionary capacity is positive") = entry;
    }
}

/// Returns the number of bits needed for an LRU index: `ceil(log2(size))`,
/// zero when the dictionary holds at most one entry.
pub(crate) fn num_index_bits(lru_size: usize) -> u32 {
    if lru_size <= 1 {
        return 0;
    }
    usize::BITS - (lru_size - 1).leading_zeros()
}

/// Hashes a blob for dictionary lookup. Collisions are tolerated: every
/// hash hit is confirmed with a byte comparison against the stream.
pub(crate) fn hash_bytes(blob: &[u8]) -> u64 {
    let mut hasher = AHasher::default();
    hasher.write(blob);
    hasher.finish()
}

/// Encodes one blob for one `bytes` field.
///
/// Emission paths, in order of preference: a single no-change bit when the
/// blob equals the most recent entry; a change bit plus a fixed-width LRU
/// back-reference when the blob is anywhere in the dictionary; a change
/// bit plus a length-prefixed, byte-aligned copy of the blob otherwise.
pub(crate) fn encode_bytes_value(
    w: &mut BitWriter,
    dict: &mut ByteDictionary,
    num_index_bits: u32,
    blob: &[u8],
) -> Result<()> {
    let hash = hash_bytes(blob);

    // Fast path: unchanged from the last write of this field.
    if let Some(last) = dict.entries().last() {
        if last.hash == hash && dict.entry_bytes(last, w.as_raw_slice())? == blob {
            w.write_bit(OP_NO_CHANGE);
            return Ok(());
        }
    }

    w.write_bit(OP_CHANGE);

    // Hash matches still need a byte comparison against the stream, since
    // distinct blobs may collide.
    let mut hit = None;
    for (idx, entry) in dict.entries().iter().enumerate() {
        if entry.hash != hash {
            continue;
        }
        if dict.entry_bytes(entry, w.as_raw_slice())? == blob {
            hit = Some(idx);
            break;
        }
    }

    if let Some(idx) = hit {
        w.write_bit(OP_BYTES_LRU_INDEX);
        w.write_bits(idx as u64, num_index_bits);
        dict.move_to_end(idx);
        return Ok(());
    }

    w.write_bit(OP_BYTES_NEW_BLOB);
    w.write_varint(blob.len() as u64);

    // Align so the recorded start offset refers to whole stream bytes;
    // this is what keeps later equality checks a plain slice compare.
    w.pad_to_next_byte();
    let start = w.byte_len();
    w.write_bytes(blob);

    dict.push(DictEntry {
        hash,
        start,
        length: blob.len(),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(w: &mut BitWriter, dict: &mut ByteDictionary, bits: u32, blob: &[u8]) {
        encode_bytes_value(w, dict, bits, blob).unwrap();
    }

    #[test]
    fn test_num_index_bits() {
        assert_eq!(num_index_bits(1), 0);
        assert_eq!(num_index_bits(2), 1);
        assert_eq!(num_index_bits(3), 2);
        assert_eq!(num_index_bits(4), 2);
        assert_eq!(num_index_bits(5), 3);
        assert_eq!(num_index_bits(8), 3);
        assert_eq!(num_index_bits(9), 4);
    }

    #[test]
    fn test_repeat_of_last_blob_is_one_bit() {
        let mut w = BitWriter::new();
        let mut dict = ByteDictionary::new(4);
        encode(&mut w, &mut dict, 2, b"hello");
        let before = w.len_bits();
        encode(&mut w, &mut dict, 2, b"hello");
        assert_eq!(w.len_bits(), before + 1);
        assert_eq!(dict.entries().len(), 1);
    }

    #[test]
    fn test_back_reference_moves_entry_to_tail() {
        let mut w = BitWriter::new();
        let mut dict = ByteDictionary::new(4);
        encode(&mut w, &mut dict, 2, b"aaa");
        encode(&mut w, &mut dict, 2, b"bbb");
        encode(&mut w, &mut dict, 2, b"ccc");

        let a_start = dict.entries()[0].start;
        let before = w.len_bits();
        encode(&mut w, &mut dict, 2, b"aaa");
        // change bit + lru-index bit + 2 index bits, no new blob bytes.
        assert_eq!(w.len_bits(), before + 4);

        // "aaa" moved to the tail, "bbb" and "ccc" shifted down.
        assert_eq!(dict.entries()[2].start, a_start);
        assert_eq!(dict.entries().len(), 3);
    }

    #[test]
    fn test_eviction_shifts_head_out() {
        let mut w = BitWriter::new();
        let mut dict = ByteDictionary::new(2);
        encode(&mut w, &mut dict, 1, b"one");
        encode(&mut w, &mut dict, 1, b"two");
        let two_start = dict.entries()[1].start;
        encode(&mut w, &mut dict, 1, b"three");

        assert_eq!(dict.entries().len(), 2);
        assert_eq!(dict.entries()[0].start, two_start);
    }

    #[test]
    fn test_evicted_blob_is_rewritten_in_full() {
        let mut w = BitWriter::new();
        let mut dict = ByteDictionary::new(2);
        encode(&mut w, &mut dict, 1, b"one");
        encode(&mut w, &mut dict, 1, b"two");
        encode(&mut w, &mut dict, 1, b"three"); // evicts "one"

        let entries_before = dict.entries().len();
        let start_before = w.byte_len();
        encode(&mut w, &mut dict, 1, b"one");

        // "one" was gone, so it must occupy new stream bytes.
        assert_eq!(dict.entries().len(), entries_before);
        let newest = dict.entries().last().unwrap();
        assert!(newest.start >= start_before);
    }

    #[test]
    fn test_new_blob_start_is_byte_aligned() {
        let mut w = BitWriter::new();
        // Knock the stream off alignment first.
        w.write_bits(0b101, 3);
        let mut dict = ByteDictionary::new(4);
        encode(&mut w, &mut dict, 2, b"payload");

        let entry = dict.entries()[0];
        assert_eq!(
            &w.as_raw_slice()[entry.start..entry.start + entry.length],
            b"payload"
        );
    }

    #[test]
    fn test_empty_blob() {
        let mut w = BitWriter::new();
        let mut dict = ByteDictionary::new(4);
        encode(&mut w, &mut dict, 2, b"");
        let before = w.len_bits();
        encode(&mut w, &mut dict, 2, b"");
        assert_eq!(w.len_bits(), before + 1);
    }

    #[test]
    fn test_entry_out_of_bounds_is_hard_error() {
        let w = BitWriter::new();
        let dict = ByteDictionary::new(4);
        let bogus = DictEntry {
            hash: 0,
            start: 100,
            length: 10,
        };
        assert!(matches!(
            dict.entry_bytes(&bogus, w.as_raw_slice()),
            Err(CodecError::DictInconsistency { .. })
        ));
    }
}

//! On-disk layout of a single database file.
//!
//! ```text
//! offset 0     magic  b"VECLITE1"
//! offset 8     header body (bincode, fixed-width little-endian integers)
//! offset 64    slot region: record_count fixed-stride slots, each a
//!              SlotHeader followed by `dimensions` little-endian f32s
//! meta_offset  metadata region: concatenated raw JSON byte strings,
//!              addressed by the per-slot (offset, length) entries
//! ```
//!
//! The slot region is always contiguous from offset 64; the metadata
//! region floats at or past its end. Bytes between the two regions and
//! past `meta_offset + meta_len` are garbage left by interrupted appends
//! and are ignored by every validated read.

use serde::{Deserialize, Serialize};

use veclite_core::{Error, RecordId, Result};

pub const MAGIC: [u8; 8] = *b"VECLITE1";
pub const FORMAT_VERSION: u32 = 1;

/// Bytes reserved for magic plus header body; the slot region starts here.
pub const HEADER_LEN: u64 = 64;

/// Encoded size of one [`SlotHeader`].
pub const SLOT_HEADER_LEN: usize = 20;

const TOMBSTONE_FLAG: u32 = 1;

/// Fixed-size file header. Mutated only through whole-header commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub version: u32,
    pub dimensions: u32,
    /// Physical slot count, tombstoned slots included.
    pub record_count: u64,
    pub tombstone_count: u64,
    /// Next id to assign; ids are never reused.
    pub next_id: RecordId,
    /// Absolute file offset of the metadata region.
    pub meta_offset: u64,
    /// Metadata region length in bytes.
    pub meta_len: u64,
}

impl Header {
    #[must_use]
    pub fn new(dimensions: u32) -> Self {
        Self {
            version: FORMAT_VERSION,
            dimensions,
            record_count: 0,
            tombstone_count: 0,
            next_id: 1,
            meta_offset: HEADER_LEN,
            meta_len: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn live_count(&self) -> u64 {
        self.record_count - self.tombstone_count
    }

    #[inline]
    #[must_use]
    pub fn slot_stride(&self) -> u64 {
        slot_stride(self.dimensions)
    }

    /// First byte past the slot region.
    #[inline]
    #[must_use]
    pub fn slots_end(&self) -> u64 {
        HEADER_LEN + self.record_count * self.slot_stride()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(HEADER_LEN as usize);
        buf.extend_from_slice(&MAGIC);
        bincode::serialize_into(&mut buf, self)
            .map_err(|e| Error::Corrupt(format!("header encode: {e}")))?;
        debug_assert!(buf.len() <= HEADER_LEN as usize);
        buf.resize(HEADER_LEN as usize, 0);
        Ok(buf)
    }

    /// Decode and validate a header against the file's physical size.
    pub fn decode(buf: &[u8], file_len: u64) -> Result<Self> {
        if buf.len() < HEADER_LEN as usize {
            return Err(Error::Corrupt(format!(
                "file too small for header: {} bytes",
                buf.len()
            )));
        }
        if buf[..MAGIC.len()] != MAGIC {
            return Err(Error::Corrupt("bad magic".to_string()));
        }

        let header: Header = bincode::deserialize(&buf[MAGIC.len()..HEADER_LEN as usize])
            .map_err(|e| Error::Corrupt(format!("header decode: {e}")))?;
        header.validate(file_len)?;
        Ok(header)
    }

    pub fn validate(&self, file_len: u64) -> Result<()> {
        if self.version != FORMAT_VERSION {
            return Err(Error::Corrupt(format!(
                "unsupported format version {}",
                self.version
            )));
        }
        if self.dimensions == 0 {
            return Err(Error::Corrupt("zero dimensionality".to_string()));
        }
        if self.tombstone_count > self.record_count {
            return Err(Error::Corrupt(format!(
                "tombstone count {} exceeds record count {}",
                self.tombstone_count, self.record_count
            )));
        }
        let slots_end = self
            .record_count
            .checked_mul(self.slot_stride())
            .and_then(|n| n.checked_add(HEADER_LEN))
            .ok_or_else(|| Error::Corrupt("slot region size overflows".to_string()))?;
        if self.meta_offset < slots_end {
            return Err(Error::Corrupt(format!(
                "slot region (end {}) overlaps metadata region (offset {})",
                slots_end, self.meta_offset
            )));
        }
        let meta_end = self
            .meta_offset
            .checked_add(self.meta_len)
            .ok_or_else(|| Error::Corrupt("metadata region size overflows".to_string()))?;
        if meta_end > file_len {
            return Err(Error::Corrupt(format!(
                "metadata region [{}, {}) extends past end of file ({})",
                self.meta_offset, meta_end, file_len
            )));
        }
        Ok(())
    }
}

/// Byte stride of one slot: fixed header plus the vector payload.
#[inline]
#[must_use]
pub fn slot_stride(dimensions: u32) -> u64 {
    SLOT_HEADER_LEN as u64 + 4 * dimensions as u64
}

/// Fixed-size per-record entry at the head of each slot. Carries the
/// record's entry in the metadata offset/length table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotHeader {
    pub id: RecordId,
    pub flags: u32,
    pub meta_len: u32,
    /// Byte offset relative to the metadata region start, so the region
    /// can be relocated without touching slots.
    pub meta_offset: u64,
}

impl SlotHeader {
    #[must_use]
    pub fn new(id: RecordId, meta_offset: u64, meta_len: u32) -> Self {
        Self {
            id,
            flags: 0,
            meta_len,
            meta_offset,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_tombstoned(&self) -> bool {
        self.flags & TOMBSTONE_FLAG != 0
    }

    #[inline]
    pub fn set_tombstoned(&mut self) {
        self.flags |= TOMBSTONE_FLAG;
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let buf = bincode::serialize(self)
            .map_err(|e| Error::Corrupt(format!("slot header encode: {e}")))?;
        debug_assert_eq!(buf.len(), SLOT_HEADER_LEN);
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        bincode::deserialize(&buf[..SLOT_HEADER_LEN.min(buf.len())])
            .map_err(|e| Error::Corrupt(format!("slot header decode: {e}")))
    }
}

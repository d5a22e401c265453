//! File store: scoped open, crash-safe batch append, lazy scan,
//! tombstoning and compaction over a single database file.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ahash::AHashSet;
use atomicwrites::{AtomicFile, OverwriteBehavior};
use bytes::Bytes;
use tracing::debug;

use veclite_core::{Error, RecordId, RecordInsert, Result};

use crate::format::{Header, SlotHeader, HEADER_LEN, SLOT_HEADER_LEN};

/// Open handle on one database file.
///
/// A `FileStore` lives for a single engine call: opened, used, dropped.
/// Serialization across calls is the caller's job (see [`crate::lock`]).
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    file: File,
    header: Header,
}

impl FileStore {
    /// Open a database file, creating it with a fresh header when absent.
    ///
    /// An existing file's dimensionality must match `dimensions`.
    pub fn open(path: &Path, dimensions: u32) -> Result<Self> {
        if dimensions == 0 {
            return Err(Error::InvalidArgument(
                "dimensionality must be at least 1".to_string(),
            ));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let file_len = file.metadata()?.len();

        if file_len == 0 {
            let header = Header::new(dimensions);
            let mut store = Self {
                path: path.to_path_buf(),
                file,
                header,
            };
            store.commit_header()?;
            return Ok(store);
        }

        let header = read_header_from(&mut file, file_len)?;
        if header.dimensions != dimensions {
            return Err(Error::DimensionMismatch {
                expected: header.dimensions as usize,
                actual: dimensions as usize,
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            header,
        })
    }

    /// Open an existing database file; `NotFound` when the path is absent.
    pub fn open_existing(path: &Path) -> Result<Self> {
        let mut file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound(path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let file_len = file.metadata()?.len();
        let header = read_header_from(&mut file, file_len)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            header,
        })
    }

    /// Header-only read, plus the physical file size. Used by stats; does
    /// not touch the record regions.
    pub fn read_header(path: &Path) -> Result<(Header, u64)> {
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound(path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let file_len = file.metadata()?.len();
        let header = read_header_from(&mut file, file_len)?;
        Ok((header, file_len))
    }

    #[inline]
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a batch of records, returning the assigned ids.
    ///
    /// Crash-safe two-phase commit: the metadata region (extended with the
    /// batch's payloads) is first relocated to the end of the file and
    /// committed, then the new slots are written after the existing slot
    /// region and the counts committed. A crash between any two steps
    /// leaves the last committed header pointing at intact regions, with
    /// at worst ignorable trailing bytes.
    pub fn append(&mut self, batch: &[RecordInsert]) -> Result<Vec<RecordId>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let dimensions = self.header.dimensions as usize;
        for rec in batch {
            if rec.vector.len() != dimensions {
                return Err(Error::DimensionMismatch {
                    expected: dimensions,
                    actual: rec.vector.len(),
                });
            }
        }
        if (self.header.next_id as i64) + (batch.len() as i64) > i64::from(RecordId::MAX) {
            return Err(Error::InvalidArgument("record id space exhausted".to_string()));
        }

        // Phase 1: rebuild the metadata region with the new payloads
        // appended and write it past the end of the file.
        let old_meta = self.read_meta_region()?;
        let added: usize = batch.iter().map(|r| r.metadata.len()).sum();
        let mut new_meta = Vec::with_capacity(old_meta.len() + added);
        new_meta.extend_from_slice(&old_meta);

        let mut slots = Vec::with_capacity(batch.len());
        let mut ids = Vec::with_capacity(batch.len());
        let mut next_id = self.header.next_id;
        for rec in batch {
            let meta_offset = new_meta.len() as u64;
            new_meta.extend_from_slice(&rec.metadata);
            slots.push(SlotHeader::new(next_id, meta_offset, rec.metadata.len() as u32));
            ids.push(next_id);
            next_id += 1;
        }

        let file_len = self.file.metadata()?.len();
        let new_slots_end =
            self.header.slots_end() + batch.len() as u64 * self.header.slot_stride();
        let new_meta_offset = file_len.max(new_slots_end);

        self.file.seek(SeekFrom::Start(new_meta_offset))?;
        self.file.write_all(&new_meta)?;
        self.file.sync_data()?;

        // Commit the relocated metadata region. Counts are unchanged, so
        // no slot references the bytes added for the batch yet.
        self.header.meta_offset = new_meta_offset;
        self.header.meta_len = new_meta.len() as u64;
        self.commit_header()?;

        // Phase 2: write the new slots over the space the old metadata
        // region vacated, then commit the new counts.
        let mut slot_buf =
            Vec::with_capacity(batch.len() * self.header.slot_stride() as usize);
        for (slot, rec) in slots.iter().zip(batch) {
            slot_buf.extend_from_slice(&slot.encode()?);
            for x in &rec.vector {
                slot_buf.extend_from_slice(&x.to_le_bytes());
            }
        }
        self.file.seek(SeekFrom::Start(self.header.slots_end()))?;
        self.file.write_all(&slot_buf)?;
        self.file.sync_data()?;

        self.header.record_count += batch.len() as u64;
        self.header.next_id = next_id;
        self.commit_header()?;

        debug!(count = batch.len(), "appended batch");
        Ok(ids)
    }

    /// Lazy, restartable iterator over all physical slots, tombstoned
    /// included. Callers decide whether to skip tombstones. Metadata is
    /// read only when `want_metadata` is set.
    pub fn scan(&self, want_metadata: bool) -> Result<Scan> {
        Scan::new(&self.path, self.header, want_metadata)
    }

    /// Fetch one record's metadata payload.
    pub fn read_metadata(&mut self, slot: &SlotHeader) -> Result<Bytes> {
        let rel_end = slot.meta_offset + u64::from(slot.meta_len);
        if rel_end > self.header.meta_len {
            return Err(Error::Corrupt(format!(
                "record {}: metadata [{}, {}) outside region of {} bytes",
                slot.id, slot.meta_offset, rel_end, self.header.meta_len
            )));
        }

        self.file
            .seek(SeekFrom::Start(self.header.meta_offset + slot.meta_offset))?;
        let mut buf = vec![0u8; slot.meta_len as usize];
        self.file.read_exact(&mut buf).map_err(eof_as_corrupt)?;
        Ok(Bytes::from(buf))
    }

    /// Flag the given records tombstoned; returns how many were live.
    ///
    /// Ids that are unknown or already tombstoned are ignored, which makes
    /// deletion idempotent.
    pub fn tombstone(&mut self, ids: &AHashSet<RecordId>) -> Result<usize> {
        if ids.is_empty() || self.header.record_count == 0 {
            return Ok(0);
        }

        let stride = self.header.slot_stride();
        let mut flagged: Vec<(u64, SlotHeader)> = Vec::new();
        {
            let mut reader = BufReader::new(self.file.try_clone()?);
            reader.seek(SeekFrom::Start(HEADER_LEN))?;
            let mut buf = [0u8; SLOT_HEADER_LEN];
            for i in 0..self.header.record_count {
                reader.read_exact(&mut buf).map_err(eof_as_corrupt)?;
                let mut slot = SlotHeader::decode(&buf)?;
                if !slot.is_tombstoned() && ids.contains(&slot.id) {
                    slot.set_tombstoned();
                    flagged.push((HEADER_LEN + i * stride, slot));
                }
                reader.seek_relative((stride as usize - SLOT_HEADER_LEN) as i64)?;
            }
        }

        if flagged.is_empty() {
            return Ok(0);
        }

        for (offset, slot) in &flagged {
            self.file.seek(SeekFrom::Start(*offset))?;
            self.file.write_all(&slot.encode()?)?;
        }
        self.file.sync_data()?;

        self.header.tombstone_count += flagged.len() as u64;
        self.commit_header()?;
        Ok(flagged.len())
    }

    /// Rewrite the file without tombstoned slots, producing a tight layout
    /// and reclaiming space. The only operation that shrinks the file.
    /// Surviving ids and the id sequence are preserved.
    ///
    /// The replacement goes through a temp file plus atomic rename, so a
    /// crash mid-compaction leaves the original file untouched.
    pub fn compact(&mut self) -> Result<()> {
        let mut live_slots = Vec::new();
        let mut vectors: Vec<Vec<f32>> = Vec::new();
        let mut meta = Vec::new();

        for rec in self.scan(true)? {
            let rec = rec?;
            if rec.slot.is_tombstoned() {
                continue;
            }
            let payload = rec.metadata.expect("scan opened with metadata");
            live_slots.push(SlotHeader::new(
                rec.slot.id,
                meta.len() as u64,
                payload.len() as u32,
            ));
            meta.extend_from_slice(&payload);
            vectors.push(rec.vector);
        }

        let mut new_header = Header::new(self.header.dimensions);
        new_header.record_count = live_slots.len() as u64;
        new_header.next_id = self.header.next_id;
        new_header.meta_offset = HEADER_LEN + live_slots.len() as u64 * new_header.slot_stride();
        new_header.meta_len = meta.len() as u64;

        let mut out = new_header.encode()?;
        for (slot, vector) in live_slots.iter().zip(&vectors) {
            out.extend_from_slice(&slot.encode()?);
            for x in vector {
                out.extend_from_slice(&x.to_le_bytes());
            }
        }
        out.extend_from_slice(&meta);

        AtomicFile::new(&self.path, OverwriteBehavior::AllowOverwrite)
            .write(|f| f.write_all(&out))
            .map_err(|e| match e {
                atomicwrites::Error::Internal(e) | atomicwrites::Error::User(e) => Error::Io(e),
            })?;

        // The rename replaced the inode behind the old handle; reopen.
        self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.header = new_header;

        debug!(live = live_slots.len(), "compacted");
        Ok(())
    }

    fn read_meta_region(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.header.meta_len as usize];
        if !buf.is_empty() {
            self.file.seek(SeekFrom::Start(self.header.meta_offset))?;
            self.file.read_exact(&mut buf).map_err(eof_as_corrupt)?;
        }
        Ok(buf)
    }

    fn commit_header(&mut self) -> Result<()> {
        let buf = self.header.encode()?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&buf)?;
        self.file.sync_data()?;
        Ok(())
    }
}

fn read_header_from(file: &mut File, file_len: u64) -> Result<Header> {
    let mut buf = [0u8; HEADER_LEN as usize];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut buf).map_err(eof_as_corrupt)?;
    Header::decode(&buf, file_len)
}

fn eof_as_corrupt(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::Corrupt("file truncated mid-region".to_string())
    } else {
        Error::Io(e)
    }
}

/// One slot yielded by [`FileStore::scan`].
#[derive(Debug, Clone)]
pub struct ScanRecord {
    pub slot: SlotHeader,
    pub vector: Vec<f32>,
    /// Present when the scan was opened with metadata loading.
    pub metadata: Option<Bytes>,
}

impl ScanRecord {
    #[inline]
    #[must_use]
    pub fn id(&self) -> RecordId {
        self.slot.id
    }

    #[inline]
    #[must_use]
    pub fn is_tombstoned(&self) -> bool {
        self.slot.is_tombstoned()
    }
}

/// Streaming reader over the slot region, with an optional second cursor
/// tracking the metadata region. Owns its own descriptors, so scans are
/// restartable and independent of the store handle that spawned them.
pub struct Scan {
    slots: BufReader<File>,
    meta: Option<BufReader<File>>,
    header: Header,
    next_slot: u64,
    meta_pos: u64,
}

impl Scan {
    fn new(path: &Path, header: Header, want_metadata: bool) -> Result<Self> {
        let mut slots = BufReader::new(File::open(path)?);
        slots.seek(SeekFrom::Start(HEADER_LEN))?;

        let meta = if want_metadata {
            let mut reader = BufReader::new(File::open(path)?);
            reader.seek(SeekFrom::Start(header.meta_offset))?;
            Some(reader)
        } else {
            None
        };

        Ok(Self {
            slots,
            meta,
            header,
            next_slot: 0,
            meta_pos: header.meta_offset,
        })
    }

    fn read_record(&mut self) -> Result<ScanRecord> {
        let stride = self.header.slot_stride() as usize;
        let mut buf = vec![0u8; stride];
        self.slots.read_exact(&mut buf).map_err(eof_as_corrupt)?;

        let slot = SlotHeader::decode(&buf)?;
        let vector: Vec<f32> = buf[SLOT_HEADER_LEN..]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().expect("4-byte chunk")))
            .collect();

        let metadata = if let Some(reader) = self.meta.as_mut() {
            let rel_end = slot.meta_offset + u64::from(slot.meta_len);
            if rel_end > self.header.meta_len {
                return Err(Error::Corrupt(format!(
                    "record {}: metadata [{}, {}) outside region of {} bytes",
                    slot.id, slot.meta_offset, rel_end, self.header.meta_len
                )));
            }

            // Slot order matches metadata order, so this stays sequential;
            // the seek only fires on irregular layouts.
            let abs = self.header.meta_offset + slot.meta_offset;
            if abs != self.meta_pos {
                reader.seek(SeekFrom::Start(abs))?;
            }
            let mut payload = vec![0u8; slot.meta_len as usize];
            reader.read_exact(&mut payload).map_err(eof_as_corrupt)?;
            self.meta_pos = abs + u64::from(slot.meta_len);
            Some(Bytes::from(payload))
        } else {
            None
        };

        Ok(ScanRecord {
            slot,
            vector,
            metadata,
        })
    }
}

impl Iterator for Scan {
    type Item = Result<ScanRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_slot >= self.header.record_count {
            return None;
        }
        self.next_slot += 1;
        Some(self.read_record())
    }
}

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use bincode::{Decode, Encode};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::storage::base::Lsn;

/// LSN of the first byte ever written to the redo stream
pub const LOG_START_LSN: Lsn = 8192;

/// Destination for the redo records of committed mini-transactions
pub trait LogSink: Send + Sync {
    /// Durably append one mini-transaction's records; returns the end LSN of the group
    fn append_group(&self, recs: &[u8]) -> Result<Lsn>;

    /// End LSN of the last appended group
    fn current_lsn(&self) -> Lsn;
}

/// Records of one committed mini-transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogGroup {
    pub end_lsn: Lsn,
    pub recs: Vec<u8>,
}

struct MemLogInner {
    lsn: Lsn,
    groups: Vec<LogGroup>,
}

/// Redo sink kept entirely in memory
pub struct MemLog {
    inner: Mutex<MemLogInner>,
}

impl MemLog {
    pub fn new() -> Self {
        MemLog {
            inner: Mutex::new(MemLogInner {
                lsn: LOG_START_LSN,
                groups: Vec::new(),
            }),
        }
    }

    pub fn groups(&self) -> Vec<LogGroup> {
        self.inner.lock().groups.clone()
    }

    pub fn n_groups(&self) -> usize {
        self.inner.lock().groups.len()
    }
}

impl Default for MemLog {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for MemLog {
    fn append_group(&self, recs: &[u8]) -> Result<Lsn> {
        let mut inner = self.inner.lock();
        inner.lsn += recs.len() as Lsn;
        let end_lsn = inner.lsn;
        inner.groups.push(LogGroup {
            end_lsn,
            recs: recs.to_vec(),
        });
        Ok(end_lsn)
    }

    fn current_lsn(&self) -> Lsn {
        self.inner.lock().lsn
    }
}

/// Redo file entry header (fixed 20 bytes on disk)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct WalEntryHeader {
    /// Magic number for validation
    pub magic: u32,
    /// Payload length (bytes following this header)
    pub payload_len: u32,
    /// End LSN of the group stored in the payload
    pub end_lsn: u64,
    /// CRC32 of header (with this field zeroed) and payload
    pub crc32: u32,
}

impl WalEntryHeader {
    const MAGIC: u32 = 0x554E444F; // "UNDO"
    pub const SIZE: usize = 20;

    pub fn new(payload_len: u32, end_lsn: Lsn) -> Self {
        WalEntryHeader {
            magic: Self::MAGIC,
            payload_len,
            end_lsn,
            crc32: 0,
        }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        bincode::encode_to_vec(self, header_config())
            .map_err(|e| Error::CorruptLog(format!("cannot encode entry header: {}", e)))
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        let (header, _) = bincode::decode_from_slice::<WalEntryHeader, _>(buf, header_config())
            .map_err(|e| Error::CorruptLog(format!("cannot decode entry header: {}", e)))?;
        if header.magic != Self::MAGIC {
            return Err(Error::CorruptLog("invalid redo entry magic".to_string()));
        }
        Ok(header)
    }
}

fn header_config() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

fn entry_crc(header: &WalEntryHeader, payload: &[u8]) -> Result<u32> {
    let mut unsummed = *header;
    unsummed.crc32 = 0;
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&unsummed.encode()?);
    hasher.update(payload);
    Ok(hasher.finalize())
}

/// Single redo file entry: header + one group of records
#[derive(Debug)]
pub struct WalEntry {
    pub header: WalEntryHeader,
    pub payload: Vec<u8>,
}

impl WalEntry {
    pub fn into_group(self) -> LogGroup {
        LogGroup {
            end_lsn: self.header.end_lsn,
            recs: self.payload,
        }
    }
}

struct WalFileInner {
    file: File,
    /// Current write offset (next entry will be written here)
    next_offset: u64,
    lsn: Lsn,
}

/// Append-only redo file, one entry per committed mini-transaction
pub struct WalFile {
    path: PathBuf,
    inner: Mutex<WalFileInner>,
}

impl WalFile {
    /// Open or create a redo file, positioning after the last valid entry
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut next_offset = 0;
        let mut lsn = LOG_START_LSN;
        while let Some(entry) = read_entry(&file, next_offset)? {
            next_offset += (WalEntryHeader::SIZE + entry.payload.len()) as u64;
            lsn = entry.header.end_lsn;
        }
        debug!(path = %path.display(), next_offset, lsn, "opened redo file");

        Ok(WalFile {
            path,
            inner: Mutex::new(WalFileInner {
                file,
                next_offset,
                lsn,
            }),
        })
    }

    /// Read the entry at `offset`; `None` at end of file or on a torn tail
    pub fn read_at(&self, offset: u64) -> Result<Option<WalEntry>> {
        let inner = self.inner.lock();
        read_entry(&inner.file, offset)
    }

    /// Iterate through all entries starting from offset
    pub fn iter_from(&self, start_offset: u64) -> WalIterator<'_> {
        WalIterator {
            wal: self,
            current_offset: start_offset,
        }
    }

    /// Flush file contents to stable storage
    pub fn sync(&self) -> Result<()> {
        self.inner.lock().file.sync_data()?;
        Ok(())
    }

    /// Get current write offset
    pub fn next_offset(&self) -> u64 {
        self.inner.lock().next_offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for WalFile {
    fn append_group(&self, recs: &[u8]) -> Result<Lsn> {
        let mut inner = self.inner.lock();
        let end_lsn = inner.lsn + recs.len() as Lsn;

        let mut header = WalEntryHeader::new(recs.len() as u32, end_lsn);
        header.crc32 = entry_crc(&header, recs)?;

        let mut buf = header.encode()?;
        buf.extend_from_slice(recs);
        inner.file.write_all_at(&buf, inner.next_offset)?;

        inner.next_offset += buf.len() as u64;
        inner.lsn = end_lsn;
        Ok(end_lsn)
    }

    fn current_lsn(&self) -> Lsn {
        self.inner.lock().lsn
    }
}

fn read_entry(file: &File, offset: u64) -> Result<Option<WalEntry>> {
    let mut header_buf = [0u8; WalEntryHeader::SIZE];
    match file.read_exact_at(&mut header_buf, offset) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let header = WalEntryHeader::decode(&header_buf)?;

    let mut payload = vec![0u8; header.payload_len as usize];
    match file.read_exact_at(&mut payload, offset + WalEntryHeader::SIZE as u64) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            warn!(offset, "torn redo entry at end of file");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    }

    if header.crc32 != entry_crc(&header, &payload)? {
        return Err(Error::CorruptLog(format!(
            "redo entry CRC mismatch at offset {}",
            offset
        )));
    }

    Ok(Some(WalEntry { header, payload }))
}

/// Iterator for redo file entries
pub struct WalIterator<'a> {
    wal: &'a WalFile,
    current_offset: u64,
}

impl<'a> Iterator for WalIterator<'a> {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.wal.read_at(self.current_offset) {
            Ok(Some(entry)) => {
                self.current_offset += (WalEntryHeader::SIZE + entry.payload.len()) as u64;
                Some(Ok(entry))
            }
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encodes_to_fixed_size() {
        let header = WalEntryHeader::new(12, LOG_START_LSN + 12);
        let bytes = header.encode().unwrap();
        assert_eq!(bytes.len(), WalEntryHeader::SIZE);
        assert_eq!(WalEntryHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn test_mem_log_lsn_advances_by_group_length() {
        let log = MemLog::new();
        assert_eq!(log.current_lsn(), LOG_START_LSN);
        assert_eq!(log.append_group(&[1, 2, 3]).unwrap(), LOG_START_LSN + 3);
        assert_eq!(log.append_group(&[4]).unwrap(), LOG_START_LSN + 4);
        assert_eq!(log.n_groups(), 2);
        assert_eq!(log.groups()[1].recs, vec![4]);
    }

    #[test]
    fn test_wal_append_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("redo.log");

        let wal = WalFile::open(&path).unwrap();
        assert_eq!(wal.next_offset(), 0);
        wal.append_group(&[1, 2, 3, 4, 5]).unwrap();
        let end = wal.append_group(&[6]).unwrap();
        wal.sync().unwrap();
        drop(wal);

        let wal = WalFile::open(&path).unwrap();
        assert_eq!(wal.current_lsn(), end);
        let entries: Vec<_> = wal.iter_from(0).map(|e| e.unwrap()).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].payload, vec![1, 2, 3, 4, 5]);
        assert_eq!(entries[1].header.end_lsn, end);
    }

    #[test]
    fn test_corrupted_payload_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("redo.log");
        let wal = WalFile::open(&path).unwrap();
        wal.append_group(&[9, 9, 9]).unwrap();
        drop(wal);

        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.write_all_at(&[0], WalEntryHeader::SIZE as u64 + 1).unwrap();
        drop(file);

        assert!(matches!(WalFile::open(&path), Err(Error::CorruptLog(_))));
    }
}

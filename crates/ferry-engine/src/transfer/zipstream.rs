//! Forward-only writer for stored (uncompressed) zip archives
//!
//! Entries are written with a data descriptor after their body, so the CRC and
//! size never have to be patched into the local header. Output accumulates in
//! an internal buffer the caller drains as upload parts.
//!
//! Only zip32 is produced: at most 65535 entries and 4 GiB per entry and per
//! archive.

use chrono::{Datelike, NaiveDateTime, Timelike};

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const DATA_DESCRIPTOR_SIG: u32 = 0x0807_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIR_SIG: u32 = 0x0605_4b50;

const VERSION: u16 = 20;
/// Bit 3: sizes in data descriptor. Bit 11: UTF-8 names.
const FLAGS: u16 = 0x0008 | 0x0800;
const METHOD_STORED: u16 = 0;

pub const MAX_ENTRIES: usize = u16::MAX as usize;
pub const MAX_SIZE: u64 = u32::MAX as u64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ZipError {
    #[error("zip32 limit exceeded: {0}")]
    Limit(String),
    #[error("entry name '{0}' is empty or too long")]
    InvalidName(String),
    #[error("{0}")]
    State(&'static str),
}

pub type ZipResult<T> = Result<T, ZipError>;

struct CentralEntry {
    name: Vec<u8>,
    crc: u32,
    size: u32,
    local_offset: u32,
}

struct OpenEntry {
    name: Vec<u8>,
    hasher: crc32fast::Hasher,
    size: u64,
    local_offset: u64,
}

/// CRC and size of a finished entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySummary {
    pub crc: u32,
    pub size: u64,
}

pub struct ZipStreamWriter {
    buf: Vec<u8>,
    /// Bytes emitted so far, drained or not
    written: u64,
    entries: Vec<CentralEntry>,
    current: Option<OpenEntry>,
    dos_time: u16,
    dos_date: u16,
}

impl ZipStreamWriter {
    /// All entries carry `modified` as their timestamp
    pub fn new(modified: NaiveDateTime) -> Self {
        let (dos_time, dos_date) = dos_datetime(modified);
        Self {
            buf: Vec::new(),
            written: 0,
            entries: Vec::new(),
            current: None,
            dos_time,
            dos_date,
        }
    }

    pub fn start_entry(&mut self, name: &str) -> ZipResult<()> {
        if self.current.is_some() {
            return Err(ZipError::State("previous entry not finished"));
        }
        if self.entries.len() >= MAX_ENTRIES {
            return Err(ZipError::Limit(format!("more than {} entries", MAX_ENTRIES)));
        }
        if name.is_empty() || name.len() > u16::MAX as usize {
            return Err(ZipError::InvalidName(name.to_string()));
        }
        let local_offset = self.written;
        check_size("archive", local_offset)?;

        let name = name.as_bytes().to_vec();
        self.put_u32(LOCAL_HEADER_SIG);
        self.put_u16(VERSION);
        self.put_u16(FLAGS);
        self.put_u16(METHOD_STORED);
        self.put_u16(self.dos_time);
        self.put_u16(self.dos_date);
        // crc, compressed size, uncompressed size follow in the data descriptor
        self.put_u32(0);
        self.put_u32(0);
        self.put_u32(0);
        self.put_u16(name.len() as u16);
        self.put_u16(0);
        self.put_bytes(&name);

        self.current = Some(OpenEntry {
            name,
            hasher: crc32fast::Hasher::new(),
            size: 0,
            local_offset,
        });
        Ok(())
    }

    pub fn write(&mut self, data: &[u8]) -> ZipResult<()> {
        let entry = self
            .current
            .as_mut()
            .ok_or(ZipError::State("no entry started"))?;
        entry.size += data.len() as u64;
        check_size("entry", entry.size)?;
        entry.hasher.update(data);
        self.put_bytes(data);
        Ok(())
    }

    pub fn finish_entry(&mut self) -> ZipResult<EntrySummary> {
        let entry = self
            .current
            .take()
            .ok_or(ZipError::State("no entry started"))?;
        let crc = entry.hasher.finalize();
        let size = entry.size as u32;

        self.put_u32(DATA_DESCRIPTOR_SIG);
        self.put_u32(crc);
        self.put_u32(size);
        self.put_u32(size);

        self.entries.push(CentralEntry {
            name: entry.name,
            crc,
            size,
            local_offset: entry.local_offset as u32,
        });
        Ok(EntrySummary {
            crc,
            size: entry.size,
        })
    }

    /// Write the central directory and return every byte not yet drained
    pub fn finish(mut self) -> ZipResult<Vec<u8>> {
        if self.current.is_some() {
            return Err(ZipError::State("last entry not finished"));
        }
        let directory_offset = self.written;
        check_size("archive", directory_offset)?;

        let entries = std::mem::take(&mut self.entries);
        for entry in &entries {
            self.put_u32(CENTRAL_HEADER_SIG);
            self.put_u16(VERSION);
            self.put_u16(VERSION);
            self.put_u16(FLAGS);
            self.put_u16(METHOD_STORED);
            self.put_u16(self.dos_time);
            self.put_u16(self.dos_date);
            self.put_u32(entry.crc);
            self.put_u32(entry.size);
            self.put_u32(entry.size);
            self.put_u16(entry.name.len() as u16);
            self.put_u16(0); // extra field length
            self.put_u16(0); // comment length
            self.put_u16(0); // disk number start
            self.put_u16(0); // internal attributes
            self.put_u32(0); // external attributes
            self.put_u32(entry.local_offset);
            self.put_bytes(&entry.name);
        }

        let directory_size = self.written - directory_offset;
        check_size("central directory", directory_size)?;

        self.put_u32(END_OF_CENTRAL_DIR_SIG);
        self.put_u16(0);
        self.put_u16(0);
        self.put_u16(entries.len() as u16);
        self.put_u16(entries.len() as u16);
        self.put_u32(directory_size as u32);
        self.put_u32(directory_offset as u32);
        self.put_u16(0);

        Ok(self.buf)
    }

    /// Bytes waiting to be drained
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Drain the first `n` buffered bytes (all of them if fewer are buffered)
    pub fn take_part(&mut self, n: usize) -> Vec<u8> {
        if n >= self.buf.len() {
            return std::mem::take(&mut self.buf);
        }
        let rest = self.buf.split_off(n);
        std::mem::replace(&mut self.buf, rest)
    }

    fn put_u16(&mut self, v: u16) {
        self.put_bytes(&v.to_le_bytes());
    }

    fn put_u32(&mut self, v: u32) {
        self.put_bytes(&v.to_le_bytes());
    }

    fn put_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        self.written += data.len() as u64;
    }
}

fn check_size(what: &str, size: u64) -> ZipResult<()> {
    if size > MAX_SIZE {
        return Err(ZipError::Limit(format!("{} larger than {} bytes", what, MAX_SIZE)));
    }
    Ok(())
}

/// MS-DOS time and date words; years outside 1980..=2107 are clamped
fn dos_datetime(t: NaiveDateTime) -> (u16, u16) {
    let (year, month, day) = match t.year() {
        y if y < 1980 => (1980, 1, 1),
        y if y > 2107 => (2107, 12, 31),
        y => (y, t.month(), t.day()),
    };
    let date = (((year - 1980) as u16) << 9) | ((month as u16) << 5) | day as u16;
    let time = ((t.hour() as u16) << 11) | ((t.minute() as u16) << 5) | (t.second() as u16 / 2);
    (time, date)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::{Cursor, Read};

    fn timestamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(13, 45, 30)
            .unwrap()
    }

    fn build(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipStreamWriter::new(timestamp());
        let mut out = Vec::new();
        for (name, data) in entries {
            writer.start_entry(name).unwrap();
            // several small writes and drains, like a streamed upload
            for chunk in data.chunks(7) {
                writer.write(chunk).unwrap();
                out.extend(writer.take_part(5));
            }
            writer.finish_entry().unwrap();
        }
        out.extend(writer.finish().unwrap());
        out
    }

    #[test]
    fn test_zip_crate_reads_stream_output() {
        let bytes = build(&[
            ("a.dcm", b"hello world, this is entry a"),
            ("nested/b.dcm", b""),
            ("c.dcm", &[0u8, 1, 2, 3, 255]),
        ]);

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 3);

        let mut contents = String::new();
        archive.by_name("a.dcm").unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "hello world, this is entry a");

        let mut empty = Vec::new();
        archive.by_name("nested/b.dcm").unwrap().read_to_end(&mut empty).unwrap();
        assert!(empty.is_empty());

        let mut binary = Vec::new();
        let mut entry = archive.by_index(2).unwrap();
        assert_eq!(entry.compression(), zip::CompressionMethod::Stored);
        entry.read_to_end(&mut binary).unwrap();
        assert_eq!(binary, vec![0u8, 1, 2, 3, 255]);
    }

    #[test]
    fn test_corrupted_body_fails_crc() {
        let mut bytes = build(&[("a.dcm", b"some payload that will be damaged")]);
        // first body byte follows the 30-byte header and the 5-byte name
        bytes[35] ^= 0xff;

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut out = Vec::new();
        assert!(archive.by_index(0).unwrap().read_to_end(&mut out).is_err());
    }

    #[test]
    fn test_entry_summary_and_counters() {
        let mut writer = ZipStreamWriter::new(timestamp());
        writer.start_entry("x").unwrap();
        writer.write(b"123456789").unwrap();
        let summary = writer.finish_entry().unwrap();
        assert_eq!(summary.size, 9);
        // CRC-32 check value
        assert_eq!(summary.crc, 0xCBF4_3926);
        assert_eq!(writer.entry_count(), 1);
        assert_eq!(writer.bytes_written(), 30 + 1 + 9 + 16);
    }

    #[test]
    fn test_state_errors() {
        let mut writer = ZipStreamWriter::new(timestamp());
        assert!(matches!(writer.write(b"x"), Err(ZipError::State(_))));
        writer.start_entry("a").unwrap();
        assert!(matches!(writer.start_entry("b"), Err(ZipError::State(_))));
        assert!(matches!(ZipStreamWriter::new(timestamp()).start_entry(""), Err(ZipError::InvalidName(_))));
    }

    #[test]
    fn test_dos_datetime() {
        let (time, date) = dos_datetime(timestamp());
        assert_eq!(date, ((2024 - 1980) << 9) | (3 << 5) | 15);
        assert_eq!(time, (13 << 11) | (45 << 5) | 15);

        let old = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(dos_datetime(old).1, (1 << 5) | 1);
    }
}

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// Frame one record as `[u32 len][bincode payload][u32 crc32]`, little endian.
fn write_record(out: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "WAL record too large"))?;
    out.write_all(&len.to_le_bytes())?;
    out.write_all(&payload)?;
    out.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

/// `Ok(None)` at a clean end of file or a torn tail.
fn read_u32(input: &mut impl Read) -> io::Result<Option<u32>> {
    let mut buf = [0u8; 4];
    match input.read_exact(&mut buf) {
        Ok(()) => Ok(Some(u32::from_le_bytes(buf))),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

/// Next intact payload, or `None` once the log ends or stops verifying.
fn read_record(input: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let Some(len) = read_u32(input)? else {
        return Ok(None);
    };
    let mut payload = vec![0u8; len as usize];
    match input.read_exact(&mut payload) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let Some(crc) = read_u32(input)? else {
        return Ok(None);
    };
    if crc != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(Some(payload))
}

/// Append-only event log for one property.
///
/// Appends are buffered; `flush_sync` makes a batch durable, which is what the
/// engine's group-commit writer calls once per batch. A crash can only tear the
/// last record, and replay stops at the first record that fails its checksum.
pub struct Wal {
    out: BufWriter<File>,
    path: PathBuf,
    appended: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            out: BufWriter::new(open_append(path)?),
            path: path.to_path_buf(),
            appended: 0,
        })
    }

    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_record(&mut self.out, event)?;
        self.appended += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.out.flush()?;
        self.out.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended since open or the last compaction.
    pub fn appends_since_compact(&self) -> u64 {
        self.appended
    }

    fn compact_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write a full snapshot to the side file and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(Self::compact_path(path))?);
        for event in events {
            write_record(&mut out, event)?;
        }
        out.flush()?;
        out.get_ref().sync_all()
    }

    /// Rename the snapshot over the log and continue appending to it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        self.out.flush()?;
        fs::rename(Self::compact_path(&self.path), &self.path)?;
        self.out = BufWriter::new(open_append(&self.path)?);
        self.appended = 0;
        Ok(())
    }

    /// Every intact event in the log, in order. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut input = BufReader::new(file);
        let mut events = Vec::new();
        while let Some(payload) = read_record(&mut input)? {
            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!("{}: stopping replay at undecodable record: {e}", path.display());
                    break;
                }
            }
        }
        Ok(events)
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

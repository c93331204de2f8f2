use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::LogEntry;

/// Length prefix plus checksum suffix around every payload.
const FRAME_OVERHEAD: u64 = 8;

fn staged_snapshot_path(wal_path: &Path) -> PathBuf {
    wal_path.with_extension("wal.tmp")
}

/// Frame one entry as `[u32 len LE][bincode payload][u32 crc32 LE]` onto `buf`.
fn frame(buf: &mut Vec<u8>, entry: &LogEntry) -> io::Result<()> {
    let payload = bincode::serialize(entry).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(ErrorKind::InvalidData, "log entry too large to frame"))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(())
}

enum Frame {
    /// A decoded entry and the number of bytes its frame occupied.
    Entry(LogEntry, u64),
    End,
    /// The bytes from here on do not form a whole, checksummed frame.
    Torn(&'static str),
}

/// Read the next frame given how many bytes are left in the file. The length
/// prefix is checked against `remaining` before allocating the payload.
fn read_frame(reader: &mut impl Read, remaining: u64) -> io::Result<Frame> {
    if remaining == 0 {
        return Ok(Frame::End);
    }
    if remaining < FRAME_OVERHEAD {
        return Ok(Frame::Torn("partial frame header"));
    }
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u64::from(u32::from_le_bytes(len_buf));
    if len + FRAME_OVERHEAD > remaining {
        return Ok(Frame::Torn("frame runs past end of file"));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    let mut crc_buf = [0u8; 4];
    reader.read_exact(&mut crc_buf)?;
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Frame::Torn("checksum mismatch"));
    }
    match bincode::deserialize(&payload) {
        Ok(entry) => Ok(Frame::Entry(entry, len + FRAME_OVERHEAD)),
        Err(_) => Ok(Frame::Torn("undecodable payload")),
    }
}

/// What a read-only pass over a WAL file found.
#[derive(Debug, Default)]
pub struct Scan {
    pub entries: Vec<LogEntry>,
    /// Length of the prefix made of whole frames with valid checksums.
    pub valid_len: u64,
    /// Bytes after `valid_len` that a crash left behind.
    pub discarded: u64,
}

/// Read every whole frame of the WAL at `path`. A missing file scans as empty.
pub fn scan(path: &Path) -> io::Result<Scan> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Scan::default()),
        Err(e) => return Err(e),
    };
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut scan = Scan::default();

    loop {
        match read_frame(&mut reader, file_len - scan.valid_len)? {
            Frame::Entry(entry, size) => {
                scan.entries.push(entry);
                scan.valid_len += size;
            }
            Frame::End => break,
            Frame::Torn(reason) => {
                scan.discarded = file_len - scan.valid_len;
                tracing::warn!(
                    "WAL {}: {reason} after {} entries, {} trailing bytes dropped",
                    path.display(),
                    scan.entries.len(),
                    scan.discarded
                );
                break;
            }
        }
    }
    Ok(scan)
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => File::open(dir)?.sync_all(),
        _ => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Append-only log of calendar storage mutations for one tenant.
///
/// The file only ever holds whole frames: recovery cuts a torn tail off
/// before the first append, and a failed group commit is cut back out.
pub struct Wal {
    file: File,
    path: PathBuf,
    /// Bytes of whole frames on disk.
    len: u64,
    batch: Vec<u8>,
    appends_since_compact: u64,
}

impl Wal {
    /// Open the WAL at `path` for appending, creating it if missing, and
    /// return the entries it already holds.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<LogEntry>)> {
        let staged = staged_snapshot_path(path);
        match fs::remove_file(&staged) {
            Ok(()) => tracing::warn!("WAL {}: removed unfinished compaction snapshot", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let Scan { entries, valid_len, discarded } = scan(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if discarded > 0 {
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        let wal = Self {
            file,
            path: path.to_path_buf(),
            len: valid_len,
            batch: Vec::new(),
            appends_since_compact: 0,
        };
        Ok((wal, entries))
    }

    /// Durably append a group of entries with one write and one fsync.
    /// On failure the file is cut back to its last good length.
    pub fn commit<'a>(&mut self, entries: impl IntoIterator<Item = &'a LogEntry>) -> io::Result<()> {
        self.batch.clear();
        let mut count = 0u64;
        for entry in entries {
            frame(&mut self.batch, entry)?;
            count += 1;
        }
        if count == 0 {
            return Ok(());
        }

        let written = self.file.write_all(&self.batch).and_then(|()| self.file.sync_data());
        if let Err(e) = written {
            if let Err(cut) = self.file.set_len(self.len) {
                tracing::error!("WAL {}: cannot cut back failed commit: {cut}", self.path.display());
            }
            return Err(e);
        }
        self.len += self.batch.len() as u64;
        self.appends_since_compact += count;
        Ok(())
    }

    /// Replace the log with `entries`. The snapshot is staged beside the WAL,
    /// fsynced, then renamed over it.
    pub fn compact(&mut self, entries: &[LogEntry]) -> io::Result<()> {
        let staged = staged_snapshot_path(&self.path);
        let staged_len = match write_snapshot(&staged, entries) {
            Ok(len) => len,
            Err(e) => {
                let _ = fs::remove_file(&staged);
                return Err(e);
            }
        };
        fs::rename(&staged, &self.path)?;
        sync_parent_dir(&self.path)?;

        self.file = OpenOptions::new().append(true).open(&self.path)?;
        tracing::debug!(
            "WAL {}: compacted {} bytes into {staged_len}",
            self.path.display(),
            self.len
        );
        self.len = staged_len;
        self.appends_since_compact = 0;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    #[cfg(test)]
    pub fn byte_len(&self) -> u64 {
        self.len
    }
}

fn write_snapshot(path: &Path, entries: &[LogEntry]) -> io::Result<u64> {
    let mut writer = BufWriter::new(File::create(path)?);
    let mut buf = Vec::new();
    let mut len = 0u64;
    for entry in entries {
        buf.clear();
        frame(&mut buf, entry)?;
        writer.write_all(&buf)?;
        len += buf.len() as u64;
    }
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(len)
}

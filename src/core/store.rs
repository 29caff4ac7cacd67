// Record file access: positioned reads, a private sequential line cursor, and locked appends.
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use bstr::ByteSlice;
use fs2::FileExt;

use crate::core::error::{Error, ErrorKind};

pub const DEFAULT_READ_BUFFER: usize = 64 * 1024;

#[derive(Clone, Copy, Debug)]
pub struct StoreOptions {
    pub create: bool,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self { create: false }
    }

    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive owner of one open record file.
///
/// Every read is positioned, so concurrent readers never share a cursor.
/// `close` takes the handle away; reads that start afterwards fail with
/// `ErrorKind::Io`.
#[derive(Debug)]
pub struct RecordStore {
    path: PathBuf,
    file: RwLock<Option<File>>,
    append_guard: Mutex<()>,
}

impl RecordStore {
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self, Error> {
        let path = path.as_ref();
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(options.create)
            .open(&path)
            .map_err(|err| {
                Error::from_io(err)
                    .with_message("failed to open record file")
                    .with_path(&path)
            })?;

        tracing::debug!(path = %path.display(), "opened record file");

        Ok(Self {
            path,
            file: RwLock::new(Some(file)),
            append_guard: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Absolute path of the backing file, used as its identity in logs.
    pub fn name(&self) -> String {
        self.path.display().to_string()
    }

    pub fn is_closed(&self) -> bool {
        match self.file.read() {
            Ok(guard) => guard.is_none(),
            Err(_) => true,
        }
    }

    pub fn len(&self) -> Result<u64, Error> {
        self.with_file(|file| file.metadata().map(|meta| meta.len()))
            .map_err(|err| err.with_message("failed to read file length"))
    }

    pub fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.len()? == 0)
    }

    /// Reads exactly `length` bytes starting at `offset`.
    ///
    /// A range that extends past the end of the file is an `Io` error, never
    /// a short read.
    pub fn read_at(&self, offset: u64, length: u32) -> Result<Vec<u8>, Error> {
        self.with_file(|file| {
            let file_len = file.metadata()?.len();
            match offset.checked_add(u64::from(length)) {
                Some(end) if end <= file_len => {}
                _ => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
            }
            let mut buf = vec![0u8; length as usize];
            read_exact_at(file, &mut buf, offset)?;
            Ok(buf)
        })
        .map_err(|err| {
            let err = err.with_offset(offset).with_length(length);
            if err.message().is_none() {
                err.with_message("positioned read failed")
            } else {
                err
            }
        })
    }

    /// Fills as much of `buf` as the file has from `offset`; 0 means end of file.
    pub(crate) fn read_chunk_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, Error> {
        self.with_file(|file| read_some_at(file, buf, offset))
            .map_err(|err| err.with_offset(offset))
    }

    /// Appends one record line and returns the `(offset, length)` that
    /// locates it, excluding the trailing newline.
    pub fn append(&self, record: &[u8]) -> Result<(u64, u32), Error> {
        if record.find_byte(b'\n').is_some() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("record must not contain a newline")
                .with_path(&self.path));
        }
        let length = u32::try_from(record.len()).map_err(|_| {
            Error::new(ErrorKind::Usage)
                .with_message("record exceeds the maximum record length")
                .with_path(&self.path)
        })?;

        let _serial = self.append_guard.lock().map_err(|_| {
            Error::new(ErrorKind::Internal)
                .with_message("append lock poisoned")
                .with_path(&self.path)
        })?;

        let mut line = Vec::with_capacity(record.len() + 1);
        line.extend_from_slice(record);
        line.push(b'\n');

        let offset = self.with_file(|file| {
            let _lock = AppendLock::acquire(file)?;
            let offset = file.metadata()?.len();
            write_all_at(file, &line, offset)?;
            Ok(offset)
        })?;

        tracing::trace!(path = %self.path.display(), offset, length, "appended record");
        Ok((offset, length))
    }

    pub fn close(&self) -> Result<(), Error> {
        let mut guard = self.file.write().map_err(|_| self.poisoned())?;
        if guard.take().is_some() {
            tracing::debug!(path = %self.path.display(), "closed record file");
        }
        Ok(())
    }

    fn with_file<T>(&self, op: impl FnOnce(&File) -> io::Result<T>) -> Result<T, Error> {
        let guard = self.file.read().map_err(|_| self.poisoned())?;
        let file = guard.as_ref().ok_or_else(|| {
            Error::new(ErrorKind::Io)
                .with_message("record store is closed")
                .with_path(&self.path)
        })?;
        op(file).map_err(|err| {
            let message = if err.kind() == io::ErrorKind::UnexpectedEof {
                Some("read past end of file")
            } else {
                None
            };
            let err = Error::from_io(err).with_path(&self.path);
            match message {
                Some(message) => err.with_message(message),
                None => err,
            }
        })
    }

    fn poisoned(&self) -> Error {
        Error::new(ErrorKind::Internal)
            .with_message("record store lock poisoned")
            .with_path(&self.path)
    }
}

struct AppendLock<'a> {
    file: &'a File,
}

impl<'a> AppendLock<'a> {
    fn acquire(file: &'a File) -> io::Result<Self> {
        FileExt::lock_exclusive(file)?;
        Ok(Self { file })
    }
}

impl Drop for AppendLock<'_> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(self.file);
    }
}

#[cfg(unix)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt as _;
    file.read_at(buf, offset)
}

#[cfg(unix)]
fn pwrite(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt as _;
    file.write_at(buf, offset)
}

#[cfg(windows)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt as _;
    file.seek_read(buf, offset)
}

#[cfg(windows)]
fn pwrite(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt as _;
    file.seek_write(buf, offset)
}

fn read_some_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match pread(file, &mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    let filled = read_some_at(file, buf, offset)?;
    if filled < buf.len() {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
    }
    Ok(())
}

fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    while !buf.is_empty() {
        match pwrite(file, buf, offset) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// One line from a sequential read, without its terminator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexedLine {
    pub bytes: Vec<u8>,
    pub offset: u64,
}

impl IndexedLine {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// True for lines holding nothing but ASCII whitespace.
    pub fn is_blank(&self) -> bool {
        self.bytes.trim_with(|c| c.is_ascii_whitespace()).is_empty()
    }
}

/// Sequential line reader over a store with its own private cursor.
///
/// Fills a fixed buffer through positioned reads, so scanning never moves a
/// cursor that another reader depends on.
#[derive(Debug)]
pub struct LineReader {
    store: Arc<RecordStore>,
    buf: Vec<u8>,
    head: usize,
    tail: usize,
    fill_offset: u64,
    pos: u64,
    eof: bool,
}

impl LineReader {
    pub fn new(store: Arc<RecordStore>, buffer_size: usize) -> Self {
        Self {
            store,
            buf: vec![0u8; buffer_size.max(1)],
            head: 0,
            tail: 0,
            fill_offset: 0,
            pos: 0,
            eof: false,
        }
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Byte offset of the next unread byte.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Returns the next line, or `None` once the file is exhausted.
    ///
    /// A final line without a trailing newline is still returned. A `\r`
    /// before the newline is stripped.
    pub fn read_next_line(&mut self) -> Result<Option<IndexedLine>, Error> {
        let start = self.pos;
        let mut line = Vec::new();
        loop {
            if self.head == self.tail {
                if self.eof {
                    break;
                }
                let n = self.store.read_chunk_at(self.fill_offset, &mut self.buf)?;
                if n == 0 {
                    self.eof = true;
                    break;
                }
                self.fill_offset += n as u64;
                self.head = 0;
                self.tail = n;
            }

            let window = &self.buf[self.head..self.tail];
            match window.find_byte(b'\n') {
                Some(idx) => {
                    line.extend_from_slice(&window[..idx]);
                    self.head += idx + 1;
                    self.pos += idx as u64 + 1;
                    return Ok(Some(finish_line(line, start)));
                }
                None => {
                    line.extend_from_slice(window);
                    self.pos += window.len() as u64;
                    self.head = self.tail;
                }
            }
        }

        if self.pos == start {
            return Ok(None);
        }
        Ok(Some(finish_line(line, start)))
    }
}

fn finish_line(mut bytes: Vec<u8>, offset: u64) -> IndexedLine {
    if bytes.last() == Some(&b'\r') {
        bytes.pop();
    }
    IndexedLine { bytes, offset }
}

#[cfg(test)]
mod tests {
    use super::{IndexedLine, LineReader, RecordStore, StoreOptions};
    use crate::core::error::ErrorKind;
    use std::sync::Arc;

    fn store_with(contents: &[u8]) -> (tempfile::TempDir, Arc<RecordStore>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("records.jsonl");
        std::fs::write(&path, contents).expect("write");
        let store = RecordStore::open(&path, StoreOptions::new()).expect("open");
        (dir, Arc::new(store))
    }

    fn indexed(bytes: &[u8], offset: u64) -> IndexedLine {
        IndexedLine {
            bytes: bytes.to_vec(),
            offset,
        }
    }

    fn collect(reader: &mut LineReader) -> Vec<IndexedLine> {
        let mut lines = Vec::new();
        while let Some(line) = reader.read_next_line().expect("line") {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn lines_carry_starting_offsets() {
        let (_dir, store) = store_with(b"{\"a\":1}\n\n{\"bb\":22}\n");
        let mut reader = LineReader::new(store, 4);
        let lines = collect(&mut reader);
        assert_eq!(
            lines,
            vec![
                indexed(b"{\"a\":1}", 0),
                indexed(b"", 8),
                indexed(b"{\"bb\":22}", 9),
            ]
        );
        assert_eq!(reader.position(), 19);
        assert!(reader.read_next_line().expect("eof").is_none());
    }

    #[test]
    fn final_line_without_newline_is_returned() {
        let (_dir, store) = store_with(b"{\"a\":1}\r\n{\"b\":2}");
        let mut reader = LineReader::new(store, 3);
        let lines = collect(&mut reader);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].bytes, b"{\"a\":1}");
        assert_eq!(lines[1].bytes, b"{\"b\":2}");
        assert_eq!(lines[1].offset, 9);
    }

    #[test]
    fn empty_file_is_immediately_exhausted() {
        let (_dir, store) = store_with(b"");
        let mut reader = LineReader::new(store, 16);
        assert!(reader.read_next_line().expect("eof").is_none());
    }

    #[test]
    fn blank_detection_ignores_whitespace() {
        assert!(indexed(b" \t ", 0).is_blank());
        assert!(!indexed(b" {} ", 0).is_blank());
    }

    #[test]
    fn positioned_reads_do_not_disturb_scanning() {
        let (_dir, store) = store_with(b"first\nsecond\nthird\n");
        let mut reader = LineReader::new(store.clone(), 8);
        let first = reader.read_next_line().expect("read").expect("line");
        assert_eq!(first.bytes, b"first");

        assert_eq!(store.read_at(13, 5).expect("read_at"), b"third");

        let second = reader.read_next_line().expect("read").expect("line");
        assert_eq!(second.bytes, b"second");
        assert_eq!(second.offset, 6);
    }

    #[test]
    fn read_past_end_is_an_io_error() {
        let (_dir, store) = store_with(b"short\n");
        let err = store.read_at(2, 10).expect_err("past end");
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.offset(), Some(2));
        assert_eq!(err.length(), Some(10));
    }

    #[test]
    fn oversized_length_is_rejected_before_reading() {
        let (_dir, store) = store_with(b"short\n");
        let err = store.read_at(0, u32::MAX).expect_err("past end");
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.message(), Some("read past end of file"));
        assert_eq!(err.length(), Some(u32::MAX));

        let err = store.read_at(u64::MAX, 1).expect_err("offset overflow");
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.offset(), Some(u64::MAX));
    }

    #[test]
    fn append_returns_coordinates() {
        let (_dir, store) = store_with(b"{\"a\":1}\n");
        let (offset, length) = store.append(br#"{"b":2}"#).expect("append");
        assert_eq!((offset, length), (8, 7));
        assert_eq!(store.read_at(offset, length).expect("read"), br#"{"b":2}"#);
        assert_eq!(store.len().expect("len"), 16);
    }

    #[test]
    fn append_rejects_embedded_newline() {
        let (_dir, store) = store_with(b"");
        let err = store.append(b"{}\n{}").expect_err("newline");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn missing_file_is_not_found_unless_created() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("missing.jsonl");
        let err = RecordStore::open(&path, StoreOptions::new()).expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let store = RecordStore::open(&path, StoreOptions::new().create(true)).expect("create");
        assert!(store.is_empty().expect("len"));
        assert!(store.path().is_absolute());
    }

    #[test]
    fn closed_store_rejects_reads() {
        let (_dir, store) = store_with(b"{\"a\":1}\n");
        store.close().expect("close");
        store.close().expect("close twice");
        assert!(store.is_closed());
        let err = store.read_at(0, 7).expect_err("closed");
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.message(), Some("record store is closed"));
    }
}

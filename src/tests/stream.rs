use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Cursor, Read, Write};
use std::os::unix::io::AsRawFd;

use tempfile::TempDir;

use crate::redirect::pipe_pair;
use crate::tests::common::pattern_bytes;
use crate::{BufMode, PopenError, Stream};

#[test]
fn bufmode_from_hint() {
    assert_eq!(BufMode::from_hint(0), BufMode::Unbuffered);
    assert_eq!(BufMode::from_hint(1), BufMode::Line);
    assert_eq!(BufMode::from_hint(4096), BufMode::Full(4096));
    assert_eq!(BufMode::from_hint(-1), BufMode::Full(8192));
}

#[test]
fn file_access_modes() {
    let tmpdir = TempDir::new().unwrap();
    let path = tmpdir.path().join("f");

    let writable = Stream::from_file(File::create(&path).unwrap()).unwrap();
    assert!(writable.is_open());
    assert!(writable.is_writable());
    assert!(!writable.is_readable());
    assert!(writable.fileno().is_some());

    let readable = Stream::from_file(File::open(&path).unwrap()).unwrap();
    assert!(readable.is_readable());
    assert!(!readable.is_writable());
}

#[test]
fn read_from_wrong_capability() {
    let tmpdir = TempDir::new().unwrap();
    let path = tmpdir.path().join("f");
    let mut writable = Stream::from_file(File::create(&path).unwrap()).unwrap();
    assert!(matches!(writable.read(10), Err(PopenError::Io(_))));

    let mut sink = Stream::from_writer(io::sink());
    assert!(matches!(sink.read_all(), Err(PopenError::Io(_))));
}

#[test]
fn read_exact_and_partial() {
    let mut s = Stream::from_reader(Cursor::new(b"hello".to_vec()));
    assert_eq!(s.read(3).unwrap(), b"hel");
    assert_eq!(s.read(2).unwrap(), b"lo");
    // the first short/empty read marks end-of-input
    assert_eq!(s.read(5).unwrap(), b"");
    assert!(!s.is_readable());
    assert!(matches!(s.read(1), Err(PopenError::Io(_))));
}

#[test]
fn read_short_at_eof() {
    let mut s = Stream::from_reader(Cursor::new(b"abc".to_vec()));
    assert_eq!(s.read(10).unwrap(), b"abc");
    assert!(!s.is_readable());
}

#[test]
fn read_all_grows_geometrically() {
    let data = pattern_bytes(50_000);
    let mut s = Stream::from_reader(Cursor::new(data.clone()));
    let out = s.read_all().unwrap();
    assert_eq!(out, data);
}

#[test]
fn fileno_absent_for_inprocess() {
    let s = Stream::from_reader(io::empty());
    assert_eq!(s.fileno(), None);
    let s = Stream::from_writer(io::sink());
    assert_eq!(s.fileno(), None);
}

#[test]
fn write_through_pipe() {
    let (mut reader, mut writer) = pipe_pair().unwrap();
    assert_eq!(writer.write(b"one\ntwo\n").unwrap(), 8);
    writer.set_bufsize(1).unwrap();
    assert_eq!(writer.write(b"three\n").unwrap(), 6);
    writer.set_bufsize(0).unwrap();
    assert_eq!(writer.write(b"four").unwrap(), 4);
    writer.close();
    assert_eq!(reader.read_all().unwrap(), b"one\ntwo\nthree\nfour");
}

#[test]
fn close_is_idempotent() {
    let (mut reader, _writer) = pipe_pair().unwrap();
    assert!(reader.is_open());
    reader.close();
    assert!(!reader.is_open());
    assert_eq!(reader.fileno(), None);
    reader.close();
    assert!(matches!(reader.read(1), Err(PopenError::Io(_))));
}

#[test]
fn release_severs_without_closing() {
    let tmpdir = TempDir::new().unwrap();
    let path = tmpdir.path().join("f");
    std::fs::write(&path, b"data").unwrap();

    let file = File::open(&path).unwrap();
    let fd = file.as_raw_fd();
    let mut s = Stream::from_fd(fd).unwrap();
    assert_eq!(s.fileno(), Some(fd));
    s.release();
    assert!(!s.is_open());

    // the caller's descriptor must still be usable
    let mut content = Vec::new();
    let mut file = file;
    file.read_to_end(&mut content).unwrap();
    assert_eq!(content, b"data");
}

#[test]
fn borrowed_fd_survives_drop() {
    let tmpdir = TempDir::new().unwrap();
    let path = tmpdir.path().join("f");
    std::fs::write(&path, b"data").unwrap();

    let mut file = File::open(&path).unwrap();
    {
        let mut s = Stream::from_fd(file.as_raw_fd()).unwrap();
        assert_eq!(s.read(2).unwrap(), b"da");
    }
    let mut rest = Vec::new();
    file.read_to_end(&mut rest).unwrap();
    assert_eq!(rest, b"ta");
}

#[test]
fn bufsize_rejected_for_inprocess() {
    let mut s = Stream::from_reader(io::empty());
    assert!(matches!(
        s.set_bufsize(0),
        Err(PopenError::InvalidArgument(_))
    ));
}

#[derive(Default)]
struct Loopback(VecDeque<u8>);

impl Read for Loopback {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.0.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.0.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for Loopback {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.extend(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn duplex_reads_and_writes() {
    let mut s = Stream::from_duplex(Loopback::default());
    assert!(s.is_readable());
    assert!(s.is_writable());
    assert_eq!(s.write(b"ping").unwrap(), 4);
    assert_eq!(s.read(4).unwrap(), b"ping");
}

use std::io::{self, Cursor};

use crate::redirect::pipe_pair;
use crate::tests::common::{pattern_bytes, SharedSink};
use crate::{communicate, communicate_async, PopenError, Stream};

#[test]
fn copies_everything() {
    let data = pattern_bytes(100_000);
    let mut src = Stream::from_reader(Cursor::new(data.clone()));
    let sink = SharedSink::new();
    let mut dst = Stream::from_writer(sink.clone());
    let count = communicate(&mut src, &mut dst).unwrap();
    assert_eq!(count, data.len() as u64);
    assert_eq!(sink.contents(), data);
}

#[test]
fn empty_source_transfers_nothing() {
    let mut src = Stream::from_reader(io::empty());
    let mut dst = Stream::from_writer(io::sink());
    assert_eq!(communicate(&mut src, &mut dst).unwrap(), 0);
}

#[test]
fn capability_preconditions() {
    let mut not_readable = Stream::from_writer(io::sink());
    let mut dst = Stream::from_writer(io::sink());
    assert!(matches!(
        communicate(&mut not_readable, &mut dst),
        Err(PopenError::Io(_))
    ));

    let mut src = Stream::from_reader(io::empty());
    let mut not_writable = Stream::from_reader(io::empty());
    assert!(matches!(
        communicate(&mut src, &mut not_writable),
        Err(PopenError::Io(_))
    ));

    let mut closed = Stream::from_reader(io::empty());
    closed.close();
    assert!(matches!(
        communicate(&mut closed, &mut dst),
        Err(PopenError::Io(_))
    ));
}

#[test]
fn broken_pipe_is_end_of_stream() {
    let (mut reader, mut writer) = pipe_pair().unwrap();
    reader.close();
    let mut src = Stream::from_reader(Cursor::new(pattern_bytes(1_000_000)));
    // every write sees EPIPE; that terminates the copy without an error
    assert_eq!(communicate(&mut src, &mut writer).unwrap(), 0);
}

#[test]
fn async_transfer_through_pipe() {
    let data = pattern_bytes(300_000);
    let (mut reader, writer) = pipe_pair().unwrap();
    let worker =
        communicate_async(Stream::from_reader(Cursor::new(data.clone())), writer).unwrap();
    // the worker closing the write end is what ends this read
    let collected = reader.read_all().unwrap();
    assert_eq!(collected, data);
    assert_eq!(worker.join().unwrap(), data.len() as u64);
}

#[test]
fn async_transfer_large_in_memory() {
    let data = pattern_bytes(16 * 1024 * 1024);
    let sink = SharedSink::new();
    let worker = communicate_async(
        Stream::from_reader(Cursor::new(data.clone())),
        Stream::from_writer(sink.clone()),
    )
    .unwrap();
    assert_eq!(worker.join().unwrap(), data.len() as u64);
    assert_eq!(sink.contents(), data);
}

#[test]
fn async_rejects_bad_endpoints_up_front() {
    let src = Stream::from_writer(io::sink());
    let dst = Stream::from_writer(io::sink());
    assert!(communicate_async(src, dst).is_err());
}

use std::io::{self, Cursor};

use tempfile::TempDir;

use crate::{PopenError, StderrRedirect, StdinRedirect, StdoutRedirect};

#[test]
fn inherit_has_no_streams() {
    let ep = StdinRedirect::inherit();
    assert!(ep.source.is_none());
    assert!(ep.pipe_reader.is_none());
    assert!(ep.pipe_writer.is_none());
}

#[test]
fn pipe_allocates_both_ends() {
    let ep = StdinRedirect::pipe().unwrap();
    assert!(ep.source.is_none());
    let reader = ep.pipe_reader.as_ref().unwrap();
    let writer = ep.pipe_writer.as_ref().unwrap();
    assert!(reader.fileno().is_some());
    assert!(writer.fileno().is_some());
    assert!(reader.is_readable());
    assert!(writer.is_writable());
}

#[test]
fn discard_opens_null_device() {
    let ep = StdoutRedirect::discard().unwrap();
    let dest = ep.destination.as_ref().unwrap();
    assert!(dest.fileno().is_some());
    assert!(dest.is_writable());
    assert!(ep.pipe_reader.is_none());

    let ep = StdinRedirect::discard().unwrap();
    assert!(ep.source.as_ref().unwrap().is_readable());
}

#[test]
fn inprocess_stream_brings_a_pipe() {
    let ep = StdinRedirect::from_reader(Cursor::new(b"x".to_vec())).unwrap();
    // no descriptor on the source, so the child gets a pipe end instead
    assert_eq!(ep.source.as_ref().unwrap().fileno(), None);
    assert!(ep.pipe_reader.is_some());
    assert!(ep.pipe_writer.is_some());

    let ep = StdoutRedirect::from_writer(io::sink()).unwrap();
    assert_eq!(ep.destination.as_ref().unwrap().fileno(), None);
    assert!(ep.pipe_reader.is_some());
    assert!(ep.pipe_writer.is_some());
}

#[test]
fn missing_input_path_is_rejected() {
    let err = StdinRedirect::from_path("/no/such/file").unwrap_err();
    assert!(matches!(err, PopenError::InvalidArgument(_)));
}

#[test]
fn output_path_is_created() {
    let tmpdir = TempDir::new().unwrap();
    let path = tmpdir.path().join("out");
    let ep = StdoutRedirect::from_path(&path).unwrap();
    assert!(path.exists());
    assert!(ep.destination.as_ref().unwrap().is_writable());
}

#[test]
fn input_path_opens_readable() {
    let tmpdir = TempDir::new().unwrap();
    let path = tmpdir.path().join("in");
    std::fs::write(&path, b"contents").unwrap();
    let ep = StdinRedirect::from_path(&path).unwrap();
    assert!(ep.source.as_ref().unwrap().is_readable());
}

#[test]
fn merge_stdout_only_sets_the_flag() {
    let ep = StderrRedirect::merge_stdout();
    assert!(ep.merge);
    assert!(ep.destination.is_none());
    assert!(ep.pipe_reader.is_none());
    assert!(ep.pipe_writer.is_none());

    assert!(!StderrRedirect::pipe().unwrap().merge);
}

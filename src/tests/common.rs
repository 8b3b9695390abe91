use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use crate::PopenConfig;

pub fn read_whole_file<T: Read>(mut f: T) -> String {
    let mut content = String::new();
    f.read_to_string(&mut content).unwrap();
    content
}

/// Deterministic test data, long enough to exceed pipe buffers.
pub fn pattern_bytes(n: usize) -> Vec<u8> {
    (0..n).map(|i| (i % 256) as u8).collect()
}

pub fn sh(cmd: &str) -> PopenConfig {
    PopenConfig::new().args(["/bin/sh", "-c", cmd]).unwrap()
}

/// Write sink that stays inspectable after being moved into a transfer
/// worker.
#[derive(Clone, Default)]
pub struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    pub fn new() -> SharedSink {
        SharedSink::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

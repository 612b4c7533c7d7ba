//! Destinations for the rendered avatar media.

use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
    sync::{Arc, Mutex},
};

pub trait MediaSink: Send {
    fn write(&mut self, chunk: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A sink shared between the host, which mounts it, and the avatar client, which fills it.
pub type SharedSink = Arc<Mutex<dyn MediaSink>>;

pub fn shared<S: MediaSink + 'static>(sink: S) -> SharedSink {
    Arc::new(Mutex::new(sink))
}

/// Writes one chunk, logging instead of failing. Media loss is never fatal.
pub(crate) fn write_chunk(sink: &SharedSink, chunk: &[u8], kind: &str) {
    let Ok(mut guard) = sink.lock() else {
        tracing::warn!(kind, "Media sink lock poisoned; dropping chunk");
        return;
    };
    if let Err(e) = guard.write(chunk) {
        tracing::warn!(kind, error = %e, "Failed to write media chunk");
    }
}

/// Discards media while counting what it received.
#[derive(Debug, Default)]
pub struct NullSink {
    pub bytes: u64,
    pub chunks: u64,
}

impl MediaSink for NullSink {
    fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.bytes += chunk.len() as u64;
        self.chunks += 1;
        Ok(())
    }
}

/// Appends raw media to a file.
pub struct FileSink {
    writer: BufWriter<File>,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
        })
    }
}

impl MediaSink for FileSink {
    fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.writer.write_all(chunk)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

//! In-memory backup sinks for tests.

use std::{
    io::{
        Cursor,
        Seek,
        SeekFrom,
        Write,
    },
    sync::Arc,
};

use parking_lot::Mutex;

use crate::backup::transcript::Truncate;

/// In-memory sink that fails a chosen write.
///
/// Clones share the same buffer, so a clone can be kept to look at what was
/// written after the sink itself was moved away.
#[derive(Clone, Debug, Default)]
pub struct FailingSink {
    buffer: Arc<Mutex<Cursor<Vec<u8>>>>,
    num_writes: usize,
    fail_on: Option<usize>,
}

impl FailingSink {
    /// Fails the `n`th write (counting from 1). Half of the bytes of that
    /// write still end up in the buffer.
    pub fn failing_on(n: usize) -> Self {
        Self {
            fail_on: Some(n),
            ..Default::default()
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        self.buffer.lock().get_ref().clone()
    }

    pub fn contents_string(&self) -> String {
        String::from_utf8(self.contents()).unwrap()
    }
}

impl Write for FailingSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.num_writes += 1;
        let mut buffer = self.buffer.lock();
        if self.fail_on == Some(self.num_writes) {
            buffer.write_all(&buf[..buf.len() / 2])?;
            return Err(std::io::Error::other("disk full"));
        }
        buffer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Seek for FailingSink {
    fn seek(&mut self, position: SeekFrom) -> std::io::Result<u64> {
        self.buffer.lock().seek(position)
    }
}

impl Truncate for FailingSink {
    fn truncate(&mut self, length: u64) -> std::io::Result<()> {
        Truncate::truncate(&mut *self.buffer.lock(), length)
    }
}

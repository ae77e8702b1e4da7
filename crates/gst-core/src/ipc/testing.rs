//! In-memory duplex channel for transport and server tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex};

#[derive(Default)]
struct Shared {
    buffer: Mutex<Buffer>,
    available: Condvar,
}

#[derive(Default)]
struct Buffer {
    data: VecDeque<u8>,
    closed: bool,
}

/// One direction of the duplex: reads block until data arrives or the writer
/// half is dropped, which reads as EOF.
pub struct ChannelReader(Arc<Shared>);

pub struct ChannelWriter(Arc<Shared>);

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut guard = self.0.buffer.lock().unwrap();
        loop {
            if !guard.data.is_empty() {
                let count = buf.len().min(guard.data.len());
                for slot in buf.iter_mut().take(count) {
                    *slot = guard.data.pop_front().unwrap();
                }
                return Ok(count);
            }
            if guard.closed {
                return Ok(0);
            }
            guard = self.0.available.wait(guard).unwrap();
        }
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.0.buffer.lock().unwrap();
        if guard.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "channel closed"));
        }
        guard.data.extend(buf.iter().copied());
        self.0.available.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ChannelWriter {
    fn drop(&mut self) {
        let mut guard = self.0.buffer.lock().unwrap();
        guard.closed = true;
        self.0.available.notify_all();
    }
}

/// Build a connected pair of endpoints `(a, b)`; bytes written on one side
/// are read on the other.
#[allow(clippy::type_complexity)]
pub fn duplex() -> (
    (ChannelReader, ChannelWriter),
    (ChannelReader, ChannelWriter),
) {
    let a_to_b = Arc::new(Shared::default());
    let b_to_a = Arc::new(Shared::default());

    let a = (ChannelReader(Arc::clone(&b_to_a)), ChannelWriter(a_to_b.clone()));
    let b = (ChannelReader(a_to_b), ChannelWriter(b_to_a));
    (a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplex_carries_bytes_both_ways() {
        let ((mut a_read, mut a_write), (mut b_read, mut b_write)) = duplex();

        a_write.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        b_read.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        b_write.write_all(b"pong").unwrap();
        a_read.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[test]
    fn test_dropping_writer_reads_as_eof() {
        let ((_a_read, a_write), (mut b_read, _b_write)) = duplex();
        drop(a_write);

        let mut buf = [0u8; 1];
        assert_eq!(b_read.read(&mut buf).unwrap(), 0);
    }
}

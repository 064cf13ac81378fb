//! Scripted in-memory port for unit tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;

use crate::error::Result;
use crate::port::Port;

/// One scripted read outcome.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    /// Bytes handed out to subsequent reads.
    Bytes(Vec<u8>),
    /// A read that times out without data.
    TimedOut,
    /// A hard transport failure.
    Fail,
    /// Bytes that arrive only after the given delay.
    Slow(Vec<u8>, Duration),
}

/// Port that replays scripted replies and records every write call.
#[derive(Debug, Default)]
pub(crate) struct MockPort {
    replies: VecDeque<Reply>,
    pending: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    clears: usize,
    closed: bool,
}

impl MockPort {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Port whose reads return `lines` in order, each followed by `\n`.
    pub(crate) fn with_lines(lines: &[&str]) -> Self {
        let mut port = Self::new();
        for line in lines {
            port.push_line(line);
        }
        port
    }

    pub(crate) fn push_line(&mut self, line: &str) {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        self.replies.push_back(Reply::Bytes(bytes));
    }

    pub(crate) fn push(&mut self, reply: Reply) {
        self.replies.push_back(reply);
    }

    /// Every write call, in order.
    pub(crate) fn writes(&self) -> &[Vec<u8>] {
        &self.writes
    }

    /// Text commands written to the port (newline-terminated UTF-8 writes).
    pub(crate) fn commands(&self) -> Vec<String> {
        self.writes
            .iter()
            .filter(|w| w.last() == Some(&b'\n'))
            .filter_map(|w| String::from_utf8(w.clone()).ok())
            .map(|s| s.trim_end().to_string())
            .collect()
    }

    /// Number of write calls that were not text commands.
    pub(crate) fn raw_write_count(&self) -> usize {
        self.writes.len() - self.commands().len()
    }

    /// Number of `clear_buffers` calls.
    pub(crate) fn clear_count(&self) -> usize {
        self.clears
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pending.is_empty() {
            match self.replies.pop_front() {
                Some(Reply::Bytes(bytes)) => self.pending.extend(bytes),
                Some(Reply::Slow(bytes, delay)) => {
                    std::thread::sleep(delay);
                    self.pending.extend(bytes);
                },
                Some(Reply::TimedOut) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "mock timeout"));
                },
                Some(Reply::Fail) | None => {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock link down"));
                },
            }
        }
        let n = buf.len().min(self.pending.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.pending.pop_front().unwrap_or_default();
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writes.push(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn clear_buffers(&mut self) -> Result<()> {
        self.pending.clear();
        self.clears += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

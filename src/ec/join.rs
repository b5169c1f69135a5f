//! Lazy object reassembly
//!
//! `JoinReader` hands out the first `size` bytes of an object by walking the
//! data shards in index order. It owns the shard buffers, is single-pass and
//! cannot be rewound.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

/// Streaming reader over the data shards of a decoded object
#[derive(Debug)]
pub struct JoinReader {
    shards: Vec<Vec<u8>>,
    /// Index of the shard currently being read
    shard: usize,
    /// Offset inside the current shard
    offset: usize,
    /// Logical bytes left to hand out
    remaining: usize,
}

impl JoinReader {
    pub(crate) fn new(shards: Vec<Vec<u8>>, size: usize) -> Self {
        Self {
            shards,
            shard: 0,
            offset: 0,
            remaining: size,
        }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Whether the reader is exhausted
    pub fn is_done(&self) -> bool {
        self.remaining == 0
    }

    fn fill(&mut self, out: &mut [u8]) -> usize {
        let mut written = 0;

        while written < out.len() && self.remaining > 0 && self.shard < self.shards.len() {
            let current = &self.shards[self.shard];
            if self.offset >= current.len() {
                self.shard += 1;
                self.offset = 0;
                continue;
            }

            let n = (current.len() - self.offset)
                .min(out.len() - written)
                .min(self.remaining);
            out[written..written + n].copy_from_slice(&current[self.offset..self.offset + n]);

            written += n;
            self.offset += n;
            self.remaining -= n;
        }

        // Release shard buffers as soon as they are fully consumed
        if self.remaining == 0 {
            self.shards.clear();
        }

        written
    }
}

impl io::Read for JoinReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.fill(buf))
    }
}

impl AsyncRead for JoinReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let n = this.fill(buf.initialize_unfilled());
        buf.advance(n);
        Poll::Ready(Ok(()))
    }
}

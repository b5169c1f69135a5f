//! Buffered frame writer
//!
//! Frames accumulate in a `BufWriter`; nothing reaches the wire until
//! [`RespWriter::flush`].

use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

use super::map_io;
use crate::error::Result;

/// Frame writer over a byte sink
#[derive(Debug)]
pub struct RespWriter<W> {
    inner: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> RespWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: BufWriter::new(inner),
        }
    }

    /// Start an array of `len` elements
    pub async fn write_array_header(&mut self, len: usize) -> Result<()> {
        self.write_raw(format!("*{}\r\n", len).as_bytes()).await
    }

    /// Write one length-prefixed bulk
    pub async fn write_bulk(&mut self, data: &[u8]) -> Result<()> {
        self.write_raw(format!("${}\r\n", data.len()).as_bytes())
            .await?;
        self.write_raw(data).await?;
        self.write_raw(b"\r\n").await
    }

    pub async fn write_bulk_string(&mut self, s: &str) -> Result<()> {
        self.write_bulk(s.as_bytes()).await
    }

    /// Write a command: array header, string fields, then an optional
    /// payload bulk that the header does not count
    pub async fn write_command(&mut self, fields: &[&str], payload: Option<&[u8]>) -> Result<()> {
        self.write_array_header(fields.len()).await?;
        for field in fields {
            self.write_bulk_string(field).await?;
        }
        if let Some(payload) = payload {
            self.write_bulk(payload).await?;
        }
        Ok(())
    }

    /// Write an error frame. Line breaks in `msg` are flattened.
    pub async fn write_error(&mut self, msg: &str) -> Result<()> {
        let line = msg.replace(['\r', '\n'], " ");
        self.write_raw(format!("-{}\r\n", line).as_bytes()).await
    }

    /// Push buffered frames to the wire
    pub async fn flush(&mut self) -> Result<()> {
        self.inner.flush().await.map_err(map_io)
    }

    /// Shut down the write half
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await.map_err(map_io)
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes).await.map_err(map_io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CMD_GET_CHUNK, CMD_SET_CHUNK};

    #[tokio::test]
    async fn test_get_chunk_command_bytes() {
        let sink = tokio_test::io::Builder::new()
            .write(b"*4\r\n$9\r\nget chunk\r\n$4\r\nobj1\r\n$5\r\nreq-1\r\n$1\r\n2\r\n")
            .build();
        let mut w = RespWriter::new(sink);

        w.write_command(&[CMD_GET_CHUNK, "obj1", "req-1", "2"], None)
            .await
            .unwrap();
        w.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_set_chunk_carries_payload() {
        let mut w = RespWriter::new(Vec::new());
        w.write_command(
            &[CMD_SET_CHUNK, "k", "r", "9", "0", "4", "2", "7", "14"],
            Some(b"\x00\r\n"),
        )
        .await
        .unwrap();
        w.flush().await.unwrap();

        let out = w.inner.into_inner();
        assert!(out.starts_with(b"*9\r\n$9\r\nset chunk\r\n"));
        assert!(out.ends_with(b"$2\r\n14\r\n$3\r\n\x00\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_nothing_written_before_flush() {
        let mut w = RespWriter::new(Vec::new());
        w.write_bulk_string("abc").await.unwrap();
        assert!(w.inner.get_ref().is_empty());

        w.flush().await.unwrap();
        assert_eq!(w.inner.get_ref().as_slice(), b"$3\r\nabc\r\n");
    }

    #[tokio::test]
    async fn test_error_frame_flattens_newlines() {
        let mut w = RespWriter::new(Vec::new());
        w.write_error("ERR bad\r\nthing").await.unwrap();
        w.flush().await.unwrap();
        assert_eq!(w.inner.get_ref().as_slice(), b"-ERR bad  thing\r\n");
    }
}

//! Buffered frame reader
//!
//! Reads one field at a time so the caller can decide, after each field,
//! whether the rest of the response is still wanted.

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use super::{map_io, RespType, DEFAULT_MAX_BULK_LEN, MAX_BULK_LEN};
use crate::error::{Error, Result};

/// Field-level reader over a byte stream
#[derive(Debug)]
pub struct RespReader<R> {
    inner: BufReader<R>,
    max_bulk_len: usize,
}

impl<R: AsyncRead + Unpin> RespReader<R> {
    /// Create a reader with the default bulk size limit
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            max_bulk_len: DEFAULT_MAX_BULK_LEN,
        }
    }

    /// Override the maximum accepted bulk length, capped at `MAX_BULK_LEN`
    pub fn with_max_bulk_len(mut self, max_bulk_len: usize) -> Self {
        self.max_bulk_len = max_bulk_len.min(MAX_BULK_LEN);
        self
    }

    /// Type of the next frame, without consuming it
    pub async fn peek_type(&mut self) -> Result<RespType> {
        let buf = self.inner.fill_buf().await.map_err(map_io)?;
        let Some(&marker) = buf.first() else {
            return Err(Error::ConnectionClosed);
        };

        RespType::from_marker(marker)
            .ok_or_else(|| Error::Protocol(format!("unknown type marker 0x{:02x}", marker)))
    }

    /// Read an error frame and return its message
    pub async fn read_error(&mut self) -> Result<String> {
        let body = self.read_header(RespType::Error).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Read an array header and return the element count
    pub async fn read_array_header(&mut self) -> Result<usize> {
        let body = self.read_header(RespType::Array).await?;
        let len = parse_len(&body)?;
        usize::try_from(len).map_err(|_| Error::Protocol("null array".to_string()))
    }

    /// Read a bulk string into memory
    pub async fn read_bulk(&mut self) -> Result<Bytes> {
        let len = self
            .read_bulk_len()
            .await?
            .ok_or_else(|| Error::Protocol("unexpected null bulk".to_string()))?;

        let framed = len
            .checked_add(2)
            .ok_or_else(|| Error::Protocol(format!("bulk of {} bytes is unframeable", len)))?;
        let mut buf = vec![0u8; framed];
        self.inner.read_exact(&mut buf).await.map_err(map_io)?;
        if !buf.ends_with(b"\r\n") {
            return Err(Error::Protocol("bulk missing terminator".to_string()));
        }
        buf.truncate(len);

        Ok(Bytes::from(buf))
    }

    /// Read a bulk string that must be UTF-8
    pub async fn read_bulk_string(&mut self) -> Result<String> {
        let bytes = self.read_bulk().await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::Protocol(format!("bulk is not UTF-8: {}", e)))
    }

    /// Discard the next bulk without buffering it
    pub async fn skip_bulk(&mut self) -> Result<()> {
        let Some(len) = self.read_bulk_len().await? else {
            return Ok(());
        };

        let want = len as u64 + 2;
        let mut limited = (&mut self.inner).take(want);
        let skipped = tokio::io::copy(&mut limited, &mut tokio::io::sink())
            .await
            .map_err(map_io)?;
        if skipped < want {
            return Err(Error::ConnectionClosed);
        }

        Ok(())
    }

    /// Underlying stream
    pub fn get_ref(&self) -> &R {
        self.inner.get_ref()
    }

    /// Bulk header. `None` for a null bulk.
    async fn read_bulk_len(&mut self) -> Result<Option<usize>> {
        let body = self.read_header(RespType::Bulk).await?;
        let len = parse_len(&body)?;
        if len < 0 {
            return Ok(None);
        }

        let len = len as usize;
        if len > self.max_bulk_len {
            return Err(Error::Protocol(format!(
                "bulk of {} bytes exceeds limit {}",
                len, self.max_bulk_len
            )));
        }

        Ok(Some(len))
    }

    /// Read a `<marker><body>\r\n` line and return the body.
    ///
    /// An error frame where another type was expected surfaces as `Remote`.
    async fn read_header(&mut self, expected: RespType) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        let n = self
            .inner
            .read_until(b'\n', &mut line)
            .await
            .map_err(map_io)?;
        if n == 0 || !line.ends_with(b"\n") {
            return Err(Error::ConnectionClosed);
        }
        if !line.ends_with(b"\r\n") {
            return Err(Error::Protocol("line missing CR".to_string()));
        }
        line.truncate(line.len() - 2);

        match line.split_first() {
            Some((&marker, body)) if marker == expected.marker() => Ok(body.to_vec()),
            Some((&b'-', body)) => Err(Error::Remote(String::from_utf8_lossy(body).into_owned())),
            Some((&marker, _)) => Err(Error::Protocol(format!(
                "expected {:?}, got marker 0x{:02x}",
                expected, marker
            ))),
            None => Err(Error::Protocol("empty frame".to_string())),
        }
    }
}

fn parse_len(body: &[u8]) -> Result<i64> {
    std::str::from_utf8(body)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            Error::Protocol(format!(
                "invalid length {:?}",
                String::from_utf8_lossy(body)
            ))
        })
}

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, ErrorKind, Result};

/// Buffered byte reader used by the wire codec.
///
/// Marking is not supported. Any error from the underlying reader closes
/// the stream before the error is re-raised, and reading EOF closes the
/// stream as well. Once closed, every further read fails with `IoClosed`.
pub struct BufferedReader<R> {
    inner: R,
    buf: BytesMut,
    closed: bool,
}

const READ_CAPACITY: usize = 8 << 10;

impl<R: AsyncRead + Unpin> BufferedReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CAPACITY),
            closed: false,
        }
    }

    /// Buffered bytes ready to read without touching the underlying stream.
    ///
    /// # Errors
    ///
    /// Returns `IoClosed` once the stream is closed.
    pub fn available(&self) -> Result<usize> {
        if self.closed && self.buf.is_empty() {
            Err(Error::kind(ErrorKind::IoClosed))
        } else {
            Ok(self.buf.len())
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Closes the reader. Idempotent; buffered bytes are discarded.
    pub fn close(&mut self) {
        self.closed = true;
        self.buf.clear();
    }

    async fn fill(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::kind(ErrorKind::IoClosed));
        }
        match self.inner.read_buf(&mut self.buf).await {
            Ok(0) => {
                self.close();
                Err(Error::kind(ErrorKind::UnexpectedEof))
            }
            Ok(_) => Ok(()),
            Err(e) => {
                self.close();
                Err(Error::new(ErrorKind::RecvFailed, e.to_string()))
            }
        }
    }

    /// # Errors
    pub async fn read_exact(&mut self, dst: &mut [u8]) -> Result<()> {
        while self.buf.len() < dst.len() {
            self.fill().await?;
        }
        self.buf.copy_to_slice(dst);
        Ok(())
    }

    async fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut bytes = [0u8; N];
        self.read_exact(&mut bytes).await?;
        Ok(bytes)
    }

    /// # Errors
    pub async fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>().await?[0])
    }

    /// # Errors
    pub async fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array().await?))
    }

    /// # Errors
    pub async fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.read_array().await?))
    }

    /// # Errors
    pub async fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array().await?))
    }

    /// # Errors
    pub async fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.read_array().await?))
    }

    /// # Errors
    pub async fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.read_array().await?))
    }

    /// # Errors
    pub async fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.read_array().await?))
    }

    /// # Errors
    pub async fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_be_bytes(self.read_array().await?))
    }

    /// # Errors
    pub async fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_be_bytes(self.read_array().await?))
    }
}

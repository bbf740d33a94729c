use std::net::SocketAddr;

use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};

use crate::{
    buffered::BufferedReader,
    channel::MessageChannel,
    error::{Error, ErrorKind, Result},
};

/// One invocation's view of a connection: a buffered reader for the call
/// frame, a writer for the reply frame, and a close that releases both.
pub trait Connection: Send {
    type Reader: AsyncRead + Unpin + Send;
    type Writer: AsyncWrite + Unpin + Send;

    fn reader(&mut self) -> &mut BufferedReader<Self::Reader>;

    fn writer(&mut self) -> &mut Self::Writer;

    /// Closes the connection. Idempotent.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Connection over a pair of byte streams.
pub struct StreamConnection<R: AsyncRead, W: AsyncWrite> {
    reader: BufferedReader<R>,
    writer: W,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
    closed: bool,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> StreamConnection<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufferedReader::new(reader),
            writer,
            local_addr: None,
            remote_addr: None,
            closed: false,
        }
    }
}

impl StreamConnection<OwnedReadHalf, OwnedWriteHalf> {
    pub fn from_tcp(stream: TcpStream) -> Self {
        let local_addr = stream.local_addr().ok();
        let remote_addr = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufferedReader::new(read_half),
            writer: write_half,
            local_addr,
            remote_addr,
            closed: false,
        }
    }
}

impl<R, W> Connection for StreamConnection<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    type Reader = R;
    type Writer = W;

    fn reader(&mut self) -> &mut BufferedReader<R> {
        &mut self.reader
    }

    fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.reader.close();
        self.writer
            .shutdown()
            .await
            .map_err(|e| Error::new(ErrorKind::IoClosed, e.to_string()))
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

/// Connection adapter over one inbound channel message.
///
/// The reader serves the received message bytes; reply bytes gather in a
/// local buffer and leave as a single outbound message when the
/// connection is closed, so a reply frame is never split across channel
/// messages.
pub struct ChannelConnection {
    reader: BufferedReader<std::io::Cursor<Bytes>>,
    writer: Vec<u8>,
    channel: MessageChannel,
    closed: bool,
}

impl ChannelConnection {
    pub fn new(message: Bytes, channel: MessageChannel) -> Self {
        Self {
            reader: BufferedReader::new(std::io::Cursor::new(message)),
            writer: Vec::new(),
            channel,
            closed: false,
        }
    }

    /// The channel this invocation arrived on.
    #[must_use]
    pub fn channel(&self) -> &MessageChannel {
        &self.channel
    }
}

impl Connection for ChannelConnection {
    type Reader = std::io::Cursor<Bytes>;
    type Writer = Vec<u8>;

    fn reader(&mut self) -> &mut BufferedReader<Self::Reader> {
        &mut self.reader
    }

    fn writer(&mut self) -> &mut Vec<u8> {
        &mut self.writer
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.reader.close();
        let reply = std::mem::take(&mut self.writer);
        let result = if reply.is_empty() {
            Ok(())
        } else {
            self.channel.send(reply.into()).await
        };
        self.channel.close();
        result
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.channel.local_addr()
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.channel.remote_addr()
    }
}

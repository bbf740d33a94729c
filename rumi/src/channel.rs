use std::{
    collections::VecDeque,
    io::IoSlice,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    net::TcpStream,
    sync::{Notify, mpsc},
};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, ErrorKind, Result};

#[serde_inline_default]
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone)]
pub struct ChannelConfig {
    /// Largest payload a single message may carry.
    #[serde_inline_default(1 << 16)]
    pub max_message_size: usize,
    /// Outbound frames buffered before `send` blocks.
    #[serde_inline_default(1024)]
    pub send_queue_len: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        serde_json::from_value(serde_json::Value::Object(serde_json::Map::default())).unwrap()
    }
}

/// Consumes one inbound message, chunk by chunk.
///
/// For each message the channel calls `receive` zero or more times with
/// contiguous byte ranges covering `[0, total_size)`, accumulating into the
/// receiver's own state, then `process` exactly once. A receiver still
/// queued when the channel terminates gets `closed` exactly once instead.
pub trait MessageReceiver: Send + 'static {
    fn receive(&mut self, total_size: usize, offset: usize, chunk: &[u8]);

    fn process(self: Box<Self>, channel: &MessageChannel);

    fn closed(self: Box<Self>, error: Option<Error>);
}

enum RecvQueue {
    Open(VecDeque<Box<dyn MessageReceiver>>),
    Closed(Option<Error>),
}

struct ChannelShared {
    send_tx: mpsc::Sender<Bytes>,
    queue: Mutex<RecvQueue>,
    arrived: Notify,
    closing: CancellationToken,
    reason: Mutex<Option<Error>>,
    max_message_size: usize,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
}

impl ChannelShared {
    fn lock_queue(&self) -> MutexGuard<'_, RecvQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the first close reason; later ones lose.
    fn fail(&self, error: Error) {
        let mut reason = self.reason.lock().unwrap_or_else(PoisonError::into_inner);
        reason.get_or_insert(error);
    }

    fn close_reason(&self) -> Option<Error> {
        self.reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// A framed message transport with FIFO asynchronous receive.
///
/// Each message rides the wire as a 4-byte big-endian payload length
/// followed by the payload. Sends are serialized whole, so concurrent
/// senders never interleave bytes. The Nth registered receiver observes
/// the Nth inbound message. Cloning yields another handle to the same
/// channel.
#[derive(Clone)]
pub struct MessageChannel(Arc<ChannelShared>);

const FRAME_HEADER: usize = size_of::<u32>();

impl MessageChannel {
    /// Wraps a byte transport, spawning its send and receive loops.
    pub fn create<T>(transport: T, config: &ChannelConfig) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::create_inner(transport, config, None, None)
    }

    /// Wraps a connected TCP stream, keeping its endpoint addresses.
    pub fn from_tcp(stream: TcpStream, config: &ChannelConfig) -> Self {
        let local_addr = stream.local_addr().ok();
        let remote_addr = stream.peer_addr().ok();
        Self::create_inner(stream, config, local_addr, remote_addr)
    }

    fn create_inner<T>(
        transport: T,
        config: &ChannelConfig,
        local_addr: Option<SocketAddr>,
        remote_addr: Option<SocketAddr>,
    ) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(transport);
        let (send_tx, send_rx) = mpsc::channel(config.send_queue_len.max(1));

        let channel = Self(Arc::new(ChannelShared {
            send_tx,
            queue: Mutex::new(RecvQueue::Open(VecDeque::new())),
            arrived: Notify::new(),
            closing: CancellationToken::new(),
            reason: Mutex::new(None),
            max_message_size: config.max_message_size,
            local_addr,
            remote_addr,
        }));

        tokio::spawn({
            let channel = channel.clone();
            async move { channel.run_send_loop(write_half, send_rx).await }
        });
        tokio::spawn({
            let channel = channel.clone();
            async move { channel.run_recv_loop(read_half).await }
        });

        channel
    }

    #[must_use]
    pub fn max_message_size(&self) -> usize {
        self.0.max_message_size
    }

    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.0.local_addr
    }

    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.0.remote_addr
    }

    /// Transmits one whole message, blocking only while the send queue is
    /// full.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty or oversize payload, `IoClosed` once
    /// the channel is closed.
    pub async fn send(&self, payload: Bytes) -> Result<()> {
        if payload.is_empty() || payload.len() > self.0.max_message_size {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!(
                    "message size {} outside 1..={}",
                    payload.len(),
                    self.0.max_message_size
                ),
            ));
        }
        if self.0.closing.is_cancelled() {
            return Err(Error::kind(ErrorKind::IoClosed));
        }

        let mut frame = BytesMut::with_capacity(FRAME_HEADER + payload.len());
        frame.put_u32(u32::try_from(payload.len())?);
        frame.extend_from_slice(&payload);
        self.0
            .send_tx
            .send(frame.freeze())
            .await
            .map_err(|_| Error::kind(ErrorKind::IoClosed))
    }

    /// Registers a receiver for the next unclaimed inbound message.
    ///
    /// Never blocks. Receivers are consumed in registration order. A
    /// receiver registered after the channel terminated is handed `closed`
    /// immediately.
    pub fn receive(&self, receiver: Box<dyn MessageReceiver>) {
        let mut queue = self.0.lock_queue();
        match &mut *queue {
            RecvQueue::Open(pending) => {
                pending.push_back(receiver);
                drop(queue);
                self.0.arrived.notify_one();
            }
            RecvQueue::Closed(reason) => {
                let reason = reason.clone();
                drop(queue);
                receiver.closed(reason);
            }
        }
    }

    /// Terminates both directions. Idempotent.
    ///
    /// Pending sends fail with `IoClosed`; still-queued receivers observe
    /// `closed` once the receive loop winds down.
    pub fn close(&self) {
        self.0.closing.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.0.closing.is_cancelled()
    }

    async fn run_send_loop<T>(
        &self,
        mut write_half: WriteHalf<T>,
        mut send_rx: mpsc::Receiver<Bytes>,
    ) where
        T: AsyncWrite + Send,
    {
        match Self::send_frames(&self.0.closing, &mut write_half, &mut send_rx).await {
            Ok(()) => {
                self.0.closing.cancel();
                send_rx.close();
                // Close terminates the channel, but frames the send queue
                // already accepted still go out before the transport shuts
                // down; a reply followed by an immediate close must not be
                // lost.
                while let Ok(frame) = send_rx.try_recv() {
                    if write_half.write_all(&frame).await.is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                self.0.fail(e);
                self.0.closing.cancel();
                send_rx.close();
            }
        }
        let _ = write_half.shutdown().await;
    }

    async fn send_frames<W: AsyncWrite + Unpin>(
        closing: &CancellationToken,
        write_half: &mut W,
        send_rx: &mut mpsc::Receiver<Bytes>,
    ) -> Result<()> {
        const LIMIT: usize = 64;
        let mut frames = Vec::with_capacity(LIMIT);
        loop {
            let n = tokio::select! {
                () = closing.cancelled() => return Ok(()),
                n = send_rx.recv_many(&mut frames, LIMIT) => n,
            };
            if n == 0 {
                return Ok(());
            }

            let mut bufs = [IoSlice::new(&[]); LIMIT];
            for (frame, io_slice) in frames.iter().zip(&mut bufs) {
                *io_slice = IoSlice::new(frame);
            }

            let mut slices = &mut bufs[..frames.len()];
            while !slices.is_empty() {
                match write_half.write_vectored(slices).await {
                    Ok(0) => return Err(Error::kind(ErrorKind::IoClosed)),
                    Ok(n) => IoSlice::advance_slices(&mut slices, n),
                    Err(e) => return Err(Error::new(ErrorKind::SendFailed, e.to_string())),
                }
            }
            frames.clear();
        }
    }

    async fn run_recv_loop<T>(&self, mut read_half: ReadHalf<T>)
    where
        T: AsyncRead + Send,
    {
        if let Err(e) = self.recv_messages(&mut read_half).await {
            tracing::warn!("receive loop for {:?} failed: {e}", self.0.remote_addr);
            self.0.fail(e);
        }
        self.0.closing.cancel();

        // Every still-queued receiver observes closed exactly once; later
        // registrations are turned away with the same reason.
        let reason = self.0.close_reason();
        let pending = {
            let mut queue = self.0.lock_queue();
            match std::mem::replace(&mut *queue, RecvQueue::Closed(reason.clone())) {
                RecvQueue::Open(pending) => pending,
                RecvQueue::Closed(_) => VecDeque::new(),
            }
        };
        for receiver in pending {
            receiver.closed(reason.clone());
        }
    }

    async fn recv_messages<R: AsyncRead + Unpin>(&self, read_half: &mut R) -> Result<()> {
        let shared = &self.0;
        let mut buffer = BytesMut::with_capacity(8 << 10);
        loop {
            // Pair the next message with the next registered receiver.
            let mut receiver = tokio::select! {
                () = shared.closing.cancelled() => return Ok(()),
                receiver = Self::next_receiver(shared) => receiver,
            };

            match self.recv_one(read_half, &mut buffer, &mut receiver).await {
                Ok(true) => receiver.process(self),
                Ok(false) => {
                    // Interrupted before the message completed; the receiver
                    // goes back to the head so shutdown notifies it in order.
                    self.requeue_front(receiver);
                    return Ok(());
                }
                Err(e) => {
                    self.requeue_front(receiver);
                    return Err(e);
                }
            }
        }
    }

    /// Drains one message into `receiver`. Returns false when the channel
    /// is closing or the peer cleanly went away before the first header
    /// byte.
    async fn recv_one<R: AsyncRead + Unpin>(
        &self,
        read_half: &mut R,
        buffer: &mut BytesMut,
        receiver: &mut Box<dyn MessageReceiver>,
    ) -> Result<bool> {
        let shared = &self.0;

        while buffer.len() < FRAME_HEADER {
            let idle = buffer.is_empty();
            let n = tokio::select! {
                () = shared.closing.cancelled() => return Ok(false),
                n = read_half.read_buf(buffer) => {
                    n.map_err(|e| Error::new(ErrorKind::RecvFailed, e.to_string()))?
                }
            };
            if n == 0 {
                if idle {
                    return Ok(false);
                }
                return Err(Error::kind(ErrorKind::UnexpectedEof));
            }
        }

        let total_size = u32::from_be_bytes(buffer[..FRAME_HEADER].try_into().unwrap()) as usize;
        if total_size == 0 || total_size > shared.max_message_size {
            return Err(Error::new(
                ErrorKind::MalformedFrame,
                format!(
                    "message size {total_size} outside 1..={}",
                    shared.max_message_size
                ),
            ));
        }
        bytes::Buf::advance(buffer, FRAME_HEADER);

        let mut offset = 0;
        while offset < total_size {
            if buffer.is_empty() {
                let n = tokio::select! {
                    () = shared.closing.cancelled() => return Ok(false),
                    n = read_half.read_buf(buffer) => {
                        n.map_err(|e| Error::new(ErrorKind::RecvFailed, e.to_string()))?
                    }
                };
                if n == 0 {
                    return Err(Error::kind(ErrorKind::UnexpectedEof));
                }
            }
            let chunk = buffer.split_to(buffer.len().min(total_size - offset));
            receiver.receive(total_size, offset, &chunk);
            offset += chunk.len();
        }
        Ok(true)
    }

    async fn next_receiver(shared: &ChannelShared) -> Box<dyn MessageReceiver> {
        loop {
            let arrived = shared.arrived.notified();
            if let RecvQueue::Open(pending) = &mut *shared.lock_queue()
                && let Some(receiver) = pending.pop_front()
            {
                return receiver;
            }
            arrived.await;
        }
    }

    fn requeue_front(&self, receiver: Box<dyn MessageReceiver>) {
        if let RecvQueue::Open(pending) = &mut *self.0.lock_queue() {
            pending.push_front(receiver);
        }
    }
}

impl std::fmt::Debug for MessageChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageChannel")
            .field("local_addr", &self.0.local_addr)
            .field("remote_addr", &self.0.remote_addr)
            .field("max_message_size", &self.0.max_message_size)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    struct Collector {
        chunks: Vec<(usize, usize, usize)>,
        message: Vec<u8>,
        done: oneshot::Sender<(Vec<(usize, usize, usize)>, Vec<u8>)>,
    }

    impl Collector {
        fn new(
            done: oneshot::Sender<(Vec<(usize, usize, usize)>, Vec<u8>)>,
        ) -> Box<Self> {
            Box::new(Self {
                chunks: Vec::new(),
                message: Vec::new(),
                done,
            })
        }
    }

    impl MessageReceiver for Collector {
        fn receive(&mut self, total_size: usize, offset: usize, chunk: &[u8]) {
            self.chunks.push((total_size, offset, chunk.len()));
            assert_eq!(offset, self.message.len());
            self.message.extend_from_slice(chunk);
        }

        fn process(self: Box<Self>, _channel: &MessageChannel) {
            let _ = self.done.send((self.chunks, self.message));
        }

        fn closed(self: Box<Self>, error: Option<Error>) {
            panic!("unexpected closed({error:?})");
        }
    }

    struct OnClosed(oneshot::Sender<Option<Error>>);

    impl MessageReceiver for OnClosed {
        fn receive(&mut self, _total_size: usize, _offset: usize, _chunk: &[u8]) {}

        fn process(self: Box<Self>, _channel: &MessageChannel) {
            panic!("no message expected");
        }

        fn closed(self: Box<Self>, error: Option<Error>) {
            let _ = self.0.send(error);
        }
    }

    fn pair(config: &ChannelConfig) -> (MessageChannel, MessageChannel) {
        let (a, b) = tokio::io::duplex(64);
        (
            MessageChannel::create(a, config),
            MessageChannel::create(b, config),
        )
    }

    #[tokio::test]
    async fn test_send_size_limits() {
        let config = ChannelConfig {
            max_message_size: 64,
            ..ChannelConfig::default()
        };
        let (left, _right) = pair(&config);

        let err = left.send(Bytes::new()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);

        let err = left.send(Bytes::from(vec![0u8; 65])).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);

        left.send(Bytes::from(vec![0u8; 64])).await.unwrap();
    }

    #[tokio::test]
    async fn test_fifo_receive_with_chunked_messages() {
        let config = ChannelConfig {
            max_message_size: 1 << 20,
            ..ChannelConfig::default()
        };
        // A tiny duplex buffer forces large messages through many chunks.
        let (a, b) = tokio::io::duplex(64);
        let left = MessageChannel::create(a, &config);
        let right = MessageChannel::create(b, &config);

        let sizes = [5usize, 5000, 1];
        let mut rxs = Vec::new();
        for _ in sizes {
            let (tx, rx) = oneshot::channel();
            right.receive(Collector::new(tx));
            rxs.push(rx);
        }

        for (i, size) in sizes.into_iter().enumerate() {
            let payload = vec![i as u8; size];
            left.send(Bytes::from(payload)).await.unwrap();
        }

        for (i, (size, rx)) in sizes.into_iter().zip(rxs).enumerate() {
            let (chunks, message) = rx.await.unwrap();
            assert_eq!(message, vec![i as u8; size]);
            // Chunks are contiguous and cover the message exactly.
            let mut expect_offset = 0;
            for (total, offset, len) in chunks {
                assert_eq!(total, size);
                assert_eq!(offset, expect_offset);
                expect_offset += len;
            }
            assert_eq!(expect_offset, size);
        }
    }

    #[tokio::test]
    async fn test_concurrent_sends_do_not_interleave() {
        let config = ChannelConfig::default();
        let (left, right) = pair(&config);

        const SENDERS: usize = 8;
        const SIZE: usize = 700;
        for k in 0..SENDERS {
            let left = left.clone();
            tokio::spawn(async move {
                left.send(Bytes::from(vec![k as u8; SIZE])).await.unwrap();
            });
        }

        // Arrival order is unspecified, but every message must come out
        // whole: SIZE bytes of a single sender's pattern.
        let mut seen = vec![false; SENDERS];
        for _ in 0..SENDERS {
            let (tx, rx) = oneshot::channel();
            right.receive(Collector::new(tx));
            let (_, message) = rx.await.unwrap();
            assert_eq!(message.len(), SIZE);
            let k = message[0] as usize;
            assert_eq!(message, vec![k as u8; SIZE]);
            assert!(!seen[k], "message from sender {k} seen twice");
            seen[k] = true;
        }
    }

    #[tokio::test]
    async fn test_close_fires_closed_exactly_once() {
        static CLOSED_CALLS: AtomicUsize = AtomicUsize::new(0);

        struct CountClosed;
        impl MessageReceiver for CountClosed {
            fn receive(&mut self, _: usize, _: usize, _: &[u8]) {}
            fn process(self: Box<Self>, _: &MessageChannel) {
                panic!("no message expected");
            }
            fn closed(self: Box<Self>, error: Option<Error>) {
                assert!(error.is_none());
                CLOSED_CALLS.fetch_add(1, Ordering::AcqRel);
            }
        }

        let config = ChannelConfig::default();
        let (left, _right) = pair(&config);
        left.receive(Box::new(CountClosed));
        left.receive(Box::new(CountClosed));

        left.close();
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        assert_eq!(CLOSED_CALLS.load(Ordering::Acquire), 2);

        // Registration after termination is turned away immediately.
        let (tx, rx) = oneshot::channel();
        left.receive(Box::new(OnClosed(tx)));
        assert!(rx.await.unwrap().is_none());

        let err = left.send(Bytes::from_static(b"x")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::IoClosed);
    }

    #[tokio::test]
    async fn test_peer_close_notifies_pending_receiver() {
        let config = ChannelConfig::default();
        let (left, right) = pair(&config);

        let (tx, rx) = oneshot::channel();
        right.receive(Box::new(OnClosed(tx)));

        left.close();
        // Clean peer shutdown surfaces as closed without an error.
        assert!(rx.await.unwrap().is_none());
        assert!(right.is_closed());
    }

    #[tokio::test]
    async fn test_pipelined_messages_split_correctly() {
        let config = ChannelConfig::default();
        let (left, right) = pair(&config);

        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        right.receive(Collector::new(tx1));
        right.receive(Collector::new(tx2));

        // Both frames usually land in the peer buffer back to back.
        left.send(Bytes::from_static(b"first")).await.unwrap();
        left.send(Bytes::from_static(b"second")).await.unwrap();

        assert_eq!(rx1.await.unwrap().1, b"first");
        assert_eq!(rx2.await.unwrap().1, b"second");
    }

    #[test]
    fn test_default_config() {
        let config = ChannelConfig::default();
        assert_eq!(config.max_message_size, 1 << 16);
        assert_eq!(config.send_queue_len, 1024);
    }
}

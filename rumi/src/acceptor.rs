use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::net::TcpListener;

use crate::{
    channel::{ChannelConfig, MessageChannel},
    error::{Error, ErrorKind, Result},
    task_supervisor::TaskSupervisor,
};

/// Callback target for one `accept` invocation.
pub trait AcceptListener: Send + 'static {
    /// A peer connected; the listener now owns the channel. Re-arming the
    /// acceptor for the next peer is the listener's responsibility.
    fn established(self: Box<Self>, channel: MessageChannel);

    /// The accept failed or the acceptor was closed first.
    fn closed(self: Box<Self>, error: Error);
}

/// Accepts message channels from remote endpoints, one per `accept` call.
pub struct MessageAcceptor {
    socket: Mutex<Option<Arc<TcpListener>>>,
    local_addr: SocketAddr,
    config: ChannelConfig,
    supervisor: TaskSupervisor,
}

impl MessageAcceptor {
    /// # Errors
    pub async fn bind(addr: SocketAddr, config: &ChannelConfig) -> Result<Self> {
        let socket = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::new(ErrorKind::BindFailed, e.to_string()))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| Error::new(ErrorKind::BindFailed, e.to_string()))?;
        tracing::info!("accepting message channels on {local_addr}");

        Ok(Self {
            socket: Mutex::new(Some(Arc::new(socket))),
            local_addr,
            config: config.clone(),
            supervisor: TaskSupervisor::create(),
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns immediately and delivers at most one channel to `listener`
    /// on a worker task. Call again to receive the next channel.
    pub fn accept<L: AcceptListener>(&self, listener: L) {
        let listener = Box::new(listener);
        let Some(socket) = self
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        else {
            listener.closed(Error::new(
                ErrorKind::IoClosed,
                "acceptor is closed".into(),
            ));
            return;
        };

        let guard = self.supervisor.track();
        let config = self.config.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = guard.stopped() => {
                    listener.closed(Error::new(
                        ErrorKind::IoClosed,
                        "acceptor is closed".into(),
                    ));
                }
                accepted = socket.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::info!("established message channel from {peer}");
                        listener.established(MessageChannel::from_tcp(stream, &config));
                    }
                    Err(e) => {
                        tracing::warn!("accept failed: {e}");
                        listener.closed(Error::new(ErrorKind::AcceptFailed, e.to_string()));
                    }
                }
            }
        });
    }

    /// Stops accepting and releases the bound address. Channels already
    /// established are untouched.
    pub fn close(&self) {
        self.supervisor.stop();
        self.socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Waits for close and for all in-flight accepts to resolve.
    pub async fn join(&self) {
        self.supervisor.join().await;
    }
}

impl std::fmt::Debug for MessageAcceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageAcceptor")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

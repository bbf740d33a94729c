use bytes::BytesMut;

use crate::{
    channel::{MessageChannel, MessageReceiver},
    connection::ChannelConnection,
    error::Error,
    skeleton::Skeleton,
};

/// Message receiver that feeds each inbound message through a skeleton.
///
/// The message bytes form one invocation frame. Before dispatching, the
/// receiver re-arms itself on the channel so pipelined invocations keep
/// flowing; a synchronous reply closes the channel and quietly retires
/// the re-armed receiver.
pub struct SkeletonReceiver<S> {
    skeleton: Skeleton<S>,
    message: BytesMut,
}

impl<S> SkeletonReceiver<S> {
    pub fn new(skeleton: Skeleton<S>) -> Self {
        Self {
            skeleton,
            message: BytesMut::new(),
        }
    }
}

impl<S: Send + Sync + 'static> MessageReceiver for SkeletonReceiver<S> {
    fn receive(&mut self, total_size: usize, _offset: usize, chunk: &[u8]) {
        if self.message.is_empty() {
            self.message.reserve(total_size);
        }
        self.message.extend_from_slice(chunk);
    }

    fn process(self: Box<Self>, channel: &MessageChannel) {
        let skeleton = self.skeleton;
        channel.receive(Box::new(SkeletonReceiver::new(skeleton.clone())));

        let mut conn = ChannelConnection::new(self.message.freeze(), channel.clone());
        tokio::spawn(async move {
            if let Err(e) = skeleton.invoke(&mut conn).await {
                tracing::error!("invocation failed: {e}");
            }
        });
    }

    fn closed(self: Box<Self>, error: Option<Error>) {
        match error {
            Some(error) => tracing::warn!("channel closed: {error}"),
            None => tracing::debug!("channel closed"),
        }
    }
}

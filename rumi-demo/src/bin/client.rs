use bytes::Bytes;
use clap::Parser;
use rumi::{
    BufferedReader, ChannelConfig, Error, MessageChannel, MessageReceiver, RemoteParameter, Value,
    wire,
};
use rumi_demo::{ADD, FIRE};
use tokio::sync::oneshot;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Server address.
    #[arg(default_value = "127.0.0.1:8000")]
    pub addr: std::net::SocketAddr,

    #[arg(long, default_value_t = 2)]
    pub a: i32,

    #[arg(long, default_value_t = 3)]
    pub b: i32,

    /// Message for the fire-and-forget call.
    #[arg(long, default_value = "hello")]
    pub message: String,
}

struct Reply {
    bytes: Vec<u8>,
    tx: oneshot::Sender<Vec<u8>>,
}

impl MessageReceiver for Reply {
    fn receive(&mut self, _total_size: usize, _offset: usize, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    fn process(self: Box<Self>, _channel: &MessageChannel) {
        let _ = self.tx.send(self.bytes);
    }

    fn closed(self: Box<Self>, error: Option<Error>) {
        tracing::warn!("no reply: channel closed ({error:?})");
    }
}

async fn connect(addr: std::net::SocketAddr) -> MessageChannel {
    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    MessageChannel::from_tcp(stream, &ChannelConfig::default())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    // Synchronous call: the server replies and closes the channel.
    let channel = connect(args.addr).await;
    let mut frame = Vec::new();
    wire::write_method_id(&mut frame, ADD).await.unwrap();
    wire::write_param(&mut frame, &RemoteParameter::I32, &Value::I32(args.a))
        .await
        .unwrap();
    wire::write_param(&mut frame, &RemoteParameter::I32, &Value::I32(args.b))
        .await
        .unwrap();

    let (tx, rx) = oneshot::channel();
    channel.receive(Box::new(Reply {
        bytes: Vec::new(),
        tx,
    }));
    channel.send(Bytes::from(frame)).await.unwrap();

    let reply = rx.await.unwrap();
    let mut reader = BufferedReader::new(reply.as_slice());
    let value = wire::read_reply(&mut reader, Some(&RemoteParameter::I32))
        .await
        .unwrap();
    println!("add({}, {}) = {value:?}", args.a, args.b);

    // Fire-and-forget call: no reply frame exists.
    let channel = connect(args.addr).await;
    let mut frame = Vec::new();
    wire::write_method_id(&mut frame, FIRE).await.unwrap();
    wire::write_param(
        &mut frame,
        &RemoteParameter::Str,
        &Value::Str(args.message.clone()),
    )
    .await
    .unwrap();
    channel.send(Bytes::from(frame)).await.unwrap();
    println!("fired {:?}", args.message);

    // Close flushes the accepted frame before the transport shuts down,
    // but the runtime must outlive the send loop for that to happen.
    channel.close();
    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
}

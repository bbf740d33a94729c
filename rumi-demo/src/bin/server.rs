use std::sync::Arc;

use clap::Parser;
use rumi::{
    AcceptListener, ChannelConfig, Error, MessageAcceptor, MessageChannel, Skeleton,
    SkeletonReceiver, skeleton_factory_for,
};
use rumi_demo::Calculator;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Listen address.
    #[arg(default_value = "0.0.0.0:8000")]
    pub addr: std::net::SocketAddr,
}

struct Serve {
    acceptor: Arc<MessageAcceptor>,
    skeleton: Skeleton<Calculator>,
}

impl AcceptListener for Serve {
    fn established(self: Box<Self>, channel: MessageChannel) {
        tracing::info!("accepted: {:?}", channel.remote_addr());
        self.acceptor.accept(Serve {
            acceptor: self.acceptor.clone(),
            skeleton: self.skeleton.clone(),
        });
        channel.receive(Box::new(SkeletonReceiver::new(self.skeleton)));
    }

    fn closed(self: Box<Self>, error: Error) {
        tracing::info!("accept loop stopped: {error}");
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    let factory = skeleton_factory_for::<Calculator>().unwrap();
    let skeleton = factory.create_skeleton(Arc::new(Calculator::default()));

    let acceptor = Arc::new(
        MessageAcceptor::bind(args.addr, &ChannelConfig::default())
            .await
            .unwrap(),
    );
    tracing::info!("Serving calculator on {}...", acceptor.local_addr());
    acceptor.accept(Serve {
        acceptor: acceptor.clone(),
        skeleton,
    });

    tokio::signal::ctrl_c().await.unwrap();
    acceptor.close();
    acceptor.join().await;
}

//! # Rumi - Bidirectional Remote Method Invocation for Rust
//!
//! Rumi is the server-side core of a bidirectional RMI runtime: it reads
//! method invocations off a connection, dispatches them to a server object
//! through a hash-indexed method table, and writes replies (or marshalled
//! throwables) back, layered over an asynchronous framed message channel.
//!
//! ## Features
//!
//! - **Skeleton dispatch**: per-interface dispatchers with O(1) method
//!   lookup that survives identifier hash collisions
//! - **Sync and async methods**: synchronous calls reply and close the
//!   connection; fire-and-forget calls never write a reply frame
//! - **Message channels**: fixed-maximum-size framed messages with
//!   serialized sends and FIFO receive callbacks
//! - **One-shot accept**: each `accept` call delivers exactly one channel;
//!   listeners re-arm themselves
//! - **Async/Await**: built on tokio for efficient asynchronous I/O
//!
//! ## Serving a remote interface
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rumi::{
//!     AcceptListener, ChannelConfig, MessageAcceptor, MessageChannel,
//!     SkeletonReceiver, skeleton_factory_for,
//! };
//!
//! let factory = skeleton_factory_for::<Calculator>()?;
//! let skeleton = factory.create_skeleton(Arc::new(Calculator::default()));
//!
//! let acceptor = Arc::new(
//!     MessageAcceptor::bind(addr, &ChannelConfig::default()).await?,
//! );
//! acceptor.accept(Serve { acceptor: acceptor.clone(), skeleton });
//! ```
//!
//! where `Serve` re-arms the acceptor from `established` and registers a
//! [`SkeletonReceiver`] on each new channel.

#![forbid(unsafe_code)]

/// Error types and error handling utilities.
mod error;
pub use error::{Error, ErrorKind, Result};

/// Introspected remote interface descriptions.
mod info;
pub use info::{MethodId, RemoteInfo, RemoteMethod, RemoteParameter};

/// Buffered byte input for the codec.
mod buffered;
pub use buffered::BufferedReader;

/// Wire codec for invocation and reply frames.
pub mod wire;
pub use wire::Value;

/// Connections an invocation is served over.
mod connection;
pub use connection::{ChannelConnection, Connection, StreamConnection};

/// Hash-indexed dispatch tables.
mod table;
pub use table::{DispatchEntry, MethodFuture, MethodRegistry, MethodTable, MethodThunk};

/// Skeleton dispatchers and their factories.
mod skeleton;
pub use skeleton::{RemoteService, Skeleton, SkeletonFactory};

/// Process-global weak-valued factory cache.
mod cache;
pub use cache::skeleton_factory_for;

/// Framed message channels with FIFO receive.
mod channel;
pub use channel::{ChannelConfig, MessageChannel, MessageReceiver};

/// One-shot channel acceptor.
mod acceptor;
pub use acceptor::{AcceptListener, MessageAcceptor};

/// Bridge feeding channel messages into skeleton dispatch.
mod dispatch;
pub use dispatch::SkeletonReceiver;

/// Task lifecycle management.
mod task_supervisor;
pub use task_supervisor::{TaskGuard, TaskSupervisor};

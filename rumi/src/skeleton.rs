use std::sync::Arc;

use crate::{
    connection::Connection,
    error::{Error, ErrorKind, Result},
    info::{RemoteInfo, RemoteMethod, RemoteParameter},
    table::{MethodRegistry, MethodTable},
    wire::{self, Value},
};

/// A server type dispatchable through a skeleton.
///
/// `remote_info` is the introspected method set of the remote interface;
/// `export` registers one invocation thunk per method id.
pub trait RemoteService: Send + Sync + Sized + 'static {
    /// # Errors
    fn remote_info() -> Result<RemoteInfo>;

    fn export(registry: &mut MethodRegistry<Self>);
}

/// Produces skeletons for one remote interface.
///
/// Factories are cheap to share and are normally obtained through
/// [`crate::skeleton_factory_for`], which memoizes them per type with weak
/// references.
pub struct SkeletonFactory<S> {
    info: Arc<RemoteInfo>,
    table: Arc<MethodTable<S>>,
}

impl<S: RemoteService> SkeletonFactory<S> {
    /// # Errors
    ///
    /// `InvocationError` if the interface and the exported thunks do not
    /// line up.
    pub fn new() -> Result<Self> {
        let info = S::remote_info()?;
        let mut registry = MethodRegistry::default();
        S::export(&mut registry);
        let table = MethodTable::build(&info, registry)?;
        Ok(Self {
            info: Arc::new(info),
            table: Arc::new(table),
        })
    }

    #[must_use]
    pub fn remote_info(&self) -> &RemoteInfo {
        &self.info
    }

    #[must_use]
    pub fn create_skeleton(&self, server: Arc<S>) -> Skeleton<S> {
        Skeleton {
            server,
            table: self.table.clone(),
        }
    }
}

/// Server-side dispatcher for one remote interface.
///
/// Immutable after construction and reentrant as long as each invocation
/// has its connection to itself.
pub struct Skeleton<S> {
    server: Arc<S>,
    table: Arc<MethodTable<S>>,
}

impl<S: Send + Sync> Skeleton<S> {
    /// Reads one invocation off the connection, dispatches it and writes
    /// the reply.
    ///
    /// Synchronous methods reply with a status frame (or a marshalled
    /// throwable on failure) and close the connection. Asynchronous
    /// methods write nothing and leave the connection to the caller, who
    /// may already have handed it to the target for streaming.
    ///
    /// # Errors
    ///
    /// `NoSuchMethod` if the method id resolves to nothing; no reply is
    /// written and the connection is left untouched for the caller to
    /// recover or drop. A failed asynchronous target surfaces as
    /// `AsynchronousInvocation` with the target's error as cause, since
    /// there is no reply frame to carry it.
    pub async fn invoke<C: Connection>(&self, conn: &mut C) -> Result<()> {
        let method_id = wire::read_method_id(conn.reader()).await?;
        let entry = self.table.lookup(method_id)?;

        let params = entry.method().params();
        let mut args = Vec::with_capacity(params.len());
        for param in params {
            args.push(wire::read_param(conn.reader(), param).await?);
        }

        let outcome = entry.invoke(&self.server, args).await;

        if entry.method().is_asynchronous() {
            return match outcome {
                Ok(_) => Ok(()),
                Err(error) => Err(Error::with_cause(
                    ErrorKind::AsynchronousInvocation,
                    format!("{} raised", entry.method().name()),
                    error,
                )),
            };
        }

        let written = match outcome {
            Ok(value) => Self::write_reply(conn, entry.method(), value).await,
            Err(error) => wire::write_throwable(conn.writer(), &error).await,
        };
        let closed = conn.close().await;
        written?;
        closed
    }

    async fn write_reply<C: Connection>(
        conn: &mut C,
        method: &RemoteMethod,
        value: Option<Value>,
    ) -> Result<()> {
        match (method.returns(), value) {
            (Some(RemoteParameter::Bool), Some(Value::Bool(value))) => {
                wire::write_ok_bool(conn.writer(), value).await
            }
            (Some(param), Some(value)) => {
                wire::write_ok(conn.writer()).await?;
                wire::write_param(conn.writer(), param, &value).await
            }
            (Some(_), None) => {
                let error = Error::new(
                    ErrorKind::InvocationError,
                    format!("{} produced no return value", method.name()),
                );
                wire::write_throwable(conn.writer(), &error).await
            }
            (None, _) => wire::write_ok(conn.writer()).await,
        }
    }
}

impl<S> Clone for Skeleton<S> {
    fn clone(&self) -> Self {
        Self {
            server: self.server.clone(),
            table: self.table.clone(),
        }
    }
}

impl<S> std::fmt::Debug for Skeleton<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Skeleton")
            .field("methods", &self.table.len())
            .finish()
    }
}

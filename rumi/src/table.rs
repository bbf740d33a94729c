use std::{collections::HashMap, pin::Pin, sync::Arc};

use foldhash::fast::RandomState;

use crate::{
    error::{Error, ErrorKind, Result},
    info::{MethodId, RemoteInfo, RemoteMethod},
    wire::Value,
};

pub type MethodFuture = Pin<Box<dyn Future<Output = Result<Option<Value>>> + Send>>;

/// Invocation thunk bound to one remote method: takes the server and the
/// decoded arguments, returns the return value (`None` for void).
pub type MethodThunk<S> = Box<dyn Fn(Arc<S>, Vec<Value>) -> MethodFuture + Send + Sync>;

/// Collects the thunk for each remote method before the table is built.
pub struct MethodRegistry<S> {
    thunks: HashMap<MethodId, MethodThunk<S>, RandomState>,
}

impl<S> Default for MethodRegistry<S> {
    fn default() -> Self {
        Self {
            thunks: HashMap::default(),
        }
    }
}

impl<S> MethodRegistry<S> {
    pub fn register<F>(&mut self, id: MethodId, thunk: F)
    where
        F: Fn(Arc<S>, Vec<Value>) -> MethodFuture + Send + Sync + 'static,
    {
        self.thunks.insert(id, Box::new(thunk));
    }
}

/// One dispatchable method: descriptor plus invocation thunk.
pub struct DispatchEntry<S> {
    method: RemoteMethod,
    ordinal: usize,
    thunk: MethodThunk<S>,
}

impl<S> std::fmt::Debug for DispatchEntry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchEntry")
            .field("method", &self.method)
            .field("ordinal", &self.ordinal)
            .finish_non_exhaustive()
    }
}

impl<S> DispatchEntry<S> {
    #[must_use]
    pub fn method(&self) -> &RemoteMethod {
        &self.method
    }

    /// Dense index of this entry, stable across rebuilds of the same info.
    #[must_use]
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn invoke(&self, server: &Arc<S>, args: Vec<Value>) -> MethodFuture {
        (self.thunk)(server.clone(), args)
    }
}

/// Hash-indexed dispatch table over the methods of one remote interface.
///
/// Entries are grouped by `MethodId::hash32` and laid out densely in
/// group-iteration order, so the ordinal of a method depends only on the
/// interface definition. Lookup resolves the hash group and rescans it by
/// id equality; collision groups are almost always a single entry.
pub struct MethodTable<S> {
    entries: Vec<DispatchEntry<S>>,
    slots: HashMap<u32, Vec<usize>, RandomState>,
}

impl<S> MethodTable<S> {
    /// # Errors
    ///
    /// Returns `InvocationError` if the registry does not line up with the
    /// interface: a method without a thunk, or a thunk without a method.
    pub fn build(info: &RemoteInfo, mut registry: MethodRegistry<S>) -> Result<Self> {
        // Group ids by hash, preserving definition order within and across
        // groups.
        let mut group_index: HashMap<u32, usize, RandomState> = HashMap::default();
        let mut groups: Vec<(u32, Vec<&RemoteMethod>)> = Vec::new();
        for method in info.methods() {
            let hash = method.method_id().hash32();
            let index = *group_index.entry(hash).or_insert_with(|| {
                groups.push((hash, Vec::with_capacity(2)));
                groups.len() - 1
            });
            groups[index].1.push(method);
        }

        let mut entries = Vec::with_capacity(info.len());
        let mut slots: HashMap<u32, Vec<usize>, RandomState> = HashMap::default();
        for (hash, methods) in groups {
            let mut ordinals = Vec::with_capacity(methods.len());
            for method in methods {
                let thunk = registry.thunks.remove(&method.method_id()).ok_or_else(|| {
                    Error::new(
                        ErrorKind::InvocationError,
                        format!("no thunk registered for {}", method.name()),
                    )
                })?;
                let ordinal = entries.len();
                ordinals.push(ordinal);
                entries.push(DispatchEntry {
                    method: method.clone(),
                    ordinal,
                    thunk,
                });
            }
            slots.insert(hash, ordinals);
        }

        if let Some(id) = registry.thunks.keys().next() {
            return Err(Error::new(
                ErrorKind::InvocationError,
                format!("thunk registered for unknown method id {id}"),
            ));
        }

        Ok(Self { entries, slots })
    }

    /// Resolves a method id to its dispatch entry.
    ///
    /// # Errors
    ///
    /// `NoSuchMethod` if no entry's id equals `id`; a colliding hash alone
    /// never matches.
    pub fn lookup(&self, id: MethodId) -> Result<&DispatchEntry<S>> {
        if let Some(ordinals) = self.slots.get(&id.hash32()) {
            for &ordinal in ordinals {
                let entry = &self.entries[ordinal];
                if entry.method.method_id() == id {
                    return Ok(entry);
                }
            }
        }
        Err(Error::new(ErrorKind::NoSuchMethod, id.to_string()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &DispatchEntry<S>> {
        self.entries.iter()
    }
}

impl<S> std::fmt::Debug for MethodTable<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodTable")
            .field("methods", &self.entries.len())
            .field("slots", &self.slots.len())
            .finish()
    }
}

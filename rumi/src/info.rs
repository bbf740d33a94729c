use crate::error::{Error, ErrorKind, Result};

/// Stable identifier for a remote method, distinguishing overloads.
///
/// The full 64-bit value is authoritative for equality. `hash32` folds the
/// two halves together and is the dispatch index; unequal identifiers may
/// share a hash and the method table must disambiguate by equality.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(u64);

impl MethodId {
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn hash32(self) -> u32 {
        ((self.0 >> 32) as u32) ^ (self.0 as u32)
    }
}

impl std::fmt::Display for MethodId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Describes one parameter or return value of a remote method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteParameter {
    Bool,
    Byte,
    I16,
    U16,
    I32,
    I64,
    F32,
    F64,
    Char,
    Str,
    /// An opaque serialized object.
    Object,
    /// A reference to another remote interface, identified by its id.
    Remote(u64),
}

/// One method of a remote interface, as reported by the introspector.
#[derive(Clone, Debug)]
pub struct RemoteMethod {
    name: String,
    method_id: MethodId,
    params: Vec<RemoteParameter>,
    returns: Option<RemoteParameter>,
    asynchronous: bool,
}

impl RemoteMethod {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        method_id: MethodId,
        params: Vec<RemoteParameter>,
        returns: Option<RemoteParameter>,
    ) -> Self {
        Self {
            name: name.into(),
            method_id,
            params,
            returns,
            asynchronous: false,
        }
    }

    /// Marks the method as fire-and-forget: no reply frame is ever written
    /// and the connection is left to the caller after dispatch.
    #[must_use]
    pub fn asynchronous(mut self) -> Self {
        self.asynchronous = true;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn method_id(&self) -> MethodId {
        self.method_id
    }

    #[must_use]
    pub fn params(&self) -> &[RemoteParameter] {
        &self.params
    }

    #[must_use]
    pub fn returns(&self) -> Option<&RemoteParameter> {
        self.returns.as_ref()
    }

    #[must_use]
    pub fn is_asynchronous(&self) -> bool {
        self.asynchronous
    }
}

/// The immutable method set of one remote interface, in definition order.
///
/// Method names may repeat (overloads); method ids may not.
#[derive(Clone, Debug)]
pub struct RemoteInfo {
    methods: Vec<RemoteMethod>,
}

impl RemoteInfo {
    /// # Errors
    ///
    /// Returns `InvocationError` if two methods share a method id.
    pub fn new(methods: Vec<RemoteMethod>) -> Result<Self> {
        let mut seen = std::collections::HashSet::with_capacity(methods.len());
        for method in &methods {
            if !seen.insert(method.method_id()) {
                return Err(Error::new(
                    ErrorKind::InvocationError,
                    format!(
                        "duplicate method id {} for {}",
                        method.method_id(),
                        method.name()
                    ),
                ));
            }
        }
        Ok(Self { methods })
    }

    #[must_use]
    pub fn methods(&self) -> &[RemoteMethod] {
        &self.methods
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_id_hash_fold() {
        let id = MethodId::new(0x1234_5678_0000_0001);
        assert_eq!(id.hash32(), 0x1234_5678 ^ 0x0000_0001);
        assert_eq!(id.to_string(), "1234567800000001");

        // Distinct ids sharing a hash are legal.
        let a = MethodId::new(0x0000_0001_0000_0001);
        let b = MethodId::new(0x0000_0002_0000_0002);
        assert_ne!(a, b);
        assert_eq!(a.hash32(), b.hash32());
    }

    #[test]
    fn test_remote_info_rejects_duplicate_ids() {
        let id = MethodId::new(7);
        let methods = vec![
            RemoteMethod::new("a", id, vec![], None),
            RemoteMethod::new("b", id, vec![], None),
        ];
        let err = RemoteInfo::new(methods).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvocationError);
    }

    #[test]
    fn test_remote_info_allows_overloads() {
        let methods = vec![
            RemoteMethod::new("get", MethodId::new(1), vec![RemoteParameter::I32], None),
            RemoteMethod::new("get", MethodId::new(2), vec![RemoteParameter::Str], None),
        ];
        let info = RemoteInfo::new(methods).unwrap();
        assert_eq!(info.len(), 2);
        assert_eq!(info.methods()[0].name(), info.methods()[1].name());
    }
}

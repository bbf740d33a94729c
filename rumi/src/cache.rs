use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::{Arc, Mutex, OnceLock, PoisonError, Weak},
};

use foldhash::fast::RandomState;

use crate::{
    error::{Error, ErrorKind, Result},
    skeleton::{RemoteService, SkeletonFactory},
};

type FactoryCache = Mutex<HashMap<TypeId, Weak<dyn Any + Send + Sync>, RandomState>>;

fn cache() -> &'static FactoryCache {
    static CACHE: OnceLock<FactoryCache> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::default()))
}

/// Returns the process-wide skeleton factory for `S`, synthesizing it on
/// first use.
///
/// The cache holds factories weakly: once every skeleton and caller has
/// let go, the entry may be reclaimed and a later call synthesizes a
/// fresh, behaviorally identical factory. Racing first calls serialize
/// under the cache lock and observe the same instance.
///
/// # Errors
///
/// `InvocationError` when the interface of `S` cannot be assembled into a
/// dispatch table.
pub fn skeleton_factory_for<S: RemoteService>() -> Result<Arc<SkeletonFactory<S>>> {
    let mut cache = cache().lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(weak) = cache.get(&TypeId::of::<S>())
        && let Some(live) = weak.upgrade()
    {
        return live.downcast::<SkeletonFactory<S>>().map_err(|_| {
            Error::new(
                ErrorKind::InvocationError,
                "factory cache holds a foreign type".into(),
            )
        });
    }

    let factory = Arc::new(SkeletonFactory::<S>::new()?);
    let erased: Arc<dyn Any + Send + Sync> = factory.clone();
    cache.insert(TypeId::of::<S>(), Arc::downgrade(&erased));
    Ok(factory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        info::{MethodId, RemoteInfo, RemoteMethod},
        table::MethodRegistry,
        wire::Value,
    };

    macro_rules! echo_service {
        ($name:ident) => {
            struct $name;

            impl RemoteService for $name {
                fn remote_info() -> Result<RemoteInfo> {
                    RemoteInfo::new(vec![RemoteMethod::new(
                        "echo",
                        MethodId::new(1),
                        vec![crate::info::RemoteParameter::Str],
                        Some(crate::info::RemoteParameter::Str),
                    )])
                }

                fn export(registry: &mut MethodRegistry<Self>) {
                    registry.register(MethodId::new(1), |_echo: Arc<$name>, mut args| {
                        Box::pin(
                            async move { Ok(Some(Value::Str(args.remove(0).as_str()?.into()))) },
                        )
                    });
                }
            }
        };
    }

    // Each test gets its own service type; the cache is process-global and
    // tests run concurrently.
    echo_service!(SharedEcho);
    echo_service!(ReclaimedEcho);

    #[test]
    fn test_factory_is_shared_while_alive() {
        let first = skeleton_factory_for::<SharedEcho>().unwrap();
        let second = skeleton_factory_for::<SharedEcho>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.remote_info().len(), 1);
    }

    #[test]
    fn test_factory_is_reclaimed_and_rebuilt() {
        let first = skeleton_factory_for::<ReclaimedEcho>().unwrap();
        let weak = Arc::downgrade(&first);
        drop(first);
        assert!(weak.upgrade().is_none());

        // A fresh factory works just as well.
        let rebuilt = skeleton_factory_for::<ReclaimedEcho>().unwrap();
        assert_eq!(rebuilt.remote_info().len(), 1);
    }
}

//! Process-wide dispatcher registry
//!
//! One [`Dispatcher`] per application. Contexts that differ only by component
//! (or by case and surrounding whitespace in the application id) share it.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use crate::collector::ReqwestTransport;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::store::SqliteQueueStore;

/// Where a producer is calling from.
#[derive(Debug, Clone)]
pub struct AppContext {
    application_id: String,
    component: Option<String>,
    data_dir: Option<PathBuf>,
}

impl AppContext {
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            component: None,
            data_dir: None,
        }
    }

    /// Name the component (screen, module, thread) within the application
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Keep the queue database somewhere other than `Config::data_dir()`
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    pub fn component(&self) -> Option<&str> {
        self.component.as_deref()
    }

    /// Application-level identity used as the registry key
    pub fn identity(&self) -> Result<ContextId> {
        let id = self.application_id.trim().to_lowercase();
        if id.is_empty() {
            return Err(Error::Config("application id must not be empty".to_string()));
        }
        Ok(ContextId(id))
    }

    /// Queue database path: `<data_dir>/<identity>.queue.db`
    pub fn queue_path(&self) -> Result<PathBuf> {
        let id = self.identity()?;
        let file_stem: String = id
            .as_str()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let dir = self.data_dir.clone().unwrap_or_else(Config::data_dir);
        Ok(dir.join(format!("{}.queue.db", file_stem)))
    }
}

/// Normalized application identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextId(String);

impl ContextId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Table of live dispatchers, keyed by application identity.
#[derive(Default)]
pub struct Registry {
    instances: Mutex<HashMap<ContextId, Arc<Dispatcher>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }

    fn instances(&self) -> MutexGuard<'_, HashMap<ContextId, Arc<Dispatcher>>> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the dispatcher for `context`, building it with `create` if absent.
    ///
    /// `create` runs under the registry lock, so concurrent callers for the
    /// same application never build two dispatchers.
    pub fn get_or_create<F>(&self, context: &AppContext, create: F) -> Result<Arc<Dispatcher>>
    where
        F: FnOnce(&ContextId) -> Result<Dispatcher>,
    {
        let id = context.identity()?;
        let mut instances = self.instances();
        if let Some(existing) = instances.get(&id) {
            return Ok(Arc::clone(existing));
        }

        let dispatcher = Arc::new(create(&id)?);
        tracing::info!(application = %id, component = ?context.component(), "Registered dispatcher");
        instances.insert(id, Arc::clone(&dispatcher));
        Ok(dispatcher)
    }

    /// Return the dispatcher for `context`, opening its SQLite queue and an
    /// HTTP transport from `config` on first use.
    pub fn get_instance(&self, context: &AppContext, config: &Config) -> Result<Arc<Dispatcher>> {
        self.get_or_create(context, |id| {
            let store =
                SqliteQueueStore::open(&context.queue_path()?, config.dispatch.max_queue_rows)?;
            let transport = ReqwestTransport::new(&config.dispatch)?;
            Dispatcher::spawn(id.as_str(), config.dispatch.clone(), Arc::new(store), transport)
        })
    }

    /// Existing dispatcher for `context`, if any
    pub fn get(&self, context: &AppContext) -> Option<Arc<Dispatcher>> {
        let id = context.identity().ok()?;
        self.instances().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.instances().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances().is_empty()
    }

    /// Forget every dispatcher. Workers exit once their last handle drops.
    pub fn reset(&self) {
        let drained: Vec<_> = self.instances().drain().collect();
        tracing::debug!(count = drained.len(), "Registry reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{CollectorRequest, HttpReply, Transport};
    use crate::config::DispatchConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct Offline;

    impl Transport for Offline {
        async fn post_batch(&self, _url: &str, _request: &CollectorRequest) -> Result<HttpReply> {
            Err(Error::Connect("offline".to_string()))
        }

        async fn get(&self, _url: &str) -> Result<HttpReply> {
            Err(Error::Connect("offline".to_string()))
        }
    }

    fn spawn_offline(id: &ContextId) -> Result<Dispatcher> {
        let store = SqliteQueueStore::open_in_memory(100)?;
        Dispatcher::spawn(
            id.as_str(),
            DispatchConfig::default(),
            Arc::new(store),
            Offline,
        )
    }

    #[test]
    fn test_identity_normalization() {
        let a = AppContext::new("  Shop.App ").with_component("checkout");
        let b = AppContext::new("shop.app").with_component("cart");
        assert_eq!(a.identity().unwrap(), b.identity().unwrap());
        assert_eq!(a.identity().unwrap().as_str(), "shop.app");
        assert!(AppContext::new("   ").identity().is_err());
    }

    #[test]
    fn test_queue_path_is_sanitized() {
        let context = AppContext::new("com/example app").with_data_dir("/tmp/tally-test");
        let path = context.queue_path().unwrap();
        assert_eq!(path, PathBuf::from("/tmp/tally-test/com_example_app.queue.db"));
    }

    #[test]
    fn test_one_dispatcher_per_application() {
        let registry = Registry::new();
        let created = AtomicUsize::new(0);
        let create = |id: &ContextId| {
            created.fetch_add(1, Ordering::SeqCst);
            spawn_offline(id)
        };

        let first = registry
            .get_or_create(&AppContext::new("shop").with_component("a"), create)
            .unwrap();
        let second = registry
            .get_or_create(&AppContext::new("SHOP").with_component("b"), create)
            .unwrap();
        let other = registry
            .get_or_create(&AppContext::new("blog"), create)
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_failed_creation_is_not_registered() {
        let registry = Registry::new();
        let result = registry.get_or_create(&AppContext::new("shop"), |_| {
            Err(Error::Config("nope".to_string()))
        });
        assert!(result.is_err());
        assert!(registry.is_empty());
        assert!(registry.get(&AppContext::new("shop")).is_none());
    }

    #[test]
    fn test_reset_clears_entries() {
        let registry = Registry::new();
        let first = registry
            .get_or_create(&AppContext::new("shop"), spawn_offline)
            .unwrap();
        registry.reset();
        assert!(registry.is_empty());

        let second = registry
            .get_or_create(&AppContext::new("shop"), spawn_offline)
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_get_instance_opens_queue_in_data_dir() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::new();
        let context = AppContext::new("Shop").with_data_dir(dir.path());

        let dispatcher = registry.get_instance(&context, &Config::default()).unwrap();
        assert_eq!(dispatcher.name(), "shop");
        assert!(dir.path().join("shop.queue.db").exists());
        assert!(Arc::ptr_eq(
            &dispatcher,
            &registry.get_instance(&context, &Config::default()).unwrap()
        ));
    }
}

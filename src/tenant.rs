use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::compactor;
use crate::engine::Engine;
use crate::images::FsImageStore;
use crate::limits::*;
use crate::notify::{LogNotifier, Notifier, NotifyHub, RetryPolicy};

/// Manages per-property engines. Each property gets its own Engine, WAL,
/// notifier worker, image directory and compactor.
/// Property = database name from the pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    image_dir: PathBuf,
    compact_threshold: u64,
    max_tenants: usize,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            image_dir: data_dir.join("images"),
            data_dir,
            compact_threshold,
            max_tenants: MAX_TENANTS,
            notifier: Arc::new(LogNotifier),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_image_dir(mut self, image_dir: PathBuf) -> Self {
        self.image_dir = image_dir;
        self
    }

    /// Lower the property cap below `MAX_TENANTS`.
    pub fn with_max_tenants(mut self, max_tenants: usize) -> Self {
        self.max_tenants = max_tenants.min(MAX_TENANTS);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>, retry: RetryPolicy) -> Self {
        self.notifier = notifier;
        self.retry = retry;
        self
    }

    /// Get or lazily create the engine for a property.
    /// Names that sanitize to the same file name share one engine.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "property name too long",
            ));
        }

        // Only characters that are safe in a file name.
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty property name",
            ));
        }

        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= self.max_tenants {
            return Err(std::io::Error::other("too many properties"));
        }

        // Two connections may race to open the same property; only one engine
        // (and one WAL writer) may win.
        let slot = match self.engines.entry(safe_name.clone()) {
            dashmap::Entry::Occupied(existing) => return Ok(existing.get().clone()),
            dashmap::Entry::Vacant(slot) => slot,
        };

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notify = Arc::new(NotifyHub::spawn(self.notifier.clone(), self.retry));
        let images = Arc::new(FsImageStore::new(self.image_dir.join(&safe_name)));
        let engine = Arc::new(Engine::new(wal_path, notify, images)?);

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        slot.insert(engine.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        info!(property = %safe_name, "property loaded");
        Ok(engine)
    }
}

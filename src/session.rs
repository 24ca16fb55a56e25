/// Per-run context threaded through the interpreter, cache and launchers
use crate::cache::{Fetcher, ResourceCache, SchemeFetcher};
use crate::config::settings::LauncherSettings;
use crate::config::types::Result;
use crate::launch::runtime::HostInfo;
use crate::status::StatusSink;
use log::info;
use std::sync::Arc;
use uuid::Uuid;

pub struct Session {
    /// Correlates log lines across chained descriptors
    pub id: Uuid,
    pub settings: LauncherSettings,
    pub cache: ResourceCache,
    pub status: Arc<dyn StatusSink>,
    pub host: Arc<HostInfo>,
}

impl Session {
    /// Session fetching over the network and the local filesystem.
    pub fn open(settings: LauncherSettings, status: Arc<dyn StatusSink>) -> Result<Self> {
        let fetcher = SchemeFetcher::new(&settings)?;
        Ok(Self::with_fetcher(settings, Box::new(fetcher), status))
    }

    pub fn with_fetcher(
        settings: LauncherSettings,
        fetcher: Box<dyn Fetcher>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        let id = Uuid::new_v4();
        let cache = ResourceCache::new(&settings, fetcher, Arc::clone(&status));
        let host = Arc::new(HostInfo::detect(&settings));
        info!(
            "[{}] Session on {} {} with cache at {}",
            id,
            host.os_name,
            host.os_arch,
            cache.root().display()
        );
        Self {
            id,
            settings,
            cache,
            status,
            host,
        }
    }

    /// Replace the detected host, e.g. to evaluate descriptors for another
    /// platform.
    pub fn with_host(mut self, host: HostInfo) -> Self {
        self.host = Arc::new(host);
        self
    }
}

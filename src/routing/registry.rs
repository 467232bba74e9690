use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::routing::host_key::HostKey;
use crate::routing::queue::DispatchQueue;
use crate::routing::site::SiteRegistry;

/// Owns one [`DispatchQueue`] per upstream host.
///
/// Queues for configured sites exist from the start; any other host gets a
/// queue on first use if a default interval is configured, and is refused
/// otherwise. Queues live as long as the registry.
#[derive(Debug)]
pub struct QueueRegistry {
    queues: DashMap<HostKey, Arc<DispatchQueue>>,
    default_interval: Option<Duration>,
}

impl QueueRegistry {
    pub fn new(default_interval: Option<Duration>) -> Self {
        Self {
            queues: DashMap::new(),
            default_interval,
        }
    }

    /// Creates the registry with a queue for every configured site.
    ///
    /// Sites sharing a host share that host's queue; the first site listed
    /// sets its interval.
    pub fn from_sites(sites: &SiteRegistry, default_interval: Option<Duration>) -> Self {
        let registry = Self::new(default_interval);

        for site in sites.iter() {
            let key = site.host_key();
            if let Entry::Vacant(entry) = registry.queues.entry(key.clone()) {
                tracing::info!(host = %key, interval_ms = site.interval.as_millis() as u64, "Configured dispatch queue");
                entry.insert(Arc::new(DispatchQueue::new(key, site.interval)));
            }
        }

        registry
    }

    /// Returns the queue for `key`, creating it from the default interval
    /// when none exists yet.
    ///
    /// `None` means the host is not proxied. A refused lookup leaves the
    /// registry unchanged. Concurrent first lookups of one key all receive
    /// the same queue.
    pub fn for_host(&self, key: &HostKey) -> Option<Arc<DispatchQueue>> {
        if let Some(queue) = self.queues.get(key) {
            return Some(Arc::clone(queue.value()));
        }

        let interval = self.default_interval?;

        let queue = self
            .queues
            .entry(key.clone())
            .or_insert_with(|| {
                tracing::info!(host = %key, interval_ms = interval.as_millis() as u64, "Created dispatch queue from default interval");
                Arc::new(DispatchQueue::new(key.clone(), interval))
            })
            .value()
            .clone();

        Some(queue)
    }

    pub fn contains(&self, key: &HostKey) -> bool {
        self.queues.contains_key(key)
    }

    /// Number of hosts with a queue.
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub fn default_interval(&self) -> Option<Duration> {
        self.default_interval
    }
}

//! Discovery-backed REST mapper with reload-on-miss
//!
//! The mapper caches one discovery pass and answers kind→resource and
//! resource→kind lookups from it. A lookup that misses invalidates the
//! cache and tries once more against a fresh discovery, so CRDs installed
//! after startup become visible without a restart. A periodic reset bounds
//! staleness for entries that changed rather than appeared.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::GroupVersionKind;
use kube::discovery::{ApiResource, Discovery, Scope};
use kube::Client;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use crate::Error;

/// How often the cached discovery is dropped
pub const DEFAULT_RESET_INTERVAL: Duration = Duration::from_secs(30);

/// One discovered resource
#[derive(Clone, Debug, PartialEq)]
pub struct RestMapping {
    /// Group, version, kind, and plural of the resource
    pub resource: ApiResource,
    /// Whether objects of this resource live in a namespace
    pub namespaced: bool,
    /// Whether `resource.version` is the group's preferred version
    pub preferred: bool,
}

impl RestMapping {
    /// Group/version/kind of this mapping
    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(
            &self.resource.group,
            &self.resource.version,
            &self.resource.kind,
        )
    }
}

/// Source of discovery information
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    /// Discover every served resource in every served version
    async fn discover(&self) -> Result<Vec<RestMapping>, Error>;
}

/// Discovery against a live API server
pub struct KubeDiscovery {
    client: Client,
}

impl KubeDiscovery {
    /// Create a discovery source for the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DiscoverySource for KubeDiscovery {
    async fn discover(&self) -> Result<Vec<RestMapping>, Error> {
        let discovery = Discovery::new(self.client.clone()).run().await?;
        let mut mappings = Vec::new();
        for group in discovery.groups() {
            let preferred = group.preferred_version_or_latest().to_string();
            for version in group.versions() {
                for (resource, caps) in group.versioned_resources(version) {
                    mappings.push(RestMapping {
                        preferred: resource.version == preferred,
                        namespaced: caps.scope == Scope::Namespaced,
                        resource,
                    });
                }
            }
        }
        debug!(resources = mappings.len(), "discovery refreshed");
        Ok(mappings)
    }
}

/// Cached REST mapper
pub struct RestMapper {
    source: Arc<dyn DiscoverySource>,
    cache: RwLock<Option<Arc<Vec<RestMapping>>>>,
}

impl RestMapper {
    /// Create a mapper over the given discovery source
    pub fn new(source: Arc<dyn DiscoverySource>) -> Self {
        Self {
            source,
            cache: RwLock::new(None),
        }
    }

    /// Create a mapper that discovers against the given client
    pub fn for_client(client: Client) -> Self {
        Self::new(Arc::new(KubeDiscovery::new(client)))
    }

    /// Drop the cached discovery; the next lookup rediscovers
    pub fn reset(&self) {
        *self.cache.write() = None;
    }

    /// Reset the cache on a fixed period until the task is aborted
    pub fn spawn_periodic_reset(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.reset();
            }
        })
    }

    /// Resolve a group/version/kind
    ///
    /// An empty version selects the group's preferred version.
    pub async fn mapping_for_kind(&self, gvk: &GroupVersionKind) -> Result<RestMapping, Error> {
        let label = if gvk.group.is_empty() {
            format!("{}.{}", gvk.kind, gvk.version)
        } else {
            format!("{}.{}.{}", gvk.kind, gvk.version, gvk.group)
        };
        self.lookup(&label, |table| find_kind(table, gvk)).await
    }

    /// Resolve a resource argument
    ///
    /// Accepts `{resource}.{version}.{group}`, `{resource}.{group}`, a bare
    /// plural, a singular, or a kind.
    pub async fn mapping_for_resource(&self, arg: &str) -> Result<RestMapping, Error> {
        if arg.is_empty() {
            return Err(Error::no_match(arg));
        }
        self.lookup(arg, |table| find_resource(table, arg)).await
    }

    async fn lookup<F>(&self, what: &str, find: F) -> Result<RestMapping, Error>
    where
        F: Fn(&[RestMapping]) -> Option<RestMapping>,
    {
        let table = self.table().await?;
        if let Some(mapping) = find(&table) {
            return Ok(mapping);
        }

        debug!(resource = what, "no mapping cached, reloading discovery");
        self.reset();
        let table = self.table().await?;
        find(&table).ok_or_else(|| {
            warn!(resource = what, "no mapping after discovery reload");
            Error::no_match(what)
        })
    }

    async fn table(&self) -> Result<Arc<Vec<RestMapping>>, Error> {
        let cached = self.cache.read().clone();
        if let Some(table) = cached {
            return Ok(table);
        }
        let fresh = Arc::new(self.source.discover().await?);
        *self.cache.write() = Some(fresh.clone());
        Ok(fresh)
    }
}

fn find_kind(table: &[RestMapping], gvk: &GroupVersionKind) -> Option<RestMapping> {
    let candidates = table
        .iter()
        .filter(|m| m.resource.group == gvk.group && m.resource.kind == gvk.kind);
    pick(candidates, &gvk.version)
}

fn find_resource(table: &[RestMapping], arg: &str) -> Option<RestMapping> {
    let arg = arg.to_lowercase();
    let parts: Vec<&str> = arg.splitn(3, '.').collect();

    // {resource}.{version}.{group}
    if parts.len() == 3 {
        let found = pick(
            table
                .iter()
                .filter(|m| m.resource.group == parts[2] && matches_name(m, parts[0])),
            parts[1],
        );
        if found.is_some() {
            return found;
        }
    }

    // {resource}.{group}
    if let Some((name, group)) = arg.split_once('.') {
        let found = pick(
            table
                .iter()
                .filter(|m| m.resource.group == group && matches_name(m, name)),
            "",
        );
        if found.is_some() {
            return found;
        }
    }

    // Bare name; core and preferred versions win ties
    let mut matches: Vec<&RestMapping> = table.iter().filter(|m| matches_name(m, &arg)).collect();
    matches.sort_by_key(|m| (!m.resource.group.is_empty(), !m.preferred));
    matches.first().map(|m| (*m).clone())
}

fn matches_name(mapping: &RestMapping, name: &str) -> bool {
    mapping.resource.plural == name || mapping.resource.kind.to_lowercase() == name
}

fn pick<'a>(
    candidates: impl Iterator<Item = &'a RestMapping>,
    version: &str,
) -> Option<RestMapping> {
    let candidates: Vec<&RestMapping> = candidates.collect();
    if version.is_empty() {
        candidates
            .iter()
            .find(|m| m.preferred)
            .or_else(|| candidates.first())
            .map(|m| (*m).clone())
    } else {
        candidates
            .into_iter()
            .find(|m| m.resource.version == version)
            .cloned()
    }
}

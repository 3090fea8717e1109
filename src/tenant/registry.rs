//! Tenant registry: immutable snapshots swapped atomically on reload.
//!
//! Readers clone an `Arc<RegistrySnapshot>` under a read lock that is held
//! only for the clone, then work on the snapshot without any lock. Reloads
//! are serialized by a separate writer mutex, build a complete new snapshot
//! off to the side, and replace the pointer in one step. A reader therefore
//! always sees either the old or the new registry, never a mix.

use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::config::InvalidTenantPolicy;
use crate::error::ConfigError;
use crate::tenant::model::{TenantConfig, normalize_domain};

/// One consistent view of every loaded tenant.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    generation: u64,
    tenants: BTreeMap<String, Arc<TenantConfig>>,
    /// Normalized primary/alias domain → tenant id.
    domains: BTreeMap<String, String>,
}

impl RegistrySnapshot {
    /// Reload counter. Zero for the initial empty registry.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    /// Tenant by id.
    pub fn tenant(&self, id: &str) -> Option<&Arc<TenantConfig>> {
        self.tenants.get(id)
    }

    /// Tenant owning exactly this domain (after normalization).
    pub fn lookup_exact(&self, domain: &str) -> Option<&Arc<TenantConfig>> {
        let normalized = normalize_domain(domain)?;
        self.lookup_normalized(&normalized)
    }

    /// Like `lookup_exact` but skips normalization; `domain` must already be normalized.
    pub(crate) fn lookup_normalized(&self, domain: &str) -> Option<&Arc<TenantConfig>> {
        self.domains.get(domain).and_then(|id| self.tenants.get(id))
    }

    /// Every `(domain, tenant_id)` pair in lexical domain order.
    ///
    /// Lazy; call again to restart.
    pub fn all_domains(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.domains.iter().map(|(d, t)| (d.as_str(), t.as_str()))
    }

    /// Ids of all loaded tenants, sorted.
    pub fn tenant_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.tenants.keys().map(String::as_str)
    }
}

/// Outcome of a successful load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub generation: u64,
    pub loaded: Vec<String>,
    /// Tenants dropped under `InvalidTenantPolicy::SkipAndLog`, with reasons.
    pub skipped: Vec<(String, Vec<String>)>,
}

/// Owning, lazy iterator over a snapshot's `(domain, tenant_id)` pairs.
pub struct DomainIter {
    snapshot: Arc<RegistrySnapshot>,
    cursor: Option<String>,
}

impl Iterator for DomainIter {
    type Item = (String, String);

    fn next(&mut self) -> Option<Self::Item> {
        let lower = match self.cursor {
            Some(ref last) => Bound::Excluded(last.as_str()),
            None => Bound::Unbounded,
        };
        let (domain, tenant) = self
            .snapshot
            .domains
            .range::<str, _>((lower, Bound::Unbounded))
            .next()?;
        self.cursor = Some(domain.clone());
        Some((domain.clone(), tenant.clone()))
    }
}

/// Shared, reloadable tenant index.
pub struct TenantRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
    reload: Mutex<()>,
    policy: InvalidTenantPolicy,
}

impl TenantRegistry {
    /// Create an empty registry.
    pub fn new(policy: InvalidTenantPolicy) -> Self {
        Self {
            current: RwLock::new(Arc::new(RegistrySnapshot::default())),
            reload: Mutex::new(()),
            policy,
        }
    }

    /// Current snapshot. Cheap; holds no lock after returning.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replace the registry with `tenants`.
    ///
    /// Either every accepted tenant becomes visible at once or, on error,
    /// nothing changes and the previous snapshot stays in service.
    pub fn load(&self, tenants: Vec<TenantConfig>) -> Result<LoadReport, ConfigError> {
        let _writer = self.reload.lock().unwrap_or_else(PoisonError::into_inner);
        let generation = self.snapshot().generation + 1;

        let (snapshot, report) = build_snapshot(tenants, self.policy, generation)?;

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);

        info!(
            generation,
            loaded = report.loaded.len(),
            skipped = report.skipped.len(),
            "Tenant registry reloaded"
        );
        Ok(report)
    }

    /// O(1) normalized lookup against the current snapshot.
    pub fn lookup_exact(&self, domain: &str) -> Option<Arc<TenantConfig>> {
        self.snapshot().lookup_exact(domain).cloned()
    }

    /// Tenant by id from the current snapshot.
    pub fn tenant(&self, id: &str) -> Option<Arc<TenantConfig>> {
        self.snapshot().tenant(id).cloned()
    }

    /// Lazy iterator over the current snapshot's domains.
    ///
    /// Pinned to the snapshot current at call time; a concurrent reload does
    /// not affect an iteration in progress.
    pub fn all_domains(&self) -> DomainIter {
        DomainIter {
            snapshot: self.snapshot(),
            cursor: None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.snapshot().generation
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

impl Default for TenantRegistry {
    fn default() -> Self {
        Self::new(InvalidTenantPolicy::default())
    }
}

/// Validate `tenants` and index them into a fresh snapshot.
fn build_snapshot(
    tenants: Vec<TenantConfig>,
    policy: InvalidTenantPolicy,
    generation: u64,
) -> Result<(RegistrySnapshot, LoadReport), ConfigError> {
    let mut errors = Vec::new();
    let mut report = LoadReport {
        generation,
        ..LoadReport::default()
    };
    let mut snapshot = RegistrySnapshot {
        generation,
        ..RegistrySnapshot::default()
    };
    let mut seen_ids = HashSet::new();

    for tenant in tenants {
        if !seen_ids.insert(tenant.id.clone()) {
            errors.push(ConfigError::DuplicateTenant {
                tenant_id: tenant.id.clone(),
            });
            continue;
        }

        if let Err(reasons) = tenant.validate() {
            match policy {
                InvalidTenantPolicy::Abort => {
                    errors.push(ConfigError::InvalidTenant {
                        tenant_id: tenant.id.clone(),
                        reasons,
                    });
                }
                InvalidTenantPolicy::SkipAndLog => {
                    warn!(
                        tenant = %tenant.id,
                        reasons = %reasons.join("; "),
                        "Skipping invalid tenant config"
                    );
                    report.skipped.push((tenant.id.clone(), reasons));
                }
            }
            continue;
        }
        let tenant = tenant.normalized();

        for domain in tenant.claimed_domains() {
            if let Some(owner) = snapshot.domains.get(&domain) {
                errors.push(ConfigError::DomainConflict {
                    domain,
                    first: owner.clone(),
                    second: tenant.id.clone(),
                });
                continue;
            }
            snapshot.domains.insert(domain, tenant.id.clone());
        }

        debug!(tenant = %tenant.id, domain = %tenant.primary_domain, "Indexed tenant");
        report.loaded.push(tenant.id.clone());
        snapshot.tenants.insert(tenant.id.clone(), Arc::new(tenant));
    }

    if let Some(err) = ConfigError::from_many(errors) {
        warn!(error = %err, "Rejected tenant registry reload");
        return Err(err);
    }

    Ok((snapshot, report))
}

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::AbortHandle;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;

#[derive(Debug)]
pub enum TenantError {
    NameTooLong(usize),
    /// Nothing usable is left once the name is reduced to a file stem.
    UnusableName(String),
    TooManyTenants,
    Open(io::Error),
}

impl fmt::Display for TenantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantError::NameTooLong(len) => {
                write!(f, "tenant name too long ({len} bytes, max {MAX_TENANT_NAME_LEN})")
            }
            TenantError::UnusableName(name) => write!(f, "unusable tenant name {name:?}"),
            TenantError::TooManyTenants => write!(f, "too many tenants (max {MAX_TENANTS})"),
            TenantError::Open(e) => write!(f, "cannot open tenant WAL: {e}"),
        }
    }
}

impl std::error::Error for TenantError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TenantError::Open(e) => Some(e),
            _ => None,
        }
    }
}

/// File stem for a tenant's WAL: the name's alphanumerics, `_` and `-`.
/// Names that reduce to the same stem share one tenant.
fn wal_stem(tenant: &str) -> Result<String, TenantError> {
    if tenant.len() > MAX_TENANT_NAME_LEN {
        return Err(TenantError::NameTooLong(tenant.len()));
    }
    let stem: String = tenant
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '-'))
        .collect();
    if stem.is_empty() {
        return Err(TenantError::UnusableName(tenant.to_string()));
    }
    Ok(stem)
}

struct Tenant {
    engine: Arc<Engine>,
    compactor: AbortHandle,
}

impl Drop for Tenant {
    fn drop(&mut self) {
        self.compactor.abort();
    }
}

/// Lazily opened engines, one per tenant (the pgwire database name), each
/// with its own WAL file under `data_dir` and its own compactor task.
pub struct TenantManager {
    tenants: DashMap<String, Tenant>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            tenants: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// The tenant's engine, replaying its WAL on first use.
    pub fn get_or_create(&self, tenant: &str) -> Result<Arc<Engine>, TenantError> {
        let stem = wal_stem(tenant)?;
        if let Some(t) = self.tenants.get(&stem) {
            return Ok(t.engine.clone());
        }
        if self.tenants.len() >= MAX_TENANTS {
            return Err(TenantError::TooManyTenants);
        }

        // The vacant entry keeps the shard locked, so two connections can't
        // open the same WAL file twice.
        let slot = match self.tenants.entry(stem) {
            Entry::Occupied(t) => return Ok(t.get().engine.clone()),
            Entry::Vacant(slot) => slot,
        };
        let wal_path = self.data_dir.join(format!("{}.wal", slot.key()));
        let engine = Arc::new(Engine::new(wal_path, Arc::new(NotifyHub::new())).map_err(TenantError::Open)?);
        let compactor = tokio::spawn(compactor::run_compactor(engine.clone(), self.compact_threshold)).abort_handle();
        tracing::info!("tenant {} loaded ({} units)", slot.key(), engine.units.len());
        slot.insert(Tenant {
            engine: engine.clone(),
            compactor,
        });

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.tenants.len() as f64);
        Ok(engine)
    }
}

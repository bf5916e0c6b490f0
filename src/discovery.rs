//! Service discovery.
//!
//! Servers announce themselves as [`Endpoint`]s through a [`Registrar`];
//! clients look one up by key prefix. Keys follow the layout
//! `SERVICE_PREFIX + identity`:
//!
//! ```text
//! /service/access_layer/gateway-1  →  {"identity":"gateway-1","addr":"10.0.0.5:7000"}
//! /service/access_layer/gateway-2  →  {"identity":"gateway-2","addr":"10.0.0.6:7000"}
//! ```
//!
//! Only the in-process [`MemoryRegistry`] ships with the crate. A networked
//! key/value store plugs in by implementing [`Registrar`].

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Key prefix under which every endpoint is stored.
pub const SERVICE_PREFIX: &str = "/service/access_layer/";

// ============================================================================
// Endpoint
// ============================================================================

/// A reachable service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Unique name of the instance.
    pub identity: String,
    /// Address clients should dial.
    pub addr: SocketAddr,
}

impl Endpoint {
    /// Creates an endpoint.
    #[inline]
    #[must_use]
    pub fn new(identity: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            identity: identity.into(),
            addr,
        }
    }

    /// Returns the registry key for this endpoint.
    #[inline]
    #[must_use]
    pub fn key(&self) -> String {
        key_for(&self.identity)
    }
}

#[inline]
fn key_for(identity: &str) -> String {
    format!("{SERVICE_PREFIX}{identity}")
}

// ============================================================================
// Registrar
// ============================================================================

/// Backend that stores and resolves endpoints.
#[async_trait]
pub trait Registrar: Send + Sync {
    /// Announces an endpoint, replacing any previous entry with the same identity.
    async fn register(&self, endpoint: &Endpoint) -> Result<()>;

    /// Withdraws an endpoint. Unknown identities are ignored.
    async fn deregister(&self, identity: &str) -> Result<()>;

    /// Returns the endpoint with the smallest key starting with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EndpointNotFound`] if no key matches.
    async fn discover(&self, prefix: &str) -> Result<Endpoint>;
}

// ============================================================================
// MemoryRegistry
// ============================================================================

/// In-process registry holding JSON values, as a key/value store would.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    entries: RwLock<FxHashMap<String, Vec<u8>>>,
}

impl MemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of registered endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl Registrar for MemoryRegistry {
    async fn register(&self, endpoint: &Endpoint) -> Result<()> {
        let key = endpoint.key();
        let value = serde_json::to_vec(endpoint)?;

        debug!(%key, addr = %endpoint.addr, "endpoint registered");
        self.entries.write().insert(key, value);

        Ok(())
    }

    async fn deregister(&self, identity: &str) -> Result<()> {
        let key = key_for(identity);
        if self.entries.write().remove(&key).is_some() {
            debug!(%key, "endpoint deregistered");
        }
        Ok(())
    }

    async fn discover(&self, prefix: &str) -> Result<Endpoint> {
        let value = {
            let entries = self.entries.read();
            entries
                .iter()
                .filter(|(key, _)| key.starts_with(prefix))
                .min_by(|(a, _), (b, _)| a.cmp(b))
                .map(|(_, value)| value.clone())
        };

        let value = value.ok_or_else(|| Error::endpoint_not_found(prefix))?;
        Ok(serde_json::from_slice(&value)?)
    }
}

// ============================================================================
// Tests
// ============================================================================

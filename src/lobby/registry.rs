//! Announced-endpoint registry
//!
//! Maps endpoint ids to the client currently announced under them. An id is
//! present only while its announcer is still waiting for a peer; pairing
//! removes the entry, so a registered id has never been paired.

use std::collections::HashMap;
use thiserror::Error;

use super::ClientId;

/// Registry errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Endpoint '{0}' is already announced")]
    DuplicateEndpoint(String),

    #[error("Endpoint '{0}' is not announced")]
    UnknownEndpoint(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Mapping from endpoint id to the announced client
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    entries: HashMap<String, ClientId>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a client under an endpoint id.
    ///
    /// Fails if the id is already taken; the existing registration is left
    /// untouched in that case.
    pub fn register(&mut self, id: &str, client: ClientId) -> RegistryResult<()> {
        if self.entries.contains_key(id) {
            return Err(RegistryError::DuplicateEndpoint(id.to_string()));
        }
        self.entries.insert(id.to_string(), client);
        Ok(())
    }

    /// Look up the client announced under an id.
    ///
    /// A miss is an error, not a default: callers handle it explicitly.
    pub fn lookup(&self, id: &str) -> RegistryResult<ClientId> {
        self.entries
            .get(id)
            .copied()
            .ok_or_else(|| RegistryError::UnknownEndpoint(id.to_string()))
    }

    /// Remove a registration; missing ids are tolerated
    pub fn remove(&mut self, id: &str) {
        self.entries.remove(id);
    }

    /// Number of announced endpoints
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

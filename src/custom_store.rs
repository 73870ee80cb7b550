//! Simulated custom key stores
//!
//! A custom key store stands in for an external HSM cluster. Keys created in it are
//! usable only while it is connected; disconnecting it makes them `Unavailable`.

use crate::error::{Error, Result};
use crate::key::KeyStore;
use crate::util::random_hex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;
use zeroize::Zeroizing;

/// Prefix of every custom key store id
pub const CUSTOM_KEY_STORE_ID_PREFIX: &str = "cks-";
/// Shortest accepted key store password
pub const MIN_PASSWORD_LENGTH: usize = 7;
/// Longest accepted key store password
pub const MAX_PASSWORD_LENGTH: usize = 32;

const ID_SUFFIX_LENGTH: usize = 17;

/// Connection state of a custom key store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Caller-visible description of a custom key store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomKeyStore {
    pub custom_key_store_id: String,
    pub custom_key_store_name: String,
    pub cluster_id: String,
    pub trust_anchor_certificate: String,
    pub connection_state: ConnectionState,
    pub creation_date: DateTime<Utc>,
}

struct StoreEntry {
    info: CustomKeyStore,
    password: Zeroizing<String>,
}

fn validate_password(password: &str) -> Result<()> {
    let len = password.chars().count();
    if !(MIN_PASSWORD_LENGTH..=MAX_PASSWORD_LENGTH).contains(&len) {
        return Err(Error::Validation(format!(
            "key store password must be {} to {} characters",
            MIN_PASSWORD_LENGTH, MAX_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

/// Registry of custom key stores
///
/// Connecting and disconnecting update the store's keys while the registry write lock
/// is held, so a key can never be created in a store that is disconnecting.
pub struct CustomKeyStoreRegistry {
    stores: RwLock<BTreeMap<String, StoreEntry>>,
}

impl std::fmt::Debug for CustomKeyStoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomKeyStoreRegistry").finish_non_exhaustive()
    }
}

impl Default for CustomKeyStoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CustomKeyStoreRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self {
            stores: RwLock::new(BTreeMap::new()),
        }
    }

    /// Creates a disconnected store and returns its id
    pub fn create(
        &self,
        name: &str,
        cluster_id: &str,
        trust_anchor_certificate: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<String> {
        if name.is_empty() || cluster_id.is_empty() || trust_anchor_certificate.is_empty() {
            return Err(Error::Validation(
                "name, cluster id and trust anchor certificate are required".into(),
            ));
        }
        validate_password(password)?;

        let mut stores = self.stores.write()?;
        if stores.values().any(|s| s.info.custom_key_store_name == name) {
            return Err(Error::AlreadyExists(format!(
                "custom key store {} already exists",
                name
            )));
        }

        let mut suffix = random_hex(9);
        suffix.truncate(ID_SUFFIX_LENGTH);
        let id = format!("{}{}", CUSTOM_KEY_STORE_ID_PREFIX, suffix);

        stores.insert(
            id.clone(),
            StoreEntry {
                info: CustomKeyStore {
                    custom_key_store_id: id.clone(),
                    custom_key_store_name: name.to_string(),
                    cluster_id: cluster_id.to_string(),
                    trust_anchor_certificate: trust_anchor_certificate.to_string(),
                    connection_state: ConnectionState::Disconnected,
                    creation_date: now,
                },
                password: Zeroizing::new(password.to_string()),
            },
        );
        log::info!("custom key store {} ({}) created", id, name);
        Ok(id)
    }

    /// Describes one store by id or name, or every store when neither is given
    pub fn describe(&self, id: Option<&str>, name: Option<&str>) -> Result<Vec<CustomKeyStore>> {
        let stores = self.stores.read()?;
        match (id, name) {
            (Some(_), Some(_)) => Err(Error::Validation(
                "specify a custom key store id or name, not both".into(),
            )),
            (Some(id), None) => stores
                .get(id)
                .map(|s| vec![s.info.clone()])
                .ok_or_else(|| Error::NotFound(format!("custom key store {} does not exist", id))),
            (None, Some(name)) => stores
                .values()
                .find(|s| s.info.custom_key_store_name == name)
                .map(|s| vec![s.info.clone()])
                .ok_or_else(|| {
                    Error::NotFound(format!("custom key store {} does not exist", name))
                }),
            (None, None) => Ok(stores.values().map(|s| s.info.clone()).collect()),
        }
    }

    /// Changes the name, password or cluster of a disconnected store
    pub fn update(
        &self,
        id: &str,
        new_name: Option<&str>,
        password: Option<&str>,
        cluster_id: Option<&str>,
    ) -> Result<()> {
        if let Some(password) = password {
            validate_password(password)?;
        }

        let mut stores = self.stores.write()?;
        if let Some(name) = new_name {
            if name.is_empty() {
                return Err(Error::Validation("custom key store name must not be empty".into()));
            }
            if stores
                .values()
                .any(|s| s.info.custom_key_store_name == name && s.info.custom_key_store_id != id)
            {
                return Err(Error::AlreadyExists(format!(
                    "custom key store {} already exists",
                    name
                )));
            }
        }

        let entry = stores
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("custom key store {} does not exist", id)))?;
        if entry.info.connection_state != ConnectionState::Disconnected {
            return Err(Error::InvalidState(format!(
                "custom key store {} must be disconnected to be updated",
                id
            )));
        }

        if let Some(name) = new_name {
            entry.info.custom_key_store_name = name.to_string();
        }
        if let Some(password) = password {
            entry.password = Zeroizing::new(password.to_string());
        }
        if let Some(cluster_id) = cluster_id {
            entry.info.cluster_id = cluster_id.to_string();
        }
        log::info!("custom key store {} updated", id);
        Ok(())
    }

    /// Connects a store and restores its keys; connecting a connected store is a no-op
    pub fn connect(&self, id: &str, keys: &KeyStore) -> Result<()> {
        let mut stores = self.stores.write()?;
        let entry = stores
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("custom key store {} does not exist", id)))?;
        if entry.info.connection_state == ConnectionState::Connected {
            return Ok(());
        }
        // the simulated cluster login only checks the stored credential is well-formed
        validate_password(&entry.password)?;

        let restored = keys.restore_custom_store(id)?;
        entry.info.connection_state = ConnectionState::Connected;
        log::info!("custom key store {} connected, {} keys restored", id, restored);
        Ok(())
    }

    /// Disconnects a store and makes its keys `Unavailable`
    pub fn disconnect(&self, id: &str, keys: &KeyStore) -> Result<()> {
        let mut stores = self.stores.write()?;
        let entry = stores
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("custom key store {} does not exist", id)))?;
        if entry.info.connection_state == ConnectionState::Disconnected {
            return Ok(());
        }

        let unavailable = keys.mark_custom_store_unavailable(id)?;
        entry.info.connection_state = ConnectionState::Disconnected;
        log::info!(
            "custom key store {} disconnected, {} keys unavailable",
            id,
            unavailable
        );
        Ok(())
    }

    /// Deletes a disconnected store that holds no keys
    pub fn delete(&self, id: &str, keys: &KeyStore) -> Result<()> {
        let mut stores = self.stores.write()?;
        let entry = stores
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("custom key store {} does not exist", id)))?;
        if entry.info.connection_state != ConnectionState::Disconnected {
            return Err(Error::InvalidState(format!(
                "custom key store {} must be disconnected to be deleted",
                id
            )));
        }
        let remaining = keys.keys_in_custom_store(id)?.len();
        if remaining > 0 {
            return Err(Error::InvalidState(format!(
                "custom key store {} still holds {} keys",
                id, remaining
            )));
        }

        stores.remove(id);
        log::info!("custom key store {} deleted", id);
        Ok(())
    }

    /// Runs `f` while store `id` is known to stay connected
    pub fn with_connected<R>(&self, id: &str, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let stores = self.stores.read()?;
        let entry = stores
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("custom key store {} does not exist", id)))?;
        if entry.info.connection_state != ConnectionState::Connected {
            return Err(Error::KeyUnavailable(format!(
                "custom key store {} is disconnected",
                id
            )));
        }
        f()
    }
}

//! The request/response facade over every component
//!
//! [`KeyManagementService`] owns the registries, resolves alias-form identifiers and
//! authorizes callers before delegating. The key owner and the account root
//! administer a key; everyone else needs a grant for grantable operations and is
//! denied the administrative ones.

mod aliases;
mod cryptographic;
mod custom_stores;
mod grants;
mod import;
mod keys;
pub mod messages;

use crate::alias::AliasRegistry;
use crate::clock::{Clock, SystemClock};
use crate::config::KmsConfig;
use crate::crypto::CryptoEngine;
use crate::custom_store::CustomKeyStoreRegistry;
use crate::error::{Error, Result};
use crate::grant::{GrantOperation, GrantRegistry};
use crate::key::arn::ResourceScope;
use crate::key::{CmkRecord, KeyStore};
use crate::lifecycle::{KeyLifecycleScheduler, SweepReport};
use crate::model::{EncryptionContext, Principal};
use crate::Aead;

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

pub use messages::*;

/// In-process key management service
#[derive(Debug)]
pub struct KeyManagementService {
    config: KmsConfig,
    clock: Arc<dyn Clock>,
    root: Principal,
    keys: KeyStore,
    grants: GrantRegistry,
    aliases: AliasRegistry,
    scheduler: KeyLifecycleScheduler,
    custom_stores: CustomKeyStoreRegistry,
    engine: CryptoEngine,
}

impl KeyManagementService {
    /// Creates a service with `config` and the system clock
    pub fn new(config: KmsConfig) -> Result<Self> {
        Self::builder().with_config(config).build()
    }

    /// Returns a builder
    pub fn builder() -> KeyManagementServiceBuilder {
        KeyManagementServiceBuilder::new()
    }

    /// Returns the configuration the service was built with
    pub fn config(&self) -> &KmsConfig {
        &self.config
    }

    /// Returns the account root principal
    pub fn root_principal(&self) -> &Principal {
        &self.root
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn is_admin(&self, caller: &Principal, record: &CmkRecord) -> bool {
        *caller == self.root || record.owner() == caller
    }

    /// Resolves any identifier form to a key id
    fn resolve(&self, reference: &str) -> Result<String> {
        self.keys.resolve(reference, &self.aliases)
    }

    /// Fails with `AccessDenied` unless `caller` administers `key_id`
    fn require_admin(&self, caller: &Principal, key_id: &str) -> Result<()> {
        self.keys
            .with_key(key_id, |record| self.check_admin(caller, record))
    }

    /// Like `require_admin`, for a record the caller already holds
    fn check_admin(&self, caller: &Principal, record: &CmkRecord) -> Result<()> {
        if !self.is_admin(caller, record) {
            return Err(Error::AccessDenied(format!(
                "{} does not administer key {}",
                caller, record.key_id
            )));
        }
        Ok(())
    }

    /// Fails unless `caller` administers `key_id` or holds a matching grant
    fn authorize(
        &self,
        caller: &Principal,
        key_id: &str,
        operation: GrantOperation,
        context: &EncryptionContext,
        grant_tokens: &[String],
    ) -> Result<()> {
        let admin = self
            .keys
            .with_key(key_id, |record| Ok(self.is_admin(caller, record)))?;
        if admin {
            for token in grant_tokens {
                self.grants.find_by_token(token)?;
            }
            return Ok(());
        }

        self.grants
            .authorize(key_id, caller, operation, context, grant_tokens)
            .map_err(|e| {
                log::debug!("{:?} on key {} denied for {}: {}", operation, key_id, caller, e);
                e
            })
    }

    /// Runs one pass of deferred transitions at the current clock time
    pub fn sweep(&self) -> Result<SweepReport> {
        self.scheduler
            .sweep(&self.keys, &self.grants, &self.aliases, self.now())
    }

    /// Spawns a tokio task that sweeps every `period`
    ///
    /// The task holds a weak reference and ends once the service is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: std::time::Duration) -> tokio::task::JoinHandle<()> {
        let service = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let Some(service) = service.upgrade() else {
                    log::debug!("service dropped, sweeper exiting");
                    break;
                };
                if let Err(e) = service.sweep() {
                    log::error!("sweep failed: {}", e);
                }
            }
        })
    }
}

/// A builder for KeyManagementService
#[derive(Debug, Default)]
pub struct KeyManagementServiceBuilder {
    config: Option<KmsConfig>,
    clock: Option<Arc<dyn Clock>>,
    crypto: Option<Arc<dyn Aead>>,
}

impl KeyManagementServiceBuilder {
    /// Creates a new KeyManagementServiceBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration
    pub fn with_config(mut self, config: KmsConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the clock deferred transitions are measured against
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the AEAD implementation
    pub fn with_crypto(mut self, crypto: Arc<dyn Aead>) -> Self {
        self.crypto = Some(crypto);
        self
    }

    /// Builds the KeyManagementService
    pub fn build(self) -> Result<KeyManagementService> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let engine = match self.crypto {
            Some(aead) => CryptoEngine::with_aead(aead),
            None => CryptoEngine::new(),
        };
        let scope = ResourceScope::from_config(&config);

        Ok(KeyManagementService {
            root: scope.root_principal(),
            keys: KeyStore::new(&config),
            grants: GrantRegistry::new(config.max_grants_per_key),
            aliases: AliasRegistry::new(scope, &config.system_aliases, clock.now())?,
            scheduler: KeyLifecycleScheduler::new(Duration::hours(i64::from(
                config.import_parameters_ttl_hours,
            ))),
            custom_stores: CustomKeyStoreRegistry::new(),
            engine,
            clock,
            config,
        })
    }
}

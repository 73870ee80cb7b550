//! Deferred key transitions and key material import
//!
//! Nothing here runs on a timer of its own. Waiting periods, material expiry, rotation
//! and import token lifetimes are all logical clock comparisons evaluated by
//! [`KeyLifecycleScheduler::sweep`], which the service drives from a [`crate::Clock`].

use crate::alias::AliasRegistry;
use crate::crypto::asymmetric::{WrappingAlgorithm, WrappingKeyPair, WrappingKeySpec};
use crate::error::{Error, Result};
use crate::grant::GrantRegistry;
use crate::key::{ExpirationModel, KeyState, KeyStore, Origin};
use crate::util::random_token;
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

const IMPORT_TOKEN_SIZE: usize = 32;

/// Material and token a caller needs to import key material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImportParameters {
    pub key_id: String,
    /// DER-encoded SubjectPublicKeyInfo of the wrapping key
    pub public_key: Vec<u8>,
    pub import_token: String,
    pub parameters_valid_to: DateTime<Utc>,
}

/// Counts of what one sweep pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SweepReport {
    pub keys_deleted: usize,
    pub grants_removed: usize,
    pub aliases_removed: usize,
    pub material_expired: usize,
    pub keys_rotated: usize,
    pub import_parameters_purged: usize,
}

#[derive(Debug)]
struct IssuedParameters {
    key_id: String,
    wrapping_key: WrappingKeyPair,
    valid_to: DateTime<Utc>,
}

/// Owner of outstanding import parameters and driver of the periodic sweep
#[derive(Debug)]
pub struct KeyLifecycleScheduler {
    import_ttl: Duration,
    issued: Mutex<HashMap<String, IssuedParameters>>,
}

impl KeyLifecycleScheduler {
    /// Creates a scheduler whose import parameters live for `import_ttl`
    pub fn new(import_ttl: Duration) -> Self {
        Self {
            import_ttl,
            issued: Mutex::new(HashMap::new()),
        }
    }

    /// Issues a wrapping key and import token for an External key
    pub fn get_parameters_for_import(
        &self,
        keys: &KeyStore,
        key_id: &str,
        algorithm: WrappingAlgorithm,
        spec: WrappingKeySpec,
        now: DateTime<Utc>,
    ) -> Result<ImportParameters> {
        keys.with_key(key_id, |record| {
            if record.origin != Origin::External {
                return Err(Error::UnsupportedOperation(format!(
                    "{} has origin {:?}; import parameters are only issued for External keys",
                    record.arn, record.origin
                )));
            }
            if record.state == KeyState::PendingDeletion {
                return Err(Error::InvalidState(format!(
                    "{} is pending deletion",
                    record.arn
                )));
            }
            Ok(())
        })?;

        let wrapping_key = WrappingKeyPair::generate(algorithm, spec)?;
        let public_key = wrapping_key.public_key_der()?;
        let import_token = random_token(IMPORT_TOKEN_SIZE);
        let valid_to = now + self.import_ttl;

        self.issued.lock()?.insert(
            import_token.clone(),
            IssuedParameters {
                key_id: key_id.to_string(),
                wrapping_key,
                valid_to,
            },
        );
        log::debug!("issued import parameters for key {} valid to {}", key_id, valid_to);

        Ok(ImportParameters {
            key_id: key_id.to_string(),
            public_key,
            import_token,
            parameters_valid_to: valid_to,
        })
    }

    /// Unwraps and installs imported key material
    ///
    /// The token is consumed only when the import succeeds. The import table lock is
    /// held across the key update so a token cannot be redeemed twice.
    #[allow(clippy::too_many_arguments)]
    pub fn import_key_material(
        &self,
        keys: &KeyStore,
        key_id: &str,
        encrypted_key_material: &[u8],
        import_token: &str,
        expiration_model: ExpirationModel,
        valid_to: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut issued = self.issued.lock()?;

        let parameters = issued
            .get(import_token)
            .filter(|p| p.key_id == key_id)
            .ok_or_else(|| {
                Error::InvalidImportToken(format!("import token was not issued for key {}", key_id))
            })?;

        if parameters.valid_to <= now {
            issued.remove(import_token);
            return Err(Error::ExpiredImportToken(format!(
                "import parameters for key {} have expired",
                key_id
            )));
        }

        let material = parameters
            .wrapping_key
            .unwrap_material(encrypted_key_material)?;
        keys.install_imported_material(key_id, &material, expiration_model, valid_to, now)?;

        issued.remove(import_token);
        counter!("kms.import_key_material", 1);
        Ok(())
    }

    /// Drops every import parameter set issued for `key_id`
    pub fn purge_for_key(&self, key_id: &str) -> Result<usize> {
        let mut issued = self.issued.lock()?;
        let before = issued.len();
        issued.retain(|_, p| p.key_id != key_id);
        Ok(before - issued.len())
    }

    /// Drops import parameter sets that have expired
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut issued = self.issued.lock()?;
        let before = issued.len();
        issued.retain(|_, p| p.valid_to > now);
        Ok(before - issued.len())
    }

    /// Number of outstanding import parameter sets
    pub fn outstanding(&self) -> Result<usize> {
        Ok(self.issued.lock()?.len())
    }

    /// Runs one pass over every deferred transition due at `now`
    pub fn sweep(
        &self,
        keys: &KeyStore,
        grants: &GrantRegistry,
        aliases: &AliasRegistry,
        now: DateTime<Utc>,
    ) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for key_id in keys.due_for_deletion(now)? {
            if !keys.finalize_deletion(&key_id, now)? {
                continue;
            }
            report.keys_deleted += 1;
            report.grants_removed += grants.remove_for_key(&key_id)?;
            report.aliases_removed += aliases.remove_for_key(&key_id)?;
            self.purge_for_key(&key_id)?;
        }

        report.material_expired = keys.expire_imported_material(now)?;
        report.keys_rotated = keys.rotate_due(now)?;
        report.import_parameters_purged = self.purge_expired(now)?;

        counter!("kms.sweep.keys_deleted", report.keys_deleted as u64);
        counter!("kms.sweep.material_expired", report.material_expired as u64);
        counter!("kms.sweep.keys_rotated", report.keys_rotated as u64);

        if report != SweepReport::default() {
            log::info!("sweep at {}: {:?}", now, report);
        } else {
            log::debug!("sweep at {}: nothing due", now);
        }
        Ok(report)
    }
}

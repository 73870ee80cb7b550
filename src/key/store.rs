use crate::alias::AliasRegistry;
use crate::config::KmsConfig;
use crate::crypto::asymmetric::SigningKeyMaterial;
use crate::error::{Error, Result};
use crate::key::arn::{KeyReference, ResourceScope};
use crate::key::policy::{default_policy, validate_policy, DEFAULT_POLICY_NAME};
use crate::key::{
    random_symmetric_key, CmkRecord, ExpirationModel, KeyMaterial, KeyMetadata, KeySpec,
    KeyState, KeyUsage, Origin,
};
use crate::model::Principal;
use crate::util::{paginate, Page, PageRequest};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Longest accepted key description, in characters
pub const MAX_DESCRIPTION_LENGTH: usize = 8192;
/// Longest accepted tag key, in characters
pub const MAX_TAG_KEY_LENGTH: usize = 128;
/// Longest accepted tag value, in characters
pub const MAX_TAG_VALUE_LENGTH: usize = 256;

/// A key/value tag on a CMK
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    pub tag_key: String,
    pub tag_value: String,
}

impl Tag {
    /// Creates a tag
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            tag_key: key.into(),
            tag_value: value.into(),
        }
    }

    fn validate(&self) -> Result<()> {
        let key_len = self.tag_key.chars().count();
        if key_len == 0 || key_len > MAX_TAG_KEY_LENGTH {
            return Err(Error::Tag(format!(
                "tag key must be 1 to {} characters",
                MAX_TAG_KEY_LENGTH
            )));
        }
        if self.tag_key.starts_with("aws:") {
            return Err(Error::Tag(format!(
                "tag key {} uses the reserved aws: prefix",
                self.tag_key
            )));
        }
        if self.tag_value.chars().count() > MAX_TAG_VALUE_LENGTH {
            return Err(Error::Tag(format!(
                "tag value for {} exceeds {} characters",
                self.tag_key, MAX_TAG_VALUE_LENGTH
            )));
        }
        Ok(())
    }
}

/// Entry of a key listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyListEntry {
    pub key_id: String,
    pub key_arn: String,
}

/// Parameters of a new CMK
#[derive(Debug, Clone)]
pub struct NewKey {
    pub owner: Principal,
    pub description: String,
    pub origin: Origin,
    pub key_usage: KeyUsage,
    pub key_spec: KeySpec,
    pub policy: Option<String>,
    pub tags: Vec<Tag>,
    pub custom_key_store_id: Option<String>,
}

impl NewKey {
    /// A Native symmetric key owned by `owner`
    pub fn symmetric(owner: Principal) -> Self {
        Self {
            owner,
            description: String::new(),
            origin: Origin::Native,
            key_usage: KeyUsage::EncryptDecrypt,
            key_spec: KeySpec::SymmetricDefault,
            policy: None,
            tags: Vec::new(),
            custom_key_store_id: None,
        }
    }
}

type SharedRecord = Arc<RwLock<CmkRecord>>;

/// Owner of every CMK record
///
/// The map lock guards membership; each record has its own `RwLock`, whose write
/// guard is the exclusive per-key lock held for the duration of a state change.
#[derive(Debug)]
pub struct KeyStore {
    scope: ResourceScope,
    max_keys: usize,
    max_tags_per_key: usize,
    rotation_period: Duration,
    keys: RwLock<HashMap<String, SharedRecord>>,
    sequence: AtomicU64,
}

impl KeyStore {
    /// Creates an empty store
    pub fn new(config: &KmsConfig) -> Self {
        Self {
            scope: ResourceScope::from_config(config),
            max_keys: config.max_keys,
            max_tags_per_key: config.max_tags_per_key,
            rotation_period: Duration::days(i64::from(config.rotation_period_days)),
            keys: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Returns the resource scope of this store
    pub fn scope(&self) -> &ResourceScope {
        &self.scope
    }

    /// Returns the number of live keys
    pub fn len(&self) -> Result<usize> {
        Ok(self.keys.read()?.len())
    }

    /// Returns true if the store holds no keys
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Creates a key and returns its descriptor
    ///
    /// Material is generated before the store is locked; the quota check and insert
    /// happen under one map write lock.
    pub fn create_key(&self, new: NewKey, now: DateTime<Utc>) -> Result<KeyMetadata> {
        if new.description.chars().count() > MAX_DESCRIPTION_LENGTH {
            return Err(Error::Validation(format!(
                "description exceeds {} characters",
                MAX_DESCRIPTION_LENGTH
            )));
        }
        match (new.key_usage, new.key_spec) {
            (KeyUsage::EncryptDecrypt, KeySpec::SymmetricDefault)
            | (KeyUsage::SignVerify, KeySpec::Rsa2048) => {}
            (usage, spec) => {
                return Err(Error::Validation(format!(
                    "key spec {:?} does not support key usage {:?}",
                    spec, usage
                )))
            }
        }
        if new.key_usage == KeyUsage::SignVerify && new.origin != Origin::Native {
            return Err(Error::UnsupportedOperation(format!(
                "SignVerify keys must have origin Native, got {:?}",
                new.origin
            )));
        }
        if (new.origin == Origin::CustomStore) != new.custom_key_store_id.is_some() {
            return Err(Error::Validation(
                "a custom key store id is required exactly when origin is CustomStore".into(),
            ));
        }

        let policy = match new.policy {
            Some(policy) => {
                validate_policy(&policy)?;
                policy
            }
            None => default_policy(&self.scope),
        };
        let tags = self.collect_tags(BTreeMap::new(), &new.tags)?;

        let (state, material) = match (new.origin, new.key_usage) {
            (Origin::External, _) => (KeyState::PendingImport, None),
            (_, KeyUsage::SignVerify) => (
                KeyState::Enabled,
                Some(KeyMaterial::Signing(SigningKeyMaterial::generate()?)),
            ),
            (_, KeyUsage::EncryptDecrypt) => {
                (KeyState::Enabled, Some(KeyMaterial::random_symmetric()))
            }
        };

        let key_id = uuid::Uuid::new_v4().to_string();
        let record = CmkRecord {
            arn: self.scope.key_arn(&key_id),
            key_id: key_id.clone(),
            account_id: self.scope.account_id.clone(),
            owner: new.owner,
            description: new.description,
            state,
            origin: new.origin,
            key_usage: new.key_usage,
            key_spec: new.key_spec,
            material,
            imported_fingerprint: None,
            rotation_enabled: false,
            next_rotation: None,
            creation_date: now,
            deletion_date: None,
            valid_to: None,
            expiration_model: None,
            tags,
            policy,
            custom_key_store_id: new.custom_key_store_id,
            resume_state: None,
            destroyed: false,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
        };
        let metadata = record.metadata();

        let mut keys = self.keys.write()?;
        if keys.len() >= self.max_keys {
            return Err(Error::LimitExceeded(format!(
                "account already holds the maximum of {} keys",
                self.max_keys
            )));
        }
        keys.insert(key_id, Arc::new(RwLock::new(record)));
        drop(keys);

        log::info!(
            "created key {} (origin {:?}, usage {:?}, state {:?})",
            metadata.key_id,
            metadata.origin,
            metadata.key_usage,
            metadata.key_state
        );
        Ok(metadata)
    }

    fn record(&self, key_id: &str) -> Result<SharedRecord> {
        self.keys
            .read()?
            .get(key_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("key {} does not exist", key_id)))
    }

    /// Resolves any key identifier form to a key id
    ///
    /// Alias names and alias ARNs go through `aliases`; the result always names a key
    /// that exists in this store.
    pub fn resolve(&self, reference: &str, aliases: &AliasRegistry) -> Result<String> {
        let key_id = match self.scope.parse_reference(reference)? {
            KeyReference::KeyId(key_id) => key_id,
            KeyReference::Alias(name) => aliases.resolve(&name)?,
        };
        self.with_key(&key_id, |_| Ok(()))?;
        Ok(key_id)
    }

    /// Resolves an identifier that must not be an alias
    pub fn resolve_key_only(&self, reference: &str) -> Result<String> {
        match self.scope.parse_reference(reference)? {
            KeyReference::KeyId(key_id) => {
                self.with_key(&key_id, |_| Ok(()))?;
                Ok(key_id)
            }
            KeyReference::Alias(name) => Err(Error::Validation(format!(
                "{} is an alias; a key id or key ARN is required",
                name
            ))),
        }
    }

    /// Runs `f` under the key's read lock
    pub fn with_key<R>(&self, key_id: &str, f: impl FnOnce(&CmkRecord) -> Result<R>) -> Result<R> {
        let record = self.record(key_id)?;
        let guard = record.read()?;
        if guard.destroyed {
            return Err(Error::NotFound(format!("key {} does not exist", key_id)));
        }
        f(&guard)
    }

    /// Runs `f` under the key's exclusive lock
    pub fn with_key_mut<R>(
        &self,
        key_id: &str,
        f: impl FnOnce(&mut CmkRecord) -> Result<R>,
    ) -> Result<R> {
        let record = self.record(key_id)?;
        let mut guard = record.write()?;
        if guard.destroyed {
            return Err(Error::NotFound(format!("key {} does not exist", key_id)));
        }
        f(&mut guard)
    }

    /// Like `with_key_mut`, but reports a key the sweep is destroying as `InvalidState`
    fn with_key_mut_racing_sweep<R>(
        &self,
        key_id: &str,
        f: impl FnOnce(&mut CmkRecord) -> Result<R>,
    ) -> Result<R> {
        let record = self.record(key_id)?;
        Self::mutate_racing_sweep(&record, key_id, f)
    }

    /// Runs `f` under the exclusive lock of a record already taken from the map
    ///
    /// The record may have been destroyed since the lookup; that is `InvalidState`.
    fn mutate_racing_sweep<R>(
        record: &SharedRecord,
        key_id: &str,
        f: impl FnOnce(&mut CmkRecord) -> Result<R>,
    ) -> Result<R> {
        let mut guard = record.write()?;
        if guard.destroyed {
            return Err(Error::InvalidState(format!(
                "key {} is already being deleted",
                key_id
            )));
        }
        f(&mut guard)
    }

    /// Returns the key's descriptor
    pub fn describe(&self, key_id: &str) -> Result<KeyMetadata> {
        self.with_key(key_id, |record| Ok(record.metadata()))
    }

    /// Lists every key in creation order
    pub fn list_keys(&self, page: &PageRequest) -> Result<Page<KeyListEntry>> {
        let records: Vec<SharedRecord> = self.keys.read()?.values().cloned().collect();

        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            let record = record.read()?;
            if record.destroyed {
                continue;
            }
            entries.push((
                record.sequence,
                KeyListEntry {
                    key_id: record.key_id.clone(),
                    key_arn: record.arn.clone(),
                },
            ));
        }
        entries.sort_by_key(|(sequence, _)| *sequence);
        paginate(entries, page)
    }

    /// Enables a key; enabling an enabled key is a no-op
    pub fn enable_key(&self, key_id: &str) -> Result<()> {
        self.with_key_mut(key_id, |record| match record.state {
            KeyState::Enabled => Ok(()),
            KeyState::Disabled => {
                record.state = KeyState::Enabled;
                log::info!("key {} enabled", key_id);
                Ok(())
            }
            KeyState::Unavailable => Err(Error::KeyUnavailable(format!(
                "custom key store of {} is disconnected",
                record.arn
            ))),
            state => Err(Error::InvalidState(format!(
                "cannot enable {} in state {:?}",
                record.arn, state
            ))),
        })
    }

    /// Disables a key; disabling a disabled key is a no-op
    pub fn disable_key(&self, key_id: &str) -> Result<()> {
        self.with_key_mut(key_id, |record| match record.state {
            KeyState::Disabled => Ok(()),
            KeyState::Enabled => {
                record.state = KeyState::Disabled;
                log::info!("key {} disabled", key_id);
                Ok(())
            }
            KeyState::Unavailable => Err(Error::KeyUnavailable(format!(
                "custom key store of {} is disconnected",
                record.arn
            ))),
            state => Err(Error::InvalidState(format!(
                "cannot disable {} in state {:?}",
                record.arn, state
            ))),
        })
    }

    /// Schedules a key for deletion `days` from `now` and returns the deletion date
    ///
    /// Scheduling a key that is already pending deletion restarts its waiting period.
    pub fn schedule_deletion(
        &self,
        key_id: &str,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        use crate::config::{MAX_DELETION_WINDOW_DAYS, MIN_DELETION_WINDOW_DAYS};

        if !(MIN_DELETION_WINDOW_DAYS..=MAX_DELETION_WINDOW_DAYS).contains(&days) {
            return Err(Error::Validation(format!(
                "pending window must be between {} and {} days, got {}",
                MIN_DELETION_WINDOW_DAYS, MAX_DELETION_WINDOW_DAYS, days
            )));
        }

        self.with_key_mut_racing_sweep(key_id, |record| {
            if record.state == KeyState::PendingReplicaDeletion {
                return Err(Error::InvalidState(format!(
                    "cannot schedule deletion of {} in state {:?}",
                    record.arn, record.state
                )));
            }
            let deletion_date = now + Duration::days(i64::from(days));
            record.state = KeyState::PendingDeletion;
            record.deletion_date = Some(deletion_date);
            log::info!("key {} scheduled for deletion at {}", key_id, deletion_date);
            Ok(deletion_date)
        })
    }

    /// Cancels a scheduled deletion
    ///
    /// The key comes back `Disabled`. An External key without material comes back
    /// `PendingImport`, and a key whose custom key store is disconnected comes back
    /// `Unavailable` and will be `Disabled` once the store reconnects.
    pub fn cancel_deletion(&self, key_id: &str) -> Result<KeyState> {
        self.with_key_mut_racing_sweep(key_id, cancel_pending_deletion)
    }

    /// Replaces the key description
    pub fn update_description(&self, key_id: &str, description: String) -> Result<()> {
        if description.chars().count() > MAX_DESCRIPTION_LENGTH {
            return Err(Error::Validation(format!(
                "description exceeds {} characters",
                MAX_DESCRIPTION_LENGTH
            )));
        }
        self.with_key_mut(key_id, |record| {
            record.ensure_not_pending_deletion()?;
            record.description = description;
            Ok(())
        })
    }

    fn ensure_rotatable(record: &CmkRecord) -> Result<()> {
        if record.origin != Origin::Native || record.key_usage != KeyUsage::EncryptDecrypt {
            return Err(Error::UnsupportedOperation(format!(
                "automatic rotation is only available for Native symmetric keys, {} is {:?}/{:?}",
                record.arn, record.origin, record.key_usage
            )));
        }
        record.ensure_usable()
    }

    /// Turns on yearly rotation; the first rotation is one period from `now`
    pub fn enable_rotation(&self, key_id: &str, now: DateTime<Utc>) -> Result<()> {
        let period = self.rotation_period;
        self.with_key_mut(key_id, |record| {
            Self::ensure_rotatable(record)?;
            if !record.rotation_enabled {
                record.rotation_enabled = true;
                record.next_rotation = Some(now + period);
                log::info!("rotation enabled for key {}", key_id);
            }
            Ok(())
        })
    }

    /// Turns off rotation; existing generations stay decryptable
    pub fn disable_rotation(&self, key_id: &str) -> Result<()> {
        self.with_key_mut(key_id, |record| {
            Self::ensure_rotatable(record)?;
            record.rotation_enabled = false;
            record.next_rotation = None;
            log::info!("rotation disabled for key {}", key_id);
            Ok(())
        })
    }

    /// Returns whether rotation is enabled
    pub fn rotation_status(&self, key_id: &str) -> Result<bool> {
        self.with_key(key_id, |record| {
            if record.origin != Origin::Native || record.key_usage != KeyUsage::EncryptDecrypt {
                return Err(Error::UnsupportedOperation(format!(
                    "{} does not support automatic rotation",
                    record.arn
                )));
            }
            Ok(record.rotation_enabled)
        })
    }

    /// Appends a fresh generation to every Enabled key whose rotation is due
    pub fn rotate_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let period = self.rotation_period;
        let mut rotated = 0;
        for record in self.snapshot()? {
            let mut record = record.write()?;
            let due = record.rotation_enabled
                && !record.destroyed
                && record.state == KeyState::Enabled
                && record.next_rotation.map_or(false, |at| at <= now);
            if !due {
                continue;
            }
            if let Some(KeyMaterial::Symmetric(generations)) = record.material.as_mut() {
                generations.push(random_symmetric_key());
                let count = generations.len();
                record.next_rotation = Some(now + period);
                rotated += 1;
                log::info!("rotated key {} to generation {}", record.key_id, count - 1);
            }
        }
        Ok(rotated)
    }

    fn ensure_policy_name(name: &str) -> Result<()> {
        if name != DEFAULT_POLICY_NAME {
            return Err(Error::NotFound(format!(
                "policy {} does not exist; the only policy name is {}",
                name, DEFAULT_POLICY_NAME
            )));
        }
        Ok(())
    }

    /// Returns a key policy document verbatim
    pub fn policy(&self, key_id: &str, name: &str) -> Result<String> {
        Self::ensure_policy_name(name)?;
        self.with_key(key_id, |record| Ok(record.policy.clone()))
    }

    /// Replaces a key policy document
    pub fn put_policy(&self, key_id: &str, name: &str, document: String) -> Result<()> {
        Self::ensure_policy_name(name)?;
        validate_policy(&document)?;
        self.with_key_mut(key_id, |record| {
            record.ensure_not_pending_deletion()?;
            record.policy = document;
            Ok(())
        })
    }

    /// Returns the policy names of a key
    pub fn list_policies(&self, key_id: &str) -> Result<Vec<String>> {
        self.with_key(key_id, |_| Ok(vec![DEFAULT_POLICY_NAME.to_string()]))
    }

    fn collect_tags(
        &self,
        mut existing: BTreeMap<String, String>,
        tags: &[Tag],
    ) -> Result<BTreeMap<String, String>> {
        for tag in tags {
            tag.validate()?;
            existing.insert(tag.tag_key.clone(), tag.tag_value.clone());
        }
        if existing.len() > self.max_tags_per_key {
            return Err(Error::LimitExceeded(format!(
                "a key may carry at most {} tags",
                self.max_tags_per_key
            )));
        }
        Ok(existing)
    }

    /// Adds or overwrites tags
    pub fn tag(&self, key_id: &str, tags: &[Tag]) -> Result<()> {
        self.with_key_mut(key_id, |record| {
            record.ensure_not_pending_deletion()?;
            record.tags = self.collect_tags(record.tags.clone(), tags)?;
            Ok(())
        })
    }

    /// Removes tags by key; absent keys are ignored
    pub fn untag(&self, key_id: &str, tag_keys: &[String]) -> Result<()> {
        self.with_key_mut(key_id, |record| {
            record.ensure_not_pending_deletion()?;
            for key in tag_keys {
                record.tags.remove(key);
            }
            Ok(())
        })
    }

    /// Returns the tags of a key, sorted by tag key
    pub fn tags(&self, key_id: &str) -> Result<Vec<Tag>> {
        self.with_key(key_id, |record| {
            Ok(record
                .tags
                .iter()
                .map(|(k, v)| Tag::new(k.clone(), v.clone()))
                .collect())
        })
    }

    /// Drops the imported material of an External key
    pub fn delete_imported_material(&self, key_id: &str) -> Result<KeyState> {
        self.with_key_mut(key_id, |record| {
            if record.origin != Origin::External {
                return Err(Error::UnsupportedOperation(format!(
                    "{} has origin {:?}; only imported material can be deleted",
                    record.arn, record.origin
                )));
            }
            Self::clear_imported_material(record);
            log::info!("imported material of key {} deleted", key_id);
            Ok(record.state)
        })
    }

    fn clear_imported_material(record: &mut CmkRecord) {
        record.material = None;
        record.valid_to = None;
        record.expiration_model = None;
        if record.state != KeyState::PendingDeletion {
            record.state = KeyState::PendingImport;
        }
    }

    /// Installs unwrapped material into a PendingImport External key
    ///
    /// Material that differs from the first material ever imported into the key is
    /// rejected, so old ciphertexts stay decryptable after a re-import.
    pub fn install_imported_material(
        &self,
        key_id: &str,
        material: &[u8],
        expiration_model: ExpirationModel,
        valid_to: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let valid_to = match (expiration_model, valid_to) {
            (ExpirationModel::KeyMaterialExpires, Some(valid_to)) if valid_to > now => {
                Some(valid_to)
            }
            (ExpirationModel::KeyMaterialExpires, _) => {
                return Err(Error::Validation(
                    "KeyMaterialExpires requires a valid_to in the future".into(),
                ))
            }
            (ExpirationModel::KeyMaterialDoesNotExpire, None) => None,
            (ExpirationModel::KeyMaterialDoesNotExpire, Some(_)) => {
                return Err(Error::Validation(
                    "valid_to must be omitted when the material does not expire".into(),
                ))
            }
        };

        let new_material = KeyMaterial::from_imported(material)?;
        let fingerprint: [u8; 32] = Sha256::digest(material).into();

        self.with_key_mut(key_id, |record| {
            if record.origin != Origin::External {
                return Err(Error::UnsupportedOperation(format!(
                    "{} has origin {:?}; key material can only be imported into External keys",
                    record.arn, record.origin
                )));
            }
            if record.state != KeyState::PendingImport {
                return Err(Error::InvalidState(format!(
                    "{} is {:?}, not PendingImport",
                    record.arn, record.state
                )));
            }
            match record.imported_fingerprint {
                Some(previous) if !crate::util::secure_eq(&previous, &fingerprint) => {
                    return Err(Error::IncorrectKeyMaterial(format!(
                        "{} was created with different key material",
                        record.arn
                    )))
                }
                _ => {}
            }

            record.imported_fingerprint = Some(fingerprint);
            record.material = Some(new_material);
            record.expiration_model = Some(expiration_model);
            record.valid_to = valid_to;
            record.state = KeyState::Enabled;
            log::info!("key material imported into key {}", key_id);
            Ok(())
        })
    }

    /// Drops imported material whose validity has ended
    pub fn expire_imported_material(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut expired = 0;
        for record in self.snapshot()? {
            let mut record = record.write()?;
            let due = !record.destroyed
                && record.origin == Origin::External
                && record.material.is_some()
                && record.valid_to.map_or(false, |valid_to| valid_to <= now);
            if due {
                Self::clear_imported_material(&mut record);
                expired += 1;
                log::info!("imported material of key {} expired", record.key_id);
            }
        }
        Ok(expired)
    }

    /// Returns the ids of keys whose waiting period has elapsed
    pub fn due_for_deletion(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let mut due = Vec::new();
        for record in self.snapshot()? {
            let record = record.read()?;
            if !record.destroyed
                && record.state == KeyState::PendingDeletion
                && record.deletion_date.map_or(false, |at| at <= now)
            {
                due.push(record.key_id.clone());
            }
        }
        Ok(due)
    }

    /// Destroys a key whose waiting period has elapsed
    ///
    /// The tombstone is set under the key's exclusive lock before the record leaves the
    /// map, so a concurrent cancellation either wins the lock first (and the key is no
    /// longer due) or sees the tombstone and fails. Returns false if the key was not due.
    pub fn finalize_deletion(&self, key_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let record = match self.record(key_id) {
            Ok(record) => record,
            Err(Error::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        {
            let mut guard = record.write()?;
            let due = !guard.destroyed
                && guard.state == KeyState::PendingDeletion
                && guard.deletion_date.map_or(false, |at| at <= now);
            if !due {
                return Ok(false);
            }
            guard.destroyed = true;
            guard.material = None;
            guard.tags.clear();
        }

        self.keys.write()?.remove(key_id);
        log::info!("key {} deleted", key_id);
        Ok(true)
    }

    /// Ids of the keys backed by custom key store `store_id`
    pub fn keys_in_custom_store(&self, store_id: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for record in self.snapshot()? {
            let record = record.read()?;
            if !record.destroyed && record.custom_key_store_id.as_deref() == Some(store_id) {
                ids.push(record.key_id.clone());
            }
        }
        Ok(ids)
    }

    /// Marks the keys of a disconnected custom key store `Unavailable`
    pub fn mark_custom_store_unavailable(&self, store_id: &str) -> Result<usize> {
        let mut changed = 0;
        for record in self.snapshot()? {
            let mut record = record.write()?;
            if record.destroyed || record.custom_key_store_id.as_deref() != Some(store_id) {
                continue;
            }
            match record.state {
                KeyState::Enabled | KeyState::Disabled => {
                    record.resume_state = Some(record.state);
                    record.state = KeyState::Unavailable;
                    changed += 1;
                }
                KeyState::PendingDeletion => {
                    record.resume_state = Some(KeyState::Disabled);
                }
                _ => {}
            }
        }
        Ok(changed)
    }

    /// Restores the keys of a reconnected custom key store
    pub fn restore_custom_store(&self, store_id: &str) -> Result<usize> {
        let mut changed = 0;
        for record in self.snapshot()? {
            let mut record = record.write()?;
            if record.destroyed || record.custom_key_store_id.as_deref() != Some(store_id) {
                continue;
            }
            let resume = record.resume_state.take();
            if record.state == KeyState::Unavailable {
                record.state = resume.unwrap_or(KeyState::Disabled);
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn snapshot(&self) -> Result<Vec<SharedRecord>> {
        Ok(self.keys.read()?.values().cloned().collect())
    }
}

fn cancel_pending_deletion(record: &mut CmkRecord) -> Result<KeyState> {
    if record.state != KeyState::PendingDeletion {
        return Err(Error::InvalidState(format!(
            "{} is not pending deletion",
            record.arn
        )));
    }
    record.deletion_date = None;
    record.state = if record.resume_state.is_some() {
        record.resume_state = Some(KeyState::Disabled);
        KeyState::Unavailable
    } else if record.material.is_none() {
        KeyState::PendingImport
    } else {
        KeyState::Disabled
    };
    log::info!(
        "deletion of key {} cancelled, now {:?}",
        record.key_id,
        record.state
    );
    Ok(record.state)
}

//! Grants: delegated, revocable permissions on a single CMK
//!
//! A grant names a grantee principal, the operations it may perform on one key and,
//! optionally, encryption context constraints. Grant tokens are
//! `base64url(grant id bytes || secret)`; the id part locates the grant and the whole
//! token is compared in constant time.

use crate::error::{Error, Result};
use crate::model::{EncryptionContext, Principal};
use crate::util::{fill_random, paginate, secure_eq, Page, PageRequest};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

const GRANT_ID_SIZE: usize = 32;
const GRANT_SECRET_SIZE: usize = 32;

/// Operations a grant can permit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GrantOperation {
    Decrypt,
    Encrypt,
    GenerateDataKey,
    GenerateDataKeyWithoutPlaintext,
    ReEncryptFrom,
    ReEncryptTo,
    Sign,
    Verify,
    GetPublicKey,
    CreateGrant,
    RetireGrant,
    DescribeKey,
}

/// Encryption context conditions of a grant
///
/// `encryption_context_equals` requires the request context to be exactly the given
/// map; `encryption_context_subset` requires the request context to contain every
/// given pair. When both are set, both must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GrantConstraints {
    pub encryption_context_equals: Option<EncryptionContext>,
    pub encryption_context_subset: Option<EncryptionContext>,
}

impl GrantConstraints {
    /// Requires the request context to equal `context`
    pub fn equals(context: EncryptionContext) -> Self {
        Self {
            encryption_context_equals: Some(context),
            encryption_context_subset: None,
        }
    }

    /// Requires the request context to contain `context`
    pub fn subset(context: EncryptionContext) -> Self {
        Self {
            encryption_context_equals: None,
            encryption_context_subset: Some(context),
        }
    }

    fn validate(&self) -> Result<()> {
        let empty = |c: &Option<EncryptionContext>| c.as_ref().map_or(true, |c| c.is_empty());
        if empty(&self.encryption_context_equals) && empty(&self.encryption_context_subset) {
            return Err(Error::Validation(
                "grant constraints must name at least one encryption context pair".into(),
            ));
        }
        Ok(())
    }

    /// Returns true if `context` satisfies the constraints
    pub fn matches(&self, context: &EncryptionContext) -> bool {
        let equals = self
            .encryption_context_equals
            .as_ref()
            .map_or(true, |required| required == context);
        let subset = self.encryption_context_subset.as_ref().map_or(true, |required| {
            required
                .iter()
                .all(|(k, v)| context.get(k).map_or(false, |actual| actual == v))
        });
        equals && subset
    }
}

/// Caller-visible description of a grant; the token is never listed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Grant {
    pub grant_id: String,
    pub key_id: String,
    pub name: Option<String>,
    pub grantee_principal: Principal,
    pub retiring_principal: Option<Principal>,
    pub issuing_principal: Principal,
    pub operations: BTreeSet<GrantOperation>,
    pub constraints: Option<GrantConstraints>,
    pub creation_date: DateTime<Utc>,
}

impl Grant {
    fn permits(&self, grantee: &Principal, operation: GrantOperation, context: &EncryptionContext) -> bool {
        self.grantee_principal == *grantee
            && self.operations.contains(&operation)
            && self.constraints.as_ref().map_or(true, |c| c.matches(context))
    }
}

/// Parameters of a new grant
#[derive(Debug, Clone)]
pub struct NewGrant {
    pub key_id: String,
    pub grantee_principal: Principal,
    pub operations: BTreeSet<GrantOperation>,
    pub constraints: Option<GrantConstraints>,
    pub retiring_principal: Option<Principal>,
    pub name: Option<String>,
}

/// Identifies the grant to retire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantSelector {
    Token(String),
    Id { key_id: String, grant_id: String },
}

struct GrantEntry {
    grant: Grant,
    token: String,
    sequence: u64,
}

#[derive(Default)]
struct GrantTable {
    grants: HashMap<String, GrantEntry>,
    per_key: HashMap<String, usize>,
    sequence: u64,
}

impl GrantTable {
    fn remove(&mut self, grant_id: &str) -> Option<GrantEntry> {
        let entry = self.grants.remove(grant_id)?;
        if let Some(count) = self.per_key.get_mut(&entry.grant.key_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.per_key.remove(&entry.grant.key_id);
            }
        }
        Some(entry)
    }

    fn by_token(&self, token: &str) -> Result<&GrantEntry> {
        let invalid = || Error::InvalidGrantToken("grant token is not valid".into());

        let raw = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid())?;
        if raw.len() != GRANT_ID_SIZE + GRANT_SECRET_SIZE {
            return Err(invalid());
        }
        let grant_id = hex::encode(&raw[..GRANT_ID_SIZE]);
        let entry = self.grants.get(&grant_id).ok_or_else(invalid)?;
        if !secure_eq(entry.token.as_bytes(), token.as_bytes()) {
            return Err(invalid());
        }
        Ok(entry)
    }

    fn by_id(&self, key_id: &str, grant_id: &str) -> Result<&GrantEntry> {
        self.grants
            .get(grant_id)
            .filter(|entry| entry.grant.key_id == key_id)
            .ok_or_else(|| {
                Error::InvalidGrantId(format!("grant {} does not exist on key {}", grant_id, key_id))
            })
    }
}

/// Registry of every grant in the account
///
/// One mutex covers the table, so the per-key quota check and the insert are atomic.
pub struct GrantRegistry {
    max_grants_per_key: usize,
    table: Mutex<GrantTable>,
}

impl std::fmt::Debug for GrantRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantRegistry")
            .field("max_grants_per_key", &self.max_grants_per_key)
            .finish()
    }
}

impl GrantRegistry {
    /// Creates an empty registry
    pub fn new(max_grants_per_key: usize) -> Self {
        Self {
            max_grants_per_key,
            table: Mutex::new(GrantTable::default()),
        }
    }

    /// Creates a grant issued by `issuer` and returns `(grant_id, grant_token)`
    ///
    /// A named grant whose parameters match an existing grant with that name on the
    /// same key is returned as-is instead of being created again.
    pub fn create(
        &self,
        issuer: &Principal,
        new: NewGrant,
        now: DateTime<Utc>,
    ) -> Result<(String, String)> {
        if new.operations.is_empty() {
            return Err(Error::Validation("a grant needs at least one operation".into()));
        }
        if let Some(constraints) = &new.constraints {
            constraints.validate()?;
        }

        let mut table = self.table.lock()?;

        if let Some(name) = &new.name {
            let existing = table.grants.values().find(|entry| {
                let g = &entry.grant;
                g.key_id == new.key_id
                    && g.name.as_ref() == Some(name)
                    && g.grantee_principal == new.grantee_principal
                    && g.operations == new.operations
                    && g.constraints == new.constraints
                    && g.retiring_principal == new.retiring_principal
            });
            if let Some(entry) = existing {
                log::debug!("grant {} already exists with name {}", entry.grant.grant_id, name);
                return Ok((entry.grant.grant_id.clone(), entry.token.clone()));
            }
        }

        let count = table.per_key.get(&new.key_id).copied().unwrap_or(0);
        if count >= self.max_grants_per_key {
            return Err(Error::LimitExceeded(format!(
                "key {} already has the maximum of {} grants",
                new.key_id, self.max_grants_per_key
            )));
        }

        let mut raw = [0_u8; GRANT_ID_SIZE + GRANT_SECRET_SIZE];
        fill_random(&mut raw);
        let grant_id = hex::encode(&raw[..GRANT_ID_SIZE]);
        let token = URL_SAFE_NO_PAD.encode(raw);

        let grant = Grant {
            grant_id: grant_id.clone(),
            key_id: new.key_id.clone(),
            name: new.name,
            grantee_principal: new.grantee_principal,
            retiring_principal: new.retiring_principal,
            issuing_principal: issuer.clone(),
            operations: new.operations,
            constraints: new.constraints,
            creation_date: now,
        };

        table.sequence += 1;
        let sequence = table.sequence;
        *table.per_key.entry(new.key_id.clone()).or_insert(0) += 1;
        table.grants.insert(
            grant_id.clone(),
            GrantEntry {
                grant,
                token: token.clone(),
                sequence,
            },
        );

        log::info!("grant {} created on key {}", grant_id, new.key_id);
        Ok((grant_id, token))
    }

    fn page_of(
        &self,
        filter: impl Fn(&Grant) -> bool,
        page: &PageRequest,
    ) -> Result<Page<Grant>> {
        let table = self.table.lock()?;
        let mut entries: Vec<(u64, Grant)> = table
            .grants
            .values()
            .filter(|entry| filter(&entry.grant))
            .map(|entry| (entry.sequence, entry.grant.clone()))
            .collect();
        drop(table);

        entries.sort_by_key(|(sequence, _)| *sequence);
        paginate(entries, page)
    }

    /// Lists the grants on `key_id` in creation order
    pub fn list_for_key(&self, key_id: &str, page: &PageRequest) -> Result<Page<Grant>> {
        self.page_of(|grant| grant.key_id == key_id, page)
    }

    /// Lists the grants `principal` may retire, in creation order
    pub fn list_retirable(&self, principal: &Principal, page: &PageRequest) -> Result<Page<Grant>> {
        self.page_of(
            |grant| grant.retiring_principal.as_ref() == Some(principal),
            page,
        )
    }

    /// Returns the grant a token belongs to
    pub fn find_by_token(&self, token: &str) -> Result<Grant> {
        Ok(self.table.lock()?.by_token(token)?.grant.clone())
    }

    /// Retires a grant on behalf of `caller`
    ///
    /// Allowed for the grant's issuer, its retiring principal, or its grantee when the
    /// grant includes `RetireGrant`.
    pub fn retire(&self, caller: &Principal, selector: &GrantSelector) -> Result<Grant> {
        let mut table = self.table.lock()?;
        let grant = match selector {
            GrantSelector::Token(token) => &table.by_token(token)?.grant,
            GrantSelector::Id { key_id, grant_id } => &table.by_id(key_id, grant_id)?.grant,
        };

        let allowed = grant.issuing_principal == *caller
            || grant.retiring_principal.as_ref() == Some(caller)
            || (grant.grantee_principal == *caller
                && grant.operations.contains(&GrantOperation::RetireGrant));
        if !allowed {
            return Err(Error::AccessDenied(format!(
                "{} may not retire grant {}",
                caller, grant.grant_id
            )));
        }

        let grant_id = grant.grant_id.clone();
        let entry = table
            .remove(&grant_id)
            .ok_or_else(|| Error::Internal(format!("grant {} vanished during retire", grant_id)))?;
        log::info!("grant {} retired by {}", grant_id, caller);
        Ok(entry.grant)
    }

    /// Revokes a grant; callers check that the revoker administers the key
    pub fn revoke(&self, key_id: &str, grant_id: &str) -> Result<Grant> {
        let mut table = self.table.lock()?;
        table.by_id(key_id, grant_id)?;
        let entry = table
            .remove(grant_id)
            .ok_or_else(|| Error::Internal(format!("grant {} vanished during revoke", grant_id)))?;
        log::info!("grant {} on key {} revoked", grant_id, key_id);
        Ok(entry.grant)
    }

    /// Checks that `grantee` holds a grant for `operation` on `key_id`
    ///
    /// Every presented token must belong to a live grant, otherwise the call fails with
    /// `InvalidGrantToken`. Without a matching grant the call fails with `AccessDenied`.
    pub fn authorize(
        &self,
        key_id: &str,
        grantee: &Principal,
        operation: GrantOperation,
        context: &EncryptionContext,
        grant_tokens: &[String],
    ) -> Result<()> {
        let table = self.table.lock()?;
        for token in grant_tokens {
            table.by_token(token)?;
        }

        let permitted = table
            .grants
            .values()
            .any(|entry| entry.grant.key_id == key_id && entry.grant.permits(grantee, operation, context));
        if permitted {
            return Ok(());
        }
        Err(Error::AccessDenied(format!(
            "{} is not authorized to perform {:?} on key {}",
            grantee, operation, key_id
        )))
    }

    /// Number of live grants on `key_id`
    pub fn count_for_key(&self, key_id: &str) -> Result<usize> {
        Ok(self.table.lock()?.per_key.get(key_id).copied().unwrap_or(0))
    }

    /// Drops every grant on a deleted key
    pub fn remove_for_key(&self, key_id: &str) -> Result<usize> {
        let mut table = self.table.lock()?;
        let before = table.grants.len();
        table.grants.retain(|_, entry| entry.grant.key_id != key_id);
        table.per_key.remove(key_id);
        let removed = before - table.grants.len();
        if removed > 0 {
            log::debug!("removed {} grants of deleted key {}", removed, key_id);
        }
        Ok(removed)
    }
}

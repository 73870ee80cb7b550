//! Alias name to key id mapping

use crate::error::{Error, Result};
use crate::key::arn::{ResourceScope, ALIAS_PREFIX};
use crate::util::{paginate, Page, PageRequest};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Longest accepted alias name, including the `alias/` prefix
pub const MAX_ALIAS_NAME_LENGTH: usize = 256;
/// Prefix reserved for system aliases
pub const RESERVED_ALIAS_PREFIX: &str = "alias/aws/";

const ALIAS_NAME_PATTERN: &str = r"^alias/[a-zA-Z0-9/_-]+$";

/// Caller-visible alias entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Alias {
    pub alias_name: String,
    pub alias_arn: String,
    /// Unset for system aliases not yet bound to a key
    pub target_key_id: Option<String>,
    pub creation_date: DateTime<Utc>,
    pub last_updated_date: DateTime<Utc>,
}

/// Registry of every alias in the account
///
/// Entries are kept in a `BTreeMap` so listings come out ordered by name.
#[derive(Debug)]
pub struct AliasRegistry {
    scope: ResourceScope,
    name_pattern: Regex,
    aliases: RwLock<BTreeMap<String, Alias>>,
}

impl AliasRegistry {
    /// Creates a registry holding the given unbound system aliases
    pub fn new(scope: ResourceScope, system_aliases: &[String], now: DateTime<Utc>) -> Result<Self> {
        let name_pattern = Regex::new(ALIAS_NAME_PATTERN)
            .map_err(|e| Error::Internal(format!("invalid alias pattern: {}", e)))?;

        let mut aliases = BTreeMap::new();
        for name in system_aliases {
            if !name.starts_with(RESERVED_ALIAS_PREFIX) || !name_pattern.is_match(name) {
                return Err(Error::InvalidAliasName(format!(
                    "system alias {} must match {} and start with {}",
                    name, ALIAS_NAME_PATTERN, RESERVED_ALIAS_PREFIX
                )));
            }
            aliases.insert(
                name.clone(),
                Alias {
                    alias_name: name.clone(),
                    alias_arn: scope.alias_arn(name),
                    target_key_id: None,
                    creation_date: now,
                    last_updated_date: now,
                },
            );
        }

        Ok(Self {
            scope,
            name_pattern,
            aliases: RwLock::new(aliases),
        })
    }

    /// Checks that `name` is a valid customer alias name
    pub fn validate_name(&self, name: &str) -> Result<()> {
        if !name.starts_with(ALIAS_PREFIX) {
            return Err(Error::InvalidAliasName(format!(
                "{} must start with {}",
                name, ALIAS_PREFIX
            )));
        }
        if name.chars().count() > MAX_ALIAS_NAME_LENGTH {
            return Err(Error::InvalidAliasName(format!(
                "alias names are limited to {} characters",
                MAX_ALIAS_NAME_LENGTH
            )));
        }
        if !self.name_pattern.is_match(name) {
            return Err(Error::InvalidAliasName(format!(
                "{} does not match {}",
                name, ALIAS_NAME_PATTERN
            )));
        }
        if name.starts_with(RESERVED_ALIAS_PREFIX) {
            return Err(Error::InvalidAliasName(format!(
                "{} uses the reserved prefix {}",
                name, RESERVED_ALIAS_PREFIX
            )));
        }
        Ok(())
    }

    /// Binds a new alias to `key_id`
    pub fn create(&self, name: &str, key_id: &str, now: DateTime<Utc>) -> Result<Alias> {
        self.validate_name(name)?;

        let mut aliases = self.aliases.write()?;
        if aliases.contains_key(name) {
            return Err(Error::AlreadyExists(format!("alias {} already exists", name)));
        }

        let alias = Alias {
            alias_name: name.to_string(),
            alias_arn: self.scope.alias_arn(name),
            target_key_id: Some(key_id.to_string()),
            creation_date: now,
            last_updated_date: now,
        };
        aliases.insert(name.to_string(), alias.clone());
        log::info!("alias {} created for key {}", name, key_id);
        Ok(alias)
    }

    /// Points an existing alias at `key_id`
    pub fn update(&self, name: &str, key_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.validate_name(name)?;

        let mut aliases = self.aliases.write()?;
        let alias = aliases
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("alias {} does not exist", name)))?;
        alias.target_key_id = Some(key_id.to_string());
        alias.last_updated_date = now;
        log::info!("alias {} now points to key {}", name, key_id);
        Ok(())
    }

    /// Removes an alias; the key it pointed to is untouched
    pub fn delete(&self, name: &str) -> Result<Alias> {
        self.validate_name(name)?;

        let removed = self
            .aliases
            .write()?
            .remove(name)
            .ok_or_else(|| Error::NotFound(format!("alias {} does not exist", name)))?;
        log::info!("alias {} deleted", name);
        Ok(removed)
    }

    /// Returns an alias entry
    pub fn get(&self, name: &str) -> Result<Alias> {
        self.aliases
            .read()?
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("alias {} does not exist", name)))
    }

    /// Returns the key id an alias points to
    pub fn resolve(&self, name: &str) -> Result<String> {
        self.get(name)?
            .target_key_id
            .ok_or_else(|| Error::NotFound(format!("alias {} is not bound to a key", name)))
    }

    /// Lists aliases ordered by name, optionally only those pointing to `key_id`
    pub fn list(&self, key_id: Option<&str>, page: &PageRequest) -> Result<Page<Alias>> {
        let aliases = self.aliases.read()?;
        let entries = aliases
            .values()
            .filter(|alias| key_id.map_or(true, |id| alias.target_key_id.as_deref() == Some(id)))
            .map(|alias| (alias.alias_name.clone(), alias.clone()))
            .collect();
        drop(aliases);

        paginate(entries, page)
    }

    /// Removes every customer alias pointing to `key_id`
    ///
    /// System aliases bound to the key are unbound instead of removed.
    pub fn remove_for_key(&self, key_id: &str) -> Result<usize> {
        let mut aliases = self.aliases.write()?;
        let before = aliases.len();
        aliases.retain(|name, alias| {
            alias.target_key_id.as_deref() != Some(key_id) || name.starts_with(RESERVED_ALIAS_PREFIX)
        });
        let removed = before - aliases.len();

        for alias in aliases.values_mut() {
            if alias.target_key_id.as_deref() == Some(key_id) {
                alias.target_key_id = None;
            }
        }
        if removed > 0 {
            log::debug!("removed {} aliases of deleted key {}", removed, key_id);
        }
        Ok(removed)
    }
}

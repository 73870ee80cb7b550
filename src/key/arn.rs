//! Resource names and key identifier parsing

use crate::config::KmsConfig;
use crate::error::{Error, Result};
use crate::model::Principal;

/// Prefix every alias name carries
pub const ALIAS_PREFIX: &str = "alias/";

/// Partition, region and account that every resource of one service instance lives in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceScope {
    pub partition: String,
    pub region: String,
    pub account_id: String,
}

impl ResourceScope {
    /// Creates a scope
    pub fn new(
        partition: impl Into<String>,
        region: impl Into<String>,
        account_id: impl Into<String>,
    ) -> Self {
        Self {
            partition: partition.into(),
            region: region.into(),
            account_id: account_id.into(),
        }
    }

    /// Creates the scope described by `config`
    pub fn from_config(config: &KmsConfig) -> Self {
        Self::new(&config.partition, &config.region, &config.account_id)
    }

    fn arn_prefix(&self) -> String {
        format!("arn:{}:kms:{}:{}:", self.partition, self.region, self.account_id)
    }

    /// Returns the ARN of key `key_id`
    pub fn key_arn(&self, key_id: &str) -> String {
        format!("{}key/{}", self.arn_prefix(), key_id)
    }

    /// Returns the ARN of alias `alias_name` (which includes the `alias/` prefix)
    pub fn alias_arn(&self, alias_name: &str) -> String {
        format!("{}{}", self.arn_prefix(), alias_name)
    }

    /// Returns the account root principal, administrator of every key
    pub fn root_principal(&self) -> Principal {
        Principal::new(format!("arn:{}:iam::{}:root", self.partition, self.account_id))
    }

    /// Parses any key identifier form
    ///
    /// Accepts a key id, key ARN, alias name or alias ARN. ARNs that belong to another
    /// partition, region or account are reported as `NotFound`, since no such resource
    /// can exist in this scope.
    pub fn parse_reference(&self, reference: &str) -> Result<KeyReference> {
        if reference.is_empty() {
            return Err(Error::InvalidKeyId("key identifier must not be empty".into()));
        }

        if reference.starts_with(ALIAS_PREFIX) {
            return Ok(KeyReference::Alias(reference.to_string()));
        }

        if reference.starts_with("arn:") {
            let parts: Vec<&str> = reference.splitn(6, ':').collect();
            if parts.len() != 6 || parts[2] != "kms" || parts[5].is_empty() {
                return Err(Error::InvalidArn(reference.to_string()));
            }
            if parts[1] != self.partition || parts[3] != self.region || parts[4] != self.account_id
            {
                return Err(Error::NotFound(format!(
                    "{} is not in {}/{}",
                    reference, self.region, self.account_id
                )));
            }

            let resource = parts[5];
            if let Some(key_id) = resource.strip_prefix("key/") {
                validate_key_id(key_id).map_err(|_| Error::InvalidArn(reference.to_string()))?;
                return Ok(KeyReference::KeyId(key_id.to_string()));
            }
            if resource.starts_with(ALIAS_PREFIX) {
                return Ok(KeyReference::Alias(resource.to_string()));
            }
            return Err(Error::InvalidArn(reference.to_string()));
        }

        validate_key_id(reference)?;
        Ok(KeyReference::KeyId(reference.to_string()))
    }
}

/// A parsed key identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyReference {
    /// A bare key id (from a key id or key ARN)
    KeyId(String),
    /// An alias name including the `alias/` prefix (from an alias name or alias ARN)
    Alias(String),
}

fn validate_key_id(key_id: &str) -> Result<()> {
    uuid::Uuid::parse_str(key_id)
        .map(|_| ())
        .map_err(|_| Error::InvalidKeyId(format!("{} is not a key id", key_id)))
}

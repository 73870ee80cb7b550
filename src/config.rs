use crate::error::{Error, Result};
use serde::Deserialize;

/// Default values for KmsConfig
pub const DEFAULT_PARTITION: &str = "aws";
pub const DEFAULT_REGION: &str = "us-west-2";
pub const DEFAULT_ACCOUNT_ID: &str = "111122223333";
pub const DEFAULT_MAX_KEYS: usize = 10_000;
pub const DEFAULT_MAX_GRANTS_PER_KEY: usize = 50_000;
pub const DEFAULT_MAX_TAGS_PER_KEY: usize = 50;
pub const DEFAULT_DELETION_WINDOW_DAYS: u32 = 30;
pub const MIN_DELETION_WINDOW_DAYS: u32 = 7;
pub const MAX_DELETION_WINDOW_DAYS: u32 = 30;
pub const DEFAULT_IMPORT_PARAMETERS_TTL_HOURS: u32 = 24;
pub const DEFAULT_ROTATION_PERIOD_DAYS: u32 = 365;

/// Configuration for a key management service instance
///
/// Every field has a default, so a JSON document only needs to name the values it
/// overrides:
///
/// ```
/// use localkms::config::KmsConfig;
///
/// let config = KmsConfig::from_json(r#"{"region": "eu-central-1", "max_keys": 10}"#).unwrap();
/// assert_eq!(config.region, "eu-central-1");
/// assert_eq!(config.max_keys, 10);
/// assert_eq!(config.max_grants_per_key, 50_000);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KmsConfig {
    /// Partition component of generated ARNs
    pub partition: String,

    /// Region component of generated ARNs
    pub region: String,

    /// Account that owns every key in this instance
    pub account_id: String,

    /// Maximum number of keys, deleted keys excluded
    pub max_keys: usize,

    /// Maximum number of live grants per key
    pub max_grants_per_key: usize,

    /// Maximum number of tags per key
    pub max_tags_per_key: usize,

    /// Waiting period used when schedule_key_deletion names none
    pub default_deletion_window_days: u32,

    /// How long import parameters remain redeemable
    pub import_parameters_ttl_hours: u32,

    /// Interval between automatic rotations of a key with rotation enabled
    pub rotation_period_days: u32,

    /// Reserved aliases that are listed but not bound to any key
    pub system_aliases: Vec<String>,
}

impl Default for KmsConfig {
    fn default() -> Self {
        Self {
            partition: DEFAULT_PARTITION.to_string(),
            region: DEFAULT_REGION.to_string(),
            account_id: DEFAULT_ACCOUNT_ID.to_string(),
            max_keys: DEFAULT_MAX_KEYS,
            max_grants_per_key: DEFAULT_MAX_GRANTS_PER_KEY,
            max_tags_per_key: DEFAULT_MAX_TAGS_PER_KEY,
            default_deletion_window_days: DEFAULT_DELETION_WINDOW_DAYS,
            import_parameters_ttl_hours: DEFAULT_IMPORT_PARAMETERS_TTL_HOURS,
            rotation_period_days: DEFAULT_ROTATION_PERIOD_DAYS,
            system_aliases: Vec::new(),
        }
    }
}

impl KmsConfig {
    /// Creates a KmsConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a KmsConfig from JSON, filling missing fields with defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: KmsConfig = serde_json::from_str(json)
            .map_err(|e| Error::Validation(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the ARN scope
    pub fn with_scope(
        mut self,
        partition: impl Into<String>,
        region: impl Into<String>,
        account_id: impl Into<String>,
    ) -> Self {
        self.partition = partition.into();
        self.region = region.into();
        self.account_id = account_id.into();
        self
    }

    /// Sets the account key quota
    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys;
        self
    }

    /// Sets the per-key grant quota
    pub fn with_max_grants_per_key(mut self, max_grants: usize) -> Self {
        self.max_grants_per_key = max_grants;
        self
    }

    /// Sets the per-key tag quota
    pub fn with_max_tags_per_key(mut self, max_tags: usize) -> Self {
        self.max_tags_per_key = max_tags;
        self
    }

    /// Sets the default deletion waiting period
    ///
    /// The value must lie within the allowed window of 7 to 30 days.
    pub fn with_default_deletion_window_days(mut self, days: u32) -> Self {
        self.default_deletion_window_days = days;
        self
    }

    /// Sets the import parameter lifetime
    pub fn with_import_parameters_ttl_hours(mut self, hours: u32) -> Self {
        self.import_parameters_ttl_hours = hours;
        self
    }

    /// Sets the automatic rotation period
    pub fn with_rotation_period_days(mut self, days: u32) -> Self {
        self.rotation_period_days = days;
        self
    }

    /// Adds a reserved, unbound system alias
    pub fn with_system_alias(mut self, name: impl Into<String>) -> Self {
        self.system_aliases.push(name.into());
        self
    }

    /// Checks the configuration for values the service cannot honor
    pub fn validate(&self) -> Result<()> {
        if !(MIN_DELETION_WINDOW_DAYS..=MAX_DELETION_WINDOW_DAYS)
            .contains(&self.default_deletion_window_days)
        {
            return Err(Error::Validation(format!(
                "default deletion window must be between {} and {} days, got {}",
                MIN_DELETION_WINDOW_DAYS, MAX_DELETION_WINDOW_DAYS, self.default_deletion_window_days
            )));
        }
        if self.import_parameters_ttl_hours == 0 {
            return Err(Error::Validation(
                "import parameter lifetime must be at least one hour".into(),
            ));
        }
        if self.rotation_period_days == 0 {
            return Err(Error::Validation(
                "rotation period must be at least one day".into(),
            ));
        }
        if self.account_id.is_empty() || self.region.is_empty() || self.partition.is_empty() {
            return Err(Error::Validation(
                "partition, region and account id are required".into(),
            ));
        }
        Ok(())
    }
}

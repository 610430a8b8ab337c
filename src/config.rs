//! Configuration file, run guards, and parameter parsing.
//!
//! The file is TOML. Settings not present fall back to the defaults below;
//! command-line flags are layered on top by the binary.
//!
//! ```toml
//! [settings]
//! max_records_to_fix = 25
//! sleep_minutes = 7
//!
//! [types.pserver]
//! keys = ["hostname"]
//! display_name = "hostname"
//!
//! [types.l-interface]
//! keys = ["interface-name"]
//! dependent_on = ["pserver", "vserver"]
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::{Catalog, EntityTypeDescriptor, SchemaCatalog};
use crate::store::PropertyFilter;
use crate::types::{DedupeError, Result};

/// Default canonical-URI property name.
pub const DEFAULT_CANONICAL_URI_PROPERTY: &str = "canonical-uri";
/// Default creation-timestamp property name (epoch milliseconds).
pub const DEFAULT_CREATED_TS_PROPERTY: &str = "created-ts";
/// Default cap on confirmed groups fixed in one run.
pub const DEFAULT_MAX_RECORDS_TO_FIX: usize = 25;
/// Default delay between the two scan passes, in minutes.
pub const DEFAULT_SLEEP_MINUTES: u64 = 7;
/// Default worker pool size.
pub const DEFAULT_CONCURRENCY: usize = 5;
/// Upper bound on the worker pool size.
pub const MAX_CONCURRENCY: usize = 16;
/// Default minimum operator id length.
pub const DEFAULT_OPERATOR_MIN_LENGTH: usize = 6;

const DEFAULT_RESERVED_OPERATORS: [&str; 3] = ["admin", "administrator", "root"];

/// Property names the engine relies on in every entity type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Conventions {
    /// Unique external identifier property.
    pub canonical_uri_property: String,
    /// Creation timestamp property, epoch milliseconds.
    pub created_ts_property: String,
    /// Shape of the special-tenant override.
    pub tenant_rule: SpecialTenantRule,
}

impl Default for Conventions {
    fn default() -> Self {
        Self {
            canonical_uri_property: DEFAULT_CANONICAL_URI_PROPERTY.to_string(),
            created_ts_property: DEFAULT_CREATED_TS_PROPERTY.to_string(),
            tenant_rule: SpecialTenantRule::default(),
        }
    }
}

/// Entity types involved in the special-tenant tie-break override.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecialTenantRule {
    /// Type the override applies to.
    pub tenant_type: String,
    /// Neighbor type marking the losing side.
    pub leaf_type: String,
    /// Neighbor type marking the winning side.
    pub aggregate_type: String,
}

impl Default for SpecialTenantRule {
    fn default() -> Self {
        Self {
            tenant_type: "tenant".to_string(),
            leaf_type: "vserver".to_string(),
            aggregate_type: "service-subscription".to_string(),
        }
    }
}

/// Run settings resolved from the config file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Cap on confirmed groups; exceeding it skips deletion for the type.
    pub max_records_to_fix: usize,
    /// Delay between pass 1 and pass 2.
    pub sleep_between_passes: Duration,
    /// Only vertices created within this window are scanned.
    pub time_window: Option<Duration>,
    /// Worker pool size.
    pub concurrency: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_records_to_fix: DEFAULT_MAX_RECORDS_TO_FIX,
            sleep_between_passes: minutes(DEFAULT_SLEEP_MINUTES),
            time_window: None,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Converts whole minutes into a duration.
pub fn minutes(value: u64) -> Duration {
    Duration::from_secs(value.saturating_mul(60))
}

/// Converts a minute count where zero means "unbounded".
pub fn window_minutes(value: u64) -> Option<Duration> {
    (value > 0).then(|| minutes(value))
}

/// Checks a worker pool size.
pub fn validate_concurrency(value: usize) -> Result<usize> {
    if value == 0 || value > MAX_CONCURRENCY {
        return Err(DedupeError::Config(format!(
            "concurrency must be between 1 and {MAX_CONCURRENCY}, got {value}"
        )));
    }
    Ok(value)
}

/// Fully loaded configuration.
#[derive(Debug)]
pub struct DedupeConfig {
    path: Option<PathBuf>,
    /// Run settings.
    pub settings: Settings,
    /// Property-name conventions.
    pub conventions: Conventions,
    /// Operator guard.
    pub operator_policy: OperatorPolicy,
    /// Schema catalog from `[types]`.
    pub catalog: Catalog,
}

impl DedupeConfig {
    /// Loads `explicit`, else the default path, else built-in defaults.
    pub fn load(explicit: Option<PathBuf>) -> std::result::Result<Self, ConfigError> {
        let path = explicit.or_else(default_config_path);
        let raw = match path.as_ref() {
            Some(config_path) if config_path.exists() => read_file(config_path)?,
            _ => RawConfig::default(),
        };
        Self::from_raw(path, raw)
    }

    /// Parses configuration from TOML text.
    pub fn from_toml(text: &str) -> std::result::Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(text).map_err(|source| ConfigError::ParseInline { source })?;
        Self::from_raw(None, raw)
    }

    /// File the configuration came from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn from_raw(path: Option<PathBuf>, raw: RawConfig) -> std::result::Result<Self, ConfigError> {
        let defaults = Settings::default();
        let settings = Settings {
            max_records_to_fix: raw
                .settings
                .max_records_to_fix
                .unwrap_or(defaults.max_records_to_fix),
            sleep_between_passes: raw
                .settings
                .sleep_minutes
                .map(minutes)
                .unwrap_or(defaults.sleep_between_passes),
            time_window: raw.settings.time_window_minutes.and_then(window_minutes),
            concurrency: raw.settings.concurrency.unwrap_or(defaults.concurrency),
        };
        validate_concurrency(settings.concurrency).map_err(|err| ConfigError::Invalid {
            message: err.to_string(),
        })?;

        let conventions = Conventions {
            canonical_uri_property: raw
                .settings
                .canonical_uri_property
                .unwrap_or_else(|| DEFAULT_CANONICAL_URI_PROPERTY.to_string()),
            created_ts_property: raw
                .settings
                .created_ts_property
                .unwrap_or_else(|| DEFAULT_CREATED_TS_PROPERTY.to_string()),
            tenant_rule: raw.special_tenant_rule,
        };

        let operator_policy = OperatorPolicy {
            min_length: raw
                .operator
                .min_length
                .unwrap_or(DEFAULT_OPERATOR_MIN_LENGTH),
            reserved: raw.operator.reserved.unwrap_or_else(|| {
                DEFAULT_RESERVED_OPERATORS
                    .iter()
                    .map(|alias| alias.to_string())
                    .collect()
            }),
        };

        let mut catalog = Catalog::new();
        for (name, raw_type) in raw.types {
            let mut descriptor = EntityTypeDescriptor::new(name.clone(), raw_type.keys)
                .dependent_on(raw_type.dependent_on);
            descriptor.display_name_property = raw_type.display_name;
            catalog
                .insert(descriptor, raw_type.eligible)
                .map_err(|err| ConfigError::Invalid {
                    message: err.to_string(),
                })?;
        }

        Ok(Self {
            path,
            settings,
            conventions,
            operator_policy,
            catalog,
        })
    }
}

/// Default config location under the user's config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("graph-dedupe").join("config.toml"))
}

fn read_file(path: &Path) -> std::result::Result<RawConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    settings: RawSettings,
    #[serde(default)]
    special_tenant_rule: SpecialTenantRule,
    #[serde(default)]
    operator: RawOperator,
    #[serde(default)]
    types: BTreeMap<String, RawType>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    max_records_to_fix: Option<usize>,
    sleep_minutes: Option<u64>,
    time_window_minutes: Option<u64>,
    concurrency: Option<usize>,
    canonical_uri_property: Option<String>,
    created_ts_property: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawOperator {
    min_length: Option<usize>,
    reserved: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawType {
    keys: Vec<String>,
    #[serde(default)]
    dependent_on: Vec<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default = "default_eligible")]
    eligible: bool,
}

fn default_eligible() -> bool {
    true
}

/// Errors raised while loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Offending file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// File is not valid TOML for this schema.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// Offending file.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// Inline TOML is invalid.
    #[error("failed to parse config: {source}")]
    ParseInline {
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// Values parsed but are not acceptable.
    #[error("invalid config: {message}")]
    Invalid {
        /// Description of the problem.
        message: String,
    },
}

/// A named operator accountable for a destructive run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct OperatorId(String);

impl OperatorId {
    /// Operator name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Rules an operator id must satisfy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorPolicy {
    /// Minimum trimmed length.
    pub min_length: usize,
    /// Admin aliases refused regardless of case.
    pub reserved: Vec<String>,
}

impl Default for OperatorPolicy {
    fn default() -> Self {
        Self {
            min_length: DEFAULT_OPERATOR_MIN_LENGTH,
            reserved: DEFAULT_RESERVED_OPERATORS
                .iter()
                .map(|alias| alias.to_string())
                .collect(),
        }
    }
}

impl OperatorPolicy {
    /// Validates `raw` as an operator id.
    pub fn parse(&self, raw: &str) -> Result<OperatorId> {
        let trimmed = raw.trim();
        if trimmed.chars().count() < self.min_length
            || self
                .reserved
                .iter()
                .any(|alias| alias.eq_ignore_ascii_case(trimmed))
        {
            return Err(DedupeError::InvalidOperator(trimmed.to_string()));
        }
        Ok(OperatorId(trimmed.to_string()))
    }
}

/// Parses `name|value,name2|value2` into equality filters.
pub fn parse_property_filters(raw: &str) -> Result<Vec<PropertyFilter>> {
    let mut filters = Vec::new();
    for entry in raw.split(',') {
        let trimmed = entry.trim();
        if trimmed.is_empty() {
            continue;
        }
        let (name, value) = trimmed.split_once('|').ok_or_else(|| {
            DedupeError::InvalidFilter(format!("'{trimmed}' is not of the form name|value"))
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(DedupeError::InvalidFilter(format!(
                "'{trimmed}' is missing a property name"
            )));
        }
        filters.push(PropertyFilter::new(name, value.trim()));
    }
    Ok(filters)
}

/// Which entity types a run processes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntityTypeSelection {
    /// Every eligible type in the catalog.
    All,
    /// An explicit list, in order.
    Named(Vec<String>),
}

impl EntityTypeSelection {
    /// Builds a selection from CLI input; named entries may be comma-separated.
    pub fn from_args(all: bool, named: &[String]) -> Result<Self> {
        let names: Vec<String> = named
            .iter()
            .flat_map(|entry| entry.split(','))
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        match (all, names.is_empty()) {
            (true, true) => Ok(EntityTypeSelection::All),
            (false, false) => Ok(EntityTypeSelection::Named(names)),
            (true, false) => Err(DedupeError::Config(
                "use either --all or --type, not both".into(),
            )),
            (false, true) => Err(DedupeError::Config(
                "no entity types selected; pass --type or --all".into(),
            )),
        }
    }

    /// Resolves the selection to descriptors, failing on any unknown type.
    pub fn resolve(&self, catalog: &dyn SchemaCatalog) -> Result<Vec<EntityTypeDescriptor>> {
        let names = match self {
            EntityTypeSelection::All => catalog.eligible_types(),
            EntityTypeSelection::Named(names) => names.clone(),
        };
        let mut descriptors: Vec<EntityTypeDescriptor> = Vec::new();
        for name in names {
            if descriptors.iter().any(|d| d.name == name) {
                continue;
            }
            descriptors.push(catalog.describe(&name)?);
        }
        if descriptors.is_empty() {
            return Err(DedupeError::Config(
                "selection resolved to no entity types".into(),
            ));
        }
        Ok(descriptors)
    }
}

//! Configuration for container I/O sessions

use serde::{Deserialize, Serialize};

/// Configuration for reading, writing and exporting containers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Store the namespaces a graph uses inside the container on write
    pub cache_namespaces: bool,
    /// Load namespaces cached in a container when opening it
    pub load_cached_namespaces: bool,
    /// Retries for reads that fail with a transient backend error
    pub read_retries: u32,
    /// Rows per chunk when writing in-memory arrays
    pub chunk_rows: usize,
    /// Run the validator before every write and refuse graphs with errors
    pub validate_before_write: bool,
    /// Tie-break rule for same-named types from different namespaces
    pub resolution_policy: ResolutionPolicy,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            cache_namespaces: true,
            load_cached_namespaces: true,
            read_retries: 1,
            chunk_rows: 65_536,
            validate_before_write: false,
            resolution_policy: ResolutionPolicy::MostDependencies,
        }
    }
}

impl IoConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate on write, no retries, and refuse ambiguous type tie-breaks
    pub fn strict() -> Self {
        Self {
            cache_namespaces: true,
            load_cached_namespaces: true,
            read_retries: 0,
            chunk_rows: 65_536,
            validate_before_write: true,
            resolution_policy: ResolutionPolicy::Strict,
        }
    }

    /// Parse a config from TOML; missing keys take their default
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn with_cache_namespaces(mut self, enabled: bool) -> Self {
        self.cache_namespaces = enabled;
        self
    }

    pub fn with_load_cached_namespaces(mut self, enabled: bool) -> Self {
        self.load_cached_namespaces = enabled;
        self
    }

    pub fn with_read_retries(mut self, retries: u32) -> Self {
        self.read_retries = retries;
        self
    }

    /// Set rows per written chunk (at least one)
    pub fn with_chunk_rows(mut self, rows: usize) -> Self {
        self.chunk_rows = rows.max(1);
        self
    }

    pub fn with_validate_before_write(mut self, enabled: bool) -> Self {
        self.validate_before_write = enabled;
        self
    }

    pub fn with_resolution_policy(mut self, policy: ResolutionPolicy) -> Self {
        self.resolution_policy = policy;
        self
    }
}

/// How to choose between same-named types declared by different namespaces
/// when neither extends the other
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPolicy {
    /// Prefer the namespace with the most transitive dependencies
    #[default]
    MostDependencies,
    /// Prefer the namespace loaded last
    LatestLoaded,
    /// Never tie-break
    Strict,
}

impl std::fmt::Display for ResolutionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionPolicy::MostDependencies => write!(f, "most_dependencies"),
            ResolutionPolicy::LatestLoaded => write!(f, "latest_loaded"),
            ResolutionPolicy::Strict => write!(f, "strict"),
        }
    }
}

impl std::str::FromStr for ResolutionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "most_dependencies" => Ok(ResolutionPolicy::MostDependencies),
            "latest_loaded" | "latest" => Ok(ResolutionPolicy::LatestLoaded),
            "strict" => Ok(ResolutionPolicy::Strict),
            _ => Err(format!("Unknown resolution policy: {}", s)),
        }
    }
}

//! Source and registry configuration

use std::time::Duration;

use crate::media::gop::DEFAULT_MAX_GROUPS;

/// Per-source cache configuration
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Keep a GOP history for late joiners
    pub gop_cache: bool,

    /// Maximum number of key-frame groups retained
    pub max_groups: usize,

    /// Optional cap on cached payload bytes (the newest GOP is always kept)
    pub max_bytes: Option<usize>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            gop_cache: true,
            max_groups: DEFAULT_MAX_GROUPS,
            max_bytes: None,
        }
    }
}

impl SourceConfig {
    /// Disable the GOP history; readers start at the live edge
    pub fn disable_gop_cache(mut self) -> Self {
        self.gop_cache = false;
        self
    }

    /// Set the retained key group count (at least 1)
    pub fn max_groups(mut self, groups: usize) -> Self {
        self.max_groups = groups.max(1);
        self
    }

    /// Set the byte cap
    pub fn max_bytes(mut self, bytes: usize) -> Self {
        self.max_bytes = Some(bytes);
        self
    }
}

/// Registry-wide configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Configuration applied to every new source
    pub source: SourceConfig,

    /// How often closed sources are swept
    pub cleanup_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            cleanup_interval: Duration::from_secs(10),
        }
    }
}

impl RegistryConfig {
    pub fn source(mut self, config: SourceConfig) -> Self {
        self.source = config;
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }
}

//! Client policy configuration

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;
const GIB: usize = 1024 * MIB;

/// Character written for positions past the end of a string
pub const DEFAULT_FILL_CHAR: u8 = 0;

/// Cache and fetch policy for one connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Retain fetched responses between requests
    #[serde(default = "default_true")]
    pub cache: bool,
    /// Always fetch and cache whole variables instead of the requested window
    #[serde(default = "default_true")]
    pub whole_var: bool,
    /// Bulk-fetch small variables when the coordinator is built
    #[serde(default)]
    pub prefetch: bool,
    /// LRU size target in bytes
    #[serde(default = "default_cache_size_limit")]
    pub cache_size_limit: usize,
    /// Maximum number of retained responses (prefetch excluded)
    #[serde(default = "default_cache_count_limit")]
    pub cache_count_limit: usize,
    /// Variables at or below this many bytes are prefetched
    #[serde(default = "default_small_size_limit")]
    pub small_size_limit: usize,
    /// Declared length of string character axes
    #[serde(default = "default_string_length")]
    pub default_string_length: usize,
    /// Declared record count of sequences
    #[serde(default = "default_sequence_limit")]
    pub default_sequence_limit: usize,
    /// Per-variable string length overrides, keyed by dotted name
    #[serde(default)]
    pub string_lengths: HashMap<String, usize>,
    /// Per-sequence record limits, keyed by dotted name
    #[serde(default)]
    pub sequence_limits: HashMap<String, usize>,
    #[serde(default)]
    pub fill_char: u8,
}

fn default_true() -> bool {
    true
}

fn default_cache_size_limit() -> usize {
    100 * MIB
}

fn default_cache_count_limit() -> usize {
    100
}

fn default_small_size_limit() -> usize {
    64 * KIB
}

fn default_string_length() -> usize {
    64
}

fn default_sequence_limit() -> usize {
    100
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            cache: true,
            whole_var: true,
            prefetch: false,
            cache_size_limit: default_cache_size_limit(),
            cache_count_limit: default_cache_count_limit(),
            small_size_limit: default_small_size_limit(),
            default_string_length: default_string_length(),
            default_sequence_limit: default_sequence_limit(),
            string_lengths: HashMap::new(),
            sequence_limits: HashMap::new(),
            fill_char: DEFAULT_FILL_CHAR,
        }
    }
}

impl PolicyConfig {
    /// Fetch exactly the requested window each time and keep nothing
    pub fn uncached() -> Self {
        Self::default().with_cache(false).with_whole_var(false)
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache = enabled;
        if !enabled {
            self.cache_count_limit = 0;
        }
        self
    }

    pub fn with_whole_var(mut self, enabled: bool) -> Self {
        self.whole_var = enabled;
        self
    }

    pub fn with_prefetch(mut self, enabled: bool) -> Self {
        self.prefetch = enabled;
        self
    }

    /// Set the LRU size and count limits
    pub fn with_limits(mut self, size_limit: usize, count_limit: usize) -> Self {
        self.cache_size_limit = size_limit;
        self.cache_count_limit = if self.cache { count_limit } else { 0 };
        self
    }

    pub fn with_small_size_limit(mut self, limit: usize) -> Self {
        self.small_size_limit = limit;
        self
    }

    pub fn with_fill_char(mut self, fill: u8) -> Self {
        self.fill_char = fill;
        self
    }

    /// String length for a variable, honouring per-variable overrides
    pub fn string_length_for(&self, name: &str) -> usize {
        self.string_lengths
            .get(name)
            .copied()
            .unwrap_or(self.default_string_length)
    }

    /// Record limit for a sequence, honouring per-sequence overrides
    pub fn sequence_limit_for(&self, name: &str) -> usize {
        self.sequence_limits
            .get(name)
            .copied()
            .unwrap_or(self.default_sequence_limit)
    }

    /// Apply URL-style client parameters such as `cachelimit=10M`.
    ///
    /// Unknown keys and unparsable values are ignored.
    pub fn apply_client_params<K, V>(&mut self, params: &[(K, V)])
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in params {
            let raw = key.as_ref();
            let key = raw.to_lowercase();
            let value = value.as_ref();
            match key.as_str() {
                "cache" => {
                    self.cache = true;
                    if self.cache_count_limit == 0 {
                        self.cache_count_limit = default_cache_count_limit();
                    }
                }
                "nocache" => self.cache = false,
                "prefetch" => self.prefetch = true,
                "noprefetch" => self.prefetch = false,
                "wholevar" => self.whole_var = true,
                "cachelimit" => set_limit(&mut self.cache_size_limit, value),
                "smallsizelimit" => set_limit(&mut self.small_size_limit, value),
                "cachecount" => set_limit(&mut self.cache_count_limit, value),
                "stringlength" => set_limit(&mut self.default_string_length, value),
                "limit" => set_limit(&mut self.default_sequence_limit, value),
                _ => {
                    // Variable names keep their case
                    if key.starts_with("stringlength_") {
                        if let Some(n) = parse_limit(value) {
                            self.string_lengths.insert(raw["stringlength_".len()..].to_string(), n);
                        }
                    } else if key.starts_with("limit_") {
                        if let Some(n) = parse_limit(value) {
                            self.sequence_limits.insert(raw["limit_".len()..].to_string(), n);
                        }
                    } else {
                        tracing::debug!(param = %key, "Ignoring unknown client parameter");
                    }
                }
            }
        }
        if !self.cache {
            self.cache_count_limit = 0;
        }
    }

    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: Self = serde_json::from_str(&content)?;
        if !config.cache {
            config.cache_count_limit = 0;
        }
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }
}

fn set_limit(field: &mut usize, value: &str) {
    if let Some(n) = parse_limit(value) {
        *field = n;
    }
}

/// Parse a size with an optional K/M/G suffix (powers of 1024)
pub fn parse_limit(value: &str) -> Option<usize> {
    let value = value.trim();
    let (digits, multiplier) = match value.chars().last()? {
        'k' | 'K' => (&value[..value.len() - 1], KIB),
        'm' | 'M' => (&value[..value.len() - 1], MIB),
        'g' | 'G' => (&value[..value.len() - 1], GIB),
        _ => (value, 1),
    };
    digits.parse::<usize>().ok()?.checked_mul(multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_limit() {
        assert_eq!(parse_limit("512"), Some(512));
        assert_eq!(parse_limit("4K"), Some(4096));
        assert_eq!(parse_limit("2m"), Some(2 * MIB));
        assert_eq!(parse_limit("1G"), Some(GIB));
        assert_eq!(parse_limit(""), None);
        assert_eq!(parse_limit("lots"), None);
    }

    #[test]
    fn test_client_params() {
        let mut config = PolicyConfig::default();
        config.apply_client_params(&[
            ("cachelimit", "10M"),
            ("stringlength", "32"),
            ("stringlength_station.name", "8"),
            ("limit_casts", "500"),
            ("prefetch", ""),
            ("bogus", "1"),
        ]);
        assert_eq!(config.cache_size_limit, 10 * MIB);
        assert_eq!(config.string_length_for("station.name"), 8);
        assert_eq!(config.string_length_for("other"), 32);
        assert_eq!(config.sequence_limit_for("casts"), 500);
        assert!(config.prefetch);
    }

    #[test]
    fn test_nocache_zeroes_count() {
        let mut config = PolicyConfig::default();
        config.apply_client_params(&[("nocache", ""), ("cachecount", "20")]);
        assert!(!config.cache);
        assert_eq!(config.cache_count_limit, 0);
    }

    #[test]
    fn test_defaults_from_empty_json() {
        let config: PolicyConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, PolicyConfig::default());
    }
}

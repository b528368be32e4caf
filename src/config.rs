//! Dumper configuration.
//!
//! Environment variables (read by [`DumperConfig::from_env`]):
//! - `FOOTPRINT_MAX_PARALLEL_WALKS`: concurrent object walks in transitive mode
//!   (default: available parallelism)
//! - `FOOTPRINT_EXCLUDE_BUILTINS`: `0`/`false` to bill builtins objects like
//!   any other (default: excluded)

use std::num::NonZeroUsize;

/// Environment variable for [`DumperConfig::max_parallel_walks`].
pub const ENV_MAX_PARALLEL_WALKS: &str = "FOOTPRINT_MAX_PARALLEL_WALKS";

/// Environment variable for [`DumperConfig::exclude_builtins`].
pub const ENV_EXCLUDE_BUILTINS: &str = "FOOTPRINT_EXCLUDE_BUILTINS";

/// Configuration for a [`MemoryDumper`](crate::MemoryDumper).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumperConfig {
    /// Maximum number of object walks running at once in transitive mode.
    pub max_parallel_walks: usize,
    /// Pre-seed the visitation set with everything reachable from the builtins root.
    pub exclude_builtins: bool,
}

impl Default for DumperConfig {
    fn default() -> Self {
        Self {
            max_parallel_walks: default_parallelism(),
            exclude_builtins: true,
        }
    }
}

impl DumperConfig {
    /// Read overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    ///
    /// Unparseable values fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let max_parallel_walks = lookup(ENV_MAX_PARALLEL_WALKS)
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(defaults.max_parallel_walks);

        let exclude_builtins = lookup(ENV_EXCLUDE_BUILTINS)
            .map(|s| !matches!(s.trim().to_lowercase().as_str(), "0" | "false" | "no" | "off"))
            .unwrap_or(defaults.exclude_builtins);

        Self {
            max_parallel_walks,
            exclude_builtins,
        }
    }

    /// Set the walk concurrency limit (clamped to at least one).
    pub fn with_max_parallel_walks(mut self, n: usize) -> Self {
        self.max_parallel_walks = n.max(1);
        self
    }

    /// Enable or disable builtins exclusion.
    pub fn with_exclude_builtins(mut self, exclude: bool) -> Self {
        self.exclude_builtins = exclude;
        self
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(4)
}

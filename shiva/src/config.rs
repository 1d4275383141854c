//
// Shiva ELF interpreter and patch engine
//
//! Runtime configuration for the interpreter binary.
//!
//! Shiva has no persistent daemon state or config file the way `memfaultd`
//! does; what little is configurable (module search path, per-arch base
//! addresses, stack size) is given sane defaults matching the original
//! implementation's constants and can be overridden via environment
//! variables, following the same "env var overrides a struct field" idiom
//! `memfaultd`'s config layer uses.
use std::env;
use std::path::PathBuf;

/// `SHIVA_LDSO_BASE` in the original source.
pub const DEFAULT_LDSO_BASE: u64 = 0x0060_0000;
/// `SHIVA_TARGET_BASE` in the original source.
pub const DEFAULT_TARGET_BASE: u64 = 0x0100_0000;
/// `SHIVA_STACK_SIZE` = `PAGE_SIZE * 1000` in the original source.
pub const DEFAULT_STACK_PAGES: u64 = 1000;
pub const PAGE_SIZE: u64 = 4096;

#[derive(Debug, Clone)]
pub struct ShivaConfig {
    /// Default search directory for patch objects, used when a prelinked
    /// executable's `DT_SHIVA_SEARCH` tag can't be resolved to an absolute
    /// path on disk.
    pub module_search_path: PathBuf,
    pub ldso_base: u64,
    pub target_base: u64,
    pub stack_pages: u64,
    pub verbose: bool,
}

impl Default for ShivaConfig {
    fn default() -> Self {
        Self {
            module_search_path: PathBuf::from("/opt/shiva/modules"),
            ldso_base: DEFAULT_LDSO_BASE,
            target_base: DEFAULT_TARGET_BASE,
            stack_pages: DEFAULT_STACK_PAGES,
            verbose: false,
        }
    }
}

impl ShivaConfig {
    /// Builds a config from defaults, overridden by `SHIVA_*` environment
    /// variables when present.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = env::var("SHIVA_MODULE_SEARCH_PATH") {
            config.module_search_path = PathBuf::from(path);
        }
        if let Some(base) = parse_env_hex("SHIVA_LDSO_BASE") {
            config.ldso_base = base;
        }
        if let Some(base) = parse_env_hex("SHIVA_TARGET_BASE") {
            config.target_base = base;
        }
        if let Some(pages) = env::var("SHIVA_STACK_PAGES")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.stack_pages = pages;
        }

        config
    }

    pub fn stack_size(&self) -> u64 {
        self.stack_pages * PAGE_SIZE
    }
}

fn parse_env_hex(name: &str) -> Option<u64> {
    let raw = env::var(name).ok()?;
    let trimmed = raw.trim_start_matches("0x");
    u64::from_str_radix(trimmed, 16).ok()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_config_matches_original_constants() {
        let config = ShivaConfig::default();
        assert_eq!(config.ldso_base, 0x600000);
        assert_eq!(config.target_base, 0x1000000);
        assert_eq!(config.stack_size(), 4096 * 1000);
    }
}

use std::path::PathBuf;

use graphrt::config::env_flag;
use graphrt::{BackendConfig, BackendResult};

use crate::CPU_IDENTITY;

const KNOWN_KEYS: &[&str] = &["cc", "opt", "cache_dir", "alignment", "dump"];

/// Settings of one CPU backend instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuOptions {
    /// C compiler executable.
    pub compiler: String,
    /// Optimisation flag passed verbatim, e.g. `-O2`.
    pub opt_level: String,
    /// Directory holding generated sources and shared objects.
    pub cache_dir: PathBuf,
    /// Pool offset alignment in bytes.
    pub alignment: usize,
    /// Log every generated translation unit at debug level.
    pub dump_source: bool,
}

impl Default for CpuOptions {
    fn default() -> Self {
        CpuOptions {
            compiler: "cc".to_string(),
            opt_level: "-O2".to_string(),
            cache_dir: std::env::temp_dir().join("graphrt_cpu_backend"),
            alignment: 64,
            dump_source: false,
        }
    }
}

impl CpuOptions {
    /// Keys: `cc`, `opt`, `cache_dir`, `alignment`, `dump`. `cc` falls back to
    /// `$CC`, `cache_dir` to `$GRAPHRT_CPU_CACHE_DIR` and `dump` to
    /// `$GRAPHRT_CPU_DUMP`.
    pub fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        config.ensure_known(CPU_IDENTITY, KNOWN_KEYS)?;
        let defaults = CpuOptions::default();
        let opt_level = match config.get("opt") {
            Some(level) if level.starts_with('-') => level.to_string(),
            Some(level) => format!("-O{level}"),
            None => defaults.opt_level,
        };
        let alignment = config.get_usize("alignment")?.unwrap_or(defaults.alignment);
        if !alignment.is_power_of_two() {
            return Err(graphrt::BackendError::Config(format!(
                "alignment must be a power of two, got {alignment}"
            )));
        }
        Ok(CpuOptions {
            compiler: config.get_or_env("cc", "CC").unwrap_or(defaults.compiler),
            opt_level,
            cache_dir: config
                .get_or_env("cache_dir", "GRAPHRT_CPU_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            alignment,
            dump_source: config
                .get_bool("dump")
                .unwrap_or_else(|| env_flag("GRAPHRT_CPU_DUMP")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_explicit_options() {
        let config = BackendConfig::parse("cc=clang; opt=3, cache_dir=/tmp/x, alignment=128, dump").unwrap();
        let options = CpuOptions::from_config(&config).unwrap();
        assert_eq!(options.compiler, "clang");
        assert_eq!(options.opt_level, "-O3");
        assert_eq!(options.cache_dir, PathBuf::from("/tmp/x"));
        assert_eq!(options.alignment, 128);
        assert!(options.dump_source);
    }

    #[test]
    fn rejects_unknown_keys_and_bad_alignment() {
        let unknown = BackendConfig::parse("threads=4").unwrap();
        assert!(CpuOptions::from_config(&unknown).is_err());
        let bad = BackendConfig::parse("alignment=48").unwrap();
        assert!(CpuOptions::from_config(&bad).is_err());
    }
}

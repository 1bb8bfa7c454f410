use graphrt::{BackendConfig, BackendError, BackendResult};

use crate::GPU_IDENTITY;

const KNOWN_KEYS: &[&str] = &["device", "block", "arch"];

/// Settings of one GPU backend instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuOptions {
    /// CUDA device ordinal.
    pub device: i32,
    /// Threads per block for elementwise launches.
    pub block_size: u32,
    /// Virtual architecture handed to NVRTC, e.g. `compute_80`. Derived from
    /// the device when unset.
    pub arch: Option<String>,
}

impl Default for GpuOptions {
    fn default() -> Self {
        GpuOptions {
            device: 0,
            block_size: 256,
            arch: None,
        }
    }
}

impl GpuOptions {
    /// Keys: `device` (falls back to `$GRAPHRT_GPU_DEVICE`), `block`, `arch`.
    pub fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        config.ensure_known(GPU_IDENTITY, KNOWN_KEYS)?;
        let defaults = GpuOptions::default();
        let device = match config.get_or_env("device", "GRAPHRT_GPU_DEVICE") {
            Some(raw) => raw.trim().parse::<i32>().ok().filter(|d| *d >= 0).ok_or_else(|| {
                BackendError::Config(format!("device must be a non-negative ordinal, got {raw:?}"))
            })?,
            None => defaults.device,
        };
        let block_size = match config.get_usize("block")? {
            Some(block) if (1..=1024).contains(&block) && block % 32 == 0 => block as u32,
            Some(block) => {
                return Err(BackendError::Config(format!(
                    "block must be a multiple of 32 in 32..=1024, got {block}"
                )))
            }
            None => defaults.block_size,
        };
        Ok(GpuOptions {
            device,
            block_size,
            arch: config.get("arch").map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_select_first_device() {
        let options = GpuOptions::from_config(&BackendConfig::parse("").unwrap()).unwrap();
        assert_eq!(options.block_size, 256);
        assert!(options.arch.is_none());
    }

    #[test]
    fn parses_explicit_options() {
        let config = BackendConfig::parse("device=1; block=128, arch=compute_75").unwrap();
        let options = GpuOptions::from_config(&config).unwrap();
        assert_eq!(options.device, 1);
        assert_eq!(options.block_size, 128);
        assert_eq!(options.arch.as_deref(), Some("compute_75"));
    }

    #[test]
    fn rejects_bad_values() {
        for bad in ["device=-1", "device=gpu0", "block=100", "block=2048", "streams=2"] {
            let config = BackendConfig::parse(bad).unwrap();
            assert!(
                matches!(GpuOptions::from_config(&config), Err(BackendError::Config(_))),
                "{bad} should be rejected"
            );
        }
    }
}

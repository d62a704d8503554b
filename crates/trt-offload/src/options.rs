use serde::{Deserialize, Serialize};

use crate::accelerator::BuildConfig;
use crate::env;
use crate::partition::OracleConfig;

/// Top-level configuration: oracle rules plus engine build limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffloadOptions {
    pub oracle: OracleConfig,
    pub build: BuildConfig,
}

impl OffloadOptions {
    /// Parses options from JSON; omitted fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Applies `TRT_OFFLOAD_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(bytes) = env::max_workspace_override() {
            self.build.max_workspace_bytes = bytes;
        }
        if let Some(enabled) = env::fp16_override() {
            self.build.allow_fp16 = enabled;
        }
        if let Some(enabled) = env::dynamic_batch_override() {
            self.oracle.allow_dynamic_batch = enabled;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::DType;

    #[test]
    fn partial_json_keeps_defaults() {
        let options =
            OffloadOptions::from_json_str(r#"{"build": {"allow_fp16": true}, "oracle": {"max_rank": 5}}"#)
                .unwrap();
        assert!(options.build.allow_fp16);
        assert_eq!(options.build.max_workspace_bytes, 1 << 30);
        assert_eq!(options.oracle.max_rank, 5);
        assert_eq!(options.oracle.allowed_dtypes, vec![DType::F32, DType::F16]);
    }
}

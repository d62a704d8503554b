use std::env;
use std::sync::OnceLock;

static MAX_WORKSPACE: OnceLock<Option<u64>> = OnceLock::new();
static FP16: OnceLock<Option<bool>> = OnceLock::new();
static DYNAMIC_BATCH: OnceLock<Option<bool>> = OnceLock::new();

pub(crate) fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn read_var(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

/// `TRT_OFFLOAD_MAX_WORKSPACE`, in bytes. Unparsable values are ignored.
pub(crate) fn max_workspace_override() -> Option<u64> {
    *MAX_WORKSPACE.get_or_init(|| {
        let value = read_var("TRT_OFFLOAD_MAX_WORKSPACE")?;
        match value.trim().parse::<u64>() {
            Ok(bytes) => Some(bytes),
            Err(_) => {
                log::warn!("ignoring TRT_OFFLOAD_MAX_WORKSPACE={value}: expected a byte count");
                None
            }
        }
    })
}

pub(crate) fn fp16_override() -> Option<bool> {
    *FP16.get_or_init(|| read_var("TRT_OFFLOAD_FP16").map(|value| parse_bool(&value)))
}

pub(crate) fn dynamic_batch_override() -> Option<bool> {
    *DYNAMIC_BATCH
        .get_or_init(|| read_var("TRT_OFFLOAD_DYNAMIC_BATCH").map(|value| parse_bool(&value)))
}

use crate::ir::{AttrValue, EntryFunction};

/// Identifier of the accelerator path downstream lowering routes to.
pub const COMPILER_ID: &str = "tensorrt";

pub const COMPILER_ATTR: &str = "Compiler";
pub const ACCEPTED_ATTR: &str = "Accepted";
pub const NODE_COUNT_ATTR: &str = "offload.node_count";
pub const ORACLE_VERSION_ATTR: &str = "offload.oracle_version";

/// Routing marker on the entry function of an accepted graph.
///
/// Presence routes the whole function to the accelerator; absence means the
/// generic path. There is no partial form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerTag {
    pub compiler_id: String,
    pub accepted: bool,
}

impl CompilerTag {
    pub fn accelerator() -> Self {
        Self {
            compiler_id: COMPILER_ID.to_string(),
            accepted: true,
        }
    }

    pub fn attach(&self, entry: &mut EntryFunction) {
        entry.attrs.insert(
            COMPILER_ATTR.to_string(),
            AttrValue::String(self.compiler_id.clone()),
        );
        entry
            .attrs
            .insert(ACCEPTED_ATTR.to_string(), AttrValue::Bool(self.accepted));
    }

    pub fn from_entry(entry: &EntryFunction) -> Option<Self> {
        let compiler_id = entry.attrs.get(COMPILER_ATTR)?.as_str()?.to_string();
        let accepted = entry.attrs.get(ACCEPTED_ATTR)?.as_bool()?;
        Some(Self {
            compiler_id,
            accepted,
        })
    }

    /// True when the tag routes the function to this crate's accelerator path.
    pub fn routes_to_accelerator(&self) -> bool {
        self.accepted && self.compiler_id == COMPILER_ID
    }
}

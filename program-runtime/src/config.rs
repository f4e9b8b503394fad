//! Runtime configuration

use crate::storage::Version;

/// Knobs shared by every execution context created from one registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Maximum number of nested calls (saved frames) per context
    pub max_call_depth: usize,

    /// Version tag handed to the commit coordinator
    pub commit_version: Version,

    /// Debug mode (contract log lines are emitted through `log::info!`)
    pub debug_mode: bool,
}

impl RuntimeConfig {
    /// Default nesting limit
    pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_call_depth: Self::DEFAULT_MAX_CALL_DEPTH,
            commit_version: Version::new(1, 1),
            debug_mode: false,
        }
    }
}

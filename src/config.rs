use serde::{Deserialize, Serialize};

/// Default cap on the page count of one rollback segment
pub const DEFAULT_RSEG_MAX_SIZE: u32 = 0xFFFF_FFFE;

/// Recovery knob: how much of the undo state to trust at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ForceRecovery {
    #[default]
    None,
    /// Do not scan undo slots when opening rollback segments
    NoUndoLogScan,
}

impl ForceRecovery {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "0" | "none" => Some(ForceRecovery::None),
            "no_undo_log_scan" | "no-undo-log-scan" | "5" => Some(ForceRecovery::NoUndoLogScan),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub(crate) rseg_max_size: u32,
    pub(crate) force_recovery: ForceRecovery,
    pub(crate) log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            rseg_max_size: DEFAULT_RSEG_MAX_SIZE,
            force_recovery: ForceRecovery::None,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Defaults overridden by `FLINT_UNDO_RSEG_MAX_SIZE`, `FLINT_UNDO_FORCE_RECOVERY` and `RUST_LOG`.
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Some(size) = std::env::var("FLINT_UNDO_RSEG_MAX_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.rseg_max_size = size;
        }
        if let Some(mode) = std::env::var("FLINT_UNDO_FORCE_RECOVERY")
            .ok()
            .and_then(|v| ForceRecovery::from_str(&v))
        {
            config.force_recovery = mode;
        }
        if let Ok(filter) = std::env::var("RUST_LOG") {
            config.log_filter = filter;
        }
        config
    }

    pub fn with_rseg_max_size(mut self, size: u32) -> Self {
        self.rseg_max_size = size;
        self
    }

    pub fn with_force_recovery(mut self, mode: ForceRecovery) -> Self {
        self.force_recovery = mode;
        self
    }

    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    pub fn rseg_max_size(&self) -> u32 {
        self.rseg_max_size
    }

    pub fn force_recovery(&self) -> ForceRecovery {
        self.force_recovery
    }

    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }
}

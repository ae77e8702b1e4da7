use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Insufficient privileges: {0}")]
    PrivilegeDenied(String),

    #[error("Process unavailable: {0}")]
    ProcessUnavailable(String),

    #[error("Failed to read region at {address:#x}: {message}")]
    RegionUnreadable { address: u64, message: String },

    #[error("Failed to re-protect region at {address:#x}: {message}")]
    RegionUnwritable { address: u64, message: String },

    #[error("Replacement too long: {replacement} units do not fit in {original}")]
    ReplacementTooLong { original: usize, replacement: usize },

    #[error("Incomplete write at {address:#x}: {written} of {expected} bytes")]
    WriteIncomplete {
        address: u64,
        written: usize,
        expected: usize,
    },

    #[error("Hook target not found: {0}")]
    HookTargetNotFound(String),

    #[error("Hook install failed for {target}: {message}")]
    HookInstallFailed { target: String, message: String },

    #[error("Transport is not connected")]
    IpcNotConnected,

    #[error("Request {0} timed out")]
    IpcTimeout(u32),

    #[error("Protocol error: {0}")]
    IpcProtocol(String),

    #[error("Cache file invalid: {0}")]
    CacheFileInvalid(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn region_unreadable(address: u64, message: impl Into<String>) -> Self {
        Self::RegionUnreadable {
            address,
            message: message.into(),
        }
    }

    pub fn region_unwritable(address: u64, message: impl Into<String>) -> Self {
        Self::RegionUnwritable {
            address,
            message: message.into(),
        }
    }

    pub fn hook_install_failed(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HookInstallFailed {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Check whether this error leaves the transport unusable.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Error::IpcNotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replacement_too_long_message() {
        let err = Error::ReplacementTooLong {
            original: 2,
            replacement: 4,
        };
        assert!(err.to_string().contains("4"));
        assert!(err.to_string().contains("2"));
    }

    #[test]
    fn test_is_disconnect() {
        assert!(Error::IpcNotConnected.is_disconnect());
        assert!(!Error::IpcTimeout(3).is_disconnect());
    }
}

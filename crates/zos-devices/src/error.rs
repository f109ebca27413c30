//! Error types for the device layer

use zos_hal::HalError;

/// Errors returned to callers of the device syscalls.
///
/// Validation errors are raised before any shared state is touched and
/// never suspend the caller.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// A syscall argument was out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The caller was suspended when the subsystem shut down.
    #[error("request abandoned by subsystem shutdown")]
    Abandoned,

    /// The subsystem is not accepting requests.
    #[error("device subsystem is not active")]
    NotActive,

    /// The configuration cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The platform failed underneath us.
    #[error("HAL error: {0}")]
    Hal(#[from] HalError),
}

impl DeviceError {
    /// Syscall ABI code for this error (always negative)
    pub fn code(&self) -> i64 {
        match self {
            DeviceError::InvalidArgument(_) => -1,
            DeviceError::Abandoned => -2,
            DeviceError::NotActive | DeviceError::InvalidConfig(_) | DeviceError::Hal(_) => -3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(DeviceError::InvalidArgument("unit").code(), -1);
        assert_eq!(DeviceError::Abandoned.code(), -2);
        assert_eq!(DeviceError::Hal(HalError::Halted).code(), -3);
    }

    #[test]
    fn test_hal_error_conversion() {
        let err: DeviceError = HalError::ProcessNotFound.into();
        assert_eq!(err, DeviceError::Hal(HalError::ProcessNotFound));
        assert_eq!(err.to_string(), "HAL error: process not found");
    }
}

//! Driver-facing error type.

use core::fmt;

use vali_core::error::SysError;

/// Errors a driver or the resource-claim layer backing it may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    /// The requested resource is already claimed by another driver.
    ResourceBusy,
    /// No free vector/port range/frame satisfies the request.
    ResourceExhausted,
    /// The probed device is not present or did not identify as expected.
    DeviceNotPresent,
    /// The device responded but in an unsupported or unexpected way.
    DeviceError,
    /// An argument passed to a driver-API call was invalid.
    InvalidParameters,
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ResourceBusy => "resource busy",
            Self::ResourceExhausted => "resource exhausted",
            Self::DeviceNotPresent => "device not present",
            Self::DeviceError => "device error",
            Self::InvalidParameters => "invalid parameters",
        };
        f.write_str(s)
    }
}

impl From<DriverError> for SysError {
    fn from(e: DriverError) -> Self {
        match e {
            DriverError::ResourceBusy => SysError::Busy,
            DriverError::ResourceExhausted => SysError::OutOfMemory,
            DriverError::DeviceNotPresent => SysError::NotFound,
            DriverError::DeviceError => SysError::DeviceError,
            DriverError::InvalidParameters => SysError::InvalidParameters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_maps_to_a_sys_error() {
        let variants = [
            DriverError::ResourceBusy,
            DriverError::ResourceExhausted,
            DriverError::DeviceNotPresent,
            DriverError::DeviceError,
            DriverError::InvalidParameters,
        ];
        for v in variants {
            let _: SysError = v.into();
            assert!(!format!("{v}").is_empty());
        }
    }
}

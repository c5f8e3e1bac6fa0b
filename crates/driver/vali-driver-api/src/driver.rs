//! Minimal driver identity, used for logging and fault attribution.

/// Static metadata a driver supplies about itself at registration time.
#[derive(Debug, Clone, Copy)]
pub struct DriverInfo {
    /// Human-readable name, used in log lines and panic messages.
    pub name: &'static str,
    /// Vendor string, if the driver binds to discoverable hardware.
    pub vendor: &'static str,
}

/// Lifecycle state of a registered driver instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Registered but not yet probed.
    Unprobed,
    /// Probe succeeded and the driver is servicing requests.
    Active,
    /// Probe failed or the device disappeared.
    Failed,
    /// Shut down cleanly and released its resource claims.
    Stopped,
}

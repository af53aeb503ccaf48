//! Network type reporting
//!
//! Informational only: the dispatcher exposes it to callers that want to
//! schedule flushes around connectivity, but never consults it itself.

/// Source of connectivity information.
pub trait NetworkInfo: Send + Sync {
    fn is_wifi_connected(&self) -> bool;
    fn is_cellular_data_connected(&self) -> bool;
}

/// Used when the host offers no connectivity information
#[derive(Debug, Default, Clone, Copy)]
pub struct UnknownNetwork;

impl NetworkInfo for UnknownNetwork {
    fn is_wifi_connected(&self) -> bool {
        false
    }

    fn is_cellular_data_connected(&self) -> bool {
        false
    }
}

/// Fixed answers, for hosts that know their link type up front.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedNetwork {
    pub wifi: bool,
    pub cellular: bool,
}

impl NetworkInfo for FixedNetwork {
    fn is_wifi_connected(&self) -> bool {
        self.wifi
    }

    fn is_cellular_data_connected(&self) -> bool {
        self.cellular
    }
}

//! Link manager external collaborator (§6).
//!
//! Wi-Fi/Ethernet link management, failover policy, and NVS-backed
//! provisioning are explicitly out of scope (§1); the teacher's own
//! `wifi::connection`/`wifi::ble_service` modules implement exactly that kind
//! of thing for ESP32, but a host-class gateway on a Raspberry Pi normally
//! has its network interface managed by the OS. This trait is the narrow
//! boundary the rest of the core talks to instead of depending on any one
//! link implementation.

/// Status of the network link the protocol engine sends over. The protocol
/// engine only starts sending once `is_connected()` is true, and keeps its
/// receive loop running regardless (§6).
pub trait LinkStatus: Send + Sync {
    fn is_connected(&self) -> bool;
    fn ip_info(&self) -> Option<String>;
}

/// A [`LinkStatus`] that is always connected, for hosts whose network
/// interface is managed entirely outside this process (the common case on a
/// Raspberry Pi with a single always-up Ethernet link).
pub struct AlwaysConnected;

impl LinkStatus for AlwaysConnected {
    fn is_connected(&self) -> bool {
        true
    }

    fn ip_info(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_connected_reports_connected_with_no_ip_info() {
        let link = AlwaysConnected;
        assert!(link.is_connected());
        assert_eq!(link.ip_info(), None);
    }
}

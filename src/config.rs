/// Compile-time capacities and runtime settings for nodes and the head-end.
use crate::channel::DEFAULT_DWELL_MS;
use crate::dedup::DedupConfig;

/// Detection table capacity on a sensing node.
pub const MAX_DRONES: usize = 8;

/// Hand-off queue depth: twice the table, so a burst touching every drone
/// twice still fits.
pub const QUEUE_DEPTH: usize = 2 * MAX_DRONES;

/// Dedup table capacity on the head-end.
pub const DEDUP_MAX_DRONES: usize = 16;

/// Wait before touching the relay UART, while the relay radio boots.
pub const BOOT_DELAY_MS: u64 = 3000;

/// A drone counts as tracked in heartbeats if seen this recently.
pub const ACTIVE_WINDOW_MS: u64 = 120_000;

/// Outbound relay lines buffered between the emitter and the UART writer.
pub const RELAY_QUEUE_DEPTH: usize = 4;

/// Sensing node settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeConfig {
    pub heartbeat_interval_ms: u64,
    pub active_window_ms: u64,
    pub boot_delay_ms: u64,
    /// Wi-Fi channel dwell time
    pub dwell_ms: u64,
    pub wifi_enabled: bool,
    pub ble_enabled: bool,
}

impl NodeConfig {
    pub const fn new() -> Self {
        Self {
            heartbeat_interval_ms: 60_000,
            active_window_ms: ACTIVE_WINDOW_MS,
            boot_delay_ms: BOOT_DELAY_MS,
            dwell_ms: DEFAULT_DWELL_MS,
            wifi_enabled: true,
            ble_enabled: true,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Head-end settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadConfig {
    pub dedup: DedupConfig,
    pub heartbeat_interval_ms: u64,
    pub stats_interval_ms: u64,
    pub boot_delay_ms: u64,
}

impl HeadConfig {
    pub const fn new() -> Self {
        Self {
            dedup: DedupConfig::new(),
            heartbeat_interval_ms: 30_000,
            stats_interval_ms: 60_000,
            boot_delay_ms: BOOT_DELAY_MS,
        }
    }
}

impl Default for HeadConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_defaults() {
        let c = NodeConfig::default();
        assert_eq!(c.heartbeat_interval_ms, 60_000);
        assert_eq!(c.active_window_ms, 120_000);
        assert_eq!(c.dwell_ms, 100);
        assert!(c.wifi_enabled && c.ble_enabled);
    }

    #[test]
    fn head_defaults() {
        let c = HeadConfig::default();
        assert_eq!(c.dedup.window_ms, 500);
        assert_eq!(c.dedup.stale_ms, 30_000);
        assert_eq!(c.dedup.sweep_interval_ms, 10_000);
        assert_eq!(c.heartbeat_interval_ms, 30_000);
        assert_eq!(c.stats_interval_ms, 60_000);
    }

    #[test]
    fn queue_is_twice_table() {
        assert_eq!(QUEUE_DEPTH, 16);
    }
}

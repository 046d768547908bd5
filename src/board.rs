/// Hardware abstraction for supported boards.
///
/// Each board module defines pin assignments and capabilities
/// selected at compile time via feature flags. All boards use the
/// mesh-detect PCB: relay radio UART on the D4/D5 pads.

#[cfg(feature = "board-xiao-s3")]
mod hw {
    pub const RELAY_TX_PIN: u8 = 5; // D4 -> relay radio RX
    pub const RELAY_RX_PIN: u8 = 6; // D5 <- relay radio TX
    pub const DUAL_BAND: bool = false;
    pub const DUAL_CORE: bool = true;
    pub const BOARD_NAME: &str = "xiao_esp32s3";
}

#[cfg(feature = "board-xiao-c5")]
mod hw {
    pub const RELAY_TX_PIN: u8 = 23;
    pub const RELAY_RX_PIN: u8 = 24;
    pub const DUAL_BAND: bool = true;
    pub const DUAL_CORE: bool = false;
    pub const BOARD_NAME: &str = "xiao_esp32c5";
}

#[cfg(feature = "board-xiao-c6")]
mod hw {
    pub const RELAY_TX_PIN: u8 = 22;
    pub const RELAY_RX_PIN: u8 = 23;
    pub const DUAL_BAND: bool = false;
    pub const DUAL_CORE: bool = false;
    pub const BOARD_NAME: &str = "xiao_esp32c6";
}

#[cfg(not(any(
    feature = "board-xiao-s3",
    feature = "board-xiao-c5",
    feature = "board-xiao-c6"
)))]
mod hw {
    pub const DUAL_BAND: bool = false;
    pub const DUAL_CORE: bool = false;
    pub const BOARD_NAME: &str = "unknown";
}

pub use hw::*;

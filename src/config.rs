//! hwmond settings.
//!
//! The daemon takes no arguments and reads no files; everything it needs is
//! fixed here for the Intel Xserve front panel.

use std::time::Duration;

use crate::error::PanelError;

/// Apple's USB vendor id
pub const PANEL_VENDOR: u16 = 0x05ac;
/// Xserve front panel product id
pub const PANEL_PRODUCT: u16 = 0x8261;
/// Bytes per panel write
pub const PANEL_DATA_SIZE: usize = 32;

/// Daemon settings (panel geometry, loop cadences, smoothing)
#[derive(Debug, Clone, PartialEq)]
pub struct PanelConfig {
    // USB identity
    pub vendor_id: u16,
    pub product_id: u16,
    pub configuration: u8,
    pub interface: u8,

    // Panel geometry
    pub rows: usize,
    pub leds_per_row: usize,
    pub frame_size: usize,

    // Cadences
    pub sample_interval: Duration,
    pub frame_interval: Duration,
    pub write_timeout: Duration,
    pub stall_backoff: Duration,

    // Smoothing
    pub move_rate: f32,
    pub dead_band: f32,
    /// Target shown on every row until the first sample lands
    pub boot_level: f32,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            vendor_id: PANEL_VENDOR,
            product_id: PANEL_PRODUCT,
            configuration: 0,
            interface: 0,
            rows: 2,
            leds_per_row: 8,
            frame_size: PANEL_DATA_SIZE,
            sample_interval: Duration::from_millis(200),
            frame_interval: Duration::from_micros(1_000_000 / 60),
            write_timeout: Duration::from_millis(90),
            stall_backoff: Duration::from_secs(1),
            move_rate: 0.05,
            dead_band: 0.001,
            boot_level: 1.0,
        }
    }
}

impl PanelConfig {
    /// Reject settings the sampler or renderer cannot work with
    pub fn validate(&self) -> Result<(), PanelError> {
        if self.rows < 1 {
            return Err(PanelError::BadArgs("need at least one LED row".into()));
        }
        if self.leds_per_row < 1 {
            return Err(PanelError::BadArgs("need at least one LED per row".into()));
        }
        if self.rows * self.leds_per_row > self.frame_size {
            return Err(PanelError::BadArgs(format!(
                "{} rows of {} LEDs don't fit in a {}-byte frame",
                self.rows, self.leds_per_row, self.frame_size
            )));
        }
        if !(self.move_rate > 0.0 && self.move_rate <= 1.0) {
            return Err(PanelError::BadArgs(format!(
                "move rate {} outside (0, 1]",
                self.move_rate
            )));
        }
        Ok(())
    }
}

//! USB link to the front panel.
//!
//! Opening selects the configuration, claims the interface and finds the
//! first bulk OUT endpoint. Whatever was acquired is released again on any
//! failure, and dropping a [`Panel`] releases the interface and closes the device.

use std::time::Duration;

use log::{debug, info};
use rusb::{ConfigDescriptor, Context, DeviceHandle, Direction, LogLevel, TransferType, UsbContext};

use crate::config::PanelConfig;
use crate::error::PanelError;

/// Something LED frames can be written to
pub trait PanelSink {
    /// Write a whole frame, returning the bytes accepted (0 on timeout or stall)
    fn write(&mut self, bytes: &[u8]) -> usize;
}

/// An opened and claimed Xserve front panel
pub struct Panel {
    handle: DeviceHandle<Context>,
    interface: u8,
    endpoint: u8,
    timeout: Duration,
}

impl Panel {
    pub fn open(config: &PanelConfig) -> Result<Self, PanelError> {
        let mut context = Context::new().map_err(PanelError::from)?;
        context.set_log_level(LogLevel::Info);

        let handle = context
            .open_device_with_vid_pid(config.vendor_id, config.product_id)
            .ok_or(PanelError::NoDevice)?;

        // Only matters on Linux; other backends report NotSupported
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!("kernel driver auto-detach unavailable: {}", e);
        }

        handle.set_active_configuration(config.configuration).map_err(|e| {
            PanelError::ConfigFailed(format!(
                "couldn't set configuration to {}: {}",
                config.configuration, e
            ))
        })?;

        let descriptor = handle
            .device()
            .config_descriptor(config.configuration)
            .map_err(|e| PanelError::ConfigFailed(format!("couldn't read config descriptor: {}", e)))?;
        if descriptor.num_interfaces() < 1 {
            return Err(PanelError::ConfigFailed("device had no interfaces".into()));
        }

        handle
            .claim_interface(config.interface)
            .map_err(|e| PanelError::ConfigFailed(format!("couldn't claim interface: {}", e)))?;

        let endpoint = match find_bulk_out(&descriptor, config.interface) {
            Ok(ep) => ep,
            Err(e) => {
                let _ = handle.release_interface(config.interface);
                return Err(e);
            }
        };

        info!(
            "front panel {:04x}:{:04x} ready, interface {} endpoint {:#04x}",
            config.vendor_id, config.product_id, config.interface, endpoint
        );

        Ok(Self {
            handle,
            interface: config.interface,
            endpoint,
            timeout: config.write_timeout,
        })
    }

    pub fn endpoint(&self) -> u8 {
        self.endpoint
    }

    /// Release the interface and close the device
    pub fn close(self) {
        drop(self);
    }
}

impl PanelSink for Panel {
    fn write(&mut self, bytes: &[u8]) -> usize {
        match self.handle.write_bulk(self.endpoint, bytes, self.timeout) {
            Ok(n) => n,
            Err(rusb::Error::Timeout) => 0,
            Err(e) => {
                debug!("bulk write failed: {}", e);
                0
            }
        }
    }
}

impl Drop for Panel {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(self.interface) {
            debug!("couldn't release interface {}: {}", self.interface, e);
        }
        debug!("front panel closed");
    }
}

/// First bulk OUT endpoint on the (single) alt-setting of `interface`
fn find_bulk_out(descriptor: &ConfigDescriptor, interface: u8) -> Result<u8, PanelError> {
    let iface = descriptor
        .interfaces()
        .find(|i| i.number() == interface)
        .ok_or_else(|| PanelError::ConfigFailed(format!("no interface {}", interface)))?;

    let alt_settings: Vec<_> = iface.descriptors().collect();
    if alt_settings.len() != 1 {
        return Err(PanelError::ConfigFailed(format!(
            "unexpected number of alt-settings: expected 1, got {}",
            alt_settings.len()
        )));
    }

    select_bulk_out(
        alt_settings[0]
            .endpoint_descriptors()
            .map(|ep| (ep.transfer_type(), ep.direction(), ep.address())),
    )
    .ok_or(PanelError::NoBulkOut)
}

fn select_bulk_out(endpoints: impl IntoIterator<Item = (TransferType, Direction, u8)>) -> Option<u8> {
    endpoints
        .into_iter()
        .find(|&(kind, dir, _)| kind == TransferType::Bulk && dir == Direction::Out)
        .map(|(_, _, address)| address)
}

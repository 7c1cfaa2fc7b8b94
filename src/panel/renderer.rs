use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::config::PanelConfig;
use crate::error::PanelError;
use crate::panel::frame::PanelFrame;
use crate::panel::transport::PanelSink;
use crate::shared::BreakdownReceiver;

/// Smooths breakdown targets into LED frames.
///
/// Each row follows its target through a first-order low-pass, so the 5 Hz
/// sampler steps turn into gliding bars at the frame rate.
pub struct Renderer {
    targets: Vec<f32>,
    /// None until the row has been drawn once
    smoothed: Vec<Option<f32>>,
    frame: PanelFrame,
    move_rate: f32,
    dead_band: f32,
    frame_interval: Duration,
    stall_backoff: Duration,
}

impl Renderer {
    pub fn new(config: &PanelConfig) -> Result<Self, PanelError> {
        config.validate()?;
        Ok(Self {
            targets: vec![config.boot_level; config.rows],
            smoothed: vec![None; config.rows],
            frame: PanelFrame::new(config.frame_size, config.leds_per_row),
            move_rate: config.move_rate,
            dead_band: config.dead_band,
            frame_interval: config.frame_interval,
            stall_backoff: config.stall_backoff,
        })
    }

    pub fn rows(&self) -> usize {
        self.targets.len()
    }

    /// Take a freshly published breakdown vector. Extra entries are ignored.
    pub fn update_targets(&mut self, breakdowns: &[f32]) {
        for (target, &b) in self.targets.iter_mut().zip(breakdowns) {
            *target = b;
        }
    }

    pub fn smoothed(&self, row: usize) -> Option<f32> {
        self.smoothed[row]
    }

    pub fn frame(&self) -> &PanelFrame {
        &self.frame
    }

    /// Advance every row one frame. Returns true if the frame changed.
    pub fn step(&mut self) -> bool {
        let mut dirty = false;

        for row in 0..self.targets.len() {
            let target = self.targets[row];
            let next = match self.smoothed[row] {
                Some(current) if (current - target).abs() < self.dead_band => continue,
                Some(current) => self.move_rate * target + (1.0 - self.move_rate) * current,
                None => target,
            };

            dirty = true;
            self.smoothed[row] = Some(next);
            self.frame.set_row(row, next);
        }

        dirty
    }

    /// Write the current frame, backing off while the panel accepts nothing.
    ///
    /// Returns false if shutdown was requested before the frame got through.
    pub fn submit<P: PanelSink>(&self, panel: &mut P, shutdown: &AtomicBool) -> bool {
        let mut stalled = false;

        loop {
            if panel.write(self.frame.as_bytes()) > 0 {
                if stalled {
                    info!("front panel accepting data again");
                }
                return true;
            }

            if !stalled {
                warn!("{}, retrying every {:?}", PanelError::UsbWriteStalled, self.stall_backoff);
                stalled = true;
            }
            if shutdown.load(Ordering::Relaxed) {
                return false;
            }
            thread::sleep(self.stall_backoff);
            if shutdown.load(Ordering::Relaxed) {
                return false;
            }
        }
    }

    /// Draw at the configured frame rate until shutdown
    pub fn run<P: PanelSink>(mut self, panel: &mut P, mut breakdowns: BreakdownReceiver, shutdown: &AtomicBool) {
        while !shutdown.load(Ordering::Relaxed) {
            let started = Instant::now();

            if let Some(latest) = breakdowns.latest() {
                self.update_targets(&latest);
            }

            if self.step() && !self.submit(panel, shutdown) {
                break;
            }

            thread::sleep(self.frame_interval.saturating_sub(started.elapsed()));
        }
    }
}

//! LED frame layout: byte `row * leds_per_row + led` drives one LED, 0 (off) to 255 (full).

/// Brightness of LED `led` when its row shows `level`.
///
/// LED `j` is off at `j / n` utilisation and full at `(j + 1) / n`, ramping linearly between.
pub fn led_intensity(level: f32, led: usize, leds_per_row: usize) -> u8 {
    let bucket = 1.0 / leds_per_row as f32;
    let lit = (level - led as f32 * bucket).clamp(0.0, bucket) / bucket;
    (lit * u8::MAX as f32).round() as u8
}

/// Fill one row's LEDs for `level`
pub fn quantise_row(level: f32, leds: &mut [u8]) {
    let n = leds.len();
    for (j, led) in leds.iter_mut().enumerate() {
        *led = led_intensity(level, j, n);
    }
}

/// One panel write worth of LED intensities
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelFrame {
    bytes: Vec<u8>,
    leds_per_row: usize,
}

impl PanelFrame {
    /// All LEDs off
    pub fn new(frame_size: usize, leds_per_row: usize) -> Self {
        Self {
            bytes: vec![0; frame_size],
            leds_per_row,
        }
    }

    pub fn set_row(&mut self, row: usize, level: f32) {
        let start = row * self.leds_per_row;
        quantise_row(level, &mut self.bytes[start..start + self.leds_per_row]);
    }

    pub fn row(&self, row: usize) -> &[u8] {
        let start = row * self.leds_per_row;
        &self.bytes[start..start + self.leds_per_row]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

use crate::error::PanelError;
use crate::system::ticks::TickSnapshot;

/// Utilisation of one core over the last sampling interval
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuCore {
    pub id: usize,
    /// Busy fraction in [0, 1]; None when no ticks elapsed on this core
    pub usage: Option<f32>,
}

/// Per-core utilisation between two snapshots
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuUsage {
    pub cores: Vec<CpuCore>,
}

impl CpuUsage {
    /// Diff two snapshots. Fails if the core count moved between them.
    pub fn between(prev: &TickSnapshot, now: &TickSnapshot) -> Result<Self, PanelError> {
        if prev.num_cores() != now.num_cores() {
            return Err(PanelError::TopologyChanged {
                previous: prev.num_cores(),
                current: now.num_cores(),
            });
        }

        let cores = (0..now.num_cores())
            .map(|i| {
                let delta_busy = now.busy()[i].saturating_sub(prev.busy()[i]);
                let delta_total = now.total()[i].saturating_sub(prev.total()[i]);
                let usage = if delta_total > 0 {
                    Some((delta_busy as f64 / delta_total as f64).clamp(0.0, 1.0) as f32)
                } else {
                    None
                };
                CpuCore { id: i, usage }
            })
            .collect();

        Ok(Self { cores })
    }

    pub fn from_usages(usages: &[Option<f32>]) -> Self {
        Self {
            cores: usages
                .iter()
                .enumerate()
                .map(|(id, &usage)| CpuCore { id, usage })
                .collect(),
        }
    }

    pub fn num_cores(&self) -> usize {
        self.cores.len()
    }

    /// Mean over cores with known utilisation
    pub fn mean(&self) -> Option<f32> {
        let known: Vec<f32> = self.cores.iter().filter_map(|c| c.usage).collect();
        if known.is_empty() {
            None
        } else {
            Some(known.iter().sum::<f32>() / known.len() as f32)
        }
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use sysinfo::System;

use crate::error::PanelError;
use crate::shared::BreakdownPublisher;
use crate::system::aggregate::{aggregate, Distribution};
use crate::system::cpu::CpuUsage;
use crate::system::ticks::{TickSnapshot, TickSource};

/// Turns cumulative tick counters into per-row utilisation.
///
/// Keeps the previous snapshot so every sample is a diff over one interval.
pub struct CpuSampler<S: TickSource> {
    source: S,
    num_packages: usize,
    prev: TickSnapshot,
}

impl<S: TickSource> CpuSampler<S> {
    /// Query the package count and take the baseline snapshot
    pub fn new(mut source: S) -> Result<Self, PanelError> {
        let num_packages = match source.num_packages() {
            Ok(n) if n > 0 => n as usize,
            Ok(n) => {
                warn!("package count query gave invalid number {}, using 1", n);
                1
            }
            Err(e) => {
                warn!("{}, using 1 package", e);
                1
            }
        };

        let prev = source.fetch()?;

        Ok(Self {
            source,
            num_packages,
            prev,
        })
    }

    pub fn num_packages(&self) -> usize {
        self.num_packages
    }

    /// Core count as of the last snapshot
    pub fn num_cores(&self) -> usize {
        self.prev.num_cores()
    }

    /// How `rows` breakdowns would be fed with the current topology
    pub fn distribution(&self, rows: usize) -> Result<Distribution, PanelError> {
        Distribution::plan(self.num_cores(), self.num_packages, rows)
    }

    /// Per-core utilisation since the previous call.
    ///
    /// The new snapshot always becomes the baseline, even when the core count
    /// changed and this sample has to be thrown away.
    pub fn sample(&mut self) -> Result<CpuUsage, PanelError> {
        let now = self.source.fetch()?;
        let usage = CpuUsage::between(&self.prev, &now);
        self.prev = now;
        usage
    }

    /// Sample and fold into `rows` breakdowns
    pub fn aggregated(&mut self, rows: usize) -> Result<Vec<f32>, PanelError> {
        if rows < 1 {
            return Err(PanelError::BadArgs("asked for 0 breakdowns".into()));
        }
        let usage = self.sample()?;
        aggregate(&usage, self.num_packages, rows)
    }

    /// Sample every `interval` and publish until shutdown or the renderer goes away
    pub fn run(
        mut self,
        rows: usize,
        interval: Duration,
        publisher: BreakdownPublisher,
        shutdown: &AtomicBool,
    ) -> Result<(), PanelError> {
        if rows < 1 {
            return Err(PanelError::BadArgs("asked for 0 breakdowns".into()));
        }

        while !shutdown.load(Ordering::Relaxed) {
            let started = Instant::now();

            match self.aggregated(rows) {
                Ok(breakdowns) => {
                    debug!("breakdowns {:?}", breakdowns);
                    if !publisher.publish(breakdowns) {
                        debug!("renderer gone, sampler stopping");
                        break;
                    }
                }
                Err(e) => warn!("aggregate usage failed: {}", e),
            }

            thread::sleep(interval.saturating_sub(started.elapsed()));
        }

        Ok(())
    }
}

/// One-line description of the host CPUs for the startup log
pub fn describe_host(num_packages: usize) -> String {
    let mut sys = System::new();
    sys.refresh_cpu_all();

    let cpus = sys.cpus();
    let brand = cpus
        .first()
        .map(|c| c.brand().trim().to_string())
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| "unknown CPU".to_string());

    format!(
        "{}: {} logical / {} physical cores in {} package(s)",
        brand,
        cpus.len(),
        sys.physical_core_count().unwrap_or(cpus.len()),
        num_packages
    )
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    use super::*;
    use crate::shared::breakdown_channel;

    /// Replays canned snapshots
    struct ScriptedTicks {
        packages: Result<i64, PanelError>,
        snapshots: VecDeque<Result<TickSnapshot, PanelError>>,
    }

    impl ScriptedTicks {
        fn new(packages: i64, snapshots: Vec<TickSnapshot>) -> Self {
            Self {
                packages: Ok(packages),
                snapshots: snapshots.into_iter().map(Ok).collect(),
            }
        }
    }

    impl TickSource for ScriptedTicks {
        fn num_packages(&mut self) -> Result<i64, PanelError> {
            self.packages.clone()
        }

        fn fetch(&mut self) -> Result<TickSnapshot, PanelError> {
            self.snapshots
                .pop_front()
                .unwrap_or_else(|| Err(PanelError::NoData("script exhausted".into())))
        }
    }

    fn snap(busy: &[u64], total: &[u64]) -> TickSnapshot {
        TickSnapshot::from_parts(busy.to_vec(), total.to_vec())
    }

    #[test]
    fn test_two_socket_sample() {
        let source = ScriptedTicks::new(
            2,
            vec![snap(&[100, 100], &[200, 200]), snap(&[150, 120], &[300, 300])],
        );
        let mut sampler = CpuSampler::new(source).unwrap();
        let out = sampler.aggregated(2).unwrap();
        assert!((out[0] - 0.5).abs() < 1e-6);
        assert!((out[1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_bad_package_count_defaults_to_one() {
        let source = ScriptedTicks::new(0, vec![snap(&[0], &[0])]);
        assert_eq!(CpuSampler::new(source).unwrap().num_packages(), 1);

        let source = ScriptedTicks {
            packages: Err(PanelError::NoData("no sysctl".into())),
            snapshots: vec![Ok(snap(&[0], &[0]))].into(),
        };
        assert_eq!(CpuSampler::new(source).unwrap().num_packages(), 1);
    }

    #[test]
    fn test_initial_fetch_failure_is_fatal() {
        let source = ScriptedTicks::new(1, vec![]);
        assert!(matches!(CpuSampler::new(source), Err(PanelError::NoData(_))));
    }

    #[test]
    fn test_topology_change_resets_baseline() {
        let source = ScriptedTicks::new(
            1,
            vec![
                snap(&[0, 0], &[100, 100]),
                snap(&[10], &[200]),
                snap(&[60], &[300]),
            ],
        );
        let mut sampler = CpuSampler::new(source).unwrap();

        assert_eq!(
            sampler.aggregated(2),
            Err(PanelError::TopologyChanged { previous: 2, current: 1 })
        );
        assert_eq!(sampler.num_cores(), 1);

        // Next sample diffs against the single-core snapshot
        let out = sampler.aggregated(2).unwrap();
        assert!((out[0] - 0.5).abs() < 1e-6);
        assert_eq!(out[0], out[1]);
    }

    #[test]
    fn test_failed_fetch_keeps_previous_baseline() {
        let source = ScriptedTicks {
            packages: Ok(1),
            snapshots: vec![
                Ok(snap(&[0], &[100])),
                Err(PanelError::NoData("transient".into())),
                Ok(snap(&[25], &[200])),
            ]
            .into(),
        };
        let mut sampler = CpuSampler::new(source).unwrap();
        assert!(matches!(sampler.aggregated(1), Err(PanelError::NoData(_))));
        let out = sampler.aggregated(1).unwrap();
        assert!((out[0] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_zero_rows_is_bad_args() {
        let source = ScriptedTicks::new(1, vec![snap(&[0], &[0]), snap(&[1], &[2])]);
        let mut sampler = CpuSampler::new(source).unwrap();
        assert!(matches!(sampler.aggregated(0), Err(PanelError::BadArgs(_))));
    }

    #[test]
    fn test_distribution_reflects_topology() {
        let source = ScriptedTicks::new(1, vec![snap(&[0; 4], &[0; 4])]);
        let sampler = CpuSampler::new(source).unwrap();
        assert_eq!(
            sampler.distribution(2).unwrap(),
            Distribution { cores_per_breakdown: Some(4), breakdown_mul: 2 }
        );
    }

    #[test]
    fn test_run_publishes_until_shutdown() {
        let source = ScriptedTicks::new(
            1,
            vec![
                snap(&[0], &[100]),
                snap(&[50], &[200]),
                snap(&[50], &[300]),
            ],
        );
        let sampler = CpuSampler::new(source).unwrap();
        let (tx, mut rx) = breakdown_channel();
        let shutdown = Arc::new(AtomicBool::new(false));

        let flag = shutdown.clone();
        let handle = thread::spawn(move || {
            sampler.run(2, Duration::from_millis(1), tx, &flag)
        });

        // Wait for a published vector, then stop the loop
        let mut seen = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.is_empty() && Instant::now() < deadline {
            if let Some(v) = rx.latest() {
                seen.push(v);
            }
            thread::sleep(Duration::from_millis(1));
        }
        shutdown.store(true, Ordering::Relaxed);
        assert!(handle.join().unwrap().is_ok());

        assert!(!seen.is_empty());
        let last = seen.last().unwrap();
        assert_eq!(last.len(), 2);
        assert!(last.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_run_recovers_after_sample_errors() {
        let source = ScriptedTicks {
            packages: Ok(1),
            snapshots: vec![
                Ok(snap(&[0, 0], &[100, 100])),
                Err(PanelError::NoData("transient".into())),
                Ok(snap(&[10], &[200])),
                Ok(snap(&[60], &[300])),
            ]
            .into(),
        };
        let sampler = CpuSampler::new(source).unwrap();
        let (tx, mut rx) = breakdown_channel();
        let shutdown = Arc::new(AtomicBool::new(false));

        let flag = shutdown.clone();
        let handle = thread::spawn(move || {
            sampler.run(2, Duration::from_millis(1), tx, &flag)
        });

        // NoData, then TopologyChanged, then the first good sample
        let mut published = None;
        let deadline = Instant::now() + Duration::from_secs(5);
        while published.is_none() && Instant::now() < deadline {
            published = rx.latest();
            thread::sleep(Duration::from_millis(1));
        }
        shutdown.store(true, Ordering::Relaxed);
        assert!(handle.join().unwrap().is_ok());

        let out = published.expect("no breakdowns published after errors");
        assert!((out[0] - 0.5).abs() < 1e-6);
        assert_eq!(out[0], out[1]);
    }

    #[test]
    fn test_run_stops_when_renderer_gone() {
        let source = ScriptedTicks::new(1, vec![snap(&[0], &[100]), snap(&[50], &[200])]);
        let sampler = CpuSampler::new(source).unwrap();
        let (tx, rx) = breakdown_channel();
        drop(rx);
        let shutdown = AtomicBool::new(false);
        assert!(sampler.run(1, Duration::from_millis(1), tx, &shutdown).is_ok());
    }

    #[test]
    fn test_run_rejects_zero_rows() {
        let source = ScriptedTicks::new(1, vec![snap(&[0], &[0])]);
        let sampler = CpuSampler::new(source).unwrap();
        let (tx, _rx) = breakdown_channel();
        let shutdown = AtomicBool::new(false);
        assert!(matches!(
            sampler.run(0, Duration::from_millis(1), tx, &shutdown),
            Err(PanelError::BadArgs(_))
        ));
    }
}

//! Folding per-core utilisation into a handful of breakdowns (LED rows).
//!
//! When the topology allows it each breakdown shows whole packages:
//!
//! ```text
//! 2 packages, 2 rows:  pkg0 -> row0, pkg1 -> row1
//! 1 package,  2 rows:  pkg0 -> row0 + row1
//! 3 packages, 2 rows:  pkg0 + pkg2 -> row0, pkg1 -> row1
//! ```
//!
//! Otherwise every row shows the mean over all cores.

use std::fmt;

use crate::error::PanelError;
use crate::system::cpu::CpuUsage;

/// How cores are spread over breakdowns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Distribution {
    /// Cores fed to one group of breakdowns before moving on; None = never move on
    pub cores_per_breakdown: Option<usize>,
    /// Adjacent breakdowns each core contributes to
    pub breakdown_mul: usize,
}

impl Distribution {
    pub fn plan(num_cores: usize, num_packages: usize, num_breakdowns: usize) -> Result<Self, PanelError> {
        if num_breakdowns < 1 {
            return Err(PanelError::BadArgs("asked for 0 breakdowns".into()));
        }
        let num_packages = num_packages.max(1);
        let cores_per_package = num_cores / num_packages;

        let everywhere = Self {
            cores_per_breakdown: None,
            breakdown_mul: num_breakdowns,
        };

        let plan = if num_cores % num_packages != 0 {
            // No fair per-package split
            everywhere
        } else if num_packages < num_breakdowns {
            if num_breakdowns % num_packages == 0 {
                Self {
                    cores_per_breakdown: Some(cores_per_package),
                    breakdown_mul: num_breakdowns / num_packages,
                }
            } else {
                everywhere
            }
        } else {
            // Round-robin packages over breakdowns
            Self {
                cores_per_breakdown: Some(cores_per_package),
                breakdown_mul: 1,
            }
        };

        Ok(plan)
    }

    /// Every breakdown sees every core
    pub fn is_overall_mean(&self) -> bool {
        self.cores_per_breakdown.is_none()
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cores_per_breakdown {
            None => write!(f, "overall mean on every row"),
            Some(n) => write!(f, "{} cores per package, {} row(s) per package", n, self.breakdown_mul),
        }
    }
}

/// Average utilisation for each of `num_breakdowns` breakdowns.
///
/// A breakdown with no known contributing core reads 0.
pub fn aggregate(usage: &CpuUsage, num_packages: usize, num_breakdowns: usize) -> Result<Vec<f32>, PanelError> {
    let plan = Distribution::plan(usage.num_cores(), num_packages, num_breakdowns)?;

    let mut sum = vec![0.0f32; num_breakdowns];
    let mut count = vec![0usize; num_breakdowns];

    let mut breakdown_index = 0;
    let mut cores_in_current = 0;
    for core in &usage.cores {
        if let Some(u) = core.usage {
            for j in 0..plan.breakdown_mul {
                let index = (breakdown_index + j) % num_breakdowns;
                sum[index] += u;
                count[index] += 1;
            }
        }

        cores_in_current += 1;
        if plan.cores_per_breakdown == Some(cores_in_current) {
            cores_in_current = 0;
            breakdown_index = (breakdown_index + plan.breakdown_mul) % num_breakdowns;
        }
    }

    Ok(sum
        .iter()
        .zip(&count)
        .map(|(&s, &n)| if n > 0 { s / n as f32 } else { 0.0 })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: &[f32], b: &[f32]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-6)
    }

    #[test]
    fn test_plan_table() {
        // N mod P != 0
        assert_eq!(
            Distribution::plan(5, 3, 2).unwrap(),
            Distribution { cores_per_breakdown: None, breakdown_mul: 2 }
        );
        // P < R, R mod P == 0
        assert_eq!(
            Distribution::plan(4, 1, 2).unwrap(),
            Distribution { cores_per_breakdown: Some(4), breakdown_mul: 2 }
        );
        // P < R, R mod P != 0
        assert_eq!(
            Distribution::plan(4, 2, 3).unwrap(),
            Distribution { cores_per_breakdown: None, breakdown_mul: 3 }
        );
        // P >= R
        assert_eq!(
            Distribution::plan(8, 2, 2).unwrap(),
            Distribution { cores_per_breakdown: Some(4), breakdown_mul: 1 }
        );
    }

    #[test]
    fn test_zero_breakdowns_is_bad_args() {
        let usage = CpuUsage::from_usages(&[Some(0.5)]);
        assert!(matches!(aggregate(&usage, 1, 0), Err(PanelError::BadArgs(_))));
    }

    #[test]
    fn test_two_packages_two_rows() {
        let usage = CpuUsage::from_usages(&[Some(0.5), Some(0.2)]);
        assert!(close(&aggregate(&usage, 2, 2).unwrap(), &[0.5, 0.2]));
    }

    #[test]
    fn test_single_package_duplicated_on_both_rows() {
        let usage = CpuUsage::from_usages(&[Some(0.25); 4]);
        assert!(close(&aggregate(&usage, 1, 2).unwrap(), &[0.25, 0.25]));
    }

    #[test]
    fn test_round_robin_three_packages_two_rows() {
        let usage = CpuUsage::from_usages(&[Some(1.0), Some(0.0), Some(0.5)]);
        assert!(close(&aggregate(&usage, 3, 2).unwrap(), &[0.75, 0.0]));
    }

    #[test]
    fn test_uneven_cores_fall_back_to_mean() {
        let usage = CpuUsage::from_usages(&[Some(1.0), Some(1.0), Some(0.0), Some(0.0), Some(0.0)]);
        let out = aggregate(&usage, 3, 2).unwrap();
        assert!(close(&out, &[0.4, 0.4]));
        assert_eq!(out[0], out[1]);
    }

    #[test]
    fn test_mean_fallback_ignores_unknown_cores() {
        let usage = CpuUsage::from_usages(&[Some(0.9), None, Some(0.3)]);
        let out = aggregate(&usage, 2, 2).unwrap();
        assert!(close(&out, &[0.6, 0.6]));
    }

    #[test]
    fn test_row_without_known_cores_reads_zero() {
        // Package 1's only core has no elapsed ticks
        let usage = CpuUsage::from_usages(&[Some(0.8), None]);
        assert!(close(&aggregate(&usage, 2, 2).unwrap(), &[0.8, 0.0]));

        let usage = CpuUsage::from_usages(&[]);
        assert!(close(&aggregate(&usage, 1, 2).unwrap(), &[0.0, 0.0]));
    }

    #[test]
    fn test_packages_of_several_cores() {
        // 2 packages x 2 cores on 2 rows
        let usage = CpuUsage::from_usages(&[Some(1.0), Some(0.5), Some(0.0), Some(0.5)]);
        assert!(close(&aggregate(&usage, 2, 2).unwrap(), &[0.75, 0.25]));
    }

    #[test]
    fn test_outputs_within_unit_range() {
        let usage = CpuUsage::from_usages(&[Some(1.0), Some(1.0), Some(1.0), Some(0.0), None, Some(0.3)]);
        for packages in 1..=6 {
            for rows in 1..=4 {
                for v in aggregate(&usage, packages, rows).unwrap() {
                    assert!((0.0..=1.0).contains(&v), "P={} R={} gave {}", packages, rows, v);
                }
            }
        }
    }
}

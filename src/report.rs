use std::fmt;

use crate::bench::Measurement;
use crate::fabric::Fabric;
use crate::group::Group;
use crate::verify::PairOutcome;

/// Qualitative bandwidth rating. The thresholds are fixed by design:
/// they encode what a healthy high-speed fabric should deliver, and are
/// deliberately not configurable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rating {
    Excellent,
    Good,
    Warning,
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Rating::Excellent => "excellent",
            Rating::Good => "good",
            Rating::Warning => "warning",
        };
        f.write_str(label)
    }
}

/// Classify a peak bandwidth: above 50 GB/s is excellent, 20 up to and
/// including 50 is good, below 20 warrants a configuration check.
pub fn classify(max_bandwidth_gb_s: f64) -> Rating {
    if max_bandwidth_gb_s > 50.0 {
        Rating::Excellent
    } else if max_bandwidth_gb_s >= 20.0 {
        Rating::Good
    } else {
        Rating::Warning
    }
}

/// Capability to print the run report. Only rank 0 can claim it, which
/// keeps every other rank away from stdout by construction instead of
/// by scattered rank checks.
pub struct Reporter {
    _private: (),
}

impl Reporter {
    pub fn claim<F: Fabric>(group: &Group<F>) -> Option<Self> {
        (group.rank() == 0).then_some(Self { _private: () })
    }

    pub fn print_summary(&self, results: &[Measurement]) {
        println!();
        println!("=== Bandwidth Summary ===");
        println!("Size (MB) | Bandwidth (GB/s) | Time (ms)");
        println!("----------|------------------|----------");
        for m in results {
            println!(
                "{:9} | {:16.2} | {:9.2}",
                m.size_mb(),
                m.bandwidth_gb_s,
                m.duration_ms()
            );
        }

        let max = results
            .iter()
            .map(|m| m.bandwidth_gb_s)
            .fold(f64::NEG_INFINITY, f64::max);
        if max.is_finite() {
            match classify(max) {
                Rating::Excellent => println!(
                    "EXCELLENT: peak bandwidth {max:.2} GB/s exceeds 50 GB/s, fabric performing at full speed"
                ),
                Rating::Good => println!(
                    "GOOD: peak bandwidth {max:.2} GB/s indicates the fabric is working, but may not be optimal"
                ),
                Rating::Warning => println!(
                    "WARNING: peak bandwidth {max:.2} GB/s is lower than expected, check fabric configuration"
                ),
            }
        }
    }

    pub fn print_verification(&self, outcomes: &[PairOutcome]) {
        println!();
        println!("=== Point-to-Point Verification ===");
        for outcome in outcomes {
            println!(
                "{} -> {}: {}",
                outcome.src,
                outcome.dst,
                if outcome.passed { "verified" } else { "FAILED" }
            );
        }
        let failed = outcomes.iter().filter(|o| !o.passed).count();
        if failed == 0 {
            println!("all {} ordered pairs verified", outcomes.len());
        } else {
            println!("{failed} of {} ordered pairs FAILED", outcomes.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_boundaries() {
        assert_eq!(classify(51.0), Rating::Excellent);
        // Upper tier is exclusive at 50.
        assert_eq!(classify(50.0), Rating::Good);
        // Lower bound of "good" is inclusive.
        assert_eq!(classify(20.0), Rating::Good);
        assert_eq!(classify(19.9), Rating::Warning);
        assert_eq!(classify(0.0), Rating::Warning);
    }

    #[test]
    fn rating_labels() {
        assert_eq!(classify(60.0).to_string(), "excellent");
        assert_eq!(classify(30.0).to_string(), "good");
        assert_eq!(classify(1.0).to_string(), "warning");
    }

    #[tokio::test]
    async fn only_rank_zero_claims_the_reporter() {
        use crate::fabric::local::LocalFabric;

        let mut world = LocalFabric::world(2);
        let rank1 = Group::over(world.pop().unwrap());
        let rank0 = Group::over(world.pop().unwrap());

        assert!(Reporter::claim(&rank0).is_some());
        assert!(Reporter::claim(&rank1).is_none());
    }
}

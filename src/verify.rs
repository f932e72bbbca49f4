use crate::bench::{ELEMENT_WIDTH, MIB};
use crate::error::HarnessError;
use crate::fabric::Fabric;
use crate::group::Group;

// torch-style allclose tolerances; the transfer may cross heterogeneous
// float pipelines, so the check is approximate rather than bitwise.
const RTOL: f32 = 1e-5;
const ATOL: f32 = 1e-8;

/// Result of one directed transfer check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PairOutcome {
    pub src: usize,
    pub dst: usize,
    pub passed: bool,
}

/// Element-wise approximate comparison of a received payload against the
/// expected constant fill value.
pub fn payload_matches(received: &[f32], expected: f32) -> bool {
    received
        .iter()
        .all(|&value| (value - expected).abs() <= ATOL + RTOL * expected.abs())
}

/// Deterministic fill pattern for a sender: rank plus one, so rank 0's
/// payload is distinguishable from a zeroed receive buffer.
pub fn pattern_for(src: usize) -> f32 {
    (src + 1) as f32
}

/// Verify a directed transfer for every ordered pair of distinct ranks,
/// in lexicographic `(src, dst)` order. The iteration is not a
/// collective: there is no implicit synchronization between pairs, so
/// correctness depends on every rank enumerating the identical sequence.
///
/// After each transfer the receiver forwards a one-element outcome flag
/// to rank 0, which therefore returns one outcome per ordered pair;
/// every other rank returns only the outcomes it verified as receiver.
/// A failed pair is recorded and the sweep continues.
pub async fn verify_all_pairs<F: Fabric>(
    group: &Group<F>,
    message_size_mb: usize,
) -> Result<Vec<PairOutcome>, HarnessError> {
    if message_size_mb == 0 {
        return Err(HarnessError::InvalidSize {
            size_mb: message_size_mb,
        });
    }

    let world_size = group.world_size();
    let rank = group.rank();
    let elements = message_size_mb * MIB / ELEMENT_WIDTH;

    let mut outcomes = Vec::new();
    for src in 0..world_size {
        for dst in 0..world_size {
            if src == dst {
                continue;
            }

            if rank == src {
                let payload = vec![pattern_for(src); elements];
                group.send(&payload, dst).await?;
            } else if rank == dst {
                let mut received = vec![0.0f32; elements];
                group.recv(&mut received, src).await?;
                let passed = payload_matches(&received, pattern_for(src));
                if !passed {
                    tracing::warn!(src, dst, "pairwise transfer content mismatch");
                }
                outcomes.push(PairOutcome { src, dst, passed });
                if dst != 0 {
                    group.send(&[if passed { 1.0 } else { 0.0 }], 0).await?;
                }
            }

            // Coordinator collects the receiver's verdict so the final
            // report covers every pair.
            if rank == 0 && dst != 0 {
                let mut flag = [0.0f32; 1];
                group.recv(&mut flag, dst).await?;
                outcomes.push(PairOutcome {
                    src,
                    dst,
                    passed: flag[0] != 0.0,
                });
            }
        }
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn matching_payload_passes() {
        let payload = vec![3.0f32; 64];
        assert!(payload_matches(&payload, pattern_for(2)));
    }

    #[test]
    fn rounding_noise_is_tolerated() {
        let expected = pattern_for(4); // 5.0
        let payload = vec![expected + expected * (RTOL / 2.0); 16];
        assert!(payload_matches(&payload, expected));
    }

    #[test]
    fn zeroed_buffer_fails() {
        let payload = vec![0.0f32; 16];
        assert!(!payload_matches(&payload, pattern_for(0)));
    }

    proptest! {
        /// Corrupting exactly one element flips the outcome.
        #[test]
        fn single_element_corruption_flips_outcome(
            len in 1usize..256,
            index in 0usize..256,
            src in 0usize..64,
        ) {
            let index = index % len;
            let expected = pattern_for(src);
            let mut payload = vec![expected; len];
            prop_assert!(payload_matches(&payload, expected));

            payload[index] = expected + 1.0;
            prop_assert!(!payload_matches(&payload, expected));
        }
    }
}

use halyard_core::{PublicKey, View};

use crate::validator_set::ValidatorSet;

/// Upper bound on the length of one leader rotation
const MAX_SCHEDULE_LEN: u64 = 10_000;

/// Stake-weighted leader rotation.
///
/// The rotation is a smooth weighted round-robin over the validators in key
/// order: over one full rotation every validator leads a number of views
/// proportional to its weight, and heavy validators are spread out rather
/// than bunched together. Validators with zero weight never lead.
#[derive(Debug, Clone)]
pub struct ProposerElection {
    schedule: Vec<PublicKey>,
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

impl ProposerElection {
    pub fn new(validators: &ValidatorSet) -> Self {
        let mut weighted: Vec<(PublicKey, u64)> = validators
            .validators()
            .into_iter()
            .filter(|v| v.weight > 0)
            .map(|v| (v.key, v.weight))
            .collect();

        let divisor = weighted.iter().fold(0, |acc, (_, w)| gcd(acc, *w)).max(1);
        for (_, weight) in weighted.iter_mut() {
            *weight /= divisor;
        }

        let total: u64 = weighted.iter().map(|(_, w)| *w).sum();
        if total > MAX_SCHEDULE_LEN {
            for (_, weight) in weighted.iter_mut() {
                let scaled = (*weight as u128 * MAX_SCHEDULE_LEN as u128) / total as u128;
                *weight = (scaled as u64).max(1);
            }
        }

        let total: i128 = weighted.iter().map(|(_, w)| *w as i128).sum();
        let mut current = vec![0i128; weighted.len()];
        let mut schedule = Vec::with_capacity(total as usize);
        for _ in 0..total {
            let mut best = 0;
            for (i, (_, weight)) in weighted.iter().enumerate() {
                current[i] += *weight as i128;
                if current[i] > current[best] {
                    best = i;
                }
            }
            current[best] -= total;
            schedule.push(weighted[best].0);
        }

        ProposerElection { schedule }
    }

    /// Leader of `view`
    pub fn leader(&self, view: View) -> PublicKey {
        let index = view.number() % self.schedule.len() as u64;
        self.schedule[index as usize]
    }

    /// Number of views in one full rotation
    pub fn rotation_len(&self) -> usize {
        self.schedule.len()
    }
}

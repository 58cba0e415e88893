//! Recursive Oral Messages (OM) consensus: state, engine, and the shared
//! constants every node in a deployment must agree on.

pub mod engine;
pub mod state;

pub use engine::{ConsensusAction, ConsensusEngine};
pub use state::{ConsensusState, RoundNode};

/// Timeout floor; `roundTimeout(om) = BASE_ROUND_TIMEOUT_SECS * (om + 1)`.
pub const BASE_ROUND_TIMEOUT_SECS: u64 = 5;

/// How long a resolved round is retained after its deadline before GC.
pub const GC_GRACE_SECS: u64 = 10;

/// Value substituted for a child that never reports by its deadline, and the
/// tie-break output when no strict majority exists. Fixed across the
/// deployment by the wire contract; every node must agree on its meaning.
pub const DEFAULT_SENTINEL: &str = "?";

/// `roundTimeout(om)`, in milliseconds.
pub fn round_timeout_millis(om: i64, base_secs: u64) -> u64 {
    base_secs.saturating_mul((om.max(0) as u64) + 1) * 1000
}

/// Substitutes the original value's first character with `!`. Deterministic
/// given the input.
pub fn lie(value: &str) -> String {
    let mut chars = value.chars();
    chars.next();
    format!("!{}", chars.as_str())
}

/// Applies the lying policy at the single well-defined emission moment: when
/// forming an outbound value (forward-down or report-up), never on receipt.
pub fn apply_lying_policy(value: &str, lying_percent: u8) -> String {
    let percent = lying_percent.min(100);
    if percent == 0 {
        return value.to_string();
    }
    let roll = rand::random::<u8>() % 100;
    if roll < percent {
        lie(value)
    } else {
        value.to_string()
    }
}

/// Computes the majority of `votes`, falling back to [`DEFAULT_SENTINEL`] when
/// no strict majority exists. The default sentinel participates in the
/// majority on equal terms with any other value.
pub fn majority(votes: &[&str]) -> String {
    use std::collections::HashMap;

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for vote in votes {
        *counts.entry(*vote).or_insert(0) += 1;
    }
    let half = votes.len() / 2;
    counts
        .into_iter()
        .find(|(_, count)| *count > half)
        .map(|(value, _)| value.to_string())
        .unwrap_or_else(|| DEFAULT_SENTINEL.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lie_replaces_first_character_deterministically() {
        assert_eq!(lie("apple"), "!pple");
        assert_eq!(lie("apple"), lie("apple"));
    }

    #[test]
    fn zero_percent_never_lies() {
        for _ in 0..50 {
            assert_eq!(apply_lying_policy("truth", 0), "truth");
        }
    }

    #[test]
    fn hundred_percent_always_lies() {
        for _ in 0..50 {
            assert_eq!(apply_lying_policy("truth", 100), "!ruth");
        }
    }

    #[test]
    fn majority_picks_strict_winner() {
        let votes = vec!["sky", "sky", "ground"];
        assert_eq!(majority(&votes), "sky");
    }

    #[test]
    fn majority_falls_back_to_default_sentinel_on_tie() {
        let votes = vec!["sky", "ground"];
        assert_eq!(majority(&votes), DEFAULT_SENTINEL);
    }

    #[test]
    fn round_timeout_grows_with_om() {
        assert_eq!(round_timeout_millis(0, 5), 5_000);
        assert_eq!(round_timeout_millis(2, 5), 15_000);
    }
}

// =============================================================================
// DecisionMachine — pure (data_trust, hypothesis) -> decision reducer
// =============================================================================

use crate::types::{DataTrust, Decision, Hypothesis};

/// Reduce the current trust and hypothesis verdicts to a trading decision.
///
/// HALTED overrides everything: any UNTRUSTED stream or an INVALID hypothesis
/// halts regardless of the other axis. Short of that, DEGRADED trust or a
/// WEAKENING hypothesis both restrict; TRUSTED+VALID is the only ALLOWED
/// combination.
pub fn decide(trust: DataTrust, hypothesis: Hypothesis) -> Decision {
    if trust == DataTrust::Untrusted || hypothesis == Hypothesis::Invalid {
        return Decision::Halted;
    }
    if trust == DataTrust::Degraded || hypothesis == Hypothesis::Weakening {
        return Decision::Restricted;
    }
    Decision::Allowed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untrusted_always_halts() {
        assert_eq!(
            decide(DataTrust::Untrusted, Hypothesis::Valid),
            Decision::Halted
        );
        assert_eq!(
            decide(DataTrust::Untrusted, Hypothesis::Invalid),
            Decision::Halted
        );
    }

    #[test]
    fn invalid_hypothesis_always_halts() {
        assert_eq!(
            decide(DataTrust::Trusted, Hypothesis::Invalid),
            Decision::Halted
        );
        assert_eq!(
            decide(DataTrust::Degraded, Hypothesis::Invalid),
            Decision::Halted
        );
    }

    #[test]
    fn degraded_or_weakening_restricts_short_of_a_halt() {
        assert_eq!(
            decide(DataTrust::Degraded, Hypothesis::Valid),
            Decision::Restricted
        );
        assert_eq!(
            decide(DataTrust::Degraded, Hypothesis::Weakening),
            Decision::Restricted
        );
        assert_eq!(
            decide(DataTrust::Trusted, Hypothesis::Weakening),
            Decision::Restricted
        );
    }

    #[test]
    fn trusted_and_valid_allows() {
        assert_eq!(
            decide(DataTrust::Trusted, Hypothesis::Valid),
            Decision::Allowed
        );
    }

    #[test]
    fn decision_is_a_pure_function_of_its_inputs() {
        for _ in 0..3 {
            assert_eq!(
                decide(DataTrust::Degraded, Hypothesis::Weakening),
                Decision::Restricted
            );
        }
    }
}

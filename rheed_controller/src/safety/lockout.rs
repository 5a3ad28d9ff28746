//! Secret-gated lockout.
//!
//! The gate holds the shared secret and compares each submitted attempt in
//! constant time. There is no attempt limit and no back-off: the operator
//! may retry indefinitely.

use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::state::SecretCheck;

/// Compares submitted secrets against the stored one.
pub struct LockoutGate {
    secret: String,
    attempts: u32,
}

impl LockoutGate {
    /// Gate for `secret`.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            attempts: 0,
        }
    }

    /// Failed attempts since the last unlock.
    #[inline]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Compare one attempt.
    pub fn check(&mut self, attempt: &str) -> SecretCheck {
        let matched: bool = attempt.as_bytes().ct_eq(self.secret.as_bytes()).into();
        if matched {
            info!(failed_attempts = self.attempts, "Lockout secret accepted");
            self.attempts = 0;
            SecretCheck::Match
        } else {
            self.attempts = self.attempts.saturating_add(1);
            warn!(failed_attempts = self.attempts, "Lockout secret rejected");
            SecretCheck::Mismatch
        }
    }
}

impl std::fmt::Debug for LockoutGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockoutGate")
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correct_secret_matches() {
        let mut gate = LockoutGate::new("rheed");
        assert_eq!(gate.check("rheed"), SecretCheck::Match);
    }

    #[test]
    fn wrong_secrets_never_exhaust() {
        let mut gate = LockoutGate::new("rheed");
        for n in 1..=50 {
            assert_eq!(gate.check("nope"), SecretCheck::Mismatch);
            assert_eq!(gate.attempts(), n);
        }
        assert_eq!(gate.check("rheed"), SecretCheck::Match);
        assert_eq!(gate.attempts(), 0);
    }

    #[test]
    fn prefix_and_case_do_not_match() {
        let mut gate = LockoutGate::new("rheed");
        assert_eq!(gate.check("rhee"), SecretCheck::Mismatch);
        assert_eq!(gate.check("RHEED"), SecretCheck::Mismatch);
        assert_eq!(gate.check("rheed "), SecretCheck::Mismatch);
    }

    #[test]
    fn debug_hides_secret() {
        let gate = LockoutGate::new("top-secret");
        assert!(!format!("{gate:?}").contains("top-secret"));
    }
}

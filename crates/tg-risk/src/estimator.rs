// estimator.rs — Per-session finite-difference derivatives of the safety margin.

use std::collections::{HashMap, VecDeque};

use crate::barrier::{BarrierGains, BarrierState};
use crate::error::RiskError;

/// Keeps the last `capacity` safety-margin samples per session.
///
/// `ḣ = h[n] − h[n−1]` and `ḧ = ḣ[n] − ḣ[n−1]`; each is zero until the
/// window holds enough samples to compute it.
///
/// [`peek`](Self::peek) computes the state a new sample would produce
/// without storing it; [`record`](Self::record) stores it. Callers that may
/// abandon an evaluation peek first and record once the outcome is final.
#[derive(Debug, Clone)]
pub struct DerivativeEstimator {
    capacity: usize,
    gains: BarrierGains,
    windows: HashMap<String, VecDeque<f64>>,
}

impl DerivativeEstimator {
    pub fn new(capacity: usize, gains: BarrierGains) -> Result<Self, RiskError> {
        if capacity < 3 {
            return Err(RiskError::WindowTooSmall(capacity));
        }
        gains.validate()?;
        Ok(Self {
            capacity,
            gains,
            windows: HashMap::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn gains(&self) -> BarrierGains {
        self.gains
    }

    /// Record a new margin for `session_id` and return the updated state.
    ///
    /// A non-finite margin is rejected and leaves the window untouched.
    pub fn update(&mut self, session_id: &str, h: f64) -> Result<BarrierState, RiskError> {
        let state = self.peek(session_id, h)?;
        self.record(session_id, h)?;
        Ok(state)
    }

    /// The state `update` would return, leaving the window untouched.
    pub fn peek(&self, session_id: &str, h: f64) -> Result<BarrierState, RiskError> {
        if !h.is_finite() {
            return Err(RiskError::NonFiniteMargin(h));
        }

        // The last two stored samples plus `h` are all the differences need.
        let mut recent: Vec<f64> = self
            .windows
            .get(session_id)
            .map(|w| w.iter().skip(w.len().saturating_sub(2)).copied().collect())
            .unwrap_or_default();
        recent.push(h);

        let n = recent.len();
        let h_dot = if n >= 2 {
            recent[n - 1] - recent[n - 2]
        } else {
            0.0
        };
        let h_ddot = if n >= 3 {
            h_dot - (recent[n - 2] - recent[n - 3])
        } else {
            0.0
        };

        Ok(BarrierState {
            h,
            h_dot,
            h_ddot,
            k1: self.gains.k1,
            k2: self.gains.k2,
        })
    }

    /// Append a margin to the session's window.
    pub fn record(&mut self, session_id: &str, h: f64) -> Result<(), RiskError> {
        if !h.is_finite() {
            return Err(RiskError::NonFiniteMargin(h));
        }
        let capacity = self.capacity;
        let window = self
            .windows
            .entry(session_id.to_string())
            .or_insert_with(|| VecDeque::with_capacity(capacity));
        window.push_back(h);
        while window.len() > capacity {
            window.pop_front();
        }
        Ok(())
    }

    /// Sessions with stored samples.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Samples currently held for a session, oldest first.
    pub fn history(&self, session_id: &str) -> Vec<f64> {
        self.windows
            .get(session_id)
            .map(|w| w.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drop a session's history (e.g. after an administrative release).
    pub fn forget(&mut self, session_id: &str) {
        self.windows.remove(session_id);
    }
}

impl Default for DerivativeEstimator {
    fn default() -> Self {
        Self {
            capacity: 3,
            gains: BarrierGains::default(),
            windows: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::BarrierController;

    #[test]
    fn derivatives_are_zero_until_history_exists() {
        let mut est = DerivativeEstimator::default();
        let first = est.update("s1", 5.0).unwrap();
        assert_eq!((first.h_dot, first.h_ddot), (0.0, 0.0));

        let second = est.update("s1", 3.0).unwrap();
        assert_eq!(second.h_dot, -2.0);
        assert_eq!(second.h_ddot, 0.0);
    }

    #[test]
    fn converging_sequence_fails_the_barrier() {
        let mut est = DerivativeEstimator::default();
        est.update("s1", 5.0).unwrap();
        est.update("s1", 3.0).unwrap();
        let state = est.update("s1", 0.5).unwrap();

        assert_eq!(state.h_dot, -2.5);
        assert_eq!(state.h_ddot, -0.5);
        assert!(state.h > 0.0);
        assert!(!BarrierController::new().check(&state).is_pass());
    }

    #[test]
    fn window_is_bounded() {
        let mut est = DerivativeEstimator::new(3, BarrierGains::default()).unwrap();
        for h in [10.0, 9.0, 8.0, 7.0, 6.0] {
            est.update("s1", h).unwrap();
        }
        assert_eq!(est.history("s1"), vec![8.0, 7.0, 6.0]);
    }

    #[test]
    fn sessions_are_independent() {
        let mut est = DerivativeEstimator::default();
        est.update("a", 100.0).unwrap();
        let b = est.update("b", 1.0).unwrap();
        assert_eq!(b.h_dot, 0.0);

        est.forget("a");
        assert!(est.history("a").is_empty());
    }

    #[test]
    fn peek_leaves_the_window_untouched() {
        let mut est = DerivativeEstimator::default();
        est.update("s1", 5.0).unwrap();
        est.update("s1", 3.0).unwrap();

        let peeked = est.peek("s1", 0.5).unwrap();
        assert_eq!((peeked.h_dot, peeked.h_ddot), (-2.5, -0.5));
        assert_eq!(est.history("s1"), vec![5.0, 3.0]);

        // An abandoned sample does not shape the next one.
        let next = est.peek("s1", 3.0).unwrap();
        assert_eq!(next.h_dot, 0.0);

        est.record("s1", 0.5).unwrap();
        assert_eq!(est.history("s1"), vec![5.0, 3.0, 0.5]);
    }

    #[test]
    fn non_finite_margin_is_rejected() {
        let mut est = DerivativeEstimator::default();
        assert!(matches!(
            est.update("s1", f64::NAN),
            Err(RiskError::NonFiniteMargin(_))
        ));
        assert!(est.history("s1").is_empty());
    }

    #[test]
    fn window_below_three_is_rejected() {
        assert!(matches!(
            DerivativeEstimator::new(2, BarrierGains::default()),
            Err(RiskError::WindowTooSmall(2))
        ));
    }
}

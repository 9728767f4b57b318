//! Linear and exponential growth, one step at a time.
//!
//! A [`GrowthEngine`] is built from validated [`GrowthParams`] and hands
//! out fresh [`Steps`] iterators on demand. Step `i` carries
//! `base * i` and `base ^ i`, where the exponential value is carried
//! forward from the previous step (`previous * base`, starting at 1)
//! rather than raised from scratch.
//!
//! The engine has no side effects. Callers decide how fast to pull
//! steps, which is what lets the session controller apply backpressure.

/// Smallest accepted exponent.
pub const MIN_EXPONENT: u32 = 1;

/// Largest accepted exponent.
pub const MAX_EXPONENT: u32 = 100;

/// Errors produced while validating inputs or computing steps.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// The base was zero, negative, NaN or infinite.
    #[error("Base must be positive, got {base}")]
    InvalidBase {
        /// The rejected base.
        base: f64,
    },

    /// The exponent was outside `MIN_EXPONENT..=MAX_EXPONENT`.
    #[error("Exponent must be between 1 and 100, got {exponent}")]
    InvalidExponent {
        /// The rejected exponent.
        exponent: i64,
    },

    /// A step produced a value that is not a finite number.
    #[error("arithmetic overflow at step {step}: {operation} is not finite")]
    Overflow {
        /// The step that overflowed.
        step: u32,
        /// The operation that overflowed.
        operation: String,
    },
}

impl EngineError {
    /// Whether this error describes bad input rather than a computation failure.
    pub const fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidBase { .. } | Self::InvalidExponent { .. })
    }
}

/// Validated inputs for a growth calculation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrowthParams {
    base: f64,
    exponent: u32,
}

impl GrowthParams {
    /// Validate a base and exponent.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidBase`] unless `base` is finite and
    /// greater than zero, and [`EngineError::InvalidExponent`] unless
    /// `exponent` is within `1..=100`.
    pub fn new(base: f64, exponent: i64) -> Result<Self, EngineError> {
        if !base.is_finite() || base <= 0.0 {
            return Err(EngineError::InvalidBase { base });
        }

        let exponent = u32::try_from(exponent)
            .ok()
            .filter(|e| (MIN_EXPONENT..=MAX_EXPONENT).contains(e))
            .ok_or(EngineError::InvalidExponent { exponent })?;

        Ok(Self { base, exponent })
    }

    /// The growth base.
    pub const fn base(&self) -> f64 {
        self.base
    }

    /// The number of steps.
    pub const fn exponent(&self) -> u32 {
        self.exponent
    }
}

/// One computed step of both sequences.
#[derive(Debug, Clone, PartialEq)]
pub struct GrowthStep {
    /// 1-indexed step number.
    pub step: u32,
    /// Linear operation label, e.g. `2 × 3`.
    pub linear_operation: String,
    /// `base * step`.
    pub linear_result: f64,
    /// Exponential operation label, e.g. `2^3`.
    pub exponential_operation: String,
    /// `base ^ step`.
    pub exponential_result: f64,
}

/// Produces step sequences for one set of [`GrowthParams`].
#[derive(Debug, Clone, Copy)]
pub struct GrowthEngine {
    params: GrowthParams,
}

impl GrowthEngine {
    /// Create an engine for the given parameters.
    pub const fn new(params: GrowthParams) -> Self {
        Self { params }
    }

    /// The parameters this engine runs with.
    pub const fn params(&self) -> GrowthParams {
        self.params
    }

    /// Start a new pass over the steps. Each call begins again at step 1.
    pub const fn steps(&self) -> Steps {
        Steps {
            base: self.params.base,
            exponent: self.params.exponent,
            next: 1,
            exponential: 1.0,
            halted: false,
        }
    }
}

/// Lazy iterator over the steps of a [`GrowthEngine`].
///
/// Yields `Ok` for each step until the exponent is reached. If a step
/// overflows, that step yields `Err` and the iterator is exhausted.
#[derive(Debug, Clone)]
pub struct Steps {
    base: f64,
    exponent: u32,
    next: u32,
    exponential: f64,
    halted: bool,
}

impl Iterator for Steps {
    type Item = Result<GrowthStep, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.halted || self.next > self.exponent {
            return None;
        }

        let step = self.next;
        self.next = self.next.saturating_add(1);

        let linear_operation = format!("{} × {step}", self.base);
        let exponential_operation = format!("{}^{step}", self.base);

        let linear_result = self.base * f64::from(step);
        let exponential_result = self.exponential * self.base;

        if !linear_result.is_finite() {
            self.halted = true;
            return Some(Err(EngineError::Overflow {
                step,
                operation: linear_operation,
            }));
        }
        if !exponential_result.is_finite() {
            self.halted = true;
            return Some(Err(EngineError::Overflow {
                step,
                operation: exponential_operation,
            }));
        }

        self.exponential = exponential_result;

        Some(Ok(GrowthStep {
            step,
            linear_operation,
            linear_result,
            exponential_operation,
            exponential_result,
        }))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.halted {
            return (0, Some(0));
        }
        let remaining = self
            .exponent
            .saturating_add(1)
            .saturating_sub(self.next);
        let remaining = usize::try_from(remaining).unwrap_or(usize::MAX);
        (0, Some(remaining))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::float_cmp,
    clippy::cast_possible_wrap,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;

    fn run(base: f64, exponent: i64) -> Vec<GrowthStep> {
        let engine = GrowthEngine::new(GrowthParams::new(base, exponent).unwrap());
        engine.steps().collect::<Result<Vec<_>, _>>().unwrap()
    }

    #[test]
    fn base_two_exponent_ten() {
        let steps = run(2.0, 10);
        assert_eq!(steps.len(), 10);
        let last = steps.last().unwrap();
        assert_eq!(last.step, 10);
        assert_eq!(last.linear_result, 20.0);
        assert_eq!(last.exponential_result, 1024.0);
    }

    #[test]
    fn base_three_exponent_five() {
        let steps = run(3.0, 5);
        let last = steps.last().unwrap();
        assert_eq!(last.linear_result, 15.0);
        assert_eq!(last.exponential_result, 243.0);
    }

    #[test]
    fn first_step_is_base_itself() {
        let steps = run(7.5, 1);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].linear_result, 7.5);
        assert_eq!(steps[0].exponential_result, 7.5);
    }

    #[test]
    fn produces_exactly_exponent_steps() {
        for exponent in [1_i64, 2, 17, 64, 100] {
            let steps = run(1.01, exponent);
            assert_eq!(steps.len() as i64, exponent);
            for (idx, step) in steps.iter().enumerate() {
                assert_eq!(u64::from(step.step), idx as u64 + 1);
            }
        }
    }

    #[test]
    fn linear_is_base_times_step_exactly() {
        let base = 1.7;
        for step in run(base, 40) {
            assert_eq!(step.linear_result, base * f64::from(step.step));
        }
    }

    #[test]
    fn exponential_matches_power_within_tolerance() {
        for base in [0.5, 1.3, 2.0, 9.99] {
            for step in run(base, 100) {
                let expected = base.powi(step.step as i32);
                let rel = ((step.exponential_result - expected) / expected).abs();
                assert!(rel < 1e-12, "base {base} step {}: {rel}", step.step);
            }
        }
    }

    #[test]
    fn exponential_is_incremental() {
        let base = 1.37;
        let steps = run(base, 50);
        for pair in steps.windows(2) {
            assert_eq!(pair[1].exponential_result, pair[0].exponential_result * base);
        }
    }

    #[test]
    fn operation_labels() {
        let steps = run(2.5, 3);
        assert_eq!(steps[2].linear_operation, "2.5 × 3");
        assert_eq!(steps[2].exponential_operation, "2.5^3");
    }

    #[test]
    fn steps_restart_from_one() {
        let engine = GrowthEngine::new(GrowthParams::new(2.0, 4).unwrap());
        let first: Vec<_> = engine.steps().map(Result::unwrap).collect();
        let second: Vec<_> = engine.steps().map(Result::unwrap).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn steps_are_lazy() {
        let engine = GrowthEngine::new(GrowthParams::new(2.0, 100).unwrap());
        let mut steps = engine.steps();
        let third = steps.nth(2).unwrap().unwrap();
        assert_eq!(third.step, 3);
        assert_eq!(steps.size_hint(), (0, Some(97)));
    }

    #[test]
    fn rejects_non_positive_base() {
        for base in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = GrowthParams::new(base, 5).unwrap_err();
            assert!(matches!(err, EngineError::InvalidBase { .. }));
            assert!(err.is_invalid_input());
        }
    }

    #[test]
    fn rejects_out_of_range_exponent() {
        for exponent in [0, -3, 101, i64::MAX] {
            let err = GrowthParams::new(2.0, exponent).unwrap_err();
            assert_eq!(err, EngineError::InvalidExponent { exponent });
        }
        assert!(GrowthParams::new(2.0, 1).is_ok());
        assert!(GrowthParams::new(2.0, 100).is_ok());
    }

    #[test]
    fn overflow_fails_the_step_and_stops() {
        let engine = GrowthEngine::new(GrowthParams::new(1e10, 100).unwrap());
        let results: Vec<_> = engine.steps().collect();

        // 1e10^30 = 1e300 is finite, 1e10^31 is not.
        assert_eq!(results.len(), 31);
        assert!(results[..30].iter().all(Result::is_ok));
        let err = results[30].clone().unwrap_err();
        assert!(matches!(err, EngineError::Overflow { step: 31, .. }));
        assert!(!err.is_invalid_input());
    }
}

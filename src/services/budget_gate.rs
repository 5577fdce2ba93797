//! Budget gate for paid invocations.
//!
//! Before a tick dispatches anything, the planned units are admitted in order
//! while `spend + admitted_calls * per_call_estimate` stays within the cap.
//! A phase listed in `budget.phase_caps` must also keep its own projected
//! spend within its fraction of the run cap. When not even the first unit
//! fits, the tick dispatches nothing and the run pauses with
//! [`PauseReason::BudgetExceeded`] or [`PauseReason::PhaseBudgetExceeded`].
//! A later tick re-checks, so raising a cap resumes the run.

use crate::domain::errors::ResourceError;
use crate::domain::models::{BudgetConfig, PauseReason, Phase, RunState};

/// Tolerance for comparing dollar amounts.
const EPSILON: f64 = 1e-9;

// ============================================================================
// Admission
// ============================================================================

/// Decision of the gate for one tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// The first `units` planned units fit under the cap.
    Admitted { units: usize, projected: f64 },
    /// Nothing fits; pause with this reason.
    Denied(PauseReason),
}

#[derive(Debug, Clone, Copy)]
struct PhaseCap {
    phase: Phase,
    spend: f64,
    cap: f64,
}

/// Stateless gate over one run's spend in one phase.
#[derive(Debug, Clone, Copy)]
pub struct BudgetGate {
    spend: f64,
    cap: f64,
    per_call_estimate: f64,
    phase_cap: Option<PhaseCap>,
}

impl BudgetGate {
    pub fn new(run: &RunState, config: &BudgetConfig, phase: Phase) -> Self {
        let phase_cap = config.phase_caps.get(&phase).map(|fraction| PhaseCap {
            phase,
            spend: run.phase_spend(phase),
            cap: fraction * run.budget_cap_usd,
        });
        Self {
            spend: run.spend_usd,
            cap: run.budget_cap_usd,
            per_call_estimate: config.per_call_estimate_usd,
            phase_cap,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn estimate(&self, calls: usize) -> f64 {
        calls as f64 * self.per_call_estimate
    }

    /// Projected spend after `calls` more paid invocations.
    pub fn projected(&self, calls: usize) -> f64 {
        self.spend + self.estimate(calls)
    }

    fn within_run_cap(&self, calls: usize) -> bool {
        self.projected(calls) <= self.cap + EPSILON
    }

    fn within_phase_cap(&self, calls: usize) -> bool {
        self.phase_cap
            .is_none_or(|p| p.spend + self.estimate(calls) <= p.cap + EPSILON)
    }

    pub fn fits(&self, calls: usize) -> bool {
        self.within_run_cap(calls) && self.within_phase_cap(calls)
    }

    /// Admit a prefix of units, where `calls_per_unit[i]` is the number of
    /// paid invocations unit `i` will make. Units with zero calls are free.
    pub fn admit(&self, calls_per_unit: &[usize]) -> Admission {
        let mut calls = 0;
        let mut units = 0;
        for &unit_calls in calls_per_unit {
            if !self.fits(calls + unit_calls) {
                break;
            }
            calls += unit_calls;
            units += 1;
        }

        if units == 0 && !calls_per_unit.is_empty() {
            let first = calls_per_unit[0];
            let err = match self.phase_cap {
                Some(p) if self.within_run_cap(first) => ResourceError::PhaseBudgetExceeded {
                    phase: p.phase,
                    spend: p.spend,
                    projected: p.spend + self.estimate(first),
                    cap: p.cap,
                },
                _ => ResourceError::BudgetExceeded {
                    spend: self.spend,
                    projected: self.projected(first),
                    cap: self.cap,
                },
            };
            tracing::debug!(error = %err, "Dispatch denied by budget gate");
            return Admission::Denied(err.into());
        }
        Admission::Admitted {
            units,
            projected: self.projected(calls),
        }
    }
}

// ============================================================================
// Warnings
// ============================================================================

/// Whether spend just crossed the warning threshold and no warning was
/// emitted yet for this run.
pub fn crossed_warning_threshold(run: &RunState, config: &BudgetConfig) -> bool {
    !run.budget_warning_emitted
        && run.budget_cap_usd > 0.0
        && run.spend_usd + EPSILON >= run.budget_cap_usd * config.warning_threshold_pct
}

//! Core orchestration services.
//!
//! Pure planning and checking live in `dependency_graph`, `validator`,
//! `resolution`, `budget_gate`, `scheduler` and `systemic`. The lifecycle
//! drives ticks and hands each planned phase to its executor.

pub mod authoring;
pub mod budget_gate;
pub mod dependency_graph;
pub mod diagnoser;
pub mod dispatcher;
pub mod implementation;
pub mod integrator;
pub mod lifecycle;
pub mod resolution;
pub mod scheduler;
pub mod systemic;
pub mod test_syntax;
pub mod validator;

pub use budget_gate::{Admission, BudgetGate};
pub use dependency_graph::DependencyGraph;
pub use diagnoser::{Diagnoser, FailureVerdict};
pub use dispatcher::{AttemptJob, Dispatcher, UnitResult};
pub use lifecycle::{validation_outcome, Orchestrator, RunSnapshot};
pub use resolution::{resolve, Resolution};
pub use scheduler::{plan, plan_targeted, DispatchUnit, TickPlan};
pub use systemic::{SystemicFailure, SystemicPattern};
pub use validator::{validate, validate_tree, ValidationReport};

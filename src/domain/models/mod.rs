pub mod attempt;
pub mod audit;
pub mod component;
pub mod config;
pub mod contract;
pub mod outcome;
pub mod run;

pub use attempt::{
    AttemptOutcome, ImplementationAttempt, IoTrace, ScoreTuple, ScoredAttempt, TestCaseResult,
    TestRun,
};
pub use audit::{AuditAction, AuditEntry};
pub use component::{
    ComponentId, ComponentNode, ComponentSpec, ComponentStatus, DecompositionTree, TreeDocument,
};
pub use config::{
    BackendConfig, BackendKind, BudgetConfig, CommandBackendConfig, Config, DatabaseConfig,
    DiagnosisConfig, LogFormat, LoggingConfig, RotationPolicy, SchedulingConfig, ShapingConfig,
    TimeoutPolicy, ValidationConfig,
};
pub use contract::{
    ComponentContract, ContractTestSuite, ContractVersion, ErrorCondition, FieldDefinition,
    FunctionSignature, Parameter, TestCase, TypeDefinition,
};
pub use outcome::{BlockReason, FailureReason, TickOutcome};
pub use run::{
    ContextFragment, FailureKind, FailureRecord, FragmentKind, PauseReason, Phase, PhaseStatus,
    RunState, RunStatus, TaskRecord, TaskState,
};

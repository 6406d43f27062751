pub mod audit;
pub mod config;
pub mod domain;
pub mod draft;
pub mod errors;
pub mod normalizer;
pub mod pipeline;
pub mod reliability;
pub mod scoring;
pub mod signature;
pub mod steps;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use domain::execution::{
    ExecutionId, ExecutionState, PipelineState, RunError, RunStatus, StepExecutionState,
    StepStatus,
};
pub use domain::intent::{
    Confidence, Constraint, ConstraintType, Intent, IntentType, Preferences, RawIntent,
    RejectedInterpretation,
};
pub use domain::plan::{Plan, PlanStep, PlanValidationError, RawPlan, RawPlanStep, StepParameter};
pub use draft::draft_intent;
pub use errors::{ApplicationError, DomainError, FaultKind, InterfaceError};
pub use normalizer::{
    ChangeReason, IntentNormalizer, NormalizationChange, NormalizationMode, NormalizationResult,
};
pub use pipeline::run_pipeline;
pub use reliability::{
    classify_status, BreakerConfig, BreakerRegistry, BreakerState, CircuitBreaker,
    RateLimitConfig, RateLimiter, RetryPolicy,
};
pub use scoring::{ComponentScores, ConfidenceScorer, ScoringWeights};
pub use signature::{
    compare_replay_results, create_signature, determinism_probe, replay, signature_digest,
    verify_state_integrity, ReplayComparison, ReplayConfig, ReplayError, ReplayOutcome,
    ReplayStage,
};
pub use steps::{
    is_deadlocked, outstanding_steps, ready_steps, resolve_parameters, validate_run_transition,
    validate_step_transition,
};

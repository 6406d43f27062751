//! Plan execution runtime: tool dispatch, reliability wrapping, and the
//! serial execution engine.

pub mod engine;
pub mod reliability;
pub mod tools;

pub use engine::{ExecutionEngine, ReflectionOutcome, Replanner};
pub use reliability::{CallFailure, CallOutcome, ReliabilityLayer};
pub use tools::{validate_input, Tool, ToolFailure, ToolRegistry};

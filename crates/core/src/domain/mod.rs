pub mod execution;
pub mod intent;
pub mod plan;

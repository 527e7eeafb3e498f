pub mod engine;
pub mod states;

pub use engine::{validate_state, LifecycleDefinition, RetailLifecycle, StateEngine, TransitionError};
pub use states::TransitionOutcome;

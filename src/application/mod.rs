pub mod event_runtime;

pub use event_runtime::{EventRuntime, EventRuntimeBuilder, RuntimePhase};

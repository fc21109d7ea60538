//! Automatic failure recovery: supervisor and circuit breaker.

pub mod breaker;
pub mod supervisor;

pub use breaker::{CircuitBreaker, CircuitState};
pub use supervisor::{AlertFn, RestartFn, Supervisor, SupervisorConfig};

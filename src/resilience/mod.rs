//! Resilience primitives: circuit breakers and retry with backoff.

pub mod circuit_breaker;
pub mod retry;

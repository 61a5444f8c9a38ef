//! Application layer orchestrating the lifecycle services.
//!
//! Each service loads the entities it needs, runs the domain transition and commits every
//! resulting write as one change set. `TrafficEngine` builds all four over a shared backend.

pub mod appeals;
pub mod engine;
pub mod infractions;
pub mod payments;
pub mod tickets;

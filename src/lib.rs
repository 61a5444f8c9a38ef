//! Traffic-offence lifecycle engine.
//!
//! Infractions are recorded and priced, grouped into tickets (procès-verbaux), settled through
//! payments and possibly challenged through appeals. Every state change goes through a closed
//! transition table and every multi-entity write is committed atomically by the store.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
pub mod telemetry;

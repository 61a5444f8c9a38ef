//! Domain layer: entities, their state machines and the persistence ports.

pub mod appeal;
pub mod clock;
pub mod fine;
pub mod ids;
pub mod infraction;
pub mod money;
pub mod payment;
pub mod ports;
pub mod ticket;

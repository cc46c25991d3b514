//! Domain model: entities, pure rules and the ports the core depends on.

pub mod balance;
pub mod currency;
pub mod entry;
pub mod payment;
pub mod planner;
pub mod ports;
pub mod redemption;

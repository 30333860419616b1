pub mod auth;
pub mod events;
pub mod initialize;
pub mod members;
pub mod metrics;

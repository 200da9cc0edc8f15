//! HTTP handlers

pub mod health;
pub mod flows;
pub mod stats;
pub mod engine;
pub mod meters;
pub mod dns;
pub mod ws;

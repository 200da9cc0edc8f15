//! Request / response models

pub mod dns;
pub mod flow;
pub mod meter;

pub use dns::*;
pub use flow::*;
pub use meter::*;

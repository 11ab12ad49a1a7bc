pub mod math;
pub mod error;
pub mod catalog;
pub mod params;
pub mod recipe;
pub mod metrics;
pub mod optim;
pub mod engine;
pub mod cli;

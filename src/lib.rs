pub mod aggregator;
pub mod config;
pub mod persistence;
pub mod standings_core;

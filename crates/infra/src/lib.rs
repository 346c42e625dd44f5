//! Infrastructure layer: stores, job queue, services and configuration.

pub mod alerts;
pub mod app;
pub mod catalog;
pub mod config;
pub mod fulfillment;
pub mod history;
pub mod jobs;
pub mod ledger;
pub mod notify;
pub mod orders;
pub mod store;

pub use app::{Maintenance, Stockroom};
pub use config::{Config, ConfigError};

#[cfg(test)]
mod test_support;

//! ipwarm library crate.
//!
//! IP warmup scheduling, DNS/DNSBL health monitoring, MTA accounting
//! collection and delivery reconciliation for a PowerMTA sending fleet.

pub mod cli;
pub mod collector;
pub mod config;
pub mod database;
pub mod dns;
pub mod error;
pub mod logging;
pub mod reconciliation;
pub mod services;
pub mod utils;
pub mod warmup;

pub use error::{Error, Result};

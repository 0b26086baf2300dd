//! Purchase Gateway - a read-only aggregation gateway for recent purchase data

pub mod aggregate;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod respond;

//! Sales deal workflow: approval, client account provisioning, salesman
//! reporting, peer review and credential issuance, with optimistic
//! concurrency on every deal record.

pub mod config;
pub mod credentials;
pub mod deal;
pub mod engine;
pub mod error;
pub mod guard;
pub mod notify;
pub mod query;
pub mod roles;
pub mod service;
pub mod store;
pub mod utils;
pub mod witness;

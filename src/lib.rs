//! `LineAudit` - Phone-asset verification campaign engine
//!
//! This library provides the components of a corporate phone-number
//! verification workflow: the asset lifecycle state machine, campaign
//! orchestration with bounded-concurrency email fan-out, token-gated
//! confirmation processing, risk detection, and results aggregation.

pub mod campaign;
pub mod cli;
pub mod config;
pub mod confirm;
pub mod directory;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod mail;
pub mod model;
pub mod observability;
pub mod results;
pub mod risk;
pub mod store;

//! # dtnagent
//!
//! A Delay-Tolerant Networking bundle agent implementing Bundle Protocol
//! Version 7 (RFC 9171): bundle storage, a pluggable routing layer, several
//! convergence-layer adapters, and a management HTTP API.

pub mod api;
pub mod appagent;
pub mod bpv7;
pub mod cla;
pub mod config;
pub mod consts;
pub mod janitor;
pub mod peer;
pub mod processor;
pub mod routing;
pub mod service;
pub mod stats;
pub mod store;
pub mod web;

pub use api::DtnNode;
pub use bpv7::{Bundle, EndpointId};
pub use config::NodeConfig;

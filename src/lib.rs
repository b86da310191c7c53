//! Keywarden - Per-Key Request Admission Service
//!
//! This crate implements a per-key request-admission engine: given an API
//! key and a current timestamp, it decides whether to admit, throttle, or
//! reject the request, and escalates repeated quota violations into a
//! temporary blacklist with its own expiry.

pub mod admission;
pub mod clock;
pub mod config;
pub mod error;
pub mod registry;
pub mod store;
pub mod sweep;

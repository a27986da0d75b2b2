//! Windowgate - Sliding-Window Admission Control
//!
//! This crate decides, per request, whether to admit or reject traffic based
//! on how many hits a client produced over a trailing time window. A global
//! tally of every hit is kept alongside the per-client counters, and all
//! windows survive restarts through a pluggable persistence backend.

pub mod config;
pub mod error;
pub mod http;
pub mod persistence;
pub mod ratelimit;

//! HTTP API gateway for the fleet lifecycle engine.
//!
//! Exposes every lifecycle operation over JSON and lets downstream automation
//! read the latest recorded version of any resource by kind and name.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod error;
pub mod routes;

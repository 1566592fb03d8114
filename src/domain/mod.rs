//! Domain layer for the campus event system
//!
//! This module contains the event model, configuration model and the ports
//! the services are written against.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{RuntimeError, RuntimeResult};

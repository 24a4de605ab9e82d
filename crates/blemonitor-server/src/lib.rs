//! # blemonitor-server
//!
//! HTTP daemon for blemonitor.
//!
//! This library provides the API handlers, the transport selection and the
//! state wiring that connects the sensor link to the status monitor.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
pub mod transport;

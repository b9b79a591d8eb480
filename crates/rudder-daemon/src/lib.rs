//! Rudder daemon library
//!
//! This module provides the core components for the rudder daemon:
//! - REST API handlers
//! - Task workers draining the queue
//! - Server lifecycle management

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod api;
pub mod config;
pub mod error;
pub mod server;
pub mod worker;

pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError};
pub use server::Server;
pub use worker::{spawn_workers, TaskOutcome, Worker};

//! # Rudder Control Plane
//!
//! Single facade over release-target resolution, release evaluation and job
//! dispatch, with one unified event stream.
//!
//! ## Overview
//!
//! The [`ControlPlane`] is the entry point for API handlers and queue workers.
//! Work is chained through the task queue:
//!
//! - a resolve task recomputes the release targets of a system and queues an
//!   evaluation for every target it creates
//! - an evaluation runs the policy rules and, when a new release results,
//!   queues dispatch of its job
//! - a dispatch task hands the job to the execution backend for its agent
//!
//! External status reports (GitHub `workflow_run` webhooks) come back through
//! [`ControlPlane::on_external_status_update`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use rudder_control::ControlPlaneBuilder;
//! use rudder_types::SystemId;
//!
//! # async fn example(system_id: SystemId) {
//! let control_plane = ControlPlaneBuilder::new().build();
//! let outcome = control_plane.resolve_release_targets(&system_id).await;
//! println!("{:?}", outcome);
//! # }
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod builder;
pub mod control_plane;
pub mod error;
pub mod events;

pub use builder::{ControlPlaneBuilder, ControlPlaneConfig};
pub use control_plane::{ControlPlane, ExternalUpdateOutcome};
pub use error::{ControlPlaneError, Result};
pub use events::{EventAggregator, EVENT_CHANNEL_CAPACITY};

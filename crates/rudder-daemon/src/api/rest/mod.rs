//! REST API over the control plane

pub mod handlers;
pub mod router;
pub mod state;

//! Shared data model, endpoint monitor, selector, and pathway surface.
//!
//! This crate has no notion of HTTP or wire formats; it is the part of the
//! dispatcher that every other crate in the workspace (executor, bus) is
//! built on top of.

pub mod error;
pub mod events;
pub mod model;
pub mod monitor;
pub mod pathway;
pub mod request;
pub mod selector;

pub use error::DispatchError;
pub use model::{Endpoint, EndpointBuilder, Model};
pub use monitor::{spawn_snapshot_task, CallId, Monitor, MonitorConfig, DEFAULT_SNAPSHOT_INTERVAL};
pub use pathway::Pathway;
pub use request::CortexRequest;
pub use selector::{EndpointSelector, SelectionOutcome, SelectorConfig};

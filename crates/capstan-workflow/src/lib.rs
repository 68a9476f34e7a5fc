//! Capstan Workflow Engine
//!
//! This crate provides the workflow machinery the task provisioner schedules:
//! named, ordered sequences of idempotent steps, executed by persisted tasks
//! against a per-provisioning config snapshot.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                WorkflowRegistry                       │
//! │   AWSPreProvision | AWSMaster | DigitalOceanNode | …  │
//! └──────────────────────────┬───────────────────────────┘
//!                            │ step lists
//!                            ▼
//! ┌──────────────────────────────────────────────────────┐
//! │                       Task                            │
//! │   run steps in order, persist every transition,       │
//! │   roll back on failure                                │
//! └──────────────────────────┬───────────────────────────┘
//!                            │ events
//!                            ▼
//! ┌──────────────────────────────────────────────────────┐
//! │                  Config event bus                     │
//! │   nodes | kube states | config snapshots              │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod registry;
pub mod step;
pub mod steps;
pub mod storage;
pub mod sync;
pub mod task;

pub use config::*;
pub use error::*;
pub use registry::*;
pub use step::*;
pub use storage::*;
pub use sync::*;
pub use task::*;

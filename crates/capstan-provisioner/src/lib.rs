//! Capstan Task Provisioner
//!
//! The scheduler that drives cluster lifecycle: it plans tasks for every
//! role, bootstraps cryptographic material, persists the initial cluster
//! record, launches the per-node workflows concurrently with quorum gating,
//! reduces progress events into the persisted record, and cancels whole
//! provisionings by cluster identity.
//!
//! ```text
//!  ProvisionCluster ──► plan ──► bootstrap ──► persist ──► drive
//!                                                            │
//!              ┌──────────────┬──────────────┬───────────────┤
//!              ▼              ▼              ▼               ▼
//!        pre-provision   master tasks   worker tasks   cluster task
//!              │              │              │               │
//!              └─────────── events (nodes, states, configs) ─┘
//!                                     │
//!                                     ▼
//!                              state reducer ──► KubeService
//! ```

pub mod bootstrap;
pub mod error;
pub mod monitor;
pub mod provisioner;
pub mod rate_limiter;
pub mod service;
pub mod util;
pub mod writer;

pub use bootstrap::*;
pub use error::*;
pub use monitor::*;
pub use provisioner::*;
pub use rate_limiter::*;
pub use service::*;
pub use util::*;
pub use writer::*;

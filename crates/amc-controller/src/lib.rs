//! OpenAMC Controller - Admission, Synthesis and Reconciliation
//!
//! The control plane for multi-tenant messaging namespaces. Watches
//! declarative inputs, decides which addresses are admitted under each
//! space's capacity plan, synthesizes the broker/router infrastructure
//! serving the admitted set, and converges the cluster toward it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          CONTROLLER                                 │
//! │                                                                     │
//! │  watch events ──▶ ┌────────────┐      per-key serialized queue      │
//! │                   │ Dispatcher │──────────────┐                     │
//! │                   └────────────┘              ▼                     │
//! │  ┌─────────────┐  ┌───────────┐  ┌──────────────────────────────┐  │
//! │  │ PlanCatalog │  │ Admission │  │        Reconcile worker       │  │
//! │  │  (snapshot) │◀─│ Allocator │◀─│  admit → synthesize → diff   │  │
//! │  └─────────────┘  └───────────┘  │        → apply → status      │  │
//! │  ┌─────────────┐  ┌───────────┐  └──────────────┬───────────────┘  │
//! │  │  Capacity   │  │   Infra   │                 │                  │
//! │  │  Projector  │─▶│Synthesizer│─────────────────┘                  │
//! │  └─────────────┘  └───────────┘        cluster apply/delete        │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![allow(dead_code)]

pub mod admission;
pub mod capacity;
pub mod catalog;
pub mod cluster;
pub mod controller;
pub mod dispatch;
pub mod endpoints;
pub mod reconcile;
pub mod synthesis;
pub mod template;

pub use admission::{evaluate, AllocationResult, RejectReason, Verdict};
pub use catalog::{PlanCatalog, Snapshot};
pub use cluster::{ClusterClient, ClusterError, MemoryCluster, Secret, SecretClient};
pub use controller::{Controller, ControllerConfig, WatchEvent};
pub use dispatch::WorkQueue;
pub use endpoints::{EndpointDiscovery, LoadBalancerDiscovery, RouteDiscovery};
pub use reconcile::{BackoffPolicy, ReconcileOutcome, Reconciler};
pub use synthesis::{SynthesisError, SynthesisOutcome, Synthesizer};
pub use template::{HandlebarsRenderer, RenderError, TemplateRenderer};

//! Cycle-accurate resource allocation for transport-triggered schedules.
//!
//! The scheduler core answers one question: can this move be placed in this
//! cycle, and onto which machine parts? Every category of datapath hardware
//! is modeled as a time-indexed [scheduling resource](resources) owned by a
//! [broker](brokers); a placement request walks the broker sequence through
//! an [AssignmentPlan], trying candidate resources in least-used-first order
//! and backtracking chronologically when a later broker runs dry. The
//! [ResourceManager] facade wires the brokers up for a target machine and
//! drives the search loop on behalf of the top-level scheduler.
pub mod brokers;
pub mod manager;
pub mod pending;
pub mod plan;
pub mod resources;

pub use manager::ResourceManager;
pub use plan::AssignmentPlan;
pub use resources::{ResourceIdx, ResourcePool};

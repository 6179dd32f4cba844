//! Resource brokers.
//!
//! Each broker owns one category of scheduling resource, recognizes the
//! moves that need it by structural shape, answers "which of my resources
//! could this move use in this cycle", and performs the actual commit: it
//! marks the resource in use and binds the corresponding machine part onto
//! the move's terminals. Brokers keep their own node-to-resource
//! bookkeeping so an assignment can be undone exactly.
mod bus;
mod execution;
mod immediate;
mod socket;

use linked_hash_map::LinkedHashMap;
use tta_ir::{BusIdx, Cycle, FuIdx, Machine, NodeIdx, ProgramGraph, SegmentIdx, SocketIdx};
use tta_utils::{Error, TtaResult};

use crate::resources::{ResourceIdx, ResourcePool};

pub use bus::BusBroker;
pub use execution::{InputFuBroker, OutputFuBroker};
pub use immediate::ImmediateBroker;
pub use socket::SocketBroker;

/// Machine-part to resource bindings collected while brokers build their
/// resources, used afterwards to wire cross-broker links.
#[derive(Debug, Clone, Default)]
pub struct ResourceMap {
    sockets: LinkedHashMap<SocketIdx, ResourceIdx>,
    segments: LinkedHashMap<SegmentIdx, ResourceIdx>,
    fu_pipelines: LinkedHashMap<FuIdx, ResourceIdx>,
    immediate_slots: LinkedHashMap<BusIdx, ResourceIdx>,
}

impl ResourceMap {
    pub fn bind_socket(&mut self, socket: SocketIdx, res: ResourceIdx) {
        let _ = self.sockets.insert(socket, res);
    }

    pub fn bind_segment(&mut self, segment: SegmentIdx, res: ResourceIdx) {
        let _ = self.segments.insert(segment, res);
    }

    pub fn bind_fu_pipeline(&mut self, fu: FuIdx, res: ResourceIdx) {
        let _ = self.fu_pipelines.insert(fu, res);
    }

    pub fn bind_immediate_slot(&mut self, bus: BusIdx, res: ResourceIdx) {
        let _ = self.immediate_slots.insert(bus, res);
    }

    pub fn socket_resource(&self, socket: SocketIdx) -> TtaResult<ResourceIdx> {
        self.sockets.get(&socket).copied().ok_or_else(|| {
            Error::not_found("no resource registered for socket")
        })
    }

    pub fn segment_resource(
        &self,
        segment: SegmentIdx,
    ) -> TtaResult<ResourceIdx> {
        self.segments.get(&segment).copied().ok_or_else(|| {
            Error::not_found("no resource registered for segment")
        })
    }

    pub fn fu_pipeline_resource(&self, fu: FuIdx) -> TtaResult<ResourceIdx> {
        self.fu_pipelines.get(&fu).copied().ok_or_else(|| {
            Error::not_found("no resource registered for function unit")
        })
    }

    pub fn sockets(
        &self,
    ) -> impl Iterator<Item = (SocketIdx, ResourceIdx)> + '_ {
        self.sockets.iter().map(|(&s, &r)| (s, r))
    }
}

/// A candidate set of resources for one (move, cycle) request, sorted
/// least-used-first with the resource name as tie-breaker so the search
/// explores balanced resource usage in a deterministic order.
#[derive(Debug, Clone, Default)]
pub struct ResourceSet {
    resources: Vec<ResourceIdx>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, res: ResourceIdx) {
        self.resources.push(res);
    }

    pub fn count(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn resource(&self, index: usize) -> TtaResult<ResourceIdx> {
        self.resources.get(index).copied().ok_or_else(|| {
            Error::out_of_range(format!(
                "candidate index {} out of {}",
                index,
                self.resources.len()
            ))
        })
    }

    pub fn sort(&mut self, pool: &ResourcePool) {
        self.resources.sort_by_key(|&r| {
            (pool.get(r).use_count(), pool.get(r).name())
        });
    }
}

/// One resource category's availability and assignment service.
///
/// The assign/unassign pair must alternate strictly per node; brokers keep
/// a bookkeeping map and cross-check it against the resource state so a
/// stale assignment is caught instead of silently rebooked.
pub trait ResourceBroker {
    fn name(&self) -> &'static str;

    /// True when the node needs a resource of the managed type.
    fn is_applicable(
        &self,
        prog: &ProgramGraph,
        machine: &Machine,
        node: NodeIdx,
    ) -> bool;

    /// All resources managed by this broker that could be assigned to the
    /// node in the cycle.
    fn all_available_resources(
        &self,
        pool: &ResourcePool,
        prog: &ProgramGraph,
        machine: &Machine,
        cycle: Cycle,
        node: NodeIdx,
    ) -> TtaResult<ResourceSet>;

    /// Mark the resource in use for the node and bind the corresponding
    /// machine part onto the node's move.
    fn assign(
        &mut self,
        pool: &mut ResourcePool,
        prog: &mut ProgramGraph,
        machine: &Machine,
        cycle: Cycle,
        node: NodeIdx,
        res: ResourceIdx,
    ) -> TtaResult<()>;

    /// Free the resource assigned to the node and undo the binding. Does
    /// nothing when the node holds no resource of the managed type.
    fn unassign(
        &mut self,
        pool: &mut ResourcePool,
        prog: &mut ProgramGraph,
        machine: &Machine,
        node: NodeIdx,
    ) -> TtaResult<()>;

    /// True when the node is recorded as assigned by this broker and the
    /// resource state agrees.
    fn is_already_assigned(
        &self,
        pool: &ResourcePool,
        prog: &ProgramGraph,
        machine: &Machine,
        cycle: Cycle,
        node: NodeIdx,
    ) -> bool;

    /// Build the resource objects modeling the broker's category for the
    /// target machine. Cannot wire cross-resource links yet.
    fn build_resources(
        &mut self,
        machine: &Machine,
        pool: &mut ResourcePool,
        map: &mut ResourceMap,
    ) -> TtaResult<()>;

    /// Complete initialization by wiring related-resource links, looking
    /// up other brokers' resources through the map.
    fn setup_resource_links(
        &mut self,
        machine: &Machine,
        pool: &mut ResourcePool,
        map: &ResourceMap,
    ) -> TtaResult<()>;
}

//! Bus broker.
//!
//! Every real move needs exactly one bus segment to ride on. A candidate
//! segment must be free in the cycle, reachable from the sockets the
//! earlier brokers chose for both ends of the move, and — for constant
//! sources without a long-immediate slot — on a bus whose inline immediate
//! field is wide enough for the value.
use linked_hash_map::LinkedHashMap;
use log::trace;
use tta_ir::{
    BusIdx, Cycle, Machine, NodeIdx, ProgramGraph, SegmentIdx,
    SocketDirection, SocketIdx, Terminal, bits_needed,
};
use tta_utils::{Error, TtaResult};

use super::{ResourceBroker, ResourceMap, ResourceSet};
use crate::resources::{
    ResourceIdx, ResourceKind, ResourcePool, SegmentUse,
};

/// Broker for the bus segments.
#[derive(Debug, Default)]
pub struct BusBroker {
    resource_of: LinkedHashMap<SegmentIdx, ResourceIdx>,
    socket_resources: LinkedHashMap<SocketIdx, ResourceIdx>,
    /// `(segment resource, bus bound before this broker ran)` per node.
    assigned: LinkedHashMap<NodeIdx, (ResourceIdx, Option<BusIdx>)>,
}

impl BusBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn segment_of_resource(&self, res: ResourceIdx) -> Option<SegmentIdx> {
        self.resource_of
            .iter()
            .find(|&(_, &r)| r == res)
            .map(|(&s, _)| s)
    }

    /// The socket resource one end of the move connects through, `None`
    /// when that end needs no socket (immediates) or is not bound yet.
    fn socket_resource_of_end(
        &self,
        machine: &Machine,
        terminal: &Terminal,
        end: SocketDirection,
    ) -> Option<ResourceIdx> {
        let port = terminal.port()?;
        let socket = match end {
            SocketDirection::Input => machine.port(port).input_socket,
            SocketDirection::Output => machine.port(port).output_socket,
        }?;
        self.socket_resources.get(&socket).copied()
    }
}

impl ResourceBroker for BusBroker {
    fn name(&self) -> &'static str {
        "bus broker"
    }

    fn is_applicable(
        &self,
        prog: &ProgramGraph,
        _machine: &Machine,
        node: NodeIdx,
    ) -> bool {
        prog.node(node).is_move()
    }

    fn all_available_resources(
        &self,
        pool: &ResourcePool,
        prog: &ProgramGraph,
        machine: &Machine,
        cycle: Cycle,
        node: NodeIdx,
    ) -> TtaResult<ResourceSet> {
        if !self.is_applicable(prog, machine, node) {
            return Err(Error::internal(
                "broker not capable of assigning resources to node",
            ));
        }
        let mv = prog.node(node).mv()?;
        let src_socket = self.socket_resource_of_end(
            machine,
            &mv.source,
            SocketDirection::Output,
        );
        let dst_socket = self.socket_resource_of_end(
            machine,
            &mv.destination,
            SocketDirection::Input,
        );

        let mut set = ResourceSet::new();
        for (&segment, &res) in self.resource_of.iter() {
            let bus = machine.segment(segment).bus;
            // an immediate slot may have pre-bound the bus
            if let Some(bound) = mv.bus
                && bound != bus
            {
                continue;
            }
            match &mv.source {
                Terminal::Immediate(value) => {
                    // without a slot the constant rides the bus inline
                    if mv.bus.is_none()
                        && machine.bus(bus).short_imm_width
                            < bits_needed(*value)
                    {
                        continue;
                    }
                }
                _ => {
                    let Some(sock) = src_socket else {
                        continue;
                    };
                    if !pool.can_assign_segment(res, cycle, sock) {
                        continue;
                    }
                }
            }
            {
                let Some(sock) = dst_socket else {
                    continue;
                };
                if !pool.can_assign_segment(res, cycle, sock) {
                    continue;
                }
            }
            set.insert(res);
        }
        Ok(set)
    }

    fn assign(
        &mut self,
        pool: &mut ResourcePool,
        prog: &mut ProgramGraph,
        machine: &Machine,
        cycle: Cycle,
        node: NodeIdx,
        res: ResourceIdx,
    ) -> TtaResult<()> {
        let segment = self.segment_of_resource(res).ok_or_else(|| {
            Error::invalid_data("broker does not contain given resource")
        })?;
        pool.assign(res, cycle)?;
        let mv = prog.node_mut(node).mv_mut()?;
        let previous = mv.bus;
        mv.bus = Some(machine.segment(segment).bus);
        trace!(
            "{}: segment {} -> node {:?} in cycle {}",
            self.name(),
            pool.get(res).name(),
            node,
            cycle
        );
        let _ = self.assigned.insert(node, (res, previous));
        Ok(())
    }

    fn unassign(
        &mut self,
        pool: &mut ResourcePool,
        prog: &mut ProgramGraph,
        _machine: &Machine,
        node: NodeIdx,
    ) -> TtaResult<()> {
        let Some((res, previous)) = self.assigned.remove(&node) else {
            return Ok(());
        };
        pool.unassign(res, prog.node(node).cycle()?)?;
        prog.node_mut(node).mv_mut()?.bus = previous;
        Ok(())
    }

    fn is_already_assigned(
        &self,
        pool: &ResourcePool,
        _prog: &ProgramGraph,
        _machine: &Machine,
        cycle: Cycle,
        node: NodeIdx,
    ) -> bool {
        match self.assigned.get(&node) {
            Some(&(res, _)) => pool.get(res).is_in_use(cycle),
            None => false,
        }
    }

    fn build_resources(
        &mut self,
        machine: &Machine,
        pool: &mut ResourcePool,
        map: &mut ResourceMap,
    ) -> TtaResult<()> {
        for (idx, segment) in machine.segments() {
            let res = pool
                .add(segment.name, ResourceKind::Segment(SegmentUse::default()));
            let _ = self.resource_of.insert(idx, res);
            map.bind_segment(idx, res);
        }
        Ok(())
    }

    fn setup_resource_links(
        &mut self,
        machine: &Machine,
        pool: &mut ResourcePool,
        map: &ResourceMap,
    ) -> TtaResult<()> {
        // sockets attached to a segment form its related group; sibling
        // segments of the same bus its dependent group
        for (socket, sock_res) in map.sockets() {
            for &segment in &machine.socket(socket).segments {
                let seg_res = map.segment_resource(segment)?;
                pool.get_mut(seg_res).add_to_related_group(0, sock_res);
            }
            let _ = self.socket_resources.insert(socket, sock_res);
        }
        for (&segment, &res) in self.resource_of.iter() {
            let bus = machine.segment(segment).bus;
            for &sibling in &machine.bus(bus).segments {
                if sibling != segment {
                    let sib_res = map.segment_resource(sibling)?;
                    pool.get_mut(res).add_to_dependent_group(0, sib_res);
                }
            }
        }
        Ok(())
    }
}

//! Immediate broker.
//!
//! Constants too wide for every bus's inline immediate field need a
//! long-immediate slot: a per-bus instruction field modeled as its own
//! per-cycle resource. Assigning a slot pre-binds the move to the slot's
//! bus, which the bus broker then honors when it picks a segment.
use linked_hash_map::LinkedHashMap;
use log::trace;
use tta_ir::{
    BusIdx, Cycle, Machine, NodeIdx, ProgramGraph, Terminal, bits_needed,
};
use tta_utils::{Error, TtaResult};

use super::{ResourceBroker, ResourceMap, ResourceSet};
use crate::resources::{ResourceIdx, ResourceKind, ResourcePool, SlotUse};

/// Broker for the long-immediate slots.
#[derive(Debug, Default)]
pub struct ImmediateBroker {
    resource_of: LinkedHashMap<BusIdx, ResourceIdx>,
    assigned: LinkedHashMap<NodeIdx, ResourceIdx>,
}

impl ImmediateBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn bus_of_resource(&self, res: ResourceIdx) -> Option<BusIdx> {
        self.resource_of
            .iter()
            .find(|&(_, &r)| r == res)
            .map(|(&b, _)| b)
    }
}

impl ResourceBroker for ImmediateBroker {
    fn name(&self) -> &'static str {
        "immediate broker"
    }

    /// Applicable when the source is a constant no bus can carry inline.
    fn is_applicable(
        &self,
        prog: &ProgramGraph,
        machine: &Machine,
        node: NodeIdx,
    ) -> bool {
        let Ok(mv) = prog.node(node).mv() else {
            return false;
        };
        match mv.source {
            Terminal::Immediate(value) => machine
                .buses()
                .all(|(_, bus)| bus.short_imm_width < bits_needed(value)),
            _ => false,
        }
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
        let Terminal::Immediate(value) = mv.source else {
            return Err(Error::internal(
                "immediate broker asked about a non-constant source",
            ));
        };
        let needed = bits_needed(value);
        let mut set = ResourceSet::new();
        for (_, &res) in self.resource_of.iter() {
            let resource = pool.get(res);
            let ResourceKind::ImmediateSlot(slot) = resource.kind() else {
                continue;
            };
            if slot.width >= needed && resource.is_available(cycle) {
                set.insert(res);
            }
        }
        Ok(set)
    }

    fn assign(
        &mut self,
        pool: &mut ResourcePool,
        prog: &mut ProgramGraph,
        _machine: &Machine,
        cycle: Cycle,
        node: NodeIdx,
        res: ResourceIdx,
    ) -> TtaResult<()> {
        let bus = self.bus_of_resource(res).ok_or_else(|| {
            Error::invalid_data("broker does not contain given resource")
        })?;
        pool.assign(res, cycle)?;
        trace!(
            "{}: slot {} -> node {:?} in cycle {}",
            self.name(),
            pool.get(res).name(),
            node,
            cycle
        );
        prog.node_mut(node).mv_mut()?.bus = Some(bus);
        let _ = self.assigned.insert(node, res);
        Ok(())
    }

    fn unassign(
        &mut self,
        pool: &mut ResourcePool,
        prog: &mut ProgramGraph,
        _machine: &Machine,
        node: NodeIdx,
    ) -> TtaResult<()> {
        let Some(res) = self.assigned.remove(&node) else {
            return Ok(());
        };
        pool.unassign(res, prog.node(node).cycle()?)?;
        prog.node_mut(node).mv_mut()?.bus = None;
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
            Some(&res) => pool.get(res).is_in_use(cycle),
            None => false,
        }
    }

    fn build_resources(
        &mut self,
        machine: &Machine,
        pool: &mut ResourcePool,
        map: &mut ResourceMap,
    ) -> TtaResult<()> {
        for (idx, bus) in machine.buses() {
            let res = pool.add(
                bus.name,
                ResourceKind::ImmediateSlot(SlotUse::new(idx, bus.width)),
            );
            let _ = self.resource_of.insert(idx, res);
            map.bind_immediate_slot(idx, res);
        }
        Ok(())
    }

    fn setup_resource_links(
        &mut self,
        machine: &Machine,
        pool: &mut ResourcePool,
        map: &ResourceMap,
    ) -> TtaResult<()> {
        for (&bus, &res) in self.resource_of.iter() {
            for &segment in &machine.bus(bus).segments {
                let seg_res = map.segment_resource(segment)?;
                pool.get_mut(res).add_to_related_group(0, seg_res);
            }
        }
        Ok(())
    }
}

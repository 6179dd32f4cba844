//! Function-unit brokers.
//!
//! [InputFuBroker] serves the operand-writing end of operation moves
//! (including the trigger), [OutputFuBroker] the result-reading end; a
//! bypass move passes through both. The pipeline resource itself is shared:
//! the input broker builds one [ExecutionPipeline] per function unit and
//! seeds it with the unit's operation templates, the output broker finds
//! the same resources through the resource map.
use linked_hash_map::LinkedHashMap;
use log::trace;
use tta_ir::{
    Cycle, FuIdx, Machine, NodeIdx, PortOwner, ProgramGraph, Terminal,
};
use tta_utils::{Error, TtaResult};

use super::{ResourceBroker, ResourceMap, ResourceSet};
use crate::resources::{
    ExecutionPipeline, ResourceIdx, ResourceKind, ResourcePool,
};

/// The function unit an operation move is bound to on the given end.
fn fu_of_terminal(
    machine: &Machine,
    terminal: &Terminal,
) -> Option<FuIdx> {
    match terminal {
        Terminal::FuPort { port, .. } => {
            match machine.port(*port).unit {
                PortOwner::Fu(fu) => Some(fu),
                PortOwner::Rf(_) => None,
            }
        }
        _ => None,
    }
}

/// Broker for the operand-write side of the execution pipelines.
#[derive(Debug, Default)]
pub struct InputFuBroker {
    resource_of: LinkedHashMap<FuIdx, ResourceIdx>,
    assigned: LinkedHashMap<NodeIdx, ResourceIdx>,
}

impl InputFuBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResourceBroker for InputFuBroker {
    fn name(&self) -> &'static str {
        "input fu broker"
    }

    fn is_applicable(
        &self,
        prog: &ProgramGraph,
        _machine: &Machine,
        node: NodeIdx,
    ) -> bool {
        prog.node(node).is_destination_operation()
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
        let fu = fu_of_terminal(machine, &mv.destination).ok_or_else(
            || {
                Error::invalid_data(
                    "operation move writes a port that is not on a \
                     function unit",
                )
            },
        )?;
        let res = self.resource_of.get(&fu).copied().ok_or_else(|| {
            Error::not_found("function unit has no pipeline resource")
        })?;
        let triggers = mv.destination.is_triggering(machine);
        let mut set = ResourceSet::new();
        if pool
            .pipeline(res)?
            .can_assign(cycle, node, false, triggers, prog, machine)?
        {
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
        trace!("{}: node {:?} in cycle {}", self.name(), node, cycle);
        pool.pipeline_mut(res)?
            .assign(cycle, node, false, prog, machine)?;
        pool.get_mut(res).bump_use_count(1);
        let _ = self.assigned.insert(node, res);
        Ok(())
    }

    fn unassign(
        &mut self,
        pool: &mut ResourcePool,
        prog: &mut ProgramGraph,
        machine: &Machine,
        node: NodeIdx,
    ) -> TtaResult<()> {
        let Some(res) = self.assigned.remove(&node) else {
            return Ok(());
        };
        let cycle = prog.node(node).cycle()?;
        pool.pipeline_mut(res)?
            .unassign(cycle, node, false, prog, machine)?;
        pool.get_mut(res).bump_use_count(-1);
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
        for (fu_idx, fu) in machine.function_units() {
            let mut pipeline = ExecutionPipeline::new(
                fu_idx,
                fu.pipeline_resource_count,
                fu.maximal_latency(),
            );
            for op in &fu.operations {
                pipeline.add_operation(op.name);
                for &(offset, line) in &op.resource_use {
                    pipeline.set_resource_use(op.name, offset, line)?;
                }
            }
            let res = pool.add(fu.name, ResourceKind::Pipeline(pipeline));
            let _ = self.resource_of.insert(fu_idx, res);
            map.bind_fu_pipeline(fu_idx, res);
        }
        Ok(())
    }

    fn setup_resource_links(
        &mut self,
        machine: &Machine,
        pool: &mut ResourcePool,
        map: &ResourceMap,
    ) -> TtaResult<()> {
        for (&fu, &res) in self.resource_of.iter() {
            for &port in &machine.function_unit(fu).ports {
                if let Some(socket) = machine.port(port).input_socket {
                    let sock_res = map.socket_resource(socket)?;
                    pool.get_mut(res).add_to_related_group(0, sock_res);
                }
            }
        }
        Ok(())
    }
}

/// Broker for the result-read side of the execution pipelines.
#[derive(Debug, Default)]
pub struct OutputFuBroker {
    resource_of: LinkedHashMap<FuIdx, ResourceIdx>,
    assigned: LinkedHashMap<NodeIdx, ResourceIdx>,
}

impl OutputFuBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResourceBroker for OutputFuBroker {
    fn name(&self) -> &'static str {
        "output fu broker"
    }

    fn is_applicable(
        &self,
        prog: &ProgramGraph,
        _machine: &Machine,
        node: NodeIdx,
    ) -> bool {
        prog.node(node).is_source_operation()
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
        let fu = fu_of_terminal(machine, &mv.source).ok_or_else(|| {
            Error::invalid_data(
                "operation move reads a port that is not on a function unit",
            )
        })?;
        let res = self.resource_of.get(&fu).copied().ok_or_else(|| {
            Error::not_found("function unit has no pipeline resource")
        })?;
        let mut set = ResourceSet::new();
        if pool
            .pipeline(res)?
            .can_assign(cycle, node, true, false, prog, machine)?
        {
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
        trace!("{}: node {:?} in cycle {}", self.name(), node, cycle);
        pool.pipeline_mut(res)?
            .assign(cycle, node, true, prog, machine)?;
        pool.get_mut(res).bump_use_count(1);
        let _ = self.assigned.insert(node, res);
        Ok(())
    }

    fn unassign(
        &mut self,
        pool: &mut ResourcePool,
        prog: &mut ProgramGraph,
        machine: &Machine,
        node: NodeIdx,
    ) -> TtaResult<()> {
        let Some(res) = self.assigned.remove(&node) else {
            return Ok(());
        };
        let cycle = prog.node(node).cycle()?;
        pool.pipeline_mut(res)?
            .unassign(cycle, node, true, prog, machine)?;
        pool.get_mut(res).bump_use_count(-1);
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
        _machine: &Machine,
        _pool: &mut ResourcePool,
        _map: &mut ResourceMap,
    ) -> TtaResult<()> {
        // pipelines are built by the input broker and shared
        Ok(())
    }

    fn setup_resource_links(
        &mut self,
        machine: &Machine,
        _pool: &mut ResourcePool,
        map: &ResourceMap,
    ) -> TtaResult<()> {
        for (fu, _) in machine.function_units() {
            let res = map.fu_pipeline_resource(fu)?;
            let _ = self.resource_of.insert(fu, res);
        }
        Ok(())
    }
}

//! The resource manager facade the top-level scheduler drives.
//!
//! Wires up the broker sequence for a target machine, owns the resource
//! pool, and runs the chronological-backtracking loop over the
//! [AssignmentPlan] for each placement request. One placement attempt is a
//! single logical transaction: it either commits every broker's assignment
//! or restores the state it started from.
use log::debug;
use tta_ir::{Cycle, Machine, NodeIdx, ProgramGraph};
use tta_utils::TtaResult;

use crate::brokers::{
    BusBroker, ImmediateBroker, InputFuBroker, OutputFuBroker, ResourceMap,
    SocketBroker,
};
use crate::plan::AssignmentPlan;
use crate::resources::ResourcePool;

/// Resource assignment service for one scheduling scope.
pub struct ResourceManager<'m> {
    machine: &'m Machine,
    pool: ResourcePool,
    plan: AssignmentPlan,
}

impl<'m> ResourceManager<'m> {
    /// Build brokers and resources for the target machine, wire the
    /// related-resource links and validate them.
    ///
    /// The broker order fixes the search priority: execution pipelines
    /// first (they constrain the most), then sockets, then immediate
    /// slots, buses last.
    pub fn for_machine(machine: &'m Machine) -> TtaResult<Self> {
        let mut pool = ResourcePool::new();
        let mut map = ResourceMap::default();
        let mut brokers: Vec<Box<dyn crate::brokers::ResourceBroker>> = vec![
            Box::new(InputFuBroker::new()),
            Box::new(OutputFuBroker::new()),
            Box::new(SocketBroker::input()),
            Box::new(SocketBroker::output()),
            Box::new(ImmediateBroker::new()),
            Box::new(BusBroker::new()),
        ];
        for broker in brokers.iter_mut() {
            broker.build_resources(machine, &mut pool, &mut map)?;
        }
        for broker in brokers.iter_mut() {
            broker.setup_resource_links(machine, &mut pool, &map)?;
        }
        pool.validate()?;

        let mut plan = AssignmentPlan::new();
        for broker in brokers {
            plan.insert_broker(broker);
        }
        Ok(Self {
            machine,
            pool,
            plan,
        })
    }

    pub fn machine(&self) -> &Machine {
        self.machine
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    pub fn plan(&self) -> &AssignmentPlan {
        &self.plan
    }

    /// Try to place the node in the cycle and bind all resources it
    /// needs.
    ///
    /// `Ok(true)` means the node is placed and fully assigned. `Ok(false)`
    /// means the search space for this cycle is exhausted; every tentative
    /// assignment has been undone and the node is unplaced again. `Err`
    /// means an invariant was violated and the scheduling run must stop.
    pub fn assign(
        &mut self,
        cycle: Cycle,
        node: NodeIdx,
        prog: &mut ProgramGraph,
    ) -> TtaResult<bool> {
        self.plan.set_request(cycle, node, prog, self.machine)?;
        loop {
            if self.plan.is_tested_assignment_possible(
                &self.pool,
                prog,
                self.machine,
            )? {
                self.plan.try_next_assignment(
                    &mut self.pool,
                    prog,
                    self.machine,
                )?;
                if self.plan.at_last_broker() {
                    debug!("node {node:?} assigned in cycle {cycle}");
                    return Ok(true);
                }
                self.plan.advance()?;
            } else if self.plan.at_first_broker() {
                // the first broker ran dry: placement at this cycle is
                // infeasible
                self.plan.reset_assignments(
                    &mut self.pool,
                    prog,
                    self.machine,
                )?;
                debug!("node {node:?} infeasible in cycle {cycle}");
                return Ok(false);
            } else {
                self.plan.backtrack(&mut self.pool, prog, self.machine)?;
            }
        }
    }

    /// Non-destructive feasibility probe: run the same search as
    /// [assign](Self::assign), then undo everything.
    pub fn can_assign(
        &mut self,
        cycle: Cycle,
        node: NodeIdx,
        prog: &mut ProgramGraph,
    ) -> TtaResult<bool> {
        let placed = self.assign(cycle, node, prog)?;
        if placed {
            self.unassign(node, prog)?;
        }
        Ok(placed)
    }

    /// Undo every resource binding of the node and unplace it.
    pub fn unassign(
        &mut self,
        node: NodeIdx,
        prog: &mut ProgramGraph,
    ) -> TtaResult<()> {
        self.plan.reset_assignments_for(
            node,
            &mut self.pool,
            prog,
            self.machine,
        )
    }

    /// The highest cycle any node is placed in, for driver bookkeeping.
    pub fn largest_cycle(&self, prog: &ProgramGraph) -> Option<Cycle> {
        prog.nodes()
            .filter_map(|(_, n)| {
                if n.is_placed() { n.cycle().ok() } else { None }
            })
            .max()
    }
}

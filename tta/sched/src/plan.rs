//! The broker pipeline of one move-placement request.
//!
//! An [AssignmentPlan] holds the brokers in their configured priority
//! order. For each request it filters the sequence down to the applicable
//! brokers, then lets the driver walk a cursor forward (committing one
//! candidate per broker) and backward (undoing and retrying) — a
//! depth-first search with chronological backtracking. The plan never
//! decides when to advance or backtrack; it only enforces that the walk
//! follows the assign/unassign pairing contract.
use log::debug;
use tta_ir::{Cycle, Machine, NodeIdx, ProgramGraph};
use tta_utils::{Error, TtaResult};

use crate::brokers::ResourceBroker;
use crate::pending::PendingAssignment;
use crate::resources::ResourcePool;

/// The ordered broker sequence and the state of the current request.
#[derive(Default)]
pub struct AssignmentPlan {
    brokers: Vec<Box<dyn ResourceBroker>>,
    assignments: Vec<PendingAssignment>,
    /// Indices into `brokers` applicable to the current request.
    applicable: Vec<usize>,
    /// Cursor into `applicable`.
    current: usize,
    node: Option<NodeIdx>,
    cycle: Cycle,
    resource_found: bool,
}

impl AssignmentPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a broker to the evaluation sequence.
    pub fn insert_broker(&mut self, broker: Box<dyn ResourceBroker>) {
        self.brokers.push(broker);
        self.assignments.push(PendingAssignment::new());
    }

    pub fn broker_count(&self) -> usize {
        self.brokers.len()
    }

    pub fn broker(&self, index: usize) -> TtaResult<&dyn ResourceBroker> {
        self.brokers
            .get(index)
            .map(|b| b.as_ref())
            .ok_or_else(|| Error::out_of_range("broker index out of range"))
    }

    fn node(&self) -> TtaResult<NodeIdx> {
        self.node
            .ok_or_else(|| Error::internal("assignment plan has no request"))
    }

    fn applicable_or_err(&self) -> TtaResult<()> {
        if self.applicable.is_empty() {
            return Err(Error::internal(
                "no applicable brokers found for assignment",
            ));
        }
        Ok(())
    }

    /// Record the node to which resources have to be assigned and the
    /// cycle it should be placed in; tentatively places the node.
    pub fn set_request(
        &mut self,
        cycle: Cycle,
        node: NodeIdx,
        prog: &mut ProgramGraph,
        machine: &Machine,
    ) -> TtaResult<()> {
        if prog.node(node).is_placed()
            && prog.node(node).cycle()? != cycle
        {
            return Err(Error::invalid_data(
                "node is already placed in a different cycle",
            ));
        }
        // skip brokers whose resource category the move does not need; a
        // move no broker recognizes is malformed
        let applicable: Vec<usize> = self
            .brokers
            .iter()
            .enumerate()
            .filter(|(_, broker)| broker.is_applicable(prog, machine, node))
            .map(|(i, _)| i)
            .collect();
        if applicable.is_empty() {
            return Err(Error::internal(
                "no applicable brokers found for assignment",
            ));
        }
        prog.node_mut(node).set_cycle(cycle)?;
        self.current = 0;
        self.cycle = cycle;
        self.node = Some(node);
        self.applicable = applicable;
        for &i in &self.applicable {
            self.assignments[i].set_request(cycle, node);
        }
        Ok(())
    }

    /// The broker the cursor currently points at.
    pub fn current_broker(&self) -> TtaResult<&dyn ResourceBroker> {
        self.applicable_or_err()?;
        Ok(self.brokers[self.applicable[self.current]].as_ref())
    }

    /// The first broker evaluated for the current request.
    pub fn first_broker(&self) -> TtaResult<&dyn ResourceBroker> {
        self.applicable_or_err()?;
        Ok(self.brokers[self.applicable[0]].as_ref())
    }

    /// The last broker evaluated for the current request.
    pub fn last_broker(&self) -> TtaResult<&dyn ResourceBroker> {
        self.applicable_or_err()?;
        Ok(self.brokers[self.applicable[self.applicable.len() - 1]].as_ref())
    }

    pub fn at_first_broker(&self) -> bool {
        self.current == 0
    }

    pub fn at_last_broker(&self) -> bool {
        !self.applicable.is_empty()
            && self.current + 1 == self.applicable.len()
    }

    /// Move to the next broker, legal only after a successful assignment.
    pub fn advance(&mut self) -> TtaResult<()> {
        if !self.resource_found {
            return Err(Error::internal(
                "tried to advance before a valid assignment was made",
            ));
        }
        self.current += 1;
        if self.current >= self.applicable.len() {
            return Err(Error::internal(
                "advanced beyond the last resource broker",
            ));
        }
        Ok(())
    }

    /// Undo the current broker's tentative assignment, forget its tried
    /// candidates, and step back one broker (whose own stale assignment is
    /// also undone, since it will be retried next).
    pub fn backtrack(
        &mut self,
        pool: &mut ResourcePool,
        prog: &mut ProgramGraph,
        machine: &Machine,
    ) -> TtaResult<()> {
        let node = self.node()?;
        self.applicable_or_err()?;
        let slot = self.applicable[self.current];
        let broker = self.brokers[slot].as_mut();
        self.assignments[slot].forget(broker, pool, prog, machine)?;

        if self.current == 0 {
            return Err(Error::internal(
                "backtracked beyond the first resource broker",
            ));
        }
        self.current -= 1;
        debug!(
            "backtracking to {} for node {:?}",
            self.brokers[self.applicable[self.current]].name(),
            node
        );
        let slot = self.applicable[self.current];
        let broker = self.brokers[slot].as_mut();
        if broker.is_already_assigned(pool, prog, machine, self.cycle, node)
        {
            self.assignments[slot]
                .undo_assignment(broker, pool, prog, machine)?;
        }
        Ok(())
    }

    /// Undo any stale assignment at the current broker, then commit its
    /// next candidate.
    pub fn try_next_assignment(
        &mut self,
        pool: &mut ResourcePool,
        prog: &mut ProgramGraph,
        machine: &Machine,
    ) -> TtaResult<()> {
        let node = self.node()?;
        self.applicable_or_err()?;
        let slot = self.applicable[self.current];
        let broker = self.brokers[slot].as_mut();
        if broker.is_already_assigned(pool, prog, machine, self.cycle, node)
        {
            self.assignments[slot]
                .undo_assignment(broker, pool, prog, machine)?;
        }
        self.assignments[slot].try_next(broker, pool, prog, machine)?;
        self.resource_found = true;
        Ok(())
    }

    /// True while the current broker has untried candidates under the
    /// assignments the preceding brokers currently hold.
    pub fn is_tested_assignment_possible(
        &mut self,
        pool: &ResourcePool,
        prog: &ProgramGraph,
        machine: &Machine,
    ) -> TtaResult<bool> {
        self.applicable_or_err()?;
        let slot = self.applicable[self.current];
        self.assignments[slot].is_assignment_possible(
            self.brokers[slot].as_ref(),
            pool,
            prog,
            machine,
        )
    }

    /// Undo every tentative assignment of the current request and unplace
    /// the node.
    pub fn reset_assignments(
        &mut self,
        pool: &mut ResourcePool,
        prog: &mut ProgramGraph,
        machine: &Machine,
    ) -> TtaResult<()> {
        let node = self.node()?;
        for &slot in &self.applicable {
            let broker = self.brokers[slot].as_mut();
            self.assignments[slot].forget(broker, pool, prog, machine)?;
        }
        self.current = 0;
        prog.node_mut(node).unset_cycle()
    }

    /// Undo every assignment held for the given node, independent of the
    /// current request, and unplace it. The node must be placed.
    pub fn reset_assignments_for(
        &mut self,
        node: NodeIdx,
        pool: &mut ResourcePool,
        prog: &mut ProgramGraph,
        machine: &Machine,
    ) -> TtaResult<()> {
        if !prog.node(node).is_placed() {
            return Err(Error::invalid_data(
                "node is not placed in a cycle",
            ));
        }
        for broker in self.brokers.iter_mut() {
            if broker.is_applicable(prog, machine, node) {
                broker.unassign(pool, prog, machine, node)?;
            }
        }
        prog.node_mut(node).unset_cycle()
    }

    /// Drop the current request and all cursors.
    pub fn clear(&mut self) {
        self.node = None;
        self.cycle = 0;
        self.current = 0;
        self.resource_found = false;
        for assignment in self.assignments.iter_mut() {
            assignment.clear();
        }
        self.applicable.clear();
    }
}

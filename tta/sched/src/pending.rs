//! A cursor over one broker's candidate resources for one request.
use tta_ir::{Cycle, Machine, NodeIdx, ProgramGraph};
use tta_utils::{Error, TtaResult};

use crate::brokers::{ResourceBroker, ResourceSet};
use crate::resources::ResourcePool;

/// The pending assignment of one broker: the sorted candidate set for the
/// current (node, cycle) request and a cursor over the candidates already
/// tried. The candidate set is fetched lazily on the first possibility
/// check and refetched after [forget](PendingAssignment::forget), since
/// the choices of the preceding brokers shape what is available.
#[derive(Debug, Default)]
pub struct PendingAssignment {
    cycle: Cycle,
    node: Option<NodeIdx>,
    candidates: Option<ResourceSet>,
    last_tried: Option<usize>,
}

impl PendingAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the node and cycle of the request. Clears the cursor.
    pub fn set_request(&mut self, cycle: Cycle, node: NodeIdx) {
        self.cycle = cycle;
        self.node = Some(node);
        self.candidates = None;
        self.last_tried = None;
    }

    fn node(&self) -> TtaResult<NodeIdx> {
        self.node.ok_or_else(|| {
            Error::internal("pending assignment has no request")
        })
    }

    /// True while the sorted candidate set has untried entries.
    pub fn is_assignment_possible(
        &mut self,
        broker: &dyn ResourceBroker,
        pool: &ResourcePool,
        prog: &ProgramGraph,
        machine: &Machine,
    ) -> TtaResult<bool> {
        if self.candidates.is_none() {
            let node = self.node()?;
            let mut set = broker.all_available_resources(
                pool, prog, machine, self.cycle, node,
            )?;
            // least-used-first, name as secondary key
            set.sort(pool);
            self.candidates = Some(set);
        }
        let count = self.candidates.as_ref().map_or(0, ResourceSet::count);
        Ok(match self.last_tried {
            None => count > 0,
            Some(i) => i + 1 < count,
        })
    }

    /// Advance the cursor and commit the next candidate.
    pub fn try_next(
        &mut self,
        broker: &mut dyn ResourceBroker,
        pool: &mut ResourcePool,
        prog: &mut ProgramGraph,
        machine: &Machine,
    ) -> TtaResult<()> {
        let node = self.node()?;
        let next = self.last_tried.map_or(0, |i| i + 1);
        let candidates = self.candidates.as_ref().ok_or_else(|| {
            Error::internal("tried an assignment before checking candidates")
        })?;
        if next >= candidates.count() {
            return Err(Error::internal("ran out of possible assignments"));
        }
        let res = candidates.resource(next)?;
        broker.assign(pool, prog, machine, self.cycle, node, res)?;
        self.last_tried = Some(next);
        Ok(())
    }

    /// Unassign the currently committed choice without resetting the
    /// cursor, so the next [try_next](Self::try_next) moves on.
    pub fn undo_assignment(
        &mut self,
        broker: &mut dyn ResourceBroker,
        pool: &mut ResourcePool,
        prog: &mut ProgramGraph,
        machine: &Machine,
    ) -> TtaResult<()> {
        let node = self.node()?;
        if broker.is_already_assigned(pool, prog, machine, self.cycle, node)
        {
            broker.unassign(pool, prog, machine, node)
        } else {
            Err(Error::internal(
                "no resource of this pending assignment was assigned to \
                 the node",
            ))
        }
    }

    /// Undo any committed choice and reset to "nothing tried".
    pub fn forget(
        &mut self,
        broker: &mut dyn ResourceBroker,
        pool: &mut ResourcePool,
        prog: &mut ProgramGraph,
        machine: &Machine,
    ) -> TtaResult<()> {
        let node = self.node()?;
        if broker.is_already_assigned(pool, prog, machine, self.cycle, node)
        {
            broker.unassign(pool, prog, machine, node)?;
        }
        self.candidates = None;
        self.last_tried = None;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.cycle = 0;
        self.node = None;
        self.candidates = None;
        self.last_tried = None;
    }
}

//! Time-indexed scheduling resources.
//!
//! Every machine part the scheduler can run out of is represented by one
//! [Resource] in a [ResourcePool], addressed by [ResourceIdx]. The kinds
//! form a closed set: bus segments, direction-typed sockets, per-bus
//! immediate slots and function-unit execution pipelines. Resources refer
//! to each other through *related* and *dependent* handle groups (a socket
//! is related to the segments it can drive, a pipeline to the input sockets
//! that feed it); group membership is validated once at setup time, so the
//! per-cycle queries never need to type-check their neighbours.
mod pipeline;

use std::collections::HashMap;

use tta_ir::{BusIdx, Cycle};
use tta_utils::{Error, Id, IndexedMap, TtaResult, impl_index};

pub use pipeline::ExecutionPipeline;

/// Handle of a [Resource] inside a [ResourcePool].
#[derive(Debug, Eq, Copy, Clone, PartialEq, Hash, PartialOrd, Ord)]
pub struct ResourceIdx(u32);
impl_index!(ResourceIdx);

/// Sparse per-cycle in-use flag, lazily populated.
#[derive(Debug, Clone, Default)]
pub struct SegmentUse {
    record: HashMap<Cycle, bool>,
}

impl SegmentUse {
    pub fn is_in_use(&self, cycle: Cycle) -> bool {
        self.record.get(&cycle).copied().unwrap_or(false)
    }

    fn set(&mut self, cycle: Cycle, used: bool) {
        let _ = self.record.insert(cycle, used);
    }
}

/// Per-cycle use count of a socket.
#[derive(Debug, Clone, Default)]
pub struct SocketUse {
    record: HashMap<Cycle, u32>,
}

impl SocketUse {
    pub fn is_in_use(&self, cycle: Cycle) -> bool {
        self.record.get(&cycle).copied().unwrap_or(0) > 0
    }
}

/// The long-immediate field of one bus: a per-cycle in-use flag plus the
/// field width a constant must fit into.
#[derive(Debug, Clone)]
pub struct SlotUse {
    pub bus: BusIdx,
    pub width: u32,
    record: HashMap<Cycle, bool>,
}

impl SlotUse {
    pub fn new(bus: BusIdx, width: u32) -> Self {
        Self {
            bus,
            width,
            record: HashMap::new(),
        }
    }

    pub fn is_in_use(&self, cycle: Cycle) -> bool {
        self.record.get(&cycle).copied().unwrap_or(false)
    }
}

/// The closed set of scheduling-resource categories.
#[derive(Debug, Clone)]
pub enum ResourceKind {
    InputSocket(SocketUse),
    OutputSocket(SocketUse),
    Segment(SegmentUse),
    ImmediateSlot(SlotUse),
    Pipeline(ExecutionPipeline),
}

/// One time-indexed resource with its cross-references.
#[derive(Debug, Clone)]
pub struct Resource {
    name: Id,
    use_count: u32,
    related: Vec<Vec<ResourceIdx>>,
    dependent: Vec<Vec<ResourceIdx>>,
    kind: ResourceKind,
}

impl Resource {
    pub fn name(&self) -> Id {
        self.name
    }

    /// How many times a broker has assigned this resource. Candidate sets
    /// are sorted by this so the search spreads load across equivalent
    /// resources.
    pub fn use_count(&self) -> u32 {
        self.use_count
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    /// Adjust the assignment counter for resources whose occupancy is
    /// committed through their payload rather than [ResourcePool::assign].
    pub fn bump_use_count(&mut self, delta: i32) {
        if delta >= 0 {
            self.use_count += delta as u32;
        } else {
            self.use_count =
                self.use_count.saturating_sub(delta.unsigned_abs());
        }
    }

    pub fn is_input_socket(&self) -> bool {
        matches!(self.kind, ResourceKind::InputSocket(_))
    }

    pub fn is_output_socket(&self) -> bool {
        matches!(self.kind, ResourceKind::OutputSocket(_))
    }

    pub fn is_segment(&self) -> bool {
        matches!(self.kind, ResourceKind::Segment(_))
    }

    pub fn is_immediate_slot(&self) -> bool {
        matches!(self.kind, ResourceKind::ImmediateSlot(_))
    }

    pub fn is_pipeline(&self) -> bool {
        matches!(self.kind, ResourceKind::Pipeline(_))
    }

    /// True when any bookkeeping marks the given cycle as occupied.
    pub fn is_in_use(&self, cycle: Cycle) -> bool {
        match &self.kind {
            ResourceKind::InputSocket(s) | ResourceKind::OutputSocket(s) => {
                s.is_in_use(cycle)
            }
            ResourceKind::Segment(s) => s.is_in_use(cycle),
            ResourceKind::ImmediateSlot(s) => s.is_in_use(cycle),
            ResourceKind::Pipeline(p) => p.is_in_use(cycle),
        }
    }

    pub fn is_available(&self, cycle: Cycle) -> bool {
        match &self.kind {
            ResourceKind::Pipeline(p) => p.is_available(cycle),
            _ => !self.is_in_use(cycle),
        }
    }

    pub fn add_to_related_group(&mut self, group: usize, other: ResourceIdx) {
        if self.related.len() <= group {
            self.related.resize(group + 1, Vec::new());
        }
        if !self.related[group].contains(&other) {
            self.related[group].push(other);
        }
    }

    pub fn add_to_dependent_group(
        &mut self,
        group: usize,
        other: ResourceIdx,
    ) {
        if self.dependent.len() <= group {
            self.dependent.resize(group + 1, Vec::new());
        }
        if !self.dependent[group].contains(&other) {
            self.dependent[group].push(other);
        }
    }

    pub fn related_groups(&self) -> &[Vec<ResourceIdx>] {
        &self.related
    }

    pub fn dependent_groups(&self) -> &[Vec<ResourceIdx>] {
        &self.dependent
    }

    /// True when the other resource appears in any related group.
    pub fn has_related(&self, other: ResourceIdx) -> bool {
        self.related.iter().any(|group| group.contains(&other))
    }
}

/// The arena all brokers allocate their resources from.
#[derive(Debug, Clone, Default)]
pub struct ResourcePool {
    resources: IndexedMap<ResourceIdx, Resource>,
}

impl ResourcePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: Id, kind: ResourceKind) -> ResourceIdx {
        self.resources.push(Resource {
            name,
            use_count: 0,
            related: Vec::new(),
            dependent: Vec::new(),
            kind,
        })
    }

    pub fn get(&self, idx: ResourceIdx) -> &Resource {
        &self.resources[idx]
    }

    pub fn get_mut(&mut self, idx: ResourceIdx) -> &mut Resource {
        &mut self.resources[idx]
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceIdx, &Resource)> {
        self.resources.iter()
    }

    /// Access the execution pipeline payload of a resource.
    pub fn pipeline(&self, idx: ResourceIdx) -> TtaResult<&ExecutionPipeline> {
        match &self.resources[idx].kind {
            ResourceKind::Pipeline(p) => Ok(p),
            _ => Err(Error::internal(format!(
                "resource {} is not an execution pipeline",
                self.resources[idx].name
            ))),
        }
    }

    pub fn pipeline_mut(
        &mut self,
        idx: ResourceIdx,
    ) -> TtaResult<&mut ExecutionPipeline> {
        let name = self.resources[idx].name;
        if let ResourceKind::Pipeline(p) = &mut self.resources[idx].kind {
            return Ok(p);
        }
        Err(Error::internal(format!(
            "resource {} is not an execution pipeline",
            name
        )))
    }

    /// Mark a socket, segment or slot resource as used in the cycle.
    ///
    /// Failing availability here is an internal error: the broker must
    /// check before it commits.
    pub fn assign(&mut self, idx: ResourceIdx, cycle: Cycle) -> TtaResult<()> {
        let res = &mut self.resources[idx];
        match &mut res.kind {
            ResourceKind::InputSocket(s) | ResourceKind::OutputSocket(s) => {
                let count = s.record.entry(cycle).or_insert(0);
                *count += 1;
            }
            ResourceKind::Segment(s) => {
                if s.is_in_use(cycle) {
                    return Err(Error::internal(format!(
                        "segment {} can not be assigned in cycle {}",
                        res.name, cycle
                    )));
                }
                s.set(cycle, true);
            }
            ResourceKind::ImmediateSlot(s) => {
                if s.is_in_use(cycle) {
                    return Err(Error::internal(format!(
                        "immediate slot {} can not be assigned in cycle {}",
                        res.name, cycle
                    )));
                }
                let _ = s.record.insert(cycle, true);
            }
            ResourceKind::Pipeline(_) => {
                return Err(Error::internal(
                    "execution pipelines are assigned through their broker",
                ));
            }
        }
        res.use_count += 1;
        Ok(())
    }

    /// Undo [ResourcePool::assign]. Unassigning a free cycle is an internal
    /// error.
    pub fn unassign(
        &mut self,
        idx: ResourceIdx,
        cycle: Cycle,
    ) -> TtaResult<()> {
        let res = &mut self.resources[idx];
        match &mut res.kind {
            ResourceKind::InputSocket(s) | ResourceKind::OutputSocket(s) => {
                match s.record.get_mut(&cycle) {
                    Some(count) if *count > 0 => *count -= 1,
                    _ => {
                        return Err(Error::internal(format!(
                            "socket {} was not in use in cycle {}",
                            res.name, cycle
                        )));
                    }
                }
            }
            ResourceKind::Segment(s) => {
                if !s.is_in_use(cycle) {
                    return Err(Error::internal(format!(
                        "segment {} was not in use in cycle {}",
                        res.name, cycle
                    )));
                }
                s.set(cycle, false);
            }
            ResourceKind::ImmediateSlot(s) => {
                if !s.is_in_use(cycle) {
                    return Err(Error::internal(format!(
                        "immediate slot {} was not in use in cycle {}",
                        res.name, cycle
                    )));
                }
                let _ = s.record.insert(cycle, false);
            }
            ResourceKind::Pipeline(_) => {
                return Err(Error::internal(
                    "execution pipelines are unassigned through their broker",
                ));
            }
        }
        res.use_count = res.use_count.saturating_sub(1);
        Ok(())
    }

    /// Segment availability plus the topology check: the requesting socket
    /// must be in the segment's related group.
    pub fn can_assign_segment(
        &self,
        idx: ResourceIdx,
        cycle: Cycle,
        socket: ResourceIdx,
    ) -> bool {
        let res = &self.resources[idx];
        if !res.is_segment() || !res.is_available(cycle) {
            return false;
        }
        let sock = &self.resources[socket];
        (sock.is_input_socket() || sock.is_output_socket())
            && res.has_related(socket)
    }

    /// Check the typing of every related and dependent group, once, after
    /// the brokers have wired their links. A mismatch means the machine
    /// model was assembled incorrectly and scheduling must not start.
    pub fn validate(&self) -> TtaResult<()> {
        for (_, res) in self.resources.iter() {
            let related_ok = |pred: &dyn Fn(&Resource) -> bool| {
                res.related
                    .iter()
                    .flatten()
                    .all(|&other| pred(&self.resources[other]))
            };
            let ok = match &res.kind {
                ResourceKind::Segment(_) => {
                    related_ok(&|r: &Resource| {
                        r.is_input_socket() || r.is_output_socket()
                    }) && res
                        .dependent
                        .iter()
                        .flatten()
                        .all(|&other| self.resources[other].is_segment())
                }
                ResourceKind::InputSocket(_)
                | ResourceKind::OutputSocket(_) => {
                    related_ok(&|r: &Resource| {
                        r.is_pipeline() || r.is_segment()
                    })
                }
                ResourceKind::ImmediateSlot(_) => {
                    related_ok(&|r: &Resource| r.is_segment())
                }
                ResourceKind::Pipeline(_) => {
                    related_ok(&|r: &Resource| r.is_input_socket())
                }
            };
            if !ok {
                return Err(Error::invalid_data(format!(
                    "resource {} is linked to resources of the wrong kind",
                    res.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with_segment() -> (ResourcePool, ResourceIdx) {
        let mut pool = ResourcePool::new();
        let seg = pool.add(
            Id::new("b0.s0"),
            ResourceKind::Segment(SegmentUse::default()),
        );
        (pool, seg)
    }

    #[test]
    fn segment_assign_unassign_roundtrip() {
        let (mut pool, seg) = pool_with_segment();
        assert!(pool.get(seg).is_available(7));
        pool.assign(seg, 7).unwrap();
        assert!(pool.get(seg).is_in_use(7));
        assert!(!pool.get(seg).is_available(7));
        assert_eq!(pool.get(seg).use_count(), 1);

        // double assign violates the pairing contract
        assert!(pool.assign(seg, 7).is_err());

        pool.unassign(seg, 7).unwrap();
        assert!(pool.get(seg).is_available(7));
        assert_eq!(pool.get(seg).use_count(), 0);
        assert!(pool.unassign(seg, 7).is_err());
    }

    #[test]
    fn segment_topology_check() {
        let (mut pool, seg) = pool_with_segment();
        let sock = pool.add(
            Id::new("rf.i"),
            ResourceKind::InputSocket(SocketUse::default()),
        );
        // not related yet
        assert!(!pool.can_assign_segment(seg, 0, sock));
        pool.get_mut(seg).add_to_related_group(0, sock);
        assert!(pool.can_assign_segment(seg, 0, sock));
        pool.assign(seg, 0).unwrap();
        assert!(!pool.can_assign_segment(seg, 0, sock));
    }

    #[test]
    fn group_validation_rejects_wrong_kinds() {
        let (mut pool, seg) = pool_with_segment();
        let other_seg = pool.add(
            Id::new("b0.s1"),
            ResourceKind::Segment(SegmentUse::default()),
        );
        pool.get_mut(seg).add_to_dependent_group(0, other_seg);
        pool.validate().unwrap();

        // a segment related to a segment is a wiring error
        pool.get_mut(seg).add_to_related_group(0, other_seg);
        assert!(pool.validate().is_err());
    }

    proptest::proptest! {
        #[test]
        fn assign_unassign_restores_state(
            cycles in proptest::collection::vec(0u32..64, 1..20)
        ) {
            let (mut pool, seg) = pool_with_segment();
            let mut assigned = std::collections::HashSet::new();
            for &c in &cycles {
                if assigned.insert(c) {
                    pool.assign(seg, c).unwrap();
                }
            }
            for &c in &assigned {
                pool.unassign(seg, c).unwrap();
            }
            for c in 0..64 {
                proptest::prop_assert!(pool.get(seg).is_available(c));
            }
            proptest::prop_assert_eq!(pool.get(seg).use_count(), 0);
        }
    }
}

//! Pipeline resource model of a single function unit.
//!
//! The unit's internal resources (result registers, internal buses,
//! multiplexers) are abstracted as `resource_count` parallel lines. Every
//! supported operation carries a boolean template of size `maximal_latency
//! × resource_count` describing which lines it occupies relative to its
//! issue cycle; the committed occupation of the unit over time is the OR of
//! the templates of every operation issued so far. On top of the line
//! bitmap the model tracks which program operation owns each operand-write
//! cycle, when results are written into and read out of the (single
//! buffered) result register, and which opcode each triggering move left
//! behind — an opcode persists forward until the next opcode-setting move.
use std::cell::Cell;
use std::collections::{BTreeMap, HashMap, HashSet};

use smallvec::{SmallVec, smallvec};
use tta_ir::{Cycle, FuIdx, Machine, NodeIdx, OpIdx, ProgramGraph, Terminal};
use tta_utils::{Error, Id, TtaResult};

type ResourceLine = SmallVec<[bool; 4]>;
type ResourceTable = Vec<ResourceLine>;

/// Execution pipeline state of one function unit.
#[derive(Debug, Clone)]
pub struct ExecutionPipeline {
    fu: FuIdx,
    resource_count: u32,
    maximal_latency: u32,
    /// Operation name to index into `op_pipelines`.
    op_index: HashMap<Id, usize>,
    /// One usage template per supported operation, fixed target data.
    op_pipelines: Vec<ResourceTable>,
    /// Committed line usage per cycle, grown as operations are issued.
    pipeline: Vec<ResourceLine>,
    /// Which program operation owns each operand-write cycle.
    operands_written: Vec<Option<OpIdx>>,
    /// `(operation, count)` of results landing in the result register.
    result_written: Vec<(Option<OpIdx>, u32)>,
    /// `(operation, count)` of result reads leaving the result register.
    result_read: Vec<(Option<OpIdx>, u32)>,
    /// The opcode each triggering move left behind, keyed by issue cycle.
    opcode_setting_cycle: BTreeMap<Cycle, Id>,
    /// Result-availability cycle recorded per assigned source node, so
    /// unassign removes exactly what assign added.
    stored_result_cycles: HashMap<NodeIdx, Cycle>,
    assigned_sources: HashSet<NodeIdx>,
    assigned_destinations: HashSet<NodeIdx>,
    cached_size: Cell<Option<usize>>,
}

impl ExecutionPipeline {
    /// Create the pipeline model of a function unit with the given number
    /// of internal resource lines and the latency of its longest
    /// operation.
    pub fn new(fu: FuIdx, resource_count: u32, maximal_latency: u32) -> Self {
        Self {
            fu,
            resource_count,
            maximal_latency,
            op_index: HashMap::new(),
            op_pipelines: Vec::new(),
            pipeline: Vec::new(),
            operands_written: Vec::new(),
            result_written: Vec::new(),
            result_read: Vec::new(),
            opcode_setting_cycle: BTreeMap::new(),
            stored_result_cycles: HashMap::new(),
            assigned_sources: HashSet::new(),
            assigned_destinations: HashSet::new(),
            cached_size: Cell::new(None),
        }
    }

    pub fn function_unit(&self) -> FuIdx {
        self.fu
    }

    fn empty_line(&self) -> ResourceLine {
        smallvec![false; self.resource_count as usize]
    }

    /// Register an operation, with an all-false template until
    /// [set_resource_use](Self::set_resource_use) fills it in.
    pub fn add_operation(&mut self, name: Id) {
        if !self.op_index.contains_key(&name) {
            let table =
                vec![self.empty_line(); self.maximal_latency as usize];
            self.op_pipelines.push(table);
            let _ = self.op_index.insert(name, self.op_pipelines.len() - 1);
        }
    }

    /// Mark one template cell: the operation occupies `resource_index`
    /// at `offset` cycles after issue. Target-machine data, set up once.
    pub fn set_resource_use(
        &mut self,
        name: Id,
        offset: u32,
        resource_index: u32,
    ) -> TtaResult<()> {
        if offset >= self.maximal_latency {
            return Err(Error::out_of_range(format!(
                "resource use of {} at offset {} is outside the pipeline \
                 scope {}",
                name, offset, self.maximal_latency
            )));
        }
        if resource_index >= self.resource_count {
            return Err(Error::out_of_range(format!(
                "resource use of {} names line {} but the unit has {}",
                name, resource_index, self.resource_count
            )));
        }
        self.add_operation(name);
        let table = &mut self.op_pipelines[self.op_index[&name]];
        table[offset as usize][resource_index as usize] = true;
        Ok(())
    }

    /// True when any bookkeeping occupies the cycle: an operand write, a
    /// result read, or a committed pipeline line.
    pub fn is_in_use(&self, cycle: Cycle) -> bool {
        let c = cycle as usize;
        if matches!(self.operands_written.get(c), Some(Some(_))) {
            return true;
        }
        if matches!(self.result_read.get(c), Some((Some(_), _))) {
            return true;
        }
        if c >= self.size() {
            return false;
        }
        self.pipeline[c].iter().any(|&line| line)
    }

    /// True when at least one supported operation could be issued in the
    /// cycle without colliding with committed line usage.
    pub fn is_available(&self, cycle: Cycle) -> bool {
        let c = cycle as usize;
        if c >= self.size() && c >= self.operands_written.len() {
            // whole new operation lands in scope the unit does not occupy
            return true;
        }
        if matches!(self.operands_written.get(c), Some(Some(_))) {
            // cycle is in range between two moves of the same operation
            return false;
        }
        if self.op_pipelines.is_empty() {
            return true;
        }
        self.op_pipelines
            .iter()
            .any(|table| self.template_fits(table, cycle))
    }

    fn template_fits(&self, table: &ResourceTable, cycle: Cycle) -> bool {
        for (i, row) in table.iter().enumerate() {
            let c = cycle as usize + i;
            if c >= self.size() {
                // remaining rows land beyond occupied scope
                return true;
            }
            if row
                .iter()
                .zip(self.pipeline[c].iter())
                .any(|(&t, &p)| t && p)
            {
                return false;
            }
        }
        true
    }

    /// Commit the pipeline-side bookkeeping of a move.
    ///
    /// `source` selects the result-read side of a (possibly bypassed) move;
    /// otherwise the operand-write side is committed, and a triggering
    /// destination additionally ORs its operation's template into the line
    /// bitmap and records the opcode it leaves behind. The caller is
    /// expected to have verified [can_assign](Self::can_assign); failures
    /// here mean the broker sequencing contract was broken.
    pub fn assign(
        &mut self,
        cycle: Cycle,
        node: NodeIdx,
        source: bool,
        prog: &ProgramGraph,
        machine: &Machine,
    ) -> TtaResult<()> {
        self.cached_size.set(None);
        let n = prog.node(node);

        if n.is_source_operation() && source {
            let _ = self.assigned_sources.insert(node);
            let p_op = n.source_operation()?;

            // record the operation in the cycle where the result is read
            let c = cycle as usize;
            if self.result_read.len() <= c {
                self.result_read.resize(c + 1, (None, 0));
            }
            match &mut self.result_read[c] {
                (slot @ None, count) => {
                    *slot = Some(p_op);
                    *count = 1;
                }
                (_, count) => *count += 1,
            }

            // record the operation in the cycle where the result becomes
            // available; unresolved while the trigger is unscheduled, in
            // which case it is provisionally the read cycle itself
            let ready = prog
                .earliest_result_read_cycle(node, machine)?
                .unwrap_or(cycle) as usize;
            if self.result_written.len() <= ready {
                self.result_written.resize(ready + 1, (None, 0));
            }
            match &mut self.result_written[ready] {
                (slot @ None, count) => {
                    *slot = Some(p_op);
                    *count = 1;
                }
                (_, count) => *count += 1,
            }
            let _ = self.stored_result_cycles.insert(node, ready as Cycle);
        }

        if !n.is_destination_operation() || source {
            return Ok(());
        }
        let _ = self.assigned_destinations.insert(node);
        let p_op = n.destination_operation()?;

        let (first, last) = self.find_range(cycle, node, prog)?;
        if self.operands_written.len() < cycle as usize {
            self.operands_written.resize(cycle as usize, None);
        }
        if last as usize >= self.operands_written.len() {
            self.operands_written.resize(last as usize + 1, Some(p_op));
        }
        for i in first..=last {
            let entry = &mut self.operands_written[i as usize];
            if let Some(other) = *entry
                && other != p_op
            {
                return Err(Error::invalid_data(format!(
                    "unit had previous operation {} in cycle {}",
                    prog.operation(other).name,
                    i
                )));
            }
            *entry = Some(p_op);
        }

        let mv = n.mv()?;
        if !mv.destination.is_triggering(machine) {
            return Ok(());
        }

        // an opcode-setting trigger names its operation; a plain trigger
        // restarts whatever opcode an earlier move left behind
        let op_name = if mv.destination.is_opcode_setting(machine) {
            self.terminal_operation(&mv.destination)?
        } else {
            self.recorded_opcode(cycle).ok_or_else(|| {
                Error::internal(
                    "using a non-opcode-setting triggering move without \
                     setting an opcode first",
                )
            })?
        };
        let p_index = *self.op_index.get(&op_name).ok_or_else(|| {
            Error::not_found(format!(
                "operation {op_name} is not implemented in this unit"
            ))
        })?;

        while self.pipeline.len() < cycle as usize {
            let line = self.empty_line();
            self.pipeline.push(line);
        }
        for i in 0..self.maximal_latency as usize {
            let c = cycle as usize + i;
            if c >= self.pipeline.len() {
                self.pipeline.push(self.op_pipelines[p_index][i].clone());
            } else {
                for j in 0..self.resource_count as usize {
                    self.pipeline[c][j] |= self.op_pipelines[p_index][i][j];
                }
            }
        }
        // a merely-triggering move still starts an execution with the old
        // opcode, so it is recorded as well
        let _ = self.opcode_setting_cycle.insert(cycle, op_name);
        Ok(())
    }

    /// Undo [assign](Self::assign). The node must still be placed in the
    /// cycle it was assigned in.
    pub fn unassign(
        &mut self,
        cycle: Cycle,
        node: NodeIdx,
        source: bool,
        prog: &ProgramGraph,
        machine: &Machine,
    ) -> TtaResult<()> {
        self.cached_size.set(None);
        let n = prog.node(node);
        if n.cycle()? != cycle {
            return Err(Error::invalid_data(
                "trying to unassign a node from a different cycle than it \
                 was assigned to",
            ));
        }

        if n.is_source_operation()
            && source
            && self.assigned_sources.remove(&node)
            && let Some(ready) = self.stored_result_cycles.remove(&node)
        {
            let stale = || {
                Error::internal(
                    "result bookkeeping does not match the recorded \
                     assignment",
                )
            };
            let entry = self
                .result_written
                .get_mut(ready as usize)
                .filter(|e| e.1 > 0)
                .ok_or_else(stale)?;
            entry.1 -= 1;
            if entry.1 == 0 {
                entry.0 = None;
            }
            let entry = self
                .result_read
                .get_mut(cycle as usize)
                .filter(|e| e.1 > 0)
                .ok_or_else(stale)?;
            entry.1 -= 1;
            if entry.1 == 0 {
                entry.0 = None;
            }
            while matches!(self.result_written.last(), Some((None, _))) {
                let _ = self.result_written.pop();
            }
            while matches!(self.result_read.last(), Some((None, _))) {
                let _ = self.result_read.pop();
            }
        }

        if !n.is_destination_operation() || source {
            return Ok(());
        }
        if !self.assigned_destinations.remove(&node) {
            return Ok(());
        }

        if cycle as usize >= self.pipeline.len()
            && cycle as usize >= self.operands_written.len()
        {
            return Err(Error::internal(format!(
                "trying to unassign cycle {cycle} from outside the pipeline \
                 scope"
            )));
        }
        let p_op = n.destination_operation()?;
        let (first, last) = self.find_range(cycle, node, prog)?;
        // keep cycles still owned by sibling operand moves
        let mut first = first as i64;
        let mut last = last as i64;
        let op = prog.operation(p_op);
        for i in 0..op.input_move_count() {
            let sibling = op.input_move(i);
            if sibling == node || !prog.node(sibling).is_scheduled() {
                continue;
            }
            let sc = prog.node(sibling).cycle()? as i64;
            if sc == first {
                first += 1;
            }
            if sc == last {
                last -= 1;
            }
        }
        if first < self.operands_written.len() as i64
            && (first == cycle as i64 || last == cycle as i64)
        {
            // only clear when the node was first or last of the inputs; a
            // hole between operands of the same operation must stay owned
            for i in (first..=last).rev() {
                if i as usize == self.operands_written.len() - 1 {
                    let _ = self.operands_written.pop();
                } else {
                    self.operands_written[i as usize] = None;
                }
            }
        }
        while matches!(self.operands_written.last(), Some(None)) {
            let _ = self.operands_written.pop();
        }

        let mv = n.mv()?;
        if !mv.destination.is_triggering(machine) {
            return Ok(());
        }
        let recorded =
            self.opcode_setting_cycle.get(&cycle).copied().ok_or_else(
                || {
                    Error::internal(format!(
                        "trying to unassign an operation not assigned in \
                         cycle {cycle}"
                    ))
                },
            )?;
        let op_name = if mv.destination.is_opcode_setting(machine) {
            self.terminal_operation(&mv.destination)?
        } else {
            recorded
        };
        let p_index = *self.op_index.get(&op_name).ok_or_else(|| {
            Error::internal(format!(
                "trying to unassign operation {op_name} not supported on \
                 this unit"
            ))
        })?;
        if op_name != recorded {
            return Err(Error::internal(format!(
                "trying to unassign operation {op_name}, different from \
                 what was recorded ({recorded})"
            )));
        }
        // size() ignores trailing empty lines; the unassigned template may
        // extend into them, so check against the raw vector
        if cycle as usize + self.maximal_latency as usize - 1
            >= self.pipeline.len()
        {
            return Err(Error::internal(
                "unassigning an operation longer than the pipeline scope",
            ));
        }
        for i in 0..self.maximal_latency as usize {
            for j in 0..self.resource_count as usize {
                self.pipeline[cycle as usize + i][j] &=
                    !self.op_pipelines[p_index][i][j];
            }
        }
        let _ = self.opcode_setting_cycle.remove(&cycle);
        Ok(())
    }

    /// Non-destructive availability test for assigning the node in the
    /// cycle. `source` selects the result-read side; `triggers` tells the
    /// model the destination port actually triggers on the target, which
    /// may differ from the universal-machine view the move was built with.
    pub fn can_assign(
        &self,
        cycle: Cycle,
        node: NodeIdx,
        source: bool,
        triggers: bool,
        prog: &ProgramGraph,
        machine: &Machine,
    ) -> TtaResult<bool> {
        let n = prog.node(node);

        if n.is_source_operation() && source {
            // a result can be read no earlier than it lands in the result
            // register, and no later than another operation's result
            // overwrites the single buffer
            if let Some(ready) =
                prog.earliest_result_read_cycle(node, machine)?
            {
                if cycle < ready {
                    return Ok(false);
                }
                let other = self.next_result_cycle(ready, node, prog)?;
                if let Some(o) = other
                    && o <= cycle
                {
                    return Ok(false);
                }
                let p_op = n.source_operation()?;
                for i in ready as usize..self.result_read.len() {
                    let (owner, count) = self.result_read[i];
                    if count > 0 {
                        if owner != Some(p_op)
                            && other.is_none_or(|o| (i as Cycle) < o)
                        {
                            // an earlier result is still being read after
                            // this one would land; we can not overwrite it
                            return Ok(false);
                        }
                        break;
                    }
                }
            }
        }

        if !n.is_destination_operation() || source {
            return Ok(true);
        }
        let p_op = n.destination_operation()?;
        let (first, last) = self.find_range(cycle, node, prog)?;
        for i in first..=last {
            let Some(entry) = self.operands_written.get(i as usize) else {
                break;
            };
            if let Some(other) = *entry
                && other != p_op
            {
                return Ok(false);
            }
        }

        if !triggers {
            return Ok(true);
        }
        let mv = n.mv()?;
        let op_name = if mv.destination.is_opcode_setting(machine) {
            self.terminal_operation(&mv.destination)?
        } else {
            // the terminal's operation is only a hint; an opcode recorded
            // at or before the cycle takes precedence over it
            let hint = match &mv.destination {
                Terminal::FuPort { operation, .. } => *operation,
                _ => None,
            };
            match self.recorded_opcode(cycle).or(hint) {
                Some(name) => name,
                None => {
                    return Err(Error::internal(
                        "using a non-opcode-setting triggering move without \
                         setting an opcode first",
                    ));
                }
            }
        };
        let Some(&p_index) = self.op_index.get(&op_name) else {
            // operation not supported by this unit
            return Ok(false);
        };
        for i in 0..self.maximal_latency as usize {
            let c = cycle as usize + i;
            if c >= self.size() {
                // unoccupied territory
                return Ok(true);
            }
            for j in 0..self.resource_count as usize {
                if self.op_pipelines[p_index][i][j] && self.pipeline[c][j] {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// The inclusive cycle range `[first, last]` spanned by the other
    /// already-scheduled input moves of the node's operation, collapsed to
    /// `[cycle, cycle]` when none exist.
    pub fn find_range(
        &self,
        cycle: Cycle,
        node: NodeIdx,
        prog: &ProgramGraph,
    ) -> TtaResult<(Cycle, Cycle)> {
        let p_op = prog.node(node).destination_operation()?;
        let mut first: Option<Cycle> = None;
        let mut last: Option<Cycle> = None;
        let op = prog.operation(p_op);
        for i in 0..op.input_move_count() {
            let k = op.input_move(i);
            if !prog.node(k).is_scheduled() {
                continue;
            }
            let c = prog.node(k).cycle()?;
            if c > cycle && last.is_none_or(|l| c < l) {
                last = Some(c);
            }
            if c < cycle && first.is_none_or(|f| c > f) {
                first = Some(c);
            }
        }
        Ok((first.unwrap_or(cycle), last.unwrap_or(cycle)))
    }

    /// The cycle in which a different operation's result lands in the
    /// result register at or after the given cycle, overwriting it.
    pub fn next_result_cycle(
        &self,
        cycle: Cycle,
        node: NodeIdx,
        prog: &ProgramGraph,
    ) -> TtaResult<Option<Cycle>> {
        let p_op = prog.node(node).source_operation().map_err(|_| {
            Error::invalid_data(
                "trying to get the next result for a move that is not in an \
                 operation",
            )
        })?;
        for i in cycle as usize..self.result_written.len() {
            let (owner, count) = self.result_written[i];
            if count > 0 && owner != Some(p_op) {
                return Ok(Some(i as Cycle));
            }
        }
        Ok(None)
    }

    /// The highest cycle with any committed line usage, plus one. Cached
    /// between mutations.
    pub fn size(&self) -> usize {
        if let Some(size) = self.cached_size.get() {
            return size;
        }
        let size = self
            .pipeline
            .iter()
            .rposition(|line| line.iter().any(|&l| l))
            .map_or(0, |i| i + 1);
        self.cached_size.set(Some(size));
        size
    }

    /// The highest cycle any bookkeeping knows about: committed lines,
    /// operand writes, result writes or result reads. `None` when the
    /// unit is untouched.
    pub fn highest_known_cycle(&self) -> Option<Cycle> {
        let operands = self
            .operands_written
            .iter()
            .rposition(|entry| entry.is_some());
        let written = self
            .result_written
            .iter()
            .rposition(|(owner, _)| owner.is_some());
        let read = self
            .result_read
            .iter()
            .rposition(|(owner, _)| owner.is_some());
        let size = self.size().checked_sub(1);
        [operands, written, read, size]
            .into_iter()
            .flatten()
            .max()
            .map(|c| c as Cycle)
    }

    fn recorded_opcode(&self, cycle: Cycle) -> Option<Id> {
        self.opcode_setting_cycle
            .range(..=cycle)
            .next_back()
            .map(|(_, name)| *name)
    }

    fn terminal_operation(&self, terminal: &Terminal) -> TtaResult<Id> {
        match terminal {
            Terminal::FuPort {
                operation: Some(op),
                ..
            } => Ok(*op),
            _ => Err(Error::invalid_data(
                "opcode-setting move carries no operation",
            )),
        }
    }
}

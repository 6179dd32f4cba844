//! The scheduled-program representation.
//!
//! A basic block is a set of [MoveNode]s linked by data dependences. Each
//! node wraps one data transport ([Move]); the moves realizing one hardware
//! operation invocation are grouped into a [ProgramOperation]. The
//! scheduler places nodes into cycles and binds machine parts onto their
//! terminals; nothing here performs placement itself.
use itertools::Itertools;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use tta_utils::{Error, Id, IndexRef, IndexedMap, TtaResult, impl_index};

use crate::machine::{BusIdx, Machine, PortIdx, PortOwner, RfIdx};

/// A clock cycle index within the scheduling scope.
pub type Cycle = u32;

/// Handle of a [MoveNode] inside a [ProgramGraph].
#[derive(Debug, Eq, Copy, Clone, PartialEq, Hash, PartialOrd, Ord)]
pub struct NodeIdx(u32);
impl_index!(NodeIdx);

/// Handle of a [ProgramOperation] inside a [ProgramGraph].
#[derive(Debug, Eq, Copy, Clone, PartialEq, Hash, PartialOrd, Ord)]
pub struct OpIdx(u32);
impl_index!(OpIdx);

/// One end of a move.
///
/// Register terminals start out port-unbound; the socket brokers bind the
/// concrete register-file port during scheduling. Function-unit terminals
/// carry the operation name the reference belongs to (the opcode, when the
/// port is opcode-setting; a hint otherwise) and the operand position
/// within that operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    FuPort {
        port: PortIdx,
        operation: Option<Id>,
        /// Input operand position for operand/trigger references, output
        /// position for result references.
        operand: u32,
    },
    Register {
        rf: RfIdx,
        index: u32,
        /// Bound by the socket brokers.
        port: Option<PortIdx>,
    },
    Immediate(i64),
}

impl Terminal {
    pub fn is_fu_port(&self) -> bool {
        matches!(self, Terminal::FuPort { .. })
    }

    pub fn is_gpr(&self) -> bool {
        matches!(self, Terminal::Register { .. })
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, Terminal::Immediate(_))
    }

    /// True when this is a reference to a triggering FU port.
    pub fn is_triggering(&self, machine: &Machine) -> bool {
        match self {
            Terminal::FuPort { port, .. } => machine.port(*port).triggering,
            _ => false,
        }
    }

    /// True when this is a reference to an opcode-setting FU port.
    pub fn is_opcode_setting(&self, machine: &Machine) -> bool {
        match self {
            Terminal::FuPort { port, .. } => {
                machine.port(*port).opcode_setting
            }
            _ => false,
        }
    }

    /// The port this terminal is bound to, if any.
    pub fn port(&self) -> Option<PortIdx> {
        match self {
            Terminal::FuPort { port, .. } => Some(*port),
            Terminal::Register { port, .. } => *port,
            Terminal::Immediate(_) => None,
        }
    }
}

/// A single data transport over one bus in one cycle. The bus is bound by
/// the bus broker during scheduling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Move {
    pub source: Terminal,
    pub destination: Terminal,
    pub bus: Option<BusIdx>,
}

impl Move {
    pub fn new(source: Terminal, destination: Terminal) -> Self {
        Self {
            source,
            destination,
            bus: None,
        }
    }
}

/// The unit of scheduling: one transport plus its placement state and its
/// membership in program operations. Entry/exit markers carry no move.
#[derive(Debug, Clone)]
pub struct MoveNode {
    mv: Option<Move>,
    placed: bool,
    cycle: Cycle,
    src_op: Option<OpIdx>,
    dst_op: Option<OpIdx>,
}

impl MoveNode {
    fn new(mv: Option<Move>) -> Self {
        Self {
            mv,
            placed: false,
            cycle: 0,
            src_op: None,
            dst_op: None,
        }
    }

    /// True for real moves, false for entry/exit markers.
    pub fn is_move(&self) -> bool {
        self.mv.is_some()
    }

    pub fn mv(&self) -> TtaResult<&Move> {
        self.mv.as_ref().ok_or_else(|| {
            Error::invalid_data("node does not contain a move")
        })
    }

    pub fn mv_mut(&mut self) -> TtaResult<&mut Move> {
        self.mv.as_mut().ok_or_else(|| {
            Error::invalid_data("node does not contain a move")
        })
    }

    /// True when the source of the move is an operation output.
    pub fn is_source_operation(&self) -> bool {
        self.mv.is_some() && self.src_op.is_some()
    }

    /// True when the destination of the move is an operation input.
    pub fn is_destination_operation(&self) -> bool {
        self.mv.is_some() && self.dst_op.is_some()
    }

    /// True when the move belongs to an operation execution on either end.
    pub fn is_operation_move(&self) -> bool {
        self.is_source_operation() || self.is_destination_operation()
    }

    /// A software bypass: reads one operation's result directly into
    /// another operation's operand.
    pub fn is_bypass(&self) -> bool {
        self.is_source_operation() && self.is_destination_operation()
    }

    /// A plain register-to-register or immediate-to-register copy that
    /// belongs to no operation.
    pub fn is_register_move(&self) -> bool {
        self.is_move()
            && !self.is_source_operation()
            && !self.is_destination_operation()
    }

    /// True when the move reads a general-purpose register.
    pub fn is_source_variable(&self) -> bool {
        matches!(&self.mv, Some(m) if m.source.is_gpr())
    }

    /// True when the move transports a program constant.
    pub fn is_source_constant(&self) -> bool {
        matches!(&self.mv, Some(m) if m.source.is_immediate())
    }

    /// True when the move writes a general-purpose register.
    pub fn is_destination_variable(&self) -> bool {
        matches!(&self.mv, Some(m) if m.destination.is_gpr())
    }

    pub fn source_operation(&self) -> TtaResult<OpIdx> {
        self.src_op.ok_or_else(|| {
            Error::invalid_data("move node source is not an operation")
        })
    }

    pub fn destination_operation(&self) -> TtaResult<OpIdx> {
        self.dst_op.ok_or_else(|| {
            Error::invalid_data("move node destination is not an operation")
        })
    }

    /// True when this node and the other belong to a common operation.
    pub fn in_same_operation(&self, other: &MoveNode) -> bool {
        if self.is_register_move() || other.is_register_move() {
            return false;
        }
        // bypass moves force us to consider both ends of each node
        let mine = [self.src_op, self.dst_op];
        other
            .src_op
            .iter()
            .chain(other.dst_op.iter())
            .any(|op| mine.contains(&Some(*op)))
    }

    /// True when a cycle is assigned to the node.
    pub fn is_placed(&self) -> bool {
        self.placed
    }

    /// The cycle the node is placed in.
    pub fn cycle(&self) -> TtaResult<Cycle> {
        if !self.placed {
            return Err(Error::invalid_data("move node was not placed yet"));
        }
        Ok(self.cycle)
    }

    /// Place the node. Re-placing at a different cycle without unplacing
    /// first is an error.
    pub fn set_cycle(&mut self, cycle: Cycle) -> TtaResult<()> {
        if self.placed && self.cycle != cycle {
            return Err(Error::invalid_data(format!(
                "move node is already placed in cycle {}",
                self.cycle
            )));
        }
        self.cycle = cycle;
        self.placed = true;
        Ok(())
    }

    pub fn unset_cycle(&mut self) -> TtaResult<()> {
        if !self.placed {
            return Err(Error::invalid_data("move node is not placed"));
        }
        self.cycle = 0;
        self.placed = false;
        Ok(())
    }

    /// True when every machine part the transport needs is bound: the bus,
    /// and a concrete port for each register terminal.
    pub fn is_assigned(&self) -> bool {
        match &self.mv {
            None => false,
            Some(m) => {
                m.bus.is_some()
                    && !matches!(
                        m.source,
                        Terminal::Register { port: None, .. }
                    )
                    && !matches!(
                        m.destination,
                        Terminal::Register { port: None, .. }
                    )
            }
        }
    }

    /// Placed and fully resource-assigned.
    pub fn is_scheduled(&self) -> bool {
        self.is_assigned() && self.is_placed()
    }
}

/// The moves realizing one hardware operation invocation.
#[derive(Debug, Clone)]
pub struct ProgramOperation {
    pub name: Id,
    inputs: Vec<NodeIdx>,
    outputs: Vec<NodeIdx>,
}

impl ProgramOperation {
    pub fn input_move_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn input_move(&self, i: usize) -> NodeIdx {
        self.inputs[i]
    }

    pub fn input_moves(&self) -> &[NodeIdx] {
        &self.inputs
    }

    pub fn output_moves(&self) -> &[NodeIdx] {
        &self.outputs
    }
}

/// Kind of a data-dependence edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepKind {
    /// Read after write.
    Raw,
    /// Write after read.
    War,
    /// Write after write.
    Waw,
    /// Intra-operation ordering (operand before trigger, trigger before
    /// result).
    Operation,
}

/// A basic block's move nodes, program operations and data dependences.
#[derive(Debug, Clone, Default)]
pub struct ProgramGraph {
    nodes: IndexedMap<NodeIdx, MoveNode>,
    ops: IndexedMap<OpIdx, ProgramOperation>,
    deps: DiGraph<NodeIdx, DepKind>,
    graph_ix: Vec<NodeIndex>,
}

impl ProgramGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, idx: NodeIdx) -> &MoveNode {
        &self.nodes[idx]
    }

    pub fn node_mut(&mut self, idx: NodeIdx) -> &mut MoveNode {
        &mut self.nodes[idx]
    }

    pub fn operation(&self, idx: OpIdx) -> &ProgramOperation {
        &self.ops[idx]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeIdx, &MoveNode)> {
        self.nodes.iter()
    }

    pub fn operations(
        &self,
    ) -> impl Iterator<Item = (OpIdx, &ProgramOperation)> {
        self.ops.iter()
    }

    fn push_node(&mut self, node: MoveNode) -> NodeIdx {
        let idx = self.nodes.push(node);
        let gix = self.deps.add_node(idx);
        self.graph_ix.push(gix);
        idx
    }

    /// Add a move that belongs to no operation.
    pub fn add_move(&mut self, mv: Move) -> NodeIdx {
        self.push_node(MoveNode::new(Some(mv)))
    }

    /// Add an entry/exit marker node.
    pub fn add_marker(&mut self) -> NodeIdx {
        self.push_node(MoveNode::new(None))
    }

    pub fn add_operation(&mut self, name: impl Into<Id>) -> OpIdx {
        self.ops.push(ProgramOperation {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        })
    }

    /// Add a move writing an operand of the given operation.
    pub fn add_input_move(&mut self, op: OpIdx, mv: Move) -> NodeIdx {
        let idx = self.add_move(mv);
        self.nodes[idx].dst_op = Some(op);
        self.ops[op].inputs.push(idx);
        idx
    }

    /// Add a move reading a result of the given operation.
    pub fn add_output_move(&mut self, op: OpIdx, mv: Move) -> NodeIdx {
        let idx = self.add_move(mv);
        self.nodes[idx].src_op = Some(op);
        self.ops[op].outputs.push(idx);
        idx
    }

    /// Turn an existing move into a bypass by also making it read the
    /// given operation's result.
    pub fn set_source_operation(&mut self, node: NodeIdx, op: OpIdx) {
        self.nodes[node].src_op = Some(op);
        self.ops[op].outputs.push(node);
    }

    pub fn add_dependence(
        &mut self,
        from: NodeIdx,
        to: NodeIdx,
        kind: DepKind,
    ) {
        let _ = self.deps.add_edge(
            self.graph_ix[from.index()],
            self.graph_ix[to.index()],
            kind,
        );
    }

    /// Nodes this node depends on, with the dependence kinds.
    pub fn predecessors(
        &self,
        node: NodeIdx,
    ) -> impl Iterator<Item = (NodeIdx, DepKind)> + '_ {
        self.deps
            .edges_directed(
                self.graph_ix[node.index()],
                petgraph::Direction::Incoming,
            )
            .map(|e| (self.deps[e.source()], *e.weight()))
    }

    /// A topological order of the nodes, for driver code and tests. Fails
    /// when the dependence graph has a cycle.
    pub fn topological_order(&self) -> TtaResult<Vec<NodeIdx>> {
        petgraph::algo::toposort(&self.deps, None)
            .map(|order| {
                order.into_iter().map(|ix| self.deps[ix]).collect_vec()
            })
            .map_err(|_| {
                Error::invalid_data("data dependence graph has a cycle")
            })
    }

    /// The scheduled input move of the operation whose destination port
    /// triggers, if any.
    pub fn triggering_move(
        &self,
        op: OpIdx,
        machine: &Machine,
    ) -> Option<NodeIdx> {
        self.ops[op].inputs.iter().copied().find(|&n| {
            let node = &self.nodes[n];
            matches!(
                &node.mv,
                Some(m) if m.destination.is_triggering(machine)
            )
        })
    }

    /// The earliest cycle the given result move can be read, derived from
    /// the trigger's scheduled cycle plus the per-output latency of the
    /// hardware operation. `None` while the trigger is not scheduled yet.
    pub fn earliest_result_read_cycle(
        &self,
        node: NodeIdx,
        machine: &Machine,
    ) -> TtaResult<Option<Cycle>> {
        let n = &self.nodes[node];
        let op = n.source_operation().map_err(|_| {
            Error::invalid_data("not a result read move")
        })?;
        let Some(trigger) = self.triggering_move(op, machine) else {
            return Ok(None);
        };
        let trig_node = &self.nodes[trigger];
        if !trig_node.is_scheduled() {
            return Ok(None);
        }

        // find the latency of the operation output we are reading
        let Some(Move {
            destination: Terminal::FuPort { port, .. },
            ..
        }) = &trig_node.mv
        else {
            return Ok(None);
        };
        let PortOwner::Fu(fu) = machine.port(*port).unit else {
            return Err(Error::invalid_data(
                "triggering move does not write a function unit",
            ));
        };
        let op_name = self.ops[op].name;
        let hwop =
            machine.function_unit(fu).operation(op_name).ok_or_else(|| {
                Error::not_found(format!(
                    "operation {} is not implemented in {}",
                    op_name,
                    machine.function_unit(fu).name
                ))
            })?;

        let Some(Move {
            source: Terminal::FuPort { operand, .. },
            ..
        }) = &n.mv
        else {
            return Err(Error::invalid_data(
                "result read source is not a function unit port",
            ));
        };
        Ok(Some(trig_node.cycle()? + hwop.latency(*operand)?))
    }

    /// Duplicate a node: fresh arena entry, same move and operation
    /// memberships, placement cleared.
    pub fn copy_node(&mut self, node: NodeIdx) -> NodeIdx {
        let template = &self.nodes[node];
        let mut copied = MoveNode::new(template.mv.clone());
        copied.src_op = template.src_op;
        copied.dst_op = template.dst_op;
        let idx = self.push_node(copied);
        if let Some(op) = self.nodes[idx].src_op {
            self.ops[op].outputs.push(idx);
        }
        if let Some(op) = self.nodes[idx].dst_op {
            self.ops[op].inputs.push(idx);
        }
        idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg(rf: u32, index: u32) -> Terminal {
        Terminal::Register {
            rf: RfIdx::from(rf as usize),
            index,
            port: None,
        }
    }

    #[test]
    fn placement_invariants() {
        let mut graph = ProgramGraph::new();
        let n = graph.add_move(Move::new(reg(0, 1), reg(0, 2)));
        assert!(graph.node(n).cycle().is_err());

        graph.node_mut(n).set_cycle(4).unwrap();
        assert_eq!(graph.node(n).cycle().unwrap(), 4);
        // same cycle is idempotent, a different cycle is rejected
        graph.node_mut(n).set_cycle(4).unwrap();
        assert!(graph.node_mut(n).set_cycle(5).is_err());

        graph.node_mut(n).unset_cycle().unwrap();
        assert!(graph.node_mut(n).unset_cycle().is_err());
    }

    #[test]
    fn classification() {
        let mut graph = ProgramGraph::new();
        let op = graph.add_operation("add");
        let operand = graph.add_input_move(
            op,
            Move::new(
                reg(0, 1),
                Terminal::FuPort {
                    port: PortIdx::from(0usize),
                    operation: Some(Id::new("add")),
                    operand: 0,
                },
            ),
        );
        let result = graph.add_output_move(
            op,
            Move::new(
                Terminal::FuPort {
                    port: PortIdx::from(1usize),
                    operation: Some(Id::new("add")),
                    operand: 0,
                },
                reg(0, 2),
            ),
        );
        let copy = graph.add_move(Move::new(reg(0, 3), reg(0, 4)));

        assert!(graph.node(operand).is_destination_operation());
        assert!(!graph.node(operand).is_source_operation());
        assert!(graph.node(result).is_source_operation());
        assert!(graph.node(copy).is_register_move());
        assert!(
            graph
                .node(operand)
                .in_same_operation(graph.node(result))
        );
        assert!(!graph.node(copy).in_same_operation(graph.node(operand)));
    }

    #[test]
    fn marker_nodes_are_not_moves() {
        let mut graph = ProgramGraph::new();
        let entry = graph.add_marker();
        assert!(!graph.node(entry).is_move());
        assert!(!graph.node(entry).is_register_move());
        assert!(graph.node(entry).mv().is_err());
    }

    #[test]
    fn copy_preserves_operation_membership() {
        let mut graph = ProgramGraph::new();
        let op = graph.add_operation("add");
        let result = graph.add_output_move(
            op,
            Move::new(
                Terminal::FuPort {
                    port: PortIdx::from(0usize),
                    operation: Some(Id::new("add")),
                    operand: 0,
                },
                reg(0, 2),
            ),
        );
        graph.node_mut(result).set_cycle(3).unwrap();

        let dup = graph.copy_node(result);
        assert!(graph.node(dup).is_source_operation());
        assert!(!graph.node(dup).is_placed());
        assert_eq!(graph.operation(op).output_moves().len(), 2);
    }
}

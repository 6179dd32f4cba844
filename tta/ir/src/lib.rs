//! Program and target-machine representations consumed by the scheduler.
//!
//! The [machine] module describes the datapath of the target processor:
//! buses and their segments, direction-typed sockets, function-unit and
//! register-file ports, and the per-operation latency and pipeline
//! resource-usage tables. The [program] module carries the code being
//! scheduled: terminals, moves, move nodes and the program operations that
//! group them, linked into a data-dependence graph.
pub mod machine;
pub mod program;

pub use machine::{
    Bus, BusIdx, FuIdx, FunctionUnit, HwOperation, Machine, Port, PortIdx,
    PortOwner, RegisterFile, RfIdx, Segment, SegmentIdx, Socket,
    SocketDirection, SocketIdx, bits_needed,
};
pub use program::{
    Cycle, DepKind, Move, MoveNode, NodeIdx, OpIdx, ProgramGraph,
    ProgramOperation, Terminal,
};

//! Behavior of the execution pipeline resource in isolation: templates,
//! operand-range exclusivity, opcode persistence and result buffering.
mod common;

use common::{add_operation, fixture};
use tta_ir::{Cycle, NodeIdx, ProgramGraph};
use tta_sched::resources::ExecutionPipeline;
use tta_utils::Id;

/// A pipeline seeded the way the input FU broker seeds it.
fn pipeline_of(fx: &common::Fixture) -> ExecutionPipeline {
    let fu = fx.machine.function_unit(fx.alu);
    let mut pipe =
        ExecutionPipeline::new(fx.alu, fu.pipeline_resource_count, fu.maximal_latency());
    for op in &fu.operations {
        pipe.add_operation(op.name);
        for &(offset, line) in &op.resource_use {
            pipe.set_resource_use(op.name, offset, line).unwrap();
        }
    }
    pipe
}

/// Place a node and pretend the socket and bus brokers already ran, so
/// the node counts as scheduled for range and latency queries.
fn place(prog: &mut ProgramGraph, fx: &common::Fixture, node: NodeIdx, cycle: Cycle) {
    prog.node_mut(node).set_cycle(cycle).unwrap();
    let mv = prog.node_mut(node).mv_mut().unwrap();
    mv.bus = Some(fx.bus0);
    if let tta_ir::Terminal::Register { port, .. } = &mut mv.source {
        *port = Some(fx.rf_out);
    }
    if let tta_ir::Terminal::Register { port, .. } = &mut mv.destination {
        *port = Some(fx.rf_in);
    }
}

#[test]
fn conflicting_issue_is_rejected_and_freed() {
    common::init_logs();
    let fx = fixture();
    let mut prog = ProgramGraph::new();
    let (_, _, trig1, _) = add_operation(&mut prog, &fx, "add", 1, 2, 3);
    let (_, _, trig2, _) = add_operation(&mut prog, &fx, "add", 4, 5, 6);
    let pipe = &mut pipeline_of(&fx);

    place(&mut prog, &fx, trig1, 5);
    pipe.assign(5, trig1, false, &prog, &fx.machine).unwrap();
    assert!(pipe.is_in_use(5));
    assert_eq!(pipe.size(), 6);

    // a second ADD of a different operation cannot issue in the same
    // cycle, but can one cycle later
    assert!(
        !pipe
            .can_assign(5, trig2, false, true, &prog, &fx.machine)
            .unwrap()
    );
    assert!(
        pipe.can_assign(6, trig2, false, true, &prog, &fx.machine)
            .unwrap()
    );

    pipe.unassign(5, trig1, false, &prog, &fx.machine).unwrap();
    assert_eq!(pipe.size(), 0);
    assert_eq!(pipe.highest_known_cycle(), None);
    for c in 0..10 {
        assert!(!pipe.is_in_use(c));
        assert!(pipe.is_available(c));
    }
    // now the same cycle is free again
    assert!(
        pipe.can_assign(5, trig2, false, true, &prog, &fx.machine)
            .unwrap()
    );
}

#[test]
fn unassign_requires_matching_cycle() {
    let fx = fixture();
    let mut prog = ProgramGraph::new();
    let (_, _, trig, _) = add_operation(&mut prog, &fx, "add", 1, 2, 3);
    let pipe = &mut pipeline_of(&fx);

    place(&mut prog, &fx, trig, 1);
    pipe.assign(1, trig, false, &prog, &fx.machine).unwrap();
    assert!(pipe.unassign(2, trig, false, &prog, &fx.machine).is_err());
    pipe.unassign(1, trig, false, &prog, &fx.machine).unwrap();
}

#[test]
fn operand_range_is_exclusive_to_one_operation() {
    let fx = fixture();
    let mut prog = ProgramGraph::new();
    let (_, operand1, trig1, _) = add_operation(&mut prog, &fx, "add", 1, 2, 3);
    let (_, operand2, _, _) = add_operation(&mut prog, &fx, "add", 4, 5, 6);
    let pipe = &mut pipeline_of(&fx);

    // operands of the same operation at cycles 2 and 5 claim the whole
    // range in between
    place(&mut prog, &fx, operand1, 2);
    pipe.assign(2, operand1, false, &prog, &fx.machine).unwrap();
    place(&mut prog, &fx, trig1, 5);
    pipe.assign(5, trig1, false, &prog, &fx.machine).unwrap();

    // a different operation cannot write an operand inside the range
    assert!(
        !pipe
            .can_assign(3, operand2, false, false, &prog, &fx.machine)
            .unwrap()
    );
    // outside the range it can
    assert!(
        pipe.can_assign(7, operand2, false, false, &prog, &fx.machine)
            .unwrap()
    );
    // the committing path reports the same conflict as an error
    prog.node_mut(operand2).set_cycle(3).unwrap();
    assert!(pipe.assign(3, operand2, false, &prog, &fx.machine).is_err());
}

#[test]
fn find_range_brackets_the_request_cycle() {
    let fx = fixture();
    let mut prog = ProgramGraph::new();
    let (_, operand, trig, _) = add_operation(&mut prog, &fx, "add", 1, 2, 3);
    let pipe = &mut pipeline_of(&fx);

    // no sibling scheduled: collapses to the request cycle
    assert_eq!(pipe.find_range(4, trig, &prog).unwrap(), (4, 4));

    place(&mut prog, &fx, operand, 2);
    place(&mut prog, &fx, trig, 8);
    // siblings at 2 and 8 bracket a request at 5
    let (first, last) = pipe.find_range(5, trig, &prog).unwrap();
    assert_eq!((first, last), (2, 8));
    assert!(first <= 5 && 5 <= last);
}

#[test]
fn opcode_persists_until_the_next_opcode_setting_move() {
    let fx = fixture();
    let mut prog = ProgramGraph::new();
    let (_, _, trig1, _) = add_operation(&mut prog, &fx, "add", 1, 2, 3);
    let pipe = &mut pipeline_of(&fx);

    // a non-opcode-setting trigger with no opcode ever set is a hard error
    let op2 = prog.add_operation("add");
    let plain_trigger = prog.add_input_move(
        op2,
        tta_ir::Move::new(
            common::reg(fx.rf, 4),
            tta_ir::Terminal::FuPort {
                port: fx.alu_trig2,
                operation: None,
                operand: 1,
            },
        ),
    );
    assert!(
        pipe.can_assign(3, plain_trigger, false, true, &prog, &fx.machine)
            .is_err()
    );

    // set the opcode at cycle 2, then trigger without an opcode at 3: the
    // recorded ADD is resolved and its template (busy at issue) lands at
    // cycle 3, not SUB's offset-one line at 4
    place(&mut prog, &fx, trig1, 2);
    pipe.assign(2, trig1, false, &prog, &fx.machine).unwrap();
    assert!(
        pipe.can_assign(3, plain_trigger, false, true, &prog, &fx.machine)
            .unwrap()
    );
    place(&mut prog, &fx, plain_trigger, 3);
    pipe.assign(3, plain_trigger, false, &prog, &fx.machine)
        .unwrap();
    assert_eq!(pipe.size(), 4);
}

#[test]
fn results_are_single_buffered() {
    let fx = fixture();
    let mut prog = ProgramGraph::new();
    let (_, _, trig1, read1) = add_operation(&mut prog, &fx, "add", 1, 2, 3);
    let (_, _, trig2, read2) = add_operation(&mut prog, &fx, "add", 4, 5, 6);
    let pipe = &mut pipeline_of(&fx);

    // triggers at 0 and 1: results land at 2 and 3
    place(&mut prog, &fx, trig1, 0);
    pipe.assign(0, trig1, false, &prog, &fx.machine).unwrap();
    place(&mut prog, &fx, trig2, 1);
    pipe.assign(1, trig2, false, &prog, &fx.machine).unwrap();

    // reading before the result is ready is impossible
    assert!(
        !pipe
            .can_assign(1, read1, true, false, &prog, &fx.machine)
            .unwrap()
    );
    // at the ready cycle it is fine
    assert!(
        pipe.can_assign(2, read1, true, false, &prog, &fx.machine)
            .unwrap()
    );

    // commit the second operation's read at 3
    place(&mut prog, &fx, read2, 3);
    pipe.assign(3, read2, true, &prog, &fx.machine).unwrap();

    // the first result is overwritten by the second at cycle 3, so a
    // read at or after that is rejected
    assert!(
        !pipe
            .can_assign(3, read1, true, false, &prog, &fx.machine)
            .unwrap()
    );
    assert!(
        !pipe
            .can_assign(5, read1, true, false, &prog, &fx.machine)
            .unwrap()
    );
    assert!(
        pipe.can_assign(2, read1, true, false, &prog, &fx.machine)
            .unwrap()
    );

    // undoing the read restores the first operation's full window
    pipe.unassign(3, read2, true, &prog, &fx.machine).unwrap();
    assert!(
        pipe.can_assign(5, read1, true, false, &prog, &fx.machine)
            .unwrap()
    );
}

#[test]
fn unknown_operations_are_rejected() {
    let fx = fixture();
    let mut prog = ProgramGraph::new();
    let (_, _, trig, _) = add_operation(&mut prog, &fx, "xor", 1, 2, 3);
    let pipe = &mut pipeline_of(&fx);

    // canAssign treats an unimplemented opcode as plain unavailability
    assert!(
        !pipe
            .can_assign(0, trig, false, true, &prog, &fx.machine)
            .unwrap()
    );
    // the committing path insists loudly
    prog.node_mut(trig).set_cycle(0).unwrap();
    assert!(pipe.assign(0, trig, false, &prog, &fx.machine).is_err());
}

#[test]
fn template_registration_is_validated() {
    let fx = fixture();
    let mut pipe = pipeline_of(&fx);
    assert!(pipe.set_resource_use(Id::new("add"), 2, 0).is_err());
    assert!(pipe.set_resource_use(Id::new("add"), 0, 1).is_err());
}

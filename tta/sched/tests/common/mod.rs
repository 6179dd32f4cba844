//! A small two-bus, one-ALU target and program builders shared by the
//! integration tests.
use tta_ir::{
    BusIdx, FuIdx, Machine, Move, NodeIdx, OpIdx, PortIdx, ProgramGraph,
    RfIdx, SocketDirection, Terminal,
};
use tta_utils::Id;

/// Route `log` output through the test harness when `RUST_LOG` is set.
pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct Fixture {
    pub machine: Machine,
    pub bus0: BusIdx,
    pub bus1: BusIdx,
    pub rf: RfIdx,
    pub rf_in: PortIdx,
    pub rf_in2: PortIdx,
    pub rf_out: PortIdx,
    pub alu: FuIdx,
    pub alu_in: PortIdx,
    pub alu_trig: PortIdx,
    /// Triggering but not opcode-setting, for opcode-resolution tests.
    pub alu_trig2: PortIdx,
    pub alu_out: PortIdx,
}

/// Two buses with one segment each, a register file with one read and one
/// write port, and an ALU with `add`/`sub` of latency 2 occupying one
/// internal resource line at the issue cycle (`sub` one cycle later).
pub fn fixture() -> Fixture {
    let mut m = Machine::new();
    let bus0 = m.add_bus("b0", 32, 8).unwrap();
    let bus1 = m.add_bus("b1", 32, 8).unwrap();
    let seg0 = m.add_segment("b0.s0", bus0).unwrap();
    let seg1 = m.add_segment("b1.s0", bus1).unwrap();

    let alu_i1 = m.add_socket("alu.i1", SocketDirection::Input).unwrap();
    let alu_it = m.add_socket("alu.it", SocketDirection::Input).unwrap();
    let alu_it2 = m.add_socket("alu.it2", SocketDirection::Input).unwrap();
    let alu_o = m.add_socket("alu.o", SocketDirection::Output).unwrap();
    let rf_i = m.add_socket("rf.i", SocketDirection::Input).unwrap();
    let rf_i2 = m.add_socket("rf.i2", SocketDirection::Input).unwrap();
    let rf_o = m.add_socket("rf.o", SocketDirection::Output).unwrap();
    for s in [alu_i1, alu_it, alu_it2, alu_o, rf_i, rf_i2, rf_o] {
        m.attach_socket(s, seg0).unwrap();
        m.attach_socket(s, seg1).unwrap();
    }

    let rf = m.add_register_file("rf", 8, 32).unwrap();
    let rf_in = m.add_rf_port(rf, "rf.in", Some(rf_i), None).unwrap();
    let rf_in2 = m.add_rf_port(rf, "rf.in2", Some(rf_i2), None).unwrap();
    let rf_out = m.add_rf_port(rf, "rf.out", None, Some(rf_o)).unwrap();

    let alu = m.add_function_unit("alu", 1).unwrap();
    let alu_in = m
        .add_fu_port(alu, "alu.in1", Some(alu_i1), None, false, false)
        .unwrap();
    let alu_trig = m
        .add_fu_port(alu, "alu.t", Some(alu_it), None, true, true)
        .unwrap();
    let alu_trig2 = m
        .add_fu_port(alu, "alu.t2", Some(alu_it2), None, true, false)
        .unwrap();
    let alu_out = m
        .add_fu_port(alu, "alu.out", None, Some(alu_o), false, false)
        .unwrap();
    m.add_operation(alu, "add", [2], vec![(0, 0)]).unwrap();
    m.add_operation(alu, "sub", [2], vec![(1, 0)]).unwrap();

    Fixture {
        machine: m,
        bus0,
        bus1,
        rf,
        rf_in,
        rf_in2,
        rf_out,
        alu,
        alu_in,
        alu_trig,
        alu_trig2,
        alu_out,
    }
}

pub fn reg(rf: RfIdx, index: u32) -> Terminal {
    Terminal::Register {
        rf,
        index,
        port: None,
    }
}

pub fn fu_port(port: PortIdx, operation: &str, operand: u32) -> Terminal {
    Terminal::FuPort {
        port,
        operation: Some(Id::new(operation)),
        operand,
    }
}

/// The three moves of one `name r[a], r[b] -> r[c]` invocation: operand,
/// trigger, result read.
pub fn add_operation(
    prog: &mut ProgramGraph,
    fx: &Fixture,
    name: &str,
    a: u32,
    b: u32,
    c: u32,
) -> (OpIdx, NodeIdx, NodeIdx, NodeIdx) {
    let op = prog.add_operation(name);
    let operand = prog
        .add_input_move(op, Move::new(reg(fx.rf, a), fu_port(fx.alu_in, name, 0)));
    let trigger = prog.add_input_move(
        op,
        Move::new(reg(fx.rf, b), fu_port(fx.alu_trig, name, 1)),
    );
    let result = prog.add_output_move(
        op,
        Move::new(fu_port(fx.alu_out, name, 0), reg(fx.rf, c)),
    );
    (op, operand, trigger, result)
}

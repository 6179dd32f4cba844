//! Socket brokers.
//!
//! One broker instance manages the input sockets (feeding unit ports from
//! buses), another the output sockets (driving buses from unit ports); the
//! two differ only in which end of the move they look at, so they share
//! one implementation parameterized by direction.
use linked_hash_map::LinkedHashMap;
use log::trace;
use tta_ir::{
    Cycle, Machine, NodeIdx, PortIdx, PortOwner, ProgramGraph, RfIdx,
    SocketDirection, SocketIdx, Terminal,
};
use tta_utils::{Error, TtaResult};

use super::{ResourceBroker, ResourceMap, ResourceSet};
use crate::resources::{ResourceIdx, ResourceKind, ResourcePool, SocketUse};

/// Broker for the sockets of one direction.
#[derive(Debug)]
pub struct SocketBroker {
    direction: SocketDirection,
    resource_of: LinkedHashMap<SocketIdx, ResourceIdx>,
    assigned: LinkedHashMap<NodeIdx, ResourceIdx>,
}

impl SocketBroker {
    pub fn input() -> Self {
        Self::new(SocketDirection::Input)
    }

    pub fn output() -> Self {
        Self::new(SocketDirection::Output)
    }

    fn new(direction: SocketDirection) -> Self {
        Self {
            direction,
            resource_of: LinkedHashMap::new(),
            assigned: LinkedHashMap::new(),
        }
    }

    /// The end of the move this broker binds.
    fn terminal<'p>(
        &self,
        prog: &'p ProgramGraph,
        node: NodeIdx,
    ) -> TtaResult<&'p Terminal> {
        let mv = prog.node(node).mv()?;
        Ok(match self.direction {
            SocketDirection::Input => &mv.destination,
            SocketDirection::Output => &mv.source,
        })
    }

    /// The socket a port presents in this broker's direction.
    fn socket_of_port(
        &self,
        machine: &Machine,
        port: PortIdx,
    ) -> Option<SocketIdx> {
        let p = machine.port(port);
        match self.direction {
            SocketDirection::Input => p.input_socket,
            SocketDirection::Output => p.output_socket,
        }
    }

    fn socket_of_resource(&self, res: ResourceIdx) -> Option<SocketIdx> {
        self.resource_of
            .iter()
            .find(|&(_, &r)| r == res)
            .map(|(&s, _)| s)
    }

    /// The register-file port reachable through the given socket.
    fn rf_port_through(
        &self,
        machine: &Machine,
        socket: SocketIdx,
        rf: RfIdx,
    ) -> Option<PortIdx> {
        machine.socket(socket).ports.iter().copied().find(|&p| {
            machine.port(p).unit == PortOwner::Rf(rf)
                && self.socket_of_port(machine, p) == Some(socket)
        })
    }
}

impl ResourceBroker for SocketBroker {
    fn name(&self) -> &'static str {
        match self.direction {
            SocketDirection::Input => "input socket broker",
            SocketDirection::Output => "output socket broker",
        }
    }

    fn is_applicable(
        &self,
        prog: &ProgramGraph,
        _machine: &Machine,
        node: NodeIdx,
    ) -> bool {
        match self.terminal(prog, node) {
            Ok(t) => t.is_fu_port() || t.is_gpr(),
            Err(_) => false,
        }
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
        let mut set = ResourceSet::new();
        match self.terminal(prog, node)? {
            Terminal::FuPort { port, .. } => {
                // the socket is implied by the FU port the move names
                let socket =
                    self.socket_of_port(machine, *port).ok_or_else(|| {
                        Error::not_found(format!(
                            "port {} has no {} socket",
                            machine.port(*port).name,
                            direction_word(self.direction),
                        ))
                    })?;
                let res = self.resource_of.get(&socket).copied().ok_or_else(
                    || Error::not_found("socket has no resource"),
                )?;
                if pool.get(res).is_available(cycle) {
                    set.insert(res);
                }
            }
            Terminal::Register { rf, .. } => {
                // any register-file port on a socket with spare capacity
                for &port in &machine.register_file(*rf).ports {
                    let Some(socket) = self.socket_of_port(machine, port)
                    else {
                        continue;
                    };
                    let Some(&res) = self.resource_of.get(&socket) else {
                        continue;
                    };
                    if pool.get(res).is_available(cycle) {
                        set.insert(res);
                    }
                }
            }
            Terminal::Immediate(_) => {}
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
        if !self.is_applicable(prog, machine, node) {
            return Err(Error::internal(
                "broker not capable of assigning resources to node",
            ));
        }
        let socket = self.socket_of_resource(res).ok_or_else(|| {
            Error::invalid_data("broker does not contain given resource")
        })?;

        if let Terminal::Register { rf, .. } = self.terminal(prog, node)? {
            // rewrite the register terminal to the concrete port found
            // through the socket
            let rf = *rf;
            let port =
                self.rf_port_through(machine, socket, rf).ok_or_else(
                    || {
                        Error::invalid_data(
                            "broker does not have the necessary port \
                             registered",
                        )
                    },
                )?;
            let mv = prog.node_mut(node).mv_mut()?;
            let terminal = match self.direction {
                SocketDirection::Input => &mut mv.destination,
                SocketDirection::Output => &mut mv.source,
            };
            if let Terminal::Register { port: bound, .. } = terminal {
                *bound = Some(port);
            }
        }

        trace!(
            "{}: socket {} -> node {:?} in cycle {}",
            self.name(),
            pool.get(res).name(),
            node,
            cycle
        );
        pool.assign(res, cycle)?;
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
        // the terminal must still point through the socket we booked
        let current = self
            .terminal(prog, node)?
            .port()
            .and_then(|p| self.socket_of_port(machine, p))
            .and_then(|s| self.resource_of.get(&s).copied());
        if current != Some(res) {
            return Err(Error::internal(format!(
                "{}: assigned resource changed",
                self.name()
            )));
        }
        pool.unassign(res, prog.node(node).cycle()?)?;

        let mv = prog.node_mut(node).mv_mut()?;
        let terminal = match self.direction {
            SocketDirection::Input => &mut mv.destination,
            SocketDirection::Output => &mut mv.source,
        };
        if let Terminal::Register { port, .. } = terminal {
            *port = None;
        }
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
        for (idx, socket) in machine.sockets() {
            if socket.direction != self.direction {
                continue;
            }
            let kind = match self.direction {
                SocketDirection::Input => {
                    ResourceKind::InputSocket(SocketUse::default())
                }
                SocketDirection::Output => {
                    ResourceKind::OutputSocket(SocketUse::default())
                }
            };
            let res = pool.add(socket.name, kind);
            let _ = self.resource_of.insert(idx, res);
            map.bind_socket(idx, res);
        }
        Ok(())
    }

    fn setup_resource_links(
        &mut self,
        machine: &Machine,
        pool: &mut ResourcePool,
        map: &ResourceMap,
    ) -> TtaResult<()> {
        for (&socket, &res) in self.resource_of.iter() {
            for &port in &machine.socket(socket).ports {
                if let PortOwner::Fu(fu) = machine.port(port).unit {
                    let pipe = map.fu_pipeline_resource(fu)?;
                    pool.get_mut(res).add_to_related_group(0, pipe);
                }
            }
            for &segment in &machine.socket(socket).segments {
                let seg_res = map.segment_resource(segment)?;
                pool.get_mut(res).add_to_related_group(1, seg_res);
            }
        }
        Ok(())
    }
}

fn direction_word(direction: SocketDirection) -> &'static str {
    match direction {
        SocketDirection::Input => "input",
        SocketDirection::Output => "output",
    }
}

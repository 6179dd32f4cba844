//! Datapath description of the target processor.
//!
//! The machine model is an arena of records addressed by typed handles.
//! It is built programmatically by whatever loads the architecture
//! description; the scheduler only reads it. The `add_*` methods validate
//! topology as the model is wired together, so a malformed description is
//! rejected at construction time rather than surfacing as a mysterious
//! scheduling failure later.
use smallvec::SmallVec;
use tta_utils::{Error, Id, IndexedMap, TtaResult, impl_index};

/// Handle of a [Bus].
#[derive(Debug, Eq, Copy, Clone, PartialEq, Hash, PartialOrd, Ord)]
pub struct BusIdx(u32);
impl_index!(BusIdx);

/// Handle of a [Segment].
#[derive(Debug, Eq, Copy, Clone, PartialEq, Hash, PartialOrd, Ord)]
pub struct SegmentIdx(u32);
impl_index!(SegmentIdx);

/// Handle of a [Socket].
#[derive(Debug, Eq, Copy, Clone, PartialEq, Hash, PartialOrd, Ord)]
pub struct SocketIdx(u32);
impl_index!(SocketIdx);

/// Handle of a [Port].
#[derive(Debug, Eq, Copy, Clone, PartialEq, Hash, PartialOrd, Ord)]
pub struct PortIdx(u32);
impl_index!(PortIdx);

/// Handle of a [FunctionUnit].
#[derive(Debug, Eq, Copy, Clone, PartialEq, Hash, PartialOrd, Ord)]
pub struct FuIdx(u32);
impl_index!(FuIdx);

/// Handle of a [RegisterFile].
#[derive(Debug, Eq, Copy, Clone, PartialEq, Hash, PartialOrd, Ord)]
pub struct RfIdx(u32);
impl_index!(RfIdx);

/// A transport bus. Moves are bound to one of its segments.
#[derive(Debug, Clone)]
pub struct Bus {
    pub name: Id,
    pub width: u32,
    /// Bits of inline immediate the bus can carry. Zero means the bus
    /// cannot transport constants directly.
    pub short_imm_width: u32,
    pub segments: Vec<SegmentIdx>,
}

/// One physical slice of a bus.
#[derive(Debug, Clone)]
pub struct Segment {
    pub name: Id,
    pub bus: BusIdx,
}

/// Direction of a socket, seen from the unit it serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketDirection {
    Input,
    Output,
}

/// A connection point multiplexing bus segments onto unit ports.
#[derive(Debug, Clone)]
pub struct Socket {
    pub name: Id,
    pub direction: SocketDirection,
    pub ports: Vec<PortIdx>,
    pub segments: Vec<SegmentIdx>,
}

/// The unit a port belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortOwner {
    Fu(FuIdx),
    Rf(RfIdx),
}

/// A unit port. Only function-unit ports may be triggering or
/// opcode-setting.
#[derive(Debug, Clone)]
pub struct Port {
    pub name: Id,
    pub unit: PortOwner,
    pub input_socket: Option<SocketIdx>,
    pub output_socket: Option<SocketIdx>,
    pub triggering: bool,
    pub opcode_setting: bool,
}

/// One operation a function unit implements: per-output latencies and the
/// pipeline resource lines the operation occupies relative to its issue
/// cycle. The resource-use table is the source data for the execution
/// pipeline templates the scheduler builds.
#[derive(Debug, Clone)]
pub struct HwOperation {
    pub name: Id,
    /// Latency per output operand, indexed by output position.
    pub latencies: SmallVec<[u32; 2]>,
    /// `(cycle_offset, resource_index)` pairs.
    pub resource_use: Vec<(u32, u32)>,
}

impl HwOperation {
    /// Latency of the given output operand.
    pub fn latency(&self, output_index: u32) -> TtaResult<u32> {
        self.latencies.get(output_index as usize).copied().ok_or_else(|| {
            Error::not_found(format!(
                "operation {} has no output operand {}",
                self.name, output_index
            ))
        })
    }

    /// Latency of the slowest output.
    pub fn maximal_latency(&self) -> u32 {
        self.latencies.iter().copied().max().unwrap_or(0)
    }
}

/// A function unit with its ports and supported operations.
#[derive(Debug, Clone)]
pub struct FunctionUnit {
    pub name: Id,
    pub ports: Vec<PortIdx>,
    pub operations: Vec<HwOperation>,
    /// Number of internal pipeline resource lines.
    pub pipeline_resource_count: u32,
}

impl FunctionUnit {
    pub fn operation(&self, name: Id) -> Option<&HwOperation> {
        self.operations.iter().find(|op| op.name == name)
    }

    /// Latency of the longest operation the unit supports.
    pub fn maximal_latency(&self) -> u32 {
        self.operations
            .iter()
            .map(HwOperation::maximal_latency)
            .max()
            .unwrap_or(0)
    }
}

/// A general-purpose register file.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    pub name: Id,
    pub size: u32,
    pub width: u32,
    pub ports: Vec<PortIdx>,
}

/// The whole datapath: arenas for every machine-part category.
#[derive(Debug, Clone, Default)]
pub struct Machine {
    buses: IndexedMap<BusIdx, Bus>,
    segments: IndexedMap<SegmentIdx, Segment>,
    sockets: IndexedMap<SocketIdx, Socket>,
    ports: IndexedMap<PortIdx, Port>,
    function_units: IndexedMap<FuIdx, FunctionUnit>,
    register_files: IndexedMap<RfIdx, RegisterFile>,
}

impl Machine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bus(&self, idx: BusIdx) -> &Bus {
        &self.buses[idx]
    }

    pub fn segment(&self, idx: SegmentIdx) -> &Segment {
        &self.segments[idx]
    }

    pub fn socket(&self, idx: SocketIdx) -> &Socket {
        &self.sockets[idx]
    }

    pub fn port(&self, idx: PortIdx) -> &Port {
        &self.ports[idx]
    }

    pub fn function_unit(&self, idx: FuIdx) -> &FunctionUnit {
        &self.function_units[idx]
    }

    pub fn register_file(&self, idx: RfIdx) -> &RegisterFile {
        &self.register_files[idx]
    }

    pub fn buses(&self) -> impl Iterator<Item = (BusIdx, &Bus)> {
        self.buses.iter()
    }

    pub fn segments(&self) -> impl Iterator<Item = (SegmentIdx, &Segment)> {
        self.segments.iter()
    }

    pub fn sockets(&self) -> impl Iterator<Item = (SocketIdx, &Socket)> {
        self.sockets.iter()
    }

    pub fn function_units(
        &self,
    ) -> impl Iterator<Item = (FuIdx, &FunctionUnit)> {
        self.function_units.iter()
    }

    pub fn register_files(
        &self,
    ) -> impl Iterator<Item = (RfIdx, &RegisterFile)> {
        self.register_files.iter()
    }

    pub fn fu_by_name(&self, name: Id) -> Option<FuIdx> {
        self.function_units
            .iter()
            .find(|(_, fu)| fu.name == name)
            .map(|(idx, _)| idx)
    }

    pub fn rf_by_name(&self, name: Id) -> Option<RfIdx> {
        self.register_files
            .iter()
            .find(|(_, rf)| rf.name == name)
            .map(|(idx, _)| idx)
    }

    pub fn socket_by_name(&self, name: Id) -> Option<SocketIdx> {
        self.sockets
            .iter()
            .find(|(_, s)| s.name == name)
            .map(|(idx, _)| idx)
    }

    pub fn add_bus(
        &mut self,
        name: impl Into<Id>,
        width: u32,
        short_imm_width: u32,
    ) -> TtaResult<BusIdx> {
        let name = name.into();
        if self.buses.values().any(|b| b.name == name) {
            return Err(Error::invalid_data(format!(
                "duplicate bus name {name}"
            )));
        }
        Ok(self.buses.push(Bus {
            name,
            width,
            short_imm_width,
            segments: Vec::new(),
        }))
    }

    pub fn add_segment(
        &mut self,
        name: impl Into<Id>,
        bus: BusIdx,
    ) -> TtaResult<SegmentIdx> {
        let name = name.into();
        if self.segments.values().any(|s| s.name == name) {
            return Err(Error::invalid_data(format!(
                "duplicate segment name {name}"
            )));
        }
        let idx = self.segments.push(Segment { name, bus });
        self.buses[bus].segments.push(idx);
        Ok(idx)
    }

    pub fn add_socket(
        &mut self,
        name: impl Into<Id>,
        direction: SocketDirection,
    ) -> TtaResult<SocketIdx> {
        let name = name.into();
        if self.sockets.values().any(|s| s.name == name) {
            return Err(Error::invalid_data(format!(
                "duplicate socket name {name}"
            )));
        }
        Ok(self.sockets.push(Socket {
            name,
            direction,
            ports: Vec::new(),
            segments: Vec::new(),
        }))
    }

    /// Connect a socket to a bus segment.
    pub fn attach_socket(
        &mut self,
        socket: SocketIdx,
        segment: SegmentIdx,
    ) -> TtaResult<()> {
        if self.sockets[socket].segments.contains(&segment) {
            return Err(Error::invalid_data(format!(
                "socket {} already attached to segment {}",
                self.sockets[socket].name, self.segments[segment].name
            )));
        }
        self.sockets[socket].segments.push(segment);
        Ok(())
    }

    pub fn add_function_unit(
        &mut self,
        name: impl Into<Id>,
        pipeline_resource_count: u32,
    ) -> TtaResult<FuIdx> {
        let name = name.into();
        if self.function_units.values().any(|fu| fu.name == name) {
            return Err(Error::invalid_data(format!(
                "duplicate function unit name {name}"
            )));
        }
        Ok(self.function_units.push(FunctionUnit {
            name,
            ports: Vec::new(),
            operations: Vec::new(),
            pipeline_resource_count,
        }))
    }

    pub fn add_register_file(
        &mut self,
        name: impl Into<Id>,
        size: u32,
        width: u32,
    ) -> TtaResult<RfIdx> {
        let name = name.into();
        if self.register_files.values().any(|rf| rf.name == name) {
            return Err(Error::invalid_data(format!(
                "duplicate register file name {name}"
            )));
        }
        Ok(self.register_files.push(RegisterFile {
            name,
            size,
            width,
            ports: Vec::new(),
        }))
    }

    /// Add a port to a function unit and wire it into its sockets.
    pub fn add_fu_port(
        &mut self,
        fu: FuIdx,
        name: impl Into<Id>,
        input_socket: Option<SocketIdx>,
        output_socket: Option<SocketIdx>,
        triggering: bool,
        opcode_setting: bool,
    ) -> TtaResult<PortIdx> {
        let name: Id = name.into();
        if opcode_setting && !triggering {
            return Err(Error::invalid_data(format!(
                "opcode-setting port {} of {} must trigger",
                name, self.function_units[fu].name
            )));
        }
        let idx = self.add_port(
            name,
            PortOwner::Fu(fu),
            input_socket,
            output_socket,
            triggering,
            opcode_setting,
        )?;
        self.function_units[fu].ports.push(idx);
        Ok(idx)
    }

    /// Add a port to a register file and wire it into its sockets.
    pub fn add_rf_port(
        &mut self,
        rf: RfIdx,
        name: impl Into<Id>,
        input_socket: Option<SocketIdx>,
        output_socket: Option<SocketIdx>,
    ) -> TtaResult<PortIdx> {
        let idx = self.add_port(
            name,
            PortOwner::Rf(rf),
            input_socket,
            output_socket,
            false,
            false,
        )?;
        self.register_files[rf].ports.push(idx);
        Ok(idx)
    }

    fn add_port(
        &mut self,
        name: impl Into<Id>,
        unit: PortOwner,
        input_socket: Option<SocketIdx>,
        output_socket: Option<SocketIdx>,
        triggering: bool,
        opcode_setting: bool,
    ) -> TtaResult<PortIdx> {
        let name = name.into();
        if let Some(s) = input_socket
            && self.sockets[s].direction != SocketDirection::Input
        {
            return Err(Error::invalid_data(format!(
                "port {} wired to {} which is not an input socket",
                name, self.sockets[s].name
            )));
        }
        if let Some(s) = output_socket
            && self.sockets[s].direction != SocketDirection::Output
        {
            return Err(Error::invalid_data(format!(
                "port {} wired to {} which is not an output socket",
                name, self.sockets[s].name
            )));
        }
        let idx = self.ports.push(Port {
            name,
            unit,
            input_socket,
            output_socket,
            triggering,
            opcode_setting,
        });
        if let Some(s) = input_socket {
            self.sockets[s].ports.push(idx);
        }
        if let Some(s) = output_socket {
            self.sockets[s].ports.push(idx);
        }
        Ok(idx)
    }

    /// Declare an operation on a function unit.
    ///
    /// `latencies` holds the latency of each output operand; the
    /// resource-use table holds `(cycle_offset, resource_index)` pairs,
    /// each offset relative to the issue cycle. Offsets and indices are
    /// validated against the operation's latency span and the unit's
    /// resource-line count.
    pub fn add_operation(
        &mut self,
        fu: FuIdx,
        name: impl Into<Id>,
        latencies: impl IntoIterator<Item = u32>,
        resource_use: Vec<(u32, u32)>,
    ) -> TtaResult<()> {
        let name = name.into();
        let unit = &self.function_units[fu];
        if unit.operation(name).is_some() {
            return Err(Error::invalid_data(format!(
                "operation {} already declared on {}",
                name, unit.name
            )));
        }
        let op = HwOperation {
            name,
            latencies: latencies.into_iter().collect(),
            resource_use,
        };
        if op.latencies.is_empty() {
            return Err(Error::invalid_data(format!(
                "operation {name} declares no outputs"
            )));
        }
        if op.latencies.contains(&0) {
            return Err(Error::invalid_data(format!(
                "operation {name} declares a zero-latency output"
            )));
        }
        let span = op.maximal_latency();
        for &(offset, res) in &op.resource_use {
            if offset >= span {
                return Err(Error::out_of_range(format!(
                    "operation {} uses a resource at offset {} beyond its \
                     latency {}",
                    name, offset, span
                )));
            }
            if res >= unit.pipeline_resource_count {
                return Err(Error::out_of_range(format!(
                    "operation {} uses resource line {} but {} has only {}",
                    name, res, unit.name, unit.pipeline_resource_count
                )));
            }
        }
        self.function_units[fu].operations.push(op);
        Ok(())
    }
}

/// Minimum field width needed to transport the given constant, using the
/// sign-extended encoding buses use for inline immediates.
pub fn bits_needed(value: i64) -> u32 {
    if value >= 0 {
        // one leading zero so the value does not read back negative
        (64 - value.leading_zeros()) + 1
    } else {
        64 - (!value).leading_zeros() + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_needed_boundaries() {
        assert_eq!(bits_needed(0), 1);
        assert_eq!(bits_needed(1), 2);
        assert_eq!(bits_needed(-1), 1);
        assert_eq!(bits_needed(7), 4);
        assert_eq!(bits_needed(-8), 4);
        assert_eq!(bits_needed(8), 5);
    }

    #[test]
    fn socket_direction_is_checked() {
        let mut m = Machine::new();
        let bus = m.add_bus("b0", 32, 8).unwrap();
        let seg = m.add_segment("b0.s0", bus).unwrap();
        let out = m.add_socket("alu.o", SocketDirection::Output).unwrap();
        m.attach_socket(out, seg).unwrap();
        let fu = m.add_function_unit("alu", 1).unwrap();
        let err = m.add_fu_port(fu, "in.t", Some(out), None, true, true);
        assert!(err.is_err());
    }

    #[test]
    fn operation_tables_are_validated() {
        let mut m = Machine::new();
        let fu = m.add_function_unit("alu", 2).unwrap();
        m.add_operation(fu, "add", [1], vec![(0, 0)]).unwrap();
        // offset beyond latency
        assert!(m.add_operation(fu, "mul", [2], vec![(2, 0)]).is_err());
        // resource line out of range
        assert!(m.add_operation(fu, "sub", [1], vec![(0, 2)]).is_err());
        // duplicate name
        assert!(m.add_operation(fu, "add", [1], vec![]).is_err());
    }
}

//! Port data model
//!
//! A port is a typed, directional attachment point on a block. Blocks declare
//! their ports as [`PortDecl`]s (a single named port or a named collection of
//! homogeneous ports); the model wrapper materializes them into type-erased
//! [`DynamicPort`]s on first access. Connection resolution binds a shared,
//! sized buffer to one source port and hands one receiving end to each
//! destination.

use std::any::{Any, TypeId};
use std::fmt;

use crossbeam_channel::bounded;

use super::errors::{BindError, PortLookupError};
use super::sample::Sample;
use super::stream::{StreamReader, StreamWriter};

/// Direction of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

impl PortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortDirection::Input => "input",
            PortDirection::Output => "output",
        }
    }
}

/// Concrete kind of the realized channel backing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Bounded circular channel with a negotiated capacity.
    Bounded,
    /// Zero-capacity rendezvous channel; every send waits for a receive.
    Rendezvous,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Bounded => "bounded",
            ChannelKind::Rendezvous => "rendezvous",
        }
    }

    pub(crate) fn for_capacity(capacity: usize) -> Self {
        if capacity == 0 { ChannelKind::Rendezvous } else { ChannelKind::Bounded }
    }
}

type RawChannel = (Box<dyn Any + Send>, Box<dyn Any + Send>);

fn make_raw_channel<T: Sample>(capacity: usize) -> RawChannel {
    let (tx, rx) = bounded::<T>(capacity);
    (Box::new(tx), Box::new(rx))
}

/// Static metadata describing one port.
///
/// The value type is compared nominally via its normalized type name; the
/// channel factory is monomorphized here at declaration time, so binding
/// never needs a process-wide type registry.
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub name: String,
    pub direction: PortDirection,
    pub type_name: &'static str,
    pub type_id: TypeId,
    pub arithmetic_like: bool,
    /// Minimum number of in-flight samples the port requires per invocation.
    pub min_samples: usize,
    /// Maximum number of in-flight samples the port accepts per invocation.
    pub max_samples: usize,
    make_channel: fn(usize) -> RawChannel,
}

impl PortInfo {
    fn new<T: Sample>(name: impl Into<String>, direction: PortDirection) -> Self {
        Self {
            name: name.into(),
            direction,
            type_name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
            arithmetic_like: T::ARITHMETIC_LIKE,
            min_samples: 1,
            max_samples: usize::MAX,
            make_channel: make_raw_channel::<T>,
        }
    }

    /// Declare a stream input port carrying `T`.
    pub fn stream_input<T: Sample>(name: impl Into<String>) -> Self {
        Self::new::<T>(name, PortDirection::Input)
    }

    /// Declare a stream output port carrying `T`.
    pub fn stream_output<T: Sample>(name: impl Into<String>) -> Self {
        Self::new::<T>(name, PortDirection::Output)
    }

    /// Constrain the allowed in-flight sample count.
    pub fn with_required_samples(mut self, min: usize, max: usize) -> Self {
        self.min_samples = min;
        self.max_samples = max;
        self
    }
}

/// A block's declared port surface: one named port, or a named collection of
/// homogeneous ports addressable by sub-index.
#[derive(Debug, Clone)]
pub enum PortDecl {
    Single(PortInfo),
    Collection { name: String, ports: Vec<PortInfo> },
}

impl PortDecl {
    /// Declare a collection of `len` homogeneous input ports.
    pub fn input_collection<T: Sample>(name: impl Into<String>, len: usize) -> Self {
        let name = name.into();
        let ports = (0..len)
            .map(|i| PortInfo::stream_input::<T>(format!("{}#{}", name, i)))
            .collect();
        PortDecl::Collection { name, ports }
    }

    /// Declare a collection of `len` homogeneous output ports.
    pub fn output_collection<T: Sample>(name: impl Into<String>, len: usize) -> Self {
        let name = name.into();
        let ports = (0..len)
            .map(|i| PortInfo::stream_output::<T>(format!("{}#{}", name, i)))
            .collect();
        PortDecl::Collection { name, ports }
    }

    pub fn name(&self) -> &str {
        match self {
            PortDecl::Single(info) => &info.name,
            PortDecl::Collection { name, .. } => name,
        }
    }
}

/// Identifies one port on a block, by position or by name. Collections are
/// addressed with a sub-index; the string form `"name#3"` is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortDefinition {
    Index { index: usize, sub_index: Option<usize> },
    Name { name: String, sub_index: Option<usize> },
}

impl PortDefinition {
    pub fn index(index: usize) -> Self {
        PortDefinition::Index { index, sub_index: None }
    }

    pub fn indexed(index: usize, sub_index: usize) -> Self {
        PortDefinition::Index { index, sub_index: Some(sub_index) }
    }

    pub fn name(name: impl Into<String>) -> Self {
        PortDefinition::from(name.into().as_str())
    }
}

impl From<&str> for PortDefinition {
    fn from(value: &str) -> Self {
        match value.split_once('#') {
            Some((name, sub)) => match sub.parse::<usize>() {
                Ok(sub_index) => PortDefinition::Name {
                    name: name.to_string(),
                    sub_index: Some(sub_index),
                },
                Err(_) => PortDefinition::Name { name: value.to_string(), sub_index: None },
            },
            None => PortDefinition::Name { name: value.to_string(), sub_index: None },
        }
    }
}

impl From<String> for PortDefinition {
    fn from(value: String) -> Self {
        PortDefinition::from(value.as_str())
    }
}

impl From<usize> for PortDefinition {
    fn from(index: usize) -> Self {
        PortDefinition::index(index)
    }
}

impl From<(usize, usize)> for PortDefinition {
    fn from((index, sub_index): (usize, usize)) -> Self {
        PortDefinition::indexed(index, sub_index)
    }
}

impl fmt::Display for PortDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortDefinition::Index { index, sub_index: None } => write!(f, "#{}", index),
            PortDefinition::Index { index, sub_index: Some(sub) } => write!(f, "#{}.{}", index, sub),
            PortDefinition::Name { name, sub_index: None } => write!(f, "{}", name),
            PortDefinition::Name { name, sub_index: Some(sub) } => write!(f, "{}#{}", name, sub),
        }
    }
}

enum Binding {
    Writer {
        capacity: usize,
        kind: ChannelKind,
        senders: Vec<Box<dyn Any + Send>>,
    },
    Reader {
        capacity: usize,
        kind: ChannelKind,
        receiver: Box<dyn Any + Send>,
    },
}

/// Runtime, type-erased port attached to a block.
///
/// Materialized lazily by the owning block model and cached for the block's
/// lifetime; never handed out by ownership. An output port owns the shared
/// buffer binding (one sender per fan-out destination); an input port owns at
/// most one receiving end.
pub struct DynamicPort {
    info: PortInfo,
    binding: Option<Binding>,
}

impl DynamicPort {
    pub(crate) fn new(info: PortInfo) -> Self {
        Self { info, binding: None }
    }

    pub fn info(&self) -> &PortInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn type_name(&self) -> &'static str {
        self.info.type_name
    }

    pub fn direction(&self) -> PortDirection {
        self.info.direction
    }

    pub fn is_connected(&self) -> bool {
        match &self.binding {
            None => false,
            Some(Binding::Writer { senders, .. }) => !senders.is_empty(),
            Some(Binding::Reader { .. }) => true,
        }
    }

    /// Realized buffer capacity, once bound.
    pub fn buffer_size(&self) -> Option<usize> {
        match &self.binding {
            Some(Binding::Writer { capacity, .. }) | Some(Binding::Reader { capacity, .. }) => Some(*capacity),
            None => None,
        }
    }

    pub fn channel_kind(&self) -> Option<ChannelKind> {
        match &self.binding {
            Some(Binding::Writer { kind, .. }) | Some(Binding::Reader { kind, .. }) => Some(*kind),
            None => None,
        }
    }

    /// Number of readers attached to this output port's buffer.
    pub fn reader_count(&self) -> usize {
        match &self.binding {
            Some(Binding::Writer { senders, .. }) => senders.len(),
            Some(Binding::Reader { .. }) => 1,
            None => 0,
        }
    }

    /// Number of writers bound to the buffer (a stream buffer has one).
    pub fn writer_count(&self) -> usize {
        match &self.binding {
            Some(_) => 1,
            None => 0,
        }
    }

    /// Drop the binding, releasing the channel ends held by this port.
    pub fn disconnect(&mut self) {
        self.binding = None;
    }

    /// Size the shared buffer for this output port. May be called again only
    /// while no destination is attached.
    pub(crate) fn resize_buffer(&mut self, capacity: usize) -> Result<(), BindError> {
        if self.info.direction != PortDirection::Output {
            return Err(BindError::WrongDirection);
        }
        match &mut self.binding {
            None => {
                self.binding = Some(Binding::Writer {
                    capacity,
                    kind: ChannelKind::for_capacity(capacity),
                    senders: Vec::new(),
                });
                Ok(())
            }
            Some(Binding::Writer { capacity: current, kind, senders }) => {
                if senders.is_empty() {
                    *current = capacity;
                    *kind = ChannelKind::for_capacity(capacity);
                    Ok(())
                } else if *current == capacity {
                    Ok(())
                } else {
                    Err(BindError::AlreadySized)
                }
            }
            Some(Binding::Reader { .. }) => Err(BindError::WrongDirection),
        }
    }

    /// Open one more fan-out channel from this sized output port, returning
    /// the type-erased receiving end for the destination.
    pub(crate) fn open_channel(&mut self) -> Result<Box<dyn Any + Send>, BindError> {
        match &mut self.binding {
            Some(Binding::Writer { capacity, senders, .. }) => {
                let (tx, rx) = (self.info.make_channel)(*capacity);
                senders.push(tx);
                Ok(rx)
            }
            Some(Binding::Reader { .. }) => Err(BindError::WrongDirection),
            None => Err(BindError::UnsizedWriter),
        }
    }

    /// Undo the most recent [`open_channel`](Self::open_channel); used to roll
    /// back a half-applied connection.
    pub(crate) fn retract_channel(&mut self) {
        if let Some(Binding::Writer { senders, .. }) = &mut self.binding {
            senders.pop();
        }
    }

    /// Attach the receiving end of a channel to this input port. An input
    /// port accepts exactly one upstream binding.
    pub(crate) fn bind_reader(&mut self, receiver: Box<dyn Any + Send>, capacity: usize) -> Result<(), BindError> {
        if self.info.direction != PortDirection::Input {
            return Err(BindError::WrongDirection);
        }
        if self.binding.is_some() {
            return Err(BindError::AlreadyBound);
        }
        self.binding = Some(Binding::Reader {
            capacity,
            kind: ChannelKind::for_capacity(capacity),
            receiver,
        });
        Ok(())
    }

    /// Typed broadcast writer over this output port's binding.
    pub fn writer<T: Sample>(&self) -> Option<StreamWriter<T>> {
        match &self.binding {
            Some(Binding::Writer { senders, .. }) => {
                let typed: Option<Vec<_>> = senders
                    .iter()
                    .map(|s| s.downcast_ref::<crossbeam_channel::Sender<T>>().cloned())
                    .collect();
                typed.map(StreamWriter::new)
            }
            _ => None,
        }
    }

    /// Typed reader over this input port's binding.
    pub fn reader<T: Sample>(&self) -> Option<StreamReader<T>> {
        match &self.binding {
            Some(Binding::Reader { receiver, .. }) => receiver
                .downcast_ref::<crossbeam_channel::Receiver<T>>()
                .cloned()
                .map(StreamReader::new),
            _ => None,
        }
    }
}

impl fmt::Debug for DynamicPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicPort")
            .field("name", &self.info.name)
            .field("direction", &self.info.direction)
            .field("type", &self.info.type_name)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Materialized form of a [`PortDecl`], owned by the block model.
pub enum PortEntry {
    Single(DynamicPort),
    Collection { name: String, ports: Vec<DynamicPort> },
}

impl PortEntry {
    pub(crate) fn materialize(decl: PortDecl) -> Self {
        match decl {
            PortDecl::Single(info) => PortEntry::Single(DynamicPort::new(info)),
            PortDecl::Collection { name, ports } => PortEntry::Collection {
                name,
                ports: ports.into_iter().map(DynamicPort::new).collect(),
            },
        }
    }

    pub fn name(&self) -> &str {
        match self {
            PortEntry::Single(port) => port.name(),
            PortEntry::Collection { name, .. } => name,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PortEntry::Single(_) => 1,
            PortEntry::Collection { ports, .. } => ports.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The single port, if this entry is not a collection.
    pub fn as_port(&self) -> Option<&DynamicPort> {
        match self {
            PortEntry::Single(port) => Some(port),
            PortEntry::Collection { .. } => None,
        }
    }

    /// Member port of a collection by sub-index.
    pub fn get(&self, sub_index: usize) -> Option<&DynamicPort> {
        match self {
            PortEntry::Single(port) if sub_index == 0 => Some(port),
            PortEntry::Single(_) => None,
            PortEntry::Collection { ports, .. } => ports.get(sub_index),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &DynamicPort> {
        match self {
            PortEntry::Single(port) => std::slice::from_ref(port).iter(),
            PortEntry::Collection { ports, .. } => ports.iter(),
        }
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut DynamicPort> {
        match self {
            PortEntry::Single(port) => std::slice::from_mut(port).iter_mut(),
            PortEntry::Collection { ports, .. } => ports.iter_mut(),
        }
    }

    pub(crate) fn disconnect_all(&mut self) {
        for port in self.iter_mut() {
            port.disconnect();
        }
    }
}

/// Resolve a [`PortDefinition`] against a block's materialized port entries.
pub(crate) fn find_port<'a>(
    block_name: &str,
    entries: &'a mut [PortEntry],
    definition: &PortDefinition,
) -> Result<&'a mut DynamicPort, PortLookupError> {
    let (entry, sub_index, label) = match definition {
        PortDefinition::Index { index, sub_index } => {
            let entry = entries.get_mut(*index).ok_or(PortLookupError::IndexOutOfRange {
                block: block_name.to_string(),
                index: *index,
            })?;
            (entry, *sub_index, format!("#{}", index))
        }
        PortDefinition::Name { name, sub_index } => {
            let entry = entries
                .iter_mut()
                .find(|e| e.name() == name)
                .ok_or_else(|| PortLookupError::NotFound {
                    block: block_name.to_string(),
                    port: name.clone(),
                })?;
            (entry, *sub_index, name.clone())
        }
    };

    match (entry, sub_index) {
        (PortEntry::Single(port), None) => Ok(port),
        (PortEntry::Single(_), Some(sub)) => Err(PortLookupError::SubIndexOutOfRange {
            block: block_name.to_string(),
            port: label,
            sub_index: sub,
        }),
        (PortEntry::Collection { ports, .. }, Some(sub)) => {
            ports.get_mut(sub).ok_or(PortLookupError::SubIndexOutOfRange {
                block: block_name.to_string(),
                port: label,
                sub_index: sub,
            })
        }
        (PortEntry::Collection { .. }, None) => Err(PortLookupError::MissingSubIndex {
            block: block_name.to_string(),
            port: label,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_parses_sub_index_syntax() {
        assert_eq!(
            PortDefinition::from("in"),
            PortDefinition::Name { name: "in".to_string(), sub_index: None }
        );
        assert_eq!(
            PortDefinition::from("inputs#3"),
            PortDefinition::Name { name: "inputs".to_string(), sub_index: Some(3) }
        );
        assert_eq!(PortDefinition::from(2usize), PortDefinition::Index { index: 2, sub_index: None });
    }

    fn entries() -> Vec<PortEntry> {
        vec![
            PortEntry::materialize(PortDecl::Single(PortInfo::stream_input::<f32>("in"))),
            PortEntry::materialize(PortDecl::input_collection::<f32>("taps", 3)),
        ]
    }

    #[test]
    fn lookup_by_name_index_and_sub_index() {
        let mut entries = entries();
        assert!(find_port("b", &mut entries, &PortDefinition::from("in")).is_ok());
        assert!(find_port("b", &mut entries, &PortDefinition::index(0)).is_ok());
        assert!(find_port("b", &mut entries, &PortDefinition::from("taps#2")).is_ok());
        assert!(find_port("b", &mut entries, &PortDefinition::indexed(1, 1)).is_ok());
    }

    #[test]
    fn lookup_failures_are_structured() {
        let mut entries = entries();
        assert!(matches!(
            find_port("b", &mut entries, &PortDefinition::from("missing")),
            Err(PortLookupError::NotFound { .. })
        ));
        assert!(matches!(
            find_port("b", &mut entries, &PortDefinition::from("taps#9")),
            Err(PortLookupError::SubIndexOutOfRange { .. })
        ));
        assert!(matches!(
            find_port("b", &mut entries, &PortDefinition::from("taps")),
            Err(PortLookupError::MissingSubIndex { .. })
        ));
        assert!(matches!(
            find_port("b", &mut entries, &PortDefinition::index(7)),
            Err(PortLookupError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn output_binding_tracks_capacity_and_kind() {
        let mut out = DynamicPort::new(PortInfo::stream_output::<f32>("out"));
        let mut input = DynamicPort::new(PortInfo::stream_input::<f32>("in"));

        out.resize_buffer(128).unwrap();
        assert_eq!(out.buffer_size(), Some(128));
        assert_eq!(out.channel_kind(), Some(ChannelKind::Bounded));
        assert!(!out.is_connected());

        let rx = out.open_channel().unwrap();
        input.bind_reader(rx, 128).unwrap();
        assert!(out.is_connected());
        assert_eq!(out.reader_count(), 1);
        assert!(input.is_connected());

        // second upstream is refused
        let rx2 = out.open_channel().unwrap();
        assert!(matches!(input.bind_reader(rx2, 128), Err(BindError::AlreadyBound)));
        out.retract_channel();
        assert_eq!(out.reader_count(), 1);

        // resize with attached destinations is refused
        assert!(matches!(out.resize_buffer(64), Err(BindError::AlreadySized)));

        let writer = out.writer::<f32>().unwrap();
        let reader = input.reader::<f32>().unwrap();
        writer.send(1.5).unwrap();
        assert_eq!(reader.try_recv().unwrap(), 1.5);
    }

    #[test]
    fn rendezvous_kind_for_zero_capacity() {
        let mut out = DynamicPort::new(PortInfo::stream_output::<u8>("out"));
        out.resize_buffer(0).unwrap();
        assert_eq!(out.channel_kind(), Some(ChannelKind::Rendezvous));
    }

    #[test]
    fn typed_access_requires_matching_type() {
        let mut out = DynamicPort::new(PortInfo::stream_output::<f32>("out"));
        out.resize_buffer(8).unwrap();
        let _ = out.open_channel().unwrap();
        assert!(out.writer::<f32>().is_some());
        assert!(out.writer::<u32>().is_none());
    }
}

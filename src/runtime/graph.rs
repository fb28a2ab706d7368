//! Graph container and connection resolution
//!
//! A graph owns a heterogeneous, insertion-ordered collection of blocks (as
//! [`BlockModel`]) and a list of [`Edge`]s. Connections are declared either
//! through the compile-time-checked fluent tier (typed block handles) or the
//! fully dynamic name/index tier, and resolved by [`Graph::connect_pending_edges`]:
//! per distinct source port the buffer size is negotiated across all fan-out
//! edges, the type-checked bind is performed, and each edge's state machine is
//! advanced. One malformed edge never aborts resolution of the rest.

use std::any::TypeId;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::block::{Block, BlockModel, BlockWrapper, ComputeContext, Progress, PropertyMap, next_unique_id};
use super::edge::{BlockId, Edge, EdgeOptions, EdgeState};
use super::errors::{ConnectionResult, GraphError};
use super::ports::{ChannelKind, PortDefinition, PortDirection};
use super::registry::BlockRegistry;
use super::sample::{Sample, default_min_buffer_size};

/// Typed handle to a block owned by a graph. Cheap to copy; used by the
/// static connection tier to recover compile-time port types.
pub struct BlockHandle<B> {
    id: BlockId,
    _marker: PhantomData<fn() -> B>,
}

impl<B> BlockHandle<B> {
    pub fn id(&self) -> BlockId {
        self.id
    }
}

impl<B> Clone for BlockHandle<B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B> Copy for BlockHandle<B> {}

/// Owning container of blocks and edges forming a topology.
///
/// Mutation is not safe while an external scheduler is concurrently driving
/// the same blocks; quiesce execution first.
pub struct Graph {
    name: String,
    unique_name: String,
    progress: Arc<Progress>,
    context: ComputeContext,
    registry: Arc<BlockRegistry>,
    blocks: Vec<(BlockId, Box<dyn BlockModel>)>,
    edges: Vec<Edge>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// A graph with an empty instantiation registry.
    pub fn new() -> Self {
        Self::with_registry(Arc::new(BlockRegistry::new()))
    }

    /// A graph resolving dynamic block types through `registry`.
    pub fn with_registry(registry: Arc<BlockRegistry>) -> Self {
        Self {
            name: "graph".to_string(),
            unique_name: format!("graph#{}", next_unique_id()),
            progress: Arc::new(Progress::default()),
            context: ComputeContext::default(),
            registry,
            blocks: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn unique_name(&self) -> &str {
        &self.unique_name
    }

    /// Shared progress counter handed to every block's `init`.
    pub fn progress(&self) -> &Arc<Progress> {
        &self.progress
    }

    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.registry
    }

    // ------------------------------------------------------------------
    // block management
    // ------------------------------------------------------------------

    /// Take ownership of an already-wrapped block model.
    pub fn add_model(&mut self, mut model: Box<dyn BlockModel>) -> BlockId {
        let id = BlockId(next_unique_id() as u64);
        model.init(Arc::clone(&self.progress), &self.context);
        debug!(block = %model.unique_name(), "block added");
        self.blocks.push((id, model));
        id
    }

    /// Wrap and take ownership of a statically-typed block.
    pub fn add_block<B: Block>(&mut self, block: B) -> BlockHandle<B> {
        self.add_block_with_settings(block, PropertyMap::new())
    }

    pub fn add_block_with_settings<B: Block>(&mut self, block: B, settings: PropertyMap) -> BlockHandle<B> {
        let id = self.add_model(Box::new(BlockWrapper::with_settings(block, settings)));
        BlockHandle { id, _marker: PhantomData }
    }

    /// Instantiate a block dynamically by type name through the registry.
    pub fn emplace_block(&mut self, type_name: &str, settings: PropertyMap) -> Result<BlockId, GraphError> {
        let model = self
            .registry
            .instantiate(type_name, settings)
            .ok_or_else(|| GraphError::UnknownBlockType(type_name.to_string()))?;
        Ok(self.add_model(model))
    }

    /// Remove a block by unique name, cascading removal of every edge that
    /// references it. Returns the removed model.
    pub fn remove_block_by_name(&mut self, unique_name: &str) -> Result<Box<dyn BlockModel>, GraphError> {
        let position = self
            .blocks
            .iter()
            .position(|(_, m)| m.unique_name() == unique_name)
            .ok_or_else(|| GraphError::BlockNotFound {
                block: unique_name.to_string(),
                graph: self.unique_name.clone(),
            })?;
        let (id, model) = self.blocks.remove(position);
        let before = self.edges.len();
        self.edges.retain(|e| e.source_block != id && e.destination_block != id);
        debug!(block = unique_name, removed_edges = before - self.edges.len(), "block removed");
        Ok(model)
    }

    /// Replace a block with a freshly instantiated one, re-pointing every
    /// edge's endpoints to the new instance without touching edge state. The
    /// caller is expected to run [`reconnect_all_edges`](Self::reconnect_all_edges)
    /// afterwards.
    pub fn replace_block(
        &mut self,
        unique_name: &str,
        type_name: &str,
        settings: PropertyMap,
    ) -> Result<(Box<dyn BlockModel>, BlockId), GraphError> {
        let position = self
            .blocks
            .iter()
            .position(|(_, m)| m.unique_name() == unique_name)
            .ok_or_else(|| GraphError::BlockNotFound {
                block: unique_name.to_string(),
                graph: self.unique_name.clone(),
            })?;
        let model = self
            .registry
            .instantiate(type_name, settings)
            .ok_or_else(|| GraphError::UnknownBlockType(type_name.to_string()))?;

        let new_id = self.add_model(model);
        let old_id = self.blocks[position].0;
        for edge in &mut self.edges {
            if edge.source_block == old_id {
                edge.source_block = new_id;
            }
            if edge.destination_block == old_id {
                edge.destination_block = new_id;
            }
        }
        let (_, old_model) = self.blocks.remove(position);
        Ok((old_model, new_id))
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
        self.edges.clear();
    }

    // ------------------------------------------------------------------
    // lookups
    // ------------------------------------------------------------------

    pub(crate) fn model_by_id(&self, id: BlockId) -> Option<&dyn BlockModel> {
        self.blocks.iter().find(|(bid, _)| *bid == id).map(|(_, m)| m.as_ref())
    }

    pub(crate) fn model_by_id_mut(&mut self, id: BlockId) -> Option<&mut (dyn BlockModel + 'static)> {
        self.blocks.iter_mut().find(|(bid, _)| *bid == id).map(|(_, m)| m.as_mut())
    }

    pub(crate) fn unique_name_of(&self, id: BlockId) -> Option<&str> {
        self.model_by_id(id).map(|m| m.unique_name())
    }

    /// Typed access to a block added through [`add_block`](Self::add_block).
    pub fn get<B: Block>(&self, handle: &BlockHandle<B>) -> Option<&B> {
        self.model_by_id(handle.id).and_then(|m| m.raw().downcast_ref::<B>())
    }

    pub fn get_mut<B: Block>(&mut self, handle: &BlockHandle<B>) -> Option<&mut B> {
        self.model_by_id_mut(handle.id).and_then(|m| m.raw_mut().downcast_mut::<B>())
    }

    pub fn model(&self, id: BlockId) -> Option<&dyn BlockModel> {
        self.model_by_id(id)
    }

    pub fn model_mut(&mut self, id: BlockId) -> Option<&mut (dyn BlockModel + 'static)> {
        self.model_by_id_mut(id)
    }

    pub fn block_by_unique_name(&self, unique_name: &str) -> Result<&dyn BlockModel, GraphError> {
        self.blocks
            .iter()
            .find(|(_, m)| m.unique_name() == unique_name)
            .map(|(_, m)| m.as_ref())
            .ok_or_else(|| GraphError::BlockNotFound {
                block: unique_name.to_string(),
                graph: self.unique_name.clone(),
            })
    }

    pub fn block_by_unique_name_mut(&mut self, unique_name: &str) -> Result<&mut (dyn BlockModel + 'static), GraphError> {
        let graph = self.unique_name.clone();
        self.blocks
            .iter_mut()
            .find(|(_, m)| m.unique_name() == unique_name)
            .map(|(_, m)| m.as_mut())
            .ok_or(GraphError::BlockNotFound { block: unique_name.to_string(), graph })
    }

    /// First block whose display name matches.
    pub fn first_block_by_name(&self, name: &str) -> Result<&dyn BlockModel, GraphError> {
        self.blocks
            .iter()
            .find(|(_, m)| m.name() == name)
            .map(|(_, m)| m.as_ref())
            .ok_or_else(|| GraphError::BlockNotFound {
                block: name.to_string(),
                graph: self.unique_name.clone(),
            })
    }

    pub(crate) fn id_by_unique_name(&self, unique_name: &str) -> Result<BlockId, GraphError> {
        self.blocks
            .iter()
            .find(|(_, m)| m.unique_name() == unique_name)
            .map(|(id, _)| *id)
            .ok_or_else(|| GraphError::BlockNotFound {
                block: unique_name.to_string(),
                graph: self.unique_name.clone(),
            })
    }

    /// Blocks in insertion order (the canonical iteration order).
    pub fn blocks(&self) -> impl Iterator<Item = &dyn BlockModel> {
        self.blocks.iter().map(|(_, m)| m.as_ref())
    }

    pub fn blocks_mut(&mut self) -> impl Iterator<Item = &mut (dyn BlockModel + 'static)> {
        self.blocks.iter_mut().map(|(_, m)| m.as_mut())
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks.iter().map(|(id, _)| *id)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    // ------------------------------------------------------------------
    // static (compile-time typed) connection tier
    // ------------------------------------------------------------------

    /// Begin a typed connection from one source port. Chain
    /// [`SourceConnector::to`] for each fan-out destination.
    ///
    /// Unknown names and a port whose value type is not `T` are programmer
    /// errors and surface as `Err`; they never become edge state.
    pub fn connect<T: Sample, B: Block>(
        &mut self,
        source: &BlockHandle<B>,
        port: impl Into<PortDefinition>,
    ) -> Result<SourceConnector<'_, T>, GraphError> {
        let definition = port.into();
        let arithmetic_like = self.checked_port_info::<T>(source.id, &definition, PortDirection::Output)?;
        Ok(SourceConnector {
            graph: self,
            source: source.id,
            source_port: definition,
            arithmetic_like,
            options: EdgeOptions::default(),
            _marker: PhantomData,
        })
    }

    fn checked_port_info<T: Sample>(
        &mut self,
        id: BlockId,
        definition: &PortDefinition,
        direction: PortDirection,
    ) -> Result<bool, GraphError> {
        let graph = self.unique_name.clone();
        let model = self
            .model_by_id_mut(id)
            .ok_or(GraphError::BlockNotFound { block: id.to_string(), graph })?;
        let block_name = model.unique_name().to_string();
        let port = match direction {
            PortDirection::Output => model.dynamic_output_port(definition)?,
            PortDirection::Input => model.dynamic_input_port(definition)?,
        };
        let info = port.info();
        if info.type_id != TypeId::of::<T>() {
            return Err(GraphError::PortTypeMismatch {
                block: block_name,
                port: definition.to_string(),
                actual: info.type_name.to_string(),
                requested: std::any::type_name::<T>().to_string(),
            });
        }
        Ok(info.arithmetic_like)
    }

    // ------------------------------------------------------------------
    // dynamic connection tier
    // ------------------------------------------------------------------

    /// Declare a connection by name/index lookup on both sides. Best-effort:
    /// an unresolvable block or port yields `Failed` instead of an error,
    /// because this tier is typically driven by untrusted topology
    /// descriptions. Type compatibility is checked at resolution time and
    /// recorded as edge state.
    pub fn connect_dynamic(
        &mut self,
        source: BlockId,
        source_port: impl Into<PortDefinition>,
        destination: BlockId,
        destination_port: impl Into<PortDefinition>,
        options: EdgeOptions,
    ) -> ConnectionResult {
        let source_port = source_port.into();
        let destination_port = destination_port.into();
        match self.try_declare_dynamic(source, &source_port, destination, &destination_port, options) {
            Ok(()) => ConnectionResult::Success,
            Err(error) => {
                debug!(%error, "dynamic connect failed");
                ConnectionResult::Failed
            }
        }
    }

    fn try_declare_dynamic(
        &mut self,
        source: BlockId,
        source_port: &PortDefinition,
        destination: BlockId,
        destination_port: &PortDefinition,
        options: EdgeOptions,
    ) -> Result<(), GraphError> {
        let graph = self.unique_name.clone();
        let arithmetic_like = {
            let model = self
                .model_by_id_mut(source)
                .ok_or(GraphError::BlockNotFound { block: source.to_string(), graph: graph.clone() })?;
            model.dynamic_output_port(source_port)?.info().arithmetic_like
        };
        {
            let model = self
                .model_by_id_mut(destination)
                .ok_or(GraphError::BlockNotFound { block: destination.to_string(), graph })?;
            model.dynamic_input_port(destination_port)?;
        }
        let min = options
            .min_buffer_size
            .unwrap_or_else(|| default_min_buffer_size(arithmetic_like));
        self.edges.push(Edge::new(
            source,
            source_port.clone(),
            destination,
            destination_port.clone(),
            min,
            options.weight,
            options.name,
        ));
        Ok(())
    }

    // ------------------------------------------------------------------
    // connection resolution
    // ------------------------------------------------------------------

    /// Resolve one declared edge into a realized, type-checked, sized buffer
    /// binding. Never panics or errors: every failure mode is encoded in the
    /// returned (and stored) edge state.
    pub fn apply_edge_connection(&mut self, edge_index: usize) -> EdgeState {
        let outcome = self.try_apply_edge(edge_index);
        let edge = &mut self.edges[edge_index];
        match outcome {
            Ok((capacity, kind)) => {
                edge.state = EdgeState::Connected;
                edge.buffer_size = capacity;
                edge.channel_kind = Some(kind);
            }
            Err(state) => {
                edge.state = state;
                edge.buffer_size = 0;
                edge.channel_kind = None;
            }
        }
        edge.state
    }

    fn try_apply_edge(&mut self, edge_index: usize) -> Result<(usize, ChannelKind), EdgeState> {
        let (source, source_port, destination, destination_port) = {
            let e = &self.edges[edge_index];
            (e.source_block, e.source_port.clone(), e.destination_block, e.destination_port.clone())
        };

        // A vanished block or port (e.g. replaced without a reconnect pass)
        // is an expected outcome, converted to PortNotFound.
        let source_type = {
            let model = self.model_by_id_mut(source).ok_or_else(|| {
                warn!(block = %source, "edge source block not in graph");
                EdgeState::PortNotFound
            })?;
            let port = model.dynamic_output_port(&source_port).map_err(|error| {
                warn!(%error, "edge source port lookup failed");
                EdgeState::PortNotFound
            })?;
            port.info().type_name
        };
        let destination_type = {
            let model = self.model_by_id_mut(destination).ok_or_else(|| {
                warn!(block = %destination, "edge destination block not in graph");
                EdgeState::PortNotFound
            })?;
            let port = model.dynamic_input_port(&destination_port).map_err(|error| {
                warn!(%error, "edge destination port lookup failed");
                EdgeState::PortNotFound
            })?;
            port.info().type_name
        };

        if source_type != destination_type {
            return Err(EdgeState::IncompatiblePorts);
        }

        let has_connected_sibling = self.edges.iter().any(|o| {
            o.source_block == source && o.source_port == source_port && o.state == EdgeState::Connected
        });
        let capacity = self.calculate_stream_buffer_size(edge_index);

        // Size the shared buffer once per source port, then open one more
        // fan-out channel for this destination.
        let receiver = {
            let model = self.model_by_id_mut(source).ok_or(EdgeState::PortNotFound)?;
            let port = model.dynamic_output_port(&source_port).map_err(|_| EdgeState::PortNotFound)?;
            if !has_connected_sibling {
                port.resize_buffer(capacity).map_err(|error| {
                    warn!(%error, "buffer sizing failed");
                    EdgeState::ErrorConnecting
                })?;
            }
            port.open_channel().map_err(|error| {
                warn!(%error, "channel creation failed");
                EdgeState::ErrorConnecting
            })?
        };

        let bound = {
            let model = self.model_by_id_mut(destination).ok_or(EdgeState::PortNotFound)?;
            let port = model.dynamic_input_port(&destination_port).map_err(|_| EdgeState::PortNotFound)?;
            port.bind_reader(receiver, capacity)
        };
        if let Err(error) = bound {
            warn!(%error, "input bind failed");
            // roll the fan-out channel back so reader counts stay truthful
            if let Some(model) = self.model_by_id_mut(source) {
                if let Ok(port) = model.dynamic_output_port(&source_port) {
                    port.retract_channel();
                }
            }
            return Err(EdgeState::ErrorConnecting);
        }

        Ok((capacity, ChannelKind::for_capacity(capacity)))
    }

    /// Buffer size for the edge's source port: the realized size of an
    /// already-connected sibling if one exists (authoritative), otherwise the
    /// maximum requested minimum across every edge sharing the source port.
    /// Computed before the first bind because fan-out consumers may be
    /// declared in any order and the buffer is allocated once.
    pub fn calculate_stream_buffer_size(&self, edge_index: usize) -> usize {
        let edge = &self.edges[edge_index];
        if let Some(connected) = self
            .edges
            .iter()
            .find(|o| edge.has_same_source_port(o) && o.state == EdgeState::Connected)
        {
            return connected.buffer_size;
        }
        self.edges
            .iter()
            .filter(|o| edge.has_same_source_port(o))
            .map(|o| o.min_buffer_size)
            .max()
            .unwrap_or(0)
    }

    /// Resolve every edge still waiting. Returns `false` if any edge failed
    /// to reach `Connected`; resolution continues past failures.
    pub fn connect_pending_edges(&mut self) -> bool {
        let mut all_connected = true;
        for index in 0..self.edges.len() {
            if self.edges[index].state != EdgeState::WaitingToBeConnected {
                continue;
            }
            let state = self.apply_edge_connection(index);
            if state != EdgeState::Connected {
                warn!(edge = %self.edges[index], "edge could not be connected");
                all_connected = false;
            }
        }
        all_connected
    }

    /// Unbind every port on every block and reset every edge to
    /// `WaitingToBeConnected`. Must not run while the graph is executing.
    pub fn disconnect_all_edges(&mut self) {
        for (_, block) in &mut self.blocks {
            block.init_dynamic_ports();
            for entry in block.dynamic_input_ports() {
                entry.disconnect_all();
            }
            for entry in block.dynamic_output_ports() {
                entry.disconnect_all();
            }
            if let Some(group) = block.as_group_mut() {
                group.disconnect_all_edges();
            }
        }
        for edge in &mut self.edges {
            edge.reset();
        }
    }

    /// Full re-layout: disconnect everything, then re-resolve all edges.
    pub fn reconnect_all_edges(&mut self) -> bool {
        info!(graph = %self.unique_name, edges = self.edges.len(), "reconnecting all edges");
        self.disconnect_all_edges();
        self.connect_pending_edges()
    }

    /// Remove every edge fanning out of one source port, unbinding the port
    /// and the affected destinations. Returns the number of removed edges.
    pub fn remove_edges_from(
        &mut self,
        source_unique_name: &str,
        port: impl Into<PortDefinition>,
    ) -> Result<usize, GraphError> {
        let id = self.id_by_unique_name(source_unique_name)?;
        let definition = port.into();

        {
            let model = self.block_by_unique_name_mut(source_unique_name)?;
            model.dynamic_output_port(&definition)?.disconnect();
        }

        let affected: Vec<(BlockId, PortDefinition)> = self
            .edges
            .iter()
            .filter(|e| e.source_block == id && e.source_port == definition)
            .map(|e| (e.destination_block, e.destination_port.clone()))
            .collect();
        for (dest, dest_port) in &affected {
            if let Some(model) = self.model_by_id_mut(*dest) {
                if let Ok(port) = model.dynamic_input_port(dest_port) {
                    port.disconnect();
                }
            }
        }

        let before = self.edges.len();
        self.edges.retain(|e| !(e.source_block == id && e.source_port == definition));
        Ok(before - self.edges.len())
    }
}

/// Intermediate connector bound to one source block/port, produced by
/// [`Graph::connect`]. The connection is split into two calls because port
/// and block types differ between the two ends; splitting lets each half be
/// validated independently and enables fluent multi-destination fan-out.
pub struct SourceConnector<'g, T: Sample> {
    graph: &'g mut Graph,
    source: BlockId,
    source_port: PortDefinition,
    arithmetic_like: bool,
    options: EdgeOptions,
    _marker: PhantomData<fn() -> T>,
}

impl<'g, T: Sample> SourceConnector<'g, T> {
    /// Request a minimum buffer size for edges declared through this
    /// connector.
    pub fn with_min_buffer_size(mut self, size: usize) -> Self {
        self.options.min_buffer_size = Some(size);
        self
    }

    pub fn with_weight(mut self, weight: i32) -> Self {
        self.options.weight = weight;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.options.name = Some(name.into());
        self
    }

    /// Record a deferred edge to `destination`; resolve later with
    /// [`Graph::connect_pending_edges`]. Returns the connector again so
    /// fan-out destinations can be chained.
    pub fn to<C: Block>(
        self,
        destination: &BlockHandle<C>,
        port: impl Into<PortDefinition>,
    ) -> Result<Self, GraphError> {
        let definition = port.into();
        self.graph
            .checked_port_info::<T>(destination.id(), &definition, PortDirection::Input)?;
        let min = self
            .options
            .min_buffer_size
            .unwrap_or_else(|| default_min_buffer_size(self.arithmetic_like));
        self.graph.edges.push(Edge::new(
            self.source,
            self.source_port.clone(),
            destination.id(),
            definition,
            min,
            self.options.weight,
            self.options.name.clone(),
        ));
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ports::{PortDecl, PortInfo};

    struct FloatSource;

    impl Block for FloatSource {
        fn name(&self) -> &str {
            "float_source"
        }
        fn input_ports(&self) -> Vec<PortDecl> {
            vec![]
        }
        fn output_ports(&self) -> Vec<PortDecl> {
            vec![PortDecl::Single(PortInfo::stream_output::<f32>("out"))]
        }
    }

    struct FloatSink;

    impl Block for FloatSink {
        fn name(&self) -> &str {
            "float_sink"
        }
        fn input_ports(&self) -> Vec<PortDecl> {
            vec![PortDecl::Single(PortInfo::stream_input::<f32>("in"))]
        }
        fn output_ports(&self) -> Vec<PortDecl> {
            vec![]
        }
    }

    struct FloatPass;

    impl Block for FloatPass {
        fn name(&self) -> &str {
            "float_pass"
        }
        fn input_ports(&self) -> Vec<PortDecl> {
            vec![PortDecl::Single(PortInfo::stream_input::<f32>("in"))]
        }
        fn output_ports(&self) -> Vec<PortDecl> {
            vec![PortDecl::Single(PortInfo::stream_output::<f32>("out"))]
        }
    }

    struct TextSource;

    impl Block for TextSource {
        fn name(&self) -> &str {
            "text_source"
        }
        fn input_ports(&self) -> Vec<PortDecl> {
            vec![]
        }
        fn output_ports(&self) -> Vec<PortDecl> {
            vec![PortDecl::Single(PortInfo::stream_output::<String>("out"))]
        }
    }

    struct TextSink;

    impl Block for TextSink {
        fn name(&self) -> &str {
            "text_sink"
        }
        fn input_ports(&self) -> Vec<PortDecl> {
            vec![PortDecl::Single(PortInfo::stream_input::<String>("in"))]
        }
        fn output_ports(&self) -> Vec<PortDecl> {
            vec![]
        }
    }

    #[test]
    fn static_connect_records_and_resolves() {
        let mut graph = Graph::new();
        let src = graph.add_block(FloatSource);
        let snk = graph.add_block(FloatSink);

        graph.connect::<f32, _>(&src, "out").unwrap().to(&snk, "in").unwrap();
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.edges()[0].state(), EdgeState::WaitingToBeConnected);

        assert!(graph.connect_pending_edges());
        let edge = &graph.edges()[0];
        assert_eq!(edge.state(), EdgeState::Connected);
        // arithmetic-like default
        assert_eq!(edge.buffer_size(), 65536);
        assert_eq!(edge.channel_kind(), Some(ChannelKind::Bounded));
    }

    #[test]
    fn static_connect_rejects_wrong_sample_type() {
        let mut graph = Graph::new();
        let src = graph.add_block(FloatSource);
        let err = graph.connect::<u32, _>(&src, "out").err().unwrap();
        assert!(matches!(err, GraphError::PortTypeMismatch { .. }));
    }

    #[test]
    fn static_connect_rejects_unknown_port_name() {
        let mut graph = Graph::new();
        let src = graph.add_block(FloatSource);
        let err = graph.connect::<f32, _>(&src, "nope").err().unwrap();
        assert!(matches!(err, GraphError::PortLookup(_)));
    }

    #[test]
    fn foreign_handle_is_not_found() {
        let mut other = Graph::new();
        let foreign = other.add_block(FloatSource);
        let mut graph = Graph::new();
        graph.add_block(FloatSink);
        let err = graph.connect::<f32, _>(&foreign, "out").err().unwrap();
        assert!(matches!(err, GraphError::BlockNotFound { .. }));
    }

    #[test]
    fn type_mismatch_becomes_edge_state_not_error() {
        let mut graph = Graph::new();
        let src = graph.add_block(FloatSource);
        let snk = graph.add_block(TextSink);

        let result = graph.connect_dynamic(src.id(), "out", snk.id(), "in", EdgeOptions::default());
        assert_eq!(result, ConnectionResult::Success);

        let state = graph.apply_edge_connection(0);
        assert_eq!(state, EdgeState::IncompatiblePorts);
        assert_eq!(graph.edges()[0].state(), EdgeState::IncompatiblePorts);
    }

    #[test]
    fn dynamic_connect_with_unknown_port_fails_without_edge() {
        let mut graph = Graph::new();
        let src = graph.add_block(FloatSource);
        let snk = graph.add_block(FloatSink);

        let result = graph.connect_dynamic(src.id(), "missing", snk.id(), "in", EdgeOptions::default());
        assert_eq!(result, ConnectionResult::Failed);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn fan_out_edges_agree_on_the_maximum_size() {
        let mut graph = Graph::new();
        let src = graph.add_block(FloatSource);
        let a = graph.add_block(FloatSink);
        let b = graph.add_block(FloatSink);

        graph
            .connect::<f32, _>(&src, "out")
            .unwrap()
            .with_min_buffer_size(100)
            .to(&a, "in")
            .unwrap();
        graph
            .connect::<f32, _>(&src, "out")
            .unwrap()
            .with_min_buffer_size(500)
            .to(&b, "in")
            .unwrap();

        assert!(graph.connect_pending_edges());
        let sizes: Vec<usize> = graph.edges().iter().map(|e| e.buffer_size()).collect();
        assert_eq!(sizes[0], sizes[1]);
        assert!(sizes[0] >= 500);
    }

    #[test]
    fn realized_size_is_authoritative_for_late_edges() {
        let mut graph = Graph::new();
        let src = graph.add_block(FloatSource);
        let a = graph.add_block(FloatSink);
        let b = graph.add_block(FloatSink);

        graph
            .connect::<f32, _>(&src, "out")
            .unwrap()
            .with_min_buffer_size(500)
            .to(&a, "in")
            .unwrap();
        assert!(graph.connect_pending_edges());

        // a later fan-out edge asks for more, but the buffer already exists
        let result = graph.connect_dynamic(
            src.id(),
            "out",
            b.id(),
            "in",
            EdgeOptions::default().min_buffer_size(9999),
        );
        assert_eq!(result, ConnectionResult::Success);
        assert_eq!(graph.calculate_stream_buffer_size(1), 500);

        assert_eq!(graph.apply_edge_connection(1), EdgeState::Connected);
        assert_eq!(graph.edges()[1].buffer_size(), 500);
    }

    #[test]
    fn non_arithmetic_streams_get_the_small_default() {
        let mut graph = Graph::new();
        let src = graph.add_block(TextSource);
        let snk = graph.add_block(TextSink);

        graph.connect::<String, _>(&src, "out").unwrap().to(&snk, "in").unwrap();
        assert_eq!(graph.edges()[0].min_buffer_size(), 64);

        assert!(graph.connect_pending_edges());
        assert_eq!(graph.edges()[0].buffer_size(), 64);
    }

    #[test]
    fn explicit_zero_capacity_yields_rendezvous_channel() {
        let mut graph = Graph::new();
        let src = graph.add_block(FloatSource);
        let snk = graph.add_block(FloatSink);

        graph
            .connect::<f32, _>(&src, "out")
            .unwrap()
            .with_min_buffer_size(0)
            .to(&snk, "in")
            .unwrap();
        assert!(graph.connect_pending_edges());
        assert_eq!(graph.edges()[0].channel_kind(), Some(ChannelKind::Rendezvous));
    }

    #[test]
    fn second_upstream_into_one_input_is_error_connecting() {
        let mut graph = Graph::new();
        let a = graph.add_block(FloatSource);
        let b = graph.add_block(FloatSource);
        let snk = graph.add_block(FloatSink);

        graph.connect::<f32, _>(&a, "out").unwrap().to(&snk, "in").unwrap();
        graph.connect::<f32, _>(&b, "out").unwrap().to(&snk, "in").unwrap();

        assert!(!graph.connect_pending_edges());
        assert_eq!(graph.edges()[0].state(), EdgeState::Connected);
        assert_eq!(graph.edges()[1].state(), EdgeState::ErrorConnecting);
    }

    #[test]
    fn feedback_self_loop_resolves() {
        let mut graph = Graph::new();
        let pass = graph.add_block(FloatPass);
        graph.connect::<f32, _>(&pass, "out").unwrap().to(&pass, "in").unwrap();
        assert!(graph.connect_pending_edges());
        assert_eq!(graph.edges()[0].state(), EdgeState::Connected);
    }

    #[test]
    fn removal_cascades_to_every_touching_edge() {
        let mut graph = Graph::new();
        let src = graph.add_block(FloatSource);
        let mid = graph.add_block(FloatPass);
        let snk = graph.add_block(FloatSink);

        graph.connect::<f32, _>(&src, "out").unwrap().to(&mid, "in").unwrap();
        graph.connect::<f32, _>(&mid, "out").unwrap().to(&snk, "in").unwrap();
        assert_eq!(graph.edge_count(), 2);

        let unique = graph.model(mid.id()).unwrap().unique_name().to_string();
        let removed = graph.remove_block_by_name(&unique).unwrap();
        assert_eq!(removed.name(), "float_pass");
        assert_eq!(graph.block_count(), 2);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn remove_unknown_block_is_an_error() {
        let mut graph = Graph::new();
        assert!(matches!(
            graph.remove_block_by_name("nope#0"),
            Err(GraphError::BlockNotFound { .. })
        ));
    }

    fn registry_with_pass() -> Arc<BlockRegistry> {
        let mut registry = BlockRegistry::new();
        registry.register("float_pass", |_settings| FloatPass);
        Arc::new(registry)
    }

    #[test]
    fn replace_repoints_edges_and_preserves_their_identity() {
        let mut graph = Graph::with_registry(registry_with_pass());
        let src = graph.add_block(FloatSource);
        let mid = graph.add_block(FloatPass);
        let snk = graph.add_block(FloatSink);

        graph
            .connect::<f32, _>(&src, "out")
            .unwrap()
            .with_name("upstream")
            .with_weight(3)
            .to(&mid, "in")
            .unwrap();
        graph.connect::<f32, _>(&mid, "out").unwrap().to(&snk, "in").unwrap();
        assert!(graph.connect_pending_edges());

        let unique = graph.model(mid.id()).unwrap().unique_name().to_string();
        let (_old, new_id) = graph
            .replace_block(&unique, "float_pass", PropertyMap::new())
            .unwrap();

        assert_eq!(graph.edges()[0].destination_block(), new_id);
        assert_eq!(graph.edges()[1].source_block(), new_id);
        // state, weight and name survive the replacement untouched
        assert_eq!(graph.edges()[0].state(), EdgeState::Connected);
        assert_eq!(graph.edges()[0].weight(), 3);
        assert_eq!(graph.edges()[0].name(), "upstream");

        assert!(graph.reconnect_all_edges());
        assert!(graph.edges().iter().all(|e| e.state() == EdgeState::Connected));
    }

    #[test]
    fn replaced_away_port_resolves_to_port_not_found() {
        let mut registry = BlockRegistry::new();
        registry.register("float_source", |_settings| FloatSource);
        let mut graph = Graph::with_registry(Arc::new(registry));

        let src = graph.add_block(FloatSource);
        let snk = graph.add_block(FloatSink);
        graph.connect::<f32, _>(&src, "out").unwrap().to(&snk, "in").unwrap();

        // swap the sink for a block with no "in" port, then re-resolve: the
        // stale definition must surface as edge state, not a panic
        let unique = graph.model(snk.id()).unwrap().unique_name().to_string();
        graph.replace_block(&unique, "float_source", PropertyMap::new()).unwrap();
        graph.disconnect_all_edges();
        assert!(!graph.connect_pending_edges());
        assert_eq!(graph.edges()[0].state(), EdgeState::PortNotFound);
    }

    #[test]
    fn replaced_port_with_wrong_type_resolves_to_incompatible() {
        let mut registry = BlockRegistry::new();
        registry.register("text_sink", |_settings| TextSink);
        let mut graph = Graph::with_registry(Arc::new(registry));

        let src = graph.add_block(FloatSource);
        let snk = graph.add_block(FloatSink);
        graph.connect::<f32, _>(&src, "out").unwrap().to(&snk, "in").unwrap();

        let unique = graph.model(snk.id()).unwrap().unique_name().to_string();
        graph.replace_block(&unique, "text_sink", PropertyMap::new()).unwrap();
        graph.disconnect_all_edges();
        assert!(!graph.connect_pending_edges());
        assert_eq!(graph.edges()[0].state(), EdgeState::IncompatiblePorts);
    }

    #[test]
    fn disconnect_resets_states_and_reconnect_restores() {
        let mut graph = Graph::new();
        let src = graph.add_block(FloatSource);
        let snk = graph.add_block(FloatSink);
        graph.connect::<f32, _>(&src, "out").unwrap().to(&snk, "in").unwrap();
        assert!(graph.connect_pending_edges());

        graph.disconnect_all_edges();
        assert_eq!(graph.edges()[0].state(), EdgeState::WaitingToBeConnected);
        assert_eq!(graph.edges()[0].buffer_size(), 0);

        assert!(graph.reconnect_all_edges());
        assert_eq!(graph.edges()[0].state(), EdgeState::Connected);
    }

    #[test]
    fn remove_edges_from_unbinds_one_source_port() {
        let mut graph = Graph::new();
        let src = graph.add_block(FloatSource);
        let a = graph.add_block(FloatSink);
        let b = graph.add_block(FloatSink);
        graph.connect::<f32, _>(&src, "out").unwrap().to(&a, "in").unwrap().to(&b, "in").unwrap();
        assert!(graph.connect_pending_edges());

        let unique = graph.model(src.id()).unwrap().unique_name().to_string();
        let removed = graph.remove_edges_from(&unique, "out").unwrap();
        assert_eq!(removed, 2);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn emplace_of_unknown_type_is_an_error() {
        let mut graph = Graph::new();
        let err = graph.emplace_block("no_such_block", PropertyMap::new()).err().unwrap();
        assert!(matches!(err, GraphError::UnknownBlockType(_)));
    }

    #[test]
    fn emplace_through_registry_and_typed_recovery() {
        let mut graph = Graph::with_registry(registry_with_pass());
        let id = graph.emplace_block("float_pass", PropertyMap::new()).unwrap();
        let model = graph.model(id).unwrap();
        assert_eq!(model.name(), "float_pass");
        assert!(model.raw().downcast_ref::<FloatPass>().is_some());
    }

    #[test]
    fn insertion_order_is_preserved() {
        let mut graph = Graph::new();
        graph.add_block(FloatSource);
        graph.add_block(FloatPass);
        graph.add_block(FloatSink);
        let names: Vec<&str> = graph.blocks().map(|b| b.name()).collect();
        assert_eq!(names, vec!["float_source", "float_pass", "float_sink"]);
    }
}

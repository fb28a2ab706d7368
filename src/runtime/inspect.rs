//! Introspection and serialization surface
//!
//! External tooling observes live topology through a request/response message
//! pair keyed by fixed endpoint names: ask to inspect a block or the whole
//! graph, receive a structured property-map description. The serialized
//! shapes carry everything a UI or debugger needs — block identity, settings,
//! port surfaces, nested children for transparent groups, and per-edge
//! connection state including the realized buffer binding.

use serde::Serialize;
use serde_json::{Value, json};

use super::block::{BlockCategory, BlockModel, PropertyMap};
use super::edge::Edge;
use super::errors::GraphError;
use super::graph::Graph;
use super::ports::{PortDefinition, PortEntry};

/// Fixed endpoint names of the introspection message pairs.
pub mod property {
    pub const INSPECT_BLOCK: &str = "InspectBlock";
    pub const BLOCK_INSPECTED: &str = "BlockInspected";
    pub const GRAPH_INSPECT: &str = "GraphInspect";
    pub const GRAPH_INSPECTED: &str = "GraphInspected";
    pub const REGISTRY_BLOCK_TYPES: &str = "RegistryBlockTypes";
    pub const SUBGRAPH_EXPORT_PORT: &str = "SubgraphExportPort";
    pub const SUBGRAPH_EXPORTED_PORT: &str = "SubgraphExportedPort";
}

/// A request or response on the introspection surface.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub endpoint: String,
    pub data: PropertyMap,
}

impl Message {
    pub fn new(endpoint: impl Into<String>, data: PropertyMap) -> Self {
        Self { endpoint: endpoint.into(), data }
    }
}

pub(crate) fn require_str<'a>(data: &'a PropertyMap, endpoint: &str, field: &str) -> Result<&'a str, GraphError> {
    data.get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| GraphError::MalformedMessage {
            endpoint: endpoint.to_string(),
            field: field.to_string(),
        })
}

pub(crate) fn require_bool(data: &PropertyMap, endpoint: &str, field: &str) -> Result<bool, GraphError> {
    data.get(field)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| GraphError::MalformedMessage {
            endpoint: endpoint.to_string(),
            field: field.to_string(),
        })
}

fn insert_port_definition(result: &mut PropertyMap, key: &str, definition: &PortDefinition) {
    match definition {
        PortDefinition::Name { .. } => {
            result.insert(key.to_string(), Value::String(definition.to_string()));
        }
        PortDefinition::Index { index, sub_index } => {
            result.insert(format!("{}.topLevel", key), json!(index));
            if let Some(sub) = sub_index {
                result.insert(format!("{}.subIndex", key), json!(sub));
            }
        }
    }
}

fn serialize_port_entry(entry: &PortEntry) -> Value {
    match entry {
        PortEntry::Single(port) => json!({
            "name": port.name(),
            "type": port.type_name(),
        }),
        PortEntry::Collection { name, ports } => json!({
            "name": name,
            "size": ports.len(),
            "type": ports.first().map(|p| p.type_name()).unwrap_or(""),
        }),
    }
}

/// Serialize one block: identity, settings, port surfaces, and — for
/// transparent groups — nested children and the group's own edges.
pub fn serialize_model(model: &mut dyn BlockModel) -> PropertyMap {
    let mut result = PropertyMap::new();
    result.insert("name".to_string(), json!(model.name()));
    result.insert("uniqueName".to_string(), json!(model.unique_name()));
    result.insert("typeName".to_string(), json!(model.type_name()));
    result.insert("isBlocking".to_string(), json!(model.is_blocking()));
    result.insert("metaInformation".to_string(), Value::Object(model.meta_information().clone()));
    result.insert("blockCategory".to_string(), json!(model.block_category().as_str()));
    result.insert("settings".to_string(), Value::Object(model.settings().clone()));

    let mut input_ports = PropertyMap::new();
    for entry in model.dynamic_input_ports().iter() {
        input_ports.insert(entry.name().to_string(), serialize_port_entry(entry));
    }
    result.insert("inputPorts".to_string(), Value::Object(input_ports));

    let mut output_ports = PropertyMap::new();
    for entry in model.dynamic_output_ports().iter() {
        output_ports.insert(entry.name().to_string(), serialize_port_entry(entry));
    }
    result.insert("outputPorts".to_string(), Value::Object(output_ports));

    if model.block_category() != BlockCategory::NormalBlock {
        if let Some(group) = model.as_group_mut() {
            result.insert("children".to_string(), Value::Object(group.serialize_children()));
            result.insert("edges".to_string(), Value::Object(group.serialize_edges_map()));
        }
    }

    result
}

impl Graph {
    /// Serialize one edge: endpoints, sizing intent, and the realized
    /// binding (state, buffer size, channel kind, reader/writer counts).
    pub fn serialize_edge_at(&mut self, index: usize) -> PropertyMap {
        let edge: Edge = self.edges()[index].clone();
        let mut result = PropertyMap::new();

        let source_name = self
            .unique_name_of(edge.source_block())
            .map(|s| s.to_string())
            .unwrap_or_else(|| edge.source_block().to_string());
        let destination_name = self
            .unique_name_of(edge.destination_block())
            .map(|s| s.to_string())
            .unwrap_or_else(|| edge.destination_block().to_string());

        result.insert("sourceBlock".to_string(), json!(source_name));
        insert_port_definition(&mut result, "sourcePort", edge.source_port_definition());
        result.insert("destinationBlock".to_string(), json!(destination_name));
        insert_port_definition(&mut result, "destinationPort", edge.destination_port_definition());

        result.insert("weight".to_string(), json!(edge.weight()));
        result.insert("minBufferSize".to_string(), json!(edge.min_buffer_size()));
        result.insert("edgeName".to_string(), json!(edge.name()));
        result.insert("bufferSize".to_string(), json!(edge.buffer_size()));
        result.insert("edgeState".to_string(), json!(edge.state().as_str()));
        result.insert(
            "type".to_string(),
            json!(edge.channel_kind().map(|k| k.as_str()).unwrap_or("unconnected")),
        );

        let (n_readers, n_writers) = match self.model_by_id_mut(edge.source_block()) {
            Some(model) => match model.dynamic_output_port(edge.source_port_definition()) {
                Ok(port) => (port.reader_count(), port.writer_count()),
                Err(_) => (0, 0),
            },
            None => (0, 0),
        };
        result.insert("nReaders".to_string(), json!(n_readers));
        result.insert("nWriters".to_string(), json!(n_writers));

        result
    }

    pub(crate) fn serialize_edges_map(&mut self) -> PropertyMap {
        let mut result = PropertyMap::new();
        for index in 0..self.edge_count() {
            result.insert(index.to_string(), Value::Object(self.serialize_edge_at(index)));
        }
        result
    }

    pub(crate) fn serialize_children(&mut self) -> PropertyMap {
        let mut result = PropertyMap::new();
        for block in self.blocks_mut() {
            result.insert(block.unique_name().to_string(), Value::Object(serialize_model(block)));
        }
        result
    }

    /// Serialize a block owned by this graph, by unique name.
    pub fn serialize_block_by_unique_name(&mut self, unique_name: &str) -> Result<PropertyMap, GraphError> {
        let model = self.block_by_unique_name_mut(unique_name)?;
        Ok(serialize_model(model))
    }

    /// Serialize the whole graph: identity, children, edges.
    pub fn serialize(&mut self) -> PropertyMap {
        let mut result = PropertyMap::new();
        result.insert("name".to_string(), json!(self.name()));
        result.insert("uniqueName".to_string(), json!(self.unique_name()));
        result.insert(
            "blockCategory".to_string(),
            json!(BlockCategory::TransparentBlockGroup.as_str()),
        );
        result.insert("children".to_string(), Value::Object(self.serialize_children()));
        result.insert("edges".to_string(), Value::Object(self.serialize_edges_map()));
        result
    }

    /// Dispatch one introspection request and produce its reply.
    ///
    /// Unknown endpoints and unknown unique names are usage errors; they are
    /// the remote analog of calling a lookup with a name that was never
    /// registered.
    pub fn handle_message(&mut self, message: Message) -> Result<Message, GraphError> {
        match message.endpoint.as_str() {
            property::INSPECT_BLOCK => {
                let unique_name = require_str(&message.data, &message.endpoint, "uniqueName")?.to_string();
                let data = self.serialize_block_by_unique_name(&unique_name)?;
                Ok(Message::new(property::BLOCK_INSPECTED, data))
            }
            property::GRAPH_INSPECT => Ok(Message::new(property::GRAPH_INSPECTED, self.serialize())),
            property::REGISTRY_BLOCK_TYPES => {
                let mut data = PropertyMap::new();
                data.insert("types".to_string(), json!(self.registry().available_blocks()));
                Ok(Message::new(property::REGISTRY_BLOCK_TYPES, data))
            }
            _ => Err(GraphError::UnknownEndpoint(message.endpoint)),
        }
    }
}

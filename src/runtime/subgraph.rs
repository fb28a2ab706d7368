//! Transparent block-group wrapper
//!
//! [`SubgraphModel`] presents an owned [`Graph`] as a single block. Child
//! ports become addressable on the wrapper by exporting them; serialization
//! recurses into the children via the block category. The wrapper keeps no
//! port storage of its own — lookups delegate to the owning child block, so a
//! port is never owned outside its block.

use std::any::Any;
use std::sync::Arc;

use tracing::debug;

use super::block::{BlockCategory, BlockModel, ComputeContext, LifecycleState, Progress, PropertyMap, next_unique_id};
use super::errors::{GraphError, PortLookupError, WorkResult};
use super::graph::Graph;
use super::inspect::{Message, property};
use super::ports::{DynamicPort, PortDefinition, PortDirection, PortEntry};

#[derive(Debug, Clone)]
struct ExportedPort {
    block: String,
    port: String,
}

/// A graph wrapped as a transparent block-group.
pub struct SubgraphModel {
    graph: Graph,
    name: String,
    unique_name: String,
    meta_information: PropertyMap,
    settings: PropertyMap,
    state: LifecycleState,
    exported_inputs: Vec<ExportedPort>,
    exported_outputs: Vec<ExportedPort>,
}

impl SubgraphModel {
    pub fn new(graph: Graph) -> Self {
        let name = graph.name().to_string();
        Self {
            graph,
            name,
            unique_name: format!("subgraph#{}", next_unique_id()),
            meta_information: PropertyMap::new(),
            settings: PropertyMap::new(),
            state: LifecycleState::Idle,
            exported_inputs: Vec::new(),
            exported_outputs: Vec::new(),
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// Export (or withdraw) one child port on the wrapper's surface.
    ///
    /// Requesting the state the port is already in is a usage error; so is
    /// naming a child block or port that does not exist.
    pub fn export_port(
        &mut self,
        export: bool,
        block_unique_name: &str,
        direction: PortDirection,
        port_name: &str,
    ) -> Result<(), GraphError> {
        let list = match direction {
            PortDirection::Input => &self.exported_inputs,
            PortDirection::Output => &self.exported_outputs,
        };
        let position = list
            .iter()
            .position(|e| e.block == block_unique_name && e.port == port_name);
        if position.is_some() == export {
            return Err(GraphError::ExportStateUnchanged {
                block: block_unique_name.to_string(),
                port: port_name.to_string(),
                export,
            });
        }

        // the child port must exist before bookkeeping changes
        {
            let model = self.graph.block_by_unique_name_mut(block_unique_name)?;
            let definition = PortDefinition::from(port_name);
            match direction {
                PortDirection::Input => model.dynamic_input_port(&definition)?,
                PortDirection::Output => model.dynamic_output_port(&definition)?,
            };
        }

        let list = match direction {
            PortDirection::Input => &mut self.exported_inputs,
            PortDirection::Output => &mut self.exported_outputs,
        };
        if export {
            list.push(ExportedPort {
                block: block_unique_name.to_string(),
                port: port_name.to_string(),
            });
        } else if let Some(position) = position {
            list.remove(position);
        }
        debug!(block = block_unique_name, port = port_name, export, "port export changed");

        self.update_meta_information();
        Ok(())
    }

    pub fn exported_input_ports(&self) -> impl Iterator<Item = (&str, &str)> {
        self.exported_inputs.iter().map(|e| (e.block.as_str(), e.port.as_str()))
    }

    pub fn exported_output_ports(&self) -> impl Iterator<Item = (&str, &str)> {
        self.exported_outputs.iter().map(|e| (e.block.as_str(), e.port.as_str()))
    }

    /// Handle the port-export request/response message pair.
    pub fn handle_message(&mut self, message: Message) -> Result<Message, GraphError> {
        if message.endpoint != property::SUBGRAPH_EXPORT_PORT {
            return Err(GraphError::UnknownEndpoint(message.endpoint));
        }
        let endpoint = message.endpoint.clone();
        let block = super::inspect::require_str(&message.data, &endpoint, "uniqueBlockName")?.to_string();
        let direction = match super::inspect::require_str(&message.data, &endpoint, "portDirection")? {
            "input" => PortDirection::Input,
            _ => PortDirection::Output,
        };
        let port = super::inspect::require_str(&message.data, &endpoint, "portName")?.to_string();
        let export = super::inspect::require_bool(&message.data, &endpoint, "exportFlag")?;

        self.export_port(export, &block, direction, &port)?;

        Ok(Message {
            endpoint: property::SUBGRAPH_EXPORTED_PORT.to_string(),
            data: message.data,
        })
    }

    fn update_meta_information(&mut self) {
        let collect = |list: &[ExportedPort]| {
            let mut map = PropertyMap::new();
            for entry in list {
                let ports = map
                    .entry(entry.block.clone())
                    .or_insert_with(|| serde_json::Value::Array(Vec::new()));
                if let serde_json::Value::Array(ports) = ports {
                    ports.push(serde_json::Value::String(entry.port.clone()));
                }
            }
            serde_json::Value::Object(map)
        };
        self.meta_information
            .insert("exportedInputPorts".to_string(), collect(&self.exported_inputs));
        self.meta_information
            .insert("exportedOutputPorts".to_string(), collect(&self.exported_outputs));
    }

    fn resolve_exported(
        &mut self,
        direction: PortDirection,
        definition: &PortDefinition,
    ) -> Result<&mut DynamicPort, PortLookupError> {
        let list = match direction {
            PortDirection::Input => &self.exported_inputs,
            PortDirection::Output => &self.exported_outputs,
        };
        let entry = match definition {
            PortDefinition::Index { index, sub_index: None } => list.get(*index).cloned(),
            PortDefinition::Index { .. } => None,
            _ => {
                let key = definition.to_string();
                list.iter().find(|e| e.port == key).cloned()
            }
        }
        .ok_or_else(|| PortLookupError::NotFound {
            block: self.unique_name.clone(),
            port: definition.to_string(),
        })?;

        let model = self
            .graph
            .block_by_unique_name_mut(&entry.block)
            .map_err(|_| PortLookupError::NotFound {
                block: self.unique_name.clone(),
                port: definition.to_string(),
            })?;
        let child_definition = PortDefinition::from(entry.port.as_str());
        match direction {
            PortDirection::Input => model.dynamic_input_port(&child_definition),
            PortDirection::Output => model.dynamic_output_port(&child_definition),
        }
    }
}

impl BlockModel for SubgraphModel {
    fn init(&mut self, _progress: Arc<Progress>, _context: &ComputeContext) {
        // children were initialized when they joined the inner graph
        if self.state == LifecycleState::Idle {
            self.state = LifecycleState::Initialized;
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn unique_name(&self) -> &str {
        &self.unique_name
    }

    fn type_name(&self) -> &str {
        "subgraph"
    }

    fn block_category(&self) -> BlockCategory {
        BlockCategory::TransparentBlockGroup
    }

    fn state(&self) -> LifecycleState {
        self.state
    }

    fn change_state(&mut self, next: LifecycleState) -> Result<(), GraphError> {
        self.state = next;
        Ok(())
    }

    fn meta_information(&self) -> &PropertyMap {
        &self.meta_information
    }

    fn meta_information_mut(&mut self) -> &mut PropertyMap {
        &mut self.meta_information
    }

    fn settings(&self) -> &PropertyMap {
        &self.settings
    }

    fn init_dynamic_ports(&mut self) {
        for block in self.graph.blocks_mut() {
            block.init_dynamic_ports();
        }
    }

    fn dynamic_input_ports(&mut self) -> &mut [PortEntry] {
        // the children own all port storage; the wrapper's surface is the
        // exported set, reachable through the by-definition lookups
        &mut []
    }

    fn dynamic_output_ports(&mut self) -> &mut [PortEntry] {
        &mut []
    }

    fn dynamic_input_port(&mut self, definition: &PortDefinition) -> Result<&mut DynamicPort, PortLookupError> {
        self.resolve_exported(PortDirection::Input, definition)
    }

    fn dynamic_output_port(&mut self, definition: &PortDefinition) -> Result<&mut DynamicPort, PortLookupError> {
        self.resolve_exported(PortDirection::Output, definition)
    }

    fn raw(&self) -> &dyn Any {
        self
    }

    fn raw_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn as_group(&self) -> Option<&Graph> {
        Some(&self.graph)
    }

    fn as_group_mut(&mut self) -> Option<&mut Graph> {
        Some(&mut self.graph)
    }

    fn work(&mut self, _requested_work: usize) -> WorkResult<usize> {
        // driving the inner topology is the external scheduler's job
        Ok(0)
    }
}

//! Runtime support for streaming dataflow graphs

pub mod block;
pub mod edge;
pub mod errors;
pub mod graph;
pub mod inspect;
pub mod merged;
pub mod ports;
pub mod registry;
pub mod sample;
pub mod stream;
pub mod subgraph;

pub use block::{
    Block, BlockCategory, BlockModel, BlockWrapper, ComputeContext, LifecycleState, Progress, PropertyMap,
};
pub use edge::{BlockId, DEFAULT_EDGE_NAME, DEFAULT_EDGE_WEIGHT, Edge, EdgeOptions, EdgeState};
pub use errors::{
    BindError, ConnectionResult, GraphError, PortLookupError, WorkError, WorkResult,
};
pub use graph::{BlockHandle, Graph, SourceConnector};
pub use inspect::{Message, property, serialize_model};
pub use merged::{Merged, PortSide, ProcessBulk, ProcessOne, Tuple, merge_by_index};
pub use ports::{
    ChannelKind, DynamicPort, PortDecl, PortDefinition, PortDirection, PortEntry, PortInfo,
};
pub use registry::BlockRegistry;
pub use sample::{Sample, default_min_buffer_size};
pub use stream::{StreamReader, StreamWriter};
pub use subgraph::SubgraphModel;

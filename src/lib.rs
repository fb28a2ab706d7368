//! Streaming dataflow graph substrate
//!
//! Independent processing units ("blocks") exchange typed samples through
//! directional ports, wired into a topology executed by an external
//! scheduler. This crate is the construction and wiring layer: which blocks
//! may be connected to which, how the buffer between them is sized and shared
//! across fan-out, how a topology is mutated safely at runtime, and how two
//! statically-known blocks fuse into one unit with no intermediate buffer.
//!
//! # Architecture
//!
//! - **[`Graph`]**: owns blocks (type-erased behind [`BlockModel`]) and
//!   edges; offers a compile-time-checked fluent connection API for static
//!   block types and a name/index API for dynamically assembled topologies
//! - **Connection resolution**: per source port, fan-out edges negotiate one
//!   shared buffer size; every failure mode lands in the edge's state, never
//!   in a panic
//! - **[`merge_by_index`]**: compile-time fusion of two per-sample blocks,
//!   trading runtime reconfigurability for zero-indirection throughput
//! - **[`BlockRegistry`]**: by-name block instantiation, passed explicitly so
//!   graphs carry no process-wide registration state
//! - **Introspection**: property-map serialization of blocks and edges behind
//!   fixed request/response endpoints
//!
//! # Example
//!
//! ```
//! use sigflow::Graph;
//! use sigflow::blocks::{VectorSink, VectorSource};
//!
//! let mut graph = Graph::new();
//! let src = graph.add_block(VectorSource::new(vec![1.0f32, 2.0, 3.0]));
//! let snk = graph.add_block(VectorSink::<f32>::new());
//! graph.connect::<f32, _>(&src, "out")?.to(&snk, "in")?;
//! assert!(graph.connect_pending_edges());
//! # Ok::<(), sigflow::GraphError>(())
//! ```

pub mod blocks;
pub mod runtime;

pub use runtime::{
    Block, BlockCategory, BlockHandle, BlockId, BlockModel, BlockRegistry, BlockWrapper, ChannelKind,
    ComputeContext, ConnectionResult, DynamicPort, Edge, EdgeOptions, EdgeState, Graph, GraphError,
    LifecycleState, Merged, Message, PortDecl, PortDefinition, PortDirection, PortEntry, PortInfo,
    PortLookupError, PortSide, ProcessBulk, ProcessOne, Progress, PropertyMap, Sample, SourceConnector,
    StreamReader, StreamWriter, SubgraphModel, WorkError, WorkResult, merge_by_index, property,
};

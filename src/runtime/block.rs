//! Block contract and type-erased block model
//!
//! Concrete blocks implement [`Block`]; a graph owns them behind the
//! [`BlockModel`] trait so one container can hold arbitrarily-typed blocks,
//! including types instantiated through the registry at runtime.
//! [`BlockWrapper`] is the one-wrapper-per-concrete-type bridge between the
//! two.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tracing::debug;

use super::errors::{GraphError, PortLookupError, WorkResult};
use super::graph::Graph;
use super::ports::{DynamicPort, PortDecl, PortDefinition, PortEntry, find_port};

/// Structured, hierarchical key-value data: block settings, meta information,
/// and the introspection surface.
pub type PropertyMap = serde_json::Map<String, serde_json::Value>;

/// Monotonic counter shared by every block of a graph. Incremented by blocks
/// (or their scheduler) whenever data or messages were processed.
#[derive(Debug, Default)]
pub struct Progress(AtomicU64);

impl Progress {
    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

/// Where a graph's blocks execute; forwarded to every block's `init`.
#[derive(Debug, Clone)]
pub struct ComputeContext {
    pub compute_domain: String,
}

impl Default for ComputeContext {
    fn default() -> Self {
        Self { compute_domain: "cpu".to_string() }
    }
}

/// Lifecycle state of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Initialized,
    Running,
    Stopped,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "Idle",
            LifecycleState::Initialized => "Initialized",
            LifecycleState::Running => "Running",
            LifecycleState::Stopped => "Stopped",
        }
    }
}

/// Distinguishes a normal block from a transparent block-group (sub-graph),
/// so serialization knows to recurse into children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCategory {
    NormalBlock,
    TransparentBlockGroup,
}

impl BlockCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockCategory::NormalBlock => "NormalBlock",
            BlockCategory::TransparentBlockGroup => "TransparentBlockGroup",
        }
    }
}

/// Contract every concrete block satisfies.
///
/// The core consumes only the port/settings/lifecycle surface; how the
/// transform is implemented internally (per-sample kernel, block transform,
/// external device) is the block's business.
pub trait Block: Send + 'static {
    /// Display name of the block.
    fn name(&self) -> &str;

    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Declared input ports, in port-index order.
    fn input_ports(&self) -> Vec<PortDecl>;

    /// Declared output ports, in port-index order.
    fn output_ports(&self) -> Vec<PortDecl>;

    /// One-time setup, called when the block joins a graph.
    fn init(&mut self, _progress: &Arc<Progress>, _context: &ComputeContext) {}

    /// Lifecycle hook: the external scheduler is about to drive this block.
    fn start(&mut self) {}

    /// Lifecycle hook: the external scheduler stopped driving this block.
    fn stop(&mut self) {}

    /// Apply an initial or updated settings map.
    fn apply_settings(&mut self, _settings: &PropertyMap) {}

    /// Whether the block may block its driving thread (device I/O etc.).
    fn is_blocking(&self) -> bool {
        false
    }

    /// Block-transform entry point, driven by an external scheduler. Readers
    /// and writers are recovered from the bound ports. Blocks implemented as
    /// pure per-sample kernels can leave the default.
    fn work(&mut self, _inputs: &[PortEntry], _outputs: &[PortEntry]) -> WorkResult<usize> {
        Ok(0)
    }
}

static UNIQUE_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

pub(crate) fn next_unique_id() -> usize {
    UNIQUE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Strip module paths (but not generic arguments) from a full type name.
pub(crate) fn short_type_name(full: &str) -> &str {
    let head_end = full.find('<').unwrap_or(full.len());
    match full[..head_end].rfind("::") {
        Some(pos) => &full[pos + 2..],
        None => full,
    }
}

/// Uniform runtime interface over an arbitrarily-typed block.
///
/// A graph owns a heterogeneous collection of these; everything a graph,
/// serializer, or scheduler needs goes through this surface. Port lists are
/// materialized lazily on first access and cached for the block's lifetime.
pub trait BlockModel: Send {
    /// One-time setup; a second call is ignored.
    fn init(&mut self, progress: Arc<Progress>, context: &ComputeContext);

    fn name(&self) -> &str;

    fn set_name(&mut self, name: String);

    /// Process-wide unique name, `"<type>#<n>"`.
    fn unique_name(&self) -> &str;

    fn type_name(&self) -> &str;

    fn block_category(&self) -> BlockCategory {
        BlockCategory::NormalBlock
    }

    fn is_blocking(&self) -> bool {
        false
    }

    fn state(&self) -> LifecycleState;

    /// Drive the lifecycle state machine, forwarding `start`/`stop` hooks.
    fn change_state(&mut self, next: LifecycleState) -> Result<(), GraphError>;

    fn meta_information(&self) -> &PropertyMap;

    fn meta_information_mut(&mut self) -> &mut PropertyMap;

    fn settings(&self) -> &PropertyMap;

    /// Force materialization of the dynamic port lists.
    fn init_dynamic_ports(&mut self);

    fn dynamic_input_ports(&mut self) -> &mut [PortEntry];

    fn dynamic_output_ports(&mut self) -> &mut [PortEntry];

    fn dynamic_input_port(&mut self, definition: &PortDefinition) -> Result<&mut DynamicPort, PortLookupError>;

    fn dynamic_output_port(&mut self, definition: &PortDefinition) -> Result<&mut DynamicPort, PortLookupError>;

    /// Untyped reference to the concrete block instance, for callers that
    /// know the concrete type.
    fn raw(&self) -> &dyn Any;

    fn raw_mut(&mut self) -> &mut dyn Any;

    /// The owned sub-graph, if this model is a transparent block-group.
    fn as_group(&self) -> Option<&Graph> {
        None
    }

    fn as_group_mut(&mut self) -> Option<&mut Graph> {
        None
    }

    /// Forward to the block's transform entry point.
    fn work(&mut self, requested_work: usize) -> WorkResult<usize>;
}

struct DynamicPorts {
    inputs: Vec<PortEntry>,
    outputs: Vec<PortEntry>,
}

fn build_ports<B: Block>(block: &B) -> DynamicPorts {
    DynamicPorts {
        inputs: block.input_ports().into_iter().map(PortEntry::materialize).collect(),
        outputs: block.output_ports().into_iter().map(PortEntry::materialize).collect(),
    }
}

/// Type-erasing wrapper: one per concrete block type used in a process.
pub struct BlockWrapper<B: Block> {
    block: B,
    name: String,
    unique_name: String,
    settings: PropertyMap,
    meta_information: PropertyMap,
    state: LifecycleState,
    initialized: bool,
    ports: Option<DynamicPorts>,
}

impl<B: Block> BlockWrapper<B> {
    pub fn new(block: B) -> Self {
        Self::with_settings(block, PropertyMap::new())
    }

    pub fn with_settings(mut block: B, settings: PropertyMap) -> Self {
        block.apply_settings(&settings);
        let name = block.name().to_string();
        let unique_name = format!("{}#{}", short_type_name(block.type_name()), next_unique_id());
        Self {
            block,
            name,
            unique_name,
            settings,
            meta_information: PropertyMap::new(),
            state: LifecycleState::Idle,
            initialized: false,
            ports: None,
        }
    }

    pub fn block(&self) -> &B {
        &self.block
    }

    pub fn block_mut(&mut self) -> &mut B {
        &mut self.block
    }

    fn ensure_ports(&mut self) {
        if self.ports.is_none() {
            self.ports = Some(build_ports(&self.block));
        }
    }
}

impl<B: Block> BlockModel for BlockWrapper<B> {
    fn init(&mut self, progress: Arc<Progress>, context: &ComputeContext) {
        if self.initialized {
            debug!(block = %self.unique_name, "init called twice, ignoring");
            return;
        }
        self.block.init(&progress, context);
        self.initialized = true;
        self.state = LifecycleState::Initialized;
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
        self.block.type_name()
    }

    fn is_blocking(&self) -> bool {
        self.block.is_blocking()
    }

    fn state(&self) -> LifecycleState {
        self.state
    }

    fn change_state(&mut self, next: LifecycleState) -> Result<(), GraphError> {
        use LifecycleState::*;
        match (self.state, next) {
            (current, target) if current == target => Ok(()),
            (Initialized, Running) => {
                self.block.start();
                self.state = Running;
                Ok(())
            }
            (Running, Stopped) => {
                self.block.stop();
                self.state = Stopped;
                Ok(())
            }
            (Stopped, Initialized) => {
                self.state = Initialized;
                Ok(())
            }
            (from, to) => Err(GraphError::InvalidStateTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            }),
        }
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
        self.ensure_ports();
    }

    fn dynamic_input_ports(&mut self) -> &mut [PortEntry] {
        self.ensure_ports();
        &mut self.ports.as_mut().expect("ports just materialized").inputs
    }

    fn dynamic_output_ports(&mut self) -> &mut [PortEntry] {
        self.ensure_ports();
        &mut self.ports.as_mut().expect("ports just materialized").outputs
    }

    fn dynamic_input_port(&mut self, definition: &PortDefinition) -> Result<&mut DynamicPort, PortLookupError> {
        self.ensure_ports();
        let ports = self.ports.as_mut().expect("ports just materialized");
        find_port(&self.unique_name, &mut ports.inputs, definition)
    }

    fn dynamic_output_port(&mut self, definition: &PortDefinition) -> Result<&mut DynamicPort, PortLookupError> {
        self.ensure_ports();
        let ports = self.ports.as_mut().expect("ports just materialized");
        find_port(&self.unique_name, &mut ports.outputs, definition)
    }

    fn raw(&self) -> &dyn Any {
        &self.block
    }

    fn raw_mut(&mut self) -> &mut dyn Any {
        &mut self.block
    }

    fn work(&mut self, _requested_work: usize) -> WorkResult<usize> {
        self.ensure_ports();
        let ports = self.ports.as_ref().expect("ports just materialized");
        self.block.work(&ports.inputs, &ports.outputs)
    }
}

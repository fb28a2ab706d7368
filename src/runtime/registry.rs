//! Block instantiation registry
//!
//! The plugin contract consumed by the graph: given a type name and an
//! initial settings map, construct an owned block model or report that the
//! type is unknown. A registry is an explicit value passed into
//! [`Graph::with_registry`](super::graph::Graph::with_registry) — there is no
//! process-wide registration state, so graphs built in tests carry exactly
//! the types they register.

use std::collections::BTreeMap;

use super::block::{Block, BlockModel, BlockWrapper, PropertyMap};

type BlockFactory = Box<dyn Fn(PropertyMap) -> Box<dyn BlockModel> + Send + Sync>;

/// Registry of block types constructible by name.
#[derive(Default)]
pub struct BlockRegistry {
    entries: BTreeMap<String, BlockFactory>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self { entries: BTreeMap::new() }
    }

    /// Register a block type under `type_name`. The constructor receives the
    /// instantiation settings; the same map is also stored on the wrapper and
    /// forwarded to the block's `apply_settings` hook.
    pub fn register<B, F>(&mut self, type_name: impl Into<String>, constructor: F)
    where
        B: Block,
        F: Fn(&PropertyMap) -> B + Send + Sync + 'static,
    {
        self.entries.insert(
            type_name.into(),
            Box::new(move |settings| {
                let block = constructor(&settings);
                Box::new(BlockWrapper::with_settings(block, settings))
            }),
        );
    }

    /// Construct a block of the named type, or `None` if the type is unknown.
    pub fn instantiate(&self, type_name: &str, settings: PropertyMap) -> Option<Box<dyn BlockModel>> {
        self.entries.get(type_name).map(|factory| factory(settings))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }

    /// The set of type names this registry can construct, sorted.
    pub fn available_blocks(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

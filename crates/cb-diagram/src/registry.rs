//! Block factories keyed by type tag.

use std::collections::BTreeMap;

use crate::block::{BlockKind, StateSpaceParams};
use crate::error::{DiagramError, DiagramResult};
use crate::params;

/// Builds a block kind with default parameters.
pub type BlockFactory = fn() -> BlockKind;

/// Builds a block kind from its document fields.
pub type ParamDecoder = fn(&toml::Table) -> DiagramResult<BlockKind>;

#[derive(Debug, Clone, Copy)]
struct Entry {
    create: BlockFactory,
    decode: ParamDecoder,
}

/// Registry of the block types a diagram can create or load.
#[derive(Debug, Clone)]
pub struct BlockRegistry {
    entries: BTreeMap<String, Entry>,
}

impl BlockRegistry {
    /// Registry with no block types.
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Register (or replace) a type tag.
    pub fn register(&mut self, tag: impl Into<String>, create: BlockFactory, decode: ParamDecoder) {
        self.entries.insert(tag.into(), Entry { create, decode });
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.entries.contains_key(tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn create(&self, tag: &str) -> DiagramResult<BlockKind> {
        self.entry(tag).map(|e| (e.create)())
    }

    pub fn decode(&self, tag: &str, fields: &toml::Table) -> DiagramResult<BlockKind> {
        self.entry(tag).and_then(|e| (e.decode)(fields))
    }

    fn entry(&self, tag: &str) -> DiagramResult<&Entry> {
        self.entries.get(tag).ok_or_else(|| DiagramError::NotFound {
            what: format!("block type '{tag}'"),
        })
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("Block", || BlockKind::Generic, params::decode_generic);
        registry.register("ConstantBlock", || BlockKind::constant(0.0), params::decode_constant);
        registry.register("GainBlock", || BlockKind::gain(0.0), params::decode_gain);
        registry.register("SumBlock", || BlockKind::Sum, params::decode_sum);
        registry.register("MuxBlock", || BlockKind::Mux, params::decode_mux);
        registry.register("DisplayBlock", BlockKind::display, params::decode_display);
        registry.register(
            "StateSpaceBlock",
            || BlockKind::StateSpace(StateSpaceParams::default()),
            params::decode_state_space,
        );
        registry
    }
}

//! TOML document format for diagrams.
//!
//! Loading merges the document into the live diagram. Identifiers in the
//! file are shifted so the loaded subgraph starts at the diagram's next free
//! identifier, which lets the same file be loaded several times side by side.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use cb_core::{BlockId, CoreError, Id, PortId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::block::{Block, BlockKind, Position};
use crate::diagram::Diagram;
use crate::error::DiagramError;
use crate::params;
use crate::port::{Port, PortDirection};

pub type PersistResult<T> = Result<T, PersistError>;

#[derive(thiserror::Error, Debug)]
pub enum PersistError {
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Format error: {what}")]
    Format { what: String },

    #[error(transparent)]
    Diagram(#[from] DiagramError),
}

/// Top-level document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagramDoc {
    /// Smallest block identifier in the document.
    pub min_id: i64,
    #[serde(default)]
    pub blocks: Vec<BlockDoc>,
}

/// One block entry. Type-specific fields sit next to the common ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDoc {
    #[serde(rename = "type")]
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub x_pos: f64,
    #[serde(default)]
    pub y_pos: f64,
    #[serde(flatten)]
    pub params: toml::Table,
    #[serde(default)]
    pub inputs: Vec<toml::Value>,
    #[serde(default)]
    pub outputs: Vec<toml::Value>,
}

/// One port entry inside a block's `inputs` or `outputs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDoc {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i64>,
    /// 0 = input, 1 = output
    #[serde(rename = "type")]
    pub direction: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_optional: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conns: Option<PortConns>,
}

/// Connection ids: a single upstream id for inputs, a list for outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortConns {
    Single(i64),
    Many(Vec<i64>),
}

impl PortConns {
    fn ids(&self) -> &[i64] {
        match self {
            PortConns::Single(id) => std::slice::from_ref(id),
            PortConns::Many(ids) => ids,
        }
    }
}

/// Summary of a load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub blocks_loaded: usize,
    pub blocks_skipped: usize,
    pub wires_created: usize,
    pub wires_refused: usize,
}

/// Lenient view of the document: block entries are decoded one at a time.
#[derive(Deserialize)]
struct RawDoc {
    min_id: Option<i64>,
    #[serde(default)]
    blocks: Vec<toml::Value>,
}

struct Entry {
    id: i64,
    name: Option<String>,
    position: Position,
    kind: BlockKind,
    inputs: Vec<PortDoc>,
    outputs: Vec<PortDoc>,
}

impl Entry {
    fn ids(&self) -> impl Iterator<Item = i64> + '_ {
        std::iter::once(self.id)
            .chain(self.inputs.iter().map(|p| p.id))
            .chain(self.outputs.iter().map(|p| p.id))
    }
}

/// An entry whose identifiers have been shifted and reserved.
struct Placed {
    entry: Entry,
    id: BlockId,
    inputs: Vec<PortId>,
    outputs: Vec<PortId>,
}

fn parse_entry(diagram: &Diagram, value: toml::Value) -> Result<Entry, String> {
    let doc: BlockDoc = value.try_into().map_err(|e| format!("malformed block: {e}"))?;
    let id = doc
        .id
        .ok_or_else(|| format!("{} entry has no id", doc.tag))?;
    let kind = diagram
        .registry
        .decode(&doc.tag, &doc.params)
        .map_err(|e| e.to_string())?;
    let inputs = parse_ports(doc.inputs, PortDirection::Input)?;
    let outputs = parse_ports(doc.outputs, PortDirection::Output)?;
    Ok(Entry {
        id,
        name: doc.name,
        position: Position::new(doc.x_pos, doc.y_pos),
        kind,
        inputs,
        outputs,
    })
}

fn parse_ports(values: Vec<toml::Value>, side: PortDirection) -> Result<Vec<PortDoc>, String> {
    values
        .into_iter()
        .map(|value| {
            let port: PortDoc = value.try_into().map_err(|e| format!("malformed port: {e}"))?;
            match PortDirection::from_code(port.direction) {
                Some(dir) if dir == side => Ok(port),
                _ => Err(format!(
                    "port {} has type {} in the {side:?} list",
                    port.id, port.direction
                )),
            }
        })
        .collect()
}

impl Diagram {
    /// Build the document for the current diagram.
    pub fn to_document(&self) -> PersistResult<DiagramDoc> {
        let mut blocks = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            let inputs = self.port_docs(block.inputs())?;
            let outputs = self.port_docs(block.outputs())?;
            let position = block.position();
            blocks.push(BlockDoc {
                tag: block.kind().tag().to_string(),
                name: Some(block.name().to_string()),
                id: Some(i64::from(block.id())),
                x_pos: position.x,
                y_pos: position.y,
                params: params::encode(block.kind()),
                inputs,
                outputs,
            });
        }
        let min_id = self
            .blocks
            .iter()
            .map(|b| i64::from(b.id()))
            .min()
            .unwrap_or(0);
        Ok(DiagramDoc { min_id, blocks })
    }

    fn port_docs(&self, ids: &[PortId]) -> PersistResult<Vec<toml::Value>> {
        ids.iter()
            .map(|&id| {
                let port = self.ports.get(id).ok_or_else(|| PersistError::Format {
                    what: format!("block references missing port {id}"),
                })?;
                let conns = match port.direction() {
                    PortDirection::Input => port.upstream().map(|u| PortConns::Single(u.into())),
                    PortDirection::Output => Some(PortConns::Many(
                        port.downstream().iter().map(|&d| i64::from(d)).collect(),
                    )),
                };
                let doc = PortDoc {
                    id: id.into(),
                    name: port.name().to_string(),
                    parent_id: Some(port.parent().into()),
                    direction: port.direction().code(),
                    is_optional: Some(port.is_optional()),
                    conns,
                };
                Ok(toml::Value::try_from(doc)?)
            })
            .collect()
    }

    pub fn to_toml_string(&self) -> PersistResult<String> {
        Ok(toml::to_string(&self.to_document()?)?)
    }

    pub fn save(&self, path: &Path) -> PersistResult<()> {
        let content = self.to_toml_string()?;
        std::fs::write(path, content)?;
        info!(path = %path.display(), blocks = self.blocks.len(), "diagram saved");
        Ok(())
    }

    /// Merge a document from disk into this diagram.
    pub fn load(&mut self, path: &Path) -> PersistResult<LoadReport> {
        let content = std::fs::read_to_string(path)?;
        let report = self.load_toml_str(&content)?;
        info!(
            path = %path.display(),
            loaded = report.blocks_loaded,
            skipped = report.blocks_skipped,
            "diagram loaded"
        );
        Ok(report)
    }

    /// Merge a document into this diagram.
    ///
    /// Blocks are created first with shifted identifiers, then recorded
    /// connections are replayed through [`Diagram::add_wire`]: output lists
    /// first, then input links that are still missing.
    /// Entries that cannot be decoded are skipped with a warning.
    pub fn load_toml_str(&mut self, text: &str) -> PersistResult<LoadReport> {
        self.ensure_editable()?;
        let raw: RawDoc = toml::from_str(text)?;
        let mut report = LoadReport::default();

        let mut entries = Vec::with_capacity(raw.blocks.len());
        for (index, value) in raw.blocks.into_iter().enumerate() {
            match parse_entry(self, value) {
                Ok(entry) => entries.push(entry),
                Err(reason) => {
                    warn!(index, %reason, "skipping block entry");
                    report.blocks_skipped += 1;
                }
            }
        }

        let smallest = entries.iter().flat_map(Entry::ids).min();
        let origin = match (raw.min_id, smallest) {
            (_, None) => return Ok(report),
            (Some(min_id), Some(smallest)) => min_id.min(smallest),
            (None, Some(smallest)) => smallest,
        };
        let base = i64::from(self.ids.peek_next());
        debug!(origin, base, entries = entries.len(), "loading document");

        let placed = self.reserve_entries(entries, origin, base, &mut report);

        let mut port_map: HashMap<i64, PortId> = HashMap::new();
        for p in &placed {
            for (doc, &id) in p.entry.inputs.iter().zip(&p.inputs) {
                port_map.insert(doc.id, id);
            }
            for (doc, &id) in p.entry.outputs.iter().zip(&p.outputs) {
                port_map.insert(doc.id, id);
            }
        }

        let mut created = Vec::with_capacity(placed.len());
        for p in placed {
            let id = p.id;
            match self.create_loaded_block(p) {
                Ok(block) => {
                    created.push(block);
                    report.blocks_loaded += 1;
                }
                Err(err) => {
                    warn!(block = %id, error = %err, "skipping block without room for its ports");
                    self.ids.release(id);
                    report.blocks_skipped += 1;
                }
            }
        }

        for (entry, _, outputs) in &created {
            for (doc, &from) in entry.outputs.iter().zip(outputs) {
                for &target in doc.conns.iter().flat_map(PortConns::ids) {
                    self.replay_link(from, target, &port_map, &mut report);
                }
            }
        }
        for (entry, inputs, _) in &created {
            for (doc, &to) in entry.inputs.iter().zip(inputs) {
                let Some(&source) = doc.conns.iter().flat_map(PortConns::ids).next() else {
                    continue;
                };
                let already = self.ports.get(to).and_then(Port::upstream);
                if already.is_some() && already == port_map.get(&source).copied() {
                    continue;
                }
                self.replay_link(to, source, &port_map, &mut report);
            }
        }

        debug!(?report, "document merged");
        Ok(report)
    }

    /// Shift identifiers, drop duplicates and reserve everything that stays.
    fn reserve_entries(
        &mut self,
        entries: Vec<Entry>,
        origin: i64,
        base: i64,
        report: &mut LoadReport,
    ) -> Vec<Placed> {
        let shift = |orig: i64| match orig.checked_sub(origin).and_then(|v| v.checked_add(base)) {
            Some(value) => Id::try_from_i64(value),
            None => Err(CoreError::IdOutOfRange { value: orig }),
        };
        let mut claimed: HashSet<i64> = HashSet::new();
        let mut placed = Vec::with_capacity(entries.len());

        for entry in entries {
            let ids: Vec<i64> = entry.ids().collect();
            let unique: HashSet<i64> = ids.iter().copied().collect();
            if unique.len() != ids.len() || ids.iter().any(|id| claimed.contains(id)) {
                warn!(id = entry.id, "skipping block with duplicate identifiers");
                report.blocks_skipped += 1;
                continue;
            }
            let shifted = ids.iter().map(|&id| shift(id)).collect::<Result<Vec<Id>, _>>();
            let shifted = match shifted {
                Ok(shifted) => shifted,
                Err(err) => {
                    warn!(id = entry.id, error = %err, "skipping block with unusable identifier");
                    report.blocks_skipped += 1;
                    continue;
                }
            };
            for &id in &shifted {
                self.ids.reserve(id);
            }
            claimed.extend(ids);

            let n_in = entry.inputs.len();
            let id = shifted[0];
            let inputs = shifted[1..1 + n_in].to_vec();
            let outputs = shifted[1 + n_in..].to_vec();
            placed.push(Placed {
                entry,
                id,
                inputs,
                outputs,
            });
        }
        placed
    }

    fn create_loaded_block(
        &mut self,
        p: Placed,
    ) -> PersistResult<(Entry, Vec<PortId>, Vec<PortId>)> {
        let Placed {
            entry,
            id,
            mut inputs,
            mut outputs,
        } = p;
        let layout = entry.kind.layout();

        if entry.inputs.is_empty() && entry.outputs.is_empty() {
            self.ids
                .ensure_available(layout.inputs.len() + layout.outputs.len())
                .map_err(DiagramError::from)?;
            for (name, optional) in &layout.inputs {
                inputs.push(self.new_port(id, name.clone(), PortDirection::Input, *optional)?);
            }
            for name in &layout.outputs {
                outputs.push(self.new_port(id, name.clone(), PortDirection::Output, false)?);
            }
        } else {
            for (i, (doc, &port)) in entry.inputs.iter().zip(&inputs).enumerate() {
                let fallback = layout.inputs.get(i);
                let optional = doc
                    .is_optional
                    .or(fallback.map(|(_, o)| *o))
                    .unwrap_or(false);
                let name = port_name(&doc.name, fallback.map(|(n, _)| n.as_str()), "in", i);
                self.ports
                    .insert(Port::new(port, name, PortDirection::Input, id, optional));
            }
            for (i, (doc, &port)) in entry.outputs.iter().zip(&outputs).enumerate() {
                let fallback = layout.outputs.get(i).map(String::as_str);
                let name = port_name(&doc.name, fallback, "out", i);
                self.ports
                    .insert(Port::new(port, name, PortDirection::Output, id, false));
            }
            for doc in entry.inputs.iter().chain(&entry.outputs) {
                if doc.parent_id.is_some_and(|parent| parent != entry.id) {
                    debug!(port = doc.id, block = entry.id, "port parent id does not match its block");
                }
            }
        }

        let name = entry
            .name
            .clone()
            .unwrap_or_else(|| entry.kind.default_name().to_string());
        let mut block = Block::new(
            id,
            name,
            entry.kind.clone(),
            inputs.clone(),
            outputs.clone(),
        );
        block.set_position(entry.position);
        debug!(block = %id, kind = block.kind().tag(), "block loaded");
        self.blocks.push(block);
        Ok((entry, inputs, outputs))
    }

    /// Re-establish one recorded connection. `target` is the id from the file.
    fn replay_link(
        &mut self,
        port: PortId,
        target: i64,
        port_map: &HashMap<i64, PortId>,
        report: &mut LoadReport,
    ) {
        let Some(&other) = port_map.get(&target) else {
            if target != 0 {
                warn!(port = %port, target, "dropping connection to unknown port");
                report.wires_refused += 1;
            }
            return;
        };
        match self.add_wire(port, other) {
            Ok(_) => report.wires_created += 1,
            Err(err) => {
                debug!(port = %port, target, error = %err, "recorded connection refused");
                report.wires_refused += 1;
            }
        }
    }
}

fn port_name(doc: &str, fallback: Option<&str>, prefix: &str, index: usize) -> String {
    if !doc.is_empty() {
        return doc.to_string();
    }
    fallback.map_or_else(|| format!("{prefix}{}", index + 1), str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_conns_are_omitted_when_unconnected() {
        let mut d = Diagram::new();
        d.add_block("GainBlock").unwrap();
        let text = d.to_toml_string().unwrap();
        let doc: DiagramDoc = toml::from_str(&text).unwrap();
        let input: PortDoc = doc.blocks[0].inputs[0].clone().try_into().unwrap();
        assert_eq!(input.conns, None);
        let output: PortDoc = doc.blocks[0].outputs[0].clone().try_into().unwrap();
        assert_eq!(output.conns, Some(PortConns::Many(vec![])));
    }

    #[test]
    fn conns_accept_single_or_list() {
        let single: PortDoc = toml::from_str("id = 3\ntype = 0\nconns = 2").unwrap();
        assert_eq!(single.conns, Some(PortConns::Single(2)));
        let many: PortDoc = toml::from_str("id = 2\ntype = 1\nconns = [3, 4]").unwrap();
        assert_eq!(many.conns, Some(PortConns::Many(vec![3, 4])));
    }

    #[test]
    fn min_id_is_smallest_block_id() {
        let mut d = Diagram::new();
        let first = d.add_block("ConstantBlock").unwrap();
        d.add_block("DisplayBlock").unwrap();
        d.remove_block(first).unwrap();
        let doc = d.to_document().unwrap();
        assert_eq!(doc.min_id, i64::from(d.blocks()[0].id()));
    }

    #[test]
    fn empty_document_loads_nothing() {
        let mut d = Diagram::new();
        let report = d.load_toml_str("min_id = 0\nblocks = []").unwrap();
        assert_eq!(report, LoadReport::default());
        assert!(d.blocks().is_empty());
    }

    #[test]
    fn entry_without_ports_gets_default_layout() {
        let mut d = Diagram::new();
        let text = r#"
min_id = 5

[[blocks]]
type = "SumBlock"
name = "adder"
id = 5
"#;
        let report = d.load_toml_str(text).unwrap();
        assert_eq!(report.blocks_loaded, 1);
        let block = &d.blocks()[0];
        assert_eq!(block.name(), "adder");
        assert_eq!(block.num_input_ports(), 2);
        assert_eq!(block.num_output_ports(), 1);
        assert_eq!(block.id().raw(), 0);
    }

    #[test]
    fn wrong_port_side_skips_block() {
        let mut d = Diagram::new();
        let text = r#"
min_id = 0

[[blocks]]
type = "GainBlock"
id = 0
inputs = [{ id = 1, name = "in", type = 1 }]
outputs = [{ id = 2, name = "out", type = 1 }]
"#;
        let report = d.load_toml_str(text).unwrap();
        assert_eq!(report.blocks_skipped, 1);
        assert!(d.blocks().is_empty());
    }
}

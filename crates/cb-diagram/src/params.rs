//! Block-specific document fields.

use crate::block::{BlockKind, StateSpaceParams};
use crate::error::{DiagramError, DiagramResult};
use crate::port::Signal;

/// Fields a block kind adds next to the common block entries.
pub fn encode(kind: &BlockKind) -> toml::Table {
    let mut table = toml::Table::new();
    match kind {
        BlockKind::Constant { value } => {
            table.insert("value".into(), toml::Value::Float(*value));
        }
        BlockKind::Gain { gain, initial } => {
            table.insert("gain".into(), toml::Value::Float(*gain));
            table.insert(
                "initial".into(),
                toml::Value::Array(initial.iter().map(|v| toml::Value::Float(*v)).collect()),
            );
        }
        BlockKind::StateSpace(p) => {
            table.insert("A".into(), toml::Value::String(p.a.clone()));
            table.insert("B".into(), toml::Value::String(p.b.clone()));
            table.insert("C".into(), toml::Value::String(p.c.clone()));
            table.insert("D".into(), toml::Value::String(p.d.clone()));
            if let Some(x0) = &p.x0 {
                table.insert("x0".into(), toml::Value::String(x0.clone()));
            }
        }
        BlockKind::Generic | BlockKind::Sum | BlockKind::Mux | BlockKind::Display { .. } => {}
    }
    table
}

fn float(params: &toml::Table, key: &str, default: f64) -> DiagramResult<f64> {
    match params.get(key) {
        None => Ok(default),
        Some(toml::Value::Float(v)) => Ok(*v),
        Some(toml::Value::Integer(v)) => Ok(*v as f64),
        Some(other) => Err(DiagramError::InvalidArg {
            what: format!("'{key}' must be a number, found {}", other.type_str()),
        }),
    }
}

fn string(params: &toml::Table, key: &str) -> DiagramResult<Option<String>> {
    match params.get(key) {
        None => Ok(None),
        Some(toml::Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(DiagramError::InvalidArg {
            what: format!("'{key}' must be a variable name, found {}", other.type_str()),
        }),
    }
}

pub fn decode_generic(_: &toml::Table) -> DiagramResult<BlockKind> {
    Ok(BlockKind::Generic)
}

pub fn decode_constant(params: &toml::Table) -> DiagramResult<BlockKind> {
    Ok(BlockKind::constant(float(params, "value", 0.0)?))
}

pub fn decode_gain(params: &toml::Table) -> DiagramResult<BlockKind> {
    let gain = float(params, "gain", 0.0)?;
    let initial = match params.get("initial") {
        None => Signal::zeros(1),
        Some(toml::Value::Array(values)) => {
            let values = values
                .iter()
                .map(|v| match v {
                    toml::Value::Float(f) => Ok(*f),
                    toml::Value::Integer(i) => Ok(*i as f64),
                    other => Err(DiagramError::InvalidArg {
                        what: format!("'initial' entries must be numbers, found {}", other.type_str()),
                    }),
                })
                .collect::<DiagramResult<Vec<f64>>>()?;
            Signal::from_vec(values)
        }
        Some(_) => Signal::from_element(1, float(params, "initial", 0.0)?),
    };
    Ok(BlockKind::Gain { gain, initial })
}

pub fn decode_sum(_: &toml::Table) -> DiagramResult<BlockKind> {
    Ok(BlockKind::Sum)
}

pub fn decode_mux(_: &toml::Table) -> DiagramResult<BlockKind> {
    Ok(BlockKind::Mux)
}

pub fn decode_display(_: &toml::Table) -> DiagramResult<BlockKind> {
    Ok(BlockKind::display())
}

pub fn decode_state_space(params: &toml::Table) -> DiagramResult<BlockKind> {
    let defaults = StateSpaceParams::default();
    let mut p = StateSpaceParams::new(
        string(params, "A")?.unwrap_or(defaults.a),
        string(params, "B")?.unwrap_or(defaults.b),
        string(params, "C")?.unwrap_or(defaults.c),
        string(params, "D")?.unwrap_or(defaults.d),
    );
    p.x0 = string(params, "x0")?;
    Ok(BlockKind::StateSpace(p))
}

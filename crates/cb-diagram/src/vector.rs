//! Vector helpers shared by the block variants.

use crate::port::Signal;

/// Concatenate vectors in order.
pub fn stack(parts: &[Signal]) -> Signal {
    let len = parts.iter().map(|v| v.len()).sum();
    Signal::from_iterator(len, parts.iter().flat_map(|v| v.iter().copied()))
}

/// Elementwise sum; the shorter vector is padded with trailing zeros.
pub fn padded_sum(a: &Signal, b: &Signal) -> Signal {
    let len = a.len().max(b.len());
    Signal::from_fn(len, |i, _| {
        a.get(i).copied().unwrap_or(0.0) + b.get(i).copied().unwrap_or(0.0)
    })
}

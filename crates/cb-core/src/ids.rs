use core::fmt;
use core::num::NonZeroU32;
use std::collections::BTreeSet;

use crate::error::{CoreError, CoreResult};

/// Largest raw identifier value.
pub const MAX_RAW: u32 = u32::MAX - 1;

/// Compact, stable identifier shared by blocks, ports and wires.
///
/// - `u32` keeps memory small
/// - `NonZero` enables `Option<Id>` to be pointer-optimized
///
/// The raw value (what gets persisted and shown to the node editor) is the
/// counter value the allocator handed out, starting at 0.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(NonZeroU32);

impl Id {
    /// Create an Id from its raw counter value by storing raw+1.
    ///
    /// `raw` must not exceed [`MAX_RAW`]; larger values collapse onto it.
    pub fn from_raw(raw: u32) -> Self {
        Self(NonZeroU32::MIN.saturating_add(raw))
    }

    /// Recover the raw counter value.
    pub fn raw(self) -> u32 {
        self.0.get() - 1
    }

    /// Convert a value read from a document into an Id.
    pub fn try_from_i64(value: i64) -> CoreResult<Self> {
        match u32::try_from(value) {
            Ok(raw) if raw <= MAX_RAW => Ok(Self::from_raw(raw)),
            _ => Err(CoreError::IdOutOfRange { value }),
        }
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.raw())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw())
    }
}

impl From<Id> for i64 {
    fn from(id: Id) -> Self {
        i64::from(id.raw())
    }
}

/// Identifier aliases for the three kinds of diagram element.
pub type BlockId = Id;
pub type PortId = Id;
pub type WireId = Id;

/// Identifier reuse policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IdPolicy {
    /// Hand freed identifiers out again before growing the counter.
    pub recycle: bool,
}

/// Per-document identifier source.
///
/// Identifiers come from a monotonically increasing counter. Released
/// identifiers are parked in a free pool; they are only handed out again
/// when the policy enables recycling.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    next: u32,
    free: BTreeSet<u32>,
    policy: IdPolicy,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: IdPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> IdPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: IdPolicy) {
        self.policy = policy;
    }

    /// Hand out the next identifier.
    ///
    /// Fails once the counter has passed the largest representable id.
    pub fn allocate(&mut self) -> CoreResult<Id> {
        if self.policy.recycle {
            if let Some(raw) = self.free.pop_first() {
                return Ok(Id::from_raw(raw));
            }
        }
        if self.next > MAX_RAW {
            return Err(CoreError::IdExhausted { wanted: 1 });
        }
        let id = Id::from_raw(self.next);
        self.next += 1;
        Ok(id)
    }

    /// How many identifiers can still be handed out.
    pub fn available(&self) -> u64 {
        let fresh = u64::from(MAX_RAW) + 1 - u64::from(self.next);
        let recycled = if self.policy.recycle { self.free.len() as u64 } else { 0 };
        fresh + recycled
    }

    /// Check that `count` identifiers can be allocated before starting an
    /// edit that needs all of them.
    pub fn ensure_available(&self, count: usize) -> CoreResult<()> {
        let wanted = count as u64;
        if wanted > self.available() {
            return Err(CoreError::IdExhausted { wanted });
        }
        Ok(())
    }

    /// Return an identifier to the free pool.
    pub fn release(&mut self, id: Id) {
        if id.raw() < self.next {
            self.free.insert(id.raw());
        }
    }

    /// Mark an identifier recovered from a document as live, so later
    /// allocations never collide with it.
    pub fn reserve(&mut self, id: Id) {
        self.free.remove(&id.raw());
        if id.raw() >= self.next {
            self.next = id.raw() + 1;
        }
    }

    /// The raw value the counter will hand out next (ignoring the free pool).
    pub fn peek_next(&self) -> u32 {
        self.next
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Forget every identifier; the policy is kept.
    pub fn reset(&mut self) {
        self.next = 0;
        self.free.clear();
    }
}

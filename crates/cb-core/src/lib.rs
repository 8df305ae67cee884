//! cb-core: stable foundation for controlblocks.
//!
//! Contains:
//! - ids (compact identifiers + the per-document allocator)
//! - numeric (Real, time comparison and parameter checks)
//! - error (shared error types)

pub mod error;
pub mod ids;
pub mod numeric;

pub use error::{CoreError, CoreResult};
pub use ids::*;
pub use numeric::*;

#![forbid(unsafe_code)]

//! Change aggregation for deferred collections.
//!
//! While a validation epoch is open, edits to a source collection are
//! recorded here instead of being applied to the constrained copy. When the
//! epoch commits, the aggregator yields the single net change between the
//! constrained copy and the current source.

pub mod list;
pub mod map;
pub mod set;

pub use list::{ListChangeAggregator, ListDelta, ListEdit};
pub use map::{MapChangeAggregator, MapDelta};
pub use set::{SetChangeAggregator, SetDelta};

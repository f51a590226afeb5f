//! Index structures.
//!
//! Currently one index type: the disk-resident [`BTreeIndex`] over a single
//! integer attribute.

pub mod btree;

pub use btree::{BTreeIndex, Datatype, Operator};

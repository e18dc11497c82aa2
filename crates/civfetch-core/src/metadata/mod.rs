//! JSON persistence primitives shared by the known-reference store and
//! configuration loading.

mod atomic;

pub use atomic::{atomic_read_json, atomic_write_json};

//! Shared helpers for galleria integration tests: an in-memory submission
//! source and a harness that wires a full import service into a temp dir.

pub mod harness;
pub mod source;

pub use harness::{png_bytes, TestHarness};
pub use source::{FakeFile, FakeSource};

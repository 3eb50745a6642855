//! # olap-cli - Run vertex OLAP jobs from the command line
//!
//! Loads a [`GraphFixture`](fixture::GraphFixture) into the in-memory edge
//! store and runs one of the built-in [`programs`] over it.

pub mod fixture;
pub mod programs;

pub use fixture::{EdgeSpec, FixtureError, GraphFixture, LoadedGraph, VertexSpec};
pub use programs::{run_program, Degree, JobReport, NeighborSum, ProgramKind};

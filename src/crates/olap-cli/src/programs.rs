//! Built-in vertex programs

use crate::fixture::LoadedGraph;
use async_trait::async_trait;
use clap::ValueEnum;
use olap_engine::{ExecutorConfig, OlapJobBuilder, RunStats, VertexProgram, VertexView};
use olap_storage::{SliceQuery, StandardIdManager, StandardRelationReader, FIRST_USER_TYPE};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Programs selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgramKind {
    /// Number of incident edges
    Degree,
    /// Sum of the logical ids of all neighbors
    NeighborSum,
}

/// Counts the edges pre-fetched by one query
pub struct Degree {
    edges: SliceQuery,
}

impl Degree {
    /// Count edges matched by `edges`
    pub fn new(edges: SliceQuery) -> Self {
        Self { edges }
    }
}

#[async_trait]
impl VertexProgram<u64> for Degree {
    async fn process(&self, vertex: &VertexView<u64>) -> anyhow::Result<()> {
        let degree = vertex.neighbors(&self.edges)?.len() as u64;
        vertex.set_state(degree);
        Ok(())
    }
}

/// Sums the logical ids of the neighbors reached through one query
pub struct NeighborSum {
    edges: SliceQuery,
    ids: StandardIdManager,
}

impl NeighborSum {
    /// Sum neighbors matched by `edges`, decoding ids with `ids`
    pub fn new(edges: SliceQuery, ids: StandardIdManager) -> Self {
        Self { edges, ids }
    }
}

#[async_trait]
impl VertexProgram<u64> for NeighborSum {
    async fn process(&self, vertex: &VertexView<u64>) -> anyhow::Result<()> {
        let sum = vertex
            .neighbors(&self.edges)?
            .iter()
            .map(|n| self.ids.count(n.id()))
            .sum::<u64>();
        vertex.set_state(sum);
        Ok(())
    }
}

/// Output of one CLI job run
#[derive(Debug, Serialize)]
pub struct JobReport {
    /// Program that ran
    pub program: ProgramKind,
    /// Run counters
    pub stats: RunStats,
    /// Final state per logical vertex; `null` marks a failed vertex
    pub states: BTreeMap<u64, Option<u64>>,
}

/// Run `kind` over edges labelled `label` in `graph`
pub async fn run_program(
    graph: &LoadedGraph,
    kind: ProgramKind,
    label: u64,
    config: ExecutorConfig,
) -> anyhow::Result<JobReport> {
    let edges = SliceQuery::relation_type(FIRST_USER_TYPE + label);
    let builder = OlapJobBuilder::new(
        Arc::new(graph.store().begin()),
        Arc::new(graph.id_manager()),
        Arc::new(StandardRelationReader::new()),
    )
    .add_query(edges.clone())
    .config(config)
    .initializer(|| 0u64);

    let handle = match kind {
        ProgramKind::Degree => builder.execute(Degree::new(edges))?,
        ProgramKind::NeighborSum => builder.execute(NeighborSum::new(edges, graph.id_manager()))?,
    };
    info!(job_id = %handle.id(), program = ?kind, "Job submitted");
    let result = handle.join().await?;

    let states = result
        .states()
        .snapshot()
        .into_iter()
        .map(|(id, state)| (graph.logical_id(id), state))
        .collect();
    Ok(JobReport {
        program: kind,
        stats: result.stats().clone(),
        states,
    })
}

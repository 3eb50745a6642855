//! The per-vertex job contract

use crate::state::VertexState;
use crate::vertex::VertexView;
use async_trait::async_trait;
use std::marker::PhantomData;

/// User logic executed once per live vertex.
///
/// Returning an error (or panicking) affects only the vertex being
/// processed: its state is invalidated and the job carries on.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use olap_engine::{VertexProgram, VertexView};
/// use olap_storage::SliceQuery;
///
/// struct Degree {
///     edges: SliceQuery,
/// }
///
/// #[async_trait]
/// impl VertexProgram<u64> for Degree {
///     async fn process(&self, vertex: &VertexView<u64>) -> anyhow::Result<()> {
///         let degree = vertex.entries(&self.edges).len() as u64;
///         vertex.update_state(|s| *s += degree);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait VertexProgram<S: VertexState>: Send + Sync {
    /// Process one vertex
    async fn process(&self, vertex: &VertexView<S>) -> anyhow::Result<()>;
}

/// [`VertexProgram`] backed by a synchronous closure, see [`program_fn`]
pub struct FnProgram<S, F> {
    f: F,
    _state: PhantomData<fn() -> S>,
}

/// Wrap a closure as a [`VertexProgram`]
pub fn program_fn<S, F>(f: F) -> FnProgram<S, F>
where
    S: VertexState,
    F: Fn(&VertexView<S>) -> anyhow::Result<()> + Send + Sync,
{
    FnProgram {
        f,
        _state: PhantomData,
    }
}

#[async_trait]
impl<S, F> VertexProgram<S> for FnProgram<S, F>
where
    S: VertexState,
    F: Fn(&VertexView<S>) -> anyhow::Result<()> + Send + Sync,
{
    async fn process(&self, vertex: &VertexView<S>) -> anyhow::Result<()> {
        (self.f)(vertex)
    }
}

//! Per-vertex accumulator state.

/// Accumulator threaded through a job for one logical vertex.
///
/// `merge` combines the states of two physical pieces of the same partitioned
/// vertex. It must be associative; the order in which siblings are folded is
/// unspecified.
pub trait VertexState: Clone + Send + Sync + 'static {
    /// Fold `other` (a partition sibling's state) into `self`.
    fn merge(&mut self, other: Self);
}

/// Produces the initial state for a vertex seen for the first time.
///
/// Implemented for every `Fn() -> S`, so closures and `Default::default`
/// work directly.
pub trait StateInitializer<S>: Send + Sync {
    /// A fresh accumulator
    fn initial_state(&self) -> S;
}

impl<S, F> StateInitializer<S> for F
where
    F: Fn() -> S + Send + Sync,
{
    fn initial_state(&self) -> S {
        self()
    }
}

macro_rules! additive_state {
    ($($ty:ty),*) => {
        $(
            impl VertexState for $ty {
                fn merge(&mut self, other: Self) {
                    *self += other;
                }
            }
        )*
    };
}

additive_state!(u32, u64, usize, i32, i64, f32, f64);

impl<T: Clone + Send + Sync + 'static> VertexState for Vec<T> {
    fn merge(&mut self, mut other: Self) {
        self.append(&mut other);
    }
}

//! Beam search over the graph: the bounded-priority buffer, the visited-set
//! variants, and the two search job entry points built on top of them (spec §4.9,
//! §4.10).

pub mod buffer;
pub mod job;
pub mod linear_pool;
pub mod visited;

pub use buffer::SearchBuffer;
pub use job::{search, search_by_vector, search_optimized};
pub use linear_pool::LinearPool;
pub use visited::{ApproxVisited, DenseVisited};

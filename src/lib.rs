//! Graph-based approximate nearest-neighbor search over a RaBitQ/FastScan quantized
//! proximity graph.
//!
//! This crate is the traversal-and-quantization core of an ANN engine: given a graph
//! built by an external builder (HNSW/NSG/QG-style), it can refine that graph's
//! neighbor lists, quantize them for batched distance estimation, and run beam search
//! against the result. Loading raw vector files, building the initial graph topology,
//! and serving a CLI are all out of scope — those are left to collaborators.
//!
//! ## Modules
//!
//! - [`numerics`]: the exact squared-Euclidean distance kernel used outside the
//!   quantized path.
//! - [`rotator`]: the norm-preserving orthogonal rotation used before binarization.
//! - [`quant`]: RaBitQ binary quantization, FastScan packing, and the query LUT.
//! - [`space`]: the storage arena and `Space`/`QueryComputer` that tie quantization to
//!   a set of points.
//! - [`graph`]: the fixed out-degree adjacency graph.
//! - [`search`]: beam search buffers, visited sets, and the two search job variants.
//! - [`refine`]: the graph refiner that rebuilds neighbor lists in place.
//! - [`error`]: the crate's error type.

pub mod error;
pub mod graph;
pub mod numerics;
pub mod quant;
pub mod refine;
pub mod rotator;
pub mod search;
pub mod space;

pub use error::{EngineError, Result};
pub use graph::Graph;
pub use refine::{GraphRefiner, RefineConfig};
pub use rotator::{FhtKacRotator, Rotator, RotatorConfig};
pub use space::{Metric, QueryComputer, Space, SpaceConfig};

//! Design-space exploration for low-memory neural-network inference.
//!
//! The pipeline: convert a layer graph to a cyclo-static dataflow (CSDF)
//! model, simulate it ASAP to trace buffer occupancy over time, shrink
//! buffers to their observed peaks, pack them by lifetime reuse, and
//! search layer split factors with a genetic algorithm balancing total
//! buffer size against throughput loss.

pub mod buffers;
pub mod config;
pub mod csdf;
pub mod error;
pub mod graph;
pub mod report;
pub mod search;
pub mod sim;

// Re-export the types a caller needs to drive a search end to end
pub use config::GaConfig;
pub use error::{Error, Result};
pub use graph::{Layer, Network, Op};
pub use report::AppSpec;
pub use search::ga::{GaSearch, SearchResult};
pub use search::{Chromosome, FitnessEvaluator};

// Clippy allows for the whole crate
#![allow(clippy::too_many_arguments)]
#![allow(clippy::type_complexity)]

//! GALE: Genome ALignment Engine
//!
//! Whole-genome pairwise alignment by adaptive seeding: a streaming
//! merge of two sorted k-mer indexes produces seed pairs, an
//! external-memory bucket sort orders them by anti-diagonal, and a
//! chain-and-extend search turns them into verified local alignments
//! with redundancy elimination.
//!
//! # Features
//!
//! - **Bounded working set**: indexes stream page-at-a-time; seed
//!   pairs spool to disk and return panel by panel
//! - **Parallel lanes**: every phase forks one lane per index shard
//! - **Deterministic output**: the surviving alignment set does not
//!   depend on the lane count
//!
//! # Example
//!
//! ```rust,no_run
//! use gale_genomics::{config::AlignConfig, pipeline};
//!
//! let mut cfg = AlignConfig::new(10);
//! cfg.verbose = true;
//! let nlive = pipeline::run(&cfg, "genome1", "genome2").unwrap();
//! println!("{} alignments", nlive);
//! ```

pub mod align;
pub mod chain;
pub mod config;
pub mod dedup;
pub mod error;
pub mod indexer;
pub mod ktab;
pub mod layout;
pub mod merge;
pub mod overlap;
pub mod pipeline;
pub mod posts;
pub mod radix;
pub mod reimport;
pub mod seqdb;
pub mod spool;

// Re-export commonly used types
pub use config::AlignConfig;
pub use error::{GaleError, Result};
pub use overlap::{AlnPath, LasReader, LasWriter, Overlap};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::AlignConfig;
    pub use crate::error::{GaleError, Result};
    pub use crate::indexer::{GenomeIndex, IndexParams};
    pub use crate::overlap::{AlnPath, LasReader, LasWriter, Overlap};
    pub use crate::pipeline::run;
}

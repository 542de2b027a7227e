//! dapfetch-client: caching data access over a remote DAP dataset
//!
//! The [`coordinator::CacheCoordinator`] answers hyperslab reads against a
//! [`remote::RemoteFetch`] collaborator, keeping whole-variable responses in
//! an LRU [`cache::CacheStore`].
//!
//! ## Example
//!
//! ```ignore
//! use dapfetch_client::{CoordinatorBuilder, MemoryDataset, MemoryRemote};
//! use dapfetch_core::{AtomicType, PolicyConfig};
//!
//! let remote = MemoryRemote::new(MemoryDataset::load("dataset.json")?)?;
//! let schema = remote.schema().clone();
//! let mut coordinator = CoordinatorBuilder::new(remote, schema)
//!     .policy(PolicyConfig::default())
//!     .build()?;
//! let mut out = vec![0u8; 4 * 10];
//! coordinator.get_vara_by_name("sst", &[0], &[10], &[1], AtomicType::Float, &mut out)?;
//! ```

pub mod cache;
pub mod coordinator;
pub mod memory;
pub mod metrics;
pub mod planner;
pub mod remote;
pub mod walker;

pub use cache::{CacheNode, CacheStats, CacheStore};
pub use coordinator::{CacheCoordinator, CoordinatorBuilder};
pub use memory::{DataNode, DimDecl, MemoryDataset, MemoryRemote, Value};
pub use planner::{FetchPlan, FetchState, ProjectionPlanner};
pub use remote::{CursorError, CursorMode, DataCursor, DataTree, FetchError, FetchKind, RemoteFetch};
pub use walker::{extract, ExtractionWalker, OutputBuffer};

pub use dapfetch_core::{Error, Result};

pub mod chain;
pub mod cursor;
pub mod fetcher;
pub mod graph;
pub mod supervisor;
pub mod synchronizer;
pub mod writer;

pub use chain::{BlockHeader, ChainClient, HttpChainClient};
pub use cursor::{CursorStore, SyncCursor};
pub use fetcher::Fetcher;
pub use graph::GraphFeedProjector;
pub use synchronizer::{RoundOutcome, Synchronizer};

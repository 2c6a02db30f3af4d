pub mod artifacts;
pub mod state_store;

pub use artifacts::ArtifactWriter;
pub use state_store::{RunCommit, RunState, StateStore, StoredPositions};

pub mod history;
pub mod serve;

// Re-export command functions for convenience
pub use history::{history, stats};
pub use serve::{cluster, serve, ClusterParams};

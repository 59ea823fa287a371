//! Database models
//!
//! Row types for the durable collections. Timestamps are RFC3339 strings
//! due to SQLite type limitations.

pub mod cluster_node;
pub mod edge;
pub mod graph;
pub mod history;
pub mod node;
pub mod node_config;

pub use cluster_node::ClusterNodeRow;
pub use edge::EdgeRow;
pub use graph::GraphRow;
pub use history::HistoryRow;
pub use node::NodeRow;
pub use node_config::NodeConfigRow;

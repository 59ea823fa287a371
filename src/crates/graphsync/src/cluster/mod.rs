//! Cluster coordinator
//!
//! Keeps a fleet of server processes coherent around one rule: every
//! logical instance (a graph or a node-config) is loaded on exactly one
//! peer. Peers discover each other through the shared registry table and
//! talk over two orthogonal TCP channels:
//!
//! - **broadcast** (publish/subscribe): ownership announcements to all
//!   peers, publisher listening at `http_port + 1000`;
//! - **direct** (request/response, identity-aware): correlated messages to
//!   a named peer, endpoint listening at `http_port + 1001`.
//!
//! Ownership is eventually consistent: lost broadcasts are not retried,
//! the next claim re-asserts the latest state, and entries of vanished
//! peers are pruned when discovery notices the registry row is gone.

pub mod broadcast;
pub mod coordinator;
pub mod direct;
pub mod error;
pub mod ownership;
pub mod registry;
pub mod wire;

pub use coordinator::{ClusterCoordinator, PeerInfo};
pub use direct::RequestHandler;
pub use error::{ClusterError, ClusterResult};
pub use ownership::{Owned, OwnershipMap};
pub use wire::{ClusterPayload, Envelope, EnvelopeKind};

/// Port offset of the broadcast publisher from the HTTP port
pub const BROADCAST_PORT_OFFSET: u16 = 1000;

/// Port offset of the direct endpoint from the HTTP port
pub const DIRECT_PORT_OFFSET: u16 = 1001;

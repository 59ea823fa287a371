//! Configuration module

pub mod server;

pub use server::{
    ClusterConfig, DatabaseConfig, SecurityConfig, SecurityMode, ServerConfig, ServerConfigError,
    ServerIdentity, SessionConfig,
};

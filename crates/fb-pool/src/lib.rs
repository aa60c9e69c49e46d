//! # fb-pool
//!
//! Connection pool for the Firebird driver.
//!
//! One [`Pool`] exists per distinct connection string. It keeps two disjoint
//! sets of physical connections, idle and checked-out, whose combined size
//! never exceeds the configured maximum. A [`PoolRegistry`] maps
//! connection-string keys to pools, creates them on demand and drives a
//! single reaper task shared by every pool that has idle-lifetime eviction
//! enabled.
//!
//! ## Features
//!
//! - Blocking checkout with an acquire timeout, woken on checkin
//! - Liveness probe of every idle candidate on checkout
//! - Freshest-survivor selection among idle connections
//! - Idle-lifetime eviction that never drops below the minimum size
//! - Status and metrics snapshots
//!
//! ## Example
//!
//! ```rust,ignore
//! use fb_pool::{PoolConfig, PoolRegistry};
//! use std::time::Duration;
//!
//! let registry = PoolRegistry::new();
//! let config = PoolConfig::new()
//!     .min_connections(2)
//!     .max_connections(20)
//!     .connection_lifetime(Duration::from_secs(300));
//!
//! let pool = registry.get_or_create("key", config, || factory)?;
//! let conn = pool.checkout().await?;
//! // Use connection...
//! pool.checkin(conn).await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod pool;
pub mod registry;

// Configuration
pub use config::PoolConfig;

// Error types
pub use error::PoolError;

// Pool types
pub use pool::{Pool, PoolMetrics, PoolStatus, ReapOutcome};

// Registry
pub use registry::PoolRegistry;

// Lifecycle management
pub use lifecycle::{
    ConnectionFactory, ConnectionId, ConnectionLifecycle, ConnectionMetadata, ConnectionState,
    HealthCheckResult,
};

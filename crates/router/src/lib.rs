//! # Crossbar Router Crate
//!
//! The running relay. The [`Router`] creates exactly one connector per
//! account referenced by any gateway, connects and joins them at startup, and
//! then drains the single inbound queue every connector pushes into.
//!
//! ## Architecture
//!
//! - **Router**: startup, the dispatch loop, command interception
//! - **Supervisor**: reconnect-with-backoff per failing connector, periodic
//!   correlation upkeep
//! - **Services**: the stores shared by all gateways
//!
//! ## Usage
//!
//! ```rust,no_run
//! use crossbar_bridge::ConnectorRegistry;
//! use crossbar_gateway::Topology;
//! use crossbar_router::{Router, RouterServices};
//!
//! # async fn example(config: crossbar_config::AppConfig) -> Result<(), Box<dyn std::error::Error>> {
//! let topology = Topology::build(&config)?;
//! let services = RouterServices::in_memory(config.general.message_cache_size);
//! let router = Router::new(&config, &topology, &ConnectorRegistry::with_builtin(), services)?;
//! router.start().await?;
//! router.run(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod router;
pub mod services;
pub mod supervisor;

pub use error::{RouterError, RouterResult};
pub use router::Router;
pub use services::{CorrelationBackend, RouterServices};

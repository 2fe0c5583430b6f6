//! # Crossbar Gateway Crate
//!
//! Routing domains for the relay. A gateway is a named set of
//! (account, room) pairs; a message entering one of its rooms is copied to
//! every other room of the same gateway that accepts it.
//!
//! ## Architecture
//!
//! - **Topology**: turns declared gateways into normalized channel records
//! - **Gateway**: destination selection and per-destination fan-out
//! - **Filter**: drops before fan-out and per-destination gating
//! - **Transform**: nick/avatar templates, text rewrites, emoji expansion
//! - **Translate**: optional translation into a room's locale
//! - **Correlation**: origin id → destination ids, in memory or SQLite
//! - **Media**: re-hosting file payloads before fan-out
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use crossbar_gateway::{Gateway, MemoryCorrelationStore, Topology};
//!
//! # fn example(config: &crossbar_config::AppConfig) -> crossbar_gateway::RoutingResult<()> {
//! let topology = Topology::build(config)?;
//! for domain in &topology.gateways {
//!     let gateway = Gateway::new(
//!         domain,
//!         topology.accounts.clone(),
//!         Arc::new(config.general.clone()),
//!         Arc::new(MemoryCorrelationStore::default()),
//!     );
//!     println!("{} routes {} rooms", gateway.name(), gateway.channels().count());
//! }
//! # Ok(())
//! # }
//! ```

pub mod correlation;
pub mod error;
pub mod filter;
pub mod gateway;
pub mod media;
pub mod topology;
pub mod transform;
pub mod translate;

pub use correlation::{
    CorrelationStore, Destination, DurableCorrelationStore, MemoryCorrelationStore, MessageKey,
};
pub use error::{
    CorrelationError, CorrelationResult, GatewayError, GatewayResult, MediaError, MediaResult,
    RoutingError, RoutingResult, TranslateError, TranslateResult,
};
pub use filter::IgnoreReason;
pub use gateway::{Gateway, RelayReport};
pub use media::MediaRelay;
pub use topology::{AccountRules, GatewayTopology, Topology};
pub use translate::{HttpTranslator, Translator};

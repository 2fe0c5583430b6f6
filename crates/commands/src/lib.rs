//! # Crossbar Commands Crate
//!
//! Chat commands users type into any relayed room, and the per-user and
//! per-room state those commands change.
//!
//! ## Architecture
//!
//! - **Interpreter**: parses `!`-prefixed bodies and builds the reply
//! - **Preferences**: opt-out flags and display name/avatar overrides, read by the gateway filter
//! - **Welcome**: greeting text sent back when someone joins a room
//!
//! Both stores have an in-memory and a SQLite implementation.

pub mod error;
pub mod interpreter;
pub mod preferences;
pub mod welcome;

pub use error::{CommandError, CommandResult};
pub use interpreter::{Command, CommandInterpreter, BOT_NAME};
pub use preferences::{
    MemoryPreferenceStore, PreferenceStore, SqlitePreferenceStore, UserPreference,
};
pub use welcome::{MemoryWelcomeStore, SqliteWelcomeStore, WelcomeStore};

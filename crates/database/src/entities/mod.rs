//! Row types returned by the repositories

pub mod correlation;
pub mod preference;
pub mod welcome;

pub use correlation::{CorrelationRow, OriginRef};
pub use preference::UserPreferenceRecord;
pub use welcome::ChannelWelcome;

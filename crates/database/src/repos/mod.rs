//! Database repository implementations

pub mod correlation_repository;
pub mod preference_repository;
pub mod welcome_repository;

pub use correlation_repository::CorrelationRepository;
pub use preference_repository::PreferenceRepository;
pub use welcome_repository::WelcomeRepository;

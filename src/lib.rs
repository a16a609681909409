// Response envelopes and page extraction
pub mod envelope;

// Resource kinds and their environment keys
pub mod resource;

// Environment key-value stores
pub mod store;

// Paginated accumulation
pub mod accumulator;

// Configuration loading
pub mod config;

pub use accumulator::{handle_response, Outcome, ResponseHandler};
pub use envelope::ResponseEnvelope;
pub use resource::{KeyScheme, ResourceConfig, ResourceKind, ResourceRegistry};
pub use store::{EnvironmentStore, MemoryEnvironment, SqliteEnvironment};

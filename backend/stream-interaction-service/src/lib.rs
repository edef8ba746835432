pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use config::Config;
pub use error::{EngineError, Result};
pub use models::{
    Dashboard, InboundEvent, OperatorCommand, OutboundEvent, SessionEnvelope, SessionState,
    SessionSummary, StreamMetadata,
};
pub use services::{
    spawn_session, ChatStore, ModerationEngine, MonetizationLedger, SessionHandle,
    SessionRegistry, StreamOrchestrator,
};

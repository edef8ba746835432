pub mod chat_store;
pub mod clock;
pub mod event_bus;
pub mod identity;
pub mod moderation_engine;
pub mod monetization_ledger;
pub mod orchestrator;
pub mod payment;
pub mod rule_matcher;
pub mod session;

pub use chat_store::ChatStore;
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use event_bus::EventBus;
pub use identity::{IdentityDirectory, SharedDirectory, StaticDirectory, UserProfile};
pub use moderation_engine::ModerationEngine;
pub use monetization_ledger::MonetizationLedger;
pub use orchestrator::{InboundOutcome, StreamOrchestrator};
pub use payment::{
    ChargeRequest, PaymentOutcome, PaymentProcessor, SandboxPaymentProcessor,
    SharedPaymentProcessor,
};
pub use rule_matcher::RuleMatcher;
pub use session::{spawn_session, SessionHandle, SessionRegistry};

pub mod chat;
pub mod events;
pub mod moderation;
pub mod monetization;
pub mod session;

pub use chat::*;
pub use events::*;
pub use moderation::*;
pub use monetization::*;
pub use session::*;

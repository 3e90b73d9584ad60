//! Chat transport: the Discord message model, the [`Transport`] seam consumed
//! by bot adapters, and the user-session implementation over REST + gateway.

mod discord;
mod gateway;
mod types;

pub use discord::DiscordTransport;
pub use gateway::{next_delay, ReconnectConfig};
pub use types::*;

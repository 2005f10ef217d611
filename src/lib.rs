//! # Botty: a chat bot on a typed event brain
//!
//! The core of the crate is the [`brain`]: an in-process publish/subscribe
//! dispatcher. Adapters turn chat input into events, handlers react to them
//! by payload type, and a two-phase shutdown drains whatever was queued.
//!
//! ```text
//! Adapter --emit--> Event Queue --> Dispatch Loop --> Registry.resolve --> Executor
//!                                        |                                   |
//!                                        +<---- completion callbacks <-------+
//! ```
//!
//! Around it sit thin collaborators:
//! - [`adapter`]: the [`Adapter`](adapter::Adapter) trait and a terminal implementation
//! - [`message`]: regex matched chat messages handed to responders
//! - [`storage`]: key/value memory for handler bodies
//! - [`bot`]: wiring of brain, storage, and adapter into one runnable process
//! - [`config`]: JSON configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use botty::{Bot, BotConfig, Message};
//!
//! # async fn run() -> botty::BotResult<()> {
//! let bot = Bot::new(BotConfig::default()).await?;
//! bot.respond("ping", |msg: Message| async move { msg.respond("pong").await });
//! bot.run().await
//! # }
//! ```

pub mod adapter;
pub mod bot;
pub mod brain;
pub mod config;
pub mod error;
pub mod message;
pub mod storage;

pub use bot::Bot;
pub use config::BotConfig;
pub use error::{BotResult, Error};
pub use message::Message;

#[cfg(test)]
mod tests {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    #[ctor::ctor]
    fn init_tests() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("Failed to set tracing subscriber");
    }
}

//! Process wiring: one brain, one storage, one adapter.

use std::{future::Future, sync::Arc};

use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::{
    adapter::{Adapter, CliAdapter},
    brain::{
        AsyncHandler, BoxError, Brain, Cancellation, Handler, HandlerContext, HandlerOutput,
        ReceiveMessageEvent, RegistrationError,
    },
    config::BotConfig,
    error::BotResult,
    message::Message,
    storage::Storage,
};

pub struct Bot {
    config: BotConfig,
    brain: Arc<Brain>,
    storage: Arc<Storage>,
    adapter: Arc<dyn Adapter>,
}

impl Bot {
    /// Builds the storage backend from the config and a CLI adapter on
    /// stdin/stdout.
    pub async fn new(config: BotConfig) -> BotResult<Self> {
        let storage = Storage::from_config(&config.storage).await?;
        let adapter = CliAdapter::new(
            format!("{} {}", config.name, config.cli.prefix),
            config.cli.author.clone(),
        );
        Ok(Self::with_parts(config, storage, Arc::new(adapter)))
    }

    pub fn with_parts(config: BotConfig, storage: Storage, adapter: Arc<dyn Adapter>) -> Self {
        let brain = Arc::new(Brain::with_config(&config.brain));
        Self {
            config,
            brain,
            storage: Arc::new(storage),
            adapter,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub fn brain(&self) -> &Arc<Brain> {
        &self.brain
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    pub fn register<M, H>(&self, handler: H)
    where
        M: 'static,
        H: Handler<M>,
    {
        self.brain.register(handler);
    }

    pub fn register_async<M, H>(&self, handler: H)
    where
        M: 'static,
        H: AsyncHandler<M>,
    {
        self.brain.register_async(handler);
    }

    /// Answers messages matching `pattern` in full, case-insensitively.
    pub fn respond<F, Fut>(&self, pattern: &str, responder: F)
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: HandlerOutput,
    {
        self.respond_regex(&format!("^{pattern}$"), responder);
    }

    /// Answers messages matching `expr` from their start, case-insensitively.
    ///
    /// An empty expression registers nothing. An invalid one is recorded as a
    /// registration error. The first responder that matches a message claims
    /// it; later responders and handlers for that message are skipped.
    pub fn respond_regex<F, Fut>(&self, expr: &str, responder: F)
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: HandlerOutput,
    {
        if expr.is_empty() {
            return;
        }
        let normalized = normalize_pattern(expr);
        let regex = match Regex::new(&normalized) {
            Ok(regex) => regex,
            Err(source) => {
                self.brain
                    .record_registration_error(RegistrationError::InvalidPattern {
                        pattern: expr.to_string(),
                        source,
                    });
                return;
            }
        };
        debug!("Respond to {}", normalized);

        let adapter = self.adapter.clone();
        let responder = Arc::new(responder);
        self.brain
            .register_async(move |ctx: HandlerContext, event: ReceiveMessageEvent| {
                let matches = regex.captures(&event.text).map(|captures| {
                    captures
                        .iter()
                        .skip(1)
                        .map(|group| group.map_or_else(String::new, |m| m.as_str().to_string()))
                        .collect::<Vec<_>>()
                });
                let adapter = adapter.clone();
                let responder = responder.clone();
                async move {
                    let Some(matches) = matches else {
                        return Ok::<(), BoxError>(());
                    };
                    ctx.abort_early();
                    let message = Message::new(event, matches, adapter, ctx);
                    (*responder)(message).await.into_result()
                }
            });
    }

    /// Runs until [`Bot::shutdown`] completes.
    ///
    /// Refuses to start while registration errors exist. Afterwards the
    /// adapter and the storage are closed.
    #[instrument(skip(self), fields(name = %self.config.name))]
    pub async fn run(&self) -> BotResult<()> {
        self.brain.check_registrations()?;

        self.adapter.register_at(&self.brain).await?;
        info!("Initialize bot");
        self.brain.handle_events().await?;

        if let Err(e) = self.adapter.close().await {
            warn!("Error while closing adapter: {}", e);
        }
        info!("Close storage on shutdown");
        self.storage.close().await?;
        Ok(())
    }

    /// Drains queued messages and stops [`Bot::run`].
    pub async fn shutdown(&self) -> BotResult<()> {
        self.brain.shutdown(Cancellation::new()).await?;
        Ok(())
    }
}

/// Anchors at the start and makes the match case-insensitive.
fn normalize_pattern(expr: &str) -> String {
    if let Some(rest) = expr.strip_prefix('^') {
        if rest.starts_with("(?i)") {
            expr.to_string()
        } else {
            format!("^(?i){rest}")
        }
    } else if expr.starts_with("(?i)") {
        format!("^{expr}")
    } else {
        format!("^(?i){expr}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterError, MockAdapter};
    use crate::error::Error;
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalize_pattern() {
        assert_eq!(normalize_pattern("^ping$"), "^(?i)ping$");
        assert_eq!(normalize_pattern("ping"), "^(?i)ping");
        assert_eq!(normalize_pattern("(?i)ping"), "^(?i)ping");
        assert_eq!(normalize_pattern("^(?i)ping"), "^(?i)ping");
    }

    fn bot_with(adapter: MockAdapter) -> Bot {
        Bot::with_parts(BotConfig::default(), Storage::default(), Arc::new(adapter))
    }

    #[tokio::test]
    async fn test_invalid_pattern_blocks_run() {
        let bot = bot_with(MockAdapter::new());
        bot.respond("broken (", |_msg: Message| async { Ok::<(), BoxError>(()) });
        bot.respond_regex("", |_msg: Message| async {});

        let errors = bot.brain().registration_errors();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors.iter().next(),
            Some(RegistrationError::InvalidPattern { pattern, .. }) if pattern == "^broken ($"
        ));

        let err = bot.run().await.unwrap_err();
        assert!(matches!(err, Error::Registration(_)));
        assert!(err.to_string().starts_with("Invalid event handlers: "));
    }

    #[tokio::test]
    async fn test_first_matching_responder_claims_the_message() {
        let mut adapter = MockAdapter::new();
        adapter.expect_register_at().times(1).returning(|_| Ok(()));
        adapter
            .expect_send()
            .with(eq("Ok I'll remember sky is blue"), eq(""))
            .times(1)
            .returning(|_, _| Ok(()));
        adapter.expect_close().times(1).returning(|| Err(AdapterError::AlreadyClosed));

        let bot = Arc::new(bot_with(adapter));
        let storage = bot.storage().clone();
        bot.respond("remember (.+) is (.+)", move |msg: Message| {
            let storage = storage.clone();
            async move {
                let (key, value) = (msg.matches[0].clone(), msg.matches[1].clone());
                msg.respond(format!("Ok I'll remember {key} is {value}")).await?;
                storage.set(&key, &value).await?;
                Ok::<(), BoxError>(())
            }
        });
        async fn unreachable_responder(_msg: Message) {
            panic!("claimed message reached a second responder");
        }
        bot.respond_regex("remember", unreachable_responder);

        bot.brain()
            .emit(ReceiveMessageEvent::new("Remember sky is blue", "alice"))
            .unwrap();
        bot.brain()
            .emit(ReceiveMessageEvent::new("unrelated chatter", "alice"))
            .unwrap();

        let runner = bot.clone();
        let run = tokio::spawn(async move { runner.run().await });
        bot.shutdown().await.unwrap();
        run.await.unwrap().unwrap();

        assert_eq!(bot.brain().stats().handler_panics, 0);
        // storage is closed by run
        assert!(bot.storage().keys().await.is_err());
    }
}

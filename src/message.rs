use std::sync::Arc;

use crate::{
    adapter::{Adapter, AdapterResult},
    brain::{HandlerContext, ReceiveMessageEvent},
};

/// A received chat message that matched a responder pattern.
///
/// Built by [`Bot::respond`](crate::Bot::respond) and
/// [`Bot::respond_regex`](crate::Bot::respond_regex) from the underlying
/// [`ReceiveMessageEvent`].
#[derive(Clone)]
pub struct Message {
    pub id: String,
    pub text: String,
    pub author_id: String,
    pub channel: String,
    /// Capture groups of the pattern, without the full match. Groups that did
    /// not participate are empty strings.
    pub matches: Vec<String>,
    pub data: Option<serde_json::Value>,
    pub adapter: Arc<dyn Adapter>,
    pub context: HandlerContext,
}

impl Message {
    pub(crate) fn new(
        event: ReceiveMessageEvent,
        matches: Vec<String>,
        adapter: Arc<dyn Adapter>,
        context: HandlerContext,
    ) -> Self {
        Self {
            id: event.id,
            text: event.text,
            author_id: event.author_id,
            channel: event.channel,
            matches,
            data: event.data,
            adapter,
            context,
        }
    }

    /// Answers on the channel the message came from.
    pub async fn respond(&self, text: impl AsRef<str>) -> AdapterResult<()> {
        self.adapter.send(text.as_ref(), &self.channel).await
    }

    pub fn matched(&self, index: usize) -> Option<&str> {
        self.matches.get(index).map(String::as_str)
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("text", &self.text)
            .field("author_id", &self.author_id)
            .field("channel", &self.channel)
            .field("matches", &self.matches)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MockAdapter;
    use crate::brain::{AbortFlag, Cancellation};
    use mockall::predicate::eq;

    #[tokio::test]
    async fn test_respond_uses_the_message_channel() {
        let mut adapter = MockAdapter::new();
        adapter
            .expect_send()
            .with(eq("pong"), eq("general"))
            .times(1)
            .returning(|_, _| Ok(()));

        let event = ReceiveMessageEvent::new("ping", "alice").with_channel("general");
        let context = HandlerContext::new(Cancellation::new(), AbortFlag::default(), "test");
        let message = Message::new(event, vec!["ping".into()], Arc::new(adapter), context);

        message.respond("pong").await.unwrap();
        assert_eq!(message.matched(0), Some("ping"));
        assert_eq!(message.matched(1), None);
    }
}

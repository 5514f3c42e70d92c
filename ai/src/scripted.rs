use crate::{AiError, ChatModel, ChatReply, ChatRequest};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Replays queued replies in order and records every request it was sent
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<ChatReply, AiError>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// A model that answers with each of `replies` as plain text, in order.
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let model = Self::new();
        for reply in replies {
            model.push_reply(ChatReply::text(reply));
        }
        model
    }

    pub fn push_reply(&self, reply: ChatReply) {
        lock(&self.replies).push_back(Ok(reply));
    }

    pub fn push_error(&self, error: AiError) {
        lock(&self.replies).push_back(Err(error));
    }

    pub fn remaining(&self) -> usize {
        lock(&self.replies).len()
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, request: ChatRequest) -> Result<ChatReply, AiError> {
        lock(&self.requests).push(request);
        lock(&self.replies)
            .pop_front()
            .unwrap_or_else(|| Err(AiError::Unavailable("script exhausted".to_string())))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn replays_in_order_then_runs_dry() {
        let model = ScriptedModel::with_replies(["one", "two"]);
        model.push_error(AiError::EmptyReply);

        let request = ChatRequest::new(vec![Message::user("hi")]);
        assert_eq!(model.complete(request.clone()).await.unwrap().text, "one");
        assert_eq!(model.complete(request.clone()).await.unwrap().text, "two");
        assert!(matches!(model.complete(request.clone()).await, Err(AiError::EmptyReply)));
        assert!(matches!(model.complete(request).await, Err(AiError::Unavailable(_))));

        assert_eq!(model.remaining(), 0);
        assert_eq!(model.requests().len(), 4);
    }
}

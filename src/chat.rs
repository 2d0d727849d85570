//! Chat turns against the generative text service.
//!
//! Both entry points store the user's message first, then send the whole
//! transcript with the user's preferred model. The assistant reply is only
//! stored once it is complete.
//!
//! Streaming runs the upstream read in its own task, feeding a bounded
//! channel. When the receiving side goes away the task stops reading
//! upstream at once and drops the partial reply.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};

use mindflow_core::models::{ChatMessage, Message, Role};
use mindflow_core::store::Store;

use crate::error::{owned, ServiceError, ServiceResult};
use crate::llm::{GenerationError, GenerationOptions, TextGenerator};

/// One item of a streamed reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChatEvent {
    Chunk { content: String },
    /// The full reply was stored under `message_id`.
    Complete { message_id: String },
    /// Generation stopped; nothing was stored for this reply.
    Error { message: String },
}

impl ChatEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }
}

pub type ChatStream = ReceiverStream<ChatEvent>;

const STREAM_BUFFER: usize = 32;

pub struct ChatService {
    store: Arc<dyn Store>,
    generator: Arc<dyn TextGenerator>,
}

impl ChatService {
    pub fn new(store: Arc<dyn Store>, generator: Arc<dyn TextGenerator>) -> Self {
        Self { store, generator }
    }

    /// Store the user's message and return the transcript plus options for the reply.
    async fn prepare(
        &self,
        owner_id: &str,
        conversation_id: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<(Message, Vec<ChatMessage>, GenerationOptions)> {
        if content.trim().is_empty() {
            return Err(ServiceError::invalid("message content must not be empty"));
        }
        owned(
            self.store.get_conversation(conversation_id).await?,
            |c| c.owner_id.as_str(),
            owner_id,
            "conversation",
        )?;

        let user_message = Message::new(conversation_id, Role::User, content, now);
        self.store.append_message(&user_message).await?;

        let transcript: Vec<ChatMessage> = self
            .store
            .list_messages(conversation_id)
            .await?
            .iter()
            .map(ChatMessage::from)
            .collect();
        let settings = self.store.get_settings(owner_id).await?;
        let options = GenerationOptions::with_model(settings.default_model.as_deref());
        Ok((user_message, transcript, options))
    }

    /// One blocking turn. Returns the stored user message and reply.
    pub async fn send_message(
        &self,
        owner_id: &str,
        conversation_id: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<(Message, Message)> {
        let (user_message, transcript, options) =
            self.prepare(owner_id, conversation_id, content, now).await?;

        let reply = self
            .generator
            .complete(&transcript, &options)
            .await
            .map_err(ServiceError::generation("chat"))?;

        let assistant = Message::new(conversation_id, Role::Assistant, &reply, Utc::now());
        self.store.append_message(&assistant).await?;
        Ok((user_message, assistant))
    }

    /// Streamed turn. Precondition failures are returned directly; anything
    /// after that arrives as a [`ChatEvent::Error`].
    pub async fn stream_reply(
        &self,
        owner_id: &str,
        conversation_id: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<ChatStream> {
        let (_, transcript, options) =
            self.prepare(owner_id, conversation_id, content, now).await?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let store = self.store.clone();
        let generator = self.generator.clone();
        let conversation_id = conversation_id.to_string();

        tokio::spawn(async move {
            let mut upstream = match generator.stream(&transcript, &options).await {
                Ok(upstream) => upstream,
                Err(e) => {
                    warn!(conversation_id = %conversation_id, error = %e, "chat stream failed to start");
                    let _ = tx.send(ChatEvent::Error { message: e.to_string() }).await;
                    return;
                }
            };

            let mut reply = String::new();
            loop {
                tokio::select! {
                    _ = tx.closed() => {
                        info!(conversation_id = %conversation_id, partial_chars = reply.chars().count(), "client disconnected; partial reply discarded");
                        return;
                    }
                    item = upstream.next() => match item {
                        Some(Ok(content)) => {
                            reply.push_str(&content);
                            if tx.send(ChatEvent::Chunk { content }).await.is_err() {
                                info!(conversation_id = %conversation_id, partial_chars = reply.chars().count(), "client disconnected; partial reply discarded");
                                return;
                            }
                        }
                        Some(Err(e)) => {
                            warn!(conversation_id = %conversation_id, error = %e, "chat stream interrupted");
                            let _ = tx.send(ChatEvent::Error { message: e.to_string() }).await;
                            return;
                        }
                        None => break,
                    }
                }
            }
            // Release the upstream connection before touching the store.
            drop(upstream);

            if reply.trim().is_empty() {
                let _ = tx
                    .send(ChatEvent::Error {
                        message: GenerationError::Empty.to_string(),
                    })
                    .await;
                return;
            }

            let message = Message::new(&conversation_id, Role::Assistant, &reply, Utc::now());
            match store.append_message(&message).await {
                Ok(()) => {
                    let _ = tx
                        .send(ChatEvent::Complete {
                            message_id: message.id,
                        })
                        .await;
                }
                Err(e) => {
                    error!(conversation_id = %conversation_id, error = %e, "failed to store streamed reply");
                    let _ = tx
                        .send(ChatEvent::Error {
                            message: "failed to store reply".to_string(),
                        })
                        .await;
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }
}

//! Generation helpers over a [`TextGenerator`].
//!
//! Each helper is one blocking completion: a prompt template from
//! [`mindflow_core::prompts`] in, its parse rule applied to the reply.

use std::sync::Arc;

use mindflow_core::models::Message;
use mindflow_core::prompts;

use crate::config::OrganizeConfig;
use crate::llm::{GenerationError, GenerationOptions, TextGenerator};

#[derive(Clone)]
pub struct Assistant {
    generator: Arc<dyn TextGenerator>,
    limits: OrganizeConfig,
}

impl Assistant {
    pub fn new(generator: Arc<dyn TextGenerator>, limits: OrganizeConfig) -> Self {
        Self { generator, limits }
    }

    async fn run(
        &self,
        messages: Vec<mindflow_core::models::ChatMessage>,
        model: Option<&str>,
    ) -> Result<String, GenerationError> {
        self.generator
            .complete(&messages, &GenerationOptions::with_model(model))
            .await
    }

    /// Summary of the transcript's tail.
    pub async fn summarize(
        &self,
        transcript: &[Message],
        model: Option<&str>,
    ) -> Result<String, GenerationError> {
        let prompt = prompts::summary_prompt(
            transcript,
            self.limits.summary_window,
            self.limits.summary_max_chars,
        );
        let summary = prompts::parse_summary(
            &self.run(prompt, model).await?,
            self.limits.summary_max_chars,
        );
        if summary.is_empty() {
            return Err(GenerationError::Empty);
        }
        Ok(summary)
    }

    /// Structured markdown document from the whole transcript.
    pub async fn write_document(
        &self,
        transcript: &[Message],
        title: &str,
        model: Option<&str>,
    ) -> Result<String, GenerationError> {
        let raw = self
            .run(prompts::document_prompt(transcript, title), model)
            .await?;
        let content = prompts::parse_document(&raw);
        if content.is_empty() {
            return Err(GenerationError::Empty);
        }
        let missing = prompts::missing_sections(&content);
        if !missing.is_empty() {
            tracing::warn!(?missing, "generated document lacks expected sections");
        }
        Ok(content)
    }

    /// At most `max_tags` tags, none empty.
    pub async fn suggest_tags(
        &self,
        content: &str,
        model: Option<&str>,
    ) -> Result<Vec<String>, GenerationError> {
        let raw = self
            .run(
                prompts::tags_prompt(content, self.limits.tag_input_chars),
                model,
            )
            .await?;
        Ok(prompts::parse_tags(&raw, self.limits.max_tags))
    }

    pub async fn suggest_title(
        &self,
        summary: &str,
        model: Option<&str>,
    ) -> Result<String, GenerationError> {
        let raw = self
            .run(
                prompts::title_prompt(summary, self.limits.title_max_chars),
                model,
            )
            .await?;
        Ok(prompts::parse_title(&raw, self.limits.title_max_chars))
    }

    pub async fn key_points(
        &self,
        summary: &str,
        model: Option<&str>,
    ) -> Result<Vec<String>, GenerationError> {
        let raw = self
            .run(prompts::key_points_prompt(summary), model)
            .await?;
        Ok(prompts::parse_key_points(&raw, self.limits.max_key_points))
    }
}

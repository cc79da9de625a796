//! AI augmentation: marker detection and model invocation.

use std::sync::Arc;

use async_trait::async_trait;
use devroom_types::{AiReply, MessageBody};
use tracing::{info, warn};

use crate::error::ModelError;

/// Default inline marker addressing the AI participant.
pub const DEFAULT_MARKER: &str = "@ai";

/// Reply text broadcast when the model call fails.
pub const FALLBACK_TEXT: &str = "An error occurred while processing your request.";

/// A generative model that turns a prompt into a structured reply.
#[async_trait]
pub trait ModelService: Send + Sync + 'static {
    async fn generate(&self, prompt: &str) -> Result<AiReply, ModelError>;
}

/// Decides which chat messages go to the model and calls it.
#[derive(Clone)]
pub struct AugmentationPipeline {
    marker: String,
    model: Arc<dyn ModelService>,
}

impl std::fmt::Debug for AugmentationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AugmentationPipeline")
            .field("marker", &self.marker)
            .finish_non_exhaustive()
    }
}

impl AugmentationPipeline {
    /// An empty `marker` falls back to [`DEFAULT_MARKER`].
    pub fn new(marker: impl Into<String>, model: Arc<dyn ModelService>) -> Self {
        let marker = marker.into();
        let marker = if marker.trim().is_empty() {
            DEFAULT_MARKER.to_owned()
        } else {
            marker
        };
        Self { marker, model }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// The prompt of a marked text message: every marker occurrence removed
    /// and the rest trimmed. `None` for unmarked or structured messages.
    pub fn extract_prompt(&self, message: &MessageBody) -> Option<String> {
        let text = message.as_text()?;
        if !text.contains(&self.marker) {
            return None;
        }
        Some(text.replace(&self.marker, "").trim().to_owned())
    }

    /// Call the model. Failures become the fallback reply.
    pub async fn invoke(&self, prompt: &str) -> AiReply {
        match self.model.generate(prompt).await {
            Ok(reply) => {
                info!(prompt_len = prompt.len(), has_tree = reply.file_tree.is_some(), "model replied");
                reply
            }
            Err(e) => {
                warn!(error = %e, "model call failed");
                AiReply::text(FALLBACK_TEXT)
            }
        }
    }
}

/// Test double returning canned replies and recording prompts.
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    pub struct ScriptedModel {
        pub reply: Result<AiReply, ModelError>,
        pub delay: Duration,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        pub fn replying(reply: AiReply) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply),
                delay: Duration::ZERO,
                prompts: Mutex::new(Vec::new()),
            })
        }

        pub fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err(ModelError::EmptyResponse),
                delay: Duration::ZERO,
                prompts: Mutex::new(Vec::new()),
            })
        }

        pub fn slow(reply: AiReply, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply),
                delay,
                prompts: Mutex::new(Vec::new()),
            })
        }

        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelService for ScriptedModel {
        async fn generate(&self, prompt: &str) -> Result<AiReply, ModelError> {
            self.prompts.lock().unwrap().push(prompt.to_owned());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.reply.clone()
        }
    }
}

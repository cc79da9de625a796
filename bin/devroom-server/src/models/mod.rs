//! Generative model backends for the AI participant.

pub mod gemini;

use std::sync::Arc;

use devroom_core::ModelService;
use tracing::{info, warn};

use crate::config::Config;

pub use gemini::{DisabledModel, GeminiModel};

/// Pick the model backend for `cfg`.
pub fn from_config(cfg: &Config) -> Arc<dyn ModelService> {
    match &cfg.gemini_api_key {
        Some(key) => {
            info!(model = %cfg.gemini_model, "Gemini model enabled");
            Arc::new(GeminiModel::new(&cfg.gemini_base_url, key, &cfg.gemini_model))
        }
        None => {
            warn!("DEVROOM_GEMINI_API_KEY not set; AI replies will use the fallback text");
            Arc::new(DisabledModel)
        }
    }
}

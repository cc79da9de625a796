//! Google Generative Language (`generateContent`) client.

use async_trait::async_trait;
use devroom_core::{ModelError, ModelService};
use devroom_types::AiReply;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Persona and reply format the model is instructed with.
pub const SYSTEM_INSTRUCTION: &str = r#"You are an expert in MERN and Development. You have an experience of 10 years in development. You always write code in a modular way, breaking the code into the possible smallest units while following best practices. You use understandable comments in your code and ensure the code remains scalable and maintainable. You handle errors and exceptions well and consider edge cases.

Examples:

<example>
user: Create an express application
response: {
    "text": "Here is your file tree structure for the Express server:",
    "fileTree": {
        "app.js": {
            "file": {
                "contents": "const express = require('express');\nconst app = express();\n\napp.get('/', (req, res) => {\n    res.send('Hello World!');\n});\n\napp.listen(process.env.PORT || 3000, () => {\n    console.log('Server is running');\n});\n"
            }
        },
        "package.json": {
            "file": {
                "contents": "{\n    \"name\": \"express-server\",\n    \"version\": \"1.0.0\",\n    \"main\": \"app.js\",\n    \"scripts\": { \"start\": \"node app.js\" },\n    \"dependencies\": { \"express\": \"^4.21.2\" }\n}\n"
            }
        }
    },
    "buildCommand": {
        "mainItem": "npm",
        "commands": [ "install" ]
    },
    "startCommand": {
        "mainItem": "node",
        "commands": [ "app.js" ]
    }
}
</example>

<example>
user: Hello
response: {
    "text": "Hello, How can I help you today?"
}
</example>

IMPORTANT: Avoid using generic file names like routes/index.js
"#;

const TEMPERATURE: f32 = 0.4;

/// [`ModelService`] backed by the Gemini REST API.
#[derive(Clone)]
pub struct GeminiModel {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl std::fmt::Debug for GeminiModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiModel")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl GeminiModel {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl ModelService for GeminiModel {
    async fn generate(&self, prompt: &str) -> Result<AiReply, ModelError> {
        let request = GenerateContentRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: SYSTEM_INSTRUCTION.to_owned(),
                }],
            },
            contents: vec![Content {
                role: Some("user".to_owned()),
                parts: vec![Part {
                    text: prompt.to_owned(),
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                temperature: TEMPERATURE,
            },
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "model request rejected");
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Transport(format!("failed to decode response: {e}")))?;
        let text = extract_text(parsed).ok_or(ModelError::EmptyResponse)?;
        debug!(chars = text.len(), "model text received");
        Ok(parse_reply(&text))
    }
}

/// Used when no API key is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledModel;

#[async_trait]
impl ModelService for DisabledModel {
    async fn generate(&self, _prompt: &str) -> Result<AiReply, ModelError> {
        Err(ModelError::NotConfigured)
    }
}

/// The model is asked for JSON; anything else is relayed as plain text.
fn parse_reply(text: &str) -> AiReply {
    match serde_json::from_str::<AiReply>(text) {
        Ok(reply) => reply,
        Err(e) => {
            debug!(error = %e, "model text is not a structured reply");
            AiReply::text(text)
        }
    }
}

fn extract_text(response: GenerateContentResponse) -> Option<String> {
    let text: String = response
        .candidates
        .into_iter()
        .flatten()
        .next()?
        .content?
        .parts
        .into_iter()
        .filter_map(|part| part.text)
        .collect();
    (!text.trim().is_empty()).then_some(text)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ContentResponse>,
}

#[derive(Deserialize)]
struct ContentResponse {
    #[serde(default)]
    parts: Vec<PartResponse>,
}

#[derive(Deserialize)]
struct PartResponse {
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn candidate(text: &str) -> serde_json::Value {
        json!({ "candidates": [ { "content": { "role": "model", "parts": [ { "text": text } ] } } ] })
    }

    #[tokio::test]
    async fn sends_prompt_and_parses_structured_reply() {
        let server = MockServer::start().await;
        let reply = json!({
            "text": "Here you go",
            "fileTree": { "app.js": { "file": { "contents": "x" } } },
            "startCommand": { "mainItem": "node", "commands": ["app.js"] }
        });
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-test:generateContent"))
            .and(header("x-goog-api-key", "key-1"))
            .and(body_partial_json(json!({
                "contents": [ { "role": "user", "parts": [ { "text": "make an app" } ] } ],
                "generationConfig": { "responseMimeType": "application/json" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(candidate(&reply.to_string())))
            .expect(1)
            .mount(&server)
            .await;

        let model = GeminiModel::new(server.uri(), "key-1", "gemini-test");
        let result = model.generate("make an app").await.unwrap();

        assert_eq!(result.text, "Here you go");
        assert_eq!(result.file_tree.unwrap().contents("app.js"), Some("x"));
        assert_eq!(result.start_command.unwrap().main_item, "node");
    }

    #[tokio::test]
    async fn plain_text_becomes_text_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(candidate("just words")))
            .mount(&server)
            .await;

        let model = GeminiModel::new(server.uri(), "k", "m");
        assert_eq!(model.generate("hi").await.unwrap(), AiReply::text("just words"));
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("Too Many Requests"))
            .mount(&server)
            .await;

        let model = GeminiModel::new(server.uri(), "k", "m");
        match model.generate("hi").await {
            Err(ModelError::Status { status, body }) => {
                assert_eq!(status, 429);
                assert_eq!(body, "Too Many Requests");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_candidates_are_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
            .mount(&server)
            .await;

        let model = GeminiModel::new(server.uri(), "k", "m");
        assert!(matches!(model.generate("hi").await, Err(ModelError::EmptyResponse)));
    }

    #[tokio::test]
    async fn disabled_model_is_not_configured() {
        assert!(matches!(DisabledModel.generate("hi").await, Err(ModelError::NotConfigured)));
    }
}

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use shared::RecommendationResult;
use std::time::Instant;

use crate::config::OpenAiConfig;
use crate::text::truncate;

const RECOMMENDATION_PROMPT: &str = r#"You receive two photos of the same face. The first is the original photo. The second is the same photo with detected skin concerns highlighted as colored overlays.
Assess the skin and give a brief, specific skin-care routine: product step, active ingredient, concentration, amount per use, and how often.
Reply with a single JSON object and nothing else, using exactly this shape:
{
  "analysis": "short summary of what is visible",
  "recommendations": [
    {
      "step": "Cleansing",
      "active_ingredient": "Salicylic acid",
      "concentration": "2%",
      "dosage": "pea-sized amount",
      "frequency": "Twice daily",
      "notes": "Rinse with lukewarm water."
    }
  ],
  "cautions": ["Patch-test new products for 24-48 hours."],
  "disclaimer": "General guidance, not a medical diagnosis."
}
"active_ingredient", "concentration", "dosage" and "notes" may be omitted when they do not apply."#;

#[derive(Debug, thiserror::Error)]
pub enum RecommendationError {
    #[error("Model request failed: {0}")]
    ModelRequest(String),
    #[error("Model reply could not be parsed: {0}")]
    ResponseParse(String),
}

impl From<reqwest::Error> for RecommendationError {
    fn from(err: reqwest::Error) -> Self {
        RecommendationError::ModelRequest(err.to_string())
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Asks a vision-capable chat model for a skin-care routine. Single attempt.
#[derive(Clone)]
pub struct RecommendationRequester {
    http_client: HttpClient,
    api_key: String,
    base_url: String,
    model: String,
}

impl RecommendationRequester {
    pub fn new(http_client: HttpClient, config: &OpenAiConfig) -> Self {
        Self {
            http_client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        }
    }

    pub async fn request_recommendations(
        &self,
        base_png: &[u8],
        composed_png: &[u8],
    ) -> Result<RecommendationResult, RecommendationError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: RECOMMENDATION_PROMPT,
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: png_data_uri(base_png),
                        },
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: png_data_uri(composed_png),
                        },
                    },
                ],
            }],
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let started = Instant::now();
        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!(
                "Model request failed [{}]: {}",
                status,
                truncate(&body, 512)
            );
            return Err(RecommendationError::ModelRequest(format!(
                "model endpoint returned status {}",
                status.as_u16()
            )));
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| RecommendationError::ResponseParse(e.to_string()))?;
        log::info!("Model replied in {:?}", started.elapsed());

        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| RecommendationError::ResponseParse("reply has no content".into()))?;
        parse_recommendation(&content)
    }
}

pub fn png_data_uri(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png))
}

/// Parses the model's message content, tolerating a fenced ```json block.
pub fn parse_recommendation(content: &str) -> Result<RecommendationResult, RecommendationError> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);

    serde_json::from_str(body.trim()).map_err(|e| {
        log::warn!("Unparseable model reply: {}", truncate(content, 512));
        RecommendationError::ResponseParse(e.to_string())
    })
}

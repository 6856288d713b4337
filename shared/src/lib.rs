use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UploadResponse {
    pub file_id: String,
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RecommendationStep {
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_ingredient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concentration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dosage: Option<String>,
    pub frequency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Structured skin-care answer returned by the vision model.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RecommendationResult {
    pub analysis: String,
    pub recommendations: Vec<RecommendationStep>,
    pub cautions: Vec<String>,
    pub disclaimer: String,
}

use rcc_protocol::{claude, gemini, openai};
use serde::{Deserialize, Serialize};

/// Dialect-independent model id, returned by [`crate::list_models`]
/// normalizers and consumed by the token-limit prober's capability-detection
/// step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedModel {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u32>,
}

pub fn from_claude(response: claude::list_models::ListModelsResponse) -> Vec<NormalizedModel> {
    response
        .data
        .into_iter()
        .map(|model| NormalizedModel {
            id: model.id,
            context_window: None,
        })
        .collect()
}

pub fn from_openai(response: openai::list_models::ListModelsResponse) -> Vec<NormalizedModel> {
    response
        .data
        .into_iter()
        .map(|model| NormalizedModel {
            id: model.id,
            context_window: None,
        })
        .collect()
}

pub fn from_gemini(response: gemini::list_models::ListModelsResponse) -> Vec<NormalizedModel> {
    response
        .models
        .into_iter()
        .map(|model| NormalizedModel {
            id: model.name,
            context_window: model.input_token_limit,
        })
        .collect()
}

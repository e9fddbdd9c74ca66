//! Pinecone inference API embeddings.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{error_from_response, EmbeddingError, EmbeddingProvider, EmbeddingResult, InputType};

pub const PINECONE_API_VERSION: &str = "2024-10";

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    parameters: EmbedParameters,
    inputs: Vec<EmbedInput<'a>>,
}

#[derive(Serialize)]
struct EmbedParameters {
    input_type: &'static str,
    truncate: &'static str,
}

#[derive(Serialize)]
struct EmbedInput<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedValues>,
}

#[derive(Deserialize)]
struct EmbedValues {
    values: Vec<f32>,
}

/// Hosted embeddings (multilingual-e5-large by default, 1024 dimensions).
pub struct PineconeEmbeddings {
    api_key: String,
    model: String,
    dimensions: usize,
    client: Client,
    base_url: String,
}

impl PineconeEmbeddings {
    pub fn new(api_key: String, model: Option<String>, dimensions: Option<usize>) -> Self {
        Self {
            api_key,
            model: model.unwrap_or_else(|| "multilingual-e5-large".to_string()),
            dimensions: dimensions.unwrap_or(1024),
            client: Client::new(),
            base_url: "https://api.pinecone.io/embed".to_string(),
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    /// The e5 family only distinguishes passages from queries.
    fn input_type_param(input_type: InputType) -> &'static str {
        match input_type {
            InputType::Query => "query",
            InputType::Passage | InputType::SearchDocument => "passage",
        }
    }
}

#[async_trait]
impl EmbeddingProvider for PineconeEmbeddings {
    async fn embed_batch(
        &self,
        texts: &[String],
        input_type: InputType,
    ) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let request = EmbedRequest {
            model: &self.model,
            parameters: EmbedParameters {
                input_type: Self::input_type_param(input_type),
                truncate: "END",
            },
            inputs: texts.iter().map(|t| EmbedInput { text: t }).collect(),
        };

        debug!(count = texts.len(), model = %self.model, "Pinecone embed request");

        let response = self
            .client
            .post(&self.base_url)
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", PINECONE_API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbeddingError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;
        Ok(body.data.into_iter().map(|d| d.values).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let p = PineconeEmbeddings::new("key".to_string(), None, None);
        assert_eq!(p.model_name(), "multilingual-e5-large");
        assert_eq!(p.dimensions(), 1024);
        assert_eq!(p.base_url, "https://api.pinecone.io/embed");
    }

    #[test]
    fn test_input_type_mapping() {
        assert_eq!(PineconeEmbeddings::input_type_param(InputType::Query), "query");
        assert_eq!(PineconeEmbeddings::input_type_param(InputType::Passage), "passage");
        assert_eq!(
            PineconeEmbeddings::input_type_param(InputType::SearchDocument),
            "passage"
        );
    }

    #[test]
    fn test_request_shape() {
        let texts = vec!["a".to_string(), "b".to_string()];
        let request = EmbedRequest {
            model: "multilingual-e5-large",
            parameters: EmbedParameters {
                input_type: "passage",
                truncate: "END",
            },
            inputs: texts.iter().map(|t| EmbedInput { text: t }).collect(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["parameters"]["truncate"], "END");
        assert_eq!(value["inputs"][1]["text"], "b");
    }
}

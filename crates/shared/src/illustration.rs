use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ClientError;
use crate::models::Lead;

const OPENAI_IMAGES_URL: &str = "https://api.openai.com/v1/images/generations";
const IMAGE_MODEL: &str = "gpt-image-1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl GeneratedImage {
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }
}

#[async_trait]
pub trait IllustrationService: Send + Sync {
    async fn illustrate(&self, prompt: &str) -> Result<GeneratedImage>;
}

pub fn hero_prompt(main: &Lead) -> String {
    format!(
        "Editorial hero illustration for a newsletter story titled \"{}\". {} \
         Flat, modern style with bold shapes and a limited palette. \
         No text, letters, logos or watermarks.",
        main.title, main.summary
    )
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    size: &'a str,
    n: u32,
}

#[derive(Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    #[serde(default)]
    b64_json: Option<String>,
}

pub struct OpenAiIllustrator {
    client: Client,
    api_key: String,
}

impl OpenAiIllustrator {
    pub fn new(api_key: Option<&str>) -> Result<Self, ClientError> {
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(ClientError::NotConfigured {
                service: "Illustration service",
                variable: "OPENAI_API_KEY",
            })?;

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl IllustrationService for OpenAiIllustrator {
    async fn illustrate(&self, prompt: &str) -> Result<GeneratedImage> {
        debug!(model = IMAGE_MODEL, "Image generation request");

        let response = self
            .client
            .post(OPENAI_IMAGES_URL)
            .bearer_auth(&self.api_key)
            .json(&ImageRequest {
                model: IMAGE_MODEL,
                prompt,
                size: "1536x1024",
                n: 1,
            })
            .send()
            .await
            .map_err(ClientError::from)?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("unknown error"));
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            }
            .into());
        }

        let parsed: ImageResponse = response.json().await.map_err(|e| ClientError::Parse {
            what: "image response",
            message: e.to_string(),
        })?;

        let encoded = parsed
            .data
            .into_iter()
            .find_map(|d| d.b64_json)
            .ok_or(ClientError::Empty("illustration service"))?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| ClientError::Parse {
                what: "image payload",
                message: e.to_string(),
            })?;

        Ok(GeneratedImage {
            bytes,
            mime_type: "image/png".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_uri_encodes_bytes() {
        let image = GeneratedImage {
            bytes: b"png".to_vec(),
            mime_type: "image/png".to_string(),
        };
        assert_eq!(image.data_uri(), "data:image/png;base64,cG5n");
    }

    #[test]
    fn test_illustrator_requires_key() {
        assert!(OpenAiIllustrator::new(Some("")).is_err());
    }
}

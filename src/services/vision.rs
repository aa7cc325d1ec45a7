use crate::services::classifier::{ClassificationRequest, ClassifierError, VisualClassifier};
use crate::services::image_source::{ImageSource, to_data_url};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt::Write as _;
use std::sync::Arc;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Message {
    pub role: String,
    pub content: MessageContent,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<MessagePart>),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum MessagePart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    response_format: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatFullResponse {
    choices: Vec<FullChoice>,
}

#[derive(Deserialize)]
struct FullChoice {
    message: FullMessage,
}

#[derive(Deserialize)]
struct FullMessage {
    content: Option<String>,
}

const SYSTEM_PROMPT: &str = r#"You review construction job-site photos for duplicates.
You receive one TARGET photo followed by CANDIDATE photos taken shortly before or after it.
Decide how the target relates to the candidates:
- "burst_shot": one of several frames fired in quick succession of the same subject
- "duplicate": the same shot taken again from the same spot
- "similar": same scene or subject, noticeably different framing or moment
- "unique": nothing among the candidates repeats the target
List related candidates by their CANDIDATE number in "relatedIndices" (numbering starts at 0).
Only for "duplicate" and "burst_shot", rate the TARGET in "qualityAssessment" with scores between 0 and 1.
Answer with a single JSON object and nothing else."#;

/// Client for an OpenAI-compatible chat completions endpoint with vision input.
#[derive(Clone)]
pub struct VisionClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    images: Arc<dyn ImageSource>,
}

impl VisionClient {
    pub fn new(base_url: &str, model: &str, images: Arc<dyn ImageSource>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: None,
            images,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        self.api_key = (!api_key.is_empty()).then_some(api_key);
        self
    }

    pub async fn prepare_message(&self, request: &ClassificationRequest) -> Result<Message, ClassifierError> {
        let mut parts = vec![MessagePart::Text {
            text: describe_request(request),
        }];

        let target = self.images.fetch(&request.image_url).await?;
        parts.push(MessagePart::Text {
            text: "TARGET".to_string(),
        });
        parts.push(MessagePart::ImageUrl {
            image_url: ImageUrl {
                url: to_data_url(&target),
            },
        });

        for candidate in &request.candidates {
            let bytes = self.images.fetch(&candidate.image_url).await?;
            parts.push(MessagePart::Text {
                text: format!("CANDIDATE {}", candidate.index),
            });
            parts.push(MessagePart::ImageUrl {
                image_url: ImageUrl {
                    url: to_data_url(&bytes),
                },
            });
        }

        Ok(Message {
            role: "user".to_string(),
            content: MessageContent::Parts(parts),
        })
    }

    pub async fn call(&self, messages: Vec<Message>) -> Result<String, ClassifierError> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: 0.1,
            response_format: response_format(),
        };
        let url = format!("{}/v1/chat/completions", self.base_url);

        let mut builder = self.http.post(url).json(&body);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(ClassifierError::Api {
                status: response.status(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let full: ChatFullResponse = response.json().await?;
        full.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(ClassifierError::EmptyResponse)
    }
}

#[async_trait]
impl VisualClassifier for VisionClient {
    async fn classify(&self, request: &ClassificationRequest) -> Result<String, ClassifierError> {
        let user = self.prepare_message(request).await?;
        let system = Message {
            role: "system".to_string(),
            content: MessageContent::Text(SYSTEM_PROMPT.to_string()),
        };
        self.call(vec![system, user]).await
    }
}

/// Text preamble with the metadata the images alone don't show.
fn describe_request(request: &ClassificationRequest) -> String {
    let mut text = format!(
        "Target photo {} with {} candidate(s).",
        request.photo_id,
        request.candidates.len()
    );
    if let Some(at) = request.coordinates {
        let _ = write!(text, " Target GPS: {:.6}, {:.6}.", at.latitude, at.longitude);
    }

    for candidate in &request.candidates {
        let _ = write!(
            text,
            "\nCANDIDATE {}: taken {:+}s relative to the target",
            candidate.index, candidate.offset_secs
        );
        if let Some(at) = candidate.coordinates {
            let _ = write!(text, ", GPS {:.6}, {:.6}", at.latitude, at.longitude);
        }
        if let Some(similarity) = candidate.fingerprint_similarity {
            let _ = write!(text, ", perceptual hash similarity {:.2}", similarity);
        }
        text.push('.');
    }
    text
}

fn response_format() -> serde_json::Value {
    let score = json!({ "type": "number", "minimum": 0, "maximum": 1 });
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": "photo_judgement",
            "schema": {
                "type": "object",
                "properties": {
                    "decision": { "type": "string", "enum": ["duplicate", "burst_shot", "similar", "unique"] },
                    "confidence": score,
                    "reasoning": { "type": "string" },
                    "visualObservations": { "type": "string" },
                    "relatedIndices": { "type": "array", "items": { "type": "integer", "minimum": 0 } },
                    "patterns": { "type": "array", "items": { "type": "string" } },
                    "qualityAssessment": {
                        "type": "object",
                        "properties": {
                            "sharpness": score,
                            "composition": score,
                            "lighting": score,
                            "subjectClarity": score,
                            "notes": { "type": "string" }
                        },
                        "required": ["sharpness", "composition", "lighting", "subjectClarity"]
                    }
                },
                "required": ["decision", "confidence", "reasoning", "relatedIndices"]
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::photo::Coordinates;
    use crate::services::classifier::CandidateSummary;
    use crate::services::image_source::ImageSourceError;

    struct MissingImages;

    #[async_trait]
    impl ImageSource for MissingImages {
        async fn fetch(&self, _image_url: &str) -> Result<Vec<u8>, ImageSourceError> {
            Err(ImageSourceError::MissingUrl)
        }
    }

    struct FixedImages;

    #[async_trait]
    impl ImageSource for FixedImages {
        async fn fetch(&self, _image_url: &str) -> Result<Vec<u8>, ImageSourceError> {
            Ok(vec![0xFF, 0xD8, 0xFF, 0xE0])
        }
    }

    fn request() -> ClassificationRequest {
        ClassificationRequest {
            photo_id: "t".to_string(),
            image_url: "t.jpg".to_string(),
            captured_at: 100,
            coordinates: Some(Coordinates::new(47.6062, -122.3321)),
            candidates: vec![
                CandidateSummary {
                    index: 0,
                    photo_id: "a".to_string(),
                    image_url: "a.jpg".to_string(),
                    offset_secs: -3,
                    coordinates: None,
                    fingerprint_similarity: Some(0.953),
                },
                CandidateSummary {
                    index: 1,
                    photo_id: "b".to_string(),
                    image_url: "b.jpg".to_string(),
                    offset_secs: 12,
                    coordinates: Some(Coordinates::new(47.6062, -122.3321)),
                    fingerprint_similarity: None,
                },
            ],
        }
    }

    #[test]
    fn test_description_numbers_candidates_from_zero() {
        let text = describe_request(&request());

        assert!(text.starts_with("Target photo t with 2 candidate(s). Target GPS: 47.606200, -122.332100."));
        assert!(text.contains("CANDIDATE 0: taken -3s relative to the target, perceptual hash similarity 0.95."));
        assert!(text.contains("CANDIDATE 1: taken +12s relative to the target, GPS 47.606200, -122.332100."));
    }

    #[tokio::test]
    async fn test_message_interleaves_labels_and_images() {
        let client = VisionClient::new("http://localhost:8080/", "vision", Arc::new(FixedImages));
        let message = client.prepare_message(&request()).await.unwrap();

        let MessageContent::Parts(parts) = message.content else {
            panic!("expected multipart content");
        };
        assert_eq!(parts.len(), 7);
        assert!(matches!(&parts[1], MessagePart::Text { text } if text == "TARGET"));
        assert!(
            matches!(&parts[2], MessagePart::ImageUrl { image_url } if image_url.url.starts_with("data:image/jpeg;base64,"))
        );
        assert!(matches!(&parts[5], MessagePart::Text { text } if text == "CANDIDATE 1"));
        assert_eq!(client.base_url, "http://localhost:8080");
    }

    #[tokio::test]
    async fn test_missing_image_is_a_classifier_error() {
        let client = VisionClient::new("http://localhost:8080", "vision", Arc::new(MissingImages));

        let err = client.classify(&request()).await.unwrap_err();

        assert!(matches!(err, ClassifierError::Image(ImageSourceError::MissingUrl)));
    }

    #[test]
    fn test_request_body_shape() {
        let body = ChatRequest {
            model: "vision".to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: MessageContent::Text("hi".to_string()),
            }],
            temperature: 0.1,
            response_format: response_format(),
        };
        let value = serde_json::to_value(&body).unwrap();

        assert_eq!(value["messages"][0]["content"], "hi");
        assert_eq!(value["response_format"]["type"], "json_schema");
        assert_eq!(
            value["response_format"]["json_schema"]["schema"]["properties"]["decision"]["enum"][1],
            "burst_shot"
        );
    }
}

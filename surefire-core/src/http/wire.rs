//! OpenAI-compatible wire types
//!
//! Only the fields this crate sends or reads are modelled; everything else in
//! a provider response is ignored.

use crate::protocol::{Attachment, Message, Role};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<WireMessage>,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,

    /// Non-standard flag understood by search-capable gateways
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub web_search: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: WireContent,
}

/// Plain string, or content parts when attachments are present
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum WireContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    InputAudio { input_audio: InputAudio },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputAudio {
    pub data: String,
    pub format: &'static str,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        let content = if message.attachments.is_empty() {
            WireContent::Text(message.content.clone())
        } else {
            let mut parts = vec![ContentPart::Text {
                text: message.content.clone(),
            }];
            parts.extend(message.attachments.iter().filter_map(attachment_part));
            WireContent::Parts(parts)
        };
        Self {
            role: message.role,
            content,
        }
    }
}

fn attachment_part(attachment: &Attachment) -> Option<ContentPart> {
    match attachment {
        Attachment::Image { url: Some(url), .. } => Some(ContentPart::ImageUrl {
            image_url: ImageUrl { url: url.clone() },
        }),
        Attachment::Image { base64: Some(data), .. } => Some(ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:image/png;base64,{}", data),
            },
        }),
        Attachment::Audio { base64: Some(data), .. } => Some(ContentPart::InputAudio {
            input_audio: InputAudio {
                data: data.clone(),
                format: "wav",
            },
        }),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<String>,
}

impl StreamChunk {
    /// Concatenated text of every choice's delta
    pub fn text(&self) -> String {
        self.choices
            .iter()
            .filter_map(|c| c.delta.content.as_deref())
            .collect()
    }
}

#[derive(Debug, Serialize)]
pub struct ImageRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
pub struct ImageResponse {
    #[serde(default)]
    pub data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
pub struct ImageData {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub b64_json: Option<String>,
}

impl ImageResponse {
    /// URLs, or base64 payloads when the provider returned inline images
    pub fn into_images(self) -> Vec<String> {
        self.data
            .into_iter()
            .filter_map(|d| d.url.or(d.b64_json))
            .collect()
    }
}

#[derive(Debug, Serialize)]
pub struct SpeechRequest<'a> {
    pub model: &'a str,
    pub input: &'a str,
    pub voice: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct TranscriptionResponse {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ModelList {
    #[serde(default)]
    pub data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
pub struct ModelEntry {
    pub id: String,
}

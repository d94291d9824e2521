//! Core protocol types exchanged between sessions, the orchestrator and transports

use crate::capabilities::{Feature, FeatureSet};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions that guide the model's behavior; at most one, always first
    System,
    User,
    Assistant,
}

/// Binary or remote media attached to a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Attachment {
    Image {
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        base64: Option<String>,
    },
    Audio {
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        base64: Option<String>,
    },
}

impl Attachment {
    pub fn image_url(url: impl Into<String>) -> Self {
        Attachment::Image {
            url: Some(url.into()),
            base64: None,
        }
    }

    pub fn image_base64(data: impl Into<String>) -> Self {
        Attachment::Image {
            url: None,
            base64: Some(data.into()),
        }
    }

    pub fn audio_base64(data: impl Into<String>) -> Self {
        Attachment::Audio {
            url: None,
            base64: Some(data.into()),
        }
    }

    /// The feature a provider needs to accept this attachment
    pub fn required_feature(&self) -> Feature {
        match self {
            Attachment::Image { .. } => Feature::Vision,
            Attachment::Audio { .. } => Feature::Audio,
        }
    }
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            attachments: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }
}

/// Checks the conversation invariant: at most one system message, and only
/// in first position. Returns the offending index otherwise.
pub fn find_misplaced_system(messages: &[Message]) -> Option<usize> {
    messages
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, m)| m.is_system())
        .map(|(i, _)| i)
}

/// Chat completion input handed to a transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub web_search: bool,
}

impl ChatPayload {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            web_search: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionPayload {
    pub audio: Vec<u8>,
    pub file_name: String,
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechPayload {
    pub input: String,
    pub voice: String,
}

/// Request body for a single non-streaming attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Chat(ChatPayload),
    Image(ImagePayload),
    Transcription(TranscriptionPayload),
    Speech(SpeechPayload),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Chat(_) => "chat",
            Payload::Image(_) => "image",
            Payload::Transcription(_) => "transcription",
            Payload::Speech(_) => "speech",
        }
    }
}

/// Successful transport output
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Text(String),
    /// Image URLs or base64 data
    Images(Vec<String>),
    Audio(Vec<u8>),
}

impl Response {
    pub fn into_text(self) -> Option<String> {
        match self {
            Response::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn into_images(self) -> Option<Vec<String>> {
        match self {
            Response::Images(images) => Some(images),
            _ => None,
        }
    }

    pub fn into_audio(self) -> Option<Vec<u8>> {
        match self {
            Response::Audio(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Empty output counts as an invalid response
    pub fn is_empty(&self) -> bool {
        match self {
            Response::Text(text) => text.trim().is_empty(),
            Response::Images(images) => images.is_empty(),
            Response::Audio(bytes) => bytes.is_empty(),
        }
    }
}

/// Immutable description of one logical request
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub model: String,
    pub required_features: FeatureSet,
    /// Budget the history was trimmed to before any provider-specific trimming
    pub token_budget: usize,
    pub history: Vec<Message>,
    pub attachments: Vec<Attachment>,
    pub streaming: bool,
}

impl RequestContext {
    pub fn new(model: impl Into<String>, required_features: FeatureSet) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            model: model.into(),
            required_features,
            token_budget: 0,
            history: Vec::new(),
            attachments: Vec::new(),
            streaming: false,
        }
    }

    pub fn with_history(mut self, history: Vec<Message>, token_budget: usize) -> Self {
        self.history = history;
        self.token_budget = token_budget;
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }
}

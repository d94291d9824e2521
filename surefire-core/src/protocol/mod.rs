//! Protocol module for conversation and request structures
//!
//! These types are provider-agnostic: sessions build them, transports
//! translate them into whatever wire format a backend expects.

pub mod types;

pub use types::{
    find_misplaced_system, Attachment, ChatPayload, ImagePayload, Message, Payload,
    RequestContext, Response, Role, SpeechPayload, TranscriptionPayload,
};

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Message types for LLM interactions
//!
//! Defines the value types that flow through the completion pipeline: model
//! definitions, messages (with image attachments) and completed turns.

use std::fmt;
use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{GenMagicError, Result};
use crate::llm::provider::{StreamEnd, Usage};

/// Role of the message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt
    System,
    /// User message
    User,
    /// Assistant response
    Assistant,
    /// Tool output, never replayed to a provider
    Tool,
}

impl Role {
    /// Parse a wire role, ignoring case. Unknown roles yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An image attachment.
///
/// The decoded raster and its canonical base64 PNG form are always set
/// together, so one can never go stale relative to the other.
#[derive(Clone)]
pub struct Image {
    raster: DynamicImage,
    encoded: String,
}

impl Image {
    /// Build from raster data, encoding it as base64 PNG.
    pub fn from_raster(raster: DynamicImage) -> Result<Self> {
        let encoded = encode_png(&raster)?;
        Ok(Self { raster, encoded })
    }

    /// Build from a base64 PNG payload. Data URLs are accepted; everything up
    /// to the last comma is discarded.
    pub fn from_base64(s: &str) -> Result<Self> {
        let payload = strip_data_url(s);
        let raster = decode_png(payload)?;
        Ok(Self {
            raster,
            encoded: payload.to_string(),
        })
    }

    /// Replace the raster; the encoded form is recomputed. On failure the
    /// image is left unchanged.
    pub fn set_raster(&mut self, raster: DynamicImage) -> Result<()> {
        let encoded = encode_png(&raster)?;
        self.raster = raster;
        self.encoded = encoded;
        Ok(())
    }

    /// Replace from a base64 PNG payload; the raster is recomputed. On failure
    /// the image is left unchanged.
    pub fn set_base64(&mut self, s: &str) -> Result<()> {
        let payload = strip_data_url(s);
        let raster = decode_png(payload)?;
        self.raster = raster;
        self.encoded = payload.to_string();
        Ok(())
    }

    pub fn raster(&self) -> &DynamicImage {
        &self.raster
    }

    /// Canonical base64-encoded PNG
    pub fn base64(&self) -> &str {
        &self.encoded
    }

    /// `data:` URL form used by OpenAI-compatible content parts
    pub fn data_url(&self) -> String {
        format!("data:image/png;base64,{}", self.encoded)
    }
}

fn strip_data_url(s: &str) -> &str {
    match s.rfind(',') {
        Some(pos) => &s[pos + 1..],
        None => s,
    }
}

fn encode_png(raster: &DynamicImage) -> Result<String> {
    let mut buf = Cursor::new(Vec::new());
    raster
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| GenMagicError::Encoding(e.to_string()))?;
    Ok(STANDARD.encode(buf.into_inner()))
}

fn decode_png(payload: &str) -> Result<DynamicImage> {
    let bytes = STANDARD.decode(payload.trim())?;
    let raster = image::load_from_memory_with_format(&bytes, ImageFormat::Png)?;
    Ok(raster)
}

impl PartialEq for Image {
    fn eq(&self, other: &Self) -> bool {
        self.raster == other.raster
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.raster.width())
            .field("height", &self.raster.height())
            .field("encoded_len", &self.encoded.len())
            .finish()
    }
}

impl Serialize for Image {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.encoded)
    }
}

impl<'de> Deserialize<'de> for Image {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Image::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

/// A single unit of dialogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: Role,

    /// Text content; grows in place while a response streams
    pub content: String,

    /// Image attachments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Image>,

    /// True when this message is a fragment to append to the previous one
    #[serde(default)]
    pub delta: bool,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            images: Vec::new(),
            delta: false,
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a fragment to be appended onto the previous message
    pub fn fragment(role: Role, content: impl Into<String>) -> Self {
        Self {
            delta: true,
            ..Self::new(role, content)
        }
    }

    pub fn text(&self) -> &str {
        &self.content
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.content = text.into();
    }

    /// Append streamed text
    pub fn push_text(&mut self, text: &str) {
        self.content.push_str(text);
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn set_images(&mut self, images: Vec<Image>) {
        self.images = images;
    }

    pub fn add_image(&mut self, raster: DynamicImage) -> Result<()> {
        self.images.push(Image::from_raster(raster)?);
        Ok(())
    }

    pub fn add_image_base64(&mut self, encoded: &str) -> Result<()> {
        self.images.push(Image::from_base64(encoded)?);
        Ok(())
    }

    pub fn with_images(mut self, images: Vec<Image>) -> Self {
        self.images = images;
        self
    }

    pub fn is_fragment(&self) -> bool {
        self.delta
    }
}

/// Everything needed to reach one model through one provider API
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDefinition {
    /// Project store row id, if persisted
    #[serde(default)]
    pub id: Option<i64>,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// LLM API in use (e.g. "openrouter")
    pub api: String,

    /// Network endpoint for the API, if any
    #[serde(default)]
    pub api_endpoint: String,

    /// API key, if any
    #[serde(default)]
    pub api_key: String,

    /// Model identifier
    pub model: String,
}

impl ModelDefinition {
    pub fn new(api: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api: api.into(),
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.api_endpoint = endpoint.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = key.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl fmt::Debug for ModelDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = if self.api_key.is_empty() {
            ""
        } else {
            "<redacted>"
        };
        f.debug_struct("ModelDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("api", &self.api)
            .field("api_endpoint", &self.api_endpoint)
            .field("api_key", &key)
            .field("model", &self.model)
            .finish()
    }
}

/// One complete prompt/response exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Identifier handed to observers
    pub id: Uuid,

    /// Definition the turn was sent with
    pub definition: ModelDefinition,

    /// System message
    pub system: Message,

    /// User prompt
    pub prompt: Message,

    /// Response messages in arrival order
    pub response: Vec<Message>,

    /// When the turn was submitted
    pub started_at: DateTime<Utc>,

    /// Token usage reported by the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// How the stream ended; `None` while still open
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<StreamEnd>,
}

impl Turn {
    pub fn new(definition: ModelDefinition, system: Message, prompt: Message) -> Self {
        Self {
            id: Uuid::new_v4(),
            definition,
            system,
            prompt,
            response: Vec::new(),
            started_at: Utc::now(),
            usage: None,
            outcome: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.outcome.is_some()
    }

    /// All response text, messages separated by blank lines
    pub fn response_text(&self) -> String {
        self.response
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

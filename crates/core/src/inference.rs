//! Inference payloads and the type-tag normalizer
//!
//! An [`Inference`] carries a declared [`InferenceKind`] tag that is
//! redundant with its populated [`InferenceValue`]. The normalizer makes
//! the tag agree with the value, or fails the session when the value is
//! missing.

use crate::{Error, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;

/// Declared inference type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InferenceKind {
    /// Tag left for the server to fill in
    #[default]
    Auto,
    Classification,
    Motion,
    Entity,
    Text,
    Event,
    Other,
}

impl fmt::Display for InferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InferenceKind::Auto => "auto",
            InferenceKind::Classification => "classification",
            InferenceKind::Motion => "motion",
            InferenceKind::Entity => "entity",
            InferenceKind::Text => "text",
            InferenceKind::Event => "event",
            InferenceKind::Other => "other",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tag {
    pub value: String,
    pub confidence: f32,
}

impl Tag {
    pub fn new(value: impl Into<String>, confidence: f32) -> Self {
        Self {
            value: value.into(),
            confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Attribute {
    pub name: String,
    pub value: String,
    pub confidence: f32,
}

/// Normalized bounding box (0.0..=1.0 relative to frame size)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rectangle {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Classification {
    pub tag: Option<Tag>,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MotionDetection {
    pub region: Option<Rectangle>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Entity {
    pub tag: Option<Tag>,
    pub attributes: Vec<Attribute>,
    pub bounding_box: Option<Rectangle>,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Text {
    pub value: String,
    pub language: String,
    pub start_timestamp: u64,
    pub end_timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Event {
    pub name: String,
    pub properties: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OtherInference {
    pub content_type: String,
    pub content_bytes: Bytes,
}

/// The populated inference payload
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceValue {
    Classification(Classification),
    Motion(MotionDetection),
    Entity(Entity),
    Text(Text),
    Event(Event),
    Other(OtherInference),
    /// Payload discriminant emitted by a collaborator that this build cannot interpret
    Unknown { discriminant: u32 },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Inference {
    /// Declared type tag; overwritten by [`normalize`]
    pub kind: InferenceKind,
    pub subtype: String,
    pub inference_id: String,
    pub related_inferences: Vec<String>,
    pub value: Option<InferenceValue>,
    pub extensions: HashMap<String, String>,
}

impl Inference {
    /// Build an inference whose tag already matches its value
    pub fn new(value: InferenceValue) -> Self {
        let mut inference = Self {
            value: Some(value),
            ..Default::default()
        };
        if let Ok(kind) = inference.value_kind() {
            inference.kind = kind;
        }
        inference
    }

    pub fn classification(tag: Tag) -> Self {
        Self::new(InferenceValue::Classification(Classification {
            tag: Some(tag),
            attributes: Vec::new(),
        }))
    }

    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = subtype.into();
        self
    }

    /// Kind implied by the populated value
    fn value_kind(&self) -> Result<InferenceKind> {
        match &self.value {
            None => Err(Error::MalformedInference {
                declared: self.kind.to_string(),
                subtype: self.subtype.clone(),
            }),
            Some(InferenceValue::Classification(_)) => Ok(InferenceKind::Classification),
            Some(InferenceValue::Motion(_)) => Ok(InferenceKind::Motion),
            Some(InferenceValue::Entity(_)) => Ok(InferenceKind::Entity),
            Some(InferenceValue::Text(_)) => Ok(InferenceKind::Text),
            Some(InferenceValue::Event(_)) => Ok(InferenceKind::Event),
            Some(InferenceValue::Other(_)) => Ok(InferenceKind::Other),
            Some(InferenceValue::Unknown { discriminant }) => {
                Err(Error::UnrecognizedInference(*discriminant))
            }
        }
    }
}

/// Reconcile the declared tag with the populated value
///
/// Idempotent when the tag is already correct. An empty value fails with
/// [`Error::MalformedInference`]; an uninterpretable value fails with
/// [`Error::UnrecognizedInference`].
pub fn normalize(mut inference: Inference) -> Result<Inference> {
    inference.kind = inference.value_kind()?;
    Ok(inference)
}

/// Normalize every inference, failing on the first malformed one
pub fn normalize_all(inferences: Vec<Inference>) -> Result<Vec<Inference>> {
    inferences.into_iter().map(normalize).collect()
}

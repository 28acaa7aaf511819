//! Adapters between protobuf wire types and session messages
//!
//! Inbound `MediaStreamMessage`s become [`InboundMessage`]s for the session
//! engine; outbound [`OutboundMessage`]s become `MediaStreamMessage`s.
//! Session errors become a terminal [`Status`] carrying the machine-readable
//! reason in the `x-mediagraph-reason` metadata entry.

use crate::generated::{
    self as pb, media_descriptor::MediaSampleFormat, media_sample::Content,
    media_stream_descriptor::DataTransferProperties, media_stream_message::Payload,
};
use bytes::Bytes;
use mediagraph_core::inference::{
    Attribute, Classification, Entity, Event, MotionDetection, OtherInference, Rectangle, Tag,
    Text,
};
use mediagraph_core::{
    DescriptorMessage, Error, FrameContent, FrameMessage, InboundMessage, Inference,
    InferenceKind, InferenceValue, MediaDescriptor, OutboundMessage, PixelFormat, StatusClass,
    TransferSelector, VideoFrameFormat,
};
use tonic::metadata::MetadataValue;
use tonic::{Code, Status};

/// Metadata key carrying [`Error::reason`] on terminal statuses
pub const REASON_METADATA_KEY: &str = "x-mediagraph-reason";

/// Convert a client message into a session message
pub fn inbound_from_proto(
    message: pb::MediaStreamMessage,
) -> mediagraph_core::Result<InboundMessage> {
    let sequence_number = message.sequence_number;
    match message.payload {
        Some(Payload::MediaStreamDescriptor(descriptor)) => {
            let media = descriptor.media_descriptor.ok_or_else(|| {
                Error::MalformedMessage("media stream descriptor has no media descriptor".into())
            })?;
            Ok(InboundMessage::Descriptor(DescriptorMessage {
                sequence_number,
                transfer: transfer_from_proto(descriptor.data_transfer_properties),
                media: media_descriptor_from_proto(media),
            }))
        }
        Some(Payload::MediaSample(sample)) => {
            let content = sample.content.map(|content| match content {
                Content::ContentBytes(bytes) => FrameContent::Bytes(Bytes::from(bytes)),
                Content::ContentReference(reference) => FrameContent::Reference {
                    address_offset: reference.address_offset,
                    length_bytes: reference.length_bytes,
                },
            });
            Ok(InboundMessage::Frame(FrameMessage {
                sequence_number,
                content,
                inferences: sample
                    .inferences
                    .into_iter()
                    .map(inference_from_proto)
                    .collect(),
            }))
        }
        None => Err(Error::MalformedMessage(format!(
            "message {} carries neither a descriptor nor a sample",
            sequence_number
        ))),
    }
}

fn transfer_from_proto(properties: Option<DataTransferProperties>) -> TransferSelector {
    match properties {
        None => TransferSelector::Embedded,
        Some(DataTransferProperties::SharedMemoryBufferTransferProperties(shm)) => {
            TransferSelector::SharedMemory {
                handle_name: shm.handle_name,
                length_bytes: shm.length_bytes,
            }
        }
        Some(DataTransferProperties::NamedTransferProperties(named)) => {
            TransferSelector::Unrecognized(named.method)
        }
    }
}

fn media_descriptor_from_proto(media: pb::MediaDescriptor) -> MediaDescriptor {
    let video = media.media_sample_format.map(|format| match format {
        MediaSampleFormat::VideoFrameSampleFormat(video) => {
            let pixel_format = pixel_format_from_proto(video.pixel_format());
            let (width, height) = video
                .dimensions
                .map(|d| (d.width, d.height))
                .unwrap_or_default();
            VideoFrameFormat::new(width, height, pixel_format)
        }
    });
    MediaDescriptor {
        timescale: media.timescale,
        video,
    }
}

fn media_descriptor_to_proto(media: &MediaDescriptor) -> pb::MediaDescriptor {
    pb::MediaDescriptor {
        timescale: media.timescale,
        media_sample_format: media.video.map(|video| {
            MediaSampleFormat::VideoFrameSampleFormat(pb::VideoFrameSampleFormat {
                pixel_format: pixel_format_to_proto(video.pixel_format) as i32,
                dimensions: Some(pb::Dimensions {
                    width: video.width,
                    height: video.height,
                }),
            })
        }),
    }
}

pub fn pixel_format_from_proto(format: pb::PixelFormat) -> PixelFormat {
    match format {
        pb::PixelFormat::Unspecified => PixelFormat::Unspecified,
        pb::PixelFormat::Bgr24 => PixelFormat::Bgr24,
        pb::PixelFormat::Rgb24 => PixelFormat::Rgb24,
        pb::PixelFormat::Bgra32 => PixelFormat::Bgra32,
        pb::PixelFormat::Rgba32 => PixelFormat::Rgba32,
        pb::PixelFormat::Gray8 => PixelFormat::Gray8,
        pb::PixelFormat::Yuv420p => PixelFormat::Yuv420p,
        pb::PixelFormat::Nv12 => PixelFormat::Nv12,
    }
}

pub fn pixel_format_to_proto(format: PixelFormat) -> pb::PixelFormat {
    match format {
        PixelFormat::Unspecified => pb::PixelFormat::Unspecified,
        PixelFormat::Bgr24 => pb::PixelFormat::Bgr24,
        PixelFormat::Rgb24 => pb::PixelFormat::Rgb24,
        PixelFormat::Bgra32 => pb::PixelFormat::Bgra32,
        PixelFormat::Rgba32 => pb::PixelFormat::Rgba32,
        PixelFormat::Gray8 => pb::PixelFormat::Gray8,
        PixelFormat::Yuv420p => pb::PixelFormat::Yuv420p,
        PixelFormat::Nv12 => pb::PixelFormat::Nv12,
    }
}

/// Convert a session message into a server message
///
/// Acknowledgment-only responses carry an empty `MediaSample`.
pub fn outbound_to_proto(
    message: OutboundMessage,
) -> mediagraph_core::Result<pb::MediaStreamMessage> {
    match message {
        OutboundMessage::Negotiated(reply) => Ok(pb::MediaStreamMessage {
            sequence_number: 0,
            ack_sequence_number: 0,
            payload: Some(Payload::MediaStreamDescriptor(pb::MediaStreamDescriptor {
                media_descriptor: Some(media_descriptor_to_proto(&reply.media)),
                data_transfer_properties: None,
            })),
        }),
        OutboundMessage::Response(response) => {
            let inferences = response
                .inferences
                .into_iter()
                .map(inference_to_proto)
                .collect::<mediagraph_core::Result<Vec<_>>>()?;
            Ok(pb::MediaStreamMessage {
                sequence_number: response.sequence_number,
                ack_sequence_number: response.ack_sequence_number,
                payload: Some(Payload::MediaSample(pb::MediaSample {
                    content: None,
                    inferences,
                })),
            })
        }
    }
}

// Inferences

fn kind_from_proto(kind: pb::InferenceType) -> InferenceKind {
    match kind {
        pb::InferenceType::Auto => InferenceKind::Auto,
        pb::InferenceType::Classification => InferenceKind::Classification,
        pb::InferenceType::Motion => InferenceKind::Motion,
        pb::InferenceType::Entity => InferenceKind::Entity,
        pb::InferenceType::Text => InferenceKind::Text,
        pb::InferenceType::Event => InferenceKind::Event,
        pb::InferenceType::Other => InferenceKind::Other,
    }
}

fn kind_to_proto(kind: InferenceKind) -> pb::InferenceType {
    match kind {
        InferenceKind::Auto => pb::InferenceType::Auto,
        InferenceKind::Classification => pb::InferenceType::Classification,
        InferenceKind::Motion => pb::InferenceType::Motion,
        InferenceKind::Entity => pb::InferenceType::Entity,
        InferenceKind::Text => pb::InferenceType::Text,
        InferenceKind::Event => pb::InferenceType::Event,
        InferenceKind::Other => pb::InferenceType::Other,
    }
}

/// Wire inference to session inference
///
/// A wire inference with no value keeps `value: None`; the session engine
/// rejects it during normalization.
pub fn inference_from_proto(inference: pb::Inference) -> Inference {
    use pb::inference::Value;

    let kind = kind_from_proto(inference.r#type());
    let value = inference.value.map(|value| match value {
        Value::Classification(c) => InferenceValue::Classification(Classification {
            tag: c.tag.map(tag_from_proto),
            attributes: c.attributes.into_iter().map(attribute_from_proto).collect(),
        }),
        Value::Motion(m) => InferenceValue::Motion(MotionDetection {
            region: m.r#box.map(rectangle_from_proto),
        }),
        Value::Entity(e) => InferenceValue::Entity(Entity {
            tag: e.tag.map(tag_from_proto),
            attributes: e.attributes.into_iter().map(attribute_from_proto).collect(),
            bounding_box: e.r#box.map(rectangle_from_proto),
            id: e.id,
        }),
        Value::Text(t) => InferenceValue::Text(Text {
            value: t.value,
            language: t.language,
            start_timestamp: t.start_timestamp,
            end_timestamp: t.end_timestamp,
        }),
        Value::Event(e) => InferenceValue::Event(Event {
            name: e.name,
            properties: e.properties,
        }),
        Value::Other(o) => InferenceValue::Other(OtherInference {
            content_type: o.content_type,
            content_bytes: Bytes::from(o.content_bytes),
        }),
    });

    Inference {
        kind,
        subtype: inference.subtype,
        inference_id: inference.inference_id,
        related_inferences: inference.related_inferences,
        value,
        extensions: inference.extensions,
    }
}

/// Session inference to wire inference
///
/// Fails on [`InferenceValue::Unknown`], which has no wire encoding.
pub fn inference_to_proto(inference: Inference) -> mediagraph_core::Result<pb::Inference> {
    use pb::inference::Value;

    let value = match inference.value {
        None => None,
        Some(InferenceValue::Classification(c)) => Some(Value::Classification(pb::Classification {
            tag: c.tag.map(tag_to_proto),
            attributes: c.attributes.into_iter().map(attribute_to_proto).collect(),
        })),
        Some(InferenceValue::Motion(m)) => Some(Value::Motion(pb::MotionDetection {
            r#box: m.region.map(rectangle_to_proto),
        })),
        Some(InferenceValue::Entity(e)) => Some(Value::Entity(pb::Entity {
            tag: e.tag.map(tag_to_proto),
            attributes: e.attributes.into_iter().map(attribute_to_proto).collect(),
            r#box: e.bounding_box.map(rectangle_to_proto),
            id: e.id,
        })),
        Some(InferenceValue::Text(t)) => Some(Value::Text(pb::Text {
            value: t.value,
            language: t.language,
            start_timestamp: t.start_timestamp,
            end_timestamp: t.end_timestamp,
        })),
        Some(InferenceValue::Event(e)) => Some(Value::Event(pb::Event {
            name: e.name,
            properties: e.properties,
        })),
        Some(InferenceValue::Other(o)) => Some(Value::Other(pb::InferenceOther {
            content_type: o.content_type,
            content_bytes: o.content_bytes.to_vec(),
        })),
        Some(InferenceValue::Unknown { discriminant }) => {
            return Err(Error::UnrecognizedInference(discriminant));
        }
    };

    Ok(pb::Inference {
        r#type: kind_to_proto(inference.kind) as i32,
        subtype: inference.subtype,
        inference_id: inference.inference_id,
        related_inferences: inference.related_inferences,
        value,
        extensions: inference.extensions,
    })
}

fn tag_from_proto(tag: pb::Tag) -> Tag {
    Tag::new(tag.value, tag.confidence)
}

fn tag_to_proto(tag: Tag) -> pb::Tag {
    pb::Tag {
        value: tag.value,
        confidence: tag.confidence,
    }
}

fn attribute_from_proto(attr: pb::Attribute) -> Attribute {
    Attribute {
        name: attr.name,
        value: attr.value,
        confidence: attr.confidence,
    }
}

fn attribute_to_proto(attr: Attribute) -> pb::Attribute {
    pb::Attribute {
        name: attr.name,
        value: attr.value,
        confidence: attr.confidence,
    }
}

fn rectangle_from_proto(rect: pb::Rectangle) -> Rectangle {
    Rectangle {
        left: rect.left,
        top: rect.top,
        width: rect.width,
        height: rect.height,
    }
}

fn rectangle_to_proto(rect: Rectangle) -> pb::Rectangle {
    pb::Rectangle {
        left: rect.left,
        top: rect.top,
        width: rect.width,
        height: rect.height,
    }
}

// Status mapping

pub fn status_code(class: StatusClass) -> Code {
    match class {
        StatusClass::InvalidArgument => Code::InvalidArgument,
        StatusClass::OutOfRange => Code::OutOfRange,
        StatusClass::Internal => Code::Internal,
        StatusClass::Cancelled => Code::Cancelled,
    }
}

/// Terminal status for a failed session
pub fn error_to_status(error: &Error) -> Status {
    let mut status = Status::new(status_code(error.status_class()), error.to_string());
    status
        .metadata_mut()
        .insert(REASON_METADATA_KEY, MetadataValue::from_static(error.reason()));
    status
}

/// Inbound stream failure surfaced by tonic
///
/// A `Cancelled` status means the host reset the call and maps to
/// [`Error::Cancelled`]; anything else is a transport fault.
pub fn status_to_error(status: Status) -> Error {
    match status.code() {
        Code::Cancelled => Error::Cancelled(status.message().to_string()),
        code => Error::Transport(format!("{}: {}", code, status.message())),
    }
}

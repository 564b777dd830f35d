//! Wire-level types: the Signal message-type tag (§4.2), the plaintext
//! payload carried inside a decrypted message (§6), and the gateway frame
//! envelope (§4.4/§6).
//!
//! The spec describes these at the semantic level and leaves concrete byte
//! encoding to the implementer (§10). This implementation carries them over
//! `serde_json` rather than raw protobuf bytes, consistent with how the rest
//! of this corpus moves typed payloads across a websocket.

use crate::ids::{AttachmentId, MessageId, UserId};
use serde::{Deserialize, Serialize};

/// Serde module for serializing `Vec<u8>` as base64 strings in JSON.
pub mod base64_serde {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Vec<u8>, s: S) -> Result<S::Ok, S::Error> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        s.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(&s)
            .map_err(serde::de::Error::custom)
    }
}

/// The 2-valued Signal message-type tag carried on the wire (§4.2).
///
/// Maps bidirectionally onto `libsignal_protocol::CiphertextMessageType`,
/// whose own numeric codes (`PreKey = 3`, `Whisper = 1`) differ from the
/// wire values this application uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageTypeTag {
    PreKey = 1,
    Encrypted = 2,
}

impl MessageTypeTag {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::PreKey),
            2 => Some(Self::Encrypted),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }
}

/// A Signal-encrypted message body as it rides over HTTP or the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedMessage {
    #[serde(rename = "type")]
    pub message_type: MessageTypeTag,
    #[serde(with = "base64_serde")]
    pub content: Vec<u8>,
}

/// The plaintext payload carried inside a decrypted message (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    Text {
        text: String,
        timestamp: i64,
    },
    Image {
        #[serde(with = "base64_serde")]
        image_data: Vec<u8>,
        mime_type: String,
        display_duration: Option<u32>,
        timestamp: i64,
    },
    FriendRequest {
        username: String,
    },
    FriendResponse {
        username: String,
        accepted: bool,
    },
    SessionReset {
        timestamp: i64,
    },
    DeviceAnnounce {
        devices: Vec<AnnouncedDevice>,
    },
    SyncBlob {
        #[serde(with = "base64_serde")]
        blob: Vec<u8>,
    },
    ModelSync {
        model: String,
        #[serde(with = "base64_serde")]
        record: Vec<u8>,
    },
    SentSync {
        #[serde(with = "base64_serde")]
        original_content: Vec<u8>,
        original_type: MessageTypeTag,
        recipient: UserId,
        attachment_id: Option<AttachmentId>,
    },
}

/// One device entry inside a `DEVICE_ANNOUNCE` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnouncedDevice {
    pub user_id: UserId,
    pub device_sub_id: u32,
    #[serde(with = "base64_serde")]
    pub identity_key: Vec<u8>,
}

/// A frame on the gateway's bidirectional duplex channel (§4.4, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "frame")]
pub enum GatewayFrame {
    /// Server → client: a message delivery.
    Envelope {
        id: MessageId,
        source_user_id: UserId,
        source_device_sub_id: u32,
        message: EncryptedMessage,
    },
    /// Client → server: acknowledge successful processing of an envelope.
    Ack { message_id: MessageId },
    /// Server → client, periodic: connection keepalive.
    Ping { ts: i64 },
    Pong { ts: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_tag_round_trips_through_wire_values() {
        assert_eq!(MessageTypeTag::from_wire(1), Some(MessageTypeTag::PreKey));
        assert_eq!(
            MessageTypeTag::from_wire(2),
            Some(MessageTypeTag::Encrypted)
        );
        assert_eq!(MessageTypeTag::from_wire(99), None);
        assert_eq!(MessageTypeTag::PreKey.to_wire(), 1);
        assert_eq!(MessageTypeTag::Encrypted.to_wire(), 2);
    }

    #[test]
    fn encrypted_message_content_serializes_as_base64() {
        let msg = EncryptedMessage {
            message_type: MessageTypeTag::PreKey,
            content: b"ciphertext".to_vec(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":1"#));
        let back: EncryptedMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.content, b"ciphertext");
    }

    #[test]
    fn client_message_text_round_trips() {
        let msg = ClientMessage::Text {
            text: "hello".into(),
            timestamp: 1234,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"Text""#));
        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        match back {
            ClientMessage::Text { text, timestamp } => {
                assert_eq!(text, "hello");
                assert_eq!(timestamp, 1234);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn client_message_device_announce_round_trips() {
        let msg = ClientMessage::DeviceAnnounce {
            devices: vec![AnnouncedDevice {
                user_id: UserId::new(),
                device_sub_id: 1,
                identity_key: vec![5, 1, 2, 3],
            }],
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        match back {
            ClientMessage::DeviceAnnounce { devices } => assert_eq!(devices.len(), 1),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn gateway_frame_envelope_round_trips() {
        let frame = GatewayFrame::Envelope {
            id: MessageId::new(),
            source_user_id: UserId::new(),
            source_device_sub_id: 1,
            message: EncryptedMessage {
                message_type: MessageTypeTag::Encrypted,
                content: b"body".to_vec(),
            },
        };
        let json = serde_json::to_string(&frame).unwrap();
        let back: GatewayFrame = serde_json::from_str(&json).unwrap();
        match back {
            GatewayFrame::Envelope { message, .. } => {
                assert_eq!(message.content, b"body");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn gateway_frame_ack_round_trips() {
        let id = MessageId::new();
        let frame = GatewayFrame::Ack { message_id: id };
        let json = serde_json::to_string(&frame).unwrap();
        let back: GatewayFrame = serde_json::from_str(&json).unwrap();
        match back {
            GatewayFrame::Ack { message_id } => assert_eq!(message_id, id),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_client_message_type_fails_deserialization() {
        let json = r#"{"type": "UnknownThing"}"#;
        assert!(serde_json::from_str::<ClientMessage>(json).is_err());
    }
}

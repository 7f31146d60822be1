//! Gossip message types and the typed decode step.
//!
//! The transport hands the gossip layer an [`Envelope`]: a type code plus an opaque
//! payload. [`GossipMessage::decode`] turns a gossip-band envelope into a typed message
//! and only checks shape; cryptographic validity is checked later by the engine.

use crate::announcement::AddressAnnouncement;
use crate::error::{GossipError, GossipResult};
use crate::protocol::{NodeId, TypeCode};
use serde::{Deserialize, Serialize};

/// A message as delivered by the transport: a type code and a raw JSON payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Sub-protocol discriminator.
    pub type_code: TypeCode,
    /// Encoded payload; empty for marker messages.
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Creates an envelope from a code and payload bytes.
    #[must_use]
    pub fn new(type_code: impl Into<TypeCode>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            type_code: type_code.into(),
            payload: payload.into(),
        }
    }

    /// Creates a payload-less envelope.
    #[must_use]
    pub fn marker(type_code: impl Into<TypeCode>) -> Self {
        Self::new(type_code, Vec::new())
    }

    /// Creates the failure signal envelope.
    #[must_use]
    pub fn failure() -> Self {
        Self::marker(TypeCode::FAILURE)
    }
}

/// Kind discriminator for objects in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataKind(pub u16);

impl DataKind {
    /// A signed [`AddressAnnouncement`].
    pub const ADDRESS_ANNOUNCEMENT: Self = Self(1);
}

/// A typed data object inside a batch send.
///
/// Only [`DataKind::ADDRESS_ANNOUNCEMENT`] is interpreted by this layer; other kinds are
/// carried as raw JSON and skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataObject {
    /// What the data holds.
    pub kind: DataKind,
    /// Kind-specific content.
    pub data: serde_json::Value,
}

impl DataObject {
    /// Wraps an announcement.
    ///
    /// # Errors
    ///
    /// Returns an error if the announcement cannot be serialized.
    pub fn from_announcement(announcement: &AddressAnnouncement) -> GossipResult<Self> {
        Ok(Self {
            kind: DataKind::ADDRESS_ANNOUNCEMENT,
            data: serde_json::to_value(announcement)?,
        })
    }

    /// Interprets the object as an announcement.
    ///
    /// Returns `None` for other kinds, `Some(Err(_))` if the kind matches but the data
    /// is malformed.
    #[must_use]
    pub fn as_announcement(&self) -> Option<GossipResult<AddressAnnouncement>> {
        if self.kind != DataKind::ADDRESS_ANNOUNCEMENT {
            return None;
        }
        Some(
            serde_json::from_value::<AddressAnnouncement>(self.data.clone())
                .map_err(|e| GossipError::Decode(format!("batch announcement: {e}")))
                .and_then(|a| a.validate_shape().map(|()| a)),
        )
    }
}

/// One line of an inventory digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    /// Announcing node.
    #[serde(rename = "pubkey")]
    pub node_id: NodeId,
    /// Timestamp of the announcement the sender holds.
    pub timestamp: i64,
}

/// Compact summary of the announcements a node holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryDigest {
    /// Known entries.
    pub entries: Vec<InventoryEntry>,
}

impl InventoryDigest {
    /// Creates a digest from entries.
    #[must_use]
    pub fn new(entries: Vec<InventoryEntry>) -> Self {
        Self { entries }
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the digest lists nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Typed gossip-band messages.
#[derive(Debug, Clone, PartialEq)]
pub enum GossipMessage {
    /// A single address announcement to be flooded.
    Announce(AddressAnnouncement),
    /// Request for every address the peer knows.
    GetAddr,
    /// Inventory digest; the receiver replies with what the sender lacks.
    Inventory(InventoryDigest),
    /// Batch of typed objects, absorbed locally without re-broadcast.
    Batch(Vec<DataObject>),
    /// A code inside the gossip band that this node does not implement.
    Unsupported(TypeCode),
}

impl GossipMessage {
    /// Returns the wire type code for this message.
    #[must_use]
    pub const fn type_code(&self) -> TypeCode {
        match self {
            Self::Announce(_) => TypeCode::GOSSIP_SEND_IP_OBJECT,
            Self::GetAddr => TypeCode::GOSSIP_GET_ADDR,
            Self::Inventory(_) => TypeCode::GOSSIP_INV,
            Self::Batch(_) => TypeCode::GOSSIP_SEND,
            Self::Unsupported(code) => *code,
        }
    }

    /// Decodes a gossip-band envelope into a typed message.
    ///
    /// # Errors
    ///
    /// Returns [`GossipError::Decode`] if the code is outside the gossip band or the
    /// payload does not have the expected shape.
    pub fn decode(envelope: &Envelope) -> GossipResult<Self> {
        let code = envelope.type_code;
        if !code.is_gossip() {
            return Err(GossipError::Decode(format!("type code {code} is not gossip")));
        }

        let decode_err = |e: serde_json::Error| GossipError::Decode(format!("code {code}: {e}"));

        match code {
            TypeCode::GOSSIP_SEND_IP_OBJECT => {
                let announcement: AddressAnnouncement =
                    serde_json::from_slice(&envelope.payload).map_err(decode_err)?;
                announcement.validate_shape()?;
                Ok(Self::Announce(announcement))
            }
            TypeCode::GOSSIP_GET_ADDR => Ok(Self::GetAddr),
            TypeCode::GOSSIP_INV => serde_json::from_slice(&envelope.payload)
                .map(Self::Inventory)
                .map_err(decode_err),
            TypeCode::GOSSIP_SEND => serde_json::from_slice(&envelope.payload)
                .map(Self::Batch)
                .map_err(decode_err),
            other => Ok(Self::Unsupported(other)),
        }
    }

    /// Encodes the message into a transport envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> GossipResult<Envelope> {
        let payload = match self {
            Self::Announce(announcement) => serde_json::to_vec(announcement)?,
            Self::GetAddr | Self::Unsupported(_) => Vec::new(),
            Self::Inventory(digest) => serde_json::to_vec(digest)?,
            Self::Batch(objects) => serde_json::to_vec(objects)?,
        };
        Ok(Envelope::new(self.type_code(), payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    fn signed_announcement() -> AddressAnnouncement {
        AddressAnnouncement::signed(&SigningKey::generate(&mut OsRng), "10.0.0.1", 9000)
    }

    #[test]
    fn announce_encodes_with_announce_code() {
        let announcement = signed_announcement();
        let envelope = GossipMessage::Announce(announcement.clone()).encode().unwrap();

        assert_eq!(envelope.type_code, TypeCode::GOSSIP_SEND_IP_OBJECT);
        assert_eq!(
            GossipMessage::decode(&envelope).unwrap(),
            GossipMessage::Announce(announcement)
        );
    }

    #[test]
    fn get_addr_is_an_empty_marker() {
        let envelope = GossipMessage::GetAddr.encode().unwrap();
        assert!(envelope.payload.is_empty());

        // Marker payloads are ignored even if a peer sends junk.
        let noisy = Envelope::new(TypeCode::GOSSIP_GET_ADDR, b"null".to_vec());
        assert_eq!(GossipMessage::decode(&noisy).unwrap(), GossipMessage::GetAddr);
    }

    #[test]
    fn malformed_announce_payload_is_decode_error() {
        let envelope = Envelope::new(TypeCode::GOSSIP_SEND_IP_OBJECT, b"{\"ip\":".to_vec());
        assert!(matches!(
            GossipMessage::decode(&envelope),
            Err(GossipError::Decode(_))
        ));
    }

    #[test]
    fn announce_with_bad_ip_is_decode_error() {
        let mut value = serde_json::to_value(signed_announcement()).unwrap();
        value["ip"] = serde_json::json!("localhost");
        let envelope = Envelope::new(
            TypeCode::GOSSIP_SEND_IP_OBJECT,
            serde_json::to_vec(&value).unwrap(),
        );

        assert!(matches!(
            GossipMessage::decode(&envelope),
            Err(GossipError::Decode(_))
        ));
    }

    #[test]
    fn non_gossip_code_is_rejected_by_decoder() {
        let envelope = Envelope::new(7u16, b"{}".to_vec());
        assert!(GossipMessage::decode(&envelope).is_err());
    }

    #[test]
    fn unknown_code_inside_band_decodes_as_unsupported() {
        let envelope = Envelope::marker(1250u16);
        assert_eq!(
            GossipMessage::decode(&envelope).unwrap(),
            GossipMessage::Unsupported(TypeCode(1250))
        );
    }

    #[test]
    fn batch_keeps_unknown_kinds_opaque() {
        let announcement = signed_announcement();
        let objects = vec![
            DataObject::from_announcement(&announcement).unwrap(),
            DataObject {
                kind: DataKind(42),
                data: serde_json::json!({"channel": "abc"}),
            },
        ];
        let envelope = GossipMessage::Batch(objects).encode().unwrap();

        let GossipMessage::Batch(decoded) = GossipMessage::decode(&envelope).unwrap() else {
            panic!("expected batch");
        };
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].as_announcement().unwrap().unwrap(), announcement);
        assert!(decoded[1].as_announcement().is_none());
    }

    #[test]
    fn batch_object_with_wrong_shape_is_decode_error() {
        let object = DataObject {
            kind: DataKind::ADDRESS_ANNOUNCEMENT,
            data: serde_json::json!({"ip": 5}),
        };
        assert!(matches!(
            object.as_announcement(),
            Some(Err(GossipError::Decode(_)))
        ));
    }

    #[test]
    fn inventory_digest_roundtrip() {
        let digest = InventoryDigest::new(vec![InventoryEntry {
            node_id: NodeId::from_bytes([9; 32]),
            timestamp: 1_700_000_000,
        }]);
        let envelope = GossipMessage::Inventory(digest.clone()).encode().unwrap();

        assert_eq!(envelope.type_code, TypeCode::GOSSIP_INV);
        assert_eq!(
            GossipMessage::decode(&envelope).unwrap(),
            GossipMessage::Inventory(digest)
        );
    }
}

//! Wire protocol definitions for gossip communication.
//!
//! This module defines the core identifiers used on the wire:
//! - [`NodeId`]: Identity of an overlay node, the raw Ed25519 public key
//! - [`TypeCode`]: Numeric discriminator that selects the sub-protocol of a message

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;

/// Unique identifier for a node in the overlay.
///
/// The bytes are the node's 32-byte Ed25519 public key. The same key signs the node's
/// address announcements, so a `NodeId` is both the dedup key for announcements and the
/// key that verifies them. Displayed as base58.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    bytes: [u8; 32],
}

impl NodeId {
    /// Creates a `NodeId` from an Ed25519 public key.
    #[must_use]
    pub fn from_public_key(key: &VerifyingKey) -> Self {
        Self {
            bytes: key.to_bytes(),
        }
    }

    /// Creates a `NodeId` from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Returns the raw bytes of the node ID.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Converts back into an Ed25519 verifying key.
    ///
    /// Returns `None` if the bytes are not a valid curve point.
    #[must_use]
    pub fn to_verifying_key(&self) -> Option<VerifyingKey> {
        VerifyingKey::from_bytes(&self.bytes).ok()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(&self.bytes).into_string())
    }
}

impl From<&VerifyingKey> for NodeId {
    fn from(key: &VerifyingKey) -> Self {
        Self::from_public_key(key)
    }
}

/// Numeric type code carried by every message on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeCode(pub u16);

impl TypeCode {
    /// Failure / negative acknowledgement signal.
    pub const FAILURE: Self = Self(0);
    /// A single signed address announcement.
    pub const GOSSIP_SEND_IP_OBJECT: Self = Self(1201);
    /// Request for the peer's known addresses (empty payload).
    pub const GOSSIP_GET_ADDR: Self = Self(1202);
    /// Inventory digest of known announcements.
    pub const GOSSIP_INV: Self = Self(1203);
    /// Batch of typed data objects.
    pub const GOSSIP_SEND: Self = Self(1204);

    /// Codes reserved for the gossip sub-protocol.
    pub const GOSSIP_RANGE: RangeInclusive<u16> = 1200..=1299;

    /// Returns the raw code.
    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }

    /// Returns true if the code belongs to the gossip band.
    #[must_use]
    pub const fn is_gossip(self) -> bool {
        self.0 >= *Self::GOSSIP_RANGE.start() && self.0 <= *Self::GOSSIP_RANGE.end()
    }

    /// Returns true for the failure signal.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        self.0 == Self::FAILURE.0
    }

    /// Classifies the code for routing.
    #[must_use]
    pub const fn class(self) -> MessageClass {
        if self.is_gossip() {
            MessageClass::Gossip
        } else if self.is_failure() {
            MessageClass::Failure
        } else {
            MessageClass::PassThrough
        }
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for TypeCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

/// Routing class of a type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    /// Handled by the gossip engine.
    Gossip,
    /// Failure signal from the peer; observed only.
    Failure,
    /// Belongs to another protocol layer.
    PassThrough,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;
    use test_case::test_case;

    #[test]
    fn node_id_from_public_key_is_deterministic() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();

        assert_eq!(
            NodeId::from_public_key(&verifying_key),
            NodeId::from_public_key(&verifying_key)
        );
    }

    #[test]
    fn node_id_roundtrips_to_verifying_key() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let node_id = NodeId::from_public_key(&signing_key.verifying_key());

        assert_eq!(node_id.to_verifying_key(), Some(signing_key.verifying_key()));
    }

    #[test]
    fn node_id_display_is_base58() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let displayed = NodeId::from_public_key(&signing_key.verifying_key()).to_string();

        // Base58 alphabet doesn't contain 0, O, I, l
        assert!(!displayed.is_empty());
        assert!(!displayed.contains('0'));
        assert!(!displayed.contains('O'));
        assert!(!displayed.contains('I'));
        assert!(!displayed.contains('l'));
    }

    #[test_case(0, MessageClass::Failure ; "failure signal")]
    #[test_case(1200, MessageClass::Gossip ; "band start")]
    #[test_case(1201, MessageClass::Gossip ; "announce")]
    #[test_case(1204, MessageClass::Gossip ; "batch send")]
    #[test_case(1299, MessageClass::Gossip ; "band end")]
    #[test_case(1199, MessageClass::PassThrough ; "just below band")]
    #[test_case(1300, MessageClass::PassThrough ; "just above band")]
    #[test_case(1, MessageClass::PassThrough ; "other layer")]
    fn type_code_classification(code: u16, expected: MessageClass) {
        assert_eq!(TypeCode(code).class(), expected);
    }

    #[test]
    fn named_codes_are_in_gossip_band() {
        for code in [
            TypeCode::GOSSIP_SEND_IP_OBJECT,
            TypeCode::GOSSIP_GET_ADDR,
            TypeCode::GOSSIP_INV,
            TypeCode::GOSSIP_SEND,
        ] {
            assert!(code.is_gossip(), "{code} should be a gossip code");
        }
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn node_id_from_bytes_roundtrip(bytes in prop::array::uniform32(any::<u8>())) {
                let node_id = NodeId::from_bytes(bytes);
                prop_assert_eq!(*node_id.as_bytes(), bytes);
            }

            #[test]
            fn every_code_has_exactly_one_class(code in any::<u16>()) {
                let code = TypeCode(code);
                let gossip = code.is_gossip();
                let failure = code.is_failure();
                prop_assert!(!(gossip && failure));
                prop_assert_eq!(code.class() == MessageClass::PassThrough, !gossip && !failure);
            }
        }
    }
}

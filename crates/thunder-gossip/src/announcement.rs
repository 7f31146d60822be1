//! Signed address announcements.
//!
//! An [`AddressAnnouncement`] is a node's claim that its public key is reachable at
//! `ip:port`. The signature covers every other field, so any modification in transit
//! makes [`AddressAnnouncement::verify`] fail.

use crate::error::{GossipError, GossipResult};
use crate::protocol::NodeId;
use chrono::Utc;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// A signed claim that a public key is reachable at an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressAnnouncement {
    #[serde(rename = "pubkey")]
    node_id: NodeId,
    #[serde(rename = "ip")]
    address: String,
    port: u16,
    timestamp: i64,
    #[serde(with = "signature_serde", default)]
    signature: Option<Signature>,
}

/// Custom serde for `Option<Signature>`, carried as raw bytes.
mod signature_serde {
    use ed25519_dalek::Signature;
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S>(sig: &Option<Signature>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match sig {
            Some(s) => serializer.serialize_some(&s.to_bytes().to_vec()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Signature>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<Vec<u8>> = Option::deserialize(deserializer)?;
        match opt {
            Some(bytes) => {
                let arr: [u8; 64] = bytes
                    .try_into()
                    .map_err(|_| serde::de::Error::custom("invalid signature length"))?;
                Ok(Some(Signature::from_bytes(&arr)))
            }
            None => Ok(None),
        }
    }
}

/// Acceptance window for announcement timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessWindow {
    /// Announcements older than this are stale. `None` accepts any age.
    pub max_age: Option<Duration>,
    /// How far in the future a timestamp may lie.
    pub max_clock_skew: Duration,
}

impl Default for FreshnessWindow {
    fn default() -> Self {
        Self {
            max_age: Some(Duration::from_secs(7 * 24 * 60 * 60)),
            max_clock_skew: Duration::from_secs(600),
        }
    }
}

impl FreshnessWindow {
    /// A window that accepts every past timestamp.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            max_age: None,
            max_clock_skew: Duration::from_secs(600),
        }
    }

    /// Returns true if `timestamp` is acceptable at time `now` (both in seconds).
    #[must_use]
    pub fn accepts(&self, timestamp: i64, now: i64) -> bool {
        let skew = i64::try_from(self.max_clock_skew.as_secs()).unwrap_or(i64::MAX);
        if timestamp > now.saturating_add(skew) {
            return false;
        }
        match self.max_age {
            Some(max_age) => {
                let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
                now.saturating_sub(timestamp) <= max_age
            }
            None => true,
        }
    }
}

impl AddressAnnouncement {
    /// Creates a new unsigned announcement stamped with the current time.
    #[must_use]
    pub fn new(node_id: NodeId, address: impl Into<String>, port: u16) -> Self {
        Self::with_timestamp(node_id, address, port, Utc::now().timestamp())
    }

    /// Creates a new unsigned announcement with an explicit timestamp.
    #[must_use]
    pub fn with_timestamp(
        node_id: NodeId,
        address: impl Into<String>,
        port: u16,
        timestamp: i64,
    ) -> Self {
        Self {
            node_id,
            address: address.into(),
            port,
            timestamp,
            signature: None,
        }
    }

    /// Creates and signs an announcement for the holder of `signing_key`.
    #[must_use]
    pub fn signed(signing_key: &SigningKey, address: impl Into<String>, port: u16) -> Self {
        let mut announcement =
            Self::new(NodeId::from_public_key(&signing_key.verifying_key()), address, port);
        announcement.sign(signing_key);
        announcement
    }

    /// Returns the announcing node.
    #[must_use]
    pub const fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Returns the claimed IP address as given on the wire.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the claimed port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the creation time in seconds since epoch.
    #[must_use]
    pub const fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Returns the signature, if signed.
    #[must_use]
    pub const fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    /// Returns the claimed endpoint, if the address parses.
    #[must_use]
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.address
            .parse::<IpAddr>()
            .ok()
            .map(|ip| SocketAddr::new(ip, self.port))
    }

    /// Checks the structural shape of the announcement.
    ///
    /// This is independent of the signature: a well-formed announcement may still
    /// fail [`verify`](Self::verify).
    ///
    /// # Errors
    ///
    /// Returns [`GossipError::Decode`] if the address is not an IP or the port is zero.
    pub fn validate_shape(&self) -> GossipResult<()> {
        if self.address.parse::<IpAddr>().is_err() {
            return Err(GossipError::Decode(format!(
                "invalid ip address {:?}",
                self.address
            )));
        }
        if self.port == 0 {
            return Err(GossipError::Decode("port must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Signs this announcement with the given signing key.
    pub fn sign(&mut self, signing_key: &SigningKey) {
        let message = self.signing_message();
        self.signature = Some(signing_key.sign(&message));
    }

    /// Verifies the signature against the announcing node's own key.
    ///
    /// # Errors
    ///
    /// Returns [`GossipError::InvalidSignature`] if the signature is missing, the key is
    /// not a valid point, or verification fails.
    pub fn verify(&self) -> GossipResult<()> {
        let invalid = |reason: String| GossipError::InvalidSignature {
            node_id: self.node_id,
            reason,
        };

        let signature = self
            .signature
            .ok_or_else(|| invalid("missing signature".to_string()))?;
        let verifying_key = self
            .node_id
            .to_verifying_key()
            .ok_or_else(|| invalid("public key is not a valid ed25519 point".to_string()))?;

        verifying_key
            .verify(&self.signing_message(), &signature)
            .map_err(|e| invalid(e.to_string()))
    }

    /// Runs the full acceptance check: signature, then freshness at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`GossipError::InvalidSignature`] or [`GossipError::Stale`].
    pub fn validate_at(&self, window: &FreshnessWindow, now: i64) -> GossipResult<()> {
        self.verify()?;
        if !window.accepts(self.timestamp, now) {
            return Err(GossipError::Stale {
                node_id: self.node_id,
                timestamp: self.timestamp,
            });
        }
        Ok(())
    }

    /// Runs the full acceptance check against the current wall clock.
    ///
    /// # Errors
    ///
    /// Returns [`GossipError::InvalidSignature`] or [`GossipError::Stale`].
    pub fn validate(&self, window: &FreshnessWindow) -> GossipResult<()> {
        self.validate_at(window, Utc::now().timestamp())
    }

    /// Constructs the signed byte string: key, length-prefixed address, port, timestamp.
    fn signing_message(&self) -> Vec<u8> {
        let mut msg = Vec::with_capacity(32 + 4 + self.address.len() + 2 + 8);
        msg.extend_from_slice(self.node_id.as_bytes());
        msg.extend_from_slice(&(self.address.len() as u32).to_le_bytes());
        msg.extend_from_slice(self.address.as_bytes());
        msg.extend_from_slice(&self.port.to_le_bytes());
        msg.extend_from_slice(&self.timestamp.to_le_bytes());
        msg
    }
}

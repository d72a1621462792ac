use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Length of a challenge value in bytes.
pub const CHALLENGE_LEN: usize = 32;

// ---------------------------------------------------------------------------
// Timestamp: canonical time representation (seconds + nanoseconds)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds_since_epoch: u64,
    pub nanoseconds: u32,
}

impl Timestamp {
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self {
            seconds_since_epoch: now.timestamp() as u64,
            nanoseconds: now.timestamp_subsec_nanos(),
        }
    }

    pub fn from_seconds(seconds: u64) -> Self {
        Self {
            seconds_since_epoch: seconds,
            nanoseconds: 0,
        }
    }

    pub fn to_rfc3339(&self) -> String {
        let dt =
            chrono::DateTime::from_timestamp(self.seconds_since_epoch as i64, self.nanoseconds);
        dt.map(|d| d.to_rfc3339())
            .unwrap_or_else(|| "invalid".to_string())
    }
}

// ---------------------------------------------------------------------------
// PublicKey: Ed25519 verifying key bytes
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "hex_bytes")] pub [u8; 32]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Base58 fingerprint used in logs.
    pub fn fingerprint(&self) -> String {
        crate::crypto::key_fingerprint(self)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.0[..8]))
    }
}

// ---------------------------------------------------------------------------
// SignatureBytes: raw Ed25519 signature
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureBytes(#[serde(with = "hex_bytes")] pub [u8; 64]);

impl fmt::Debug for SignatureBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureBytes({}..)", hex::encode(&self.0[..8]))
    }
}

// ---------------------------------------------------------------------------
// PayloadDigest: SHA-256 of a canonical payload
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadDigest(#[serde(with = "hex_bytes")] pub [u8; 32]);

impl PayloadDigest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for PayloadDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PayloadDigest({})", hex::encode(self.0))
    }
}

// ---------------------------------------------------------------------------
// Challenge: single-use 32-byte random value
// ---------------------------------------------------------------------------

/// Random value sent once per attestation attempt. Never persisted.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Challenge(#[serde(with = "hex_bytes")] pub [u8; CHALLENGE_LEN]);

impl Challenge {
    /// Draw a fresh challenge from the operating system's CSPRNG.
    pub fn generate() -> CoreResult<Self> {
        let mut bytes = [0u8; CHALLENGE_LEN];
        rand::rngs::OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| CoreError::EntropyUnavailable(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// SHA-256(self || other). Binds randomness contributed by both peers.
    pub fn hash_concat(&self, other: &Challenge) -> Challenge {
        let mut buf = [0u8; CHALLENGE_LEN * 2];
        buf[..CHALLENGE_LEN].copy_from_slice(&self.0);
        buf[CHALLENGE_LEN..].copy_from_slice(&other.0);
        Challenge(crate::crypto::sha256_digest(&buf).0)
    }

    /// Constant-time comparison.
    pub fn ct_matches(&self, other: &Challenge) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl fmt::Debug for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Challenge({})", hex::encode(&self.0[..8]))
    }
}

// ---------------------------------------------------------------------------
// ExternalId: caller-side identifier a fresh key is bound to
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalId(pub Uuid);

impl ExternalId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl From<Uuid> for ExternalId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Party / Participant
// ---------------------------------------------------------------------------

/// A well-known network participant: a name plus its legal identity key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Party {
    pub name: String,
    pub owning_key: PublicKey,
}

impl Party {
    pub fn new(name: impl Into<String>, owning_key: PublicKey) -> Self {
        Self {
            name: name.into(),
            owning_key,
        }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A participant as it appears in a ledger state: either a well-known party
/// or a bare (confidential) key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Participant {
    WellKnown(Party),
    Anonymous(PublicKey),
}

impl Participant {
    pub fn owning_key(&self) -> PublicKey {
        match self {
            Participant::WellKnown(party) => party.owning_key,
            Participant::Anonymous(key) => *key,
        }
    }
}

/// A confidential key together with the well-known party that controls it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyMapping {
    pub key: PublicKey,
    pub party: Party,
}

/// Outcome of a successful mapping registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Registration {
    /// A new mapping was stored.
    Created,
    /// The key was already mapped to the same party.
    Unchanged,
}

// ---------------------------------------------------------------------------
// Byte-array serialization: hex for human-readable formats, raw otherwise
// ---------------------------------------------------------------------------

mod hex_bytes {
    use serde::de::{self, SeqAccess, Visitor};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(bytes))
        } else {
            serializer.serialize_bytes(bytes)
        }
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            let bytes = hex::decode(&s).map_err(de::Error::custom)?;
            bytes
                .try_into()
                .map_err(|_| de::Error::custom(format!("expected {} bytes", N)))
        } else {
            deserializer.deserialize_bytes(FixedBytes::<N>)
        }
    }

    struct FixedBytes<const N: usize>;

    impl<'de, const N: usize> Visitor<'de> for FixedBytes<N> {
        type Value = [u8; N];

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{} bytes", N)
        }

        fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
            <[u8; N]>::try_from(v).map_err(|_| E::invalid_length(v.len(), &self))
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut out = [0u8; N];
            for (i, slot) in out.iter_mut().enumerate() {
                *slot = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(i, &self))?;
            }
            Ok(out)
        }
    }
}

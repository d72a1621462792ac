//! Ownership claims and their canonical encoding.
//!
//! The signature in a [`SignedOwnershipClaim`] covers SHA-256 of the claim's
//! canonical bytes, so the encoding must be byte-for-byte reproducible:
//! a version byte followed by the postcard encoding of [`OwnershipClaim`].
//! Decoding rejects anything that does not re-encode to the same bytes.

use keylink_core::{sha256_digest, Challenge, PayloadDigest, PublicKey, SignatureBytes};
use serde::{Deserialize, Serialize};

use crate::error::{FlowError, FlowResult};

pub const CLAIM_ENCODING_VERSION: u8 = 1;

/// "The signer owns `key`", decorated with a nonce so repeated claims over
/// the same key are never bit-identical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipClaim {
    pub nonce: Challenge,
    pub key: PublicKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalBytes(pub Vec<u8>);

impl CanonicalBytes {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

pub fn encode(claim: &OwnershipClaim) -> FlowResult<CanonicalBytes> {
    let body = postcard::to_allocvec(claim).map_err(|e| FlowError::Encoding(e.to_string()))?;
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(CLAIM_ENCODING_VERSION);
    out.extend_from_slice(&body);
    Ok(CanonicalBytes(out))
}

pub fn decode(bytes: &CanonicalBytes) -> FlowResult<OwnershipClaim> {
    let (version, body) = bytes
        .0
        .split_first()
        .ok_or_else(|| FlowError::Encoding("empty claim encoding".into()))?;
    if *version != CLAIM_ENCODING_VERSION {
        return Err(FlowError::Encoding(format!(
            "unsupported claim encoding version {}",
            version
        )));
    }
    let (claim, rest) = postcard::take_from_bytes::<OwnershipClaim>(body)
        .map_err(|e| FlowError::Encoding(e.to_string()))?;
    if !rest.is_empty() {
        return Err(FlowError::Encoding(format!(
            "{} trailing bytes after claim",
            rest.len()
        )));
    }
    if encode(&claim)? != *bytes {
        return Err(FlowError::Encoding("non-canonical claim encoding".into()));
    }
    Ok(claim)
}

pub fn digest(bytes: &CanonicalBytes) -> PayloadDigest {
    sha256_digest(bytes.as_slice())
}

/// A claim self-signed by the key it is about.
///
/// `additional_challenge` carries the responder's own randomness when the
/// double challenge-response scheme is in use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedOwnershipClaim {
    pub raw: CanonicalBytes,
    pub signature: SignatureBytes,
    pub signer_key: PublicKey,
    pub additional_challenge: Option<Challenge>,
}

impl SignedOwnershipClaim {
    pub fn claim(&self) -> FlowResult<OwnershipClaim> {
        decode(&self.raw)
    }

    pub fn digest(&self) -> PayloadDigest {
        digest(&self.raw)
    }
}

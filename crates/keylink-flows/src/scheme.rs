//! Challenge schemes: how the responder derives the claim nonce from the
//! requester's challenge, and how the requester checks it.
//!
//! - [`SingleChallenge`]: the nonce echoes the challenge.
//! - [`DoubleChallenge`]: the responder adds its own random value `c2` and
//!   the nonce is `SHA-256(c1 || c2)`, binding randomness from both peers.
//!   `c2` travels alongside the signed claim.

use keylink_core::Challenge;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{FlowError, FlowResult};

/// Nonce to embed in a claim plus any extra value the requester needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceBinding {
    pub nonce: Challenge,
    pub additional: Option<Challenge>,
}

pub trait ChallengeScheme: Send + Sync {
    fn kind(&self) -> SchemeKind;

    /// Responder side: derive the nonce for `challenge`.
    fn bind(&self, challenge: &Challenge) -> FlowResult<NonceBinding>;

    /// Requester side: accept only a nonce derived from our own `challenge`.
    fn check(
        &self,
        challenge: &Challenge,
        nonce: &Challenge,
        additional: Option<&Challenge>,
    ) -> FlowResult<()>;
}

pub struct SingleChallenge;

impl ChallengeScheme for SingleChallenge {
    fn kind(&self) -> SchemeKind {
        SchemeKind::Single
    }

    fn bind(&self, challenge: &Challenge) -> FlowResult<NonceBinding> {
        Ok(NonceBinding {
            nonce: *challenge,
            additional: None,
        })
    }

    fn check(
        &self,
        challenge: &Challenge,
        nonce: &Challenge,
        _additional: Option<&Challenge>,
    ) -> FlowResult<()> {
        if nonce.ct_matches(challenge) {
            Ok(())
        } else {
            Err(FlowError::ChallengeMismatch)
        }
    }
}

pub struct DoubleChallenge;

impl ChallengeScheme for DoubleChallenge {
    fn kind(&self) -> SchemeKind {
        SchemeKind::Double
    }

    fn bind(&self, challenge: &Challenge) -> FlowResult<NonceBinding> {
        let additional = Challenge::generate()?;
        Ok(NonceBinding {
            nonce: challenge.hash_concat(&additional),
            additional: Some(additional),
        })
    }

    fn check(
        &self,
        challenge: &Challenge,
        nonce: &Challenge,
        additional: Option<&Challenge>,
    ) -> FlowResult<()> {
        let additional = additional.ok_or(FlowError::ChallengeMismatch)?;
        if nonce.ct_matches(&challenge.hash_concat(additional)) {
            Ok(())
        } else {
            Err(FlowError::ChallengeMismatch)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemeKind {
    Single,
    #[default]
    Double,
}

impl SchemeKind {
    pub fn scheme(self) -> Arc<dyn ChallengeScheme> {
        match self {
            SchemeKind::Single => Arc::new(SingleChallenge),
            SchemeKind::Double => Arc::new(DoubleChallenge),
        }
    }
}

impl fmt::Display for SchemeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemeKind::Single => write!(f, "single"),
            SchemeKind::Double => write!(f, "double"),
        }
    }
}

impl FromStr for SchemeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(SchemeKind::Single),
            "double" => Ok(SchemeKind::Double),
            other => Err(format!(
                "unknown challenge scheme '{}', expected 'single' or 'double'",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_echoes_challenge() {
        let c = Challenge::generate().unwrap();
        let binding = SingleChallenge.bind(&c).unwrap();
        assert_eq!(binding.nonce, c);
        assert!(binding.additional.is_none());
        SingleChallenge.check(&c, &binding.nonce, None).unwrap();
    }

    #[test]
    fn test_single_rejects_other_challenge() {
        let c1 = Challenge::generate().unwrap();
        let c2 = Challenge::generate().unwrap();
        assert!(matches!(
            SingleChallenge.check(&c1, &c2, None),
            Err(FlowError::ChallengeMismatch)
        ));
    }

    #[test]
    fn test_double_binds_both_values() {
        let c = Challenge::generate().unwrap();
        let binding = DoubleChallenge.bind(&c).unwrap();
        let additional = binding.additional.unwrap();
        assert_ne!(binding.nonce, c);
        assert_eq!(binding.nonce, c.hash_concat(&additional));
        DoubleChallenge
            .check(&c, &binding.nonce, Some(&additional))
            .unwrap();
    }

    #[test]
    fn test_double_fresh_randomness_per_bind() {
        let c = Challenge::generate().unwrap();
        let b1 = DoubleChallenge.bind(&c).unwrap();
        let b2 = DoubleChallenge.bind(&c).unwrap();
        assert_ne!(b1.nonce, b2.nonce);
    }

    #[test]
    fn test_double_rejects_missing_additional() {
        let c = Challenge::generate().unwrap();
        let binding = DoubleChallenge.bind(&c).unwrap();
        assert!(matches!(
            DoubleChallenge.check(&c, &binding.nonce, None),
            Err(FlowError::ChallengeMismatch)
        ));
    }

    #[test]
    fn test_double_rejects_replay_under_new_challenge() {
        let old = Challenge::generate().unwrap();
        let binding = DoubleChallenge.bind(&old).unwrap();
        let fresh = Challenge::generate().unwrap();
        assert!(matches!(
            DoubleChallenge.check(&fresh, &binding.nonce, binding.additional.as_ref()),
            Err(FlowError::ChallengeMismatch)
        ));
    }

    #[test]
    fn test_single_nonce_fails_double_check() {
        let c = Challenge::generate().unwrap();
        let binding = SingleChallenge.bind(&c).unwrap();
        assert!(DoubleChallenge
            .check(&c, &binding.nonce, Some(&c))
            .is_err());
    }

    #[test]
    fn test_scheme_kind_parse_and_display() {
        assert_eq!("single".parse::<SchemeKind>().unwrap(), SchemeKind::Single);
        assert_eq!("double".parse::<SchemeKind>().unwrap(), SchemeKind::Double);
        assert!("triple".parse::<SchemeKind>().is_err());
        assert_eq!(SchemeKind::default(), SchemeKind::Double);
        assert_eq!(SchemeKind::Single.to_string(), "single");
        assert_eq!(SchemeKind::Double.scheme().kind(), SchemeKind::Double);
    }

    #[test]
    fn test_scheme_kind_serde_lowercase() {
        let json = serde_json::to_string(&SchemeKind::Double).unwrap();
        assert_eq!(json, "\"double\"");
    }
}

//! Lock key encoding for consensus slots.
//!
//! Every process sharing a store must derive byte-identical keys for the same
//! slot, so the format below is part of the on-store contract:
//!
//! ```text
//! {namespace}/{chain_id}/h_{height}/r_{round}/{step}
//! ```
//!
//! `namespace` may itself contain `/`-separated segments. No segment may be
//! empty and `chain_id` may not contain `/`, which keeps the encoding
//! injective: the last four segments are always chain, height, round and step.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors building a [`SlotKey`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("Invalid namespace {namespace:?}: {reason}")]
    InvalidNamespace {
        namespace: String,
        reason: &'static str,
    },

    #[error("Invalid chain id {chain_id:?}: {reason}")]
    InvalidChainId {
        chain_id: String,
        reason: &'static str,
    },

    #[error("Negative height: {0}")]
    NegativeHeight(i64),

    #[error("Negative round: {0}")]
    NegativeRound(i64),

    #[error("Unknown step: {0}")]
    UnknownStep(String),
}

/// The signing role a slot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Step {
    Proposal,
    Prevote,
    Precommit,
}

impl Step {
    pub const ALL: [Step; 3] = [Step::Proposal, Step::Prevote, Step::Precommit];

    /// Name used in the encoded key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Proposal => "proposal",
            Step::Prevote => "vote_prevote",
            Step::Precommit => "vote_precommit",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Step {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Step::ALL
            .into_iter()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| KeyError::UnknownStep(s.to_string()))
    }
}

/// A validated key namespace shared by every instance of one validator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(namespace: impl Into<String>) -> Result<Self, KeyError> {
        let namespace = namespace.into();
        let invalid = |reason| KeyError::InvalidNamespace {
            namespace: namespace.clone(),
            reason,
        };

        if namespace.is_empty() {
            return Err(invalid("empty"));
        }
        if namespace.split('/').any(str::is_empty) {
            return Err(invalid("empty path segment"));
        }
        if namespace.chars().any(char::is_control) {
            return Err(invalid("control character"));
        }

        Ok(Self(namespace))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one consensus slot: height, round and signing role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    pub height: u64,
    pub round: u32,
    pub step: Step,
}

impl Slot {
    /// Builds a slot from the signed integers used by consensus messages.
    pub fn new(height: i64, round: i32, step: Step) -> Result<Self, KeyError> {
        let height = u64::try_from(height).map_err(|_| KeyError::NegativeHeight(height))?;
        let round = u32::try_from(round).map_err(|_| KeyError::NegativeRound(round.into()))?;
        Ok(Self {
            height,
            round,
            step,
        })
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h={} r={} step={}", self.height, self.round, self.step)
    }
}

/// Fully encoded lock key for one slot on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotKey {
    slot: Slot,
    encoded: String,
}

impl SlotKey {
    pub fn new(namespace: &Namespace, chain_id: &str, slot: Slot) -> Result<Self, KeyError> {
        validate_chain_id(chain_id)?;
        let encoded = format!(
            "{}/{}/h_{}/r_{}/{}",
            namespace, chain_id, slot.height, slot.round, slot.step
        );
        Ok(Self { slot, encoded })
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.encoded.as_bytes()
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

fn validate_chain_id(chain_id: &str) -> Result<(), KeyError> {
    let invalid = |reason| KeyError::InvalidChainId {
        chain_id: chain_id.to_string(),
        reason,
    };

    if chain_id.is_empty() {
        return Err(invalid("empty"));
    }
    if chain_id.contains('/') {
        return Err(invalid("contains '/'"));
    }
    if chain_id.chars().any(char::is_control) {
        return Err(invalid("control character"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ns() -> Namespace {
        Namespace::new("val_lock/validator-1").unwrap()
    }

    #[test]
    fn test_key_format() {
        let slot = Slot::new(10, 0, Step::Proposal).unwrap();
        let key = SlotKey::new(&ns(), "chain-a", slot).unwrap();
        assert_eq!(
            key.as_str(),
            "val_lock/validator-1/chain-a/h_10/r_0/proposal"
        );
    }

    #[test]
    fn test_vote_steps_produce_distinct_keys() {
        let prevote_slot = Slot::new(10, 0, Step::Prevote).unwrap();
        let precommit_slot = Slot::new(10, 0, Step::Precommit).unwrap();
        let prevote = SlotKey::new(&ns(), "chain-a", prevote_slot).unwrap();
        let precommit = SlotKey::new(&ns(), "chain-a", precommit_slot).unwrap();
        assert_eq!(
            prevote.as_str(),
            "val_lock/validator-1/chain-a/h_10/r_0/vote_prevote"
        );
        assert_eq!(
            precommit.as_str(),
            "val_lock/validator-1/chain-a/h_10/r_0/vote_precommit"
        );
        assert_ne!(prevote, precommit);
    }

    #[test]
    fn test_step_round_trips_through_name() {
        for step in Step::ALL {
            assert_eq!(step.as_str().parse::<Step>().unwrap(), step);
        }
        assert!(matches!("vote".parse::<Step>(), Err(KeyError::UnknownStep(_))));
    }

    #[test]
    fn test_negative_fields_rejected() {
        assert_eq!(
            Slot::new(-1, 0, Step::Prevote).unwrap_err(),
            KeyError::NegativeHeight(-1)
        );
        assert_eq!(
            Slot::new(1, -3, Step::Prevote).unwrap_err(),
            KeyError::NegativeRound(-3)
        );
    }

    #[test]
    fn test_bad_chain_id_rejected() {
        let slot = Slot::new(1, 0, Step::Proposal).unwrap();
        for chain_id in ["", "a/b", "bad\nchain"] {
            let err = SlotKey::new(&ns(), chain_id, slot).unwrap_err();
            assert!(matches!(err, KeyError::InvalidChainId { .. }), "{chain_id:?}");
        }
    }

    #[test]
    fn test_bad_namespace_rejected() {
        for namespace in ["", "/lead", "trail/", "a//b"] {
            assert!(Namespace::new(namespace).is_err(), "{namespace:?}");
        }
    }

    fn step_strategy() -> impl Strategy<Value = Step> {
        prop_oneof![
            Just(Step::Proposal),
            Just(Step::Prevote),
            Just(Step::Precommit)
        ]
    }

    fn slot_strategy() -> impl Strategy<Value = (String, i64, i32, Step)> {
        (
            "[a-z0-9-]{1,12}",
            0i64..=i64::MAX,
            0i32..=i32::MAX,
            step_strategy(),
        )
    }

    proptest! {
        #[test]
        fn prop_encoding_is_injective(a in slot_strategy(), b in slot_strategy()) {
            let key_a = SlotKey::new(&ns(), &a.0, Slot::new(a.1, a.2, a.3).unwrap()).unwrap();
            let key_b = SlotKey::new(&ns(), &b.0, Slot::new(b.1, b.2, b.3).unwrap()).unwrap();
            prop_assert_eq!(a == b, key_a.as_bytes() == key_b.as_bytes());
        }

        #[test]
        fn prop_encoding_is_deterministic(a in slot_strategy()) {
            let first = SlotKey::new(&ns(), &a.0, Slot::new(a.1, a.2, a.3).unwrap()).unwrap();
            let second = SlotKey::new(&ns(), &a.0, Slot::new(a.1, a.2, a.3).unwrap()).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::constants::{
    IDENTITY_ID_SIZE, KDF_CONTEXT_IDENTITY_ID, MIN_TOPIC_PARTICIPANTS, TOPIC_ID_SEPARATOR,
};
use crate::error::{IdentityError, TopicError};

// Identity id = BLAKE3 derive_key over the Ed25519 public key (32 bytes).
// Byte order and lowercase-hex order agree, so the derived `Ord` sorts the
// same way the textual form does.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityId(pub [u8; IDENTITY_ID_SIZE]);

impl IdentityId {
    /// Derive the id of an identity from its public key.
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        Self(blake3::derive_key(KDF_CONTEXT_IDENTITY_ID, public_key))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, IdentityError> {
        let bytes = hex::decode(s).map_err(|e| IdentityError::InvalidId(e.to_string()))?;
        if bytes.len() != IDENTITY_ID_SIZE {
            return Err(IdentityError::InvalidId(format!(
                "expected {} bytes, got {}",
                IDENTITY_ID_SIZE,
                bytes.len()
            )));
        }
        let mut arr = [0u8; IDENTITY_ID_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl std::fmt::Display for IdentityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::str::FromStr for IdentityId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Id of a conversation between a fixed set of participants.
///
/// The textual form is the sorted participant ids joined with
/// [`TOPIC_ID_SEPARATOR`]. Every participant computes the same id for the
/// same set, whatever order they list it in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicId(String);

impl TopicId {
    /// Derive the topic id for a participant set. Duplicates are ignored.
    pub fn for_participants<'a, I>(participants: I) -> Result<Self, TopicError>
    where
        I: IntoIterator<Item = &'a IdentityId>,
    {
        let sorted: BTreeSet<IdentityId> = participants.into_iter().copied().collect();
        if sorted.len() < MIN_TOPIC_PARTICIPANTS {
            return Err(TopicError::TooFewParticipants {
                found: sorted.len(),
                min: MIN_TOPIC_PARTICIPANTS,
            });
        }

        let joined = sorted
            .iter()
            .map(IdentityId::to_hex)
            .collect::<Vec<_>>()
            .join(TOPIC_ID_SEPARATOR);
        Ok(Self(joined))
    }

    /// Parse a textual topic id, rejecting anything that is not the
    /// canonical form [`TopicId::for_participants`] would produce.
    pub fn parse(s: &str) -> Result<Self, TopicError> {
        let mut ids = Vec::new();
        for part in s.split(TOPIC_ID_SEPARATOR) {
            let id = IdentityId::from_hex(part)
                .map_err(|_| TopicError::InvalidParticipant(part.to_string()))?;
            ids.push(id);
        }

        let canonical = Self::for_participants(&ids)?;
        if canonical.0 != s {
            return Err(TopicError::NotCanonical(s.to_string()));
        }
        Ok(canonical)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The participant set encoded in this id.
    pub fn participants(&self) -> BTreeSet<IdentityId> {
        // The id was validated on construction, so every part parses.
        self.0
            .split(TOPIC_ID_SEPARATOR)
            .filter_map(|part| IdentityId::from_hex(part).ok())
            .collect()
    }

    pub fn contains(&self, identity: &IdentityId) -> bool {
        self.participants().contains(identity)
    }

    /// Every participant except `me`.
    pub fn others(&self, me: &IdentityId) -> Vec<IdentityId> {
        self.participants()
            .into_iter()
            .filter(|id| id != me)
            .collect()
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> String {
        self.participants()
            .iter()
            .map(IdentityId::short)
            .collect::<Vec<_>>()
            .join(TOPIC_ID_SEPARATOR)
    }
}

impl std::fmt::Display for TopicId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TopicId {
    type Error = TopicError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TopicId> for String {
    fn from(topic: TopicId) -> Self {
        topic.0
    }
}

/// Content address of a stored object (BLAKE3, 32 bytes).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ObjectHash(pub [u8; 32]);

impl ObjectHash {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut arr = [0u8; 32];
        hex::decode_to_slice(s, &mut arr)?;
        Ok(Self(arr))
    }
}

impl std::fmt::Display for ObjectHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> IdentityId {
        IdentityId([byte; 32])
    }

    #[test]
    fn test_topic_id_is_order_independent() {
        let (a, b, c) = (id(0x10), id(0xA0), id(0x3F));

        let abc = TopicId::for_participants([&a, &b, &c]).unwrap();
        let cab = TopicId::for_participants([&c, &a, &b]).unwrap();
        let bca = TopicId::for_participants([&b, &c, &a]).unwrap();

        assert_eq!(abc, cab);
        assert_eq!(abc, bca);
    }

    #[test]
    fn test_topic_id_sorted_and_joined() {
        let (a, b) = (id(0x01), id(0x02));
        let topic = TopicId::for_participants([&b, &a]).unwrap();
        let expected = format!("{}{}{}", a.to_hex(), TOPIC_ID_SEPARATOR, b.to_hex());
        assert_eq!(topic.as_str(), expected);
    }

    #[test]
    fn test_topic_needs_two_participants() {
        let a = id(0x01);
        let err = TopicId::for_participants([&a, &a]).unwrap_err();
        assert_eq!(err, TopicError::TooFewParticipants { found: 1, min: 2 });
    }

    #[test]
    fn test_distinct_sets_do_not_collide() {
        let (a, b, c) = (id(0x01), id(0x02), id(0x03));
        let ab = TopicId::for_participants([&a, &b]).unwrap();
        let ac = TopicId::for_participants([&a, &c]).unwrap();
        let abc = TopicId::for_participants([&a, &b, &c]).unwrap();
        assert_ne!(ab, ac);
        assert_ne!(ab, abc);
    }

    #[test]
    fn test_parse_recovers_participants() {
        let (a, b) = (id(0x07), id(0x09));
        let topic = TopicId::for_participants([&a, &b]).unwrap();
        let parsed = TopicId::parse(topic.as_str()).unwrap();
        assert_eq!(parsed, topic);
        assert!(parsed.contains(&a));
        assert_eq!(parsed.others(&a), vec![b]);
    }

    #[test]
    fn test_parse_rejects_unsorted_and_garbage() {
        let (a, b) = (id(0x01), id(0x02));
        let unsorted = format!("{}{}{}", b.to_hex(), TOPIC_ID_SEPARATOR, a.to_hex());
        assert!(matches!(
            TopicId::parse(&unsorted),
            Err(TopicError::NotCanonical(_))
        ));
        assert!(matches!(
            TopicId::parse("not-a-topic"),
            Err(TopicError::InvalidParticipant(_))
        ));
    }

    #[test]
    fn test_identity_id_hex_length_checked() {
        assert!(IdentityId::from_hex("abcd").is_err());
        let a = id(0xAB);
        assert_eq!(IdentityId::from_hex(&a.to_hex()).unwrap(), a);
    }
}

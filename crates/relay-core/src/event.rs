//! The `Event` value type (spec §3).
//!
//! `Event` is the sole persisted value. Signature verification and the
//! canonical wire/JSON codec are, per spec §6.4, assumed to be provided by
//! the caller in production — `Writer::save` never re-verifies anything.
//! This module ships a concrete `CanonicalSerialize`/`verify` pair anyway
//! (ed25519-dalek + sha2, both teacher-stack dependencies) so tests can
//! build and check real signed events without a second crate.

use bincode::{Decode, Encode};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ids::{Id, PubKey, Sig};
use crate::kind::EventKind;
use crate::tag::Tag;
use crate::timestamp::Timestamp;

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct Event {
    pub id: Id,
    pub pubkey: PubKey,
    pub created_at: Timestamp,
    pub kind: EventKind,
    pub tags: Vec<Tag>,
    pub content: Vec<u8>,
    pub sig: Sig,
}

impl Event {
    /// `CanonicalSerialize` (spec §6.4): the bytes whose sha256 equals
    /// `event.id`. Shape mirrors NIP-01's `[0, pubkey, created_at, kind,
    /// tags, content]` canonical array.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let tags: Vec<Vec<String>> = self
            .tags
            .iter()
            .map(|t| {
                t.0.iter()
                    .map(|e| String::from_utf8_lossy(e).into_owned())
                    .collect()
            })
            .collect();
        let value = serde_json::json!([
            0,
            self.pubkey.to_string(),
            self.created_at.0,
            self.kind.0,
            tags,
            String::from_utf8_lossy(&self.content),
        ]);
        serde_json::to_vec(&value).expect("json arrays never fail to serialize")
    }

    pub fn computed_id(&self) -> Id {
        let hash = Sha256::digest(self.canonical_bytes());
        Id::from_bytes(hash.into())
    }

    /// `VerifySignature` (spec §6.4): checks both that `id` matches the
    /// canonical hash and that `sig` is valid over it.
    pub fn verify(&self) -> bool {
        if self.computed_id() != self.id {
            return false;
        }
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.pubkey.to_bytes()) else {
            return false;
        };
        let signature = Signature::from_bytes(&self.sig.to_bytes());
        verifying_key.verify(&self.canonical_bytes(), &signature).is_ok()
    }

    /// The `d` tag value for parameterized-replaceable events, if any.
    pub fn d_tag_value(&self) -> Option<&[u8]> {
        self.tags.iter().find_map(|t| {
            if t.key_bytes() == Some(b"d") {
                t.value_bytes()
            } else {
                None
            }
        })
    }
}

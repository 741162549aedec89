//! Peer-signature registry: the bijection between peer identity and a
//! compact numeric peer-id (spec §4.B), shared across all views in a store.

use crate::error::ViewStoreError;
use crate::models::network::{PeerId, PeerSignature};
use std::collections::HashMap;

/// Bidirectional map `peer-id <-> peer-signature`. Ids are assigned densely
/// from 1 on first insertion and never reused for a different signature;
/// id 0 is reserved to mean "none" and is never handed out.
///
/// Modeled as a dense arena (`Vec<Option<PeerSignature>>` indexed by id)
/// plus a reverse `HashMap` -- the "dense numeric ids vs. pointer graphs"
/// approach spec §9 mandates, rather than a pointer-keyed hash table.
#[derive(Debug, Default)]
pub struct PeerSignatureRegistry {
    by_id: Vec<Option<PeerSignature>>,
    by_signature: HashMap<PeerSignature, PeerId>,
}

impl PeerSignatureRegistry {
    pub fn new() -> Self {
        // index 0 is reserved for PeerId::NONE
        PeerSignatureRegistry {
            by_id: vec![None],
            by_signature: HashMap::new(),
        }
    }

    /// Returns the existing id for `signature`, or assigns the next dense
    /// id and returns that. Fails with `ResourceExhausted` once the 16-bit
    /// id space (65535 peers, id 0 reserved) is full rather than silently
    /// wrapping a new id back around to an id already in use.
    pub fn set_and_get(&mut self, signature: PeerSignature) -> Result<PeerId, ViewStoreError> {
        if let Some(&id) = self.by_signature.get(&signature) {
            return Ok(id);
        }
        if self.by_id.len() > u16::MAX as usize {
            return Err(ViewStoreError::ResourceExhausted(
                "peer-id space exhausted (65535 peers already registered)".to_string(),
            ));
        }
        let id = PeerId(self.by_id.len() as u16);
        self.by_id.push(Some(signature.clone()));
        self.by_signature.insert(signature, id);
        Ok(id)
    }

    pub fn get_by_id(&self, id: PeerId) -> Option<&PeerSignature> {
        self.by_id.get(id.0 as usize).and_then(|s| s.as_ref())
    }

    pub fn get_id(&self, signature: &PeerSignature) -> Option<PeerId> {
        self.by_signature.get(signature).copied()
    }

    /// Idempotent rebind used when reconstructing a registry during
    /// deserialization: `set(id, signature)` succeeds if `id` is unbound, or
    /// already bound to the same signature. It fails with `IdConflict` if
    /// either `id` or `signature` is already bound to a *different*
    /// counterpart.
    pub fn set(&mut self, id: PeerId, signature: PeerSignature) -> Result<(), ViewStoreError> {
        if id.is_none() {
            return Err(ViewStoreError::IdConflict { id: id.0 });
        }

        if let Some(existing_id) = self.by_signature.get(&signature) {
            if *existing_id != id {
                return Err(ViewStoreError::IdConflict { id: id.0 });
            }
        }

        let idx = id.0 as usize;
        if idx >= self.by_id.len() {
            self.by_id.resize(idx + 1, None);
        }

        match &self.by_id[idx] {
            Some(existing) if existing != &signature => {
                return Err(ViewStoreError::IdConflict { id: id.0 });
            }
            _ => {}
        }

        self.by_id[idx] = Some(signature.clone());
        self.by_signature.insert(signature, id);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.by_signature.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_signature.is_empty()
    }
}

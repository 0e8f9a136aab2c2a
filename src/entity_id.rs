use serde::{Deserialize, Serialize};

/// Per-connection numeric id of an entity, assigned by the backend.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RuntimeEntityId(u64);

impl RuntimeEntityId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// World-unique id of an entity. Used by removals and links.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct UniqueEntityId(i64);

impl UniqueEntityId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }
}

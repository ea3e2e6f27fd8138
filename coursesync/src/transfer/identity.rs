//! Opaque task identity strings.
//!
//! Every transfer task carries a string tag naming the item it moves. The tag
//! outlives the process: when a background session reattaches tasks after a
//! restart, the tag is the only thing linking a callback back to its record.
//!
//! Format: `item:v1:<uuid>`. The version segment lets the encoding change
//! without misreading tags written by older builds.

use std::fmt;

use crate::store::ItemId;

const PREFIX: &str = "item";
const VERSION: &str = "v1";

/// Decoded task identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskIdentity {
    item_id: ItemId,
}

impl TaskIdentity {
    pub fn new(item_id: ItemId) -> Self {
        Self { item_id }
    }

    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    /// Encode into the string stamped on a task.
    pub fn encode(&self) -> String {
        format!("{}:{}:{}", PREFIX, VERSION, self.item_id)
    }

    /// Decode a task tag. Returns `None` for anything this build did not write.
    pub fn decode(tag: &str) -> Option<Self> {
        let mut parts = tag.splitn(3, ':');
        if parts.next()? != PREFIX || parts.next()? != VERSION {
            return None;
        }
        let item_id = parts.next()?.parse().ok()?;
        Some(Self { item_id })
    }
}

impl fmt::Display for TaskIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

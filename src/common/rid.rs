use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::common::config::{PageId, SlotId};

/// Serialized size of a RID on disk
pub const RID_SIZE: usize = 8;

/// Record identifier: the page holding a tuple plus its slot index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: SlotId,
}

impl Rid {
    pub fn new(page_id: PageId, slot: SlotId) -> Self {
        Self { page_id, slot }
    }

    pub fn to_bytes(&self) -> [u8; RID_SIZE] {
        let mut bytes = [0u8; RID_SIZE];
        LittleEndian::write_i32(&mut bytes[0..4], self.page_id);
        LittleEndian::write_u32(&mut bytes[4..8], self.slot);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            page_id: LittleEndian::read_i32(&bytes[0..4]),
            slot: LittleEndian::read_u32(&bytes[4..8]),
        }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot)
    }
}

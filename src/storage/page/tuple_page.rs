use byteorder::{ByteOrder, LittleEndian};

use crate::common::config::{Lsn, SlotId, PAGE_SIZE};
use crate::common::rid::Rid;
use crate::common::tuple::Tuple;
use crate::storage::page::error::PageError;
use crate::storage::page::page::Page;

/// Result type for tuple page operations
pub type Result<T> = std::result::Result<T, PageError>;

// Header layout:
//   [0..4)   lsn (i32)
//   [4..8)   tuple_count (u32)
//   [8..12)  free_space_offset (u32)
pub const TUPLE_PAGE_HEADER_SIZE: usize = 12;

// Slot layout, growing from the page tail:
//   [0..4)  offset (u32)
//   [4..8)  length (u32)
//   [8..12) flags (u32)
const SLOT_SIZE: usize = 12;

const FLAG_MARKED_DELETED: u32 = 1;

/// Slotted tuple page view. Tuple bytes grow forward from the header,
/// the slot array grows backward from the page tail; a slot with zero
/// offset and length is a tombstone left by `apply_delete`.
pub struct TuplePage;

impl TuplePage {
    pub fn init(page: &mut Page) {
        page.data[..TUPLE_PAGE_HEADER_SIZE].fill(0);
        LittleEndian::write_i32(&mut page.data[0..4], page.lsn);
        LittleEndian::write_u32(&mut page.data[8..12], TUPLE_PAGE_HEADER_SIZE as u32);
    }

    pub fn lsn(page: &Page) -> Lsn {
        LittleEndian::read_i32(&page.data[0..4])
    }

    /// Stamp the page with the LSN of the log record whose effect it
    /// now carries, both in the persistent header and the frame field.
    pub fn set_lsn(page: &mut Page, lsn: Lsn) {
        LittleEndian::write_i32(&mut page.data[0..4], lsn);
        page.lsn = lsn;
    }

    pub fn tuple_count(page: &Page) -> u32 {
        LittleEndian::read_u32(&page.data[4..8])
    }

    fn set_tuple_count(page: &mut Page, count: u32) {
        LittleEndian::write_u32(&mut page.data[4..8], count);
    }

    fn free_space_offset(page: &Page) -> u32 {
        LittleEndian::read_u32(&page.data[8..12])
    }

    fn set_free_space_offset(page: &mut Page, offset: u32) {
        LittleEndian::write_u32(&mut page.data[8..12], offset);
    }

    fn slot_pos(slot: SlotId) -> usize {
        PAGE_SIZE - SLOT_SIZE * (slot as usize + 1)
    }

    fn read_slot(page: &Page, slot: SlotId) -> (u32, u32, u32) {
        let pos = Self::slot_pos(slot);
        (
            LittleEndian::read_u32(&page.data[pos..pos + 4]),
            LittleEndian::read_u32(&page.data[pos + 4..pos + 8]),
            LittleEndian::read_u32(&page.data[pos + 8..pos + 12]),
        )
    }

    fn write_slot(page: &mut Page, slot: SlotId, offset: u32, length: u32, flags: u32) {
        let pos = Self::slot_pos(slot);
        LittleEndian::write_u32(&mut page.data[pos..pos + 4], offset);
        LittleEndian::write_u32(&mut page.data[pos + 4..pos + 8], length);
        LittleEndian::write_u32(&mut page.data[pos + 8..pos + 12], flags);
    }

    fn free_space(page: &Page) -> usize {
        let slot_array_start = PAGE_SIZE - SLOT_SIZE * Self::tuple_count(page) as usize;
        slot_array_start - Self::free_space_offset(page) as usize
    }

    /// Append a tuple into the next free slot and return its RID.
    pub fn append_tuple(page: &mut Page, tuple: &Tuple) -> Result<Rid> {
        let slot = Self::tuple_count(page);
        Self::insert_tuple(page, Rid::new(page.page_id, slot), tuple)?;
        Ok(Rid::new(page.page_id, slot))
    }

    /// Place a tuple at the exact slot named by `rid`. Used by redo,
    /// which must reproduce the original slot assignment; the slot must
    /// be past the current count (intermediate slots become tombstones)
    /// or an existing tombstone.
    pub fn insert_tuple(page: &mut Page, rid: Rid, tuple: &Tuple) -> Result<Rid> {
        let count = Self::tuple_count(page);
        let slot = rid.slot;

        if slot < count {
            let (_, length, _) = Self::read_slot(page, slot);
            if length != 0 {
                return Err(PageError::SlotOccupied(slot));
            }
            if Self::free_space(page) < tuple.len() {
                return Err(PageError::InsufficientSpace);
            }
        } else {
            let new_slots = slot - count + 1;
            let needed = tuple.len() + SLOT_SIZE * new_slots as usize;
            if Self::free_space(page) < needed {
                return Err(PageError::InsufficientSpace);
            }
            for s in count..=slot {
                Self::write_slot(page, s, 0, 0, 0);
            }
            Self::set_tuple_count(page, slot + 1);
        }

        let offset = Self::free_space_offset(page);
        let end = offset as usize + tuple.len();
        page.data[offset as usize..end].copy_from_slice(tuple.data());
        Self::write_slot(page, slot, offset, tuple.len() as u32, 0);
        Self::set_free_space_offset(page, end as u32);
        Ok(rid)
    }

    pub fn get_tuple(page: &Page, rid: Rid) -> Result<Tuple> {
        let (offset, length, flags) = Self::checked_slot(page, rid)?;
        if flags & FLAG_MARKED_DELETED != 0 {
            return Err(PageError::TupleNotFound(rid.slot));
        }
        let start = offset as usize;
        Ok(Tuple::new(page.data[start..start + length as usize].to_vec()))
    }

    /// Logical delete: the tuple stays in place so the transaction can
    /// roll it back; `apply_delete` reclaims the slot at commit.
    pub fn mark_delete(page: &mut Page, rid: Rid) -> Result<()> {
        let (offset, length, flags) = Self::checked_slot(page, rid)?;
        if flags & FLAG_MARKED_DELETED != 0 {
            return Err(PageError::TupleNotFound(rid.slot));
        }
        Self::write_slot(page, rid.slot, offset, length, flags | FLAG_MARKED_DELETED);
        Ok(())
    }

    pub fn rollback_delete(page: &mut Page, rid: Rid) -> Result<()> {
        let (offset, length, flags) = Self::checked_slot(page, rid)?;
        Self::write_slot(page, rid.slot, offset, length, flags & !FLAG_MARKED_DELETED);
        Ok(())
    }

    /// Physical delete: turn the slot into a tombstone. Space is not
    /// compacted; tombstoned slots can be refilled by `insert_tuple`.
    pub fn apply_delete(page: &mut Page, rid: Rid) -> Result<()> {
        let count = Self::tuple_count(page);
        if rid.slot >= count {
            return Err(PageError::InvalidSlot(rid.slot));
        }
        Self::write_slot(page, rid.slot, 0, 0, 0);
        Ok(())
    }

    /// Replace a tuple's bytes in place; growing updates relocate the
    /// bytes to the free region, keeping the RID stable.
    pub fn update_tuple(page: &mut Page, rid: Rid, tuple: &Tuple) -> Result<()> {
        let (offset, length, flags) = Self::checked_slot(page, rid)?;
        if flags & FLAG_MARKED_DELETED != 0 {
            return Err(PageError::TupleNotFound(rid.slot));
        }

        let new_len = tuple.len() as u32;
        if new_len <= length {
            let start = offset as usize;
            page.data[start..start + tuple.len()].copy_from_slice(tuple.data());
            Self::write_slot(page, rid.slot, offset, new_len, flags);
            return Ok(());
        }

        if Self::free_space(page) < tuple.len() {
            return Err(PageError::InsufficientSpace);
        }
        let new_offset = Self::free_space_offset(page);
        let end = new_offset as usize + tuple.len();
        page.data[new_offset as usize..end].copy_from_slice(tuple.data());
        Self::write_slot(page, rid.slot, new_offset, new_len, flags);
        Self::set_free_space_offset(page, end as u32);
        Ok(())
    }

    fn checked_slot(page: &Page, rid: Rid) -> Result<(u32, u32, u32)> {
        if rid.slot >= Self::tuple_count(page) {
            return Err(PageError::InvalidSlot(rid.slot));
        }
        let (offset, length, flags) = Self::read_slot(page, rid.slot);
        if length == 0 {
            return Err(PageError::TupleNotFound(rid.slot));
        }
        Ok((offset, length, flags))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_page() -> Page {
        let mut page = Page::new(3);
        TuplePage::init(&mut page);
        page
    }

    #[test]
    fn test_append_and_get() {
        let mut page = fresh_page();
        let tuple = Tuple::new(vec![7; 32]);
        let rid = TuplePage::append_tuple(&mut page, &tuple).unwrap();
        assert_eq!(rid.slot, 0);
        assert_eq!(TuplePage::get_tuple(&page, rid).unwrap(), tuple);
    }

    #[test]
    fn test_mark_and_rollback_delete() {
        let mut page = fresh_page();
        let tuple = Tuple::new(vec![1, 2, 3]);
        let rid = TuplePage::append_tuple(&mut page, &tuple).unwrap();

        TuplePage::mark_delete(&mut page, rid).unwrap();
        assert!(TuplePage::get_tuple(&page, rid).is_err());

        TuplePage::rollback_delete(&mut page, rid).unwrap();
        assert_eq!(TuplePage::get_tuple(&page, rid).unwrap(), tuple);
    }

    #[test]
    fn test_apply_delete_then_reinsert_same_slot() {
        let mut page = fresh_page();
        let rid = TuplePage::append_tuple(&mut page, &Tuple::new(vec![5; 8])).unwrap();
        TuplePage::apply_delete(&mut page, rid).unwrap();
        assert!(TuplePage::get_tuple(&page, rid).is_err());

        let replacement = Tuple::new(vec![9; 8]);
        TuplePage::insert_tuple(&mut page, rid, &replacement).unwrap();
        assert_eq!(TuplePage::get_tuple(&page, rid).unwrap(), replacement);
    }

    #[test]
    fn test_insert_at_forward_slot() {
        let mut page = fresh_page();
        let rid = Rid::new(page.page_id, 4);
        TuplePage::insert_tuple(&mut page, rid, &Tuple::new(vec![1])).unwrap();
        assert_eq!(TuplePage::tuple_count(&page), 5);
        // Intermediate slots are tombstones
        assert!(TuplePage::get_tuple(&page, Rid::new(page.page_id, 2)).is_err());
    }

    #[test]
    fn test_update_grows_and_shrinks() {
        let mut page = fresh_page();
        let rid = TuplePage::append_tuple(&mut page, &Tuple::new(vec![1; 16])).unwrap();

        let bigger = Tuple::new(vec![2; 64]);
        TuplePage::update_tuple(&mut page, rid, &bigger).unwrap();
        assert_eq!(TuplePage::get_tuple(&page, rid).unwrap(), bigger);

        let smaller = Tuple::new(vec![3; 4]);
        TuplePage::update_tuple(&mut page, rid, &smaller).unwrap();
        assert_eq!(TuplePage::get_tuple(&page, rid).unwrap(), smaller);
    }

    #[test]
    fn test_lsn_round_trip() {
        let mut page = fresh_page();
        TuplePage::set_lsn(&mut page, 41);
        assert_eq!(TuplePage::lsn(&page), 41);
        assert_eq!(page.lsn, 41);
    }

    #[test]
    fn test_insufficient_space() {
        let mut page = fresh_page();
        let huge = Tuple::new(vec![0; PAGE_SIZE]);
        assert!(matches!(
            TuplePage::append_tuple(&mut page, &huge),
            Err(PageError::InsufficientSpace)
        ));
    }
}

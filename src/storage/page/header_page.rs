use byteorder::{ByteOrder, LittleEndian};

use crate::common::config::{PageId, PAGE_SIZE};
use crate::storage::page::error::PageError;
use crate::storage::page::page::Page;

/// Result type for header page operations
pub type Result<T> = std::result::Result<T, PageError>;

const MAX_NAME_LEN: usize = 32;
const ENTRY_SIZE: usize = MAX_NAME_LEN + 4;
const COUNT_SIZE: usize = 4;
const MAX_RECORDS: usize = (PAGE_SIZE - COUNT_SIZE) / ENTRY_SIZE;

/// View over page 0: a directory of `index name -> root page id`
/// records. The B+tree publishes every root change through this page.
pub struct HeaderPage;

impl HeaderPage {
    pub fn record_count(page: &Page) -> usize {
        LittleEndian::read_u32(&page.data[0..4]) as usize
    }

    fn set_record_count(page: &mut Page, count: usize) {
        LittleEndian::write_u32(&mut page.data[0..4], count as u32);
    }

    fn entry_pos(index: usize) -> usize {
        COUNT_SIZE + index * ENTRY_SIZE
    }

    fn name_at(page: &Page, index: usize) -> &str {
        let pos = Self::entry_pos(index);
        let raw = &page.data[pos..pos + MAX_NAME_LEN];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LEN);
        std::str::from_utf8(&raw[..end]).unwrap_or("")
    }

    fn find(page: &Page, name: &str) -> Option<usize> {
        (0..Self::record_count(page)).find(|&i| Self::name_at(page, i) == name)
    }

    pub fn insert_record(page: &mut Page, name: &str, root_id: PageId) -> Result<()> {
        if name.len() > MAX_NAME_LEN {
            return Err(PageError::NameTooLong(name.to_string()));
        }
        if Self::find(page, name).is_some() {
            return Err(PageError::DuplicateRecord(name.to_string()));
        }
        let count = Self::record_count(page);
        if count >= MAX_RECORDS {
            return Err(PageError::HeaderFull);
        }

        let pos = Self::entry_pos(count);
        page.data[pos..pos + MAX_NAME_LEN].fill(0);
        page.data[pos..pos + name.len()].copy_from_slice(name.as_bytes());
        LittleEndian::write_i32(&mut page.data[pos + MAX_NAME_LEN..pos + ENTRY_SIZE], root_id);
        Self::set_record_count(page, count + 1);
        Ok(())
    }

    pub fn update_record(page: &mut Page, name: &str, root_id: PageId) -> Result<()> {
        let index = Self::find(page, name).ok_or_else(|| PageError::RecordNotFound(name.to_string()))?;
        let pos = Self::entry_pos(index);
        LittleEndian::write_i32(&mut page.data[pos + MAX_NAME_LEN..pos + ENTRY_SIZE], root_id);
        Ok(())
    }

    pub fn delete_record(page: &mut Page, name: &str) -> Result<()> {
        let index = Self::find(page, name).ok_or_else(|| PageError::RecordNotFound(name.to_string()))?;
        let count = Self::record_count(page);
        // Shift the trailing entries down over the removed one
        let start = Self::entry_pos(index + 1);
        let end = Self::entry_pos(count);
        page.data.copy_within(start..end, Self::entry_pos(index));
        Self::set_record_count(page, count - 1);
        Ok(())
    }

    pub fn get_root_id(page: &Page, name: &str) -> Option<PageId> {
        let index = Self::find(page, name)?;
        let pos = Self::entry_pos(index);
        Some(LittleEndian::read_i32(
            &page.data[pos + MAX_NAME_LEN..pos + ENTRY_SIZE],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::HEADER_PAGE_ID;

    #[test]
    fn test_insert_update_get() {
        let mut page = Page::new(HEADER_PAGE_ID);
        HeaderPage::insert_record(&mut page, "primary", 7).unwrap();
        assert_eq!(HeaderPage::get_root_id(&page, "primary"), Some(7));

        HeaderPage::update_record(&mut page, "primary", 12).unwrap();
        assert_eq!(HeaderPage::get_root_id(&page, "primary"), Some(12));
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut page = Page::new(HEADER_PAGE_ID);
        HeaderPage::insert_record(&mut page, "idx", 1).unwrap();
        assert!(HeaderPage::insert_record(&mut page, "idx", 2).is_err());
    }

    #[test]
    fn test_delete_compacts_entries() {
        let mut page = Page::new(HEADER_PAGE_ID);
        HeaderPage::insert_record(&mut page, "a", 1).unwrap();
        HeaderPage::insert_record(&mut page, "b", 2).unwrap();
        HeaderPage::insert_record(&mut page, "c", 3).unwrap();

        HeaderPage::delete_record(&mut page, "b").unwrap();
        assert_eq!(HeaderPage::record_count(&page), 2);
        assert_eq!(HeaderPage::get_root_id(&page, "a"), Some(1));
        assert_eq!(HeaderPage::get_root_id(&page, "c"), Some(3));
        assert_eq!(HeaderPage::get_root_id(&page, "b"), None);
    }
}

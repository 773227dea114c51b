use std::sync::Arc;

use anyhow::Result;
use tempfile::NamedTempFile;

use shaledb::storage::disk::DiskManager;
use shaledb::transaction::wal::LogManager;
use shaledb::BufferPoolManager;

// Route log output through the test harness
#[allow(dead_code)]
pub fn init_test_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager over a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(
    pool_size: usize,
) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let disk = Arc::new(DiskManager::new(path)?);
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, disk));
    Ok((buffer_pool, file))
}

// Create a buffer pool wired to a running log manager, for WAL tests
#[allow(dead_code)]
pub fn create_logged_buffer_pool(
    pool_size: usize,
) -> Result<(Arc<BufferPoolManager>, Arc<DiskManager>, Arc<LogManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let disk = Arc::new(DiskManager::new(path)?);
    let log_manager = Arc::new(LogManager::new(disk.clone()));
    log_manager.run_flush_thread();
    let buffer_pool = Arc::new(BufferPoolManager::with_log_manager(
        pool_size,
        disk.clone(),
        Some(log_manager.clone()),
    ));
    Ok((buffer_pool, disk, log_manager, file))
}

use byteorder::{ByteOrder, LittleEndian};

use crate::common::config::{Lsn, PageId, TxnId, INVALID_LSN, INVALID_TXN_ID};
use crate::common::rid::{Rid, RID_SIZE};
use crate::common::tuple::Tuple;

/// Fixed serialized header: size, lsn, txn_id, prev_lsn, type — five
/// little-endian i32 fields.
pub const LOG_HEADER_SIZE: usize = 20;

/// Types of log records written by the WAL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRecordType {
    Invalid = 0,
    Insert = 1,
    MarkDelete = 2,
    ApplyDelete = 3,
    RollbackDelete = 4,
    Update = 5,
    Begin = 6,
    Commit = 7,
    Abort = 8,
    NewPage = 9,
}

impl LogRecordType {
    fn from_i32(value: i32) -> Self {
        match value {
            1 => Self::Insert,
            2 => Self::MarkDelete,
            3 => Self::ApplyDelete,
            4 => Self::RollbackDelete,
            5 => Self::Update,
            6 => Self::Begin,
            7 => Self::Commit,
            8 => Self::Abort,
            9 => Self::NewPage,
            _ => Self::Invalid,
        }
    }
}

/// Type-specific payload following the header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogPayload {
    /// BEGIN / COMMIT / ABORT carry no payload
    Transaction,
    Insert {
        rid: Rid,
        tuple: Tuple,
    },
    /// Shared by MARKDELETE, APPLYDELETE and ROLLBACKDELETE; the
    /// record type tells them apart
    Delete {
        rid: Rid,
        tuple: Tuple,
    },
    Update {
        rid: Rid,
        old_tuple: Tuple,
        new_tuple: Tuple,
    },
    NewPage {
        prev_page_id: PageId,
    },
}

impl LogPayload {
    fn serialized_size(&self) -> usize {
        match self {
            Self::Transaction => 0,
            Self::Insert { tuple, .. } | Self::Delete { tuple, .. } => {
                RID_SIZE + tuple.serialized_size()
            }
            Self::Update {
                old_tuple,
                new_tuple,
                ..
            } => RID_SIZE + old_tuple.serialized_size() + new_tuple.serialized_size(),
            Self::NewPage { .. } => 4,
        }
    }
}

/// A single write-ahead log record. Per-transaction records form a
/// backward chain through `prev_lsn`, terminated by `INVALID_LSN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub size: i32,
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub prev_lsn: Lsn,
    pub record_type: LogRecordType,
    pub payload: LogPayload,
}

impl LogRecord {
    fn new(txn_id: TxnId, prev_lsn: Lsn, record_type: LogRecordType, payload: LogPayload) -> Self {
        Self {
            size: (LOG_HEADER_SIZE + payload.serialized_size()) as i32,
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            record_type,
            payload,
        }
    }

    pub fn new_begin(txn_id: TxnId) -> Self {
        Self::new(txn_id, INVALID_LSN, LogRecordType::Begin, LogPayload::Transaction)
    }

    pub fn new_commit(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordType::Commit, LogPayload::Transaction)
    }

    pub fn new_abort(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordType::Abort, LogPayload::Transaction)
    }

    pub fn new_insert(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Tuple) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordType::Insert,
            LogPayload::Insert { rid, tuple },
        )
    }

    /// One constructor for the three delete flavors
    pub fn new_delete(
        txn_id: TxnId,
        prev_lsn: Lsn,
        record_type: LogRecordType,
        rid: Rid,
        tuple: Tuple,
    ) -> Self {
        debug_assert!(matches!(
            record_type,
            LogRecordType::MarkDelete | LogRecordType::ApplyDelete | LogRecordType::RollbackDelete
        ));
        Self::new(txn_id, prev_lsn, record_type, LogPayload::Delete { rid, tuple })
    }

    pub fn new_update(
        txn_id: TxnId,
        prev_lsn: Lsn,
        rid: Rid,
        old_tuple: Tuple,
        new_tuple: Tuple,
    ) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordType::Update,
            LogPayload::Update {
                rid,
                old_tuple,
                new_tuple,
            },
        )
    }

    pub fn new_new_page(txn_id: TxnId, prev_lsn: Lsn, prev_page_id: PageId) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordType::NewPage,
            LogPayload::NewPage { prev_page_id },
        )
    }

    /// Write the record at the start of `buf`, which must hold at
    /// least `self.size` bytes.
    pub fn serialize_to(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(&mut buf[0..4], self.size);
        LittleEndian::write_i32(&mut buf[4..8], self.lsn);
        LittleEndian::write_i32(&mut buf[8..12], self.txn_id);
        LittleEndian::write_i32(&mut buf[12..16], self.prev_lsn);
        LittleEndian::write_i32(&mut buf[16..20], self.record_type as i32);

        let mut pos = LOG_HEADER_SIZE;
        match &self.payload {
            LogPayload::Transaction => {}
            LogPayload::Insert { rid, tuple } | LogPayload::Delete { rid, tuple } => {
                buf[pos..pos + RID_SIZE].copy_from_slice(&rid.to_bytes());
                pos += RID_SIZE;
                tuple.serialize_to(&mut buf[pos..]);
            }
            LogPayload::Update {
                rid,
                old_tuple,
                new_tuple,
            } => {
                buf[pos..pos + RID_SIZE].copy_from_slice(&rid.to_bytes());
                pos += RID_SIZE;
                old_tuple.serialize_to(&mut buf[pos..]);
                pos += old_tuple.serialized_size();
                new_tuple.serialize_to(&mut buf[pos..]);
            }
            LogPayload::NewPage { prev_page_id } => {
                LittleEndian::write_i32(&mut buf[pos..pos + 4], *prev_page_id);
            }
        }
    }

    /// Parse a record from the front of `buf`. Returns `None` when the
    /// buffer holds no complete, valid record — the caller treats that
    /// as "refill and retry" during recovery scans.
    pub fn deserialize(buf: &[u8]) -> Option<Self> {
        if buf.len() < LOG_HEADER_SIZE {
            return None;
        }
        let size = LittleEndian::read_i32(&buf[0..4]);
        let lsn = LittleEndian::read_i32(&buf[4..8]);
        let txn_id = LittleEndian::read_i32(&buf[8..12]);
        let prev_lsn = LittleEndian::read_i32(&buf[12..16]);
        let record_type = LogRecordType::from_i32(LittleEndian::read_i32(&buf[16..20]));

        if size < LOG_HEADER_SIZE as i32
            || lsn == INVALID_LSN
            || txn_id == INVALID_TXN_ID
            || record_type == LogRecordType::Invalid
        {
            return None;
        }
        if buf.len() < size as usize {
            return None;
        }

        let body = &buf[LOG_HEADER_SIZE..size as usize];
        let payload = match record_type {
            LogRecordType::Begin | LogRecordType::Commit | LogRecordType::Abort => {
                LogPayload::Transaction
            }
            LogRecordType::Insert => {
                let rid = Rid::from_bytes(body.get(..RID_SIZE)?);
                let tuple = Tuple::deserialize_from(&body[RID_SIZE..])?;
                LogPayload::Insert { rid, tuple }
            }
            LogRecordType::MarkDelete
            | LogRecordType::ApplyDelete
            | LogRecordType::RollbackDelete => {
                let rid = Rid::from_bytes(body.get(..RID_SIZE)?);
                let tuple = Tuple::deserialize_from(&body[RID_SIZE..])?;
                LogPayload::Delete { rid, tuple }
            }
            LogRecordType::Update => {
                let rid = Rid::from_bytes(body.get(..RID_SIZE)?);
                let old_tuple = Tuple::deserialize_from(&body[RID_SIZE..])?;
                let new_tuple =
                    Tuple::deserialize_from(&body[RID_SIZE + old_tuple.serialized_size()..])?;
                LogPayload::Update {
                    rid,
                    old_tuple,
                    new_tuple,
                }
            }
            LogRecordType::NewPage => LogPayload::NewPage {
                prev_page_id: LittleEndian::read_i32(body.get(..4)?),
            },
            LogRecordType::Invalid => unreachable!(),
        };

        Some(Self {
            size,
            lsn,
            txn_id,
            prev_lsn,
            record_type,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(mut record: LogRecord) -> LogRecord {
        record.lsn = 7;
        let mut buf = vec![0u8; record.size as usize];
        record.serialize_to(&mut buf);
        let parsed = LogRecord::deserialize(&buf).expect("record should parse");
        assert_eq!(parsed, record);
        parsed
    }

    #[test]
    fn test_transaction_records_round_trip() {
        round_trip(LogRecord::new_begin(1));
        round_trip(LogRecord::new_commit(1, 3));
        round_trip(LogRecord::new_abort(2, 4));
    }

    #[test]
    fn test_insert_record_round_trip() {
        let record = round_trip(LogRecord::new_insert(
            1,
            2,
            Rid::new(5, 3),
            Tuple::new(vec![1, 2, 3]),
        ));
        assert_eq!(record.size as usize, LOG_HEADER_SIZE + RID_SIZE + 4 + 3);
    }

    #[test]
    fn test_update_record_round_trip() {
        round_trip(LogRecord::new_update(
            9,
            11,
            Rid::new(2, 0),
            Tuple::new(vec![1; 10]),
            Tuple::new(vec![2; 20]),
        ));
    }

    #[test]
    fn test_new_page_record_round_trip() {
        round_trip(LogRecord::new_new_page(1, INVALID_LSN, 42));
    }

    #[test]
    fn test_truncated_record_rejected() {
        let mut record = LogRecord::new_insert(1, 2, Rid::new(5, 3), Tuple::new(vec![7; 64]));
        record.lsn = 1;
        let mut buf = vec![0u8; record.size as usize];
        record.serialize_to(&mut buf);
        assert!(LogRecord::deserialize(&buf[..buf.len() - 1]).is_none());
    }

    #[test]
    fn test_unassigned_lsn_rejected() {
        let record = LogRecord::new_begin(1);
        let mut buf = vec![0u8; record.size as usize];
        record.serialize_to(&mut buf);
        // lsn is still INVALID_LSN; deserialization must refuse it
        assert!(LogRecord::deserialize(&buf).is_none());
    }
}

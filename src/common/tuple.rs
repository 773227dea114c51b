use byteorder::{ByteOrder, LittleEndian};

/// An opaque tuple image, carried through log records and tuple pages.
/// The engine never interprets the bytes; the record format belongs to
/// the layers above.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tuple {
    data: Vec<u8>,
}

impl Tuple {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Serialized size: a u32 length prefix plus the payload
    pub fn serialized_size(&self) -> usize {
        4 + self.data.len()
    }

    pub fn serialize_to(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.data.len() as u32);
        buf[4..4 + self.data.len()].copy_from_slice(&self.data);
    }

    /// Read a tuple back from `buf`. Returns `None` if the buffer does
    /// not contain the full length prefix and payload.
    pub fn deserialize_from(buf: &[u8]) -> Option<Self> {
        if buf.len() < 4 {
            return None;
        }
        let len = LittleEndian::read_u32(&buf[0..4]) as usize;
        if buf.len() < 4 + len {
            return None;
        }
        Some(Self {
            data: buf[4..4 + len].to_vec(),
        })
    }
}

impl From<&[u8]> for Tuple {
    fn from(data: &[u8]) -> Self {
        Self::new(data.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuple_round_trip() {
        let tuple = Tuple::new(vec![1, 2, 3, 4, 5]);
        let mut buf = vec![0u8; tuple.serialized_size()];
        tuple.serialize_to(&mut buf);
        assert_eq!(Tuple::deserialize_from(&buf), Some(tuple));
    }

    #[test]
    fn test_tuple_truncated_buffer() {
        let tuple = Tuple::new(vec![9; 16]);
        let mut buf = vec![0u8; tuple.serialized_size()];
        tuple.serialize_to(&mut buf);
        assert_eq!(Tuple::deserialize_from(&buf[..10]), None);
    }
}

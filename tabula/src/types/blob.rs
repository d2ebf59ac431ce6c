use std::fmt;

/// An opaque byte-range provider.
///
/// Blob values don't own their bytes; they expose ranges on request, so a
/// source may back them with a file, a network stream, etc.
pub trait BlobData: Send + Sync + fmt::Debug {
    /// The total length, in bytes.
    fn len(&self) -> u64;

    /// Copies up to `buf.len()` bytes starting at `offset` into `buf`.
    /// Returns the number of copied bytes (zero at the end).
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize;

    /// Reads the entire range into memory.
    fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0; self.len() as usize];
        let mut offset = 0;
        while offset < out.len() {
            let n = self.read_at(offset as u64, &mut out[offset..]);
            if n == 0 {
                out.truncate(offset);
                break;
            }
            offset += n;
        }
        out
    }
}

/// In-memory blob.
#[derive(Debug, Clone)]
pub struct BytesBlob {
    bytes: Vec<u8>,
}

impl From<Vec<u8>> for BytesBlob {
    fn from(bytes: Vec<u8>) -> BytesBlob {
        BytesBlob { bytes }
    }
}

impl BlobData for BytesBlob {
    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize {
        let Ok(offset) = usize::try_from(offset) else {
            return 0;
        };
        let Some(rest) = self.bytes.get(offset..) else {
            return 0;
        };
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        n
    }
}

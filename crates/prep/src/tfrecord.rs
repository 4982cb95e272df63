//! TFRecord framing.
//!
//! Each record is `u64 LE length`, `masked crc32c(length bytes)`, `data`,
//! `masked crc32c(data)`; checksums are little-endian `u32`.

use std::io::{self, Read, Write};

use crate::PrepError;

const MASK_DELTA: u32 = 0xa282_ead8;

/// CRC32C as masked by TensorFlow's record writer.
pub fn masked_crc(data: &[u8]) -> u32 {
    let crc = crc32c::crc32c(data);
    ((crc >> 15) | (crc << 17)).wrapping_add(MASK_DELTA)
}

/// Writes framed records to any [`Write`].
pub struct TfRecordWriter<W: Write> {
    inner: W,
    count: usize,
}

impl<W: Write> TfRecordWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }

    pub fn write_record(&mut self, data: &[u8]) -> io::Result<()> {
        let len = (data.len() as u64).to_le_bytes();
        self.inner.write_all(&len)?;
        self.inner.write_all(&masked_crc(&len).to_le_bytes())?;
        self.inner.write_all(data)?;
        self.inner.write_all(&masked_crc(data).to_le_bytes())?;
        self.count += 1;
        Ok(())
    }

    /// Records written so far.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn into_inner(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Iterates over the records of a TFRecord stream, verifying both checksums.
pub struct TfRecordReader<R: Read> {
    inner: R,
    offset: u64,
    failed: bool,
}

impl<R: Read> TfRecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            offset: 0,
            failed: false,
        }
    }

    fn read_record(&mut self) -> Result<Option<Vec<u8>>, PrepError> {
        let start = self.offset;
        let corrupt = |reason| PrepError::CorruptRecord {
            offset: start,
            reason,
        };

        let mut len = [0u8; 8];
        match read_full(&mut self.inner, &mut len).map_err(|e| PrepError::io("<tfrecord>", e))? {
            0 => return Ok(None),
            8 => {}
            _ => return Err(corrupt("truncated length")),
        }

        let mut crc = [0u8; 4];
        self.read_exact(&mut crc, corrupt("truncated length checksum"))?;
        if u32::from_le_bytes(crc) != masked_crc(&len) {
            return Err(corrupt("length checksum mismatch"));
        }

        let size = usize::try_from(u64::from_le_bytes(len)).map_err(|_| corrupt("length overflow"))?;
        let mut data = vec![0u8; size];
        self.read_exact(&mut data, corrupt("truncated data"))?;
        self.read_exact(&mut crc, corrupt("truncated data checksum"))?;
        if u32::from_le_bytes(crc) != masked_crc(&data) {
            return Err(corrupt("data checksum mismatch"));
        }

        self.offset += 16 + size as u64;
        Ok(Some(data))
    }

    fn read_exact(&mut self, buf: &mut [u8], truncated: PrepError) -> Result<(), PrepError> {
        match read_full(&mut self.inner, buf) {
            Ok(n) if n == buf.len() => Ok(()),
            Ok(_) => Err(truncated),
            Err(e) => Err(PrepError::io("<tfrecord>", e)),
        }
    }
}

impl<R: Read> Iterator for TfRecordReader<R> {
    type Item = Result<Vec<u8>, PrepError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = self.read_record().transpose();
        if matches!(item, Some(Err(_))) {
            self.failed = true;
        }
        item
    }
}

// Like `read_exact`, but reports how much was read before EOF.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

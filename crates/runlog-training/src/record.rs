//! TFRecord framing used by event files.
//!
//! Each record is `length (u64 LE)`, `masked crc32c of length (u32 LE)`,
//! `data`, `masked crc32c of data (u32 LE)`.

use runlog_abstraction::SummaryError;
use std::io::Write;
use std::path::Path;

const MASK_DELTA: u32 = 0xa282_ead8;
const HEADER_LEN: usize = 8;
const CRC_LEN: usize = 4;

/// CRC32C of `data`, rotated and offset so that CRCs of CRCs stay well distributed.
#[must_use]
pub fn masked_crc(data: &[u8]) -> u32 {
    crc32c::crc32c(data).rotate_right(15).wrapping_add(MASK_DELTA)
}

pub fn write_record<W: Write>(out: &mut W, data: &[u8]) -> std::io::Result<()> {
    let header = (data.len() as u64).to_le_bytes();
    out.write_all(&header)?;
    out.write_all(&masked_crc(&header).to_le_bytes())?;
    out.write_all(data)?;
    out.write_all(&masked_crc(data).to_le_bytes())?;
    Ok(())
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; CRC_LEN];
    buf.copy_from_slice(&bytes[..CRC_LEN]);
    u32::from_le_bytes(buf)
}

/// Splits the contents of an event file into record payloads.
///
/// `path` is only used for error reporting.
pub fn read_records<'a>(bytes: &'a [u8], path: &Path) -> Result<Vec<&'a [u8]>, SummaryError> {
    let corrupt = |offset: usize, reason: &str| SummaryError::Corrupt {
        path: path.to_path_buf(),
        offset: offset as u64,
        reason: reason.to_string(),
    };

    let mut records = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let rest = &bytes[offset..];
        if rest.len() < HEADER_LEN + CRC_LEN {
            return Err(corrupt(offset, "truncated record header"));
        }

        let header = &rest[..HEADER_LEN];
        if read_u32(&rest[HEADER_LEN..]) != masked_crc(header) {
            return Err(corrupt(offset, "length checksum mismatch"));
        }

        let mut len_buf = [0u8; HEADER_LEN];
        len_buf.copy_from_slice(header);
        let len = usize::try_from(u64::from_le_bytes(len_buf))
            .map_err(|_| corrupt(offset, "record length overflows"))?;

        let data_start = HEADER_LEN + CRC_LEN;
        let data_end = data_start
            .checked_add(len)
            .filter(|end| end.checked_add(CRC_LEN).is_some_and(|e| e <= rest.len()))
            .ok_or_else(|| corrupt(offset, "truncated record data"))?;

        let data = &rest[data_start..data_end];
        if read_u32(&rest[data_end..]) != masked_crc(data) {
            return Err(corrupt(offset, "data checksum mismatch"));
        }

        records.push(data);
        offset += data_end + CRC_LEN;
    }
    Ok(records)
}

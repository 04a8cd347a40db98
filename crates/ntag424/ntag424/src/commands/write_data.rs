use super::NativeCommand;
use crate::constants::{WRITE_CHUNK_SIZE, ins};
use crate::error::FormatError;
use crate::types::CommMode;

/// One WriteData APDU of a chunked write
#[derive(Debug, Clone)]
pub struct WriteChunk {
    /// File offset of the chunk
    pub offset: u32,
    /// The command
    pub command: NativeCommand,
}

/// Split a write into WriteData commands of at most [`WRITE_CHUNK_SIZE`] bytes
///
/// Header per chunk: `FileNo || Offset (LE24) || Length (LE24)`.
pub fn write_data(
    file_no: u8,
    offset: u32,
    data: &[u8],
    mode: CommMode,
) -> Result<Vec<WriteChunk>, FormatError> {
    let end = offset as usize + data.len();
    if end > 0x00FF_FFFF {
        return Err(FormatError::OutOfBounds {
            field: "write",
            offset: offset as usize,
            len: data.len(),
            size: 0x00FF_FFFF,
        });
    }

    let chunks = data
        .chunks(WRITE_CHUNK_SIZE)
        .enumerate()
        .map(|(i, chunk)| {
            let chunk_offset = offset + (i * WRITE_CHUNK_SIZE) as u32;
            let mut header = vec![file_no];
            header.extend_from_slice(&chunk_offset.to_le_bytes()[..3]);
            header.extend_from_slice(&(chunk.len() as u32).to_le_bytes()[..3]);
            WriteChunk {
                offset: chunk_offset,
                command: NativeCommand::new(ins::WRITE_DATA, mode)
                    .with_header(header)
                    .with_data(chunk.to_vec()),
            }
        })
        .collect();
    Ok(chunks)
}

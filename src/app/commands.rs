//! Inbound command bytes.
//!
//! Both channels speak single raw bytes; these enums are the decoded form
//! the transfer layer dispatches on. Unknown bytes decode to `Err(byte)`
//! and are ignored by the callers.

/// Serial link commands (raw binary values 1–5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialCommand {
    /// Reply with the config summary and rewind the download cursor.
    Summary,
    /// Acquire, persist, reply with a status byte.
    AcquireAndSave,
    /// Acquire and stream the points without persisting.
    AcquireAndStream,
    /// Stream the dataset under the descending cursor.
    DownloadNext,
    /// Delete every dataset, reply with a status byte.
    DeleteAll,
}

impl TryFrom<u8> for SerialCommand {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        match byte {
            1 => Ok(Self::Summary),
            2 => Ok(Self::AcquireAndSave),
            3 => Ok(Self::AcquireAndStream),
            4 => Ok(Self::DownloadNext),
            5 => Ok(Self::DeleteAll),
            other => Err(other),
        }
    }
}

/// Wireless link commands (ASCII digits).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkCommand {
    /// `'0'`: reply with the staged dataset's metadata.
    Metadata,
    /// `'1'`: send the next burst of chunks.
    NextChunks,
    /// `'2'`: delete every dataset.
    DeleteAll,
}

impl TryFrom<u8> for LinkCommand {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        match byte {
            b'0' => Ok(Self::Metadata),
            b'1' => Ok(Self::NextChunks),
            b'2' => Ok(Self::DeleteAll),
            other => Err(other),
        }
    }
}

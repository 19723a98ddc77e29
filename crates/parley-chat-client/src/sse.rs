//! Line framing for `text/event-stream` bodies.
//!
//! Only `data: ` lines carry payload. Chunks may split anywhere, including in
//! the middle of the prefix or of a multi-byte character, so the decoder
//! buffers raw bytes and only looks at a line once its newline has arrived.

pub const DATA_PREFIX: &str = "data: ";

#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buffer: Vec<u8>,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns the payloads of every `data: ` line it
    /// completed, in wire order. The trailing partial line is held back.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        // The carried-over bytes hold no newline, so only the new chunk is scanned.
        let carried = self.buffer.len();
        self.buffer.extend_from_slice(chunk);

        let Some(last_newline) = chunk
            .iter()
            .rposition(|byte| *byte == b'\n')
            .map(|index| carried + index)
        else {
            return Vec::new();
        };

        let complete = self.buffer.drain(..=last_newline).collect::<Vec<u8>>();
        complete
            .split(|byte| *byte == b'\n')
            .filter_map(data_payload)
            .collect()
    }

    /// Decodes what is left once the transport has ended. A final line
    /// without its newline is complete at this point.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        data_payload(&rest)
    }

    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let payload = line.strip_prefix(DATA_PREFIX.as_bytes())?;
    Some(String::from_utf8_lossy(payload).into_owned())
}

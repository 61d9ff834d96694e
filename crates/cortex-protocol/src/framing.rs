//! Incremental decoder for `data:`-line event streams.
//!
//! Network chunks split frames at arbitrary byte offsets, including in the
//! middle of a multi-byte character. The decoder is a small state machine:
//!
//! 1. append the chunk to a byte buffer,
//! 2. split off every complete line (terminated by `\n`),
//! 3. keep the unterminated remainder for the next chunk.
//!
//! Complete lines are folded into the pending frame (`event:` sets the name,
//! `data:` appends a payload line) and a blank line dispatches it. Comments
//! (`:` prefix) and unknown fields are ignored.

/// A fully decoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Value of the `event:` field, if the frame was named.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

/// Stateful decoder; feed it chunks in arrival order.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Bytes of the current, not yet terminated line.
    buffer: Vec<u8>,
    /// Name of the frame being accumulated.
    event: Option<String>,
    /// Data lines of the frame being accumulated.
    data: Vec<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns every frame completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let line = decode_line(&self.buffer[start..end]);
            start = end + 1;
            if let Some(frame) = self.feed_line(&line) {
                frames.push(frame);
            }
        }
        self.buffer.drain(..start);
        frames
    }

    /// Flush at end of stream.
    ///
    /// A trailing line without a newline is processed, and a frame whose
    /// closing blank line never arrived is still emitted.
    pub fn finish(&mut self) -> Option<Frame> {
        if !self.buffer.is_empty() {
            let line = decode_line(&self.buffer);
            self.buffer.clear();
            if let Some(frame) = self.feed_line(&line) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    /// Bytes held back waiting for the rest of their line.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    fn feed_line(&mut self, line: &str) -> Option<Frame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<Frame> {
        let event = self.event.take();
        if self.data.is_empty() {
            // A name without payload carries nothing to deliver.
            return None;
        }
        let data = self.data.join("\n");
        self.data.clear();
        Some(Frame { event, data })
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

//! Incremental decoder for `data:` framed event streams
//!
//! Bytes are buffered until a full line is available, so chunk boundaries may
//! fall anywhere, including inside a multi-byte character.

/// One decoded record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Payload of a `data:` record
    Data(String),
    /// The `[DONE]` terminator
    Done,
}

/// How records are delimited on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// A blank line ends a record; multiple `data:` lines are joined with `\n`
    BlankLine,
    /// Every `data:` line is a record of its own
    Line,
}

const DONE_SENTINEL: &str = "[DONE]";

/// Incremental frame decoder
///
/// Feed chunks with [`FrameDecoder::feed`] and drain complete frames with
/// [`FrameDecoder::frames`] after each one. Once the input is exhausted,
/// [`FrameDecoder::finish`] flushes a trailing record that was never
/// terminated.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    /// Start of the first unconsumed line in `buf`
    start: usize,
    /// Bytes before this offset are known to hold no `\n`
    scanned: usize,
    data: Vec<String>,
    boundary: Boundary,
    eof: bool,
    done: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Decoder for server-sent events (`data: ...\n\n`)
    pub fn new() -> Self {
        Self::with_boundary(Boundary::BlankLine)
    }

    pub fn with_boundary(boundary: Boundary) -> Self {
        Self {
            buf: Vec::new(),
            start: 0,
            scanned: 0,
            data: Vec::new(),
            boundary,
            eof: false,
            done: false,
        }
    }

    /// Append a chunk received from the network
    pub fn feed(&mut self, chunk: &[u8]) {
        if self.done || self.eof {
            return;
        }
        // Consumed lines are dropped once per chunk, not once per line
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.scanned -= self.start;
            self.start = 0;
        }
        self.buf.extend_from_slice(chunk);
    }

    /// Mark end of input and flush what is left.
    ///
    /// Returns the first remaining frame; any further ones come from
    /// `next_frame`.
    pub fn finish(&mut self) -> Option<Frame> {
        self.eof = true;
        self.next_frame()
    }

    /// Next complete frame, or `None` until more input arrives
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if self.done {
                return None;
            }

            let newline = self.buf[self.scanned..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|offset| self.scanned + offset);

            let line = if let Some(end) = newline {
                let line = self.buf[self.start..end].to_vec();
                self.start = end + 1;
                self.scanned = self.start;
                line
            } else if self.eof && self.start < self.buf.len() {
                let line = self.buf[self.start..].to_vec();
                self.start = self.buf.len();
                self.scanned = self.start;
                line
            } else if self.eof {
                return self.dispatch();
            } else {
                self.scanned = self.buf.len();
                return None;
            };

            let line = match line.strip_suffix(b"\r") {
                Some(stripped) => stripped,
                None => &line,
            };

            if let Some(frame) = self.process_line(line) {
                return Some(frame);
            }
        }
    }

    /// Borrowing iterator over the frames currently available
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { decoder: self }
    }

    fn process_line(&mut self, line: &[u8]) -> Option<Frame> {
        if line.is_empty() {
            return self.dispatch();
        }

        let Ok(line) = std::str::from_utf8(line) else {
            tracing::warn!(len = line.len(), "Skipping stream line with invalid UTF-8");
            return None;
        };

        if line.starts_with(':') {
            // Comment / keep-alive
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => match self.boundary {
                Boundary::Line => return self.frame_for(value.to_string()),
                Boundary::BlankLine => self.data.push(value.to_string()),
            },
            "event" | "id" | "retry" => {}
            _ => {
                tracing::warn!(line = %line, "Skipping malformed stream line");
            }
        }
        None
    }

    fn dispatch(&mut self) -> Option<Frame> {
        if self.data.is_empty() {
            return None;
        }
        let payload = self.data.join("\n");
        self.data.clear();
        self.frame_for(payload)
    }

    fn frame_for(&mut self, payload: String) -> Option<Frame> {
        let trimmed = payload.trim();
        if trimmed == DONE_SENTINEL {
            self.done = true;
            self.buf.clear();
            self.start = 0;
            self.scanned = 0;
            self.data.clear();
            return Some(Frame::Done);
        }
        if trimmed.is_empty() {
            return None;
        }
        Some(Frame::Data(payload))
    }
}

/// Iterator returned by [`FrameDecoder::frames`]
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        self.decoder.next_frame()
    }
}

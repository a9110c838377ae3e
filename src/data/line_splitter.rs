//! Turns raw pipe reads into complete text lines.

/// Longest line kept in one piece; longer runs without a terminator are
/// split at this size so they still reach the buffer.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Per-stream decoder state: a partial UTF-8 sequence and an unterminated
/// line fragment, both carried into the next read.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending_bytes: Vec<u8>,
    partial: String,
    /// Bytes of `partial` already searched for a terminator.
    scanned: usize,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read's bytes and return the lines it completed.
    ///
    /// `\n`, `\r\n` and a lone `\r` all end a line, so progress output
    /// that redraws with carriage returns still shows up.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut data = std::mem::take(&mut self.pending_bytes);
        data.extend_from_slice(bytes);

        let text = match std::str::from_utf8(&data) {
            Ok(s) => s.to_string(),
            Err(e) if e.error_len().is_none() => {
                // Read ended mid code point: keep the tail for next time.
                let valid = e.valid_up_to();
                self.pending_bytes = data[valid..].to_vec();
                String::from_utf8_lossy(&data[..valid]).into_owned()
            }
            Err(_) => String::from_utf8_lossy(&data).into_owned(),
        };
        self.partial.push_str(&text);

        let mut lines = Vec::new();
        let bytes = self.partial.as_bytes();
        let mut start = 0;
        let mut i = self.scanned;
        while i < bytes.len() {
            match bytes[i] {
                b'\n' => {
                    lines.push(self.partial[start..i].to_string());
                    start = i + 1;
                }
                b'\r' => match bytes.get(i + 1) {
                    Some(b'\n') => {
                        lines.push(self.partial[start..i].to_string());
                        i += 1;
                        start = i + 1;
                    }
                    Some(_) => {
                        lines.push(self.partial[start..i].to_string());
                        start = i + 1;
                    }
                    // Could be the first half of `\r\n`; decide next read.
                    None => break,
                },
                _ => {}
            }
            i += 1;
        }
        self.partial.drain(..start);
        self.scanned = i - start;

        while self.partial.len() > MAX_LINE_BYTES {
            let mut cut = MAX_LINE_BYTES;
            while !self.partial.is_char_boundary(cut) {
                cut -= 1;
            }
            let rest = self.partial.split_off(cut);
            lines.push(std::mem::replace(&mut self.partial, rest));
            self.scanned = self.scanned.saturating_sub(cut);
        }
        lines
    }

    /// Stream closed: whatever is left becomes the final line.
    pub fn finish(&mut self) -> Option<String> {
        if !self.pending_bytes.is_empty() {
            let tail = std::mem::take(&mut self.pending_bytes);
            self.partial.push_str(&String::from_utf8_lossy(&tail));
        }
        self.scanned = 0;
        if self.partial.is_empty() {
            None
        } else {
            let mut line = std::mem::take(&mut self.partial);
            if line.ends_with('\r') {
                line.pop();
            }
            Some(line)
        }
    }
}

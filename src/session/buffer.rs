//! Accumulation buffer with tail-search for prompt detection.
//!
//! Only the last N bytes are inspected for completion signals, so large
//! outputs (full configs, routing tables) stay cheap to scan.

/// Buffer accumulating device output between commands.
#[derive(Debug)]
pub struct OutputBuffer {
    buffer: Vec<u8>,

    /// How many bytes from the end to expose for completion scans.
    search_depth: usize,
}

impl OutputBuffer {
    pub fn new(search_depth: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            search_depth,
        }
    }

    /// Append a chunk of device output, stripping ANSI escape sequences
    /// first so cursor movement codes never hide a prompt character.
    pub fn extend(&mut self, data: &[u8]) {
        let cleaned = strip_ansi_escapes::strip(data);
        self.buffer.extend_from_slice(&cleaned);
    }

    /// The last `search_depth` bytes of the buffer.
    pub fn tail(&self) -> &[u8] {
        let start = self.buffer.len().saturating_sub(self.search_depth);
        &self.buffer[start..]
    }

    /// Take the accumulated output as text, resetting the buffer.
    pub fn take_string(&mut self) -> String {
        let data = std::mem::take(&mut self.buffer);
        String::from_utf8_lossy(&data).into_owned()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_extend() {
        let mut buffer = OutputBuffer::new(100);
        buffer.extend(b"display version\r\nVRP software");
        assert_eq!(buffer.as_slice(), b"display version\r\nVRP software");
    }

    #[test]
    fn test_ansi_stripping() {
        let mut buffer = OutputBuffer::new(100);
        buffer.extend(b"\x1b[32m<Switch>\x1b[0m");
        assert_eq!(buffer.as_slice(), b"<Switch>");
    }

    #[test]
    fn test_tail_window() {
        let mut buffer = OutputBuffer::new(10);
        buffer.extend(&[b'x'; 100]);
        buffer.extend(b"\n[SW-1]");
        let tail = buffer.tail();
        assert_eq!(tail.len(), 10);
        assert!(tail.ends_with(b"[SW-1]"));
    }

    #[test]
    fn test_take_resets() {
        let mut buffer = OutputBuffer::new(100);
        buffer.extend(b"output");
        assert_eq!(buffer.take_string(), "output");
        assert!(buffer.is_empty());
    }
}

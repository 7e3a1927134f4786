use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

/// Number of container log lines kept for display.
pub const LOG_LINE_CAPACITY: usize = 10;

/// Longest line kept, in bytes. Output past this is dropped up to the next newline.
pub const MAX_LINE_BYTES: usize = 8 * 1024;

/// Appended to a line whose tail was dropped.
pub const TRUNCATED_MARKER: &str = " [truncated]";

/// One complete line of container output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub stderr: bool,
    pub text: String,
}

/// Shared, bounded buffer of the most recent container output lines.
///
/// Lines from both streams interleave in the order they were completed.
/// Cloning shares the same buffer.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    lines: Arc<Mutex<VecDeque<LogLine>>>,
    capacity: usize,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::with_capacity(LOG_LINE_CAPACITY)
    }
}

impl LogBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Sink for standard output bytes.
    pub fn stdout(&self) -> LogSink {
        LogSink::new(self.clone(), false)
    }

    /// Sink for standard error bytes.
    pub fn stderr(&self) -> LogSink {
        LogSink::new(self.clone(), true)
    }

    /// Copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<LogLine> {
        self.lines
            .lock()
            .map(|lines| lines.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn append(&self, batch: Vec<LogLine>) {
        if batch.is_empty() || self.capacity == 0 {
            return;
        }
        if let Ok(mut lines) = self.lines.lock() {
            for line in batch {
                if lines.len() == self.capacity {
                    lines.pop_front();
                }
                lines.push_back(line);
            }
        }
    }
}

/// Write end for one stream. Splits arbitrary chunks into lines.
///
/// A trailing partial line is held back until the next chunk from the same
/// sink completes it; whatever is still pending when the sink is dropped is
/// appended as a final line. A partial line never holds more than
/// [`MAX_LINE_BYTES`].
#[derive(Debug)]
pub struct LogSink {
    buffer: LogBuffer,
    stderr: bool,
    pending: Vec<u8>,
    truncated: bool,
}

impl LogSink {
    fn new(buffer: LogBuffer, stderr: bool) -> Self {
        Self {
            buffer,
            stderr,
            pending: Vec::new(),
            truncated: false,
        }
    }

    pub fn is_stderr(&self) -> bool {
        self.stderr
    }

    /// Feed a chunk of raw output.
    pub fn push(&mut self, chunk: &[u8]) {
        let mut batch = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            self.hold(&rest[..pos]);
            batch.push(self.take_line());
            rest = &rest[pos + 1..];
        }
        self.hold(rest);
        self.buffer.append(batch);
    }

    fn hold(&mut self, bytes: &[u8]) {
        let room = MAX_LINE_BYTES.saturating_sub(self.pending.len());
        if bytes.len() > room {
            self.pending.extend_from_slice(&bytes[..room]);
            self.truncated = true;
        } else {
            self.pending.extend_from_slice(bytes);
        }
    }

    fn take_line(&mut self) -> LogLine {
        let mut bytes = std::mem::take(&mut self.pending);
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        let mut text = String::from_utf8_lossy(&bytes).into_owned();
        if std::mem::take(&mut self.truncated) {
            text.push_str(TRUNCATED_MARKER);
        }
        LogLine {
            stderr: self.stderr,
            text,
        }
    }
}

impl io::Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.push(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for LogSink {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            let line = self.take_line();
            self.buffer.append(vec![line]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn texts(buffer: &LogBuffer) -> Vec<String> {
        buffer.snapshot().into_iter().map(|l| l.text).collect()
    }

    #[test]
    fn whole_line_in_one_write() {
        let buffer = LogBuffer::default();
        let mut out = buffer.stdout();
        out.push(b"hello\n");
        assert_eq!(
            buffer.snapshot(),
            vec![LogLine {
                stderr: false,
                text: "hello".into()
            }]
        );
    }

    #[test]
    fn line_split_across_writes_is_reassembled() {
        let buffer = LogBuffer::default();
        let mut out = buffer.stdout();
        out.push(b"he");
        assert!(buffer.snapshot().is_empty());
        out.push(b"llo\nwor");
        out.push(b"ld\n");
        assert_eq!(texts(&buffer), vec!["hello", "world"]);
    }

    #[test]
    fn byte_at_a_time_matches_single_write() {
        let input = b"alpha\nbeta\r\n\ngamma\n";

        let whole = LogBuffer::default();
        whole.stdout().push(input);

        let bytewise = LogBuffer::default();
        let mut sink = bytewise.stdout();
        for b in input {
            sink.push(std::slice::from_ref(b));
        }
        drop(sink);

        assert_eq!(whole.snapshot(), bytewise.snapshot());
        assert_eq!(texts(&whole), vec!["alpha", "beta", "", "gamma"]);
    }

    #[test]
    fn unterminated_fragment_flushed_on_drop() {
        let buffer = LogBuffer::default();
        {
            let mut err = buffer.stderr();
            err.push(b"done\nexiting");
        }
        assert_eq!(texts(&buffer), vec!["done", "exiting"]);
        assert!(buffer.snapshot().iter().all(|l| l.stderr));
    }

    #[test]
    fn fragments_are_kept_per_stream() {
        let buffer = LogBuffer::default();
        let mut out = buffer.stdout();
        let mut err = buffer.stderr();
        out.push(b"out-");
        err.push(b"err-");
        err.push(b"line\n");
        out.push(b"line\n");
        assert_eq!(
            buffer.snapshot(),
            vec![
                LogLine {
                    stderr: true,
                    text: "err-line".into()
                },
                LogLine {
                    stderr: false,
                    text: "out-line".into()
                },
            ]
        );
    }

    #[test]
    fn capacity_evicts_oldest_across_streams() {
        let buffer = LogBuffer::default();
        let mut out = buffer.stdout();
        let mut err = buffer.stderr();
        let mut expected = Vec::new();
        for i in 0..25 {
            let text = format!("line {i}");
            if i % 3 == 0 {
                err.push(format!("{text}\n").as_bytes());
            } else {
                out.push(format!("{text}\n").as_bytes());
            }
            expected.push(text);

            let snapshot = texts(&buffer);
            assert!(snapshot.len() <= LOG_LINE_CAPACITY);
            assert!(expected.ends_with(&snapshot), "snapshot must be a suffix");
        }
        assert_eq!(texts(&buffer).first().map(String::as_str), Some("line 15"));
    }

    #[test]
    fn endless_line_is_capped_and_marked() {
        let buffer = LogBuffer::default();
        let mut out = buffer.stdout();
        let chunk = vec![b'#'; 1024 * 1024];
        for _ in 0..64 {
            out.push(&chunk);
            assert!(out.pending.len() <= MAX_LINE_BYTES);
        }
        out.push(b"tail\nnext\n");

        let lines = texts(&buffer);
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            format!("{}{TRUNCATED_MARKER}", "#".repeat(MAX_LINE_BYTES))
        );
        assert_eq!(lines[1], "next");
    }

    #[test]
    fn line_at_cap_is_not_marked() {
        let buffer = LogBuffer::default();
        let mut out = buffer.stdout();
        out.push(&vec![b'a'; MAX_LINE_BYTES]);
        out.push(b"\n");
        assert_eq!(texts(&buffer), vec!["a".repeat(MAX_LINE_BYTES)]);
    }

    #[test]
    fn snapshot_does_not_consume() {
        let buffer = LogBuffer::default();
        buffer.stdout().push(b"a\nb\n");
        assert_eq!(buffer.snapshot(), buffer.snapshot());
        assert_eq!(buffer.snapshot().len(), 2);
    }

    #[test]
    fn io_write_feeds_lines() {
        let buffer = LogBuffer::default();
        let mut out = buffer.stdout();
        write!(out, "x = {}\ny = {}\n", 1, 2).unwrap();
        assert_eq!(texts(&buffer), vec!["x = 1", "y = 2"]);
    }

    #[test]
    fn concurrent_writers_never_tear_lines() {
        let buffer = LogBuffer::default();
        let handles: Vec<_> = [buffer.stdout(), buffer.stderr()]
            .into_iter()
            .map(|mut sink| {
                std::thread::spawn(move || {
                    let tag = if sink.is_stderr() { "err" } else { "out" };
                    for i in 0..500 {
                        sink.push(format!("{tag} {i:04}").as_bytes());
                        sink.push(b"\n");
                    }
                })
            })
            .collect();

        let reader = buffer.clone();
        let watcher = std::thread::spawn(move || {
            for _ in 0..200 {
                for line in reader.snapshot() {
                    let tag = if line.stderr { "err" } else { "out" };
                    assert!(line.text.starts_with(tag));
                    assert_eq!(line.text.len(), 8);
                }
            }
        });

        for h in handles {
            h.join().unwrap();
        }
        watcher.join().unwrap();

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.len(), LOG_LINE_CAPACITY);
        for stream in [false, true] {
            let ours: Vec<_> = snapshot.iter().filter(|l| l.stderr == stream).collect();
            for pair in ours.windows(2) {
                assert!(pair[0].text < pair[1].text, "per-stream order preserved");
            }
        }
    }
}

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

/// Escapes one column of a profile event: the separator and the escape
/// character itself are prefixed with `\`.
pub fn escape_event_column(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for character in text.chars() {
        if character == ';' || character == '\\' {
            out.push('\\');
        }
        out.push(character);
    }
    out
}

/// Sink for the evaluation profile: one event per line, semicolon
/// separated, the keyword column first.
pub struct ProfileSink {
    out: Mutex<Box<dyn Write + Send>>,
    start: Instant,
}

impl ProfileSink {
    pub fn to_path(path: &Path) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Self::from_writer(Box::new(BufWriter::new(file)))
    }

    pub fn from_writer(writer: Box<dyn Write + Send>) -> std::io::Result<Self> {
        let sink = Self {
            out: Mutex::new(writer),
            start: Instant::now(),
        };
        sink.event("@start-debug");
        Ok(sink)
    }

    /// Seconds since the sink was opened.
    pub fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    pub fn event(&self, line: &str) {
        let mut out = self.out.lock().unwrap();
        // Profile loss is not worth failing a run over.
        let _ = writeln!(out, "{}", line);
        let _ = out.flush();
    }

    /// A `@t-…`/`@c-…` event: the message columns followed by start, end
    /// and elapsed seconds.
    pub fn timer_event(&self, message: &str, start: f64, end: f64) {
        self.event(&format!("{};{};{};{}", message, start, end, end - start));
    }

    /// A `@n-…` event: the message columns followed by a tuple count.
    pub fn size_event(&self, message: &str, tuples: usize) {
        self.event(&format!("{};{}", message, tuples));
    }
}

#[cfg(test)]
mod tests {
    use super::escape_event_column;

    #[test]
    fn test_escape_event_column() {
        assert_eq!(escape_event_column("plain"), "plain");
        assert_eq!(escape_event_column("a;b"), "a\\;b");
        assert_eq!(escape_event_column("a\\b"), "a\\\\b");
    }
}

//! Console I/O for interrupt services
//!
//! Every print/input service goes through [`Console`], shared by all cores.

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::sync::Mutex;

/// Text console used by `intr0` print/input services
pub trait Console: Send + Sync {
    /// Write text without a trailing newline
    fn write_str(&self, text: &str) -> io::Result<()>;

    /// Read one line, without the line terminator. `None` at end of input.
    fn read_line(&self) -> io::Result<Option<String>>;

    fn flush(&self) -> io::Result<()>;
}

/// Process stdin/stdout
#[derive(Debug, Default)]
pub struct StdConsole;

impl Console for StdConsole {
    fn write_str(&self, text: &str) -> io::Result<()> {
        io::stdout().lock().write_all(text.as_bytes())
    }

    fn read_line(&self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(strip_newline(line)))
    }

    fn flush(&self) -> io::Result<()> {
        io::stdout().flush()
    }
}

/// In-memory console: captures output, serves scripted input
#[derive(Debug, Default)]
pub struct BufferConsole {
    output: Mutex<String>,
    input: Mutex<VecDeque<String>>,
}

impl BufferConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Console with queued input lines
    pub fn with_input<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            output: Mutex::new(String::new()),
            input: Mutex::new(lines.into_iter().map(Into::into).collect()),
        }
    }

    /// Everything written so far
    pub fn output(&self) -> String {
        self.output.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Console for BufferConsole {
    fn write_str(&self, text: &str) -> io::Result<()> {
        self.output
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_str(text);
        Ok(())
    }

    fn read_line(&self) -> io::Result<Option<String>> {
        Ok(self
            .input
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front())
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

fn strip_newline(mut line: String) -> String {
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_console() {
        let console = BufferConsole::with_input(["42", "x"]);
        console.write_str("a").unwrap();
        console.write_str("b\n").unwrap();
        assert_eq!(console.output(), "ab\n");
        assert_eq!(console.read_line().unwrap().as_deref(), Some("42"));
        assert_eq!(console.read_line().unwrap().as_deref(), Some("x"));
        assert_eq!(console.read_line().unwrap(), None);
    }

    #[test]
    fn test_strip_newline() {
        assert_eq!(strip_newline("abc\r\n".into()), "abc");
        assert_eq!(strip_newline("abc".into()), "abc");
    }
}

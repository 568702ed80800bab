//! Full-screen terminal output for rendered frames.

use std::io::{self, IsTerminal, Stdout, Write};

use deploywatch_poller::DashboardSink;

const ENTER_ALT_SCREEN: &[u8] = b"\x1b[?1049h\x1b[?25l";
const LEAVE_ALT_SCREEN: &[u8] = b"\x1b[?25h\x1b[?1049l";
const CLEAR: &[u8] = b"\x1b[H\x1b[2J";

pub const TITLE: &str = "deploywatch (Ctrl-C to quit)";

/// Redraws the whole screen on every frame. The terminal is restored on drop.
pub struct TerminalSink<W: Write> {
    out: W,
}

impl TerminalSink<Stdout> {
    /// Take over stdout. Fails when stdout is not a terminal.
    pub fn stdout() -> io::Result<Self> {
        let out = io::stdout();
        if !out.is_terminal() {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "stdout is not a terminal",
            ));
        }
        Self::new(out)
    }
}

impl<W: Write> TerminalSink<W> {
    pub fn new(mut out: W) -> io::Result<Self> {
        out.write_all(ENTER_ALT_SCREEN)?;
        out.write_all(CLEAR)?;
        writeln!(out, "{TITLE}")?;
        out.flush()?;
        Ok(Self { out })
    }
}

impl<W: Write + Send + 'static> DashboardSink for TerminalSink<W> {
    fn show(&mut self, frame: &[u8]) -> io::Result<()> {
        let mut screen = Vec::with_capacity(CLEAR.len() + TITLE.len() + frame.len() + 2);
        screen.extend_from_slice(CLEAR);
        screen.extend_from_slice(TITLE.as_bytes());
        screen.extend_from_slice(b"\n\n");
        screen.extend_from_slice(frame);
        self.out.write_all(&screen)?;
        self.out.flush()
    }
}

impl<W: Write> Drop for TerminalSink<W> {
    fn drop(&mut self) {
        let _ = self.out.write_all(LEAVE_ALT_SCREEN);
        let _ = self.out.flush();
    }
}

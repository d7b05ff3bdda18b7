use std::io::{self, Write};
use std::sync::Mutex;
use survey_core::driver::ChatView;
use tracing::warn;

pub const BOT_LABEL: &str = "Bot: ";
pub const USER_LABEL: &str = "You: ";
pub const THINKING: &str = "(thinking...)";
pub const INPUT_PROMPT: &str = "> ";

/// Renders the conversation as plain text lines.
pub struct TerminalView<W> {
    out: Mutex<W>,
}

impl<W: Write> TerminalView<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, write: impl FnOnce(&mut W) -> io::Result<()>) {
        let mut out = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = write(&mut out).and_then(|_| out.flush()) {
            warn!("Failed to write to terminal: {}", e);
        }
    }
}

impl<W: Write + Send> ChatView for TerminalView<W> {
    fn show_user_message(&self, text: &str) {
        self.emit(|out| writeln!(out, "{}{}", USER_LABEL, text));
    }

    fn begin_bot_message(&self) {
        self.emit(|out| write!(out, "{}", BOT_LABEL));
    }

    fn append_bot_text(&self, text: &str) {
        self.emit(|out| write!(out, "{}", text));
    }

    fn end_bot_message(&self) {
        self.emit(|out| writeln!(out));
    }

    fn show_thinking(&self) {
        self.emit(|out| writeln!(out, "{}", THINKING));
    }

    // Nothing to erase on a line-based terminal.
    fn hide_thinking(&self) {}

    fn notice(&self, text: &str) {
        self.emit(|out| writeln!(out, "[{}]", text));
    }

    fn set_input_enabled(&self, enabled: bool) {
        if enabled {
            self.emit(|out| write!(out, "{}", INPUT_PROMPT));
        }
    }
}

use std::io::{self, Write};
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{self, ClearType};
use crossterm::{cursor, queue};

use crate::common::{FaceAuthError, Result};
use crate::enroll::flow::{CapturePrompt, EnrollEvent, PromptAction};

/// Interactive prompt: SPACE or ENTER captures, ESC, `q` or Ctrl-C cancels.
///
/// Raw mode is enabled for the lifetime of the prompt and restored on drop.
/// The bottom line shows a live face-count status for the preview.
pub struct TerminalPrompt {
    poll_interval: Duration,
    status: Option<String>,
}

impl TerminalPrompt {
    pub fn new() -> Result<Self> {
        terminal::enable_raw_mode()
            .map_err(|e| FaceAuthError::Other(anyhow::anyhow!("Failed to enable raw mode: {}", e)))?;
        Ok(Self { poll_interval: Duration::from_millis(30), status: None })
    }

    fn clear_status(&self, stdout: &mut io::Stdout) {
        let _ = queue!(stdout, cursor::MoveToColumn(0), terminal::Clear(ClearType::CurrentLine));
    }

    fn line(&mut self, text: &str) {
        let mut stdout = io::stdout();
        self.clear_status(&mut stdout);
        // Raw mode needs explicit carriage returns.
        let _ = write!(stdout, "{}\r\n", text);
        if let Some(status) = &self.status {
            let _ = write!(stdout, "{}", status);
        }
        let _ = stdout.flush();
    }

    fn show_status(&mut self, status: String) {
        if self.status.as_deref() == Some(status.as_str()) {
            return;
        }
        let mut stdout = io::stdout();
        self.clear_status(&mut stdout);
        let _ = write!(stdout, "{}", status);
        let _ = stdout.flush();
        self.status = Some(status);
    }
}

fn preview_status(faces: Option<usize>) -> String {
    match faces {
        None => "  [camera frame unavailable]".to_string(),
        Some(0) => "  [no face detected]".to_string(),
        Some(1) => "  [face detected, press SPACE]".to_string(),
        Some(n) => format!("  [{} faces detected, need exactly one]", n),
    }
}

fn action_for(key: &KeyEvent) -> Option<PromptAction> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Char(' ') | KeyCode::Enter => Some(PromptAction::Capture),
        KeyCode::Esc | KeyCode::Char('q') => Some(PromptAction::Cancel),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(PromptAction::Cancel)
        }
        _ => None,
    }
}

impl CapturePrompt for TerminalPrompt {
    fn next_action(&mut self) -> Result<Option<PromptAction>> {
        let input_error =
            |e: io::Error| FaceAuthError::Other(anyhow::anyhow!("Failed to read input: {}", e));

        if !event::poll(self.poll_interval).map_err(input_error)? {
            return Ok(Some(PromptAction::Wait));
        }
        if let Event::Key(key) = event::read().map_err(input_error)? {
            if let Some(action) = action_for(&key) {
                return Ok(Some(action));
            }
        }
        Ok(Some(PromptAction::Wait))
    }

    fn notify(&mut self, event: &EnrollEvent<'_>) {
        match event {
            EnrollEvent::Started { username, required } => {
                self.line(&format!("Enrolling '{}': {} samples needed.", username, required));
                self.line("Look at the camera and press SPACE to capture, ESC to cancel.");
            }
            EnrollEvent::Preview { faces } => self.show_status(preview_status(*faces)),
            EnrollEvent::SampleAccepted { collected, required } => {
                self.line(&format!("  Captured {}/{}", collected, required));
            }
            EnrollEvent::SampleRejected { reason, .. } => {
                self.line(&format!("  Capture failed ({}), try again", reason));
            }
            EnrollEvent::Completed { path } => {
                self.status = None;
                self.line(&format!("Saved signature to {}", path.display()));
            }
        }
    }
}

impl Drop for TerminalPrompt {
    fn drop(&mut self) {
        if self.status.is_some() {
            let _ = write!(io::stdout(), "\r\n");
        }
        let _ = terminal::disable_raw_mode();
    }
}

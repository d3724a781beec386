//! User-visible alerts for phase changes.
//!
//! Alerts are best-effort: the controller logs a failed [`Notifier::notify`]
//! and carries on.

use std::{
    io::{self, Write},
    sync::Mutex,
};

use anyhow::{Context, Result};

pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, title: &str, message: &str) -> Result<()>;
}

/// Writes the alert to the process log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, message: &str) -> Result<()> {
        log::info!("{title}: {message}");
        Ok(())
    }
}

/// Used when notifications are switched off in settings.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn notify(&self, _title: &str, _message: &str) -> Result<()> {
        Ok(())
    }
}

/// Emits terminal bell plus OSC 9 / 777 / 99 desktop notification codes to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify(&self, title: &str, message: &str) -> Result<()> {
        let mut stdout = io::stdout().lock();
        stdout
            .write_all(terminal_sequences(title, message).as_bytes())
            .context("failed to write terminal notification")?;
        stdout.flush().context("failed to flush terminal notification")?;
        log::info!("{title}: {message}");
        Ok(())
    }
}

fn terminal_sequences(title: &str, message: &str) -> String {
    let title = escape_osc(title);
    let message = escape_osc(message);
    let mut out = String::from("\x07");
    out.push_str(&format!("\x1b]9;{message}\x07"));
    out.push_str(&format!("\x1b]777;notify;{title};{message}\x07"));
    out.push_str(&format!(
        "\x1b]99;i=1:d=0:p=title;{title}\x1b\\\x1b]99;i=1:d=0:p=body;{message}\x1b\\"
    ));
    out
}

// OSC payloads end at BEL or ST.
fn escape_osc(text: &str) -> String {
    text.replace(|c: char| matches!(c, '\x07' | '\x1b' | '\r'), "").replace('\n', " ")
}

/// Keeps every alert in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
    failing: Mutex<bool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        match self.failing.lock() {
            Ok(mut guard) => *guard = failing,
            Err(poisoned) => *poisoned.into_inner() = failing,
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        match self.sent.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, title: &str, message: &str) -> Result<()> {
        let failing = match self.failing.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };
        if failing {
            anyhow::bail!("alerts unavailable");
        }
        let mut sent = match self.sent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sent.push((title.to_string(), message.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_payload_strips_terminators() {
        let out = terminal_sequences("Done\x07", "line one\nline two\x1b");
        assert!(out.starts_with('\x07'));
        assert!(out.contains("\x1b]9;line one line two\x07"));
        assert!(out.contains("\x1b]777;notify;Done;line one line two\x07"));
    }

    #[test]
    fn recording_notifier_can_fail() {
        let notifier = RecordingNotifier::new();
        notifier.notify("a", "b").unwrap();
        notifier.set_failing(true);
        assert!(notifier.notify("c", "d").is_err());
        assert_eq!(notifier.sent(), vec![("a".to_string(), "b".to_string())]);
    }
}

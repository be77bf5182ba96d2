/// Side channel for cycle-level failures.
///
/// Per-spot problems are only logged; a notice goes out when the whole
/// cycle could not complete (shared grid unavailable, output or state
/// could not be written).

use crate::model::ForecastError;
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::{error, warn};

pub trait Notifier: Send + Sync {
    fn notify(&self, subject: &str, body: &str) -> Result<(), ForecastError>;
}

/// Writes the notice to the log at error level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, subject: &str, body: &str) -> Result<(), ForecastError> {
        error!(subject, body, "cycle notice");
        Ok(())
    }
}

/// Pipes an RFC 822 message into `sendmail -t -i`.
#[derive(Debug, Clone)]
pub struct SendmailNotifier {
    program: String,
    from: String,
    to: String,
}

impl SendmailNotifier {
    pub fn new(program: &str, from: &str, to: &str) -> Self {
        Self {
            program: program.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn render(&self, subject: &str, body: &str) -> String {
        format!(
            "From: {}\nTo: {}\nSubject: {}\nContent-Type: text/plain; charset=utf-8\n\n{}\n",
            self.from, self.to, subject, body
        )
    }
}

impl Notifier for SendmailNotifier {
    fn notify(&self, subject: &str, body: &str) -> Result<(), ForecastError> {
        let fail = |what: String| ForecastError::Persistence(format!("sendmail: {}", what));

        let mut child = Command::new(&self.program)
            .args(["-t", "-i"])
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| fail(format!("cannot run {}: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(self.render(subject, body).as_bytes())
                .map_err(|e| fail(e.to_string()))?;
        }

        let status = child.wait().map_err(|e| fail(e.to_string()))?;
        if !status.success() {
            warn!(%status, "sendmail exited with failure");
            return Err(fail(format!("exit status {}", status)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_message() {
        let notifier = SendmailNotifier::new("/usr/sbin/sendmail", "wavecast@example.org", "ops@example.org");
        let msg = notifier.render("wavecast notice", "wave grid unavailable");

        assert!(msg.starts_with("From: wavecast@example.org\nTo: ops@example.org\nSubject: wavecast notice\n"));
        assert!(msg.ends_with("\n\nwave grid unavailable\n"));
    }

    #[test]
    fn test_missing_sendmail_is_reported() {
        let notifier = SendmailNotifier::new("/nonexistent/sendmail", "a@example.org", "b@example.org");
        assert!(notifier.notify("subject", "body").is_err());
    }

    #[test]
    fn test_log_notifier_never_fails() {
        assert!(LogNotifier.notify("subject", "body").is_ok());
    }
}

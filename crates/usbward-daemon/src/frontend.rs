//! Subprocess consent front-end.
//!
//! The daemon does not render UI. It launches a configured front-end
//! program per consent request, writes the structured device summary as
//! JSON to the child's stdin, and reads a single JSON response object from
//! its stdout:
//!
//! ```text
//! daemon                         front-end process
//!   |                                  |
//!   |  -- ConsentSummary (stdin) -->   |
//!   |          ... operator ...        |
//!   |  <-- ConsentResponse (stdout) -- |
//! ```
//!
//! Cancellation is signaled either by an explicit `{"canceled": true}`
//! response or by empty output (the operator closed the dialog). The call
//! blocks until the front-end exits; no timeout is applied here.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use serde::Deserialize;
use tracing::debug;
use usbward_core::consent::{
    ConsentError, ConsentProvider, ConsentReply, ConsentResponse, ConsentSummary,
};

/// Consent provider backed by an external front-end command.
#[derive(Debug)]
pub struct CommandFrontend {
    program: PathBuf,
}

impl CommandFrontend {
    /// Creates a provider launching `program` per request.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

/// On-the-wire response document: [`ConsentResponse`] plus the explicit
/// cancellation marker.
#[derive(Debug, Deserialize)]
struct FrontendResponse {
    #[serde(default)]
    canceled: bool,
    #[serde(flatten)]
    response: ConsentResponse,
}

impl ConsentProvider for CommandFrontend {
    fn request_consent(&mut self, summary: &ConsentSummary) -> Result<ConsentReply, ConsentError> {
        let request = serde_json::to_vec(summary).map_err(|e| ConsentError::Malformed {
            reason: format!("summary serialization: {e}"),
        })?;

        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(ConsentError::Launch)?;

        {
            let mut stdin = child.stdin.take().ok_or_else(|| {
                ConsentError::Exchange(std::io::Error::other("front-end stdin unavailable"))
            })?;
            stdin.write_all(&request).map_err(ConsentError::Exchange)?;
            // Closing stdin tells the front-end the summary is complete.
        }

        let output = child.wait_with_output().map_err(ConsentError::Exchange)?;
        if !output.status.success() {
            return Err(ConsentError::Frontend {
                status: output.status.to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            debug!(program = %self.program.display(), "front-end returned nothing, treating as canceled");
            return Ok(ConsentReply::Canceled);
        }

        let parsed: FrontendResponse =
            serde_json::from_str(trimmed).map_err(|e| ConsentError::Malformed {
                reason: e.to_string(),
            })?;
        if parsed.canceled {
            Ok(ConsentReply::Canceled)
        } else {
            Ok(ConsentReply::Response(parsed.response))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use tempfile::TempDir;

    use super::*;

    fn write_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("frontend.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn sample_summary() -> ConsentSummary {
        ConsentSummary {
            professional: false,
            config_num: 1,
            interface_total_num: 2,
            product: "Widget".to_string(),
            manufacturer: "Acme".to_string(),
            interfaces: Vec::new(),
            proposal: None,
        }
    }

    #[test]
    fn parses_a_structured_response() {
        let tmp = TempDir::new().unwrap();
        let script = write_script(
            tmp.path(),
            r#"cat > /dev/null; echo '{"category": "USB Mouse", "security_pic_index": 3}'"#,
        );
        let mut frontend = CommandFrontend::new(script);
        let reply = frontend.request_consent(&sample_summary()).unwrap();
        let ConsentReply::Response(response) = reply else {
            panic!("expected a response");
        };
        assert_eq!(response.category.as_deref(), Some("USB Mouse"));
        assert_eq!(response.security_pic_index, Some(3));
    }

    #[test]
    fn delivers_the_summary_on_stdin() {
        let tmp = TempDir::new().unwrap();
        let captured = tmp.path().join("captured.json");
        let script = write_script(
            tmp.path(),
            &format!("cat > {}; echo '{{}}'", captured.display()),
        );
        let mut frontend = CommandFrontend::new(script);
        frontend.request_consent(&sample_summary()).unwrap();

        let raw = std::fs::read_to_string(captured).unwrap();
        let roundtrip: ConsentSummary = serde_json::from_str(&raw).unwrap();
        assert_eq!(roundtrip, sample_summary());
    }

    #[test]
    fn empty_output_means_canceled() {
        let tmp = TempDir::new().unwrap();
        let script = write_script(tmp.path(), "cat > /dev/null");
        let mut frontend = CommandFrontend::new(script);
        assert_eq!(
            frontend.request_consent(&sample_summary()).unwrap(),
            ConsentReply::Canceled
        );
    }

    #[test]
    fn explicit_cancellation_marker() {
        let tmp = TempDir::new().unwrap();
        let script = write_script(tmp.path(), r#"cat > /dev/null; echo '{"canceled": true}'"#);
        let mut frontend = CommandFrontend::new(script);
        assert_eq!(
            frontend.request_consent(&sample_summary()).unwrap(),
            ConsentReply::Canceled
        );
    }

    #[test]
    fn nonzero_exit_is_a_frontend_failure() {
        let tmp = TempDir::new().unwrap();
        let script = write_script(tmp.path(), "cat > /dev/null; exit 3");
        let mut frontend = CommandFrontend::new(script);
        let err = frontend.request_consent(&sample_summary()).unwrap_err();
        assert!(matches!(err, ConsentError::Frontend { .. }));
    }

    #[test]
    fn garbage_output_is_malformed() {
        let tmp = TempDir::new().unwrap();
        let script = write_script(tmp.path(), "cat > /dev/null; echo 'not json'");
        let mut frontend = CommandFrontend::new(script);
        let err = frontend.request_consent(&sample_summary()).unwrap_err();
        assert!(matches!(err, ConsentError::Malformed { .. }));
    }

    #[test]
    fn missing_program_is_a_launch_failure() {
        let mut frontend = CommandFrontend::new("/nonexistent/usbward-consent");
        let err = frontend.request_consent(&sample_summary()).unwrap_err();
        assert!(matches!(err, ConsentError::Launch(_)));
    }
}

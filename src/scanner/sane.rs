//! SANE backend driven through the `scanimage` front-end

use super::{BackendKind, ScanError, ScannerBackend};
use duct::cmd;
use std::io;
use tracing::{debug, info};

const SCANIMAGE: &str = "scanimage";

pub struct SaneBackend {
    program: &'static str,
}

impl SaneBackend {
    pub fn new() -> Self {
        Self { program: SCANIMAGE }
    }

    fn run(&self, args: &[&str]) -> Result<std::process::Output, ScanError> {
        cmd(self.program, args)
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .run()
            .map_err(|source| match source.kind() {
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => ScanError::Unavailable {
                    program: self.program,
                    source,
                },
                _ => ScanError::Io(source),
            })
    }
}

impl Default for SaneBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScannerBackend for SaneBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sane
    }

    fn enumerate(&self) -> Result<Vec<String>, ScanError> {
        let output = self.run(&["-L"])?;
        if !output.status.success() {
            return Err(ScanError::CommandFailed {
                program: self.program,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(parse_device_list(&String::from_utf8_lossy(&output.stdout)))
    }

    fn acquire(&self) -> Result<Option<Vec<u8>>, ScanError> {
        // Like the device dialog on Windows, SANE scans from the first device found.
        let Some(device) = self.enumerate()?.into_iter().next() else {
            info!("No SANE scanners found");
            return Ok(None);
        };

        debug!(device = %device, "Acquiring page");
        let output = self.run(&["-d", &device, "--format=png"])?;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        acquisition(
            self.program,
            output.status.success(),
            output.status.to_string(),
            output.stdout,
            stderr,
        )
    }
}

/// Interpret a finished `scanimage` acquisition
///
/// A non-zero exit that produced no image bytes is a cancellation or an
/// empty acquisition, not a failure. A non-zero exit with bytes on stdout
/// means a truncated page.
fn acquisition(
    program: &'static str,
    success: bool,
    status: String,
    stdout: Vec<u8>,
    stderr: String,
) -> Result<Option<Vec<u8>>, ScanError> {
    if success {
        return Ok((!stdout.is_empty()).then_some(stdout));
    }

    if stdout.is_empty() || is_cancellation(&stderr) {
        info!(status = %status, stderr = %stderr, "Acquisition ended without an image");
        return Ok(None);
    }

    Err(ScanError::CommandFailed {
        program,
        status,
        stderr,
    })
}

/// Extract device names from `scanimage -L` output
///
/// Lines look like ``device `epson2:libusb:001:004' is a Epson flatbed scanner``;
/// anything else (including the "No scanners were identified" notice) is ignored.
fn parse_device_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("device `")?;
            let end = rest.find('\'')?;
            let name = &rest[..end];
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect()
}

fn is_cancellation(stderr: &str) -> bool {
    stderr.to_lowercase().contains("cancel")
}

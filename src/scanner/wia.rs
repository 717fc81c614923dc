//! Windows Image Acquisition backend
//!
//! WIA is a COM automation API; it is driven through PowerShell so the crate
//! needs no COM bindings. The acquire dialog writes its image to a staging
//! file that is read back and removed.

use super::{discard_transient, BackendKind, ScanError, ScannerBackend};
use duct::cmd;
use std::fs;
use std::io;
use std::path::PathBuf;
use uuid::Uuid;

const POWERSHELL: &str = "powershell";

/// Exit code the acquire script uses for "dialog cancelled"
const CANCELLED_EXIT_CODE: i32 = 3;

/// Lists WIA devices of type 1 (scanner) by their `Name` property
const LIST_SCRIPT: &str = r#"
$ErrorActionPreference = 'Stop'
$manager = New-Object -ComObject WIA.DeviceManager
foreach ($info in $manager.DeviceInfos) {
    if ($info.Type -eq 1) {
        $info.Properties.Item('Name').Value
    }
}
"#;

/// Shows the WIA acquire dialog and saves the page to $env:PAPERLESS_SCAN_TARGET
const ACQUIRE_SCRIPT: &str = r#"
$ErrorActionPreference = 'Stop'
$dialog = New-Object -ComObject WIA.CommonDialog
$image = $dialog.ShowAcquireImage()
if ($null -eq $image) { exit 3 }
$image.SaveFile($env:PAPERLESS_SCAN_TARGET)
"#;

pub struct WiaBackend;

impl WiaBackend {
    pub fn new() -> Self {
        Self
    }

    fn run(&self, script: &str, target: Option<&PathBuf>) -> Result<std::process::Output, ScanError> {
        let mut expression = cmd(
            POWERSHELL,
            ["-NoProfile", "-NonInteractive", "-ExecutionPolicy", "Bypass", "-Command", script],
        );
        if let Some(target) = target {
            expression = expression.env("PAPERLESS_SCAN_TARGET", target);
        }

        expression
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .run()
            .map_err(|source| match source.kind() {
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => ScanError::Unavailable {
                    program: POWERSHELL,
                    source,
                },
                _ => ScanError::Io(source),
            })
    }
}

impl Default for WiaBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScannerBackend for WiaBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Wia
    }

    fn enumerate(&self) -> Result<Vec<String>, ScanError> {
        let output = self.run(LIST_SCRIPT, None)?;
        if !output.status.success() {
            return Err(command_failed(&output));
        }
        Ok(parse_names(&String::from_utf8_lossy(&output.stdout)))
    }

    fn acquire(&self) -> Result<Option<Vec<u8>>, ScanError> {
        // WIA refuses to overwrite, so every acquisition gets a fresh staging name.
        let staging = std::env::temp_dir().join(format!("paperless-scan-wia-{}.img", Uuid::new_v4()));

        let output = self.run(ACQUIRE_SCRIPT, Some(&staging))?;
        if output.status.code() == Some(CANCELLED_EXIT_CODE) {
            return Ok(None);
        }
        if !output.status.success() {
            discard_transient(&staging);
            return Err(command_failed(&output));
        }

        let bytes = fs::read(&staging);
        discard_transient(&staging);
        Ok(Some(bytes?))
    }
}

fn command_failed(output: &std::process::Output) -> ScanError {
    ScanError::CommandFailed {
        program: POWERSHELL,
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

fn parse_names(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

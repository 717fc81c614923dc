//! Scanner Backends
//!
//! One interface over the platform scanning subsystems:
//!
//! - **Wia**: Windows Image Acquisition (device manager + acquire dialog)
//! - **Sane**: SANE through the `scanimage` front-end (Linux, macOS, BSDs)
//! - **Unsupported**: no scanning subsystem, never yields a scan
//!
//! The backend is picked once at startup with [`BackendKind::detect`] and
//! handed to the pipeline. Backends only implement the raw device calls;
//! the error containment and the transient-file contract live in the
//! provided methods of [`ScannerBackend`] so every variant honours them.

mod sane;
mod unsupported;
mod wia;

pub use sane::SaneBackend;
pub use unsupported::UnsupportedBackend;
pub use wia::WiaBackend;

use image::{DynamicImage, ImageFormat};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Device-level failures
///
/// These never leave the scanner module: `list_scanners` and `scan` log them
/// and degrade to an empty list / no scan.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("{program} is not available: {source}")]
    Unavailable {
        program: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: &'static str,
        status: String,
        stderr: String,
    },

    #[error("failed to read acquired image: {0}")]
    Io(#[from] io::Error),

    #[error("failed to decode acquired image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Which scanning subsystem a backend drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Wia,
    Sane,
    Unsupported,
}

impl BackendKind {
    /// Pick the backend for the host operating system
    pub fn detect() -> Self {
        Self::for_os(std::env::consts::OS)
    }

    pub fn for_os(os: &str) -> Self {
        match os {
            "windows" => Self::Wia,
            "linux" | "macos" | "freebsd" | "openbsd" | "netbsd" => Self::Sane,
            _ => Self::Unsupported,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wia => "wia",
            Self::Sane => "sane",
            Self::Unsupported => "unsupported",
        }
    }

    /// Instantiate the backend of this kind
    pub fn backend(self) -> Arc<dyn ScannerBackend> {
        match self {
            Self::Wia => Arc::new(WiaBackend::new()),
            Self::Sane => Arc::new(SaneBackend::new()),
            Self::Unsupported => Arc::new(UnsupportedBackend),
        }
    }
}

/// A scanned page: decoded raster plus its transient on-disk JPEG copy
#[derive(Debug, Clone)]
pub struct ScanResult {
    image: DynamicImage,
    path: PathBuf,
}

impl ScanResult {
    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Transient JPEG copy written by the scan
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }

    pub fn into_image(self) -> DynamicImage {
        self.image
    }
}

/// A platform scanning capability
pub trait ScannerBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Names of the attached scanning devices
    fn enumerate(&self) -> Result<Vec<String>, ScanError>;

    /// Acquire one page as encoded image bytes
    ///
    /// `Ok(None)` means the user cancelled or the device produced no image.
    fn acquire(&self) -> Result<Option<Vec<u8>>, ScanError>;

    /// Enumerate devices, degrading any failure to an empty list
    fn list_scanners(&self) -> Vec<String> {
        match self.enumerate() {
            Ok(devices) => {
                info!(backend = self.kind().as_str(), count = devices.len(), "Scanners enumerated");
                devices
            }
            Err(e) => {
                warn!(backend = self.kind().as_str(), error = %e, "Scanner enumeration failed");
                Vec::new()
            }
        }
    }

    /// Acquire one page, decode it and persist a JPEG copy at `transient`
    ///
    /// Any earlier file at `transient` is removed first, so a failed or
    /// cancelled scan never leaves a stale page to be read back. Returns
    /// `None` on cancellation and on every device, decode or write failure.
    fn scan(&self, transient: &Path) -> Option<ScanResult> {
        discard_transient(transient);

        let bytes = match self.acquire() {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                info!(backend = self.kind().as_str(), "Scan cancelled or no image acquired");
                return None;
            }
            Err(e) => {
                warn!(backend = self.kind().as_str(), error = %e, "Scan failed");
                return None;
            }
        };

        let image = match image::load_from_memory(&bytes) {
            Ok(image) => image,
            Err(e) => {
                warn!(backend = self.kind().as_str(), error = %ScanError::from(e), "Scan failed");
                return None;
            }
        };

        if let Err(e) = persist_jpeg(&image, transient) {
            warn!(path = %transient.display(), error = %e, "Failed to write transient scan copy");
            discard_transient(transient);
            return None;
        }

        info!(
            width = image.width(),
            height = image.height(),
            path = %transient.display(),
            "Page scanned"
        );

        Some(ScanResult {
            image,
            path: transient.to_path_buf(),
        })
    }
}

/// Remove a transient scan copy if present
pub(crate) fn discard_transient(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove transient scan copy"),
    }
}

fn persist_jpeg(image: &DynamicImage, path: &Path) -> Result<(), image::ImageError> {
    image.to_rgb8().save_with_format(path, ImageFormat::Jpeg)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted backend for tests
    pub struct FakeBackend {
        pub devices: Result<Vec<String>, &'static str>,
        acquisitions: Mutex<Vec<Option<Vec<u8>>>>,
        pub acquire_calls: AtomicUsize,
    }

    impl FakeBackend {
        pub fn new(devices: Vec<&str>, acquisitions: Vec<Option<Vec<u8>>>) -> Self {
            Self {
                devices: Ok(devices.into_iter().map(String::from).collect()),
                acquisitions: Mutex::new(acquisitions),
                acquire_calls: AtomicUsize::new(0),
            }
        }

        pub fn failing() -> Self {
            Self {
                devices: Err("driver crashed"),
                acquisitions: Mutex::new(Vec::new()),
                acquire_calls: AtomicUsize::new(0),
            }
        }
    }

    impl ScannerBackend for FakeBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Unsupported
        }

        fn enumerate(&self) -> Result<Vec<String>, ScanError> {
            self.devices.clone().map_err(|msg| ScanError::CommandFailed {
                program: "fake",
                status: "1".to_string(),
                stderr: msg.to_string(),
            })
        }

        fn acquire(&self) -> Result<Option<Vec<u8>>, ScanError> {
            self.acquire_calls.fetch_add(1, Ordering::SeqCst);
            let mut queue = self.acquisitions.lock().unwrap();
            if queue.is_empty() {
                return Ok(None);
            }
            Ok(queue.remove(0))
        }
    }

    /// A small PNG page
    pub fn png_page() -> Vec<u8> {
        let img = DynamicImage::new_rgb8(24, 32);
        let mut buffer = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }
}

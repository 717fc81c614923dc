use super::{BackendKind, ScanError, ScannerBackend};

/// Backend for hosts without a scanning subsystem
pub struct UnsupportedBackend;

impl ScannerBackend for UnsupportedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Unsupported
    }

    fn enumerate(&self) -> Result<Vec<String>, ScanError> {
        Ok(Vec::new())
    }

    fn acquire(&self) -> Result<Option<Vec<u8>>, ScanError> {
        Ok(None)
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, VorteilError};

/// A cheap, clonable cancellation flag threaded through `new`, `prebuild`,
/// `build`, and the `FsCompiler` lifecycle calls. Checked at partition
/// boundaries at minimum (spec §5).
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self { flag: Arc::new(AtomicBool::new(false)) }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns `Err(VorteilError::Cancelled)` if cancellation was
    /// requested since the token was created. Call between I/O boundaries.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(VorteilError::Cancelled)
        } else {
            Ok(())
        }
    }
}

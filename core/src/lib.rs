pub mod cancel;
pub mod config;
pub mod error;
pub mod fscompiler;
pub mod logging;
pub mod linuxargs;

pub use cancel::CancellationToken;
pub use config::AppConfig;
pub use error::{Result, VorteilError};
pub use fscompiler::FsCompiler;

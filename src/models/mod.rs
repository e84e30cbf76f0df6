pub mod file;
pub mod instance;

pub use file::*;
pub use instance::*;

use serde::{Deserialize, Serialize};

/// Metadata a read-only provider reports for an attachment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttachmentMetadata {
    pub size: Option<u64>,
    pub mimetype: Option<String>,
    pub filename: Option<String>,
}

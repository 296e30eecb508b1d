//! Integration with makemkvcon, the external disc-extraction tool.
//!
//! The tool owns decryption; this module owns invoking it, parsing its
//! robot-mode output and classifying its failures.

mod client;
mod parser;

pub use client::MakemkvClient;
pub use parser::{
    assemble_disc_info, describe_exit_code, parse_duration, parse_line, DiscInfo, DiscKind,
    ToolEvent, Track,
};

use thiserror::Error;

/// Failure while scanning a disc or backup for track information.
///
/// Scan failures are surfaced to the user and never retried automatically:
/// the disc may simply be unreadable.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to launch extraction tool: {source}")]
    Spawn {
        #[source]
        source: std::io::Error,
    },
    #[error("scan exited with code {code}: {detail}")]
    ToolFailed { code: i32, detail: String },
    #[error("scan output contained no disc info")]
    Unparsable,
}

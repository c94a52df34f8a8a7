//! Shared stream identifiers.

use crate::core::packet::{AUDIO_MAGIC, VIDEO_MAGIC};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Media stream carried by a capture thread and its rendezvous channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// H.264 Annex-B video
    Video,
    /// 16-bit stereo PCM at 48 kHz
    Audio,
}

impl StreamKind {
    /// Packet magic tag for this stream
    pub const fn magic(self) -> u32 {
        match self {
            StreamKind::Video => VIDEO_MAGIC,
            StreamKind::Audio => AUDIO_MAGIC,
        }
    }

    /// Short lowercase name, used for thread names and logs
    pub const fn name(self) -> &'static str {
        match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

//! Synthetic capture backend
//!
//! Produces a paced, well-formed stream without capture hardware: Annex-B
//! video units with a key frame every [`KEYFRAME_INTERVAL`] frames and PCM
//! silence for audio. Useful for bring-up of the transports and the
//! receiving host.

use super::service::{CaptureService, Transfer};
use crate::config::CaptureConfig;
use crate::core::types::StreamKind;
use crate::error::{Error, Result};
use std::thread;
use std::time::{Duration, Instant};

/// Video frame interval (30 fps)
const VIDEO_FRAME_INTERVAL: Duration = Duration::from_micros(33_333);

/// Audio chunk interval: 1024 stereo frames at 48 kHz
const AUDIO_CHUNK_INTERVAL: Duration = Duration::from_micros(21_333);

/// Bytes per audio chunk (1024 frames, 2 channels, 16-bit)
const AUDIO_CHUNK_BYTES: usize = 1024 * 2 * 2;

/// Every this many video frames is a key frame
pub const KEYFRAME_INTERVAL: u64 = 30;

const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];
const NAL_IDR: u8 = 0x65;
const NAL_SLICE: u8 = 0x41;

const KEYFRAME_BYTES: usize = 24 * 1024;
const SLICE_BYTES: usize = 4 * 1024;

/// Paced synthetic media source
pub struct SyntheticCapture {
    kind: StreamKind,
    started: Instant,
    next_due: Instant,
    sequence: u64,
}

impl SyntheticCapture {
    /// Create a source for `kind`
    pub fn new(kind: StreamKind) -> Self {
        let now = Instant::now();
        Self {
            kind,
            started: now,
            next_due: now,
            sequence: 0,
        }
    }

    fn interval(&self) -> Duration {
        match self.kind {
            StreamKind::Video => VIDEO_FRAME_INTERVAL,
            StreamKind::Audio => AUDIO_CHUNK_INTERVAL,
        }
    }

    /// Sleep until the next unit is due. A consumer that fell behind is not
    /// owed a burst of catch-up units.
    fn pace(&mut self) {
        let now = Instant::now();
        if self.next_due > now {
            thread::sleep(self.next_due - now);
            self.next_due += self.interval();
        } else {
            self.next_due = now + self.interval();
        }
    }

    fn fill_video(&self, buf: &mut [u8]) -> Result<usize> {
        let keyframe = self.sequence % KEYFRAME_INTERVAL == 0;
        let len = if keyframe { KEYFRAME_BYTES } else { SLICE_BYTES };
        if len > buf.len() {
            return Err(Error::Capture(format!(
                "video frame of {} bytes does not fit {} byte buffer",
                len,
                buf.len()
            )));
        }

        buf[..4].copy_from_slice(&START_CODE);
        buf[4] = if keyframe { NAL_IDR } else { NAL_SLICE };
        buf[5..13].copy_from_slice(&self.sequence.to_be_bytes());
        buf[13..len].fill(0xA5);
        Ok(len)
    }

    fn fill_audio(&self, buf: &mut [u8]) -> Result<usize> {
        let len = AUDIO_CHUNK_BYTES.min(buf.len());
        buf[..len].fill(0);
        Ok(len)
    }
}

impl CaptureService for SyntheticCapture {
    fn begin_stream(&mut self) -> Result<()> {
        log::info!("Synthetic {} source started", self.kind);
        self.next_due = Instant::now();
        Ok(())
    }

    fn transfer(&mut self, kind: StreamKind, buf: &mut [u8]) -> Result<Transfer> {
        if kind != self.kind {
            return Err(Error::Capture(format!(
                "{} source asked for {} data",
                self.kind, kind
            )));
        }

        self.pace();
        let size = match kind {
            StreamKind::Video => self.fill_video(buf)?,
            StreamKind::Audio => self.fill_audio(buf)?,
        };
        self.sequence += 1;

        Ok(Transfer {
            size,
            timestamp_usec: self.started.elapsed().as_micros() as u64,
        })
    }
}

/// Create the capture service for one stream based on configuration
pub fn create_capture_source(
    config: &CaptureConfig,
    kind: StreamKind,
) -> Result<Box<dyn CaptureService>> {
    match config.source.as_str() {
        "synthetic" => Ok(Box::new(SyntheticCapture::new(kind))),
        _ => Err(Error::UnknownCaptureSource(config.source.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::framing::is_idr_frame;

    #[test]
    fn test_first_video_frame_is_keyframe() {
        let mut source = SyntheticCapture::new(StreamKind::Video);
        let mut buf = vec![0u8; 64 * 1024];

        let t = source.transfer(StreamKind::Video, &mut buf).unwrap();
        assert_eq!(t.size, KEYFRAME_BYTES);
        assert!(is_idr_frame(&buf[..t.size]));

        let t = source.transfer(StreamKind::Video, &mut buf).unwrap();
        assert_eq!(t.size, SLICE_BYTES);
        assert!(!is_idr_frame(&buf[..t.size]));
    }

    #[test]
    fn test_video_is_paced() {
        let mut source = SyntheticCapture::new(StreamKind::Video);
        let mut buf = vec![0u8; 64 * 1024];

        let start = Instant::now();
        for _ in 0..4 {
            source.transfer(StreamKind::Video, &mut buf).unwrap();
        }
        assert!(start.elapsed() >= VIDEO_FRAME_INTERVAL * 3);
    }

    #[test]
    fn test_audio_chunk_clamped_to_buffer() {
        let mut source = SyntheticCapture::new(StreamKind::Audio);
        let mut buf = vec![0xFFu8; 1024];

        let t = source.transfer(StreamKind::Audio, &mut buf).unwrap();
        assert_eq!(t.size, 1024);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_wrong_stream_rejected() {
        let mut source = SyntheticCapture::new(StreamKind::Audio);
        let mut buf = vec![0u8; 1024];
        assert!(source.transfer(StreamKind::Video, &mut buf).is_err());
    }

    #[test]
    fn test_unknown_source() {
        let config = CaptureConfig {
            source: "grc".to_string(),
            ..CaptureConfig::default()
        };
        assert!(matches!(
            create_capture_source(&config, StreamKind::Video),
            Err(Error::UnknownCaptureSource(_))
        ));
    }
}

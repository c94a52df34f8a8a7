//! Capture threads.
//!
//! One thread per stream. Each loops forever:
//!
//! 1. wait for the transport to release the slot (`Consumed`)
//! 2. pull one unit of media from the capture service into the slot
//! 3. apply the stream policy (SPS/PPS insertion, audio batching)
//! 4. hand the slot to the transport (`Produced`)
//!
//! A dropped frame still ends the turn: the slot is handed over empty, the
//! transport skips it, and the next turn retries. With no client attached the
//! thread stays parked in step 1.

use crate::capture::framing::{FailurePolicy, MIN_VIDEO_FRAME, VideoFraming};
use crate::capture::service::CaptureService;
use crate::core::packet::{A_BATCHING, ABUF_SZ, Packet};
use crate::core::types::StreamKind;
use crate::error::{Error, Result};
use crate::lifecycle::CaptureHub;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Pause before handing over an empty slot
const FAILURE_BACKOFF: Duration = Duration::from_millis(10);

/// Nice value applied to capture threads (below interactive work)
#[cfg(unix)]
const CAPTURE_NICE: libc::c_int = 5;

/// Pull one video frame into `pkt` and apply the framing policy.
///
/// Returns `false` for a failed transfer or a frame too short to carry a NAL
/// header.
pub fn read_video<S, const N: usize>(
    service: &mut S,
    pkt: &mut Packet<N>,
    framing: &mut VideoFraming,
    policy: FailurePolicy,
) -> bool
where
    S: CaptureService + ?Sized,
{
    let transfer = match service.transfer(StreamKind::Video, pkt.data_mut()) {
        Ok(t) if t.size > N => {
            let err = Error::Capture(format!("reported {} bytes into {} byte buffer", t.size, N));
            policy.on_transfer_failure(StreamKind::Video, &err);
            return false;
        }
        Ok(t) => t,
        Err(e) => {
            policy.on_transfer_failure(StreamKind::Video, &e);
            return false;
        }
    };

    pkt.set_data_size(transfer.size);
    pkt.set_timestamp_usec(transfer.timestamp_usec);

    if transfer.size <= MIN_VIDEO_FRAME {
        log::debug!("Video frame too short ({} bytes), dropping", transfer.size);
        return false;
    }

    framing.apply(pkt);
    true
}

/// Batches several audio transfers into one packet.
///
/// Sub-transfers land in a scratch buffer first, so a failure part-way
/// through leaves the packet exactly as it was.
pub struct AudioBatcher {
    scratch: Box<[u8]>,
    chunk: usize,
    batches: usize,
}

impl AudioBatcher {
    /// `batches` transfers of at most `chunk` bytes each
    pub fn new(chunk: usize, batches: usize) -> Self {
        Self {
            scratch: vec![0u8; chunk * batches].into_boxed_slice(),
            chunk,
            batches,
        }
    }

    /// Pull `batches` audio chunks into `pkt`, packed back to back.
    ///
    /// The timestamp comes from the first chunk.
    pub fn read<S, const N: usize>(&mut self, service: &mut S, pkt: &mut Packet<N>) -> Result<()>
    where
        S: CaptureService + ?Sized,
    {
        let mut total = 0;
        let mut timestamp_usec = 0;

        for index in 0..self.batches {
            let window = &mut self.scratch[total..total + self.chunk];
            let transfer = service.transfer(StreamKind::Audio, window)?;
            if transfer.size > self.chunk {
                return Err(Error::Capture(format!(
                    "audio chunk of {} bytes exceeds {}",
                    transfer.size, self.chunk
                )));
            }
            if index == 0 {
                timestamp_usec = transfer.timestamp_usec;
            }
            total += transfer.size;
        }

        if total > N {
            return Err(Error::Capture(format!(
                "audio batch of {} bytes exceeds packet capacity {}",
                total, N
            )));
        }

        pkt.data_mut()[..total].copy_from_slice(&self.scratch[..total]);
        pkt.set_data_size(total);
        pkt.set_timestamp_usec(timestamp_usec);
        Ok(())
    }
}

impl Default for AudioBatcher {
    fn default() -> Self {
        Self::new(ABUF_SZ, A_BATCHING)
    }
}

/// One stream's side of the capture loop
pub trait StreamProducer: Send {
    /// Stream this producer feeds
    fn kind(&self) -> StreamKind;

    /// Capture hub holding the slot and channel
    fn hub(&self) -> &CaptureHub;

    /// Open the capture session
    fn start(&mut self) -> Result<()>;

    /// Fill the slot once. Returns `false` if the frame was dropped, in
    /// which case the slot is left empty.
    fn fill(&mut self) -> bool;

    /// One full turn: wait for the slot, fill it, hand it over
    fn produce_one(&mut self) {
        self.hub().channel(self.kind()).wait_consumed();

        if !self.fill() {
            thread::sleep(FAILURE_BACKOFF);
        }

        self.hub().channel(self.kind()).signal_produced();
    }

    /// Produce forever. Returns only if the capture session cannot be opened.
    fn run(&mut self) {
        if let Err(e) = self.start() {
            log::error!("Failed to start {} capture: {}", self.kind(), e);
            return;
        }

        log::info!("{} capture thread started", self.kind());
        loop {
            self.produce_one();
        }
    }
}

/// Video capture loop state
pub struct VideoProducer {
    hub: Arc<CaptureHub>,
    service: Box<dyn CaptureService>,
    framing: VideoFraming,
    policy: FailurePolicy,
}

impl VideoProducer {
    /// Create the video producer over `service`
    pub fn new(
        hub: Arc<CaptureHub>,
        service: Box<dyn CaptureService>,
        policy: FailurePolicy,
    ) -> Self {
        let framing = VideoFraming::new(hub.force_sps_pps());
        Self {
            hub,
            service,
            framing,
            policy,
        }
    }
}

impl StreamProducer for VideoProducer {
    fn kind(&self) -> StreamKind {
        StreamKind::Video
    }

    fn hub(&self) -> &CaptureHub {
        &self.hub
    }

    fn start(&mut self) -> Result<()> {
        self.service.begin_stream()
    }

    fn fill(&mut self) -> bool {
        let mut slot = self.hub.video_slot().lock();
        let filled = read_video(&mut *self.service, &mut **slot, &mut self.framing, self.policy);
        if !filled {
            slot.set_data_size(0);
        }
        filled
    }
}

/// Audio capture loop state
pub struct AudioProducer {
    hub: Arc<CaptureHub>,
    service: Box<dyn CaptureService>,
    batcher: AudioBatcher,
}

impl AudioProducer {
    /// Create the audio producer over `service`
    pub fn new(hub: Arc<CaptureHub>, service: Box<dyn CaptureService>) -> Self {
        Self {
            hub,
            service,
            batcher: AudioBatcher::default(),
        }
    }
}

impl StreamProducer for AudioProducer {
    fn kind(&self) -> StreamKind {
        StreamKind::Audio
    }

    fn hub(&self) -> &CaptureHub {
        &self.hub
    }

    fn start(&mut self) -> Result<()> {
        self.service.begin_stream()
    }

    fn fill(&mut self) -> bool {
        let mut slot = self.hub.audio_slot().lock();
        match self.batcher.read(&mut *self.service, &mut **slot) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("Audio read failed, dropping batch: {}", e);
                slot.set_data_size(0);
                false
            }
        }
    }
}

/// Start a capture thread with a small dedicated stack.
///
/// The thread is parked whenever no client is attached.
pub fn spawn_capture_thread<P>(mut producer: P, stack_size: usize) -> Result<JoinHandle<()>>
where
    P: StreamProducer + 'static,
{
    let name = format!("{}-capture", producer.kind());
    thread::Builder::new()
        .name(name.clone())
        .stack_size(stack_size)
        .spawn(move || {
            lower_thread_priority();
            producer.run();
        })
        .map_err(|source| Error::ThreadSpawn { name, source })
}

/// Best-effort: run the calling thread below interactive priority
fn lower_thread_priority() {
    #[cfg(unix)]
    {
        // SAFETY: setpriority has no memory-safety preconditions; `who == 0`
        // targets the calling thread on Linux.
        let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, CAPTURE_NICE) };
        if rc != 0 {
            log::warn!(
                "Failed to lower capture thread priority: {}",
                std::io::Error::last_os_error()
            );
        }
    }
}

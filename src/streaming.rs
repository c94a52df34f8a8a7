//! Send loop draining one or both capture channels into a transport.

use crate::core::packet::HEADER_SIZE;
use crate::core::rendezvous::select_produced_timeout;
use crate::core::running::RunFlag;
use crate::core::types::StreamKind;
use crate::error::Result;
use crate::lifecycle::CaptureHub;
use std::time::Duration;

/// Longest a send loop waits for a packet before re-checking the running flag
pub const SELECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Destination of framed packets
pub trait PacketSink {
    /// Deliver one packet (header followed by payload) in full
    fn send_packet(&mut self, bytes: &[u8]) -> Result<()>;
}

impl<S: PacketSink + ?Sized> PacketSink for &mut S {
    fn send_packet(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).send_packet(bytes)
    }
}

/// Forward every packet produced on `streams` to `sink` until the running
/// flag clears or the sink fails.
///
/// With two streams the first one wins when both are pending. A failed send
/// leaves the channel unconsumed, so the capture thread stays parked until
/// the next client connects. Returns the number of packets delivered.
pub fn run_send_loop<S>(
    hub: &CaptureHub,
    streams: &[StreamKind],
    sink: &mut S,
    running: &RunFlag,
) -> Result<u64>
where
    S: PacketSink + ?Sized,
{
    let Some(&first) = streams.first() else {
        return Ok(0);
    };
    let first = hub.channel(first);
    let second = streams.get(1).map(|&kind| hub.channel(kind));

    let mut delivered = 0u64;
    while running.is_running() {
        let Some(chan) = select_produced_timeout(first, second, SELECT_TIMEOUT) else {
            continue;
        };

        if !running.is_running() {
            break;
        }

        let kind = chan.kind();
        let sent = hub.with_wire_bytes(kind, |bytes| {
            if bytes.len() <= HEADER_SIZE {
                log::trace!("{}: skipping empty packet", kind);
                return Ok(false);
            }
            sink.send_packet(bytes).map(|()| true)
        });

        match sent {
            Ok(sent) => {
                if sent {
                    delivered += 1;
                }
                chan.signal_consumed();
            }
            Err(e) => {
                log::warn!("{} send failed after {} packets: {}", kind, delivered, e);
                return Err(e);
            }
        }
    }

    log::debug!("Send loop stopped after {} packets", delivered);
    Ok(delivered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packet::{AUDIO_MAGIC, PacketHeader, VIDEO_MAGIC};
    use crate::error::Error;
    use std::sync::Arc;
    use std::thread;

    /// Collects packets and stops the run flag after `limit` of them
    struct CollectingSink {
        packets: Vec<Vec<u8>>,
        limit: usize,
        running: RunFlag,
    }

    impl PacketSink for CollectingSink {
        fn send_packet(&mut self, bytes: &[u8]) -> Result<()> {
            self.packets.push(bytes.to_vec());
            if self.packets.len() >= self.limit {
                self.running.stop();
            }
            Ok(())
        }
    }

    struct FailingSink;

    impl PacketSink for FailingSink {
        fn send_packet(&mut self, _bytes: &[u8]) -> Result<()> {
            Err(Error::Disconnected)
        }
    }

    fn header_of(packet: &[u8]) -> PacketHeader {
        PacketHeader::from_bytes(packet[..HEADER_SIZE].try_into().unwrap())
    }

    fn fill(hub: &CaptureHub, kind: StreamKind, payload: &[u8], ts: u64) {
        match kind {
            StreamKind::Video => {
                let mut slot = hub.video_slot().lock();
                slot.data_mut()[..payload.len()].copy_from_slice(payload);
                slot.set_data_size(payload.len());
                slot.set_timestamp_usec(ts);
            }
            StreamKind::Audio => {
                let mut slot = hub.audio_slot().lock();
                slot.data_mut()[..payload.len()].copy_from_slice(payload);
                slot.set_data_size(payload.len());
                slot.set_timestamp_usec(ts);
            }
        }
    }

    #[test]
    fn test_delivers_framed_packets_in_turn() {
        let hub = CaptureHub::new();
        let running = RunFlag::new();
        let mut sink = CollectingSink {
            packets: Vec::new(),
            limit: 3,
            running: running.clone(),
        };

        let producer_hub = Arc::clone(&hub);
        let producer = thread::spawn(move || {
            let chan = producer_hub.channel(StreamKind::Video);
            for i in 0..3u8 {
                chan.wait_consumed();
                fill(&producer_hub, StreamKind::Video, &[i; 10], i as u64);
                chan.signal_produced();
            }
        });

        hub.on_client_connected(StreamKind::Video);
        let delivered = run_send_loop(&hub, &[StreamKind::Video], &mut sink, &running).unwrap();
        producer.join().unwrap();

        assert_eq!(delivered, 3);
        for (i, packet) in sink.packets.iter().enumerate() {
            let header = header_of(packet);
            assert_eq!(header.magic, VIDEO_MAGIC);
            assert_eq!(header.data_size, 10);
            assert_eq!(header.timestamp_usec, i as u64);
            assert_eq!(&packet[HEADER_SIZE..], &[i as u8; 10]);
        }
    }

    #[test]
    fn test_prefers_first_stream_on_tie() {
        let hub = CaptureHub::new();
        let running = RunFlag::new();
        let mut sink = CollectingSink {
            packets: Vec::new(),
            limit: 2,
            running: running.clone(),
        };

        fill(&hub, StreamKind::Video, &[1; 4], 1);
        fill(&hub, StreamKind::Audio, &[2; 4], 2);
        hub.channel(StreamKind::Audio).signal_produced();
        hub.channel(StreamKind::Video).signal_produced();

        let streams = [StreamKind::Video, StreamKind::Audio];
        run_send_loop(&hub, &streams, &mut sink, &running).unwrap();

        let magics: Vec<u32> = sink
            .packets
            .iter()
            .map(|p| header_of(p).magic)
            .collect();
        assert_eq!(magics, vec![VIDEO_MAGIC, AUDIO_MAGIC]);
        assert!(hub.channel(StreamKind::Video).is_consumed());
        assert!(hub.channel(StreamKind::Audio).is_consumed());
    }

    #[test]
    fn test_sink_failure_leaves_slot_unconsumed() {
        let hub = CaptureHub::new();
        fill(&hub, StreamKind::Audio, &[5; 8], 0);
        hub.channel(StreamKind::Audio).signal_produced();

        let result = run_send_loop(&hub, &[StreamKind::Audio], &mut FailingSink, &RunFlag::new());
        assert!(matches!(result, Err(Error::Disconnected)));
        assert!(!hub.channel(StreamKind::Audio).is_consumed());
    }

    #[test]
    fn test_force_unlock_ends_loop_on_shutdown() {
        let hub = CaptureHub::new();
        let running = RunFlag::new();

        let loop_hub = Arc::clone(&hub);
        let loop_running = running.clone();
        let sender = thread::spawn(move || {
            let streams = [StreamKind::Video, StreamKind::Audio];
            run_send_loop(&loop_hub, &streams, &mut FailingSink, &loop_running)
        });

        thread::sleep(Duration::from_millis(50));
        running.stop();
        hub.force_unlock_all();

        assert_eq!(sender.join().unwrap().unwrap(), 0);
    }

    #[test]
    fn test_empty_packet_skipped_but_consumed() {
        let hub = CaptureHub::new();
        let running = RunFlag::new();
        hub.channel(StreamKind::Video).signal_produced();

        let stopper = {
            let running = running.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                running.stop();
            })
        };

        let delivered =
            run_send_loop(&hub, &[StreamKind::Video], &mut FailingSink, &running).unwrap();
        stopper.join().unwrap();

        assert_eq!(delivered, 0);
        assert!(hub.channel(StreamKind::Video).is_consumed());
    }
}

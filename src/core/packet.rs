//! Wire framing for captured media.
//!
//! Every unit of media handed to a transport is prefixed with a 16-byte
//! [`PacketHeader`]. The receiving host parses this layout bit-for-bit:
//!
//! ```text
//! ┌──────────────┬────────────────┬──────────────────────┬───────────────────┐
//! │ magic (u32)  │ data_size (u32)│ timestamp_usec (u64) │ payload           │
//! │ little-endian│ little-endian  │ little-endian        │ data_size bytes   │
//! └──────────────┴────────────────┴──────────────────────┴───────────────────┘
//! ```
//!
//! # Allocation discipline
//!
//! Packets are allocated once at startup with [`Packet::boxed`] and never
//! resized. The backing storage is page-aligned and holds the encoded header
//! directly in front of the payload so the whole frame can be written with a
//! single transport call.

use std::mem::size_of;

/// Size of the encoded packet header
pub const HEADER_SIZE: usize = 16;

/// Video buffer capacity: one compressed frame plus SPS/PPS headroom.
///
/// Larger than the capture service's nominal frame size; some IDR frames
/// exceed the nominal size and fail the transfer otherwise.
pub const VBUF_SZ: usize = 0x50000;

/// Size of one audio chunk (1024 stereo 16-bit samples at 48 kHz)
pub const ABUF_SZ: usize = 0x1000;

/// Number of audio chunks batched into a single packet
pub const A_BATCHING: usize = 2;

/// Audio buffer capacity
pub const ABATCH_SZ: usize = ABUF_SZ * A_BATCHING;

/// Magic tag of video packets
pub const VIDEO_MAGIC: u32 = 0xDDDD_DDDD;

/// Magic tag of audio packets
pub const AUDIO_MAGIC: u32 = 0xEEEE_EEEE;

/// Page size used for buffer alignment
pub const PAGE_SIZE: usize = 0x1000;

/// Packet header, laid out exactly as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct PacketHeader {
    /// Stream tag ([`VIDEO_MAGIC`] or [`AUDIO_MAGIC`])
    pub magic: u32,
    /// Number of payload bytes that follow the header
    pub data_size: u32,
    /// Capture timestamp in microseconds
    pub timestamp_usec: u64,
}

const _: () = assert!(size_of::<PacketHeader>() == HEADER_SIZE);

impl PacketHeader {
    /// Encode to the 16-byte little-endian wire form
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..8].copy_from_slice(&self.data_size.to_le_bytes());
        out[8..16].copy_from_slice(&self.timestamp_usec.to_le_bytes());
        out
    }

    /// Decode from the 16-byte wire form
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        Self {
            magic: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            data_size: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            timestamp_usec: u64::from_le_bytes([
                bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14],
                bytes[15],
            ]),
        }
    }
}

/// Fixed-capacity media packet: encoded header followed by `N` payload bytes.
///
/// Generic const parameter `N` sets payload capacity.
#[repr(C, align(4096))]
pub struct Packet<const N: usize> {
    header: [u8; HEADER_SIZE],
    data: [u8; N],
}

/// The process-wide video slot type
pub type VideoPacket = Packet<VBUF_SZ>;

/// The process-wide audio slot type
pub type AudioPacket = Packet<ABATCH_SZ>;

impl<const N: usize> Packet<N> {
    /// Allocate a zeroed packet directly on the heap, tagged with `magic`.
    ///
    /// The packet is never built on the stack: video packets are far larger
    /// than the capture threads' stacks.
    pub fn boxed(magic: u32) -> Box<Self> {
        // SAFETY: Packet consists solely of byte arrays, so the all-zero bit
        // pattern is a valid value.
        let mut packet = unsafe { Box::<Self>::new_zeroed().assume_init() };
        packet.set_header(PacketHeader {
            magic,
            data_size: 0,
            timestamp_usec: 0,
        });
        packet
    }

    /// Payload capacity in bytes
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Decoded header
    #[inline]
    pub fn header(&self) -> PacketHeader {
        PacketHeader::from_bytes(&self.header)
    }

    /// Overwrite the header; `data_size` is clamped to capacity
    #[inline]
    pub fn set_header(&mut self, header: PacketHeader) {
        self.header = PacketHeader {
            data_size: header.data_size.min(u32::try_from(N).unwrap_or(u32::MAX)),
            ..header
        }
        .to_bytes();
    }

    /// Stream tag
    #[inline]
    pub fn magic(&self) -> u32 {
        self.header().magic
    }

    /// Number of valid payload bytes
    #[inline]
    pub fn data_size(&self) -> usize {
        (self.header().data_size as usize).min(N)
    }

    /// Set the number of valid payload bytes (clamped to capacity)
    #[inline]
    pub fn set_data_size(&mut self, size: usize) {
        let size = size.min(N) as u32;
        self.header[4..8].copy_from_slice(&size.to_le_bytes());
    }

    /// Capture timestamp in microseconds
    #[inline]
    pub fn timestamp_usec(&self) -> u64 {
        self.header().timestamp_usec
    }

    /// Set the capture timestamp
    #[inline]
    pub fn set_timestamp_usec(&mut self, timestamp_usec: u64) {
        self.header[8..16].copy_from_slice(&timestamp_usec.to_le_bytes());
    }

    /// Whole payload buffer, including unused capacity
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable whole payload buffer
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Valid payload bytes
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.data_size()]
    }

    /// Free space after the valid payload
    #[inline]
    pub fn headroom(&self) -> usize {
        N - self.data_size()
    }

    /// Header followed by the valid payload, ready for a transport write
    pub fn wire_bytes(&self) -> &[u8] {
        let len = HEADER_SIZE + self.data_size();
        // SAFETY: repr(C) places `data` immediately after the 16-byte header
        // with no padding (both fields are byte arrays), and `data_size()`
        // never returns more than N.
        unsafe { std::slice::from_raw_parts((self as *const Self).cast::<u8>(), len) }
    }

    /// Shift the valid payload right and write `parts` into the freed prefix.
    ///
    /// Returns `false` without touching the buffer when the combined length of
    /// `parts` exceeds [`headroom`](Self::headroom).
    pub fn prepend(&mut self, parts: &[&[u8]]) -> bool {
        let total: usize = parts.iter().map(|p| p.len()).sum();
        if total > self.headroom() {
            return false;
        }

        let size = self.data_size();
        self.data.copy_within(0..size, total);

        let mut offset = 0;
        for part in parts {
            self.data[offset..offset + part.len()].copy_from_slice(part);
            offset += part.len();
        }

        self.set_data_size(size + total);
        true
    }
}

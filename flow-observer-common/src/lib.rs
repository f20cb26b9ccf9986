#![no_std]

//! Wire structures shared between the dataplane and the observer.
//!
//! Every perf event emitted by the dataplane starts with a [`TraceNotify`]
//! header, followed by up to `cap_len` bytes of the captured packet. The
//! header is encoded little-endian with the same field order as the
//! `#[repr(C)]` struct, so the dataplane can write it straight from the stack.

#[cfg(test)]
extern crate std;

/// Monitor message types carried in the first byte of every perf event.
pub mod message_type {
    pub const UNSPEC: u8 = 0;
    pub const DROP: u8 = 1;
    pub const DEBUG: u8 = 2;
    pub const CAPTURE: u8 = 3;
    pub const TRACE: u8 = 4;
    pub const POLICY_VERDICT: u8 = 5;
    pub const ACCESS_LOG: u8 = 129;
    pub const AGENT: u8 = 130;
}

/// Observation points reported in [`TraceNotify::obs_point`] for trace events.
pub mod observation_point {
    pub const TO_ENDPOINT: u8 = 0;
    pub const TO_PROXY: u8 = 1;
    pub const TO_HOST: u8 = 2;
    pub const TO_STACK: u8 = 3;
    pub const TO_OVERLAY: u8 = 4;
    pub const FROM_ENDPOINT: u8 = 5;
    pub const FROM_PROXY: u8 = 6;
    pub const FROM_HOST: u8 = 7;
    pub const FROM_STACK: u8 = 8;
    pub const FROM_OVERLAY: u8 = 9;
    pub const FROM_NETWORK: u8 = 10;
    pub const TO_NETWORK: u8 = 11;
}

/// Encoded size of [`TraceNotify`].
pub const TRACE_NOTIFY_LEN: usize = 32;

/// Header of trace and drop notifications.
///
/// For drop notifications `obs_point` is unused and `reason` holds the drop
/// reason code.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceNotify {
    pub msg_type: u8,
    pub obs_point: u8,
    pub source: u16,
    pub hash: u32,
    pub orig_len: u32,
    pub cap_len: u16,
    pub version: u16,
    pub src_label: u32,
    pub dst_label: u32,
    pub dst_id: u16,
    pub reason: u8,
    pub flags: u8,
    pub ifindex: u32,
}

/// Returned when a buffer is too short to hold a [`TraceNotify`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TruncatedHeader {
    pub len: usize,
}

impl core::fmt::Display for TruncatedHeader {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "buffer of {} bytes is smaller than the {} byte notification header",
            self.len, TRACE_NOTIFY_LEN
        )
    }
}

impl TraceNotify {
    pub fn new(msg_type: u8) -> Self {
        Self {
            msg_type,
            obs_point: 0,
            source: 0,
            hash: 0,
            orig_len: 0,
            cap_len: 0,
            version: 0,
            src_label: 0,
            dst_label: 0,
            dst_id: 0,
            reason: 0,
            flags: 0,
            ifindex: 0,
        }
    }

    pub fn trace() -> Self {
        Self::new(message_type::TRACE)
    }

    pub fn drop_notify(reason: u8) -> Self {
        Self::new(message_type::DROP).with_reason(reason)
    }

    pub fn with_obs_point(mut self, obs_point: u8) -> Self {
        self.obs_point = obs_point;
        self
    }

    pub fn with_source(mut self, source: u16) -> Self {
        self.source = source;
        self
    }

    pub fn with_labels(mut self, src_label: u32, dst_label: u32) -> Self {
        self.src_label = src_label;
        self.dst_label = dst_label;
        self
    }

    pub fn with_dst_id(mut self, dst_id: u16) -> Self {
        self.dst_id = dst_id;
        self
    }

    pub fn with_reason(mut self, reason: u8) -> Self {
        self.reason = reason;
        self
    }

    pub fn with_ifindex(mut self, ifindex: u32) -> Self {
        self.ifindex = ifindex;
        self
    }

    /// Set both the original and the captured length of the packet.
    pub fn with_packet_len(mut self, len: usize) -> Self {
        self.orig_len = len as u32;
        self.cap_len = len.min(u16::MAX as usize) as u16;
        self
    }

    pub fn is_drop(&self) -> bool {
        self.msg_type == message_type::DROP
    }

    pub fn to_bytes(&self) -> [u8; TRACE_NOTIFY_LEN] {
        let mut buf = [0u8; TRACE_NOTIFY_LEN];
        buf[0] = self.msg_type;
        buf[1] = self.obs_point;
        buf[2..4].copy_from_slice(&self.source.to_le_bytes());
        buf[4..8].copy_from_slice(&self.hash.to_le_bytes());
        buf[8..12].copy_from_slice(&self.orig_len.to_le_bytes());
        buf[12..14].copy_from_slice(&self.cap_len.to_le_bytes());
        buf[14..16].copy_from_slice(&self.version.to_le_bytes());
        buf[16..20].copy_from_slice(&self.src_label.to_le_bytes());
        buf[20..24].copy_from_slice(&self.dst_label.to_le_bytes());
        buf[24..26].copy_from_slice(&self.dst_id.to_le_bytes());
        buf[26] = self.reason;
        buf[27] = self.flags;
        buf[28..32].copy_from_slice(&self.ifindex.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, TruncatedHeader> {
        if buf.len() < TRACE_NOTIFY_LEN {
            return Err(TruncatedHeader { len: buf.len() });
        }

        let u16_at = |at: usize| u16::from_le_bytes([buf[at], buf[at + 1]]);
        let u32_at =
            |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);

        Ok(Self {
            msg_type: buf[0],
            obs_point: buf[1],
            source: u16_at(2),
            hash: u32_at(4),
            orig_len: u32_at(8),
            cap_len: u16_at(12),
            version: u16_at(14),
            src_label: u32_at(16),
            dst_label: u32_at(20),
            dst_id: u16_at(24),
            reason: buf[26],
            flags: buf[27],
            ifindex: u32_at(28),
        })
    }
}

impl Default for TraceNotify {
    fn default() -> Self {
        Self::trace()
    }
}

pub const DEFAULT_VERSION: u8 = 7;
pub const DEFAULT_LIFETIME_SECS: u64 = 3600;

/// Capacity of the processor's seen-bundle duplicate cache (section 3).
pub const SEEN_BUNDLE_CACHE_CAP: usize = 10_000;
/// Capacity of the epidemic router's per-bundle forwarding history (section 4.7.1).
pub const EPIDEMIC_HISTORY_CAP: usize = 10_000;
/// Per-endpoint pending-delivery queue cap before oldest entries are dropped (section 4.4).
pub const PENDING_QUEUE_CAP: usize = 100;
/// Dynamic-peer failure threshold past which the janitor prunes the peer (section 3).
pub const PEER_FAIL_COUNT_THRESHOLD: u32 = 3;

pub const DEFAULT_WEB_PORT: u16 = 3000;
pub const DEFAULT_JANITOR_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_PEER_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_ANNOUNCEMENT_INTERVAL_SECS: u64 = 30;
pub const PEER_SWEEP_INTERVAL_SECS: u64 = 30;

pub mod tcpcl {
    pub const CONTACT_MAGIC: [u8; 4] = *b"dtn!";
    pub const CONTACT_VERSION: u8 = 0x04;

    pub const MSG_XFER_SEGMENT: u8 = 0x01;
    pub const MSG_XFER_ACK: u8 = 0x02;
    pub const MSG_XFER_REFUSE: u8 = 0x03;
    pub const MSG_KEEPALIVE: u8 = 0x04;
    pub const MSG_SESS_TERM: u8 = 0x05;
    pub const MSG_REJECT: u8 = 0x06;
    pub const MSG_SESS_INIT: u8 = 0x07;

    pub const XFER_FLAG_START: u8 = 0b01;
    pub const XFER_FLAG_END: u8 = 0b10;

    pub const EXT_TRANSFER_LENGTH: u16 = 0x0001;
    pub const EXT_KEEPALIVE_INTERVAL: u16 = 0x0001;

    pub const DEFAULT_KEEPALIVE_SECS: u16 = 15;
    pub const DEFAULT_SEGMENT_MRU: u64 = 16 * 1024 * 1024;
    pub const DEFAULT_TRANSFER_MRU: u64 = 16 * 1024 * 1024;
}

pub mod udp {
    /// Maximum bundle size for a single UDP datagram (section 4.6.2).
    pub const MAX_BUNDLE_SIZE: usize = 65535;
}

pub mod http {
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;
    pub const DEFAULT_PULL_INTERVAL_SECS: u64 = 30;
}

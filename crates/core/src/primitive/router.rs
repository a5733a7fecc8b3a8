//! Router primitive parameters. The router has no arithmetic of its own;
//! the context hands these to the NoC instead of calling `execute`.

use crate::packet::PacketKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastKind {
    Normal,
    Multicast,
    Relay,
}

/// All counts are actual values; the descriptor's zero-means-one encoding
/// is resolved by the builder.
#[derive(Debug, Clone)]
pub struct RouterParams {
    pub broadcast: BroadcastKind,
    /// Relay hop vector, applied on repack.
    pub dx: i32,
    pub dy: i32,
    /// Q-flagged packets required before a multicast/relay hop fires.
    pub multicast_relay_num: usize,
    /// Stop-flagged packets required before receive completes.
    pub received_stop_num: usize,
    pub packet_kind: PacketKind,
    pub send_en: bool,
    pub recv_en: bool,
    /// Base byte address of the receive ring.
    pub recv_address: usize,
    /// Byte length of the receive ring; placement offsets wrap through it.
    pub din_length: usize,
    /// Phase bucket receivers collect this router's packets in.
    pub recv_end_phase: u32,
}

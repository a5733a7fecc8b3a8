// TileSim - Neuromorphic Chip Behavior Simulator
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! NoC packet layer: the two wire header shapes, the in-flight packet
//! representation, and the pack / repack / unpack transforms between data
//! blocks and packets.

use crate::block::DataBlock;
use crate::identity::{offset_core, Id};
use crate::primitive::router::RouterParams;
use crate::{SimError, SimResult};
use bitflags::bitflags;

bitflags! {
    /// The four single-bit fields of a wire header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HeadFlags: u32 {
        /// S: instant request.
        const INSTANT = 1 << 0;
        /// T: multi-pack.
        const MULTI = 1 << 1;
        /// P: stop.
        const STOP = 1 << 2;
        /// Q: multicast / relay.
        const RELAY = 1 << 3;
    }
}

/// 32-bit header: `{ S:1 | T:1 | P:1 | Q:1 | X:8 | Y:8 | A:12 }`,
/// low bits first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeadBase {
    pub flags: HeadFlags,
    pub x: i8,
    pub y: i8,
    pub a: u16,
}

impl HeadBase {
    pub fn encode(&self) -> u32 {
        self.flags.bits()
            | ((self.x as u8 as u32) << 4)
            | ((self.y as u8 as u32) << 12)
            | (((self.a as u32) & 0xfff) << 20)
    }

    pub fn decode(word: u32) -> Self {
        HeadBase {
            flags: HeadFlags::from_bits_truncate(word & 0xf),
            x: ((word >> 4) & 0xff) as u8 as i8,
            y: ((word >> 12) & 0xff) as u8 as i8,
            a: ((word >> 20) & 0xfff) as u16,
        }
    }

    pub fn from_le_bytes(bytes: &[u8]) -> SimResult<Self> {
        let word = read_word(bytes, 0)?;
        Ok(Self::decode(word))
    }
}

/// 64-bit header: `HeadBase` followed by
/// `{ pack_per_Rhead:12 | A_offset:12 | Const:7 | EN:1 }`. The count
/// fields encode one less than their value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeadAdvanced {
    pub base: HeadBase,
    pub pack_per_rhead: u16,
    pub a_offset: u16,
    pub const_num: u8,
    pub en: bool,
}

impl HeadAdvanced {
    pub fn encode(&self) -> [u32; 2] {
        let hi = ((self.pack_per_rhead as u32) & 0xfff)
            | (((self.a_offset as u32) & 0xfff) << 12)
            | (((self.const_num as u32) & 0x7f) << 24)
            | ((self.en as u32) << 31);
        [self.base.encode(), hi]
    }

    pub fn decode(lo: u32, hi: u32) -> Self {
        HeadAdvanced {
            base: HeadBase::decode(lo),
            pack_per_rhead: (hi & 0xfff) as u16,
            a_offset: ((hi >> 12) & 0xfff) as u16,
            const_num: ((hi >> 24) & 0x7f) as u8,
            en: (hi >> 31) != 0,
        }
    }

    pub fn from_le_bytes(bytes: &[u8]) -> SimResult<Self> {
        Ok(Self::decode(read_word(bytes, 0)?, read_word(bytes, 4)?))
    }
}

fn read_word(bytes: &[u8], at: usize) -> SimResult<u32> {
    let chunk: [u8; 4] = bytes
        .get(at..at + 4)
        .and_then(|c| c.try_into().ok())
        .ok_or_else(|| SimError::Invariant(format!("truncated packet header ({} bytes)", bytes.len())))?;
    Ok(u32::from_le_bytes(chunk))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Single,
    Multi,
}

/// Routing metadata attached to one in-flight payload.
#[derive(Debug, Clone)]
pub struct PacketHead {
    pub source: Id,
    pub destination: Id,
    /// The Q bit: eligible for multicast or relay pickup.
    pub broadcast_or_relay: bool,
    pub packet_type: PacketKind,
    /// Receive-side placement offset, the A field series.
    pub offset: usize,
    /// The P bit: last packet of its burst.
    pub stop: bool,
    /// Which phase the receiver collects this packet in.
    pub recv_end_phase: u32,
    /// The header's A field, carried for FPGA-side extraction.
    pub block_id: u32,
}

#[derive(Debug, Clone)]
pub struct Packet {
    head: PacketHead,
    data: DataBlock,
}

impl Packet {
    pub fn new(head: PacketHead, data: DataBlock) -> Self {
        Packet { head, data }
    }

    pub fn head(&self) -> &PacketHead {
        &self.head
    }

    pub fn data(&self) -> &DataBlock {
        &self.data
    }
}

/// Per-packet placement address for an advanced header: packet `i` of a
/// burst lands at `start + (i / (c+1)) * (off+1+c) + i % (c+1)` where the
/// encoded `Const` and `A_offset` fields stand for `c` and `off`.
fn calc_address(packet_num: usize, start: usize, const_num: usize, offset: usize) -> usize {
    start + (packet_num / (const_num + 1)) * (offset + 1 + const_num) + packet_num % (const_num + 1)
}

/// Builds packets from a router PI's input blocks. The blocks alternate
/// header, payload, payload, ...: a 4-byte header opens a burst of one
/// packet, an 8-byte header a burst of `pack_per_Rhead + 1`. A disabled
/// advanced header skips its whole burst of payload slots.
pub fn pack(blocks: &[DataBlock], para: &RouterParams) -> SimResult<Vec<Packet>> {
    let mut packets = Vec::new();

    let mut total = 0usize;
    let mut remain = 0usize;
    let mut skip = 0usize;
    let mut head = HeadBase::default();
    let mut series = (0usize, 0usize, 0usize); // (start, const, offset)
    let mut destination = Id::invalid();

    for block in blocks {
        if skip > 0 {
            skip -= 1;
            continue;
        }
        if remain == 0 {
            if !block.id().is_packet_header() {
                continue;
            }
            match block.length() {
                4 => {
                    head = HeadBase::from_le_bytes(block.bytes())?;
                    series = (head.a as usize, 0, 0);
                    total = 1;
                    remain = 1;
                }
                8 => {
                    let adv = HeadAdvanced::from_le_bytes(block.bytes())?;
                    if !adv.en {
                        skip = adv.pack_per_rhead as usize + 1;
                        continue;
                    }
                    head = adv.base;
                    series = (head.a as usize, adv.const_num as usize, adv.a_offset as usize);
                    total = adv.pack_per_rhead as usize + 1;
                    remain = total;
                }
                other => {
                    return Err(SimError::Invariant(format!(
                        "packet header block {} has length {other}, expected 4 or 8",
                        block.id()
                    )));
                }
            }
            let declared_multi = head.flags.contains(HeadFlags::MULTI);
            if declared_multi != (para.packet_kind == PacketKind::Multi) {
                return Err(SimError::Invariant(format!(
                    "header T bit disagrees with router multi-pack flag on {}",
                    block.id()
                )));
            }
            destination = offset_core(&block.id().core_id(), head.x as i32, head.y as i32);
        } else {
            let (start, const_num, offset) = series;
            remain -= 1;
            packets.push(Packet::new(
                PacketHead {
                    source: block.id().core_id(),
                    destination: destination.clone(),
                    broadcast_or_relay: head.flags.contains(HeadFlags::RELAY),
                    packet_type: para.packet_kind,
                    offset: calc_address(total - remain - 1, start, const_num, offset),
                    stop: remain == 0,
                    recv_end_phase: para.recv_end_phase,
                    block_id: head.a as u32,
                },
                block.clone(),
            ));
        }
    }
    Ok(packets)
}

/// Rewrites multicast/relay packets for their next hop: the receiving core
/// becomes the source and the relay vector picks the new destination.
pub fn repack(packets: &[Packet], para: &RouterParams) -> Vec<Packet> {
    packets
        .iter()
        .map(|packet| {
            let mut head = packet.head().clone();
            head.source = head.destination.clone();
            head.destination = offset_core(&head.source, para.dx, para.dy);
            Packet::new(head, packet.data().clone())
        })
        .collect()
}

/// Turns received packets into data blocks on the destination core. The
/// placement offset wraps through the receiver's circular input buffer;
/// multi-pack offsets count 8-byte slots.
pub fn unpack(packets: &[Packet], para: &RouterParams) -> Vec<DataBlock> {
    let din = para.din_length.max(1);
    packets
        .iter()
        .map(|packet| {
            let head = packet.head();
            let slide = match head.packet_type {
                PacketKind::Multi => (head.offset * 8) % din,
                PacketKind::Single => head.offset % din,
            };
            let name = format!("{}recv", packet.data().id().module_str());
            DataBlock::landed(
                &head.destination,
                &name,
                packet.data(),
                para.recv_address + slide,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitive::router::{BroadcastKind, RouterParams};

    fn core(x: u32, y: u32) -> Id {
        Id::core(&Id::chip(&Id::chip_array("t"), 0, 0), x, y)
    }

    fn single_params() -> RouterParams {
        RouterParams {
            broadcast: BroadcastKind::Normal,
            dx: 0,
            dy: 0,
            multicast_relay_num: 0,
            received_stop_num: 1,
            packet_kind: PacketKind::Single,
            send_en: true,
            recv_en: false,
            recv_address: 0x400,
            din_length: 0x100,
            recv_end_phase: 0,
        }
    }

    #[test]
    fn head_base_bit_layout() {
        let head = HeadBase {
            flags: HeadFlags::STOP | HeadFlags::MULTI,
            x: 1,
            y: -2,
            a: 0x100,
        };
        let word = head.encode();
        // S=0 T=1 P=1 Q=0 | X=0x01 | Y=0xFE | A=0x100
        assert_eq!(word, 0b0110 | (0x01 << 4) | (0xFE << 12) | (0x100 << 20));
        assert_eq!(HeadBase::decode(word), head);
    }

    #[test]
    fn head_advanced_bit_layout() {
        let head = HeadAdvanced {
            base: HeadBase {
                flags: HeadFlags::RELAY,
                x: -1,
                y: 0,
                a: 0xABC,
            },
            pack_per_rhead: 2,
            a_offset: 5,
            const_num: 3,
            en: true,
        };
        let [lo, hi] = head.encode();
        assert_eq!(lo, 0b1000 | (0xFF << 4) | (0xABC << 20));
        assert_eq!(hi, 2 | (5 << 12) | (3 << 24) | (1 << 31));
        assert_eq!(HeadAdvanced::decode(lo, hi), head);
    }

    #[test]
    fn address_series_steps_through_groups() {
        // Const = 1 (two per group), A_offset = 2 -> group stride 4
        let at = |i| calc_address(i, 0x10, 1, 2);
        assert_eq!(at(0), 0x10);
        assert_eq!(at(1), 0x11);
        assert_eq!(at(2), 0x14);
        assert_eq!(at(3), 0x15);
        assert_eq!(at(4), 0x18);
    }

    #[test]
    fn pack_single_header_emits_one_stop_packet() {
        let src = core(0, 0);
        let head = HeadBase {
            flags: HeadFlags::STOP,
            x: 1,
            y: 0,
            a: 0x100,
        };
        let header = DataBlock::new(
            &src,
            "packet_header_0",
            Some(head.encode().to_le_bytes().to_vec().into()),
            0,
            4,
        );
        let payload = DataBlock::new(&src, "dout", Some(vec![0xEF, 0xBE, 0xAD, 0xDE].into()), 4, 4);

        let packets = pack(&[header, payload], &single_params()).unwrap();
        assert_eq!(packets.len(), 1);
        let head = packets[0].head();
        assert!(head.stop);
        assert_eq!(head.offset, 0x100);
        assert_eq!(head.destination, core(1, 0));
        assert_eq!(head.source, core(0, 0));
        assert_eq!(packets[0].data().bytes(), &[0xEF, 0xBE, 0xAD, 0xDE]);
    }

    #[test]
    fn pack_disabled_advanced_header_skips_burst() {
        let src = core(0, 0);
        let adv = HeadAdvanced {
            base: HeadBase {
                flags: HeadFlags::empty(),
                x: 1,
                y: 0,
                a: 0,
            },
            pack_per_rhead: 1,
            a_offset: 0,
            const_num: 0,
            en: false,
        };
        let [lo, hi] = adv.encode();
        let mut bytes = lo.to_le_bytes().to_vec();
        bytes.extend_from_slice(&hi.to_le_bytes());
        let header = DataBlock::new(&src, "packet_header_0", Some(bytes.into()), 0, 8);
        let p0 = DataBlock::new(&src, "d0", Some(vec![1; 8].into()), 8, 8);
        let p1 = DataBlock::new(&src, "d1", Some(vec![2; 8].into()), 16, 8);

        let packets = pack(&[header, p0, p1], &single_params()).unwrap();
        assert!(packets.is_empty());
    }

    #[test]
    fn pack_rejects_mismatched_multi_flag() {
        let src = core(0, 0);
        let head = HeadBase {
            flags: HeadFlags::MULTI | HeadFlags::STOP,
            x: 1,
            y: 0,
            a: 0,
        };
        let header = DataBlock::new(
            &src,
            "packet_header_0",
            Some(head.encode().to_le_bytes().to_vec().into()),
            0,
            4,
        );
        let payload = DataBlock::new(&src, "dout", Some(vec![0; 4].into()), 4, 4);
        assert!(matches!(
            pack(&[header, payload], &single_params()),
            Err(SimError::Invariant(_))
        ));
    }

    #[test]
    fn unpack_places_by_offset_order() {
        let mut para = single_params();
        para.packet_kind = PacketKind::Multi;
        let src = core(0, 0);
        let adv = HeadAdvanced {
            base: HeadBase {
                flags: HeadFlags::MULTI | HeadFlags::STOP,
                x: 1,
                y: 0,
                a: 2,
            },
            pack_per_rhead: 2,
            a_offset: 0,
            const_num: 0,
            en: true,
        };
        let [lo, hi] = adv.encode();
        let mut bytes = lo.to_le_bytes().to_vec();
        bytes.extend_from_slice(&hi.to_le_bytes());
        let header = DataBlock::new(&src, "packet_header_0", Some(bytes.into()), 0, 8);
        let payloads: Vec<DataBlock> = (0u8..3)
            .map(|i| DataBlock::new(&src, &format!("d{i}"), Some(vec![i; 8].into()), 0, 8))
            .collect();

        let mut blocks = vec![header];
        blocks.extend(payloads);
        let packets = pack(&blocks, &para).unwrap();
        assert_eq!(packets.len(), 3);
        assert_eq!(
            packets.iter().map(|p| p.head().offset).collect::<Vec<_>>(),
            vec![2, 3, 4]
        );
        assert!(packets[2].head().stop);
        assert!(!packets[0].head().stop);

        let landed = unpack(&packets, &para);
        let starts: Vec<usize> = landed.iter().map(|b| b.start()).collect();
        assert_eq!(starts, vec![0x400 + 16, 0x400 + 24, 0x400 + 32]);
        // payload bytes survive the trip untouched
        for (i, block) in landed.iter().enumerate() {
            assert_eq!(block.bytes(), &[i as u8; 8]);
        }
    }

    #[test]
    fn repack_shifts_source_and_destination() {
        let src = core(0, 0);
        let head = HeadBase {
            flags: HeadFlags::STOP | HeadFlags::RELAY,
            x: 1,
            y: 0,
            a: 0,
        };
        let header = DataBlock::new(
            &src,
            "packet_header_0",
            Some(head.encode().to_le_bytes().to_vec().into()),
            0,
            4,
        );
        let payload = DataBlock::new(&src, "dout", Some(vec![7; 4].into()), 4, 4);
        let packets = pack(&[header, payload], &single_params()).unwrap();

        let mut para = single_params();
        para.dx = 1;
        para.dy = 0;
        let hopped = repack(&packets, &para);
        assert_eq!(hopped[0].head().source, core(1, 0));
        assert_eq!(hopped[0].head().destination, core(2, 0));
        assert!(hopped[0].head().stop);
        assert!(hopped[0].head().broadcast_or_relay);
    }
}

// TileSim - Neuromorphic Chip Behavior Simulator
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! The network-on-chip: per-destination per-phase packet inboxes, the
//! per-core router state machine, and FPGA-side packet extraction.
//!
//! `route` is a fall-through cascade over
//! `Init -> Send -> Relay -> Received -> Success`: each invocation resumes
//! from the core's recorded state and advances as far as its preconditions
//! allow. A failed precondition returns the current state so the caller
//! can yield and retry; no lock is ever held across that yield.

use crate::block::DataBlock;
use crate::identity::Id;
use crate::packet::{pack, repack, unpack, Packet};
use crate::primitive::router::{BroadcastKind, RouterParams};
use crate::{SimError, SimResult};
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Init,
    Send,
    Relay,
    Received,
    Success,
}

impl RouterState {
    pub fn is_success(self) -> bool {
        self == RouterState::Success
    }
}

type PacketPool = HashMap<Id, HashMap<u32, VecDeque<Packet>>>;

#[derive(Default)]
pub struct Noc {
    packet_pool: RwLock<PacketPool>,
    state_pool: RwLock<HashMap<Id, RouterState>>,
}

impl Noc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current router state for `core_id`, creating the `Init` entry on
    /// first sight.
    pub fn core_state(&self, core_id: &Id) -> RouterState {
        {
            let states = self.state_pool.read().expect("state lock poisoned");
            if let Some(state) = states.get(core_id) {
                return *state;
            }
        }
        let mut states = self.state_pool.write().expect("state lock poisoned");
        *states.entry(core_id.clone()).or_insert(RouterState::Init)
    }

    fn set_state(&self, core_id: &Id, state: RouterState) {
        let mut states = self.state_pool.write().expect("state lock poisoned");
        states.insert(core_id.clone(), state);
    }

    fn clear_state(&self, core_id: &Id) {
        let mut states = self.state_pool.write().expect("state lock poisoned");
        states.remove(core_id);
    }

    /// Deposits packets into their destinations' phase buckets. FIFO per
    /// bucket under the pool write lock.
    pub fn send(&self, packets: Vec<Packet>) {
        let mut pool = self.packet_pool.write().expect("pool lock poisoned");
        for packet in packets {
            pool.entry(packet.head().destination.clone())
                .or_default()
                .entry(packet.head().recv_end_phase)
                .or_default()
                .push_back(packet);
        }
    }

    fn multicast_relay_count(&self, core_id: &Id, phase: u32) -> usize {
        let pool = self.packet_pool.read().expect("pool lock poisoned");
        pool.get(core_id)
            .and_then(|phases| phases.get(&phase))
            .map(|q| q.iter().filter(|p| p.head().broadcast_or_relay).count())
            .unwrap_or(0)
    }

    fn stop_count(&self, core_id: &Id, phase: u32) -> usize {
        let pool = self.packet_pool.read().expect("pool lock poisoned");
        pool.get(core_id)
            .and_then(|phases| phases.get(&phase))
            .map(|q| q.iter().filter(|p| p.head().stop).count())
            .unwrap_or(0)
    }

    /// One router FSM step for `core_id`. Returns `Success` once every
    /// enabled stage has completed, or the state it is stuck in; the
    /// context yields and re-invokes on anything but `Success`.
    pub fn route(
        &self,
        core_id: &Id,
        in_blocks: &[DataBlock],
        out_blocks: &mut Vec<DataBlock>,
        para: &RouterParams,
        phase: u32,
    ) -> SimResult<RouterState> {
        let mut state = self.core_state(core_id);

        if state == RouterState::Init {
            if para.send_en {
                self.send(pack(in_blocks, para)?);
            }
            state = RouterState::Send;
            self.set_state(core_id, state);
        }

        if state == RouterState::Send {
            if para.broadcast != BroadcastKind::Normal {
                let waiting = self.multicast_relay_count(core_id, phase);
                if waiting < para.multicast_relay_num {
                    trace!(core = %core_id, waiting, need = para.multicast_relay_num, "relay wait");
                    return Ok(RouterState::Send);
                }
                let picked = match para.broadcast {
                    BroadcastKind::Multicast => self.peek_flagged(core_id, phase, para.multicast_relay_num),
                    BroadcastKind::Relay => self.take_flagged(core_id, phase, para.multicast_relay_num),
                    BroadcastKind::Normal => unreachable!(),
                };
                self.send(repack(&picked, para));
            }
            state = RouterState::Relay;
            self.set_state(core_id, state);
        }

        if state == RouterState::Relay {
            if para.recv_en {
                if self.stop_count(core_id, phase) < para.received_stop_num {
                    return Ok(RouterState::Relay);
                }
                let received = self.take_until_stops(core_id, phase, para.received_stop_num);
                *out_blocks = unpack(&received, para);
            }
            state = RouterState::Received;
            self.set_state(core_id, state);
        }

        if state == RouterState::Received {
            self.clear_state(core_id);
            return Ok(RouterState::Success);
        }

        Err(SimError::Invariant(format!(
            "router state machine for {core_id} resumed in {state:?}"
        )))
    }

    /// Clones the first `count` Q-flagged packets, leaving the pool
    /// untouched (multicast keeps the originals for the local receive).
    fn peek_flagged(&self, core_id: &Id, phase: u32, count: usize) -> Vec<Packet> {
        let pool = self.packet_pool.read().expect("pool lock poisoned");
        pool.get(core_id)
            .and_then(|phases| phases.get(&phase))
            .map(|q| {
                q.iter()
                    .filter(|p| p.head().broadcast_or_relay)
                    .take(count)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Removes and returns the first `count` Q-flagged packets (relay
    /// forwards them instead of keeping them).
    fn take_flagged(&self, core_id: &Id, phase: u32, count: usize) -> Vec<Packet> {
        let mut pool = self.packet_pool.write().expect("pool lock poisoned");
        let Some(queue) = pool.get_mut(core_id).and_then(|phases| phases.get_mut(&phase)) else {
            return Vec::new();
        };
        let mut picked = Vec::with_capacity(count);
        let mut rest = VecDeque::with_capacity(queue.len());
        for packet in queue.drain(..) {
            if picked.len() < count && packet.head().broadcast_or_relay {
                picked.push(packet);
            } else {
                rest.push_back(packet);
            }
        }
        *queue = rest;
        picked
    }

    /// Drains the pool prefix up to and including the `need`-th
    /// stop-flagged packet; later arrivals stay queued.
    fn take_until_stops(&self, core_id: &Id, phase: u32, need: usize) -> Vec<Packet> {
        let mut pool = self.packet_pool.write().expect("pool lock poisoned");
        let Some(queue) = pool.get_mut(core_id).and_then(|phases| phases.get_mut(&phase)) else {
            return Vec::new();
        };
        let mut received = Vec::new();
        let mut stops = 0;
        while let Some(packet) = queue.pop_front() {
            let is_stop = packet.head().stop;
            received.push(packet);
            if is_stop {
                stops += 1;
                if stops == need {
                    break;
                }
            }
        }
        received
    }

    /// Number of packets parked for `(core, phase)`; used by tests and
    /// the watchdog log.
    pub fn pending(&self, core_id: &Id, phase: u32) -> usize {
        let pool = self.packet_pool.read().expect("pool lock poisoned");
        pool.get(core_id)
            .and_then(|phases| phases.get(&phase))
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Drains FPGA-bound packets for `(source, block_id)` in `phase`,
    /// checks the count against the descriptor's expectation, and returns
    /// the payload bytes concatenated in placement-offset order.
    pub fn extract(
        &self,
        source: &Id,
        phase: u32,
        block_id: u32,
        expected: usize,
    ) -> SimResult<Vec<u8>> {
        let mut matched = Vec::new();
        {
            let mut pool = self.packet_pool.write().expect("pool lock poisoned");
            if let Some(queue) = pool
                .get_mut(&Id::fpga())
                .and_then(|phases| phases.get_mut(&phase))
            {
                let mut rest = VecDeque::with_capacity(queue.len());
                for packet in queue.drain(..) {
                    if packet.head().source == *source && packet.head().block_id == block_id {
                        matched.push(packet);
                    } else {
                        rest.push_back(packet);
                    }
                }
                *queue = rest;
            }
        }
        if matched.len() != expected {
            return Err(SimError::CountMismatch {
                expected,
                actual: matched.len(),
            });
        }
        matched.sort_by_key(|p| p.head().offset);
        let mut bytes = Vec::new();
        for packet in &matched {
            let data = packet.data();
            let take = data.length().min(data.bytes().len());
            bytes.extend_from_slice(&data.bytes()[..take]);
        }
        Ok(bytes)
    }
}

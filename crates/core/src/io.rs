// TileSim - Neuromorphic Chip Behavior Simulator
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Client side of the external IO streamer: pulls dynamic input blocks in
//! and ships dynamic output blocks (extracted from the NoC's FPGA pool)
//! out. Wire format: a 4-byte big-endian length followed by a serialized
//! `Request`; responses are a 4-byte big-endian length (`-1` no block,
//! `-2` terminator) followed by raw data in 64 KiB chunks.

use crate::context::Context;
use crate::identity::Id;
use crate::{SimError, SimResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const BUFFER_SIZE: usize = 1 << 16;
/// Polling interval for responses; disconnections retry on this cadence.
const SELECT_TIMEOUT: Duration = Duration::from_secs(5);
const RECONNECT_PAUSE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    StaticData,
    DynamicInput,
    OutputData,
}

/// One streamer exchange. Mirrors the descriptor's IO block fields so the
/// server can locate the case data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub request_type: RequestKind,
    pub id: String,
    pub block_id: u32,
    pub phase_id: u32,
    pub seed: i32,
    pub precision: u32,
    pub shape: Vec<i32>,
    pub block_size: usize,
    pub begin_position: Vec<i32>,
    pub socket_id: i32,
    pub nth: i32,
    pub total_blocks: i32,
    pub case_name: String,
    pub storage_path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<u8>,
}

/// Per-core streamer client. Requests are registered at build time; the
/// connection is opened lazily on the first phase that needs it.
pub struct StreamerClient {
    core_id: Id,
    port: u16,
    conn: Mutex<Option<TcpStream>>,
    /// Input requests per phase, paired with the block they stitch into.
    requests: HashMap<u32, Vec<(Id, Request)>>,
    o_requests: HashMap<u32, Vec<Request>>,
}

impl StreamerClient {
    pub fn new(core_id: Id, port: u16) -> Self {
        StreamerClient {
            core_id,
            port,
            conn: Mutex::new(None),
            requests: HashMap::new(),
            o_requests: HashMap::new(),
        }
    }

    pub fn add_input_request(&mut self, phase: u32, block_id: Id, request: Request) {
        self.requests.entry(phase).or_default().push((block_id, request));
    }

    pub fn add_output_request(&mut self, phase: u32, request: Request) {
        self.o_requests.entry(phase).or_default().push(request);
    }

    pub fn has_requests(&self) -> bool {
        !self.requests.is_empty() || !self.o_requests.is_empty()
    }

    /// Sends every input request registered for `phase` and stitches each
    /// response into its destination block.
    pub fn do_irequest(&self, ctx: &Context, phase: u32) -> SimResult<()> {
        let Some(requests) = self.requests.get(&phase) else {
            return Ok(());
        };
        info!(core = %self.core_id, phase, "requesting input blocks from streamer");
        let mut guard = self.conn.lock().expect("streamer lock poisoned");

        for (block_id, request) in requests {
            if request.request_type == RequestKind::OutputData {
                continue;
            }
            match self.exchange(&mut guard, request)? {
                Response::Data(data) => {
                    let block = ctx.vmem().update_block_data(block_id, data.into())?;
                    ctx.write_memory_block(&block)?;
                    debug!(block = %block_id, "input block stitched in");
                }
                Response::NoBlock => {
                    error!(block = %block_id, "streamer reports no block data");
                }
                Response::Terminator => {}
            }
        }
        Ok(())
    }

    /// Extracts this core's FPGA-bound packets for `phase` and ships them
    /// to the streamer.
    pub fn do_orequest(&self, ctx: &Context, phase: u32) -> SimResult<()> {
        let Some(requests) = self.o_requests.get(&phase) else {
            return Ok(());
        };
        info!(core = %self.core_id, phase, "flushing output blocks to streamer");
        let mut guard = self.conn.lock().expect("streamer lock poisoned");

        for request in requests {
            if request.request_type != RequestKind::OutputData {
                continue;
            }
            let expected = request.block_size / 2;
            let data = match ctx.noc().extract(&self.core_id, phase, request.block_id, expected) {
                Ok(data) => data,
                Err(SimError::CountMismatch { actual: 0, .. }) => {
                    error!(core = %self.core_id, phase, "this phase routed no output");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if data.is_empty() {
                continue;
            }
            let mut framed = request.clone();
            framed.data = data;
            // the server acks each output with a terminator frame
            let _ = self.exchange(&mut guard, &framed)?;
        }
        Ok(())
    }

    /// One request/response exchange. A dropped connection is recoverable:
    /// reconnect and resend until the streamer answers.
    fn exchange(&self, guard: &mut Option<TcpStream>, request: &Request) -> SimResult<Response> {
        loop {
            self.ensure_connected(guard);
            let stream = guard.as_mut().expect("connected above");
            let attempt = send_request(stream, request).and_then(|()| read_response(stream));
            match attempt {
                Err(SimError::IoUnavailable(msg)) => {
                    warn!(core = %self.core_id, %msg, "streamer dropped, reconnecting");
                    *guard = None;
                    std::thread::sleep(RECONNECT_PAUSE);
                }
                other => return other,
            }
        }
    }

    /// Blocks until a connection exists. A down streamer is a recoverable
    /// condition, so this retries forever.
    fn ensure_connected(&self, guard: &mut Option<TcpStream>) {
        while guard.is_none() {
            let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.port));
            match TcpStream::connect(addr) {
                Ok(stream) => {
                    let _ = stream.set_read_timeout(Some(SELECT_TIMEOUT));
                    info!(core = %self.core_id, %addr, "connected to streamer");
                    *guard = Some(stream);
                }
                Err(e) => {
                    warn!(core = %self.core_id, error = %e, "waiting for streamer ...");
                    std::thread::sleep(RECONNECT_PAUSE);
                }
            }
        }
    }
}

enum Response {
    Data(Vec<u8>),
    NoBlock,
    Terminator,
}

fn send_request(stream: &mut TcpStream, request: &Request) -> SimResult<()> {
    let payload = serde_json::to_vec(request)
        .map_err(|e| SimError::Invariant(format!("request serialization failed: {e}")))?;
    let write = |stream: &mut TcpStream, bytes: &[u8]| {
        stream.write_all(bytes).map_err(|e| match e.kind() {
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::UnexpectedEof => {
                SimError::IoUnavailable(format!("write failed: {e}"))
            }
            _ => SimError::Io(e),
        })
    };
    write(stream, &(payload.len() as u32).to_be_bytes())?;
    write(stream, &payload)?;
    Ok(())
}

/// Reads one length-prefixed response, treating read timeouts as polling
/// ticks rather than failures.
fn read_response(stream: &mut TcpStream) -> SimResult<Response> {
    let mut prefix = [0u8; 4];
    read_exact_retry(stream, &mut prefix)?;
    let total = i32::from_be_bytes(prefix);
    match total {
        -1 => return Ok(Response::NoBlock),
        -2 => return Ok(Response::Terminator),
        t if t < 0 => {
            return Err(SimError::Invariant(format!(
                "streamer sent bogus length {t}"
            )));
        }
        _ => {}
    }
    let mut data = vec![0u8; total as usize];
    let mut at = 0usize;
    while at < data.len() {
        let end = (at + BUFFER_SIZE).min(data.len());
        read_exact_retry(stream, &mut data[at..end])?;
        at = end;
    }
    Ok(Response::Data(data))
}

fn read_exact_retry(stream: &mut TcpStream, buf: &mut [u8]) -> SimResult<()> {
    let mut at = 0usize;
    while at < buf.len() {
        match stream.read(&mut buf[at..]) {
            Ok(0) => {
                return Err(SimError::IoUnavailable(
                    "streamer closed the connection".to_string(),
                ));
            }
            Ok(n) => at += n,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                debug!("streamer poll timeout, retrying");
                continue;
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::ConnectionReset
                    || e.kind() == std::io::ErrorKind::ConnectionAborted =>
            {
                return Err(SimError::IoUnavailable(format!("read failed: {e}")));
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

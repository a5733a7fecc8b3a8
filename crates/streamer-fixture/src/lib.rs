//! Stub IO streamer server for integration tests: hosts input blocks in
//! memory, records output blocks, and speaks the simulator client's
//! length-prefixed wire format.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tilesim_core::io::{Request, RequestKind};
use tracing::{debug, info, warn};

pub type OutputStore = Arc<Mutex<HashMap<String, Vec<u8>>>>;

pub struct StubStreamer {
    listener: TcpListener,
    inputs: HashMap<String, Vec<u8>>,
    outputs: OutputStore,
    output_dir: Option<PathBuf>,
}

impl StubStreamer {
    /// Binds the stub; pass port 0 for an ephemeral port.
    pub fn bind(port: u16) -> std::io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))?;
        Ok(StubStreamer {
            listener,
            inputs: HashMap::new(),
            outputs: Arc::new(Mutex::new(HashMap::new())),
            output_dir: None,
        })
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    /// Registers input bytes under a block name. Lookups match either the
    /// full dotted identity or just its leaf segment.
    pub fn add_input(&mut self, name: &str, bytes: Vec<u8>) {
        self.inputs.insert(name.to_string(), bytes);
    }

    /// Received output blocks, keyed by block id.
    pub fn outputs(&self) -> OutputStore {
        self.outputs.clone()
    }

    /// Also persist each received output block as `<id>.bin` here.
    pub fn set_output_dir(&mut self, dir: PathBuf) {
        self.output_dir = Some(dir);
    }

    /// Accepts clients forever, one thread per connection.
    pub fn serve(self) -> JoinHandle<()> {
        let StubStreamer {
            listener,
            inputs,
            outputs,
            output_dir,
        } = self;
        let inputs = Arc::new(inputs);
        std::thread::spawn(move || {
            info!(port = listener.local_addr().map(|a| a.port()).unwrap_or(0), "stub streamer up");
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let inputs = inputs.clone();
                let outputs = outputs.clone();
                let output_dir = output_dir.clone();
                std::thread::spawn(move || {
                    if let Err(e) = serve_client(stream, &inputs, &outputs, output_dir.as_deref()) {
                        debug!(error = %e, "client connection ended");
                    }
                });
            }
        })
    }
}

fn serve_client(
    mut stream: TcpStream,
    inputs: &HashMap<String, Vec<u8>>,
    outputs: &OutputStore,
    output_dir: Option<&std::path::Path>,
) -> anyhow::Result<()> {
    loop {
        let mut prefix = [0u8; 4];
        if let Err(e) = stream.read_exact(&mut prefix) {
            // client hung up between requests
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                return Ok(());
            }
            return Err(e.into());
        }
        let len = u32::from_be_bytes(prefix) as usize;
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload)?;
        let request: Request = serde_json::from_slice(&payload)?;
        debug!(id = %request.id, kind = ?request.request_type, "request");

        match request.request_type {
            RequestKind::StaticData | RequestKind::DynamicInput => {
                let leaf = request.id.split('.').next().unwrap_or("");
                let found = inputs.get(&request.id).or_else(|| inputs.get(leaf));
                match found {
                    Some(bytes) => {
                        stream.write_all(&(bytes.len() as i32).to_be_bytes())?;
                        stream.write_all(bytes)?;
                    }
                    None => {
                        warn!(id = %request.id, "no such input block");
                        stream.write_all(&(-1i32).to_be_bytes())?;
                    }
                }
            }
            RequestKind::OutputData => {
                if let Some(dir) = output_dir {
                    let _ = std::fs::create_dir_all(dir);
                    std::fs::write(dir.join(format!("{}.bin", request.id)), &request.data)?;
                }
                outputs
                    .lock()
                    .expect("output store poisoned")
                    .insert(request.id.clone(), request.data.clone());
                stream.write_all(&(-2i32).to_be_bytes())?;
            }
        }
    }
}

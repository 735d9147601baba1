use std::io::{self, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::dispatch;
use crate::request::{Request, Response};
use crate::state::{Connections, ServerState};

/// Frames larger than this are rejected as corrupt.
const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

/// Read one length-framed message: a u32 big-endian byte count, then the
/// payload. `Ok(None)` signals a clean end of stream.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let length = u32::from_be_bytes(header);
    if length > MAX_FRAME_BYTES {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
    }
    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload)?;
    Ok(Some(payload))
}

pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    writer.write_all(&(payload.len() as u32).to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()
}

/// A decoded request paired with the stream its response goes back on.
struct Inbound {
    request: Request,
    reply: TcpStream,
}

pub struct Server {
    listener: TcpListener,
}

impl Server {
    pub fn bind(port: u16) -> io::Result<Server> {
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        Ok(Server { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until a stop request. Reader threads decode frames and forward
    /// them over a channel; this thread dispatches one request at a time
    /// and writes every response itself.
    pub fn run(self, mut state: ServerState, config: &ServerConfig) -> io::Result<()> {
        let addr = self.listener.local_addr()?;
        info!(%addr, "listening");
        {
            let mut connections = state.connections.lock().unwrap_or_else(|e| e.into_inner());
            connections.listener = Some(self.listener.try_clone()?);
        }

        let (sender, receiver): (Sender<Inbound>, Receiver<Inbound>) = unbounded();
        let accept_connections = Arc::clone(&state.connections);
        let listener = self.listener;
        let accept_thread = std::thread::spawn(move || {
            accept_loop(listener, sender, accept_connections);
        });

        for inbound in receiver.iter() {
            let mut reply = inbound.reply;
            match dispatch::process(&mut state, config, inbound.request) {
                Ok(Some(response)) => {
                    if let Err(e) = send_response(&mut reply, &response) {
                        warn!("failed to write response: {e}");
                    }
                }
                Ok(None) => {}
                Err(e) => error!("request failed: {e}"),
            }
            if state.shutdown_requested {
                // The stop response is already on the wire; now tear the
                // listener down so further connects fail.
                stop_listener(&state.connections, addr);
                break;
            }
        }

        let _ = accept_thread.join();
        info!("server stopped");
        Ok(())
    }
}

fn send_response(stream: &mut TcpStream, response: &Response) -> io::Result<()> {
    let payload = serde_json::to_vec(response)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    write_frame(stream, &payload)
}

fn accept_loop(
    listener: TcpListener,
    sender: Sender<Inbound>,
    connections: Arc<Mutex<Connections>>,
) {
    loop {
        let accepted = listener.accept();
        if connections.lock().unwrap_or_else(|e| e.into_inner()).stopping {
            break;
        }
        match accepted {
            Ok((stream, peer)) => {
                info!(%peer, "client connected");
                {
                    let mut connections =
                        connections.lock().unwrap_or_else(|e| e.into_inner());
                    connections.persistent_clients += 1;
                }
                let sender = sender.clone();
                let connections = Arc::clone(&connections);
                std::thread::spawn(move || client_reader(stream, sender, connections));
            }
            Err(e) => {
                warn!("accept failed: {e}");
                break;
            }
        }
    }
}

/// Decode frames off one client connection and forward them for dispatch.
/// Exits on end of stream or a framing error.
fn client_reader(
    stream: TcpStream,
    sender: Sender<Inbound>,
    connections: Arc<Mutex<Connections>>,
) {
    let Ok(read_half) = stream.try_clone() else {
        return;
    };
    let mut reader = BufReader::new(read_half);
    loop {
        match read_frame(&mut reader) {
            Ok(Some(payload)) => match serde_json::from_slice::<Request>(&payload) {
                Ok(request) => {
                    let Ok(reply) = stream.try_clone() else {
                        break;
                    };
                    if sender.send(Inbound { request, reply }).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("undecodable request frame: {e}"),
            },
            Ok(None) => break,
            Err(e) => {
                warn!("connection read failed: {e}");
                break;
            }
        }
    }
    let mut connections = connections.lock().unwrap_or_else(|e| e.into_inner());
    connections.persistent_clients = connections.persistent_clients.saturating_sub(1);
}

/// Drop every listener handle and nudge the accept loop awake so it
/// observes the stop flag.
fn stop_listener(connections: &Arc<Mutex<Connections>>, addr: SocketAddr) {
    {
        let mut connections = connections.lock().unwrap_or_else(|e| e.into_inner());
        connections.stop();
    }
    let _ = TcpStream::connect(addr);
}

#![allow(dead_code)]

use std::io::BufReader;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use pyty::request::{Request, Response};
use pyty::server::{read_frame, write_frame};

/// Blocking test client speaking the server's length-framed protocol.
pub struct FramedClient {
    write: TcpStream,
    read: BufReader<TcpStream>,
}

impl FramedClient {
    /// Connect, retrying briefly while the server thread binds.
    pub fn connect(addr: SocketAddr) -> FramedClient {
        let mut last_error = None;
        for _ in 0..50 {
            match TcpStream::connect(addr) {
                Ok(stream) => {
                    let read = BufReader::new(stream.try_clone().expect("clone stream"));
                    return FramedClient { write: stream, read };
                }
                Err(e) => {
                    last_error = Some(e);
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        }
        panic!("could not connect to server: {last_error:?}");
    }

    pub fn send(&mut self, request: &Request) {
        let payload = serde_json::to_vec(request).expect("encode request");
        write_frame(&mut self.write, &payload).expect("write frame");
    }

    pub fn recv(&mut self) -> Response {
        let payload = read_frame(&mut self.read)
            .expect("read frame")
            .expect("response frame before end of stream");
        serde_json::from_slice(&payload).expect("decode response")
    }
}

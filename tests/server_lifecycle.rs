mod common;

use std::net::TcpStream;
use std::time::Duration;

use common::framed_client::FramedClient;
use pyty::config::ServerConfig;
use pyty::request::{Request, Response};
use pyty::server::Server;
use pyty::state::ServerState;

fn start_server(
    sources: &[(&str, &str)],
) -> (tempfile::TempDir, std::net::SocketAddr, std::thread::JoinHandle<std::io::Result<()>>) {
    let dir = tempfile::tempdir().expect("tempdir");
    for (relative, content) in sources {
        std::fs::write(dir.path().join(relative), content).expect("write source");
    }
    let config = ServerConfig::for_root(dir.path());
    let state = ServerState::new(&config).expect("server state");
    let server = Server::bind(0).expect("bind");
    let addr = server.local_addr().expect("local addr");
    let handle = std::thread::spawn(move || server.run(state, &config));
    (dir, addr, handle)
}

/// A full framed round trip: check a file over the socket, read back its
/// diagnostics, then stop the server.
#[test]
fn framed_type_check_round_trip() {
    let (dir, addr, handle) = start_server(&[("a.py", "x: int = \"oops\"\n")]);
    let mut client = FramedClient::connect(addr);

    client.send(&Request::TypeCheck {
        update_environment_with: vec![dir.path().join("a.py")],
        check: vec![dir.path().join("a.py")],
    });
    let Response::TypeCheck { errors } = client.recv() else {
        panic!("expected a type-check response");
    };
    assert_eq!(errors["a.py"].len(), 1);
    assert_eq!(errors["a.py"][0].code, "incompatible-assignment");

    client.send(&Request::Stop);
    assert_eq!(client.recv(), Response::Stop);
    handle.join().expect("server thread").expect("clean shutdown");
}

/// The stop response reaches the caller before teardown, and afterwards
/// new connections are refused.
#[test]
fn stop_tears_down_the_listener() {
    let (_dir, addr, handle) = start_server(&[]);
    let mut client = FramedClient::connect(addr);

    client.send(&Request::Stop);
    assert_eq!(client.recv(), Response::Stop);
    handle.join().expect("server thread").expect("clean shutdown");

    // Every listener handle is gone; connects must now fail.
    let mut refused = false;
    for _ in 0..50 {
        match TcpStream::connect(addr) {
            Ok(_) => std::thread::sleep(Duration::from_millis(10)),
            Err(_) => {
                refused = true;
                break;
            }
        }
    }
    assert!(refused, "listener still accepting after stop");
}

/// Two requests on one connection are answered in order.
#[test]
fn multiple_requests_share_a_connection() {
    let (_dir, addr, handle) = start_server(&[("a.py", "x: int = 1\n")]);
    let mut client = FramedClient::connect(addr);

    client.send(&Request::TypeQuery {
        query: pyty::request::TypeQuery::Join { left: "int".into(), right: "str".into() },
    });
    client.send(&Request::DisplayTypeErrors { files: vec![] });

    assert_eq!(client.recv(), Response::TypeQuery { response: "object".into() });
    let Response::TypeCheck { errors } = client.recv() else {
        panic!("expected a type-check response");
    };
    assert!(errors.is_empty());

    client.send(&Request::Stop);
    assert_eq!(client.recv(), Response::Stop);
    handle.join().expect("server thread").expect("clean shutdown");
}

//! End-to-end TCP scenarios against a spawned server.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{IpAddr, Ipv4Addr, TcpStream};
use std::time::Duration;

use remora::runtime::{RuntimeConfig, ValidationMode};
use remora::server::{Server, ServerConfig};

fn spawn_server(ngroups: usize, mode: ValidationMode) -> Server {
    Server::spawn(ServerConfig {
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        ngroups,
        capacity: 1 << 12,
        runtime: RuntimeConfig {
            mode,
            max_concurrent_validations: None,
        },
    })
    .expect("spawn server")
}

struct Client {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Client {
    fn connect(port: u16) -> Client {
        let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let reader = BufReader::new(stream.try_clone().unwrap());
        Client { stream, reader }
    }

    fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
    }

    fn recv_line(&mut self) -> Vec<u8> {
        let mut line = Vec::new();
        self.reader.read_until(b'\n', &mut line).unwrap();
        line
    }

    fn roundtrip(&mut self, request: &[u8]) -> Vec<u8> {
        self.send(request);
        self.recv_line()
    }
}

#[test]
fn scenario_insert_then_read() {
    let server = spawn_server(1, ValidationMode::Synchronous);
    let mut client = Client::connect(server.ports()[0]);

    assert_eq!(client.roundtrip(b"set abcd 12345678\r\n"), b"CREATED\r\n");
    assert_eq!(client.roundtrip(b"get abcd\r\n"), b"VALUE 12345678\r\n");
}

#[test]
fn scenario_update_returns_stored() {
    let server = spawn_server(1, ValidationMode::Synchronous);
    let mut client = Client::connect(server.ports()[0]);

    assert_eq!(client.roundtrip(b"set abcd 12345678\r\n"), b"CREATED\r\n");
    assert_eq!(client.roundtrip(b"set abcd ABCDEFGH\r\n"), b"STORED\r\n");
    assert_eq!(client.roundtrip(b"get abcd\r\n"), b"VALUE ABCDEFGH\r\n");
}

#[test]
fn scenario_missing_key() {
    let server = spawn_server(1, ValidationMode::Synchronous);
    let mut client = Client::connect(server.ports()[0]);

    assert_eq!(client.roundtrip(b"get zzzz\r\n"), b"NOT_FOUND\r\n");
}

#[test]
fn scenario_delete_boundary() {
    let server = spawn_server(1, ValidationMode::Synchronous);
    let mut client = Client::connect(server.ports()[0]);

    assert_eq!(client.roundtrip(b"del abcd\r\n"), b"NOT_FOUND\r\n");
    assert_eq!(client.roundtrip(b"set abcd 00000000\r\n"), b"CREATED\r\n");
    assert_eq!(client.roundtrip(b"del abcd\r\n"), b"DELETED\r\n");
    assert_eq!(client.roundtrip(b"get abcd\r\n"), b"NOT_FOUND\r\n");
}

#[test]
fn scenario_unknown_verb_keeps_connection_open() {
    let server = spawn_server(1, ValidationMode::Synchronous);
    let mut client = Client::connect(server.ports()[0]);

    assert_eq!(client.roundtrip(b"foo abcd 00000000\r\n"), b"ERROR\r\n");
    // Connection survives the bad command.
    assert_eq!(client.roundtrip(b"set abcd 12345678\r\n"), b"CREATED\r\n");
}

#[test]
fn scenario_crc_prefix_is_stripped() {
    let server = spawn_server(1, ValidationMode::Synchronous);
    let mut client = Client::connect(server.ports()[0]);

    assert_eq!(
        client.roundtrip(b"123456789#set abcd 12345678\r\n"),
        b"CREATED\r\n"
    );
    assert_eq!(client.roundtrip(b"42#get abcd\r\n"), b"VALUE 12345678\r\n");
}

#[test]
fn quit_closes_the_connection() {
    let server = spawn_server(1, ValidationMode::Synchronous);
    let mut client = Client::connect(server.ports()[0]);

    assert_eq!(client.roundtrip(b"set abcd 12345678\r\n"), b"CREATED\r\n");
    client.send(b"quit\n");

    // No response; orderly close.
    let mut rest = Vec::new();
    let n = client.reader.read_to_end(&mut rest).unwrap();
    assert_eq!(n, 0);

    // The group keeps serving other clients.
    let mut second = Client::connect(server.ports()[0]);
    assert_eq!(second.roundtrip(b"get abcd\r\n"), b"VALUE 12345678\r\n");
}

#[test]
fn responses_arrive_in_request_order() {
    let server = spawn_server(1, ValidationMode::Asynchronous {
        sampling_percent: 100,
    });
    let mut client = Client::connect(server.ports()[0]);

    // Pipeline a burst of commands in a single write.
    let mut batch = Vec::new();
    for i in 0..100u8 {
        batch.extend_from_slice(format!("set k{:03} value{:03}\r\n", i, i).as_bytes());
    }
    for i in 0..100u8 {
        batch.extend_from_slice(format!("get k{:03}\r\n", i).as_bytes());
    }
    client.send(&batch);

    for _ in 0..100 {
        assert_eq!(client.recv_line(), b"CREATED\r\n");
    }
    for i in 0..100u8 {
        assert_eq!(
            client.recv_line(),
            format!("VALUE value{:03}\r\n", i).as_bytes()
        );
    }
}

#[test]
fn groups_listen_on_distinct_ports() {
    let server = spawn_server(3, ValidationMode::Asynchronous {
        sampling_percent: 100,
    });
    let ports = server.ports().to_vec();
    assert_eq!(ports.len(), 3);

    // Each group has its own table-backed dispatcher reachable on its port.
    for (i, port) in ports.iter().enumerate() {
        let mut client = Client::connect(*port);
        let key = format!("gp{:02}", i);
        assert_eq!(
            client.roundtrip(format!("set {key} 12345678\r\n").as_bytes()),
            b"CREATED\r\n"
        );
    }
}

#[test]
fn shutdown_releases_every_slab() {
    let server = spawn_server(2, ValidationMode::Synchronous);
    for port in server.ports().to_vec() {
        let mut client = Client::connect(port);
        for i in 0..50u8 {
            client.send(format!("set s{:03} 12345678\r\n", i).as_bytes());
        }
        for _ in 0..50 {
            client.recv_line();
        }
    }

    let stats = std::sync::Arc::clone(server.stats());
    server.shutdown();

    let snap = stats.snapshot();
    assert_eq!(snap.frames_committed, 100);
    assert_eq!(snap.frames_validated + snap.frames_skipped, 100);
    assert_eq!(snap.slabs_acquired, snap.slabs_released);
}

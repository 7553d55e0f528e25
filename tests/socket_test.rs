mod probe;

use plinth::{downcast_object, Object, Socket, SocketError, SocketStatus, Stream};
use probe::Probe;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn spawn_echo_server() -> (u16, std::thread::JoinHandle<()>) {
  let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
  let port = listener.local_addr().expect("local addr").port();
  let handle = std::thread::spawn(move || {
    if let Ok((mut stream, _)) = listener.accept() {
      let mut buf = [0u8; 1024];
      loop {
        match stream.read(&mut buf) {
          Ok(0) | Err(_) => break,
          Ok(count) => {
            if stream.write_all(&buf[..count]).is_err() {
              break;
            }
          }
        }
      }
    }
  });
  (port, handle)
}

fn on_connected(receiver: &Arc<dyn Object>, _socket: &Arc<Socket>) {
  if let Some(probe) = downcast_object::<Probe>(receiver) {
    probe.log("connected");
  }
}

fn on_ready_read(receiver: &Arc<dyn Object>, _socket: &Arc<Socket>) {
  if let Some(probe) = downcast_object::<Probe>(receiver) {
    probe.log("readyRead");
  }
}

fn on_disconnected(receiver: &Arc<dyn Object>, _socket: &Arc<Socket>) {
  if let Some(probe) = downcast_object::<Probe>(receiver) {
    probe.log("disconnected");
  }
}

fn on_error(receiver: &Arc<dyn Object>, error: &SocketError) {
  if let Some(probe) = downcast_object::<Probe>(receiver) {
    probe.log(&format!("error:{}", error.code));
  }
}

fn install_observers(socket: &Arc<Socket>, probe: &Arc<Probe>) {
  socket.connected().insert(probe, on_connected);
  socket.ready_read().insert(probe, on_ready_read);
  socket.disconnected().insert(probe, on_disconnected);
  socket.error().insert(probe, on_error);
}

fn wait_for_event(rx: &Receiver<String>, wanted: &str) {
  let deadline = Instant::now() + Duration::from_secs(10);
  loop {
    let remaining = deadline.saturating_duration_since(Instant::now());
    let event = rx.recv_timeout(remaining).unwrap_or_else(|_| {
      panic!("timed out waiting for {wanted}");
    });
    if event == wanted || event.starts_with(wanted) {
      return;
    }
  }
}

fn read_exactly(socket: &Arc<Socket>, count: usize) -> Vec<u8> {
  let mut collected = Vec::new();
  let deadline = Instant::now() + Duration::from_secs(10);
  while collected.len() < count && Instant::now() < deadline {
    let chunk = socket.read_block(count - collected.len());
    if chunk.is_empty() {
      std::thread::sleep(Duration::from_millis(5));
    } else {
      collected.extend_from_slice(chunk.as_slice());
    }
  }
  collected
}

#[test]
fn echo_round_trip_with_single_disconnect() {
  let (port, server) = spawn_echo_server();
  let socket = Socket::new("127.0.0.1", port);
  let (probe, rx) = Probe::with_channel();
  install_observers(&socket, &probe);

  assert!(socket.open());
  wait_for_event(&rx, "connected");
  assert_eq!(socket.status(), SocketStatus::Connected);

  socket.write_data(b"PING\n");
  socket.flush();
  wait_for_event(&rx, "readyRead");
  assert_eq!(read_exactly(&socket, 5), b"PING\n");

  socket.close();
  assert_eq!(socket.status(), SocketStatus::Disconnected);
  assert_eq!(probe.count_of("disconnected"), 1);
  assert_eq!(probe.count_of("connected"), 1);
  assert!(probe.events().iter().all(|e| !e.starts_with("error")));
  // disconnected was the last notification delivered
  assert_eq!(probe.events().last().map(String::as_str), Some("disconnected"));
  server.join().expect("server thread");
}

#[test]
fn bytes_arrive_in_write_order() {
  let (port, server) = spawn_echo_server();
  let socket = Socket::new("127.0.0.1", port);
  let (probe, rx) = Probe::with_channel();
  install_observers(&socket, &probe);

  assert!(socket.open());
  wait_for_event(&rx, "connected");

  let mut expected = Vec::new();
  for round in 0..50u8 {
    let chunk = [round, round.wrapping_mul(7), round.wrapping_add(1)];
    expected.extend_from_slice(&chunk);
    socket.write_data(&chunk);
  }
  socket.flush();

  let echoed = read_exactly(&socket, expected.len());
  assert_eq!(echoed, expected);
  socket.close();
  server.join().expect("server thread");
}

#[test]
fn writes_before_the_connection_are_buffered() {
  let (port, server) = spawn_echo_server();
  let socket = Socket::new("127.0.0.1", port);
  let (probe, rx) = Probe::with_channel();
  install_observers(&socket, &probe);

  // queued while the socket is still resolving the address
  socket.write_data(b"EARLY");
  assert!(socket.open());
  wait_for_event(&rx, "connected");
  assert_eq!(read_exactly(&socket, 5), b"EARLY");
  socket.close();
  server.join().expect("server thread");
}

#[test]
fn close_during_address_lookup_goes_straight_to_disconnected() {
  let socket = Socket::new("localhost", 9);
  let (probe, _rx) = Probe::with_channel();
  install_observers(&socket, &probe);
  socket.close();
  assert_eq!(socket.status(), SocketStatus::Disconnected);
  assert_eq!(probe.count_of("disconnected"), 1);
}

#[test]
fn refused_connections_report_an_error_then_disconnect() {
  // bind and drop to get a port that is very likely closed
  let port = {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("local addr").port()
  };
  let socket = Socket::new("127.0.0.1", port);
  let (probe, rx) = Probe::with_channel();
  install_observers(&socket, &probe);

  assert!(socket.open());
  wait_for_event(&rx, "disconnected");
  assert_eq!(socket.status(), SocketStatus::Disconnected);
  assert_eq!(probe.count_of("connected"), 0);
  assert!(probe.events().iter().any(|e| e.starts_with("error")));
  assert_eq!(probe.events().last().map(String::as_str), Some("disconnected"));
}

#[test]
fn remote_close_tears_the_session_down() {
  let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
  let port = listener.local_addr().expect("local addr").port();
  let server = std::thread::spawn(move || {
    // accept and hang up immediately
    drop(listener.accept());
  });

  let socket = Socket::new("127.0.0.1", port);
  let (probe, rx) = Probe::with_channel();
  install_observers(&socket, &probe);
  assert!(socket.open());
  wait_for_event(&rx, "connected");
  wait_for_event(&rx, "disconnected");
  assert_eq!(socket.status(), SocketStatus::Disconnected);
  assert_eq!(probe.count_of("disconnected"), 1);
  server.join().expect("server thread");
}

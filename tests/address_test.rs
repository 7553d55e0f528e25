mod probe;

use plinth::{downcast_object, Address, Object};
use probe::Probe;
use std::sync::Arc;
use std::time::Duration;

fn on_lookup_finished(receiver: &Arc<dyn Object>, _address: &Arc<Address>) {
  if let Some(probe) = downcast_object::<Probe>(receiver) {
    probe.log("lookupFinished");
  }
}

#[test]
fn localhost_resolves_and_notifies_exactly_once() {
  let address = Address::new();
  let (probe, rx) = Probe::with_channel();
  address.lookup_finished().insert(&probe, on_lookup_finished);

  address.lookup("localhost", 0).expect("lookup starts");
  address.wait_for_finished();
  rx.recv_timeout(Duration::from_secs(10)).expect("observer ran");

  assert_eq!(probe.count_of("lookupFinished"), 1);
  assert!(address.is_valid());
  assert!(address.is_host_found());
  assert!(!address.is_pending());
  assert!(address.socket_params().is_some());
}

#[test]
fn sequential_lookups_reuse_the_address() {
  let address = Address::new();
  address.lookup("localhost", 80).expect("first lookup");
  address.wait_for_finished();
  assert!(address.is_valid());
  address.lookup("127.0.0.1", 81).expect("second lookup");
  address.wait_for_finished();
  assert_eq!(address.host_name().as_str(), "127.0.0.1");
  assert!(address.is_host_found());
}

#[test]
fn numeric_host_formats_with_port() {
  let address = Address::new();
  address.lookup("127.0.0.1", 8080).expect("lookup starts");
  address.wait_for_finished();
  assert!(address.is_host_found());
  assert_eq!(address.to_text().as_str(), "127.0.0.1 port:8080");
  assert_eq!(address.port(), 8080);
}

#[test]
fn port_zero_is_left_out_of_the_text_form() {
  let address = Address::new();
  address.lookup("127.0.0.1", 0).expect("lookup starts");
  address.wait_for_finished();
  assert_eq!(address.to_text().as_str(), "127.0.0.1");
}

#[test]
fn unresolvable_hosts_become_invalid() {
  let address = Address::new();
  address.lookup("host.that-does-not-exist.invalid", 1).expect("lookup starts");
  address.wait_for_finished();
  assert!(!address.is_valid());
  assert!(!address.is_host_found());
  assert!(address.socket_params().is_none());
  assert!(address.to_text().is_empty());
}

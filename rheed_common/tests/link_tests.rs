//! Handshake and liveness across both link ends.
//!
//! Two threads play host and controller over `memory::pair`, the way the
//! binaries use a serial port.

use rheed_common::handshake;
use rheed_common::link::{LinkError, memory};
use rheed_common::liveness::{self, LinkHealth};
use rheed_common::protocol::Message;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[test]
fn heartbeats_keep_link_alive_until_they_stop() {
    let (host, controller) = memory::pair();
    let running = Arc::new(AtomicBool::new(true));
    let pulsing = Arc::new(AtomicBool::new(true));

    let r = running.clone();
    let p = pulsing.clone();
    let host_thread = thread::spawn(move || {
        let (tx, mut rx) = host.into_parts();
        handshake::initiate(&tx, &mut rx, ms(5), &r).unwrap();
        while p.load(Ordering::SeqCst) {
            tx.send(&Message::Pulse).unwrap();
            thread::sleep(ms(10));
        }
        // Keep the link open while the controller notices the silence.
        thread::sleep(ms(500));
    });

    let (tx, mut rx) = controller.into_parts();
    handshake::accept(&tx, &mut rx, ms(5), &running).unwrap();

    let health = LinkHealth::new();
    health.mark_live();
    let h = health.clone();
    let r = running.clone();
    let reader = thread::spawn(move || {
        while r.load(Ordering::SeqCst) && !h.is_flatline() {
            if let Ok(Some(_)) = rx.recv_line(ms(5)) {
                h.record_traffic();
            }
        }
    });

    let started = Instant::now();
    let monitor_health = health.clone();
    let r = running.clone();
    let monitor = thread::spawn(move || {
        liveness::run_monitor(&monitor_health, ms(10), 5, &r, || {});
    });

    thread::sleep(ms(150));
    assert!(!health.is_flatline(), "flatlined while heartbeats flowed");

    pulsing.store(false, Ordering::SeqCst);
    monitor.join().unwrap();
    assert!(health.is_flatline());
    assert!(started.elapsed() >= ms(150));

    running.store(false, Ordering::SeqCst);
    reader.join().unwrap();
    host_thread.join().unwrap();
}

#[test]
fn dropped_peer_fails_handshake_with_closed() {
    let (host, controller) = memory::pair();
    drop(controller);
    let (tx, mut rx) = host.into_parts();
    let running = AtomicBool::new(true);
    assert!(matches!(
        handshake::initiate(&tx, &mut rx, ms(5), &running),
        Err(LinkError::Closed)
    ));
}

#[test]
fn late_controller_still_answers_repeated_probe() {
    let (host, controller) = memory::pair();
    let running = Arc::new(AtomicBool::new(true));

    let r = running.clone();
    let ctl = thread::spawn(move || {
        // Miss the first probe entirely.
        let (tx, mut rx) = controller.into_parts();
        let first = rx.recv_line(ms(500)).unwrap();
        assert_eq!(first.as_deref(), Some("MARCO!"));
        handshake::accept(&tx, &mut rx, ms(5), &r)
    });

    let (tx, mut rx) = host.into_parts();
    handshake::initiate(&tx, &mut rx, ms(5), &running).unwrap();
    ctl.join().unwrap().unwrap();
}

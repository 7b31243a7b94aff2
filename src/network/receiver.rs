//! Network receive loop
//!
//! Background thread for the session lifetime: blocking receive,
//! decode, write into the jitter ring, repeat. The loop never applies
//! backpressure to the playback side. Malformed datagrams are dropped
//! and logged; a receive failure on a live transport is fatal and is
//! reported so the session can shut down.

use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::buffer::{Chunk, JitterRing};
use crate::codec;
use crate::constants::MAX_DATAGRAM_SIZE;
use crate::error::NetworkError;
use crate::network::transport::UdpTransport;

/// Receive loop counters (updated by the loop thread)
#[derive(Default)]
struct Counters {
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    malformed_packets: AtomicU64,
}

/// Snapshot of the receive loop counters
#[derive(Debug, Clone, Copy)]
pub struct ReceiveStats {
    pub packets_received: u64,
    pub bytes_received: u64,
    pub malformed_packets: u64,
}

/// Handle to the background receive thread
pub struct ReceiveLoop {
    handle: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl ReceiveLoop {
    /// Spawn the receive thread.
    ///
    /// `on_streaming` runs exactly once, on the first successful
    /// decode, after the ring's play cursor has been seeded from that
    /// datagram's sequence number. `fatal_tx` carries a receive failure
    /// on a transport that was not deliberately shut down.
    pub fn spawn(
        transport: Arc<UdpTransport>,
        ring: Arc<JitterRing>,
        on_streaming: impl Fn(u16) + Send + 'static,
        fatal_tx: Sender<NetworkError>,
    ) -> std::io::Result<Self> {
        let counters = Arc::new(Counters::default());
        let loop_counters = counters.clone();

        let handle = thread::Builder::new()
            .name("net-receive".to_string())
            .spawn(move || {
                let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
                let mut seeded = false;

                loop {
                    let n = match transport.receive(&mut buf) {
                        Ok(n) => n,
                        Err(NetworkError::Closed) => {
                            tracing::debug!("receive loop stopping: transport closed");
                            break;
                        }
                        // The peer may not be up yet; keep waiting for
                        // its first chunk.
                        Err(NetworkError::PeerUnreachable(e)) => {
                            tracing::debug!("peer not reachable yet: {}", e);
                            continue;
                        }
                        Err(e) => {
                            tracing::error!("receive failed, shutting down: {}", e);
                            let _ = fatal_tx.try_send(e);
                            break;
                        }
                    };

                    match codec::decode(&buf[..n]) {
                        Ok((seq, samples)) => {
                            if !seeded {
                                seeded = true;
                                ring.seed(seq);
                                tracing::info!(
                                    "first chunk received (seq {}), playback seeded {} chunks behind",
                                    seq,
                                    ring.chunks_to_buffer()
                                );
                                on_streaming(seq);
                            }
                            ring.write(seq, Chunk::from_samples(samples));
                            loop_counters.packets_received.fetch_add(1, Ordering::Relaxed);
                            loop_counters.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                        }
                        Err(e) => {
                            tracing::warn!("dropping datagram: {}", e);
                            loop_counters.malformed_packets.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })?;

        Ok(Self {
            handle: Some(handle),
            counters,
        })
    }

    pub fn stats(&self) -> ReceiveStats {
        ReceiveStats {
            packets_received: self.counters.packets_received.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
            malformed_packets: self.counters.malformed_packets.load(Ordering::Relaxed),
        }
    }

    /// Wait for the loop thread to exit. The caller is responsible for
    /// shutting down the transport first, or this blocks indefinitely.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ReceiveLoop {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use std::sync::atomic::AtomicBool;
    use std::time::{Duration, Instant};

    fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn setup() -> (Arc<UdpTransport>, UdpSocket, Arc<JitterRing>) {
        let remote = UdpSocket::bind("127.0.0.1:0").unwrap();
        let transport =
            Arc::new(UdpTransport::bind(0, remote.local_addr().unwrap()).unwrap());
        let ring = Arc::new(JitterRing::new(10, 5, 4));
        (transport, remote, ring)
    }

    /// The transport binds the unspecified address; target loopback on
    /// its bound port.
    fn loopback_addr(transport: &UdpTransport) -> std::net::SocketAddr {
        std::net::SocketAddr::new(
            std::net::Ipv4Addr::LOCALHOST.into(),
            transport.local_addr().unwrap().port(),
        )
    }

    #[test]
    fn test_first_datagram_seeds_and_buffers() {
        let (transport, remote, ring) = setup();
        let streaming = Arc::new(AtomicBool::new(false));
        let streaming_flag = streaming.clone();
        let (fatal_tx, _fatal_rx) = crossbeam_channel::bounded(1);

        let mut receive_loop = ReceiveLoop::spawn(
            transport.clone(),
            ring.clone(),
            move |_| streaming_flag.store(true, Ordering::SeqCst),
            fatal_tx,
        )
        .unwrap();

        let packet = codec::encode(100, &[7, 7, 7, 7]);
        remote.send_to(&packet, loopback_addr(&transport)).unwrap();

        assert!(wait_until(Duration::from_secs(2), || {
            streaming.load(Ordering::SeqCst)
        }));
        // Seeding property: play cursor = (100 - 5) mod 10
        assert_eq!(ring.play_cursor(), 5);
        assert_eq!(ring.occupancy(), 5);
        assert_eq!(receive_loop.stats().packets_received, 1);

        transport.shutdown();
        receive_loop.join();
    }

    #[test]
    fn test_malformed_datagram_dropped_loop_continues() {
        let (transport, remote, ring) = setup();
        let (fatal_tx, fatal_rx) = crossbeam_channel::bounded(1);

        let mut receive_loop =
            ReceiveLoop::spawn(transport.clone(), ring.clone(), |_| {}, fatal_tx).unwrap();
        let addr = loopback_addr(&transport);

        // One-byte datagram: malformed, dropped.
        remote.send_to(&[0xff], addr).unwrap();
        // A valid one right after must still be processed.
        remote.send_to(&codec::encode(3, &[1, 2, 3, 4]), addr).unwrap();

        assert!(wait_until(Duration::from_secs(2), || {
            receive_loop.stats().packets_received == 1
        }));
        assert_eq!(receive_loop.stats().malformed_packets, 1);
        assert!(fatal_rx.try_recv().is_err());

        transport.shutdown();
        receive_loop.join();
    }

    /// Whichever side starts first must keep waiting through the ICMP
    /// refusals its own sends solicit, not tear the session down before
    /// the peer ever comes up.
    #[test]
    fn test_unreachable_peer_does_not_kill_loop() {
        let peer = {
            let reserved = UdpSocket::bind("127.0.0.1:0").unwrap();
            reserved.local_addr().unwrap()
            // Nothing listens here anymore.
        };
        let transport = Arc::new(UdpTransport::bind(0, peer).unwrap());
        let ring = Arc::new(JitterRing::new(10, 5, 4));
        let (fatal_tx, fatal_rx) = crossbeam_channel::bounded(1);

        let mut receive_loop =
            ReceiveLoop::spawn(transport.clone(), ring, |_| {}, fatal_tx).unwrap();

        // Solicit port-unreachable refusals the way the period driver
        // does: by transmitting while the peer is down.
        for _ in 0..5 {
            let _ = transport.send(b"\x00\x01\x00\x00");
            thread::sleep(Duration::from_millis(20));
        }
        thread::sleep(Duration::from_millis(50));

        // No fatal report, and the loop is still alive and responsive
        // to a deliberate shutdown.
        assert!(fatal_rx.try_recv().is_err());
        transport.shutdown();
        receive_loop.join();
        assert_eq!(receive_loop.stats().packets_received, 0);
    }

    #[test]
    fn test_shutdown_exits_without_fatal_report() {
        let (transport, _remote, ring) = setup();
        let (fatal_tx, fatal_rx) = crossbeam_channel::bounded(1);

        let mut receive_loop =
            ReceiveLoop::spawn(transport.clone(), ring, |_| {}, fatal_tx).unwrap();

        thread::sleep(Duration::from_millis(50));
        transport.shutdown();
        receive_loop.join();

        // A deliberate shutdown is not a transport failure.
        assert!(fatal_rx.try_recv().is_err());
    }
}

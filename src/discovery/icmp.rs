//! ICMP sweep
//!
//! Echo-probes every host in the target range with a bounded worker
//! pool. Best-effort: an unavailable ICMP socket (insufficient
//! privileges) degrades to an empty responder set.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use surge_ping::{Client, Config, PingIdentifier, PingSequence};
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};

/// Concurrent probes in flight.
const CONCURRENCY: usize = 50;
/// Per-probe timeout.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

fn ping_ident() -> u16 {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    ((nanos % 0xFFFF) as u16).wrapping_add(1)
}

/// Probe the targets and return the set of responders.
pub async fn icmp_sweep(targets: &[Ipv4Addr]) -> HashSet<Ipv4Addr> {
    if targets.is_empty() {
        return HashSet::new();
    }

    info!("Starting ICMP sweep of {} hosts", targets.len());

    let client = match Client::new(&Config::default()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            warn!("ICMP client unavailable ({}), skipping sweep", e);
            return HashSet::new();
        }
    };

    let semaphore = Arc::new(Semaphore::new(CONCURRENCY));
    let alive = Arc::new(Mutex::new(HashSet::new()));
    let mut handles = Vec::with_capacity(targets.len());

    for &ip in targets {
        let client = Arc::clone(&client);
        let semaphore = Arc::clone(&semaphore);
        let alive = Arc::clone(&alive);

        handles.push(tokio::spawn(async move {
            let _permit = match semaphore.acquire().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            let payload = [0u8; 56];
            let mut pinger = client
                .pinger(IpAddr::V4(ip), PingIdentifier(ping_ident()))
                .await;
            pinger.timeout(PROBE_TIMEOUT);

            if pinger.ping(PingSequence(0), &payload).await.is_ok() {
                alive.lock().await.insert(ip);
            }
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            warn!("ICMP probe task failed: {}", e);
        }
    }

    let result = alive.lock().await.clone();
    info!("ICMP sweep complete: {} hosts alive", result.len());
    result
}

//! End-to-end pipeline scenarios: synthetic frames pushed through the
//! full detection path against an in-memory repository.

use std::sync::Arc;
use std::time::Duration;

use netsentry::config::ClassificationMap;
use netsentry::database::{AlertFilter, Database, Repository};
use netsentry::engine::alerts::AlertEmitter;
use netsentry::engine::pipeline::Pipeline;
use netsentry::engine::stats::TrafficStats;
use netsentry::models::Severity;
use netsentry::signatures::{RuleMatcher, RuleSet};

/// Ethernet + IPv4 + TCP frame.
fn tcp_frame(
    src: [u8; 4],
    src_port: u16,
    dst: [u8; 4],
    dst_port: u16,
    flags: u8,
    payload: &[u8],
) -> Vec<u8> {
    let mut frame = vec![
        0x00, 0x11, 0x22, 0x33, 0x44, 0x55, // dst mac
        0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, // src mac
        0x08, 0x00, // ethertype IPv4
    ];

    let total_len = (20 + 20 + payload.len()) as u16;
    frame.extend_from_slice(&[0x45, 0x00]);
    frame.extend_from_slice(&total_len.to_be_bytes());
    frame.extend_from_slice(&[
        0x00, 0x01, // identification
        0x40, 0x00, // DF
        0x40, // TTL
        0x06, // TCP
        0x00, 0x00, // checksum
    ]);
    frame.extend_from_slice(&src);
    frame.extend_from_slice(&dst);

    frame.extend_from_slice(&src_port.to_be_bytes());
    frame.extend_from_slice(&dst_port.to_be_bytes());
    frame.extend_from_slice(&[
        0x00, 0x00, 0x00, 0x01, // seq
        0x00, 0x00, 0x00, 0x00, // ack
        0x50, flags, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00,
    ]);
    frame.extend_from_slice(payload);
    frame
}

const SYN: u8 = 0x02;
const SYN_ACK: u8 = 0x12;
const ACK: u8 = 0x10;
const PSH_ACK: u8 = 0x18;

struct Harness {
    db: Arc<Database>,
    emitter: Arc<AlertEmitter>,
    pipeline: Pipeline,
}

fn harness(rules: &str) -> Harness {
    harness_with_classifications(rules, "")
}

fn harness_with_classifications(rules: &str, classifications: &str) -> Harness {
    let db = Arc::new(Database::open_memory().unwrap());
    let classifications = Arc::new(ClassificationMap::parse(classifications));
    let emitter = Arc::new(AlertEmitter::new(
        db.clone() as Arc<dyn Repository>,
        classifications,
        None,
    ));
    let matcher = Arc::new(RuleMatcher::new(RuleSet::parse_str(rules)));
    let traffic = Arc::new(TrafficStats::new());
    let pipeline = Pipeline::new("test0".to_string(), matcher, emitter.clone(), traffic);

    Harness {
        db,
        emitter,
        pipeline,
    }
}

impl Harness {
    /// Wait until the writer thread has persisted `expected` alerts.
    fn wait_written(&self, expected: u64) {
        for _ in 0..200 {
            if self.emitter.written() >= expected {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!(
            "writer processed only {} of {} alerts",
            self.emitter.written(),
            expected
        );
    }

    fn alerts(&self, expected: u64) -> Vec<netsentry::models::Alert> {
        self.wait_written(expected);
        self.db.list_alerts(AlertFilter::default(), 100).unwrap()
    }
}

#[test]
fn syn_scan_heuristic_fires_exactly_once() {
    let mut h = harness("");

    // 21 SYN-only probes from one source to varying destinations
    for i in 0..21u8 {
        let frame = tcp_frame([10, 0, 0, 2], 40000, [10, 0, 0, 100 + (i % 20)], 1000 + i as u16, SYN, b"");
        h.pipeline.handle_frame(&frame);
    }

    let alerts = h.alerts(1);
    let scans: Vec<_> = alerts
        .iter()
        .filter(|a| a.alert_type == "Port Scan Detected")
        .collect();
    assert_eq!(scans.len(), 1);
    assert_eq!(scans[0].severity, Severity::High);
    assert_eq!(scans[0].source_ip, "10.0.0.2");

    // Counter reset: the 22nd SYN does not alert
    let frame = tcp_frame([10, 0, 0, 2], 40000, [10, 0, 0, 50], 2000, SYN, b"");
    h.pipeline.handle_frame(&frame);
    std::thread::sleep(Duration::from_millis(50));

    let alerts = h.db.list_alerts(AlertFilter::default(), 100).unwrap();
    let scans = alerts
        .iter()
        .filter(|a| a.alert_type == "Port Scan Detected")
        .count();
    assert_eq!(scans, 1);
}

#[test]
fn http_rule_match_emits_one_alert() {
    let mut h = harness(
        r#"alert http any any -> any any (msg:"SQLi"; content:"UNION SELECT"; sid:1000001;)"#,
    );

    let payload = b"GET /x?q=UNION SELECT password FROM users HTTP/1.1\r\nHost: h\r\n\r\n";
    let frame = tcp_frame([10, 0, 0, 2], 44444, [10, 0, 0, 1], 80, PSH_ACK, payload);
    h.pipeline.handle_frame(&frame);

    let alerts = h.alerts(1);
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].description.contains("SQLi"));
    // No classtype: severity defaults to Low
    assert_eq!(alerts[0].severity, Severity::Low);

    // A benign request enqueues nothing
    let benign = tcp_frame(
        [10, 0, 0, 2],
        44445,
        [10, 0, 0, 1],
        80,
        PSH_ACK,
        b"GET /index.html HTTP/1.1\r\nHost: h\r\n\r\n",
    );
    h.pipeline.handle_frame(&benign);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(h.db.list_alerts(AlertFilter::default(), 100).unwrap().len(), 1);
}

#[test]
fn classtype_drives_severity() {
    let mut h = harness_with_classifications(
        r#"alert tcp any any -> any 80 (msg:"web attack"; content:"evil"; classtype:web-application-attack; sid:2000;)"#,
        "config classification: web-application-attack, Web Application Attack, 1\n",
    );

    let frame = tcp_frame([10, 0, 0, 2], 44444, [10, 0, 0, 1], 80, PSH_ACK, b"evil payload");
    h.pipeline.handle_frame(&frame);

    let alerts = h.alerts(1);
    assert_eq!(alerts[0].severity, Severity::High);
    assert_eq!(alerts[0].alert_type, "Web Application Attack");
}

#[test]
fn threshold_limit_suppresses_repeats() {
    let mut h = harness(
        r#"alert tcp any any -> any 80 (msg:"probe"; content:"probe"; threshold: type limit, track by_src, count 1, seconds 60; sid:42;)"#,
    );

    for i in 0..5u16 {
        let frame = tcp_frame([1, 2, 3, 4], 50000 + i, [10, 0, 0, 1], 80, PSH_ACK, b"probe");
        h.pipeline.handle_frame(&frame);
    }

    let alerts = h.alerts(1);
    assert_eq!(alerts.len(), 1, "exactly one alert, four suppressed");
    assert_eq!(h.pipeline.stats().matches, 5);
    assert_eq!(h.pipeline.stats().suppressed, 4);
}

#[test]
fn flow_gated_rule_needs_established_state() {
    let mut h = harness(
        r#"alert tcp any any -> any any (msg:"est only"; content:"data"; flow:established; sid:7;)"#,
    );

    let client = [192, 168, 1, 10];
    let server = [10, 0, 0, 1];

    // SYN carrying the content (crafted): flow is only syn_sent, no match
    h.pipeline
        .handle_frame(&tcp_frame(client, 55555, server, 80, SYN, b"data"));
    // Handshake completes
    h.pipeline
        .handle_frame(&tcp_frame(server, 80, client, 55555, SYN_ACK, b""));
    h.pipeline
        .handle_frame(&tcp_frame(client, 55555, server, 80, ACK, b""));
    // Established data segment matches
    h.pipeline
        .handle_frame(&tcp_frame(client, 55555, server, 80, PSH_ACK, b"data"));

    let alerts = h.alerts(1);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].description, "est only");
}

#[test]
fn first_match_wins_per_packet() {
    let mut h = harness(
        "alert tcp any any -> any any (msg:\"first\"; content:\"xyzzy\"; sid:1;)\n\
         alert tcp any any -> any any (msg:\"second\"; content:\"xyzzy\"; sid:2;)",
    );

    let frame = tcp_frame([1, 1, 1, 1], 1234, [2, 2, 2, 2], 80, PSH_ACK, b"xyzzy");
    h.pipeline.handle_frame(&frame);

    let alerts = h.alerts(1);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].description, "first");
}

#[test]
fn non_ip_frames_are_counted_not_processed() {
    let mut h = harness("");

    let mut arp = vec![
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb,
        0x08, 0x06,
    ];
    arp.extend_from_slice(&[0u8; 28]);
    h.pipeline.handle_frame(&arp);

    let stats = h.pipeline.stats();
    assert_eq!(stats.frames, 1);
    assert_eq!(stats.non_ip, 1);
    assert_eq!(stats.packets, 0);
    assert_eq!(stats.raw_bytes, arp.len() as u64);
}

#[test]
fn stats_windows_cover_all_decoded_packets() {
    let db = Arc::new(Database::open_memory().unwrap());
    let emitter = Arc::new(AlertEmitter::new(
        db.clone() as Arc<dyn Repository>,
        Arc::new(ClassificationMap::default()),
        None,
    ));
    let matcher = Arc::new(RuleMatcher::new(RuleSet::parse_str("")));
    let traffic = Arc::new(TrafficStats::new());
    let mut pipeline = Pipeline::new("test0".to_string(), matcher, emitter, traffic.clone());

    for i in 0..7u16 {
        pipeline.handle_frame(&tcp_frame([1, 1, 1, 1], 1000 + i, [2, 2, 2, 2], 80, ACK, b""));
    }
    let first = traffic.snapshot_and_reset();

    for i in 0..3u16 {
        pipeline.handle_frame(&tcp_frame([1, 1, 1, 1], 2000 + i, [2, 2, 2, 2], 443, ACK, b""));
    }
    let second = traffic.snapshot_and_reset();

    assert_eq!(first.total, 7);
    assert_eq!(first.http, 7);
    assert_eq!(second.total, 3);
    assert_eq!(second.https, 3);
    assert_eq!(first.total + second.total, pipeline.stats().packets);
}

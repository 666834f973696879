//! End-to-end tests: HTTP ingest through the dispatch worker to a real OSC
//! receiver on the loopback interface.

use e4_relay::config::RelayConfig;
use e4_relay::server;
use e4_relay::sinks::{CaptureRecordSink, OscStreamSink};
use e4_relay::{CalibrationTable, EventDispatcher, SmootherBank, SmoothingScope};
use pretty_assertions::assert_eq;
use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct RunningRelay {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<EventDispatcher, e4_relay::RelayError>>,
}

impl RunningRelay {
    async fn stop(self) -> EventDispatcher {
        self.shutdown.send(()).unwrap();
        self.task.await.unwrap().unwrap()
    }
}

fn osc_receiver() -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    socket
}

fn start(config: RelayConfig, osc_port: u16, record: CaptureRecordSink) -> RunningRelay {
    let dispatcher = EventDispatcher::new(
        CalibrationTable::default(),
        SmootherBank::new(config.pipeline.smoothing_scope),
        Box::new(OscStreamSink::connect("127.0.0.1", osc_port).unwrap()),
        Box::new(record),
    )
    .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown, signal) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        server::run(listener, dispatcher, &config, async {
            let _ = signal.await;
        })
        .await
    });

    RunningRelay {
        addr,
        shutdown,
        task,
    }
}

async fn post(addr: SocketAddr, body: &'static str) -> (u16, String) {
    tokio::task::spawn_blocking(move || {
        let url = format!("http://{}/data", addr);
        match ureq::post(&url)
            .set("Content-Type", "text/plain")
            .send_string(body)
        {
            Ok(resp) => (resp.status(), resp.into_string().unwrap()),
            Err(ureq::Error::Status(code, resp)) => (code, resp.into_string().unwrap()),
            Err(e) => panic!("request failed: {}", e),
        }
    })
    .await
    .unwrap()
}

/// Split an OSC packet into its address and single float argument
fn parse_float_message(packet: &[u8]) -> (String, f32) {
    let end = packet.iter().position(|b| *b == 0).unwrap();
    let address = String::from_utf8(packet[..end].to_vec()).unwrap();
    let arg: [u8; 4] = packet[packet.len() - 4..].try_into().unwrap();
    (address, f32::from_be_bytes(arg))
}

fn recv(socket: &UdpSocket) -> Vec<u8> {
    let mut buf = [0u8; 256];
    let (n, _) = socket.recv_from(&mut buf).unwrap();
    buf[..n].to_vec()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_temperature_event_reaches_osc_and_record() {
    let receiver = osc_receiver();
    let record = CaptureRecordSink::new();
    let mut config = RelayConfig::default();
    config.pipeline.record_mode = true;
    config.pipeline.quiet_mode = true;

    let relay = start(config, receiver.local_addr().unwrap().port(), record.clone());

    let (status, body) = post(
        relay.addr,
        r#"{"type":"temp","device":"d1","run":"r1","timestamp":1000,"value":30.5}"#,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body, server::ACCEPTED_BODY);

    let (address, value) = parse_float_message(&recv(&receiver));
    assert_eq!(address, "/e4/temp");
    assert!((value - 0.5).abs() < 1e-6);

    let records = record.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].measurement, "temp");
    assert_eq!(records[0].device_id, "d1");
    assert_eq!(records[0].run_tag, "r1");
    assert_eq!(records[0].timestamp_millis, 1000);

    let dispatcher = relay.stop().await;
    assert_eq!(dispatcher.stats().events, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_accelerometer_emits_three_axes() {
    let receiver = osc_receiver();
    let record = CaptureRecordSink::new();
    let mut config = RelayConfig::default();
    config.pipeline.quiet_mode = true;

    let relay = start(config, receiver.local_addr().unwrap().port(), record.clone());

    let (status, _) = post(
        relay.addr,
        r#"{"type":"acc","device":"d1","run":"r1","timestamp":1,"x":90,"y":-90,"z":0}"#,
    )
    .await;
    assert_eq!(status, 200);

    let mut received = Vec::new();
    for _ in 0..3 {
        received.push(parse_float_message(&recv(&receiver)));
    }
    received.sort_by(|a, b| a.0.cmp(&b.0));

    let addresses: Vec<&str> = received.iter().map(|(a, _)| a.as_str()).collect();
    assert_eq!(addresses, vec!["/e4/acc/x", "/e4/acc/y", "/e4/acc/z"]);
    // Rescaled to 1.0, 0.0 and 0.5, then averaged over a zero-filled window of ten
    assert!((received[0].1 - 0.1).abs() < 1e-6);
    assert!(received[1].1.abs() < 1e-6);
    assert!((received[2].1 - 0.05).abs() < 1e-6);

    // Recording disabled
    assert!(record.records().is_empty());

    relay.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_per_device_smoothing_over_http() {
    let receiver = osc_receiver();
    let mut config = RelayConfig::default();
    config.pipeline.quiet_mode = true;
    config.pipeline.smoothing_scope = SmoothingScope::PerDevice;

    let relay = start(
        config,
        receiver.local_addr().unwrap().port(),
        CaptureRecordSink::new(),
    );

    post(
        relay.addr,
        r#"{"type":"acc","device":"d1","run":"r1","timestamp":1,"x":90,"y":90,"z":90}"#,
    )
    .await;
    post(
        relay.addr,
        r#"{"type":"acc","device":"d2","run":"r1","timestamp":2,"x":90,"y":90,"z":90}"#,
    )
    .await;

    for _ in 0..6 {
        let (_, value) = parse_float_message(&recv(&receiver));
        assert!((value - 0.1).abs() < 1e-6);
    }

    let dispatcher = relay.stop().await;
    assert_eq!(dispatcher.smoothers().tracked_devices(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ingest_policies() {
    let receiver = osc_receiver();
    let port = receiver.local_addr().unwrap().port();

    let lenient = start(RelayConfig::default(), port, CaptureRecordSink::new());
    let (status, body) = post(lenient.addr, "{not json").await;
    assert_eq!(status, 200);
    assert_eq!(body, server::ACCEPTED_BODY);
    assert_eq!(lenient.stop().await.stats().events, 0);

    let mut config = RelayConfig::default();
    config.pipeline.strict_ingest = true;
    let strict = start(config, port, CaptureRecordSink::new());
    let (status, body) = post(strict.addr, r#"{"type":"hr","timestamp":1,"value":60}"#).await;
    assert_eq!(status, 400);
    let body: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["error"], "Unknown event type: hr");
    strict.stop().await;
}

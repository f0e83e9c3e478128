//! End-to-end tests over the in-memory transport

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;
use tokio::io::{
    AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf,
    WriteHalf,
};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use quicmux::streaming::{
    ChunkCodec, ChunkFrame, Feedback, StreamRequest, StreamResponse, StreamStatus,
};
use quicmux::telemetry::{Envelope, EnvelopeKind, ResponseStatus};
use quicmux::transport::MemoryClient;
use quicmux::{
    memory_transport, Engine, EngineConfig, EntityKind, ProtocolId, QualityRequest, StreamingConfig,
    TelemetryConfig,
};

struct Harness {
    engine: Arc<Engine>,
    client: MemoryClient,
    shutdown: CancellationToken,
    server: JoinHandle<quicmux::Result<()>>,
}

impl Harness {
    async fn start(config: EngineConfig) -> Self {
        let engine = Arc::new(Engine::new(config));
        let (connector, transport) = memory_transport(8);
        let shutdown = CancellationToken::new();

        let server = {
            let engine = Arc::clone(&engine);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { engine.run(transport, shutdown).await })
        };
        let client = connector.connect().await.unwrap();

        Self {
            engine,
            client,
            shutdown,
            server,
        }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.server.await.unwrap().unwrap();
    }

    async fn telemetry(&self) -> Telemetry {
        let stream = self.client.open_stream().await.unwrap();
        let (read, mut write) = tokio::io::split(stream);
        write.write_all(ProtocolId::TELEMETRY.as_bytes()).await.unwrap();
        Telemetry {
            lines: BufReader::new(read).lines(),
            write,
        }
    }

    async fn viewer(&self, request: &StreamRequest) -> Viewer {
        let stream = self.client.open_stream().await.unwrap();
        let (read, mut write) = tokio::io::split(stream);
        write.write_all(ProtocolId::STREAMING.as_bytes()).await.unwrap();
        send_line(&mut write, request).await;

        let mut reader = BufReader::new(read);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();

        Viewer {
            response: serde_json::from_str(&line).unwrap(),
            frames: FramedRead::new(reader, ChunkCodec::new(16 * 1024)),
            write,
        }
    }
}

struct Telemetry {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    write: WriteHalf<DuplexStream>,
}

impl Telemetry {
    async fn send(&mut self, envelope: &Envelope) {
        send_line(&mut self.write, envelope).await;
    }

    async fn reply(&mut self) -> Envelope {
        let line = self.lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }
}

struct Viewer {
    response: StreamResponse,
    frames: FramedRead<BufReader<ReadHalf<DuplexStream>>, ChunkCodec>,
    write: WriteHalf<DuplexStream>,
}

impl Viewer {
    async fn next(&mut self) -> ChunkFrame {
        self.frames.next().await.unwrap().unwrap()
    }

    async fn feedback(&mut self, buffer_health: f64, packet_loss: f64) {
        send_line(&mut self.write, &Feedback::new(buffer_health, packet_loss)).await;
    }
}

async fn send_line<T: serde::Serialize>(write: &mut WriteHalf<DuplexStream>, value: &T) {
    let mut line = serde_json::to_vec(value).unwrap();
    line.push(b'\n');
    write.write_all(&line).await.unwrap();
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        streaming: StreamingConfig::default().chunk_duration(Duration::from_millis(20)),
        ..Default::default()
    }
}

fn status(envelope: &Envelope) -> ResponseStatus {
    envelope.response_body().unwrap().status
}

#[tokio::test]
async fn telemetry_and_streaming_share_a_connection() {
    let harness = Harness::start(fast_config()).await;

    let mut sensor = harness.telemetry().await;
    let mut viewer = harness
        .viewer(&StreamRequest::new("cam-1", QualityRequest::named("480p")))
        .await;
    assert_eq!(viewer.response.status, StreamStatus::Accepted);

    sensor
        .send(&Envelope::new(
            EnvelopeKind::Heartbeat,
            "temp-1",
            json!({"kind": "temperature", "location": "lab"}),
        ))
        .await;
    assert_eq!(status(&sensor.reply().await), ResponseStatus::Alive);

    for sequence in 0..3 {
        let frame = viewer.next().await;
        assert_eq!(frame.header.sequence, sequence);
        assert_eq!(frame.header.quality.name, "480p");
    }

    let devices = harness.engine.devices().await;
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].kind, EntityKind::Temperature);

    let entities = harness.engine.entities().await;
    assert!(entities.iter().any(|e| e.id == "cam-1" && e.kind == EntityKind::Session));

    assert!(harness.engine.active_sessions().await.contains_key("cam-1"));

    harness.stop().await;
}

#[tokio::test]
async fn unknown_protocol_does_not_close_connection() {
    let harness = Harness::start(fast_config()).await;

    let mut bad = harness.client.open_stream().await.unwrap();
    bad.write_all(b"ABCD{}\n").await.unwrap();
    let mut rest = Vec::new();
    bad.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());

    let mut sensor = harness.telemetry().await;
    sensor
        .send(&Envelope::new(EnvelopeKind::Heartbeat, "temp-1", json!({})))
        .await;
    assert_eq!(status(&sensor.reply().await), ResponseStatus::Alive);

    harness.stop().await;
}

#[tokio::test]
async fn feedback_steps_quality_down_and_back_up() {
    let harness = Harness::start(fast_config()).await;

    let request = StreamRequest::new("cam-1", QualityRequest::named("720p")).adaptive(true);
    let mut viewer = harness.viewer(&request).await;
    assert_eq!(viewer.response.status, StreamStatus::Accepted);
    assert_eq!(viewer.response.current_quality.as_ref().unwrap().name, "720p");
    assert_eq!(viewer.next().await.header.quality.name, "720p");

    // A low sample keeps stepping down one tier per tick until replaced
    viewer.feedback(0.1, 0.0).await;
    let mut tiers = Vec::new();
    while tiers.last().map_or(true, |t| t == "720p") {
        tiers.push(viewer.next().await.header.quality.name);
        assert!(tiers.len() < 10, "no step down in {tiers:?}");
    }
    assert_eq!(tiers.last().unwrap(), "480p");

    viewer.feedback(0.9, 0.0).await;
    let mut after = Vec::new();
    while after.last().map_or(true, |t| t != "720p") {
        after.push(viewer.next().await.header.quality.name);
        assert!(after.len() < 20, "no step up in {after:?}");
    }
    // At most one tier per chunk on the way back up
    let ladder = ["360p", "480p", "720p", "1080p"];
    let index = |name: &String| ladder.iter().position(|t| *t == name.as_str()).unwrap();
    let mut previous = index(tiers.last().unwrap());
    for name in &after {
        assert!(index(name).abs_diff(previous) <= 1, "skipped a tier in {after:?}");
        previous = index(name);
    }

    harness.stop().await;
}

#[tokio::test]
async fn stop_stream_is_idempotent() {
    let harness = Harness::start(fast_config()).await;

    let mut viewer = harness
        .viewer(&StreamRequest::new("cam-1", QualityRequest::named("360p")))
        .await;
    viewer.next().await;

    harness.engine.stop_stream("cam-1").await.unwrap();
    assert!(harness.engine.active_sessions().await.is_empty());

    let err = harness.engine.stop_stream("cam-1").await.unwrap_err();
    assert!(err.is_not_found());

    // The session task closes its side of the stream
    let mut drained = 0;
    while let Some(frame) = viewer.frames.next().await {
        frame.unwrap();
        drained += 1;
        assert!(drained < 5);
    }

    harness.stop().await;
}

#[tokio::test]
async fn commands_rejected_once_queue_full() {
    let config = EngineConfig {
        telemetry: TelemetryConfig::default().command_queue_capacity(1),
        ..fast_config()
    };
    let harness = Harness::start(config).await;
    let mut sensor = harness.telemetry().await;

    // Commands for an unknown device still flow through the queue; the
    // processor answers them with a failure outcome.
    let mut outcomes = harness.engine.command_outcomes();

    // One write so the handler sees the whole burst before the processor drains
    let command = Envelope::new(EnvelopeKind::Command, "nobody", json!({"command": "restart"}));
    let mut burst = Vec::new();
    for _ in 0..20 {
        burst.extend(serde_json::to_vec(&command).unwrap());
        burst.push(b'\n');
    }
    sensor.write.write_all(&burst).await.unwrap();

    let mut statuses = Vec::new();
    for _ in 0..20 {
        statuses.push(status(&sensor.reply().await));
    }

    assert_eq!(statuses[0], ResponseStatus::Received);
    assert!(statuses.contains(&ResponseStatus::Rejected), "{statuses:?}");

    let outcome = outcomes.recv().await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.message, "device not found");

    let counters = harness.engine.telemetry_counters().snapshot();
    assert_eq!(counters.commands_queued + counters.commands_rejected, 20);

    harness.stop().await;
}

#[tokio::test]
async fn data_readings_reach_the_log() {
    let harness = Harness::start(fast_config()).await;
    let mut sensor = harness.telemetry().await;

    sensor
        .send(&Envelope::new(EnvelopeKind::Heartbeat, "temp-1", json!({"kind": "temperature"})))
        .await;
    sensor.reply().await;

    for i in 0..5 {
        sensor
            .send(&Envelope::new(EnvelopeKind::Data, "temp-1", json!({ "value": i })))
            .await;
    }
    // Heartbeat reply orders the check after the data lines were processed
    sensor
        .send(&Envelope::new(EnvelopeKind::Heartbeat, "temp-1", json!({})))
        .await;
    sensor.reply().await;

    let mut stored = 0;
    for _ in 0..50 {
        stored = harness.engine.readings().len().await;
        if stored == 5 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(stored, 5);

    let recent = harness.engine.readings().recent(2).await;
    assert_eq!(recent[1].payload, json!({"value": 4}));
    assert_eq!(recent[1].entity_id, "temp-1");

    harness.stop().await;
}

#[tokio::test]
async fn engine_runs_once() {
    let engine = Engine::new(EngineConfig::default());

    let (connector, transport) = memory_transport(1);
    drop(connector);
    engine.run(transport, CancellationToken::new()).await.unwrap();

    let (_connector, transport) = memory_transport(1);
    let err = engine.run(transport, CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, quicmux::Error::AlreadyRunning));
}

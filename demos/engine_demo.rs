//! In-process engine demo
//!
//! Run with: cargo run --example engine_demo
//!
//! Starts the engine over the in-memory transport, then opens one connection
//! carrying a telemetry stream and an adaptive streaming stream side by side.
//! The streaming client reports a draining buffer for a while and then a
//! healthy one, so the logs show the session stepping down and back up.
//!
//! Set `RUST_LOG=quicmux=debug` for per-stream detail.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use quicmux::streaming::{ChunkCodec, Feedback, StreamRequest, StreamResponse};
use quicmux::telemetry::{Envelope, EnvelopeKind};
use quicmux::transport::MemoryClient;
use quicmux::{memory_transport, Engine, EngineConfig, ProtocolId, QualityRequest, StreamingConfig};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("quicmux=info")),
        )
        .init();

    let config = EngineConfig {
        streaming: StreamingConfig::default()
            .chunk_duration(Duration::from_millis(250))
            .keyframe_interval(8),
        ..Default::default()
    };

    let engine = Arc::new(Engine::new(config));
    let (connector, transport) = memory_transport(16);
    let shutdown = CancellationToken::new();

    let server = {
        let engine = Arc::clone(&engine);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { engine.run(transport, shutdown).await })
    };

    let client = connector.connect().await?;
    let telemetry = tokio::spawn(run_sensor(client.clone()));
    let streaming = tokio::spawn(run_viewer(client));

    telemetry.await??;
    streaming.await??;

    println!("Devices:");
    for device in engine.devices().await {
        println!(
            "  {} kind={:?} location={} online={}",
            device.id,
            device.kind,
            device.location.as_deref().unwrap_or("-"),
            device.online
        );
    }
    println!("Recent readings: {}", engine.readings().len().await);

    let report = engine.aggregator().collect().await;
    println!("Report: {}", serde_json::to_string_pretty(&report)?);

    shutdown.cancel();
    server.await??;
    Ok(())
}

async fn run_sensor(client: MemoryClient) -> Result<(), BoxError> {
    let stream = client.open_stream().await?;
    let (read, mut write) = tokio::io::split(stream);
    let mut replies = BufReader::new(read).lines();

    write.write_all(ProtocolId::TELEMETRY.as_bytes()).await?;

    let hello = Envelope::new(
        EnvelopeKind::Heartbeat,
        "greenhouse-temp",
        json!({"kind": "temperature", "location": "greenhouse"}),
    );
    send_line(&mut write, &hello).await?;
    println!("Sensor got: {:?}", replies.next_line().await?);

    for i in 0..10 {
        let reading = Envelope::new(
            EnvelopeKind::Data,
            "greenhouse-temp",
            json!({"value": 21.0 + f64::from(i) * 0.1, "unit": "C"}),
        );
        send_line(&mut write, &reading).await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let command = Envelope::new(
        EnvelopeKind::Command,
        "greenhouse-temp",
        json!({"command": "calibrate"}),
    );
    send_line(&mut write, &command).await?;
    println!("Sensor got: {:?}", replies.next_line().await?);

    write.shutdown().await?;
    Ok(())
}

async fn run_viewer(client: MemoryClient) -> Result<(), BoxError> {
    let stream = client.open_stream().await?;
    let (read, mut write) = tokio::io::split(stream);
    let mut reader = BufReader::new(read);

    write.write_all(ProtocolId::STREAMING.as_bytes()).await?;
    let request = StreamRequest::new("lobby-cam", QualityRequest::named("720p")).adaptive(true);
    send_line(&mut write, &request).await?;

    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let response: StreamResponse = serde_json::from_str(&line)?;
    println!(
        "Viewer accepted: {:?} at {:?}",
        response.status,
        response.current_quality.map(|t| t.name)
    );

    let mut chunks = FramedRead::new(reader, ChunkCodec::new(16 * 1024));
    for i in 0..12u32 {
        let Some(frame) = chunks.next().await.transpose()? else {
            break;
        };
        println!(
            "Viewer chunk #{} {} {} bytes{}",
            frame.header.sequence,
            frame.header.quality.name,
            frame.header.size,
            if frame.header.is_keyframe { " [key]" } else { "" }
        );

        let feedback = if i < 4 {
            Feedback::new(0.2, 0.0)
        } else {
            Feedback::new(0.95, 0.0)
        };
        send_line(&mut write, &feedback).await?;
    }

    Ok(())
}

async fn send_line<W, T>(writer: &mut W, value: &T) -> Result<(), BoxError>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    Ok(())
}

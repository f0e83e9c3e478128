//! Adaptive streaming controller
//!
//! Runs one session per streaming logical stream:
//!
//! ```text
//!  read request ──► resolve tier ──► register session ──► reply accepted
//!                        │                                     │
//!                        └─► reply error                       ▼
//!                                              ┌──── every chunk_duration ────┐
//!                                              │ next chunk ─► write frame    │
//!                                              │ update stats ─► adapt (≤1)   │
//!                                              └──── feedback lines replace ──┘
//!                                                    the latest sample
//! ```
//!
//! The session index maps stream ids to a cancellation handle and a watch
//! receiver of the session's stats, so readers never touch session state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, RwLock};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;

use super::adaptation::Feedback;
use super::config::StreamingConfig;
use super::protocol::{ChunkCodec, StreamRequest, StreamResponse, StreamStatus};
use super::session::StreamSession;
use super::source::{ChunkSource, PatternSource};
use crate::channel::ChannelContext;
use crate::error::{Error, Result};
use crate::registry::{EntityKind, EntityRegistry};
use crate::server::handler::{BoxFuture, StreamHandler};
use crate::stats::SessionStats;
use crate::transport::BoxedStream;

struct SessionHandle {
    generation: u64,
    cancel: CancellationToken,
    stats: watch::Receiver<SessionStats>,
}

/// Streaming protocol handler and session index
pub struct StreamingController {
    config: StreamingConfig,
    registry: Arc<EntityRegistry>,
    source: Arc<dyn ChunkSource>,
    sessions: RwLock<HashMap<String, SessionHandle>>,
    next_generation: AtomicU64,
}

impl StreamingController {
    /// Create a controller that fills chunks with [`PatternSource`]
    pub fn new(config: StreamingConfig, registry: Arc<EntityRegistry>) -> Self {
        Self {
            config,
            registry,
            source: Arc::new(PatternSource),
            sessions: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Use a different payload source
    pub fn with_source(mut self, source: Arc<dyn ChunkSource>) -> Self {
        self.source = source;
        self
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Stats of every active session, keyed by stream id
    pub async fn active_sessions(&self) -> HashMap<String, SessionStats> {
        let sessions = self.sessions.read().await;
        sessions
            .iter()
            .map(|(id, handle)| (id.clone(), handle.stats.borrow().clone()))
            .collect()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Stop a session
    ///
    /// The session disappears from [`active_sessions`](Self::active_sessions)
    /// immediately; its task winds down on its own. Stopping an unknown or
    /// already stopped session returns `SessionNotFound`.
    pub async fn stop_stream(&self, stream_id: &str) -> Result<()> {
        let handle = self.sessions.write().await.remove(stream_id);

        match handle {
            Some(handle) => {
                handle.cancel.cancel();
                tracing::info!(stream_id = %stream_id, "Stream stop requested");
                Ok(())
            }
            None => Err(Error::SessionNotFound(stream_id.to_string())),
        }
    }

    /// Serve one streaming logical stream
    pub async fn run<S>(&self, stream: S, mut ctx: ChannelContext) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = FramedRead::new(
            reader,
            LinesCodec::new_with_max_length(self.config.max_message_len),
        );

        let line = tokio::select! {
            _ = ctx.cancel.cancelled() => return Ok(()),
            line = lines.next() => line,
        };
        let line = match line {
            Some(line) => line?,
            None => return Ok(()),
        };
        let request: StreamRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                self.respond_error(&mut writer, "", "malformed stream request").await?;
                return Err(e.into());
            }
        };

        tracing::info!(
            stream_id = %request.stream_id,
            quality = ?request.requested_quality,
            adaptive = request.adaptive,
            "Stream request received"
        );

        let Some(quality) = self.config.ladder.resolve(&request.requested_quality) else {
            self.respond_error(&mut writer, &request.stream_id, "no suitable quality")
                .await?;
            return Err(Error::NoSuitableQuality(request.stream_id));
        };

        let mut session = StreamSession::new(&request, quality, &self.config);
        let cancel = ctx.cancel.child_token();
        let (stats_tx, stats_rx) = watch::channel(session.stats().clone());

        let generation = self.insert_session(&request.stream_id, &cancel, stats_rx).await;
        let Some(generation) = generation else {
            self.respond_error(&mut writer, &request.stream_id, "stream already active")
                .await?;
            return Err(Error::SessionAlreadyActive(request.stream_id));
        };

        let entity_id = request.entity().to_string();
        self.registry
            .touch_or_register(&entity_id, EntityKind::Session)
            .await;
        if let Err(e) = self.registry.attach(&entity_id).await {
            tracing::debug!(
                entity_id = %entity_id,
                error = %e,
                "Session entity vanished before attach"
            );
        }

        let response = StreamResponse {
            stream_id: request.stream_id.clone(),
            status: StreamStatus::Accepted,
            available_qualities: self.config.ladder.tiers().to_vec(),
            chunk_duration_ms: self.config.chunk_duration.as_millis() as u64,
            current_quality: session.current_tier().cloned(),
            message: None,
        };

        let result = match write_line(&mut writer, &response).await {
            Ok(()) => {
                let quality = response.current_quality.as_ref().map(|t| t.name.as_str());
                tracing::info!(
                    stream_id = %request.stream_id,
                    quality = quality.unwrap_or("-"),
                    "Stream session started"
                );
                ctx.state.start_loop();
                let sink = FramedWrite::new(writer, ChunkCodec::new(self.config.max_header_len));
                self.stream_loop(&mut session, &mut lines, sink, &stats_tx, &cancel, &mut ctx)
                    .await
            }
            Err(e) => Err(e),
        };

        // Teardown
        cancel.cancel();
        self.remove_session(&request.stream_id, generation).await;
        self.registry.detach(&entity_id).await;
        ctx.state.close();

        let stats = session.stats();
        tracing::info!(
            stream_id = %stats.stream_id,
            chunks_sent = stats.chunks_sent,
            bytes_sent = stats.bytes_sent,
            quality_changes = stats.quality_changes,
            "Stream session ended"
        );

        result
    }

    async fn stream_loop<R, W>(
        &self,
        session: &mut StreamSession,
        lines: &mut FramedRead<R, LinesCodec>,
        mut sink: FramedWrite<W, ChunkCodec>,
        stats_tx: &watch::Sender<SessionStats>,
        cancel: &CancellationToken,
        ctx: &mut ChannelContext,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let period = self.config.chunk_duration;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut feedback_open = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),

                _ = ticker.tick() => {
                    let Some(frame) = session.next_chunk(self.source.as_ref()) else {
                        return Err(Error::NoSuitableQuality(session.id().to_string()));
                    };
                    let size = frame.header.size;
                    let is_keyframe = frame.header.is_keyframe;

                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        sent = sink.send(frame) => sent?,
                    }

                    session.record_delivery(size, is_keyframe);
                    if let Some(change) = session.adapt(&self.config.policy) {
                        let ladder = &self.config.ladder;
                        tracing::info!(
                            stream_id = %session.id(),
                            from = ladder.get(change.from).map(|t| t.name.as_str()).unwrap_or("-"),
                            to = ladder.get(change.to).map(|t| t.name.as_str()).unwrap_or("-"),
                            buffer_health = session.stats().buffer_health,
                            packet_loss = session.stats().packet_loss,
                            "Quality adapted"
                        );
                    }
                    stats_tx.send_replace(session.stats().clone());
                }

                line = lines.next(), if feedback_open => match line {
                    Some(Ok(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let feedback: Feedback = serde_json::from_str(&line)?;
                        ctx.state.on_message();
                        if let Err(e) = self.registry.touch(session.entity_id()).await {
                            tracing::debug!(
                                entity_id = %session.entity_id(),
                                error = %e,
                                "Feedback for unregistered session entity"
                            );
                        }
                        tracing::trace!(
                            stream_id = %session.id(),
                            buffer_health = feedback.buffer_health,
                            packet_loss = feedback.packet_loss,
                            "Feedback received"
                        );
                        session.observe(feedback);
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        // Client closed its send side; keep streaming
                        feedback_open = false;
                    }
                },
            }
        }
    }

    async fn insert_session(
        &self,
        stream_id: &str,
        cancel: &CancellationToken,
        stats: watch::Receiver<SessionStats>,
    ) -> Option<u64> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(stream_id) {
            return None;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        sessions.insert(
            stream_id.to_string(),
            SessionHandle {
                generation,
                cancel: cancel.clone(),
                stats,
            },
        );
        Some(generation)
    }

    async fn remove_session(&self, stream_id: &str, generation: u64) {
        let mut sessions = self.sessions.write().await;
        if sessions
            .get(stream_id)
            .is_some_and(|handle| handle.generation == generation)
        {
            sessions.remove(stream_id);
        }
    }

    async fn respond_error<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        stream_id: &str,
        message: &str,
    ) -> Result<()> {
        tracing::warn!(stream_id = %stream_id, reason = message, "Stream request refused");

        let response = StreamResponse {
            stream_id: stream_id.to_string(),
            status: StreamStatus::Error,
            available_qualities: self.config.ladder.tiers().to_vec(),
            chunk_duration_ms: self.config.chunk_duration.as_millis() as u64,
            current_quality: None,
            message: Some(message.to_string()),
        };
        write_line(writer, &response).await?;
        writer.shutdown().await?;
        Ok(())
    }
}

async fn write_line<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

impl StreamHandler for StreamingController {
    fn name(&self) -> &'static str {
        "streaming"
    }

    fn handle(&self, stream: BoxedStream, ctx: ChannelContext) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.run(stream, ctx))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{duplex, AsyncBufReadExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

    use super::*;
    use crate::ladder::QualityRequest;
    use crate::streaming::protocol::ChunkFrame;

    struct Client {
        response: StreamResponse,
        frames: FramedRead<BufReader<ReadHalf<DuplexStream>>, ChunkCodec>,
        writer: WriteHalf<DuplexStream>,
    }

    impl Client {
        async fn connect(
            controller: &Arc<StreamingController>,
            request: &StreamRequest,
        ) -> (Self, tokio::task::JoinHandle<Result<()>>) {
            let (client, server) = duplex(256 * 1024);
            let task = {
                let controller = Arc::clone(controller);
                tokio::spawn(
                    async move { controller.run(server, ChannelContext::detached()).await },
                )
            };

            let (read, mut writer) = tokio::io::split(client);
            let mut line = serde_json::to_vec(request).unwrap();
            line.push(b'\n');
            writer.write_all(&line).await.unwrap();

            let mut reader = BufReader::new(read);
            let mut response = String::new();
            reader.read_line(&mut response).await.unwrap();
            let response: StreamResponse = serde_json::from_str(&response).unwrap();

            let client = Self {
                response,
                frames: FramedRead::new(reader, ChunkCodec::new(16 * 1024)),
                writer,
            };
            (client, task)
        }

        async fn next(&mut self) -> ChunkFrame {
            self.frames.next().await.unwrap().unwrap()
        }

        async fn feedback(&mut self, buffer_health: f64, packet_loss: f64) {
            let mut line = serde_json::to_vec(&Feedback::new(buffer_health, packet_loss)).unwrap();
            line.push(b'\n');
            self.writer.write_all(&line).await.unwrap();
        }
    }

    fn controller(chunk_ms: u64) -> Arc<StreamingController> {
        let config = StreamingConfig::default()
            .chunk_duration(Duration::from_millis(chunk_ms))
            .keyframe_interval(3);
        Arc::new(StreamingController::new(config, Arc::new(EntityRegistry::new())))
    }

    #[tokio::test]
    async fn test_handshake_and_sequencing() {
        let controller = controller(10);
        let request = StreamRequest::new("cam-1", QualityRequest::named("360p"));
        let (mut client, _task) = Client::connect(&controller, &request).await;

        assert_eq!(client.response.status, StreamStatus::Accepted);
        assert_eq!(client.response.available_qualities.len(), 4);
        assert_eq!(client.response.current_quality.as_ref().unwrap().name, "360p");
        assert_eq!(client.response.chunk_duration_ms, 10);

        for i in 0..7u64 {
            let frame = client.next().await;
            assert_eq!(frame.header.sequence, i);
            assert_eq!(frame.header.is_keyframe, i % 3 == 0);
            assert_eq!(frame.payload.len(), frame.header.size);
        }

        let stats = controller.active_sessions().await;
        assert!(stats["cam-1"].chunks_sent >= 6);
        assert!(stats["cam-1"].avg_bitrate > 0.0);
    }

    #[tokio::test]
    async fn test_stop_stream_twice() {
        let controller = controller(10);
        let request = StreamRequest::new("cam-1", QualityRequest::named("360p"));
        let (mut client, task) = Client::connect(&controller, &request).await;
        client.next().await;

        controller.stop_stream("cam-1").await.unwrap();
        assert!(controller.active_sessions().await.is_empty());
        let err = controller.stop_stream("cam-1").await.unwrap_err();
        assert!(err.is_not_found());

        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_stream_id_refused() {
        let controller = controller(10);
        let request = StreamRequest::new("cam-1", QualityRequest::named("360p"));
        let (_first, _task) = Client::connect(&controller, &request).await;

        let (second, task) = Client::connect(&controller, &request).await;
        assert_eq!(second.response.status, StreamStatus::Error);
        assert!(matches!(task.await.unwrap(), Err(Error::SessionAlreadyActive(_))));
        assert_eq!(controller.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_session_entity_attached_while_streaming() {
        let registry = Arc::new(EntityRegistry::new());
        let controller = Arc::new(StreamingController::new(
            StreamingConfig::default().chunk_duration(Duration::from_millis(10)),
            Arc::clone(&registry),
        ));
        let mut request = StreamRequest::new("cam-1", QualityRequest::named("360p"));
        request.entity_id = Some("camera-a".into());

        let (mut client, task) = Client::connect(&controller, &request).await;
        client.next().await;

        let entity = registry.get("camera-a").await.unwrap();
        assert_eq!(entity.kind, EntityKind::Session);
        assert_eq!(entity.attached_streams, 1);

        controller.stop_stream("cam-1").await.unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(registry.get("camera-a").await.unwrap().attached_streams, 0);
    }

    /// Tier names of the next frames until `stop` is seen
    async fn tiers_until(client: &mut Client, stop: &str) -> Vec<String> {
        let mut seen = Vec::new();
        while seen.last().map_or(true, |name| name != stop) {
            seen.push(client.next().await.header.quality.name);
            assert!(seen.len() < 20, "never reached {stop}: {seen:?}");
        }
        seen
    }

    #[tokio::test]
    async fn test_feedback_drives_adaptation() {
        let controller = controller(20);
        let request = StreamRequest::new("cam-1", QualityRequest::named("720p")).adaptive(true);
        let (mut client, _task) = Client::connect(&controller, &request).await;
        assert_eq!(client.response.current_quality.as_ref().unwrap().name, "720p");

        assert_eq!(client.next().await.header.quality.name, "720p");

        client.feedback(0.1, 0.0).await;
        let down = tiers_until(&mut client, "360p").await;
        let first_change = down.iter().position(|name| name != "720p").unwrap();
        assert_eq!(down[first_change..], ["480p", "360p"]);

        client.feedback(0.9, 0.0).await;
        let up = tiers_until(&mut client, "1080p").await;
        let first_change = up.iter().position(|name| name != "360p").unwrap();
        assert_eq!(up[first_change..], ["480p", "720p", "1080p"]);

        let stats = &controller.active_sessions().await["cam-1"];
        assert_eq!(stats.quality_changes, 5);
        assert_eq!(stats.buffer_health, 0.9);
    }

    #[tokio::test]
    async fn test_single_low_sample_steps_down_every_tick() {
        let controller = controller(20);
        let request = StreamRequest::new("cam-1", QualityRequest::named("1080p")).adaptive(true);
        let (mut client, _task) = Client::connect(&controller, &request).await;
        assert_eq!(client.next().await.header.quality.name, "1080p");

        client.feedback(0.1, 0.0).await;
        let seen = tiers_until(&mut client, "360p").await;
        let first_change = seen.iter().position(|name| name != "1080p").unwrap();
        assert_eq!(seen[first_change..], ["720p", "480p", "360p"]);

        // Stays at the bottom while the sample is unchanged
        for _ in 0..3 {
            assert_eq!(client.next().await.header.quality.name, "360p");
        }
        let stats = &controller.active_sessions().await["cam-1"];
        assert_eq!(stats.quality_changes, 3);
        assert_eq!(stats.buffer_health, 0.1);
    }

    #[tokio::test]
    async fn test_feedback_touches_session_entity() {
        let registry = Arc::new(EntityRegistry::new());
        let controller = Arc::new(StreamingController::new(
            StreamingConfig::default().chunk_duration(Duration::from_millis(10)),
            Arc::clone(&registry),
        ));
        let request = StreamRequest::new("cam-1", QualityRequest::named("360p"));
        let (mut client, _task) = Client::connect(&controller, &request).await;
        client.next().await;

        let before = registry.get("cam-1").await.unwrap().last_seen;
        tokio::time::sleep(Duration::from_millis(5)).await;
        client.feedback(0.5, 0.0).await;

        let mut touched = false;
        for _ in 0..50 {
            if registry.get("cam-1").await.unwrap().last_seen > before {
                touched = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(touched);
    }

    #[tokio::test]
    async fn test_malformed_request() {
        let controller = controller(10);
        let (client, server) = duplex(4096);
        let (read, mut write) = tokio::io::split(client);

        write.write_all(b"{not json}\n").await.unwrap();
        let result = controller.run(server, ChannelContext::detached()).await;

        assert!(matches!(result, Err(Error::Decode(_))));
        assert_eq!(controller.session_count().await, 0);

        let mut line = String::new();
        BufReader::new(read).read_line(&mut line).await.unwrap();
        let response: StreamResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(response.status, StreamStatus::Error);
        assert_eq!(response.message.as_deref(), Some("malformed stream request"));
    }

    #[tokio::test]
    async fn test_client_disconnect_releases_session() {
        let controller = controller(10);
        let request = StreamRequest::new("cam-1", QualityRequest::named("360p"));
        let (mut client, task) = Client::connect(&controller, &request).await;
        client.next().await;
        drop(client);

        assert!(task.await.unwrap().is_err());
        assert!(controller.active_sessions().await.is_empty());
    }
}

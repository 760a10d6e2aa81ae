//! WebSocket handler
//!
//! One task per connection runs the session loop; LLM/TTS work runs as a
//! child task whose cancellation token hangs off the session token, so
//! closing the session cancels everything transitively. All per-session
//! mutable state lives inside the loop; nothing here is shared across
//! sessions.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use voice_relay_core::{
    ConversationHistory, Error, GenerateRequest, Message as PromptMessage, TranscriptEvent,
    VoiceConfig,
};
use voice_relay_pipeline::{AudioIngest, ReplyEvent, ReplyOptions, TurnController, TurnDecision};

use crate::metrics;
use crate::outbound::OutboundQueue;
use crate::protocol::{InboundMessage, OutboundMessage};
use crate::rate_limit::RateLimiter;
use crate::session::Session;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Handle WebSocket upgrade at `/ws`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Result<Response, axum::http::StatusCode> {
    if state.config.auth.require_token {
        let valid = query
            .token
            .as_deref()
            .map(|t| state.tokens.validate(t))
            .unwrap_or(false);
        if !valid {
            metrics::record_error("UNAUTHORIZED");
            return Err(axum::http::StatusCode::UNAUTHORIZED);
        }
    }

    let session = state.sessions.open().map_err(axum::http::StatusCode::from)?;
    metrics::record_session_opened(state.sessions.count());

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, session, state)))
}

async fn handle_socket(socket: WebSocket, session: Arc<Session>, state: AppState) {
    let session_id = session.id.clone();
    let (sink, stream) = socket.split();

    let (queue, drain) = OutboundQueue::new(state.config.server.outbound_queue_depth);
    let drain_task = tokio::spawn(drain.run(sink));

    queue
        .send_control(OutboundMessage::Connected {
            session_id: session_id.clone(),
        })
        .await;

    run_session(stream, session, &state, queue).await;

    // Single teardown point: every exit route funnels through close().
    state.sessions.close(&session_id);
    metrics::record_session_closed(state.sessions.count());
    let _ = drain_task.await;
}

/// Progress reported by the active reply task.
enum ReplyProgress {
    Event(ReplyEvent),
    Done(Result<(), Error>),
}

struct SessionContext {
    session: Arc<Session>,
    state: AppState,
    queue: OutboundQueue,
    history: ConversationHistory,
    turn: TurnController,
    rate: RateLimiter,
    reply_tx: mpsc::Sender<ReplyProgress>,

    /// At most one in-flight reply cycle per session.
    processing: bool,
    /// Set on barge-in/reset: drop events from the cancelled reply until
    /// its Done arrives.
    suppress_reply_output: bool,
    /// Utterance accepted during a barge-in, started once the cancelled
    /// reply finishes winding down.
    pending_utterance: Option<String>,
    reply_cancel: Option<CancellationToken>,
    reply_audio_sent: bool,
    reply_started_at: Option<Instant>,

    llm_provider: Option<String>,
    tts_provider: Option<String>,
}

async fn run_session(
    mut stream: impl futures::Stream<Item = Result<Message, axum::Error>> + Unpin,
    session: Arc<Session>,
    state: &AppState,
    queue: OutboundQueue,
) {
    let mut ingest = AudioIngest::new(state.stt.clone(), &state.config.audio, &state.config.stt);
    let (reply_tx, mut reply_rx) = mpsc::channel(64);

    let mut ctx = SessionContext {
        session: session.clone(),
        state: state.clone(),
        queue,
        history: ConversationHistory::new(state.config.turn.max_history_turns),
        turn: TurnController::new(&state.config.turn),
        rate: RateLimiter::new(state.config.rate_limit.clone()),
        reply_tx,
        processing: false,
        suppress_reply_output: false,
        pending_utterance: None,
        reply_cancel: None,
        reply_audio_sent: false,
        reply_started_at: None,
        llm_provider: None,
        tts_provider: None,
    };

    let mut heartbeat = tokio::time::interval(std::time::Duration::from_secs(
        state.config.server.heartbeat_interval_secs,
    ));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut missed_pongs = 0u32;

    loop {
        tokio::select! {
            // Inactivity sweep or an external close fired the token.
            _ = session.cancellation().cancelled() => {
                debug!(session_id = %session.id, "session cancelled, ending loop");
                break;
            }

            frame = stream.next() => match frame {
                Some(Ok(Message::Binary(bytes))) => ctx.on_audio(&mut ingest, bytes).await,
                Some(Ok(Message::Text(raw))) => ctx.on_control(&mut ingest, &raw).await,
                Some(Ok(Message::Pong(_))) => missed_pongs = 0,
                // The underlying ws stack answers pings for us.
                Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    debug!(session_id = %session.id, "client closed connection");
                    break;
                }
                Some(Err(e)) => {
                    info!(session_id = %session.id, error = %e, "connection reset");
                    break;
                }
                None => break,
            },

            event = ingest.next_event() => ctx.on_transcript(&mut ingest, event).await,

            progress = reply_rx.recv() => {
                // Never None: ctx holds a sender for the session lifetime.
                if let Some(progress) = progress {
                    ctx.on_reply_progress(progress).await;
                }
            }

            _ = heartbeat.tick() => {
                if missed_pongs >= 2 {
                    warn!(session_id = %session.id, "two heartbeats missed, terminating");
                    break;
                }
                missed_pongs += 1;
                if !ctx.queue.send_ping().await {
                    break;
                }
            }
        }
    }

    // Abandon any in-flight reply before the registry close fires the
    // session token (belt for the case where the loop exits first).
    if let Some(cancel) = ctx.reply_cancel.take() {
        cancel.cancel();
    }
}

impl SessionContext {
    async fn on_audio(&mut self, ingest: &mut AudioIngest, bytes: Vec<u8>) {
        self.session.touch();

        if let Err(e) = self.rate.check_audio(bytes.len()) {
            metrics::record_error("RATE_LIMITED");
            self.queue
                .send_control(OutboundMessage::Error {
                    code: "RATE_LIMITED".to_string(),
                    message: e.to_string(),
                })
                .await;
            return;
        }

        match ingest.push_frame(bytes, self.session.language()).await {
            Ok(()) => {}
            Err(e @ Error::InvalidInput(_)) => {
                metrics::record_error(e.code());
                self.queue.send_control(OutboundMessage::error(&e)).await;
            }
            Err(e) => {
                // STT stream failure: recoverable, the session stays up and
                // the next frame reopens the stream.
                warn!(session_id = %self.session.id, error = %e, "listening stopped");
                self.queue
                    .send_control(OutboundMessage::ListeningStopped {
                        reason: e.to_string(),
                    })
                    .await;
            }
        }
    }

    async fn on_control(&mut self, ingest: &mut AudioIngest, raw: &str) {
        self.session.touch();

        if let Err(e) = self.rate.check_message() {
            metrics::record_error("RATE_LIMITED");
            self.queue
                .send_control(OutboundMessage::Error {
                    code: "RATE_LIMITED".to_string(),
                    message: e.to_string(),
                })
                .await;
            return;
        }

        let message = match InboundMessage::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                metrics::record_error(e.code());
                self.queue.send_control(OutboundMessage::error(&e)).await;
                return;
            }
        };

        match message {
            InboundMessage::Ping => {
                self.queue.send_control(OutboundMessage::Pong).await;
            }
            InboundMessage::Reset => {
                debug!(session_id = %self.session.id, "reset: clearing history and cancelling reply");
                if let Some(cancel) = self.reply_cancel.take() {
                    cancel.cancel();
                    self.suppress_reply_output = true;
                }
                self.pending_utterance = None;
                self.queue.drop_pending_audio();
                self.history.clear();
                ingest.close();
            }
            InboundMessage::SetLanguage { language } => {
                match InboundMessage::resolve_language(&language) {
                    Ok(lang) => {
                        self.session.set_language(lang);
                        // Reopen the STT stream with the new language on the
                        // next frame.
                        ingest.close();
                    }
                    Err(e) => {
                        metrics::record_error(e.code());
                        self.queue.send_control(OutboundMessage::error(&e)).await;
                    }
                }
            }
            InboundMessage::SetProvider { provider } => {
                let known_llm = self
                    .state
                    .pipeline
                    .router()
                    .provider_names()
                    .contains(&provider);
                let known_tts = self
                    .state
                    .pipeline
                    .synthesizer()
                    .provider_names()
                    .contains(&provider);

                if !known_llm && !known_tts {
                    let e = Error::InvalidInput(format!("unknown provider '{}'", provider));
                    metrics::record_error(e.code());
                    self.queue.send_control(OutboundMessage::error(&e)).await;
                    return;
                }
                if known_llm {
                    self.llm_provider = Some(provider.clone());
                }
                if known_tts {
                    self.tts_provider = Some(provider);
                }
            }
        }
    }

    async fn on_transcript(
        &mut self,
        ingest: &mut AudioIngest,
        event: Option<voice_relay_core::Result<TranscriptEvent>>,
    ) {
        let event = match event {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                warn!(session_id = %self.session.id, error = %e, "transcription stream error");
                ingest.close();
                self.queue
                    .send_control(OutboundMessage::ListeningStopped {
                        reason: e.to_string(),
                    })
                    .await;
                return;
            }
            None => {
                self.queue
                    .send_control(OutboundMessage::ListeningStopped {
                        reason: "transcription stream ended".to_string(),
                    })
                    .await;
                return;
            }
        };

        if event.is_interim {
            // Advisory only; final transcripts are the turn boundary.
            return;
        }

        self.session.touch();
        match self.turn.classify(&event.text, self.history.last_assistant_text()) {
            TurnDecision::NoSpeech => {
                metrics::record_utterance("no_speech");
                self.queue.send_control(OutboundMessage::NoSpeech).await;
            }
            TurnDecision::Echo => {
                metrics::record_utterance("echo");
                debug!(session_id = %self.session.id, "echo transcript dropped");
            }
            TurnDecision::Genuine => self.on_genuine_utterance(event.text).await,
        }
    }

    async fn on_genuine_utterance(&mut self, text: String) {
        if self.processing {
            if self.reply_audio_sent {
                // Barge-in: kill the playing reply, run the new utterance
                // once it has wound down.
                info!(session_id = %self.session.id, "barge-in, cancelling active reply");
                metrics::record_utterance("genuine");
                if let Some(cancel) = self.reply_cancel.take() {
                    cancel.cancel();
                }
                self.suppress_reply_output = true;
                self.queue.drop_pending_audio();
                self.pending_utterance = Some(text);
            } else {
                // A reply is in flight but nothing has played yet; starting
                // another would interleave two replies for one session. The
                // client still gets an explicit signal for the utterance.
                metrics::record_utterance("rejected");
                warn!(session_id = %self.session.id, "utterance rejected, reply already in flight");
                let e = Error::TemporaryUnavailable(
                    "a reply is already being generated, utterance dropped".to_string(),
                );
                metrics::record_error(e.code());
                self.queue.send_control(OutboundMessage::error(&e)).await;
            }
            return;
        }

        metrics::record_utterance("genuine");
        self.start_reply(text).await;
    }

    async fn start_reply(&mut self, transcript: String) {
        self.processing = true;
        self.suppress_reply_output = false;
        self.reply_audio_sent = false;
        self.reply_started_at = Some(Instant::now());

        self.history.push(voice_relay_core::Turn::user(transcript.clone()));

        let llm_config = &self.state.config.llm;
        let mut messages = Vec::with_capacity(self.history.turn_count() + 1);
        messages.push(PromptMessage::system(llm_config.system_prompt.clone()));
        messages.extend(self.history.messages());
        let request = GenerateRequest {
            messages,
            max_tokens: llm_config.max_tokens,
            temperature: llm_config.temperature,
        };

        let voice = VoiceConfig {
            language: self.session.language(),
            voice_id: None,
            speaking_rate: 1.0,
        };
        let options = ReplyOptions {
            llm_provider: self.llm_provider.clone(),
            tts_provider: self.tts_provider.clone(),
        };

        let cancel = self.session.cancellation().child_token();
        self.reply_cancel = Some(cancel.clone());

        let pipeline = self.state.pipeline.clone();
        let progress_tx = self.reply_tx.clone();
        tokio::spawn(async move {
            let (event_tx, mut event_rx) = mpsc::channel(32);

            let forward_tx = progress_tx.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(event) = event_rx.recv().await {
                    if forward_tx.send(ReplyProgress::Event(event)).await.is_err() {
                        break;
                    }
                }
            });

            let result = pipeline
                .run_turn(&transcript, &request, &voice, &options, event_tx, cancel)
                .await;
            let _ = forwarder.await;
            let _ = progress_tx.send(ReplyProgress::Done(result)).await;
        });
    }

    async fn on_reply_progress(&mut self, progress: ReplyProgress) {
        match progress {
            ReplyProgress::Event(_) if self.suppress_reply_output => {}
            ReplyProgress::Event(event) => match event {
                ReplyEvent::Transcription(text) => {
                    self.queue
                        .send_control(OutboundMessage::Transcription { text })
                        .await;
                }
                ReplyEvent::Text(content) => {
                    self.queue
                        .send_control(OutboundMessage::Text { content })
                        .await;
                }
                ReplyEvent::Audio(bytes) => {
                    self.reply_audio_sent = true;
                    self.queue.send_audio(bytes).await;
                }
                ReplyEvent::Complete { text } => {
                    self.history.push(voice_relay_core::Turn::assistant(text.clone()));
                    if let Some(started) = self.reply_started_at.take() {
                        metrics::record_reply_latency(started.elapsed());
                    }
                    self.queue
                        .send_control(OutboundMessage::response_complete(text))
                        .await;
                }
            },
            ReplyProgress::Done(result) => {
                self.processing = false;
                self.suppress_reply_output = false;
                self.reply_cancel = None;

                match result {
                    Ok(()) | Err(Error::Cancelled) => {}
                    Err(e) => {
                        // One user-visible error per utterance; the session
                        // stays open for retry.
                        metrics::record_error(e.code());
                        self.queue.send_control(OutboundMessage::error(&e)).await;
                    }
                }

                if let Some(text) = self.pending_utterance.take() {
                    self.start_reply(text).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use voice_relay_config::Settings;
    use voice_relay_core::{
        LanguageModel, Result, SpeechToText, SttStream, SttStreamConfig, TextToSpeech,
    };
    use voice_relay_pipeline::{ReplyPipeline, ReplyRouter, ReplySynthesizer};

    use crate::outbound::OutboundDrain;

    struct NullStt;

    #[async_trait]
    impl SpeechToText for NullStt {
        async fn open_stream(&self, _config: SttStreamConfig) -> Result<SttStream> {
            let (audio_tx, _audio_rx) = mpsc::channel(8);
            let (_event_tx, events) = mpsc::channel(8);
            Ok(SttStream {
                audio_tx,
                events,
                cancel: CancellationToken::new(),
            })
        }

        fn name(&self) -> &str {
            "null"
        }
    }

    struct CountingLlm {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LanguageModel for CountingLlm {
        async fn generate_stream(
            &self,
            request: &GenerateRequest,
            tx: mpsc::Sender<String>,
            _cancel: &CancellationToken,
        ) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let last = request
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            let _ = tx.send(last.clone()).await;
            Ok(last)
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    struct ByteTts;

    #[async_trait]
    impl TextToSpeech for ByteTts {
        async fn synthesize(
            &self,
            text: &str,
            _voice: &VoiceConfig,
            _cancel: &CancellationToken,
        ) -> Result<Vec<u8>> {
            Ok(text.as_bytes().to_vec())
        }

        fn name(&self) -> &str {
            "bytes"
        }
    }

    struct TestSession {
        ctx: SessionContext,
        drain: OutboundDrain,
        reply_rx: mpsc::Receiver<ReplyProgress>,
        llm_calls: Arc<AtomicUsize>,
    }

    fn test_session() -> TestSession {
        let llm_calls = Arc::new(AtomicUsize::new(0));
        let pipeline = ReplyPipeline::new(
            ReplyRouter::new(vec![Arc::new(CountingLlm {
                calls: llm_calls.clone(),
            })]),
            ReplySynthesizer::new(vec![Arc::new(ByteTts)], 1),
        );
        let state = AppState::with_providers(Settings::default(), Arc::new(NullStt), pipeline);
        let session = state.sessions.open().unwrap();
        let (queue, drain) = OutboundQueue::new(64);
        let (reply_tx, reply_rx) = mpsc::channel(64);

        let ctx = SessionContext {
            session,
            state: state.clone(),
            queue,
            history: ConversationHistory::new(state.config.turn.max_history_turns),
            turn: TurnController::new(&state.config.turn),
            rate: RateLimiter::new(state.config.rate_limit.clone()),
            reply_tx,
            processing: false,
            suppress_reply_output: false,
            pending_utterance: None,
            reply_cancel: None,
            reply_audio_sent: false,
            reply_started_at: None,
            llm_provider: None,
            tts_provider: None,
        };

        TestSession {
            ctx,
            drain,
            reply_rx,
            llm_calls,
        }
    }

    async fn drain_outbound(ctx: SessionContext, drain: OutboundDrain) -> Vec<String> {
        drop(ctx);
        let (sink_tx, sink_rx) = futures::channel::mpsc::channel(64);
        drain.run(sink_tx).await;
        sink_rx
            .collect::<Vec<Message>>()
            .await
            .into_iter()
            .filter_map(|m| match m {
                Message::Text(json) => Some(json),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn rejected_utterance_sends_error_event() {
        let mut t = test_session();
        t.ctx.processing = true;
        t.ctx.reply_audio_sent = false;

        t.ctx
            .on_genuine_utterance("quiero otra cosa".to_string())
            .await;

        // No second reply, no stashed utterance; the reply in flight owns
        // the session.
        assert!(t.ctx.pending_utterance.is_none());
        assert_eq!(t.llm_calls.load(Ordering::SeqCst), 0);

        // The client is told explicitly rather than left waiting.
        let sent = drain_outbound(t.ctx, t.drain).await;
        assert!(
            sent.iter().any(|j| j.contains(r#""type":"error""#)),
            "dropped utterance produced no client-visible signal"
        );
    }

    #[tokio::test]
    async fn barge_in_restarts_stashed_utterance_after_wind_down() {
        let mut t = test_session();
        let active = CancellationToken::new();
        t.ctx.processing = true;
        t.ctx.reply_audio_sent = true;
        t.ctx.reply_cancel = Some(active.clone());

        t.ctx
            .on_genuine_utterance("para un momento".to_string())
            .await;

        assert!(active.is_cancelled());
        assert!(t.ctx.suppress_reply_output);
        assert_eq!(t.ctx.pending_utterance.as_deref(), Some("para un momento"));
        // The new reply waits for the cancelled one to wind down.
        assert_eq!(t.llm_calls.load(Ordering::SeqCst), 0);

        // Wind-down arrives; the stashed utterance starts, exactly once.
        t.ctx
            .on_reply_progress(ReplyProgress::Done(Err(Error::Cancelled)))
            .await;
        assert!(t.ctx.processing);
        assert!(t.ctx.pending_utterance.is_none());

        let mut transcribed = None;
        while let Some(progress) = t.reply_rx.recv().await {
            match progress {
                ReplyProgress::Event(ReplyEvent::Transcription(text)) => {
                    transcribed = Some(text);
                }
                ReplyProgress::Done(result) => {
                    result.unwrap();
                    break;
                }
                _ => {}
            }
        }
        assert_eq!(transcribed.as_deref(), Some("para un momento"));
        assert_eq!(t.llm_calls.load(Ordering::SeqCst), 1);
    }
}

//! Streaming reply pipeline
//!
//! The pieces between a session's inbound audio and its outbound reply:
//! - `AudioIngest` - frame validation and lazy STT stream management
//! - `TurnController` - echo suppression and no-speech filtering
//! - `ReplyRouter` - ordered-fallback LLM streaming
//! - `ReplySynthesizer` - ordered, concurrency-bounded TTS synthesis
//! - `ReplyPipeline` - wires router and synthesizer for one reply cycle
//!
//! All pieces are per-session and single-owner; sessions share nothing but
//! the provider backends behind `Arc`.

pub mod ingest;
pub mod orchestrator;
pub mod router;
pub mod synth;
pub mod turn;

pub use ingest::AudioIngest;
pub use orchestrator::{ReplyEvent, ReplyOptions, ReplyPipeline};
pub use router::ReplyRouter;
pub use synth::ReplySynthesizer;
pub use turn::{TurnController, TurnDecision};

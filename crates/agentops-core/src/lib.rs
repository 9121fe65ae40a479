// Core substrate abstractions
//
// This crate defines the runtime types shared by every other Agentops crate:
// - Packet envelopes (the universal persisted record)
// - Trace contexts and typed spans (W3C-compatible)
// - Failure classification and the static recovery table
// - Tool dispatch value types, governance contracts, argument sanitization
// - The chat-completion interface and its deterministic mock
// - Observability settings loaded from the environment
//
// Decision: no storage or HTTP dependencies here - purely runtime abstractions.

pub mod config;
pub mod dispatch;
pub mod failure;
pub mod llm;
pub mod packet;
pub mod span;
pub mod trace;

pub use config::ObservabilitySettings;
pub use dispatch::{
    sanitize_arguments, DispatchContext, DispatchOutcome, DispatchStatus, GovernanceDecision,
    GovernanceEngine, GovernanceRequest,
};
pub use failure::{
    classify_span, recovery_actions_for, FailureClass, FailureSignal, RecoveryAction,
    RemediationAction,
};
pub use llm::{ChatMessage, ChatModel, ChatRequest, ChatResponse, ChatRole, LlmError, MockChatModel};
pub use packet::{
    MemorySegment, PacketConfidence, PacketEnvelope, PacketLineage, PacketMetadata,
    PacketProvenance,
};
pub use span::{PolicyResult, Span, SpanDetail, SpanKind, SpanStatus};
pub use trace::TraceContext;

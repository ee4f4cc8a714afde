//! Streaming chat core for the university portal.
//!
//! The crate consumes the backend's `text/event-stream` chat endpoint and
//! folds its heterogeneous events into a transcript:
//!
//! - [`transport`]: POSTs a request and yields decoded [`StreamEvent`]s,
//!   with cancellation
//! - [`correlator`]: pairs tool responses with their starts and times them
//! - [`assembler`]: builds the in-flight assistant turn and the transcript
//! - [`session`]: the controller surfaces drive (`send`, `cancel`)
//! - [`view`] and [`format`]: display helpers for surfaces
//!
//! # Example
//!
//! ```no_run
//! use portal_chat::{ChatContext, ChatSession, ChatTarget, ClientConfig, StreamTransport};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::from_env();
//! let transport = StreamTransport::new(&config)?;
//! let mut session = ChatSession::new(
//!     transport,
//!     config,
//!     ChatContext::new(ChatTarget::course("EEM-204")),
//! );
//!
//! let outcome = session.send("Bu dersin içeriği nedir?").await?;
//! let answer = session.transcript().last().and_then(|t| t.assistant());
//! println!("{:?}: {}", outcome.end, answer.map_or("", |a| a.streamed_text()));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod assembler;
pub mod config;
pub mod context;
pub mod correlator;
pub mod decoder;
pub mod event;
pub mod format;
pub mod session;
pub mod transport;
pub mod view;

pub use assembler::{
    ActiveTurn, AssistantContent, ConversationTurn, Role, ToolCallRecord, ToolCallStatus,
    Transcript, TurnContent,
};
pub use config::{ClientConfig, ThreadPolicy};
pub use context::{ChatContext, ChatRequest, ChatTarget, UserProfile};
pub use correlator::{CallKey, Correlation, ToolCallCorrelator};
pub use event::{EventKind, EventParseError, StreamEvent, ToolResponse, ToolStart};
pub use session::{
    CancelHandle, ChatSession, NoopObserver, SendError, SessionObserver, SessionState,
    TurnOutcome,
};
pub use transport::{
    EventSource, EventStream, StreamEnd, StreamRequest, StreamTransport, TransportError,
};
pub use view::{turn_view, EventView, ToolCallDisplay, ToolCallView};

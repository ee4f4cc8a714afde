//! Core types and utilities for portal-chat.
//!
//! This crate provides the foundational types shared by the chat core and
//! every surface that embeds it:
//!
//! - **Identifiers**: conversation thread IDs and transcript turn IDs
//! - **Clock**: wall-clock timestamps plus a monotonic millisecond counter
//!   used to time tool calls
//!
//! # Example
//!
//! ```
//! use portal_chat_core::{ThreadId, TurnId};
//!
//! // A fresh thread for a newly opened conversation
//! let thread_id = ThreadId::generate();
//!
//! // A caller-supplied thread key is accepted verbatim
//! let custom: ThreadId = "thread-1717000000-abc1234".parse().unwrap();
//! assert_eq!(custom.as_str(), "thread-1717000000-abc1234");
//!
//! let turn_id = TurnId::generate();
//! assert_ne!(turn_id, TurnId::generate());
//! # let _ = thread_id;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod clock;
pub mod ids;

pub use clock::{Clock, SystemClock};
pub use ids::{IdError, ThreadId, TurnId};

#[cfg(any(test, feature = "test-utils"))]
pub use clock::ManualClock;

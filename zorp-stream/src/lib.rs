//! Composable duplex stream stack.
//!
//! A concrete layer (`layers::fd`, `layers::buf`, `layers::line`,
//! `layers::ssl`, `layers::gzip`, `layers::blob`, `layers::tee`) wraps a
//! generic child and together they form a chain built bottom-up: an
//! `fd` layer at the bottom, framing/transform layers in the middle, and
//! whatever the caller holds at the top. Every layer implements
//! [`core::Stream`], so the chain itself is pollable the same way a single
//! socket is.
//!
//! [`connector`] and [`listener`] produce the bottom-most `fd` layer from
//! an outbound dial or an inbound accept; [`resolver`] turns a configured
//! hostname into the address either of those takes; [`poll`] is the thin
//! bookkeeping layer the specification asks for on top of the event loop
//! (tokio's reactor) this crate assumes is already running underneath.

pub mod connector;
pub mod core;
pub mod ctrl;
pub mod layers;
pub mod listener;
pub mod poll;
pub mod resolver;
pub mod tls;

pub use core::{SavedContext, ShutdownMode, Stream, StreamHandle, StreamStats, Umbrella};
pub use ctrl::{CtrlMsg, CtrlReply, Direction};
pub use poll::{PollLoop, QuitSignal, SourceId};
pub use resolver::Resolver;

//! Gridbot - Inbound frame dispatch
//!
//! Chain of responsibility: handlers are asked in registration order and
//! the first one returning `true` consumes the frame. Frames nobody takes
//! go to the default handler.

use crate::hal::Transport;
use crate::log::log_trace;
use crate::protocol::Message;
use crate::types::*;
use heapless::Vec;

/// Frame handler over a shared context
///
/// Returns `true` when the frame was handled. The transport is available
/// for immediate replies.
pub type Handler<C> = fn(&C, &Message, &dyn Transport) -> bool;

/// Dispatch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Frames seen
    pub frames: u32,
    /// Taken by a registered handler
    pub handled: u32,
    /// Taken by the default handler
    pub defaulted: u32,
    /// Not taken at all
    pub dropped: u32,
}

/// Handler chain
pub struct Dispatcher<C> {
    handlers: Vec<Handler<C>, MAX_HANDLERS>,
    default: Option<Handler<C>>,
    stats: DispatchStats,
}

impl<C> Dispatcher<C> {
    /// Empty chain
    pub const fn new() -> Self {
        Self {
            handlers: Vec::new(),
            default: None,
            stats: DispatchStats {
                frames: 0,
                handled: 0,
                defaulted: 0,
                dropped: 0,
            },
        }
    }

    fn position(&self, handler: Handler<C>) -> Option<usize> {
        self.handlers
            .iter()
            .position(|h| *h as usize == handler as usize)
    }

    /// Append a handler to the chain
    pub fn register_handler(&mut self, handler: Handler<C>) -> Result<()> {
        if self.position(handler).is_some() {
            return Err(Error::AlreadyExists);
        }
        self.handlers.push(handler).map_err(|_| Error::NoMemory)
    }

    /// Remove a handler, keeping the order of the rest
    pub fn unregister_handler(&mut self, handler: Handler<C>) -> Result<()> {
        let index = self.position(handler).ok_or(Error::NotFound)?;
        self.handlers.remove(index);
        Ok(())
    }

    /// Handler for frames no registered handler takes
    pub fn set_default_handler(&mut self, handler: Option<Handler<C>>) {
        self.default = handler;
    }

    /// Registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// No handlers registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Counters since creation
    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Offer a frame to the chain
    pub fn dispatch(&mut self, ctx: &C, msg: &Message, tx: &dyn Transport) -> bool {
        self.stats.frames = self.stats.frames.wrapping_add(1);

        if self.handlers.iter().any(|h| h(ctx, msg, tx)) {
            self.stats.handled = self.stats.handled.wrapping_add(1);
            return true;
        }

        if let Some(default) = self.default {
            if default(ctx, msg, tx) {
                self.stats.defaulted = self.stats.defaulted.wrapping_add(1);
                return true;
            }
        }

        log_trace!("frame {:?} not handled", msg.code);
        self.stats.dropped = self.stats.dropped.wrapping_add(1);
        false
    }
}

impl<C> Default for Dispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

//! Engine-facing debugger interface
//!
//! Script engines talk to the debugger through [`DebuggerServer`]. Two
//! implementations exist and one is picked from configuration:
//!
//! - [`CdpServer`] routes pauses to the remote DevTools client through the
//!   pilot;
//! - [`DisabledServer`] never pauses.
//!
//! Engines that can describe their own state through [`EngineAdapter`] can
//! use [`pause_here`] instead of driving the pause loop themselves.
//!
//! # Example
//!
//! ```rust,ignore
//! if server.has_breakpoint(url, line) || server.pause_requested(ctx) {
//!     match pause_here(&*server, &mut adapter, ctx, BreakInfo::breakpoint(url, line)) {
//!         ResumeAction::StepOver => { /* ... */ }
//!         ResumeAction::Abort => return Err(aborted()),
//!         _ => {}
//!     }
//! }
//! ```

use crate::breakpoints::SharedBreakpoints;
use crate::error::{BridgeError, BridgeResult};
use crate::message::{
    BreakInfo, CallFrame, EngineCommand, EvalResult, LookupTarget, Message, Property, Ticket,
};
use crate::page::PageHandle;
use crate::pilot::{Offer, PilotHandle};
use crate::registry::{ContextId, Release};
use log::{debug, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// The debugger as seen by an engine thread.
///
/// Lines are 1-based throughout.
pub trait DebuggerServer: Send + Sync {
    /// Registers a new execution unit.
    ///
    /// # Errors
    ///
    /// Fails if the debugger is gone.
    fn add_context(&self) -> BridgeResult<ContextId>;

    /// Unregisters an execution unit.
    ///
    /// # Errors
    ///
    /// Fails for unknown contexts.
    fn remove_context(&self, context: ContextId) -> BridgeResult<()>;

    /// Whether a breakpoint is set at `url:line`.
    fn has_breakpoint(&self, url: &str, line: u32) -> bool;

    /// Reports a pause and blocks until a client is ready to handle it.
    ///
    /// On success the caller must loop on [`wait_from`](Self::wait_from).
    ///
    /// # Errors
    ///
    /// [`BridgeError::Aborted`] when the context was aborted while waiting;
    /// any other error means no client will see the pause and the engine
    /// should carry on.
    fn breakpoint_reached(&self, context: ContextId, info: BreakInfo) -> BridgeResult<()>;

    /// Blocks for the next command of the paused context.
    ///
    /// # Errors
    ///
    /// Fails for unknown contexts.
    fn wait_from(&self, context: ContextId) -> BridgeResult<EngineCommand>;

    /// Answers [`EngineCommand::GetCallStack`].
    ///
    /// # Errors
    ///
    /// Fails when no page is bound any more.
    fn send_call_stack(
        &self,
        context: ContextId,
        ticket: Ticket,
        frames: Vec<CallFrame>,
    ) -> BridgeResult<()>;

    /// Answers [`EngineCommand::Evaluate`].
    ///
    /// # Errors
    ///
    /// Fails when no page is bound any more.
    fn send_eval(&self, context: ContextId, ticket: Ticket, result: EvalResult) -> BridgeResult<()>;

    /// Answers [`EngineCommand::Lookup`].
    ///
    /// # Errors
    ///
    /// Fails when no page is bound any more.
    fn send_lookup(
        &self,
        context: ContextId,
        ticket: Ticket,
        properties: Vec<Property>,
    ) -> BridgeResult<()>;

    /// Announces the source of a script to the page, if a client is on it.
    ///
    /// The page sends `Debugger.scriptParsed` once per distinct source.
    ///
    /// # Errors
    ///
    /// Fails for unknown contexts.
    fn send_source(&self, context: ContextId, url: &str, source: &str) -> BridgeResult<()>;

    /// Fire-and-forget log line shown in the client console.
    fn trace(&self, context: ContextId, text: &str);

    /// Consumes a pending `Debugger.pause` request.
    fn pause_requested(&self, context: ContextId) -> bool;
}

/// Debugger backed by the DevTools protocol bridge.
#[derive(Debug, Clone)]
pub struct CdpServer {
    pilot: PilotHandle,
    breakpoints: SharedBreakpoints,
}

impl CdpServer {
    /// Wraps a running pilot.
    #[must_use]
    pub fn new(pilot: PilotHandle, breakpoints: SharedBreakpoints) -> Self {
        Self { pilot, breakpoints }
    }

    fn bound_page(&self, context: ContextId) -> BridgeResult<PageHandle> {
        self.pilot
            .page_of(context)?
            .ok_or(BridgeError::NotConnected)
    }
}

impl DebuggerServer for CdpServer {
    fn add_context(&self) -> BridgeResult<ContextId> {
        self.pilot.new_context()
    }

    fn remove_context(&self, context: ContextId) -> BridgeResult<()> {
        self.pilot.remove_context(context)
    }

    fn has_breakpoint(&self, url: &str, line: u32) -> bool {
        self.breakpoints.contains(url, line)
    }

    fn breakpoint_reached(&self, context: ContextId, info: BreakInfo) -> BridgeResult<()> {
        let page = match self.pilot.breakpoint_reached(context, info.clone())? {
            Offer::Page(page) => page,
            Offer::Wait(release) => {
                debug!("context {context} parked until a client takes it");
                match release.recv() {
                    Ok(Release::Page(page)) => page,
                    Ok(Release::Aborted) => return Err(BridgeError::Aborted),
                    Err(_) => return Err(BridgeError::PilotGone),
                }
            }
        };
        page.inbound().put(Message::BreakpointReached(info))?;
        Ok(())
    }

    fn wait_from(&self, context: ContextId) -> BridgeResult<EngineCommand> {
        let Some(page) = self.pilot.page_of(context)? else {
            debug!("context {context} has no page; continuing");
            return Ok(EngineCommand::Continue);
        };
        loop {
            match page.outbound().get(Duration::ZERO) {
                Ok(Some(Message::SendEngineCommand(command))) => return Ok(command),
                Ok(Some(other)) => debug!("context {context} ignored {other:?}"),
                // Reset: the page was torn down while we waited.
                Ok(None) | Err(_) => return Ok(EngineCommand::Continue),
            }
        }
    }

    fn send_call_stack(
        &self,
        context: ContextId,
        ticket: Ticket,
        frames: Vec<CallFrame>,
    ) -> BridgeResult<()> {
        let page = self.bound_page(context)?;
        page.inbound().put(Message::CallStack { ticket, frames })?;
        Ok(())
    }

    fn send_eval(&self, context: ContextId, ticket: Ticket, result: EvalResult) -> BridgeResult<()> {
        let page = self.bound_page(context)?;
        page.inbound().put(Message::Eval { ticket, result })?;
        Ok(())
    }

    fn send_lookup(
        &self,
        context: ContextId,
        ticket: Ticket,
        properties: Vec<Property>,
    ) -> BridgeResult<()> {
        let page = self.bound_page(context)?;
        page.inbound().put(Message::Lookup { ticket, properties })?;
        Ok(())
    }

    fn send_source(&self, context: ContextId, url: &str, source: &str) -> BridgeResult<()> {
        // A page without a socket learns sources from the next pause instead.
        if let Some(page) = self.pilot.page_of(context)?.filter(|page| page.is_live()) {
            page.inbound().put(Message::SetSource {
                url: url.to_owned(),
                source: source.to_owned(),
            })?;
        }
        Ok(())
    }

    fn trace(&self, context: ContextId, text: &str) {
        let sink = match self.pilot.trace_sink(context) {
            Ok(sink) => sink,
            Err(err) => {
                debug!("trace for context {context} dropped: {err}");
                return;
            }
        };
        if sink.put(text.to_owned()).is_err() {
            warn!("trace queue of context {context} is full; line dropped");
        }
    }

    fn pause_requested(&self, context: ContextId) -> bool {
        self.pilot.take_pause_request(context).unwrap_or(false)
    }
}

/// Debugger that never pauses.
#[derive(Debug, Default)]
pub struct DisabledServer {
    next_id: AtomicU64,
}

impl DisabledServer {
    /// A fresh disabled debugger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DebuggerServer for DisabledServer {
    fn add_context(&self) -> BridgeResult<ContextId> {
        Ok(ContextId::from(self.next_id.fetch_add(1, Ordering::Relaxed) + 1))
    }

    fn remove_context(&self, _context: ContextId) -> BridgeResult<()> {
        Ok(())
    }

    fn has_breakpoint(&self, _url: &str, _line: u32) -> bool {
        false
    }

    fn breakpoint_reached(&self, _context: ContextId, _info: BreakInfo) -> BridgeResult<()> {
        Ok(())
    }

    fn wait_from(&self, _context: ContextId) -> BridgeResult<EngineCommand> {
        Ok(EngineCommand::Continue)
    }

    fn send_call_stack(&self, _: ContextId, _: Ticket, _: Vec<CallFrame>) -> BridgeResult<()> {
        Ok(())
    }

    fn send_eval(&self, _: ContextId, _: Ticket, _: EvalResult) -> BridgeResult<()> {
        Ok(())
    }

    fn send_lookup(&self, _: ContextId, _: Ticket, _: Vec<Property>) -> BridgeResult<()> {
        Ok(())
    }

    fn send_source(&self, _: ContextId, _: &str, _: &str) -> BridgeResult<()> {
        Ok(())
    }

    fn trace(&self, _context: ContextId, _text: &str) {}

    fn pause_requested(&self, _context: ContextId) -> bool {
        false
    }
}

/// How the engine should leave a pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeAction {
    /// Run freely.
    Continue,
    /// Stop at the next line of the same frame.
    StepOver,
    /// Stop at the first line of the next call.
    StepInto,
    /// Stop once the current frame returns.
    StepOut,
    /// Terminate the execution unit.
    Abort,
}

/// Engine state queried while paused.
pub trait EngineAdapter {
    /// Current call stack, innermost frame first.
    fn call_stack(&mut self) -> Vec<CallFrame>;

    /// Evaluates `expression` in frame `frame`.
    fn evaluate(&mut self, frame: u32, expression: &str) -> EvalResult;

    /// Enumerates the properties of `target`.
    fn lookup(&mut self, target: &LookupTarget) -> Vec<Property>;
}

/// Runs one complete pause: report, serve inspection requests, resume.
///
/// Never fails; any debugger-side problem resumes the engine.
pub fn pause_here(
    server: &dyn DebuggerServer,
    adapter: &mut dyn EngineAdapter,
    context: ContextId,
    info: BreakInfo,
) -> ResumeAction {
    match server.breakpoint_reached(context, info) {
        Ok(()) => {}
        Err(BridgeError::Aborted) => return ResumeAction::Abort,
        Err(err) => {
            debug!("context {context} not paused: {err}");
            return ResumeAction::Continue;
        }
    }

    loop {
        let command = match server.wait_from(context) {
            Ok(command) => command,
            Err(err) => {
                warn!("context {context} lost its debugger: {err}");
                return ResumeAction::Continue;
            }
        };
        let sent = match command {
            EngineCommand::Continue => return ResumeAction::Continue,
            EngineCommand::StepOver => return ResumeAction::StepOver,
            EngineCommand::StepInto => return ResumeAction::StepInto,
            EngineCommand::StepOut => return ResumeAction::StepOut,
            EngineCommand::Abort => return ResumeAction::Abort,
            EngineCommand::GetCallStack { ticket } => {
                server.send_call_stack(context, ticket, adapter.call_stack())
            }
            EngineCommand::Evaluate {
                ticket,
                frame,
                expression,
            } => server.send_eval(context, ticket, adapter.evaluate(frame, &expression)),
            EngineCommand::Lookup { ticket, target } => {
                server.send_lookup(context, ticket, adapter.lookup(&target))
            }
        };
        if let Err(err) = sent {
            debug!("context {context} reply not delivered: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RemoteValue;

    struct Fixed;

    impl EngineAdapter for Fixed {
        fn call_stack(&mut self) -> Vec<CallFrame> {
            vec![CallFrame::new("main", "a.js", 1)]
        }

        fn evaluate(&mut self, _frame: u32, expression: &str) -> EvalResult {
            EvalResult::value(RemoteValue::String(expression.to_owned()))
        }

        fn lookup(&mut self, _target: &LookupTarget) -> Vec<Property> {
            Vec::new()
        }
    }

    #[test]
    fn disabled_server_never_pauses() {
        let server = DisabledServer::new();
        let a = server.add_context().unwrap();
        let b = server.add_context().unwrap();
        assert_ne!(a, b);
        assert!(!server.has_breakpoint("a.js", 1));
        assert!(!server.pause_requested(a));
        assert_eq!(
            pause_here(&server, &mut Fixed, a, BreakInfo::breakpoint("a.js", 1)),
            ResumeAction::Continue
        );
    }
}

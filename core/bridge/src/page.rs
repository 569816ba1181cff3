//! Debug page: one remote inspector tab bound to one execution context.
//!
//! A page owns two FIFOs shared with the engine thread of its context:
//!
//! - `inbound` carries engine and pilot messages to the page (pause
//!   notifications, replies, stop requests);
//! - `outbound` carries engine commands from the page to the paused engine
//!   thread.
//!
//! The page loop runs on the network thread that owns the page's WebSocket.
//! It alternates between a bounded socket read and draining `inbound`, so
//! neither source starves the other.

use crate::breakpoints::SharedBreakpoints;
use crate::codec::stubs::{StubContext, stub_result};
use crate::codec::{
    self, Command, DecodeError, INVALID_PARAMS, RequestId, SERVER_ERROR, ScriptTable, Verb, wire,
};
use crate::error::{BridgeError, BridgeResult};
use crate::message::{BreakInfo, CallFrame, EngineCommand, LookupTarget, Message, Ticket};
use crate::pilot::PilotHandle;
use crate::queue::{BoundedQueue, OverflowPolicy, QueueError};
use crate::registry::ContextId;
use crate::transport::Transport;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Lifecycle of a page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PageState {
    /// No client attached.
    #[default]
    Stopped,
    /// A socket was handed to the page; waiting for `Inspector.enable`.
    Starting,
    /// The client is attached and the engine is running.
    Connected,
    /// The engine is paused at a breakpoint.
    Paused,
}

impl fmt::Display for PageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Connected => "connected",
            Self::Paused => "paused",
        })
    }
}

/// Why a page stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Socket closed or failed, or the session went away.
    Closed,
    /// The context was aborted.
    Abort,
    /// The session went away while the context was paused; the page is kept
    /// for the next client and the engine is not resumed.
    Detached,
}

/// State shared between a page loop, the pilot and the engine thread.
#[derive(Debug)]
pub struct PageShared {
    number: u32,
    inbound: BoundedQueue<Message>,
    outbound: BoundedQueue<Message>,
    state: Mutex<PageState>,
    parked: Mutex<Option<Pause>>,
    tickets: AtomicU64,
}

/// Shared handle on a page.
pub type PageHandle = Arc<PageShared>;

impl PageShared {
    /// A stopped page with FIFOs of `capacity` slots.
    #[must_use]
    pub fn new(number: u32, capacity: usize) -> PageHandle {
        Arc::new(Self {
            number,
            inbound: BoundedQueue::new(capacity, OverflowPolicy::Block),
            outbound: BoundedQueue::new(capacity, OverflowPolicy::Block),
            state: Mutex::new(PageState::Stopped),
            parked: Mutex::new(None),
            tickets: AtomicU64::new(0),
        })
    }

    /// Page number, as used in `/devtools/page/<n>`.
    #[must_use]
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Engine/pilot → page FIFO.
    #[must_use]
    pub fn inbound(&self) -> &BoundedQueue<Message> {
        &self.inbound
    }

    /// Page → engine FIFO.
    #[must_use]
    pub fn outbound(&self) -> &BoundedQueue<Message> {
        &self.outbound
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> PageState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the state.
    pub fn set_state(&self, state: PageState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Moves `from` to `to` atomically; returns whether the state was `from`.
    pub fn transition(&self, from: PageState, to: PageState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    /// Whether the engine of this page is parked in a pause.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.parked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn parked(&self) -> Option<Pause> {
        self.parked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn park(&self, pause: Option<Pause>) {
        *self.parked.lock().unwrap_or_else(PoisonError::into_inner) = pause;
    }

    /// Records where the engine of this page is paused.
    pub(crate) fn park_at(&self, info: BreakInfo, frames: Vec<CallFrame>) {
        self.park(Some(Pause { info, frames }));
    }

    /// Whether the client can receive a pause right now.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self.state(), PageState::Connected | PageState::Paused)
    }

    /// Stops the page without ever blocking.
    ///
    /// The engine side always gets a flow command so a paused thread makes
    /// progress: `Abort` for [`StopReason::Abort`], `Continue` otherwise. The
    /// page loop gets a `Stop`/`Abort` message.
    pub fn stop(&self, reason: StopReason) {
        let (engine, page) = match reason {
            StopReason::Closed | StopReason::Detached => (EngineCommand::Continue, Message::Stop),
            StopReason::Abort => (EngineCommand::Abort, Message::Abort),
        };
        self.park(None);
        self.set_state(PageState::Stopped);
        push_urgent(&self.outbound, Message::SendEngineCommand(engine));
        push_urgent(&self.inbound, page);
    }

    /// Takes the page loop off its socket while keeping the engine paused.
    ///
    /// Returns `false` when no loop is attached, in which case nothing is
    /// sent. The loop marks the page `Stopped` once it has let go, so a new
    /// socket can attach and replay the pause.
    pub fn detach(&self) -> bool {
        if self.state() == PageState::Stopped {
            return false;
        }
        push_urgent(&self.inbound, Message::Detach);
        true
    }
}

/// Puts `message` without blocking, discarding stale entries if needed.
fn push_urgent(queue: &BoundedQueue<Message>, message: Message) {
    if let Err(QueueError::Full) = queue.try_put(message.clone()) {
        queue.reset();
        if let Err(err) = queue.try_put(message) {
            warn!("urgent page message lost: {err}");
        }
    }
}

/// Everything the pilot hands over when a socket attaches to a page.
#[derive(Debug, Clone)]
pub struct PageAttachment {
    /// Page number.
    pub number: u32,
    /// Context the page is bound to.
    pub context: ContextId,
    /// Shared FIFOs and state.
    pub handle: PageHandle,
    /// The context's trace sink.
    pub trace: Arc<BoundedQueue<String>>,
    /// Read access to the breakpoint set.
    pub breakpoints: SharedBreakpoints,
}

/// Timing knobs of a page loop.
#[derive(Debug, Clone, Copy)]
pub struct PageOptions {
    /// Socket read timeout per loop turn.
    pub poll_interval: Duration,
    /// Wait for engine replies to lookups and evaluations.
    pub reply_timeout: Duration,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            reply_timeout: Duration::from_secs(5),
        }
    }
}

/// A paused engine location together with its call stack.
#[derive(Debug, Clone)]
struct Pause {
    info: BreakInfo,
    frames: Vec<CallFrame>,
}

/// The per-page protocol dispatcher.
pub struct Page<T: Transport> {
    attachment: PageAttachment,
    transport: T,
    pilot: PilotHandle,
    options: PageOptions,
    scripts: ScriptTable,
    pause: Option<Pause>,
    deferred: VecDeque<Message>,
    debugger_enabled: bool,
    runtime_enabled: bool,
}

impl<T: Transport> fmt::Debug for Page<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("number", &self.attachment.number)
            .field("context", &self.attachment.context)
            .field("state", &self.attachment.handle.state())
            .finish_non_exhaustive()
    }
}

enum Flow {
    Running,
    Exit(StopReason),
}

impl<T: Transport> Page<T> {
    /// Creates a page loop over `transport`.
    pub fn new(
        attachment: PageAttachment,
        transport: T,
        pilot: PilotHandle,
        options: PageOptions,
    ) -> Self {
        let pause = attachment.handle.parked();
        let mut scripts = ScriptTable::new();
        if let Some(Pause { info, frames }) = &pause {
            match &info.source {
                Some(source) => {
                    scripts.set_source(&info.url, source.clone());
                }
                None => {
                    scripts.intern(&info.url);
                }
            }
            for frame in frames {
                scripts.intern(&frame.url);
            }
        }
        Self {
            attachment,
            transport,
            pilot,
            options,
            scripts,
            pause,
            deferred: VecDeque::new(),
            debugger_enabled: false,
            runtime_enabled: false,
        }
    }

    fn context_u64(&self) -> u64 {
        self.attachment.context.as_u64()
    }

    fn handle(&self) -> &PageHandle {
        &self.attachment.handle
    }

    /// Runs until the socket closes or the pilot stops the page.
    ///
    /// On exit the engine side is always unblocked and the pilot is told the
    /// page is gone.
    pub fn run(mut self) -> StopReason {
        info!(
            "page {} attached to context {}",
            self.attachment.number, self.attachment.context
        );
        let reason = loop {
            match self.turn() {
                Ok(Flow::Running) => {}
                Ok(Flow::Exit(reason)) => break reason,
                Err(err) => {
                    warn!("page {} transport failed: {err}", self.attachment.number);
                    break StopReason::Closed;
                }
            }
        };

        if reason == StopReason::Detached {
            self.transport.close();
            self.handle().set_state(PageState::Stopped);
        } else {
            self.handle().stop(reason);
            self.transport.close();
            if let Err(err) = self
                .pilot
                .page_closed(self.attachment.number, self.handle())
            {
                debug!("page {} close not reported: {err}", self.attachment.number);
            }
        }
        info!("page {} stopped ({reason:?})", self.attachment.number);
        reason
    }

    fn turn(&mut self) -> BridgeResult<Flow> {
        if let Some(text) = self.transport.read_frame(self.options.poll_interval)? {
            if let Flow::Exit(reason) = self.handle_frame(&text)? {
                return Ok(Flow::Exit(reason));
            }
        }
        while let Some(message) = self.next_inbound() {
            if let Flow::Exit(reason) = self.handle_inbound(message)? {
                return Ok(Flow::Exit(reason));
            }
        }
        self.drain_trace()?;
        Ok(Flow::Running)
    }

    fn next_inbound(&mut self) -> Option<Message> {
        self.deferred
            .pop_front()
            .or_else(|| self.handle().inbound().try_get())
    }

    fn send(&mut self, frame: &str) -> BridgeResult<()> {
        debug!("page {} <- {frame}", self.attachment.number);
        self.transport.write_frame(frame)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Engine side
    // ------------------------------------------------------------------

    fn handle_inbound(&mut self, message: Message) -> BridgeResult<Flow> {
        match message {
            Message::BreakpointReached(info) => self.on_breakpoint(info)?,
            Message::SetSource { url, source } => {
                self.scripts.set_source(&url, source);
                if self.debugger_enabled {
                    self.announce_scripts()?;
                }
            }
            Message::Stop => return Ok(Flow::Exit(StopReason::Closed)),
            Message::Abort => return Ok(Flow::Exit(StopReason::Abort)),
            Message::Detach => return Ok(Flow::Exit(StopReason::Detached)),
            Message::CallStack { ticket, .. }
            | Message::Lookup { ticket, .. }
            | Message::Eval { ticket, .. } => {
                debug!("page {} dropped stale reply {ticket}", self.attachment.number);
            }
            Message::SendEngineCommand(_) | Message::NoMessage => {}
        }
        Ok(Flow::Running)
    }

    fn on_breakpoint(&mut self, info: BreakInfo) -> BridgeResult<()> {
        self.handle().set_state(PageState::Paused);
        if let Some(source) = &info.source {
            self.scripts.set_source(&info.url, source.clone());
        } else {
            self.scripts.intern(&info.url);
        }

        let ticket = self.ticket();
        let frames = match self.ask_engine(EngineCommand::GetCallStack { ticket }, ticket) {
            Ok(Message::CallStack { frames, .. }) => frames,
            Ok(_) | Err(BridgeError::Timeout) => Vec::new(),
            Err(err) => {
                debug!("page {} pause dropped: {err}", self.attachment.number);
                return Ok(());
            }
        };
        for frame in &frames {
            self.scripts.intern(&frame.url);
        }

        info!(
            "context {} paused at {}:{}",
            self.attachment.context, info.url, info.line
        );
        self.handle().park_at(info.clone(), frames.clone());
        self.pause = Some(Pause { info, frames });
        if self.debugger_enabled {
            self.announce_scripts()?;
            self.send_paused()?;
        }
        Ok(())
    }

    fn send_paused(&mut self) -> BridgeResult<()> {
        let Some(pause) = &self.pause else {
            return Ok(());
        };
        let frame = codec::encode_breakpoint_reached(
            &pause.info,
            &pause.frames,
            &self.scripts,
            self.context_u64(),
        )?;
        self.send(&frame)
    }

    fn announce_scripts(&mut self) -> BridgeResult<()> {
        let pending: Vec<_> = self
            .scripts
            .iter()
            .filter(|script| !script.announced && script.source.is_some())
            .map(|script| script.url.clone())
            .collect();
        for url in pending {
            if !self.scripts.mark_announced(&url) {
                continue;
            }
            let Some(script) = self.scripts.by_url(&url) else {
                continue;
            };
            let (id, source) = (script.id, script.source.clone().unwrap_or_default());
            let frame = codec::encode_script_parsed(id, &url, &source, self.context_u64())?;
            self.send(&frame)?;

            for line in self.attachment.breakpoints.lines_of(&url) {
                let frame = codec::encode_breakpoint_resolved(id, &url, line, 0)?;
                self.send(&frame)?;
            }
        }
        Ok(())
    }

    fn drain_trace(&mut self) -> BridgeResult<()> {
        while let Some(text) = self.attachment.trace.try_get() {
            if !self.runtime_enabled {
                continue;
            }
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0.0, |d| d.as_secs_f64() * 1000.0);
            let frame = codec::encode_console(&text, self.context_u64(), now)?;
            self.send(&frame)?;
        }
        Ok(())
    }

    /// Tickets come from the shared page so a reply addressed to an earlier
    /// loop on the same page never matches a newer request.
    fn ticket(&self) -> Ticket {
        self.handle().tickets.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Pushes `command` to the engine and waits for the reply tagged `ticket`.
    ///
    /// Other messages arriving meanwhile are deferred, in order, for the main
    /// loop. A stop request ends the wait with `ConnectionInterrupted`.
    fn ask_engine(&mut self, command: EngineCommand, ticket: Ticket) -> BridgeResult<Message> {
        self.handle()
            .outbound()
            .put(Message::SendEngineCommand(command))?;
        let deadline = Instant::now() + self.options.reply_timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                warn!("page {} gave up waiting for reply {ticket}", self.attachment.number);
                return Err(BridgeError::Timeout);
            }
            let message = match self.handle().inbound().get(left) {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(err) => return Err(err.into()),
            };
            match message.ticket() {
                Some(got) if got == ticket => return Ok(message),
                Some(stale) => debug!("page {} dropped stale reply {stale}", self.attachment.number),
                None => {
                    let stopping =
                        matches!(message, Message::Stop | Message::Abort | Message::Detach);
                    self.deferred.push_back(message);
                    if stopping {
                        return Err(BridgeError::ConnectionInterrupted);
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Client side
    // ------------------------------------------------------------------

    fn handle_frame(&mut self, text: &str) -> BridgeResult<Flow> {
        debug!("page {} -> {text}", self.attachment.number);
        match codec::decode_command(text) {
            Ok(command) => self.dispatch(command),
            Err(DecodeError { id, code, error }) => {
                warn!("page {}: {error}", self.attachment.number);
                let id = id.unwrap_or_else(RequestId::missing);
                let frame = codec::encode_error(&id, code, &error.to_string())?;
                self.send(&frame)?;
                Ok(Flow::Running)
            }
        }
    }

    fn reply_error(&mut self, id: &RequestId, code: i32, error: &BridgeError) -> BridgeResult<()> {
        warn!("page {}: {error}", self.attachment.number);
        let frame = codec::encode_error(id, code, &error.to_string())?;
        self.send(&frame)
    }

    fn ack(&mut self, id: &RequestId) -> BridgeResult<()> {
        let frame = codec::encode_ack(id)?;
        self.send(&frame)
    }

    fn dispatch(&mut self, Command { id, method, verb }: Command) -> BridgeResult<Flow> {
        match verb {
            Verb::Acknowledge => self.ack(&id)?,
            Verb::Capability(answer) => {
                let frame = codec::encode_response(&id, wire::BoolResult { result: answer })?;
                self.send(&frame)?;
            }
            Verb::InspectorEnable => {
                self.ack(&id)?;
                self.client_ready()?;
            }
            Verb::DebuggerEnable => {
                self.ack(&id)?;
                self.debugger_enabled = true;
                self.client_ready()?;
                self.announce_scripts()?;
                self.send_paused()?;
            }
            Verb::RuntimeEnable => {
                self.ack(&id)?;
                self.runtime_enabled = true;
                let name = format!("context {}", self.attachment.context);
                let frame = codec::encode_execution_context_created(self.context_u64(), &name)?;
                self.send(&frame)?;
            }
            Verb::SetBreakpointByUrl { url, line, column } => {
                self.set_breakpoint(&id, &url, line, column)?;
            }
            Verb::RemoveBreakpoint { url, line } => match self.pilot.remove_breakpoint(&url, line) {
                Ok(_) => self.ack(&id)?,
                Err(err) => self.reply_error(&id, SERVER_ERROR, &err)?,
            },
            Verb::Pause => {
                if self.pause.is_none() {
                    if let Err(err) = self.pilot.request_pause(self.attachment.context) {
                        return self.reply_error(&id, SERVER_ERROR, &err).map(|()| Flow::Running);
                    }
                }
                self.ack(&id)?;
            }
            Verb::Resume => self.resume(&id, EngineCommand::Continue)?,
            Verb::StepInto => self.resume(&id, EngineCommand::StepInto)?,
            Verb::StepOver => self.resume(&id, EngineCommand::StepOver)?,
            Verb::StepOut => self.resume(&id, EngineCommand::StepOut)?,
            Verb::GetScriptSource { script_id } => {
                match self
                    .scripts
                    .by_id(&script_id)
                    .and_then(|script| script.source.clone())
                {
                    Some(script_source) => {
                        let frame = codec::encode_response(
                            &id,
                            wire::GetScriptSourceResult { script_source },
                        )?;
                        self.send(&frame)?;
                    }
                    None => {
                        let err = BridgeError::invalid(format!("no source for script {script_id}"));
                        self.reply_error(&id, INVALID_PARAMS, &err)?;
                    }
                }
            }
            Verb::GetProperties { target } => self.lookup(&id, target)?,
            Verb::EvaluateOnCallFrame { frame, expression } => {
                self.evaluate(&id, frame, expression)?;
            }
            Verb::Evaluate { expression } => self.evaluate(&id, 0, expression)?,
            Verb::Stub(stub) => {
                let frame_id = self.attachment.context.to_string();
                let url = self
                    .pause
                    .as_ref()
                    .map(|pause| pause.info.url.clone())
                    .or_else(|| self.scripts.iter().next().map(|script| script.url.clone()))
                    .unwrap_or_default();
                let result = stub_result(
                    &stub,
                    StubContext {
                        frame_id: &frame_id,
                        url: &url,
                        scripts: &self.scripts,
                    },
                );
                let frame = codec::encode_response(&id, result)?;
                self.send(&frame)?;
            }
        }
        debug!("page {} handled {method}", self.attachment.number);
        Ok(Flow::Running)
    }

    /// First enable from the client: the page becomes live and the engine
    /// thread waiting for it is released.
    fn client_ready(&mut self) -> BridgeResult<()> {
        if self
            .handle()
            .transition(PageState::Starting, PageState::Connected)
        {
            info!("page {} connected", self.attachment.number);
            let handle = Arc::clone(self.handle());
            self.pilot.page_ready(self.attachment.number, &handle)?;
            if self.pause.is_some() {
                handle.set_state(PageState::Paused);
            }
        }
        Ok(())
    }

    fn set_breakpoint(&mut self, id: &RequestId, url: &str, line: u32, column: u32) -> BridgeResult<()> {
        if let Err(err) = self.pilot.set_breakpoint(url, line) {
            return self.reply_error(id, SERVER_ERROR, &err);
        }
        let script_id = self.scripts.intern(url);
        let resolved = self
            .scripts
            .by_url(url)
            .is_some_and(|script| script.source.is_some());
        let locations = if resolved {
            vec![wire::Location {
                script_id: script_id.to_string(),
                line_number: line.saturating_sub(1),
                column_number: column,
            }]
        } else {
            Vec::new()
        };
        let frame = codec::encode_response(
            id,
            wire::SetBreakpointByUrlResult {
                breakpoint_id: codec::breakpoint_id(url, line, column),
                locations,
            },
        )?;
        self.send(&frame)
    }

    fn resume(&mut self, id: &RequestId, command: EngineCommand) -> BridgeResult<()> {
        if self.pause.take().is_none() {
            debug!("page {} not paused; {command:?} ignored", self.attachment.number);
            return self.ack(id);
        }
        self.handle().park(None);
        self.handle()
            .transition(PageState::Paused, PageState::Connected);
        self.handle()
            .outbound()
            .put(Message::SendEngineCommand(command))?;
        self.ack(id)?;
        let frame = codec::encode_resumed()?;
        self.send(&frame)
    }

    fn lookup(&mut self, id: &RequestId, target: LookupTarget) -> BridgeResult<()> {
        if self.pause.is_none() {
            return self.reply_error(id, SERVER_ERROR, &BridgeError::invalid("execution is not paused"));
        }
        let ticket = self.ticket();
        match self.ask_engine(EngineCommand::Lookup { ticket, target }, ticket) {
            Ok(Message::Lookup { properties, .. }) => {
                let frame = codec::encode_lookup_result(id, &properties)?;
                self.send(&frame)
            }
            Ok(_) => Ok(()),
            Err(err) => self.reply_error(id, SERVER_ERROR, &err),
        }
    }

    fn evaluate(&mut self, id: &RequestId, frame: u32, expression: String) -> BridgeResult<()> {
        if self.pause.is_none() {
            return self.reply_error(id, SERVER_ERROR, &BridgeError::invalid("execution is not paused"));
        }
        let ticket = self.ticket();
        let command = EngineCommand::Evaluate {
            ticket,
            frame,
            expression,
        };
        match self.ask_engine(command, ticket) {
            Ok(Message::Eval { result, .. }) => {
                let frame = codec::encode_eval_result(id, &result)?;
                self.send(&frame)
            }
            Ok(_) => Ok(()),
            Err(err) => self.reply_error(id, SERVER_ERROR, &err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_unblocks_engine_with_continue() {
        let page = PageShared::new(1, 2);
        page.set_state(PageState::Paused);
        page.stop(StopReason::Closed);
        assert_eq!(page.state(), PageState::Stopped);
        assert_eq!(
            page.outbound().try_get(),
            Some(Message::SendEngineCommand(EngineCommand::Continue))
        );
        assert_eq!(page.inbound().try_get(), Some(Message::Stop));
    }

    #[test]
    fn abort_reaches_engine_even_when_outbound_is_full() {
        let page = PageShared::new(1, 1);
        page.outbound()
            .put(Message::SendEngineCommand(EngineCommand::StepOver))
            .unwrap();
        page.stop(StopReason::Abort);
        assert_eq!(
            page.outbound().try_get(),
            Some(Message::SendEngineCommand(EngineCommand::Abort))
        );
        assert_eq!(page.inbound().try_get(), Some(Message::Abort));
    }

    #[test]
    fn detach_keeps_the_engine_parked() {
        let page = PageShared::new(2, 2);
        page.set_state(PageState::Paused);
        page.park_at(BreakInfo::breakpoint("a.js", 4), Vec::new());
        assert!(page.detach());
        assert_eq!(page.inbound().try_get(), Some(Message::Detach));
        assert_eq!(page.outbound().try_get(), None);
        assert!(page.is_paused());
        assert_eq!(page.parked().map(|pause| pause.info.line), Some(4));
    }

    #[test]
    fn detach_without_a_loop_sends_nothing() {
        let page = PageShared::new(2, 2);
        page.park_at(BreakInfo::breakpoint("a.js", 4), Vec::new());
        assert!(!page.detach());
        assert_eq!(page.inbound().try_get(), None);
    }

    #[test]
    fn stop_forgets_the_pause() {
        let page = PageShared::new(2, 2);
        page.set_state(PageState::Paused);
        page.park_at(BreakInfo::breakpoint("a.js", 4), Vec::new());
        page.stop(StopReason::Detached);
        assert!(!page.is_paused());
        assert_eq!(
            page.outbound().try_get(),
            Some(Message::SendEngineCommand(EngineCommand::Continue))
        );
    }

    #[test]
    fn transition_only_from_expected_state() {
        let page = PageShared::new(3, 2);
        assert!(!page.transition(PageState::Starting, PageState::Connected));
        page.set_state(PageState::Starting);
        assert!(page.transition(PageState::Starting, PageState::Connected));
        assert!(page.is_live());
    }
}

//! The debug pilot
//!
//! A dedicated thread owning the context registry, the breakpoint writes and
//! the session state machine. Every caller, whatever thread it runs on, sends
//! a typed request down one channel together with a reply channel, so the
//! registry is only ever touched by the pilot thread.
//!
//! The pilot never blocks on I/O or on a full queue. When a caller needs to
//! hand a message to a page it gets the page handle back and performs the
//! possibly blocking put itself.

use crate::auth::{Auth, Credentials};
use crate::breakpoints::SharedBreakpoints;
use crate::codec::handshake;
use crate::error::{BridgeError, BridgeResult};
use crate::message::BreakInfo;
use crate::page::{PageAttachment, PageHandle, PageShared, PageState, StopReason};
use crate::queue::{BoundedQueue, OverflowPolicy};
use crate::registry::{ContextId, ContextRegistry, Release};
use log::{debug, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

/// Capacity of the session outbox.
const SESSION_OUTBOX_CAPACITY: usize = 256;

/// State of the single remote client session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    /// The bridge is not running.
    #[default]
    Stopped,
    /// Armed, no client attached.
    Started,
    /// A socket is open, waiting for `connect`.
    Connecting,
    /// A client is attached.
    Connected,
    /// The client is going away.
    Disconnecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::Started => "started",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        })
    }
}

/// Point-in-time view of the pilot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Session state.
    pub state: SessionState,
    /// Live contexts.
    pub contexts: usize,
    /// Contexts with an engine thread parked for a page.
    pub waiting: usize,
    /// Bound pages.
    pub pages: usize,
}

/// Outgoing frames of the session channel, drained by its network thread.
#[derive(Debug)]
pub struct SessionLink {
    id: u64,
    outbox: BoundedQueue<String>,
    closed: AtomicBool,
}

impl SessionLink {
    fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            outbox: BoundedQueue::new(SESSION_OUTBOX_CAPACITY, OverflowPolicy::FailFast),
            closed: AtomicBool::new(false),
        })
    }

    /// Session number.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next queued frame, if any.
    pub fn next_frame(&self) -> Option<String> {
        self.outbox.try_get()
    }

    /// Whether the pilot dropped the session.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Result of a `connect` handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connected {
    /// Solution name to echo.
    pub solution: String,
    /// Whether credentials were required.
    pub needs_authentication: bool,
}

/// What a pausing engine thread should do next.
#[derive(Debug)]
pub enum Offer {
    /// A live page is bound: put the pause onto its inbound FIFO.
    Page(PageHandle),
    /// No page yet: block on the receiver until one is ready or the context
    /// is aborted.
    Wait(Receiver<Release>),
}

/// Settings of a pilot.
#[derive(Clone)]
pub struct PilotOptions {
    /// Page slots.
    pub max_pages: usize,
    /// Capacity of page FIFOs.
    pub queue_capacity: usize,
    /// Capacity of trace queues.
    pub trace_capacity: usize,
    /// Name echoed in the `connect` reply.
    pub solution: String,
    /// Authenticator for `connect`.
    pub auth: Arc<dyn Auth>,
}

impl fmt::Debug for PilotOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PilotOptions")
            .field("max_pages", &self.max_pages)
            .field("queue_capacity", &self.queue_capacity)
            .field("trace_capacity", &self.trace_capacity)
            .field("solution", &self.solution)
            .finish_non_exhaustive()
    }
}

impl Default for PilotOptions {
    fn default() -> Self {
        Self {
            max_pages: crate::registry::K_MAX_PAGES,
            queue_capacity: crate::queue::DEFAULT_CAPACITY,
            trace_capacity: 32,
            solution: "default".to_owned(),
            auth: Arc::new(crate::auth::AllowAll),
        }
    }
}

type Reply<T> = Sender<BridgeResult<T>>;

/// Sends `result` back to the caller, which may have given up already.
fn answer<T>(reply: &Reply<T>, result: BridgeResult<T>) {
    if reply.send(result).is_err() {
        debug!("pilot reply dropped: caller went away");
    }
}

/// Requests processed by the pilot thread
enum Request {
    Start(Reply<()>),
    Stop(Reply<()>),
    AbortAll(Reply<usize>),
    NewContext(Reply<ContextId>),
    RemoveContext(ContextId, Reply<()>),
    BreakpointReached(ContextId, BreakInfo, Reply<Offer>),
    PageOf(ContextId, Reply<Option<PageHandle>>),
    TraceSink(ContextId, Reply<Arc<BoundedQueue<String>>>),
    RequestPause(ContextId, Reply<()>),
    TakePauseRequest(ContextId, Reply<bool>),
    SetBreakpoint(String, u32, Reply<bool>),
    RemoveBreakpoint(String, u32, Reply<bool>),
    TreatNewClient(Reply<Arc<SessionLink>>),
    Connect(u64, Credentials, Reply<Connected>),
    GetUrl(u64, ContextId, Reply<u32>),
    GetContexts(u64, Reply<usize>),
    EndSession(u64, bool, Reply<()>),
    AttachPage(u32, Reply<PageAttachment>),
    PageReady(u32, PageHandle, Reply<()>),
    PageClosed(u32, PageHandle, Reply<()>),
    Status(Reply<Status>),
    Terminate,
}

/// Cloneable handle used to talk to the pilot thread.
#[derive(Debug, Clone)]
pub struct PilotHandle {
    tx: Sender<Request>,
}

/// Owns the pilot thread; dropping it stops the thread.
#[derive(Debug)]
pub struct Pilot {
    handle: PilotHandle,
    breakpoints: SharedBreakpoints,
    thread: Option<thread::JoinHandle<()>>,
}

impl Pilot {
    /// Spawns the pilot thread. The session starts in
    /// [`SessionState::Stopped`].
    ///
    /// # Errors
    ///
    /// Fails if the thread cannot be spawned.
    pub fn spawn(options: PilotOptions) -> BridgeResult<Self> {
        let (tx, rx) = mpsc::channel();
        let breakpoints = SharedBreakpoints::new();
        let mut actor = Actor::new(options, breakpoints.clone());
        let thread = thread::Builder::new()
            .name("cdp-pilot".into())
            .spawn(move || actor.run(&rx))?;
        Ok(Self {
            handle: PilotHandle { tx },
            breakpoints,
            thread: Some(thread),
        })
    }

    /// A handle for callers on other threads.
    #[must_use]
    pub fn handle(&self) -> PilotHandle {
        self.handle.clone()
    }

    /// The breakpoint set, for lock-shared reads.
    #[must_use]
    pub fn breakpoints(&self) -> SharedBreakpoints {
        self.breakpoints.clone()
    }
}

impl Drop for Pilot {
    fn drop(&mut self) {
        if self.handle.tx.send(Request::Terminate).is_err() {
            debug!("pilot already terminated");
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("pilot thread panicked");
            }
        }
    }
}

impl PilotHandle {
    fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Request) -> BridgeResult<T> {
        let (reply, result) = mpsc::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| BridgeError::PilotGone)?;
        result.recv().map_err(|_| BridgeError::PilotGone)?
    }

    /// Arms the bridge: `Stopped` → `Started`.
    ///
    /// # Errors
    ///
    /// Fails only if the pilot is gone.
    pub fn start(&self) -> BridgeResult<()> {
        self.call(Request::Start)
    }

    /// Aborts every context and moves to `Stopped`.
    ///
    /// # Errors
    ///
    /// Fails only if the pilot is gone.
    pub fn stop(&self) -> BridgeResult<()> {
        self.call(Request::Stop)
    }

    /// Force-unblocks every context; returns how many were aborted.
    ///
    /// # Errors
    ///
    /// Fails only if the pilot is gone.
    pub fn abort_all(&self) -> BridgeResult<usize> {
        self.call(Request::AbortAll)
    }

    /// Registers a new execution context.
    ///
    /// # Errors
    ///
    /// Fails only if the pilot is gone.
    pub fn new_context(&self) -> BridgeResult<ContextId> {
        self.call(Request::NewContext)
    }

    /// Drops a context, unblocking anything waiting on it.
    ///
    /// # Errors
    ///
    /// Fails with [`BridgeError::UnknownContext`] for unknown ids.
    pub fn remove_context(&self, context: ContextId) -> BridgeResult<()> {
        self.call(|reply| Request::RemoveContext(context, reply))
    }

    /// Records a pause and tells the engine thread where to deliver it.
    ///
    /// # Errors
    ///
    /// Fails with [`BridgeError::NotStarted`] while stopped and with
    /// [`BridgeError::UnknownContext`] for unknown ids.
    pub fn breakpoint_reached(&self, context: ContextId, info: BreakInfo) -> BridgeResult<Offer> {
        self.call(|reply| Request::BreakpointReached(context, info, reply))
    }

    /// The page bound to `context`, if any.
    ///
    /// # Errors
    ///
    /// Fails with [`BridgeError::UnknownContext`] for unknown ids.
    pub fn page_of(&self, context: ContextId) -> BridgeResult<Option<PageHandle>> {
        self.call(|reply| Request::PageOf(context, reply))
    }

    /// The trace queue of `context`.
    ///
    /// # Errors
    ///
    /// Fails with [`BridgeError::UnknownContext`] for unknown ids.
    pub fn trace_sink(&self, context: ContextId) -> BridgeResult<Arc<BoundedQueue<String>>> {
        self.call(|reply| Request::TraceSink(context, reply))
    }

    /// Asks the engine running `context` to pause at the next opportunity.
    ///
    /// # Errors
    ///
    /// Fails with [`BridgeError::UnknownContext`] for unknown ids.
    pub fn request_pause(&self, context: ContextId) -> BridgeResult<()> {
        self.call(|reply| Request::RequestPause(context, reply))
    }

    /// Consumes a pending pause request.
    ///
    /// # Errors
    ///
    /// Fails with [`BridgeError::UnknownContext`] for unknown ids.
    pub fn take_pause_request(&self, context: ContextId) -> BridgeResult<bool> {
        self.call(|reply| Request::TakePauseRequest(context, reply))
    }

    /// Adds a breakpoint; returns whether it was new.
    ///
    /// # Errors
    ///
    /// Fails only if the pilot is gone.
    pub fn set_breakpoint(&self, url: &str, line: u32) -> BridgeResult<bool> {
        self.call(|reply| Request::SetBreakpoint(url.to_owned(), line, reply))
    }

    /// Removes a breakpoint; returns whether it existed.
    ///
    /// # Errors
    ///
    /// Fails only if the pilot is gone.
    pub fn remove_breakpoint(&self, url: &str, line: u32) -> BridgeResult<bool> {
        self.call(|reply| Request::RemoveBreakpoint(url.to_owned(), line, reply))
    }

    /// A session socket was accepted: `Started` → `Connecting`.
    ///
    /// # Errors
    ///
    /// Fails with [`BridgeError::Busy`] while another session exists and with
    /// [`BridgeError::NotStarted`] while stopped.
    pub fn treat_new_client(&self) -> BridgeResult<Arc<SessionLink>> {
        self.call(Request::TreatNewClient)
    }

    /// Handles `connect`: `Connecting` → `Connected`, re-offering waiting
    /// contexts.
    ///
    /// # Errors
    ///
    /// Fails with [`BridgeError::Unauthorized`] on bad credentials, in which
    /// case the session is dropped and the state returns to `Started`.
    pub fn connect(&self, session: u64, credentials: Credentials) -> BridgeResult<Connected> {
        self.call(|reply| Request::Connect(session, credentials, reply))
    }

    /// Handles `getURL`: binds `context` to a page and returns its number.
    ///
    /// # Errors
    ///
    /// Fails with [`BridgeError::NotConnected`], [`BridgeError::UnknownContext`]
    /// or [`BridgeError::NoFreePage`].
    pub fn get_url(&self, session: u64, context: ContextId) -> BridgeResult<u32> {
        self.call(|reply| Request::GetUrl(session, context, reply))
    }

    /// Handles `getContexts`; returns how many contexts were re-announced.
    ///
    /// # Errors
    ///
    /// Fails with [`BridgeError::NotConnected`] for a stale session.
    pub fn get_contexts(&self, session: u64) -> BridgeResult<usize> {
        self.call(|reply| Request::GetContexts(session, reply))
    }

    /// Ends the session. With `abort`, every context is aborted; otherwise
    /// paused pages are kept and re-offered to the next client.
    ///
    /// # Errors
    ///
    /// Fails only if the pilot is gone.
    pub fn end_session(&self, session: u64, abort: bool) -> BridgeResult<()> {
        self.call(|reply| Request::EndSession(session, abort, reply))
    }

    /// Hands a page socket to page `number`: `Stopped` → `Starting`.
    ///
    /// # Errors
    ///
    /// Fails with [`BridgeError::UnknownPage`] if the slot is empty and with
    /// [`BridgeError::Busy`] if a socket is already attached.
    pub fn attach_page(&self, number: u32) -> BridgeResult<PageAttachment> {
        self.call(|reply| Request::AttachPage(number, reply))
    }

    /// The page client finished its handshake; releases the waiting engine.
    ///
    /// # Errors
    ///
    /// Fails only if the pilot is gone.
    pub fn page_ready(&self, number: u32, handle: &PageHandle) -> BridgeResult<()> {
        self.call(|reply| Request::PageReady(number, Arc::clone(handle), reply))
    }

    /// The page loop exited; frees its slot.
    ///
    /// # Errors
    ///
    /// Fails only if the pilot is gone.
    pub fn page_closed(&self, number: u32, handle: &PageHandle) -> BridgeResult<()> {
        self.call(|reply| Request::PageClosed(number, Arc::clone(handle), reply))
    }

    /// Current status.
    ///
    /// # Errors
    ///
    /// Fails only if the pilot is gone.
    pub fn status(&self) -> BridgeResult<Status> {
        self.call(Request::Status)
    }
}

/// The state owned by the pilot thread.
struct Actor {
    state: SessionState,
    registry: ContextRegistry,
    breakpoints: SharedBreakpoints,
    session: Option<Arc<SessionLink>>,
    next_session: u64,
    options: PilotOptions,
}

impl Actor {
    fn new(options: PilotOptions, breakpoints: SharedBreakpoints) -> Self {
        Self {
            state: SessionState::Stopped,
            registry: ContextRegistry::new(options.max_pages, options.trace_capacity),
            breakpoints,
            session: None,
            next_session: 0,
            options,
        }
    }

    fn run(&mut self, rx: &Receiver<Request>) {
        debug!("pilot running");
        while let Ok(request) = rx.recv() {
            if !self.handle(request) {
                break;
            }
        }
        self.stop();
        debug!("pilot terminated");
    }

    fn handle(&mut self, request: Request) -> bool {
        match request {
            Request::Start(reply) => {
                if self.state == SessionState::Stopped {
                    self.set_state(SessionState::Started);
                }
                answer(&reply, Ok(()));
            }
            Request::Stop(reply) => {
                self.stop();
                answer(&reply, Ok(()));
            }
            Request::AbortAll(reply) => {
                answer(&reply, Ok(self.abort_all()));
            }
            Request::NewContext(reply) => {
                let id = self.registry.insert();
                debug!("context {id} created");
                answer(&reply, Ok(id));
            }
            Request::RemoveContext(id, reply) => {
                answer(&reply, self.remove_context(id));
            }
            Request::BreakpointReached(id, info, reply) => {
                answer(&reply, self.breakpoint_reached(id, info));
            }
            Request::PageOf(id, reply) => {
                let result = match self.registry.get(id) {
                    Some(_) => Ok(self.registry.page_of(id).cloned()),
                    None => Err(BridgeError::UnknownContext(id)),
                };
                answer(&reply, result);
            }
            Request::TraceSink(id, reply) => {
                let result = self
                    .registry
                    .require(id)
                    .map(|descriptor| Arc::clone(descriptor.trace()));
                answer(&reply, result);
            }
            Request::RequestPause(id, reply) => {
                let result = self.registry.require(id).map(|descriptor| {
                    descriptor.request_pause();
                });
                answer(&reply, result);
            }
            Request::TakePauseRequest(id, reply) => {
                let result = self
                    .registry
                    .require(id)
                    .map(|descriptor| descriptor.take_pause_request());
                answer(&reply, result);
            }
            Request::SetBreakpoint(url, line, reply) => {
                debug!("breakpoint set at {url}:{line}");
                answer(&reply, Ok(self.breakpoints.update(|set| set.insert(&url, line))));
            }
            Request::RemoveBreakpoint(url, line, reply) => {
                debug!("breakpoint removed at {url}:{line}");
                answer(&reply, Ok(self.breakpoints.update(|set| set.remove(&url, line))));
            }
            Request::TreatNewClient(reply) => {
                answer(&reply, self.treat_new_client());
            }
            Request::Connect(session, credentials, reply) => {
                answer(&reply, self.connect(session, &credentials));
            }
            Request::GetUrl(session, id, reply) => {
                answer(&reply, self.get_url(session, id));
            }
            Request::GetContexts(session, reply) => {
                let result = self.require_session(session).map(|()| self.offer_waiting());
                answer(&reply, result);
            }
            Request::EndSession(session, abort, reply) => {
                if self.is_current(session) {
                    self.end_session(abort);
                }
                answer(&reply, Ok(()));
            }
            Request::AttachPage(number, reply) => {
                answer(&reply, self.attach_page(number));
            }
            Request::PageReady(number, handle, reply) => {
                self.page_ready(number, handle);
                answer(&reply, Ok(()));
            }
            Request::PageClosed(number, handle, reply) => {
                let current = self
                    .registry
                    .page(number)
                    .is_some_and(|slot| Arc::ptr_eq(&slot.handle, &handle));
                if current {
                    self.registry.release_page(number);
                    debug!("page {number} released");
                }
                answer(&reply, Ok(()));
            }
            Request::Status(reply) => {
                answer(&reply, Ok(Status {
                    state: self.state,
                    contexts: self.registry.len(),
                    waiting: self.registry.iter().filter(|d| d.is_waiting()).count(),
                    pages: self.registry.bound_pages().count(),
                }));
            }
            Request::Terminate => return false,
        }
        true
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            info!("session {} -> {state}", self.state);
            self.state = state;
        }
    }

    fn is_current(&self, session: u64) -> bool {
        self.session.as_ref().is_some_and(|link| link.id == session)
    }

    fn require_session(&self, session: u64) -> BridgeResult<()> {
        if self.state == SessionState::Connected && self.is_current(session) {
            Ok(())
        } else {
            Err(BridgeError::NotConnected)
        }
    }

    /// Queues a frame for the session socket. A full outbox means the client
    /// stopped reading; the session is torn down.
    fn notify(&mut self, frame: BridgeResult<String>) {
        if self.state != SessionState::Connected {
            return;
        }
        let Some(link) = &self.session else {
            return;
        };
        let pushed = frame
            .map_err(|err| warn!("session frame not encoded: {err}"))
            .and_then(|frame| {
                link.outbox
                    .put(frame)
                    .map_err(|err| warn!("session outbox: {err}"))
            });
        if pushed.is_err() {
            self.end_session(false);
        }
    }

    /// `SendContextToBrowser`: tells the client a context wants a page.
    fn offer(&mut self, id: ContextId) {
        let Some(descriptor) = self.registry.get_mut(id) else {
            return;
        };
        descriptor.set_updated(true);
        let frame = handshake::encode_update_context(id, descriptor.debug_info());
        self.notify(frame);
    }

    /// Re-offers every context waiting for a page or paused on one.
    fn offer_waiting(&mut self) -> usize {
        let ids: Vec<_> = self
            .registry
            .iter()
            .filter(|descriptor| {
                descriptor.is_waiting()
                    || self
                        .registry
                        .page_of(descriptor.id())
                        .is_some_and(|page| page.is_paused())
            })
            .map(|descriptor| descriptor.id())
            .collect();
        for id in &ids {
            self.offer(*id);
        }
        ids.len()
    }

    fn breakpoint_reached(&mut self, id: ContextId, info: BreakInfo) -> BridgeResult<Offer> {
        if self.state == SessionState::Stopped {
            return Err(BridgeError::NotStarted);
        }
        let descriptor = self.registry.require(id)?;
        descriptor.set_debug_info(info);

        if let Some(page) = self.registry.page_of(id) {
            if page.is_live() {
                return Ok(Offer::Page(Arc::clone(page)));
            }
        }

        // ContextUpdated: park the engine until a page is ready.
        let (release, wait) = mpsc::channel();
        self.registry.require(id)?.arm(release);
        if self.state == SessionState::Connected && self.registry.page_of(id).is_none() {
            self.offer(id);
        }
        debug!("context {id} waiting for a page");
        Ok(Offer::Wait(wait))
    }

    fn remove_context(&mut self, id: ContextId) -> BridgeResult<()> {
        let (mut descriptor, page) = self
            .registry
            .remove(id)
            .ok_or(BridgeError::UnknownContext(id))?;
        descriptor.release(Release::Aborted);
        if let Some(page) = page {
            page.stop(StopReason::Closed);
        }
        debug!("context {id} removed");
        self.notify(handshake::encode_remove_context(id));
        Ok(())
    }

    /// `AbortContexts`: unblocks and forgets every context.
    fn abort_all(&mut self) -> usize {
        let ids = self.registry.ids();
        for id in &ids {
            if let Some((mut descriptor, page)) = self.registry.remove(*id) {
                descriptor.release(Release::Aborted);
                if let Some(page) = page {
                    page.stop(StopReason::Abort);
                }
                self.notify(handshake::encode_hide_context(*id));
            }
        }
        if !ids.is_empty() {
            info!("aborted {} context(s)", ids.len());
        }
        ids.len()
    }

    fn stop(&mut self) {
        if let Some(link) = self.session.take() {
            link.close();
        }
        self.abort_all();
        self.set_state(SessionState::Stopped);
    }

    fn treat_new_client(&mut self) -> BridgeResult<Arc<SessionLink>> {
        match self.state {
            SessionState::Stopped => Err(BridgeError::NotStarted),
            SessionState::Started => {
                self.next_session += 1;
                let link = SessionLink::new(self.next_session);
                self.session = Some(Arc::clone(&link));
                self.set_state(SessionState::Connecting);
                Ok(link)
            }
            _ => Err(BridgeError::Busy),
        }
    }

    fn connect(&mut self, session: u64, credentials: &Credentials) -> BridgeResult<Connected> {
        if !self.is_current(session) {
            return Err(BridgeError::NotConnected);
        }
        if self.state == SessionState::Connected {
            return Err(BridgeError::Busy);
        }
        let auth = Arc::clone(&self.options.auth);
        if !auth.user_can_debug(credentials) {
            warn!("session {session}: client is not allowed to debug");
            if let Some(link) = self.session.take() {
                link.close();
            }
            self.set_state(SessionState::Started);
            return Err(BridgeError::Unauthorized);
        }

        self.set_state(SessionState::Connected);
        let offered = self.offer_waiting();
        if offered > 0 {
            info!("offered {offered} waiting context(s) to the new client");
        }
        Ok(Connected {
            solution: self.options.solution.clone(),
            needs_authentication: auth.requires_authentication(),
        })
    }

    fn get_url(&mut self, session: u64, id: ContextId) -> BridgeResult<u32> {
        self.require_session(session)?;
        let capacity = self.options.queue_capacity;
        let (number, _) = self
            .registry
            .assign_page(id, |number| PageShared::new(number, capacity))?;
        if let Some(descriptor) = self.registry.get_mut(id) {
            descriptor.set_updated(false);
        }
        debug!("context {id} bound to page {number}");
        Ok(number)
    }

    /// Disconnect handling: pages that are not paused are stopped with a
    /// synthetic `Continue`; paused pages are detached from their socket and
    /// stay bound, so the next client can attach and resume them.
    fn end_session(&mut self, abort: bool) {
        self.set_state(SessionState::Disconnecting);
        if abort {
            self.abort_all();
        } else {
            let (paused, idle): (Vec<_>, Vec<_>) = self
                .registry
                .bound_pages()
                .map(|(number, _, page)| (number, Arc::clone(page)))
                .partition(|(_, page)| page.is_paused());
            for (number, page) in paused {
                if page.detach() {
                    debug!("page {number} detached; its context stays paused");
                }
            }
            for (number, _) in idle {
                if let Some((owner, page)) = self.registry.release_page(number) {
                    debug!("page {number} of context {owner} dropped with the session");
                    page.stop(StopReason::Closed);
                }
            }
        }
        if let Some(link) = self.session.take() {
            link.close();
        }
        self.set_state(SessionState::Started);
    }

    fn attach_page(&mut self, number: u32) -> BridgeResult<PageAttachment> {
        let slot = self
            .registry
            .page(number)
            .ok_or(BridgeError::UnknownPage(number))?;
        if !slot.handle.transition(PageState::Stopped, PageState::Starting) {
            return Err(BridgeError::Busy);
        }
        let (context, handle) = (slot.owner, Arc::clone(&slot.handle));
        let trace = Arc::clone(self.registry.require(context)?.trace());
        Ok(PageAttachment {
            number,
            context,
            handle,
            trace,
            breakpoints: self.breakpoints.clone(),
        })
    }

    fn page_ready(&mut self, number: u32, handle: PageHandle) {
        let Some(slot) = self.registry.page(number) else {
            return;
        };
        if !Arc::ptr_eq(&slot.handle, &handle) {
            return;
        }
        let owner = slot.owner;
        if let Some(descriptor) = self.registry.get_mut(owner) {
            if descriptor.release(Release::Page(handle)) {
                debug!("context {owner} released onto page {number}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticCredentials;
    use crate::message::Message;
    use std::time::Duration;

    fn started() -> (Pilot, PilotHandle) {
        let pilot = Pilot::spawn(PilotOptions::default()).unwrap();
        let handle = pilot.handle();
        handle.start().unwrap();
        (pilot, handle)
    }

    fn drain(link: &SessionLink) -> Vec<String> {
        std::iter::from_fn(|| link.next_frame()).collect()
    }

    #[test]
    fn stopped_bridge_refuses_pauses() {
        let pilot = Pilot::spawn(PilotOptions::default()).unwrap();
        let handle = pilot.handle();
        let id = handle.new_context().unwrap();
        assert!(matches!(
            handle.breakpoint_reached(id, BreakInfo::breakpoint("a.js", 1)),
            Err(BridgeError::NotStarted)
        ));
    }

    #[test]
    fn get_url_binds_only_the_requested_context() {
        let (_pilot, handle) = started();
        let first = handle.new_context().unwrap();
        let second = handle.new_context().unwrap();
        let link = handle.treat_new_client().unwrap();
        handle.connect(link.id(), Credentials::default()).unwrap();

        let page = handle.get_url(link.id(), second).unwrap();
        assert_eq!(page, 1);
        assert!(handle.page_of(second).unwrap().is_some());
        assert!(handle.page_of(first).unwrap().is_none());
    }

    #[test]
    fn second_client_is_busy() {
        let (_pilot, handle) = started();
        let _link = handle.treat_new_client().unwrap();
        assert!(matches!(handle.treat_new_client(), Err(BridgeError::Busy)));
    }

    #[test]
    fn unauthorized_connect_changes_nothing() {
        let options = PilotOptions {
            auth: Arc::new(StaticCredentials::new("dev", "pw")),
            ..PilotOptions::default()
        };
        let pilot = Pilot::spawn(options).unwrap();
        let handle = pilot.handle();
        handle.start().unwrap();
        let id = handle.new_context().unwrap();
        let Offer::Wait(_wait) = handle
            .breakpoint_reached(id, BreakInfo::breakpoint("a.js", 1))
            .unwrap()
        else {
            panic!("expected to wait");
        };

        let link = handle.treat_new_client().unwrap();
        assert!(matches!(
            handle.connect(link.id(), Credentials::new("dev", "nope")),
            Err(BridgeError::Unauthorized)
        ));
        assert!(link.is_closed());
        assert!(drain(&link).is_empty());
        let status = handle.status().unwrap();
        assert_eq!(status.state, SessionState::Started);
        assert_eq!((status.contexts, status.waiting), (1, 1));

        let link = handle.treat_new_client().unwrap();
        let connected = handle.connect(link.id(), Credentials::new("dev", "pw")).unwrap();
        assert!(connected.needs_authentication);
    }

    #[test]
    fn waiting_context_is_offered_on_connect() {
        let (_pilot, handle) = started();
        let id = handle.new_context().unwrap();
        let Offer::Wait(wait) = handle
            .breakpoint_reached(id, BreakInfo::breakpoint("a.js", 12))
            .unwrap()
        else {
            panic!("expected to wait");
        };

        let link = handle.treat_new_client().unwrap();
        handle.connect(link.id(), Credentials::default()).unwrap();
        let frames = drain(&link);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains(r#""method":"updateContext""#));
        assert!(frames[0].contains(&format!(r#""contextId":"{id}""#)));

        let number = handle.get_url(link.id(), id).unwrap();
        let attachment = handle.attach_page(number).unwrap();
        assert!(matches!(handle.attach_page(number), Err(BridgeError::Busy)));
        attachment.handle.set_state(PageState::Connected);
        handle.page_ready(number, &attachment.handle).unwrap();
        match wait.recv_timeout(Duration::from_secs(1)).unwrap() {
            Release::Page(page) => assert!(Arc::ptr_eq(&page, &attachment.handle)),
            Release::Aborted => panic!("unexpected abort"),
        }
    }

    #[test]
    fn disconnect_keeps_paused_pages_and_continues_the_rest() {
        let (_pilot, handle) = started();
        let paused = handle.new_context().unwrap();
        let running = handle.new_context().unwrap();
        let link = handle.treat_new_client().unwrap();
        handle.connect(link.id(), Credentials::default()).unwrap();

        let paused_page = handle.get_url(link.id(), paused).unwrap();
        let running_page = handle.get_url(link.id(), running).unwrap();
        let paused_handle = handle.attach_page(paused_page).unwrap().handle;
        let running_handle = handle.attach_page(running_page).unwrap().handle;
        paused_handle.set_state(PageState::Paused);
        paused_handle.park_at(BreakInfo::breakpoint("a.js", 4), Vec::new());
        running_handle.set_state(PageState::Connected);

        handle.end_session(link.id(), false).unwrap();
        assert!(link.is_closed());
        assert_eq!(handle.status().unwrap().state, SessionState::Started);
        assert!(handle.page_of(paused).unwrap().is_some());
        assert!(handle.page_of(running).unwrap().is_none());
        assert_eq!(
            running_handle.outbound().try_get(),
            Some(Message::SendEngineCommand(crate::message::EngineCommand::Continue))
        );
        assert!(paused_handle.outbound().is_empty());
        assert_eq!(paused_handle.inbound().try_get(), Some(Message::Detach));

        // The paused context is offered again to the next client.
        let link = handle.treat_new_client().unwrap();
        handle.connect(link.id(), Credentials::default()).unwrap();
        let frames = drain(&link);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains(&format!(r#""contextId":"{paused}""#)));
    }

    #[test]
    fn abort_all_releases_waiters_and_hides_contexts() {
        let (_pilot, handle) = started();
        let id = handle.new_context().unwrap();
        let link = handle.treat_new_client().unwrap();
        handle.connect(link.id(), Credentials::default()).unwrap();
        let Offer::Wait(wait) = handle
            .breakpoint_reached(id, BreakInfo::breakpoint("a.js", 1))
            .unwrap()
        else {
            panic!("expected to wait");
        };
        assert_eq!(handle.abort_all().unwrap(), 1);
        assert!(matches!(wait.recv().unwrap(), Release::Aborted));
        let frames = drain(&link);
        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains(r#""method":"updateContext""#));
        assert!(frames[0].contains(&format!(r#""contextId":"{id}""#)));
        assert!(frames[1].contains(r#""method":"hideContext""#));
        assert!(matches!(
            handle.remove_context(id),
            Err(BridgeError::UnknownContext(_))
        ));
    }

    #[test]
    fn pause_requests_are_consumed_once() {
        let (_pilot, handle) = started();
        let id = handle.new_context().unwrap();
        assert!(!handle.take_pause_request(id).unwrap());
        handle.request_pause(id).unwrap();
        assert!(handle.take_pause_request(id).unwrap());
        assert!(!handle.take_pause_request(id).unwrap());
    }

    #[test]
    fn callers_that_gave_up_do_not_stop_the_pilot() {
        let (_pilot, handle) = started();
        let (reply, result) = mpsc::channel();
        drop(result);
        handle.tx.send(Request::NewContext(reply)).unwrap();
        handle.tx.send(Request::AbortAll(mpsc::channel().0)).unwrap();
        assert_eq!(handle.status().unwrap().state, SessionState::Started);
        assert_eq!(handle.new_context().unwrap().as_u64(), 2);
    }

    #[test]
    fn dropping_the_pilot_makes_handles_fail() {
        let pilot = Pilot::spawn(PilotOptions::default()).unwrap();
        let handle = pilot.handle();
        drop(pilot);
        assert!(matches!(handle.new_context(), Err(BridgeError::PilotGone)));
    }
}

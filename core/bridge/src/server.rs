//! WebSocket server
//!
//! Accepts TCP connections, performs the WebSocket upgrade and routes each
//! socket by path:
//!
//! - `/devtools/session`: the handshake channel, at most one at a time;
//! - `/devtools/page/<n>`: the protocol channel of page `n`.
//!
//! Every connection gets its own network thread.

use crate::codec::handshake::{self, SESSION_PATH, SessionRequest};
use crate::codec::RequestId;
use crate::config::{Backend, BridgeConfig};
use crate::engine::{CdpServer, DebuggerServer, DisabledServer};
use crate::error::{BridgeError, BridgeResult};
use crate::page::{Page, PageOptions, StopReason};
use crate::pilot::{Pilot, PilotHandle, PilotOptions};
use crate::transport::{Transport, WebSocketTransport};
use log::{debug, error, info, warn};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::StatusCode;

/// Where an upgraded socket goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The handshake channel.
    Session,
    /// The protocol channel of a page.
    Page(u32),
}

impl Route {
    /// Routes a request path; `None` for anything else.
    #[must_use]
    pub fn parse(path: &str) -> Option<Self> {
        if path == SESSION_PATH {
            return Some(Self::Session);
        }
        handshake::parse_page_path(path).map(Self::Page)
    }
}

/// The running bridge: pilot thread plus accept loop.
#[derive(Debug)]
pub struct BridgeServer {
    pilot: Pilot,
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    acceptor: Option<thread::JoinHandle<()>>,
}

impl BridgeServer {
    /// Starts the pilot, binds the listener and starts accepting.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or if the address cannot be bound.
    pub fn bind(config: &BridgeConfig) -> BridgeResult<Self> {
        config.validate()?;
        let pilot = Pilot::spawn(PilotOptions {
            max_pages: config.max_pages,
            queue_capacity: config.queue_capacity,
            trace_capacity: config.trace_capacity,
            solution: config.solution.clone(),
            auth: config.auth(),
        })?;
        pilot.handle().start()?;

        let listener = TcpListener::bind(config.socket_addr())?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        info!("debugging bridge listening on ws://{local_addr}{SESSION_PATH}");

        let shutdown = Arc::new(AtomicBool::new(false));
        let options = PageOptions {
            poll_interval: config.poll_interval(),
            reply_timeout: config.reply_timeout(),
        };
        let acceptor = {
            let pilot = pilot.handle();
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name("cdp-accept".into())
                .spawn(move || accept_loop(&listener, &pilot, &shutdown, options))?
        };

        Ok(Self {
            pilot,
            local_addr,
            shutdown,
            acceptor: Some(acceptor),
        })
    }

    /// The bound address; useful with port 0.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle on the pilot.
    #[must_use]
    pub fn pilot(&self) -> PilotHandle {
        self.pilot.handle()
    }

    /// Engine-facing debugger routed through this bridge.
    #[must_use]
    pub fn debugger(&self) -> Arc<dyn DebuggerServer> {
        Arc::new(CdpServer::new(self.pilot.handle(), self.pilot.breakpoints()))
    }

    /// Stops accepting, aborts every context and joins the accept thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(acceptor) = self.acceptor.take() {
            if acceptor.join().is_err() {
                error!("accept thread panicked");
            }
        }
        if let Err(err) = self.pilot.handle().stop() {
            debug!("pilot already gone: {err}");
        }
    }
}

impl Drop for BridgeServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The debugger chosen by configuration, and the server behind it if any.
pub struct Launch {
    /// Server for engine threads.
    pub debugger: Arc<dyn DebuggerServer>,
    /// The running bridge, absent for [`Backend::Disabled`].
    pub server: Option<BridgeServer>,
}

impl std::fmt::Debug for Launch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Launch")
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

/// Builds the debugger selected by `config.backend`.
///
/// # Errors
///
/// See [`BridgeServer::bind`].
pub fn launch(config: &BridgeConfig) -> BridgeResult<Launch> {
    match config.backend {
        Backend::Cdp => {
            let server = BridgeServer::bind(config)?;
            Ok(Launch {
                debugger: server.debugger(),
                server: Some(server),
            })
        }
        Backend::Disabled => {
            info!("debugger disabled by configuration");
            Ok(Launch {
                debugger: Arc::new(DisabledServer::new()),
                server: None,
            })
        }
    }
}

fn accept_loop(
    listener: &TcpListener,
    pilot: &PilotHandle,
    shutdown: &AtomicBool,
    options: PageOptions,
) {
    while !shutdown.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("connection from {peer}");
                let pilot = pilot.clone();
                let spawned = thread::Builder::new()
                    .name(format!("cdp-conn-{peer}"))
                    .spawn(move || handle_connection(stream, &pilot, options));
                if let Err(err) = spawned {
                    error!("cannot spawn connection thread: {err}");
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(options.poll_interval);
            }
            Err(err) => {
                error!("accept failed: {err}");
                thread::sleep(options.poll_interval);
            }
        }
    }
    debug!("accept loop stopped");
}

#[allow(clippy::result_large_err)] // ErrorResponse size is dictated by tungstenite's API
fn route_request(request: &Request, response: Response) -> Result<(Response, Route), ErrorResponse> {
    match Route::parse(request.uri().path()) {
        Some(route) => Ok((response, route)),
        None => {
            let mut rejection = ErrorResponse::new(Some("unknown debugging endpoint".to_owned()));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    }
}

fn handle_connection(stream: TcpStream, pilot: &PilotHandle, options: PageOptions) {
    if let Err(err) = stream
        .set_nonblocking(false)
        .and_then(|()| stream.set_nodelay(true))
    {
        warn!("cannot configure socket: {err}");
        return;
    }

    let mut route = None;
    let accepted = tungstenite::accept_hdr(stream, |request: &Request, response: Response| {
        route_request(request, response).map(|(response, found)| {
            route = Some(found);
            response
        })
    });
    let socket = match accepted {
        Ok(socket) => socket,
        Err(err) => {
            warn!("websocket handshake failed: {err}");
            return;
        }
    };
    let transport = WebSocketTransport::new(socket);

    match route {
        Some(Route::Session) => {
            if let Err(err) = serve_session(transport, pilot, options.poll_interval) {
                info!("session ended: {err}");
            }
        }
        Some(Route::Page(number)) => {
            if let Err(err) = serve_page(transport, pilot, number, options) {
                info!("page {number} refused: {err}");
            }
        }
        None => {}
    }
}

/// Runs a page channel on `transport` until it closes.
///
/// # Errors
///
/// Fails if the page cannot be attached, e.g. unknown or already in use; the
/// socket is closed in that case.
pub fn serve_page<T: Transport>(
    mut transport: T,
    pilot: &PilotHandle,
    number: u32,
    options: PageOptions,
) -> BridgeResult<StopReason> {
    let attachment = match pilot.attach_page(number) {
        Ok(attachment) => attachment,
        Err(err) => {
            transport.close();
            return Err(err);
        }
    };
    Ok(Page::new(attachment, transport, pilot.clone(), options).run())
}

enum SessionFlow {
    Open,
    Closed,
}

/// Runs the handshake channel on `transport` until it closes.
///
/// # Errors
///
/// Fails with [`BridgeError::Busy`] when another client holds the session
/// and with [`BridgeError::Unauthorized`] when `connect` is refused.
pub fn serve_session<T: Transport>(
    mut transport: T,
    pilot: &PilotHandle,
    poll_interval: Duration,
) -> BridgeResult<()> {
    let link = match pilot.treat_new_client() {
        Ok(link) => link,
        Err(err) => {
            if let Ok(frame) = handshake::encode_session_error(&RequestId::missing(), &err.to_string()) {
                if let Err(err) = transport.write_frame(&frame) {
                    debug!("session refusal not delivered: {err}");
                }
            }
            transport.close();
            return Err(err);
        }
    };
    let session = link.id();
    info!("session {session} opened");

    let outcome = loop {
        if link.is_closed() {
            break Ok(());
        }
        match transport.read_frame(poll_interval) {
            Ok(Some(text)) => match session_frame(&mut transport, pilot, session, &text) {
                Ok(SessionFlow::Open) => {}
                Ok(SessionFlow::Closed) => break Ok(()),
                Err(err) => break Err(err),
            },
            Ok(None) => {}
            Err(err) => {
                info!("session {session} socket closed: {err}");
                break Ok(());
            }
        }
        let mut flushed = Ok(());
        while let Some(frame) = link.next_frame() {
            debug!("session {session} <- {frame}");
            flushed = transport.write_frame(&frame);
            if flushed.is_err() {
                break;
            }
        }
        if let Err(err) = flushed {
            break Err(err.into());
        }
    };

    pilot.end_session(session, false)?;
    transport.close();
    info!("session {session} closed");
    outcome
}

fn session_frame<T: Transport>(
    transport: &mut T,
    pilot: &PilotHandle,
    session: u64,
    text: &str,
) -> BridgeResult<SessionFlow> {
    debug!("session {session} -> {text}");
    let request = match handshake::decode_session_request(text) {
        Ok(request) => request,
        Err(err) => {
            warn!("session {session}: {err}");
            transport.write_frame(&handshake::encode_session_error(
                &RequestId::missing(),
                &err.to_string(),
            )?)?;
            return Ok(SessionFlow::Open);
        }
    };

    match request {
        SessionRequest::Connect { id, credentials } => match pilot.connect(session, credentials) {
            Ok(connected) => {
                transport.write_frame(&handshake::encode_connect_reply(
                    &id,
                    true,
                    &connected.solution,
                    connected.needs_authentication,
                )?)?;
            }
            Err(BridgeError::Unauthorized) => {
                transport.write_frame(&handshake::encode_connect_reply(&id, false, "", true)?)?;
                return Err(BridgeError::Unauthorized);
            }
            Err(err) => reply_error(transport, &id, &err)?,
        },
        SessionRequest::GetUrl { id, context } => match pilot.get_url(session, context) {
            Ok(page) => {
                transport.write_frame(&handshake::encode_set_url_context(&id, context, page)?)?;
            }
            Err(err) => reply_error(transport, &id, &err)?,
        },
        SessionRequest::GetContexts { id } => match pilot.get_contexts(session) {
            Ok(_) => transport.write_frame(&handshake::encode_session_ok(&id)?)?,
            Err(err) => reply_error(transport, &id, &err)?,
        },
        SessionRequest::Disconnect { id } => {
            transport.write_frame(&handshake::encode_session_ok(&id)?)?;
            pilot.end_session(session, false)?;
            return Ok(SessionFlow::Closed);
        }
        SessionRequest::Abort { id } => {
            transport.write_frame(&handshake::encode_session_ok(&id)?)?;
            pilot.end_session(session, true)?;
            return Ok(SessionFlow::Closed);
        }
    }
    Ok(SessionFlow::Open)
}

fn reply_error<T: Transport>(transport: &mut T, id: &RequestId, err: &BridgeError) -> BridgeResult<()> {
    warn!("session request failed: {err}");
    transport.write_frame(&handshake::encode_session_error(id, &err.to_string())?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("/devtools/session", Some(Route::Session))]
    #[test_case("/devtools/page/4", Some(Route::Page(4)))]
    #[test_case("/devtools/page/x", None)]
    #[test_case("/", None)]
    fn routes(path: &str, expected: Option<Route>) {
        assert_eq!(Route::parse(path), expected);
    }
}

//! The bridge over real sockets.

use cdp_bridge::{
    BreakInfo, BridgeConfig, BridgeServer, CallFrame, EngineAdapter, EvalResult, LookupTarget,
    Property, RemoteValue, ResumeAction, pause_here,
};
use serde_json::{Value, json};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

struct Counter;

impl EngineAdapter for Counter {
    fn call_stack(&mut self) -> Vec<CallFrame> {
        vec![CallFrame::new("tick", "counter.js", 2)]
    }

    fn evaluate(&mut self, _frame: u32, _expression: &str) -> EvalResult {
        EvalResult::value(RemoteValue::Number(1.0))
    }

    fn lookup(&mut self, _target: &LookupTarget) -> Vec<Property> {
        Vec::new()
    }
}

fn open(addr: SocketAddr, path: &str) -> Socket {
    let (socket, _) = tungstenite::connect(format!("ws://{addr}{path}")).unwrap();
    if let MaybeTlsStream::Plain(stream) = socket.get_ref() {
        stream.set_read_timeout(Some(WAIT)).unwrap();
    }
    socket
}

fn send(socket: &mut Socket, frame: &Value) {
    socket.send(Message::text(frame.to_string())).unwrap();
}

fn read_until(socket: &mut Socket, matches: impl Fn(&Value) -> bool) -> Value {
    loop {
        if let Message::Text(text) = socket.read().unwrap() {
            let value: Value = serde_json::from_str(text.as_str()).unwrap();
            if matches(&value) {
                return value;
            }
        }
    }
}

fn test_config() -> BridgeConfig {
    BridgeConfig {
        port: 0,
        poll_interval_ms: 10,
        ..BridgeConfig::default()
    }
}

#[test]
fn pause_and_resume_over_websockets() {
    let server = BridgeServer::bind(&test_config()).unwrap();
    let addr = server.local_addr();
    let debugger = server.debugger();
    let context = debugger.add_context().unwrap();

    let engine = {
        let debugger = debugger.clone();
        thread::spawn(move || {
            pause_here(
                &*debugger,
                &mut Counter,
                context,
                BreakInfo::breakpoint("counter.js", 2).with_source("let n = 0;\nn += 1;\n"),
            )
        })
    };
    let deadline = Instant::now() + WAIT;
    while server.pilot().status().unwrap().waiting == 0 {
        assert!(Instant::now() < deadline, "engine never parked");
        thread::sleep(Duration::from_millis(10));
    }

    let mut session = open(addr, "/devtools/session");
    send(&mut session, &json!({"method": "connect", "id": 1}));
    let reply = read_until(&mut session, |v| v["id"] == 1);
    assert_eq!(reply["result"], "ok");
    assert_eq!(reply["solution"], "default");
    read_until(&mut session, |v| v["method"] == "updateContext");

    send(
        &mut session,
        &json!({"method": "getURL", "id": 2, "params": {"contextId": context.to_string()}}),
    );
    let bound = read_until(&mut session, |v| v["id"] == 2);
    let path = bound["url"].as_str().unwrap().to_owned();
    assert!(path.starts_with("/devtools/page/"));

    let mut page = open(addr, &path);
    send(&mut page, &json!({"id": 1, "method": "Runtime.enable"}));
    read_until(&mut page, |v| v["method"] == "Runtime.executionContextCreated");
    send(&mut page, &json!({"id": 2, "method": "Debugger.enable"}));
    let paused = read_until(&mut page, |v| v["method"] == "Debugger.paused");
    assert_eq!(paused["params"]["callFrames"][0]["functionName"], "tick");

    send(&mut page, &json!({"id": 3, "method": "Debugger.stepInto"}));
    read_until(&mut page, |v| v["method"] == "Debugger.resumed");
    assert_eq!(engine.join().unwrap(), ResumeAction::StepInto);

    server.shutdown();
}

#[test]
fn unknown_paths_are_rejected() {
    let server = BridgeServer::bind(&test_config()).unwrap();
    let url = format!("ws://{}/devtools/elsewhere", server.local_addr());
    match tungstenite::connect(url) {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 404),
        other => panic!("expected a 404, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn unbound_page_is_closed() {
    let server = BridgeServer::bind(&test_config()).unwrap();
    let mut page = open(server.local_addr(), "/devtools/page/3");
    let closed = loop {
        match page.read() {
            Ok(Message::Close(_)) | Err(_) => break true,
            Ok(_) => {}
        }
    };
    assert!(closed);
}

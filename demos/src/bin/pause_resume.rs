//! One complete pause/resume cycle through the bridge.
//!
//! An engine thread hits a breakpoint before any client is attached and
//! parks. The demo then plays the DevTools client over in-memory transports:
//! it opens the handshake channel, binds the parked context to a page,
//! inspects the paused frame, evaluates an expression and steps over.
#![allow(clippy::print_stdout)]

use cdp_bridge::page::PageOptions;
use cdp_bridge::server::{serve_page, serve_session};
use cdp_bridge::{
    BreakInfo, BridgeError, BridgeResult, CallFrame, CdpServer, ChannelTransport, DebuggerServer,
    EngineAdapter, EvalResult, LookupTarget, Pilot, PilotOptions, Property, RemoteValue,
    pause_here,
};
use log::LevelFilter;
use serde_json::{Value, json};
use simple_logger::SimpleLogger;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const SOURCE: &str = "let greeting = \"hello\"\nlet target = \"world\"\nprint greeting + \" \" + target\n";

/// What the paused engine knows about itself.
struct Greeter;

impl EngineAdapter for Greeter {
    fn call_stack(&mut self) -> Vec<CallFrame> {
        vec![CallFrame::new("", "greeter.script", 2)]
    }

    fn evaluate(&mut self, _frame: u32, expression: &str) -> EvalResult {
        match expression {
            "greeting" => EvalResult::value(RemoteValue::String("hello".into())),
            other => EvalResult::thrown(format!("{other} is not defined")),
        }
    }

    fn lookup(&mut self, _target: &LookupTarget) -> Vec<Property> {
        vec![Property::new("greeting", RemoteValue::String("hello".into()))]
    }
}

/// Sends `request` and prints frames until the one `done` accepts.
fn exchange(
    client: &ChannelTransport,
    request: &Value,
    done: impl Fn(&Value) -> bool,
) -> BridgeResult<Value> {
    println!("-> {request}");
    client.send(request.to_string())?;
    loop {
        let frame = client
            .recv(Duration::from_secs(5))?
            .ok_or(BridgeError::Timeout)?;
        println!("<- {frame}");
        let value: Value = serde_json::from_str(&frame)?;
        if done(&value) {
            return Ok(value);
        }
    }
}

fn main() -> BridgeResult<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Warn)
        .init()
        .map_err(|e| BridgeError::Io(std::io::Error::other(e.to_string())))?;

    let pilot = Pilot::spawn(PilotOptions::default())?;
    let handle = pilot.handle();
    handle.start()?;
    let server = Arc::new(CdpServer::new(handle.clone(), pilot.breakpoints()));

    let context = server.add_context()?;
    let engine = {
        let server = Arc::clone(&server);
        thread::spawn(move || {
            let info = BreakInfo::breakpoint("greeter.script", 2).with_source(SOURCE);
            pause_here(&*server, &mut Greeter, context, info)
        })
    };
    while handle.status()?.waiting == 0 {
        thread::sleep(Duration::from_millis(10));
    }
    println!("context {context} is parked at greeter.script:2");

    let (session, bridge_end) = ChannelTransport::pair();
    {
        let handle = handle.clone();
        thread::spawn(move || serve_session(bridge_end, &handle, Duration::from_millis(20)));
    }
    exchange(&session, &json!({"method": "connect", "id": 1}), |v| {
        v["method"] == "updateContext"
    })?;
    let bound = exchange(
        &session,
        &json!({"method": "getURL", "id": 2, "params": {"contextId": context.to_string()}}),
        |v| v["method"] == "setURLContext",
    )?;
    let number = bound["page"]
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| BridgeError::InvalidParameter("setURLContext without a page".into()))?;

    let (page, bridge_end) = ChannelTransport::pair();
    {
        let handle = handle.clone();
        thread::spawn(move || serve_page(bridge_end, &handle, number, PageOptions::default()));
    }
    let paused = exchange(&page, &json!({"id": 1, "method": "Debugger.enable"}), |v| {
        v["method"] == "Debugger.paused"
    })?;
    let frame_id = paused["params"]["callFrames"][0]["callFrameId"].clone();

    exchange(
        &page,
        &json!({
            "id": 2,
            "method": "Debugger.evaluateOnCallFrame",
            "params": {"callFrameId": frame_id, "expression": "greeting"},
        }),
        |v| v["id"] == 2,
    )?;
    exchange(&page, &json!({"id": 3, "method": "Debugger.stepOver"}), |v| {
        v["method"] == "Debugger.resumed"
    })?;

    let action = engine
        .join()
        .map_err(|_| BridgeError::InvalidParameter("engine thread panicked".into()))?;
    println!("engine resumed with {action:?}");
    Ok(())
}

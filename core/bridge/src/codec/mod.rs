//! DevTools protocol codec
//!
//! Pure functions that turn engine-side data into protocol frames and inbound
//! protocol frames into typed [`Command`]s. Nothing in here performs I/O.
//!
//! Numbering conventions on the wire:
//!
//! - Line numbers are 0-based on the wire and 1-based everywhere else.
//! - Call frame ids are JSON tuples `{"ordinal":N,"injectedScriptId":M}`.
//! - Scope object ids are `frame + (scope + 1) / 1000`, rendered as
//!   `"<frame>.<scope+1 padded to 3>"`, which keeps them sortable and disjoint
//!   between frames.
//! - Engine object references travel as `obj:<reference>`.

pub mod handshake;
pub mod stubs;
pub mod wire;

use crate::error::{BridgeError, BridgeResult};
use crate::message::{
    BreakInfo, CallFrame, EvalResult, LookupTarget, PauseReason, Property, RemoteValue,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub use wire::RequestId;

/// JSON-RPC code for a method the bridge does not implement.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// JSON-RPC code for bad parameters.
pub const INVALID_PARAMS: i32 = -32602;
/// JSON-RPC code for internal failures, e.g. engine timeouts.
pub const SERVER_ERROR: i32 = -32000;

const OBJECT_PREFIX: &str = "obj:";

/// Domains a generic DevTools front-end expects to exist.
const KNOWN_DOMAINS: &[&str] = &[
    "Inspector",
    "Debugger",
    "Runtime",
    "Console",
    "Profiler",
    "HeapProfiler",
    "DOM",
    "CSS",
    "Page",
    "Network",
    "Worker",
    "Timeline",
    "Database",
    "DOMStorage",
    "IndexedDB",
    "ApplicationCache",
    "Emulation",
    "Overlay",
    "Log",
    "Security",
    "ServiceWorker",
    "Target",
    "Animation",
    "LayerTree",
];

/// Setters a front-end sends during its handshake that need no action.
const ACKNOWLEDGED: &[&str] = &[
    "Debugger.setPauseOnExceptions",
    "Debugger.setAsyncCallStackDepth",
    "Debugger.setBreakpointsActive",
    "Debugger.setSkipAllPauses",
    "Debugger.setBlackboxPatterns",
    "Runtime.runIfWaitingForDebugger",
    "Runtime.releaseObject",
    "Runtime.releaseObjectGroup",
    "Runtime.setAsyncCallStackDepth",
    "Console.clearMessages",
    "Page.setShowViewportSizeOnResize",
    "Page.setOverlayMessage",
    "Page.reload",
    "Network.setCacheDisabled",
    "Network.setUserAgentOverride",
    "Network.setMonitoringXHREnabled",
    "Profiler.setSamplingInterval",
    "DOM.hideHighlight",
    "DOM.highlightNode",
    "Overlay.setShowViewportSizeOnResize",
    "Emulation.setTouchEmulationEnabled",
    "Log.startViolationsReport",
    "Target.setAutoAttach",
    "Target.setDiscoverTargets",
];

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of one call frame while paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrameId {
    /// Position in the stack, 0 being the innermost frame.
    pub ordinal: u32,
    /// Execution context the frame belongs to.
    pub injected_script_id: u64,
}

impl fmt::Display for CallFrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"{{"ordinal":{},"injectedScriptId":{}}}"#,
            self.ordinal, self.injected_script_id
        )
    }
}

impl FromStr for CallFrameId {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s).map_err(|_| BridgeError::invalid(format!("bad callFrameId `{s}`")))
    }
}

/// Scopes encoded per frame; the three-digit suffix of [`ScopeId`] runs out
/// after this many.
pub const MAX_SCOPES: usize = 999;

/// Identifier of one scope of one call frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScopeId {
    /// Frame ordinal.
    pub frame: u32,
    /// 0-based index into the scope chain; at most 998.
    pub index: u32,
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.frame, self.index + 1)
    }
}

impl FromStr for ScopeId {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || BridgeError::invalid(format!("bad scope id `{s}`"));
        let (frame, scope) = s.split_once('.').ok_or_else(bad)?;
        if scope.len() != 3 {
            return Err(bad());
        }
        let frame = frame.parse().map_err(|_| bad())?;
        let scope: u32 = scope.parse().map_err(|_| bad())?;
        if scope == 0 {
            return Err(bad());
        }
        Ok(Self {
            frame,
            index: scope - 1,
        })
    }
}

/// Breakpoint id as handed to the client: `<url>:<line>:<column>`, 0-based line.
#[must_use]
pub fn breakpoint_id(url: &str, line: u32, column: u32) -> String {
    format!("{url}:{}:{column}", line.saturating_sub(1))
}

/// Splits a breakpoint id back into `(url, 1-based line)`.
///
/// # Errors
///
/// Fails when the id does not have the `<url>:<line>:<column>` shape.
pub fn parse_breakpoint_id(id: &str) -> BridgeResult<(String, u32)> {
    let bad = || BridgeError::invalid(format!("bad breakpoint id `{id}`"));
    let mut parts = id.rsplitn(3, ':');
    let _column: u32 = parts.next().and_then(|c| c.parse().ok()).ok_or_else(bad)?;
    let line: u32 = parts.next().and_then(|l| l.parse().ok()).ok_or_else(bad)?;
    let url = parts.next().filter(|u| !u.is_empty()).ok_or_else(bad)?;
    Ok((url.to_owned(), line.checked_add(1).ok_or_else(bad)?))
}

// ============================================================================
// Script table
// ============================================================================

/// A script known to a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptEntry {
    /// Protocol script id.
    pub id: u32,
    /// Script URL.
    pub url: String,
    /// Source text, once the engine provided it.
    pub source: Option<String>,
    /// Whether `Debugger.scriptParsed` went out for it.
    pub announced: bool,
}

/// Per-page map of scripts, used to announce each script exactly once.
#[derive(Debug, Default)]
pub struct ScriptTable {
    by_url: BTreeMap<String, ScriptEntry>,
    next_id: u32,
}

impl ScriptTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id of `url`, allocating one on first sight.
    pub fn intern(&mut self, url: &str) -> u32 {
        if let Some(entry) = self.by_url.get(url) {
            return entry.id;
        }
        self.next_id += 1;
        let id = self.next_id;
        self.by_url.insert(
            url.to_owned(),
            ScriptEntry {
                id,
                url: url.to_owned(),
                source: None,
                announced: false,
            },
        );
        id
    }

    /// Records the source of `url`. A changed source must be announced again.
    pub fn set_source(&mut self, url: &str, source: String) -> u32 {
        let id = self.intern(url);
        if let Some(entry) = self.by_url.get_mut(url) {
            if entry.source.as_deref() != Some(source.as_str()) {
                entry.announced = false;
                entry.source = Some(source);
            }
        }
        id
    }

    /// Id of `url` if known.
    #[must_use]
    pub fn id_of(&self, url: &str) -> Option<u32> {
        self.by_url.get(url).map(|entry| entry.id)
    }

    /// Entry for `url`.
    #[must_use]
    pub fn by_url(&self, url: &str) -> Option<&ScriptEntry> {
        self.by_url.get(url)
    }

    /// Entry for protocol id `id`.
    #[must_use]
    pub fn by_id(&self, id: &str) -> Option<&ScriptEntry> {
        let id: u32 = id.parse().ok()?;
        self.by_url.values().find(|entry| entry.id == id)
    }

    /// Marks `url` as announced; returns `true` the first time for a given source.
    pub fn mark_announced(&mut self, url: &str) -> bool {
        match self.by_url.get_mut(url) {
            Some(entry) if !entry.announced && entry.source.is_some() => {
                entry.announced = true;
                true
            }
            _ => false,
        }
    }

    /// All scripts in URL order.
    pub fn iter(&self) -> impl Iterator<Item = &ScriptEntry> {
        self.by_url.values()
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Fixed responses for domains the bridge only pretends to implement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stub {
    /// `DOM.getDocument`.
    GetDocument,
    /// `Page.getResourceTree`.
    GetResourceTree,
    /// `Page.getResourceContent`.
    GetResourceContent {
        /// Requested resource.
        url: String,
    },
    /// `Page.getNavigationHistory`.
    GetNavigationHistory,
    /// `CSS.getSupportedCSSProperties`.
    GetSupportedCssProperties,
    /// `Network.getResponseBody`.
    GetResponseBody,
}

/// A decoded protocol verb with its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    /// Lifecycle no-op answered with `{}`.
    Acknowledge,
    /// Capability probe answered with `{"result": <bool>}`.
    Capability(bool),
    /// `Inspector.enable`: the client finished its handshake.
    InspectorEnable,
    /// `Debugger.enable`.
    DebuggerEnable,
    /// `Runtime.enable`.
    RuntimeEnable,
    /// `Debugger.setBreakpointByUrl`.
    SetBreakpointByUrl {
        /// Script URL.
        url: String,
        /// 1-based line.
        line: u32,
        /// 0-based column.
        column: u32,
    },
    /// `Debugger.removeBreakpoint`.
    RemoveBreakpoint {
        /// Script URL.
        url: String,
        /// 1-based line.
        line: u32,
    },
    /// `Debugger.pause`.
    Pause,
    /// `Debugger.resume`.
    Resume,
    /// `Debugger.stepInto`.
    StepInto,
    /// `Debugger.stepOver`.
    StepOver,
    /// `Debugger.stepOut`.
    StepOut,
    /// `Debugger.getScriptSource`.
    GetScriptSource {
        /// Protocol script id.
        script_id: String,
    },
    /// `Runtime.getProperties`.
    GetProperties {
        /// What to enumerate.
        target: LookupTarget,
    },
    /// `Debugger.evaluateOnCallFrame`.
    EvaluateOnCallFrame {
        /// Frame ordinal.
        frame: u32,
        /// Expression source.
        expression: String,
    },
    /// `Runtime.evaluate`, run on the top frame.
    Evaluate {
        /// Expression source.
        expression: String,
    },
    /// A stub domain request.
    Stub(Stub),
}

/// One decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Id to echo in the reply.
    pub id: RequestId,
    /// Full method name, e.g. `Debugger.resume`.
    pub method: String,
    /// The decoded verb.
    pub verb: Verb,
}

/// A frame that could not be decoded.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct DecodeError {
    /// Id of the offending request, when it could be read.
    pub id: Option<RequestId>,
    /// JSON-RPC error code.
    pub code: i32,
    /// What went wrong.
    pub error: BridgeError,
}

impl DecodeError {
    fn new(id: Option<RequestId>, code: i32, error: BridgeError) -> Self {
        Self { id, code, error }
    }
}

fn params<T: for<'de> Deserialize<'de>>(method: &str, params: Option<Value>) -> BridgeResult<T> {
    serde_json::from_value(params.unwrap_or_else(|| json!({})))
        .map_err(|e| BridgeError::invalid(format!("{method}: {e}")))
}

/// Decodes one text frame into a [`Command`].
///
/// # Errors
///
/// Fails with [`BridgeError::InvalidParameter`] for malformed JSON, unknown
/// methods and missing or ill-typed parameters. The error carries the request
/// id whenever it could be read so the caller can still reply.
pub fn decode_command(text: &str) -> Result<Command, DecodeError> {
    let request: wire::Request = serde_json::from_str(text)
        .map_err(|e| DecodeError::new(None, INVALID_PARAMS, BridgeError::invalid(e.to_string())))?;
    let id = request.id.clone();
    let verb = decode_verb(&request.method, request.params).map_err(|(code, error)| {
        DecodeError::new(id.clone(), code, error)
    })?;
    let id = id.ok_or_else(|| {
        DecodeError::new(None, INVALID_PARAMS, BridgeError::invalid("request without id"))
    })?;
    Ok(Command {
        id,
        method: request.method,
        verb,
    })
}

fn decode_verb(method: &str, raw: Option<Value>) -> Result<Verb, (i32, BridgeError)> {
    let invalid = |e: BridgeError| (INVALID_PARAMS, e);
    let verb = match method {
        "Inspector.enable" => Verb::InspectorEnable,
        "Debugger.enable" => Verb::DebuggerEnable,
        "Runtime.enable" => Verb::RuntimeEnable,
        "Debugger.setBreakpointByUrl" => {
            let p: wire::SetBreakpointByUrlParams = params(method, raw).map_err(invalid)?;
            let url = p
                .url
                .filter(|url| !url.is_empty())
                .ok_or_else(|| invalid(BridgeError::invalid("setBreakpointByUrl: missing url")))?;
            let line = p.line_number.ok_or_else(|| {
                invalid(BridgeError::invalid("setBreakpointByUrl: missing lineNumber"))
            })?;
            let line = line.checked_add(1).ok_or_else(|| {
                invalid(BridgeError::invalid("setBreakpointByUrl: lineNumber out of range"))
            })?;
            Verb::SetBreakpointByUrl {
                url,
                line,
                column: p.column_number.unwrap_or(0),
            }
        }
        "Debugger.removeBreakpoint" => {
            let p: wire::RemoveBreakpointParams = params(method, raw).map_err(invalid)?;
            let (url, line) = parse_breakpoint_id(&p.breakpoint_id).map_err(invalid)?;
            Verb::RemoveBreakpoint { url, line }
        }
        "Debugger.pause" => Verb::Pause,
        "Debugger.resume" => Verb::Resume,
        "Debugger.stepInto" => Verb::StepInto,
        "Debugger.stepOver" => Verb::StepOver,
        "Debugger.stepOut" => Verb::StepOut,
        "Debugger.getScriptSource" => {
            let p: wire::GetScriptSourceParams = params(method, raw).map_err(invalid)?;
            Verb::GetScriptSource {
                script_id: p.script_id,
            }
        }
        "Runtime.getProperties" => {
            let p: wire::GetPropertiesParams = params(method, raw).map_err(invalid)?;
            Verb::GetProperties {
                target: decode_object_id(&p.object_id).map_err(invalid)?,
            }
        }
        "Debugger.evaluateOnCallFrame" => {
            let p: wire::EvaluateOnCallFrameParams = params(method, raw).map_err(invalid)?;
            let frame: CallFrameId = p.call_frame_id.parse().map_err(invalid)?;
            Verb::EvaluateOnCallFrame {
                frame: frame.ordinal,
                expression: p.expression,
            }
        }
        "Runtime.evaluate" => {
            let p: wire::EvaluateParams = params(method, raw).map_err(invalid)?;
            Verb::Evaluate {
                expression: p.expression,
            }
        }
        "DOM.getDocument" => Verb::Stub(Stub::GetDocument),
        "Page.getResourceTree" => Verb::Stub(Stub::GetResourceTree),
        "Page.getResourceContent" => {
            let p: wire::GetResourceContentParams = params(method, raw).map_err(invalid)?;
            Verb::Stub(Stub::GetResourceContent { url: p.url })
        }
        "Page.getNavigationHistory" => Verb::Stub(Stub::GetNavigationHistory),
        "CSS.getSupportedCSSProperties" => Verb::Stub(Stub::GetSupportedCssProperties),
        "Network.getResponseBody" => Verb::Stub(Stub::GetResponseBody),
        _ if ACKNOWLEDGED.contains(&method) => Verb::Acknowledge,
        _ => {
            let known = method
                .split_once('.')
                .filter(|(domain, _)| KNOWN_DOMAINS.contains(domain));
            match known {
                Some((_, "enable" | "disable")) => Verb::Acknowledge,
                Some((_, verb)) if verb.starts_with("can") || verb.starts_with("supports") => {
                    Verb::Capability(false)
                }
                _ => {
                    return Err((
                        METHOD_NOT_FOUND,
                        BridgeError::invalid(format!("'{method}' wasn't found")),
                    ));
                }
            }
        }
    };
    Ok(verb)
}

/// Maps a protocol object id back to a lookup target.
///
/// # Errors
///
/// Fails when the id is neither a scope id nor an engine object reference.
pub fn decode_object_id(object_id: &str) -> BridgeResult<LookupTarget> {
    if let Some(reference) = object_id.strip_prefix(OBJECT_PREFIX) {
        return Ok(LookupTarget::Object(reference.to_owned()));
    }
    let scope: ScopeId = object_id.parse()?;
    Ok(LookupTarget::Scope {
        frame: scope.frame,
        index: scope.index,
    })
}

// ============================================================================
// Encoding
// ============================================================================

fn to_frame<T: Serialize>(value: &T) -> BridgeResult<String> {
    Ok(serde_json::to_string(value)?)
}

/// Encodes a successful reply.
///
/// # Errors
///
/// Fails only if `result` cannot be serialized.
pub fn encode_response<T: Serialize>(id: &RequestId, result: T) -> BridgeResult<String> {
    to_frame(&wire::Response {
        result,
        id: id.clone(),
    })
}

/// Encodes an empty `{}` reply.
///
/// # Errors
///
/// See [`encode_response`].
pub fn encode_ack(id: &RequestId) -> BridgeResult<String> {
    encode_response(id, json!({}))
}

/// Encodes an error reply.
///
/// # Errors
///
/// See [`encode_response`].
pub fn encode_error(id: &RequestId, code: i32, message: &str) -> BridgeResult<String> {
    to_frame(&wire::ErrorResponse {
        error: wire::ErrorBody {
            code,
            message: message.to_owned(),
        },
        id: id.clone(),
    })
}

/// Encodes an unsolicited event.
///
/// # Errors
///
/// Fails only if `params` cannot be serialized.
pub fn encode_event<T: Serialize>(method: &str, params: T) -> BridgeResult<String> {
    to_frame(&wire::Event {
        method: method.to_owned(),
        params,
    })
}

/// Converts an engine value into a protocol remote object.
#[must_use]
pub fn remote_object(value: &RemoteValue) -> wire::RemoteObject {
    use wire::RemoteObject;
    match value {
        RemoteValue::Undefined => RemoteObject {
            type_: "undefined".into(),
            ..RemoteObject::default()
        },
        RemoteValue::Null => RemoteObject {
            type_: "object".into(),
            subtype: Some("null".into()),
            value: Some(Value::Null),
            ..RemoteObject::default()
        },
        RemoteValue::Bool(b) => RemoteObject {
            type_: "boolean".into(),
            value: Some(Value::Bool(*b)),
            ..RemoteObject::default()
        },
        RemoteValue::Number(n) => match serde_json::Number::from_f64(*n) {
            Some(number) => RemoteObject {
                type_: "number".into(),
                value: Some(Value::Number(number)),
                description: Some(n.to_string()),
                ..RemoteObject::default()
            },
            None => {
                let text = if n.is_nan() {
                    "NaN"
                } else if n.is_sign_negative() {
                    "-Infinity"
                } else {
                    "Infinity"
                };
                RemoteObject {
                    type_: "number".into(),
                    unserializable_value: Some(text.into()),
                    description: Some(text.into()),
                    ..RemoteObject::default()
                }
            }
        },
        RemoteValue::String(s) => RemoteObject {
            type_: "string".into(),
            value: Some(Value::String(s.clone())),
            ..RemoteObject::default()
        },
        RemoteValue::Object {
            class_name,
            description,
            object_ref,
        } => RemoteObject {
            type_: "object".into(),
            class_name: Some(class_name.clone()),
            description: Some(description.clone()),
            object_id: Some(format!("{OBJECT_PREFIX}{object_ref}")),
            ..RemoteObject::default()
        },
        RemoteValue::Function {
            description,
            object_ref,
        } => RemoteObject {
            type_: "function".into(),
            class_name: Some("Function".into()),
            description: Some(description.clone()),
            object_id: Some(format!("{OBJECT_PREFIX}{object_ref}")),
            ..RemoteObject::default()
        },
    }
}

fn wire_frames(frames: &[CallFrame], scripts: &ScriptTable, context: u64) -> Vec<wire::CallFrame> {
    frames
        .iter()
        .zip(0u32..)
        .map(|(frame, ordinal)| wire::CallFrame {
            call_frame_id: CallFrameId {
                ordinal,
                injected_script_id: context,
            }
            .to_string(),
            function_name: frame.function_name.clone(),
            location: wire::Location {
                script_id: scripts
                    .id_of(&frame.url)
                    .map_or_else(String::new, |id| id.to_string()),
                line_number: frame.line.saturating_sub(1),
                column_number: frame.column,
            },
            url: frame.url.clone(),
            scope_chain: frame
                .scopes
                .iter()
                .take(MAX_SCOPES)
                .zip(0u32..)
                .map(|(kind, index)| wire::Scope {
                    type_: kind.as_wire().into(),
                    object: wire::RemoteObject {
                        type_: "object".into(),
                        class_name: Some("Object".into()),
                        description: Some("Object".into()),
                        object_id: Some(
                            ScopeId {
                                frame: ordinal,
                                index,
                            }
                            .to_string(),
                        ),
                        ..wire::RemoteObject::default()
                    },
                })
                .collect(),
            this: remote_object(&RemoteValue::Undefined),
        })
        .collect()
}

/// Encodes an engine call stack as the protocol `callFrames` array.
#[must_use]
pub fn encode_call_stack(frames: &[CallFrame], scripts: &ScriptTable, context: u64) -> Value {
    serde_json::to_value(wire_frames(frames, scripts, context)).unwrap_or(Value::Array(Vec::new()))
}

/// Encodes a `Debugger.paused` event.
///
/// When the engine supplied no frames, a single top-level frame is synthesized
/// from `info` so the client always has somewhere to point.
///
/// # Errors
///
/// Fails only on serialization failure.
pub fn encode_breakpoint_reached(
    info: &BreakInfo,
    frames: &[CallFrame],
    scripts: &ScriptTable,
    context: u64,
) -> BridgeResult<String> {
    let synthesized;
    let frames = if frames.is_empty() {
        synthesized = [CallFrame {
            column: info.column,
            ..CallFrame::new("", info.url.clone(), info.line)
        }];
        &synthesized[..]
    } else {
        frames
    };

    let data = info.exception.as_ref().map(|description| {
        json!({
            "type": "object",
            "className": "Error",
            "description": description,
        })
    });
    let hit_breakpoints = if info.reason == PauseReason::Breakpoint {
        vec![breakpoint_id(&info.url, info.line, 0)]
    } else {
        Vec::new()
    };

    encode_event(
        "Debugger.paused",
        wire::PausedEventBody {
            call_frames: wire_frames(frames, scripts, context),
            reason: info.reason.as_wire().into(),
            data,
            hit_breakpoints,
        },
    )
}

/// Decodes a `Debugger.paused` event back into the pause location.
///
/// # Errors
///
/// Fails when `text` is not a paused event with at least one frame.
pub fn decode_breakpoint_reached(text: &str) -> BridgeResult<BreakInfo> {
    let event: wire::Event<wire::PausedEventBody> = serde_json::from_str(text)?;
    if event.method != "Debugger.paused" {
        return Err(BridgeError::invalid(format!(
            "expected Debugger.paused, got {}",
            event.method
        )));
    }
    let top = event
        .params
        .call_frames
        .first()
        .ok_or_else(|| BridgeError::invalid("paused event without frames"))?;
    let exception = event
        .params
        .data
        .as_ref()
        .and_then(|data| data.get("description"))
        .and_then(Value::as_str)
        .map(str::to_owned);
    Ok(BreakInfo {
        url: top.url.clone(),
        line: top.location.line_number + 1,
        column: top.location.column_number,
        reason: PauseReason::from_wire(&event.params.reason),
        exception,
        source: None,
    })
}

/// Encodes the reply to `Runtime.getProperties`.
///
/// # Errors
///
/// Fails only on serialization failure.
pub fn encode_lookup_result(id: &RequestId, properties: &[Property]) -> BridgeResult<String> {
    encode_response(
        id,
        wire::GetPropertiesResult {
            result: properties
                .iter()
                .map(|property| wire::PropertyDescriptor {
                    name: property.name.clone(),
                    value: remote_object(&property.value),
                    writable: true,
                    configurable: true,
                    enumerable: true,
                    is_own: true,
                })
                .collect(),
        },
    )
}

/// Encodes the reply to `Debugger.evaluateOnCallFrame` or `Runtime.evaluate`.
///
/// # Errors
///
/// Fails only on serialization failure.
pub fn encode_eval_result(id: &RequestId, result: &EvalResult) -> BridgeResult<String> {
    let object = remote_object(&result.value);
    let exception_details = result.was_thrown.then(|| wire::ExceptionDetails {
        exception_id: 1,
        text: "Uncaught".into(),
        line_number: 0,
        column_number: 0,
        exception: object.clone(),
    });
    encode_response(
        id,
        wire::EvaluateResult {
            result: object,
            was_thrown: result.was_thrown,
            exception_details,
        },
    )
}

/// Encodes a `Debugger.scriptParsed` event.
///
/// # Errors
///
/// Fails only on serialization failure.
pub fn encode_script_parsed(
    script_id: u32,
    url: &str,
    source: &str,
    context: u64,
) -> BridgeResult<String> {
    let lines = source.lines().count();
    let last_len = source.lines().last().map_or(0, str::len);
    encode_event(
        "Debugger.scriptParsed",
        wire::ScriptParsedEventBody {
            script_id: script_id.to_string(),
            url: url.to_owned(),
            start_line: 0,
            start_column: 0,
            end_line: u32::try_from(lines.saturating_sub(1)).unwrap_or(u32::MAX),
            end_column: u32::try_from(last_len).unwrap_or(u32::MAX),
            execution_context_id: context,
            hash: format!("{:016x}", fnv1a(source.as_bytes())),
            is_content_script: false,
            source_map_url: String::new(),
            has_source_url: false,
            length: source.len(),
        },
    )
}

/// Encodes a `Debugger.breakpointResolved` event.
///
/// # Errors
///
/// Fails only on serialization failure.
pub fn encode_breakpoint_resolved(script_id: u32, url: &str, line: u32, column: u32) -> BridgeResult<String> {
    encode_event(
        "Debugger.breakpointResolved",
        wire::BreakpointResolvedEventBody {
            breakpoint_id: breakpoint_id(url, line, column),
            location: wire::Location {
                script_id: script_id.to_string(),
                line_number: line.saturating_sub(1),
                column_number: column,
            },
        },
    )
}

/// Encodes a `Debugger.resumed` event.
///
/// # Errors
///
/// Fails only on serialization failure.
pub fn encode_resumed() -> BridgeResult<String> {
    encode_event("Debugger.resumed", json!({}))
}

/// Encodes `Runtime.executionContextCreated` for the page's context.
///
/// # Errors
///
/// Fails only on serialization failure.
pub fn encode_execution_context_created(context: u64, name: &str) -> BridgeResult<String> {
    encode_event(
        "Runtime.executionContextCreated",
        wire::ExecutionContextCreatedEventBody {
            context: wire::ExecutionContextDescription {
                id: context,
                origin: String::new(),
                name: name.to_owned(),
                aux_data: json!({ "isDefault": true, "frameId": context.to_string() }),
            },
        },
    )
}

/// Encodes one trace line as `Runtime.consoleAPICalled`.
///
/// # Errors
///
/// Fails only on serialization failure.
pub fn encode_console(text: &str, context: u64, timestamp_ms: f64) -> BridgeResult<String> {
    encode_event(
        "Runtime.consoleAPICalled",
        wire::ConsoleApiCalledEventBody {
            type_: "log".into(),
            args: vec![remote_object(&RemoteValue::String(text.to_owned()))],
            execution_context_id: context,
            timestamp: timestamp_ms,
        },
    )
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ScopeKind;
    use indoc::indoc;
    use test_case::test_case;

    fn decode_ok(text: &str) -> Command {
        decode_command(text).unwrap()
    }

    #[test]
    fn breakpoint_round_trip_recovers_location() {
        let info = BreakInfo::breakpoint("a.js", 12);
        let mut scripts = ScriptTable::new();
        scripts.intern("a.js");
        let frame = encode_breakpoint_reached(&info, &[], &scripts, 3).unwrap();
        assert_eq!(decode_breakpoint_reached(&frame).unwrap(), info);
    }

    #[test]
    fn paused_event_carries_exception_and_zero_based_lines() {
        let info = BreakInfo::breakpoint("lib/x.js", 5).with_exception("TypeError: \"boom\"\n");
        let frames = vec![CallFrame::new("run", "lib/x.js", 5)];
        let mut scripts = ScriptTable::new();
        scripts.intern("lib/x.js");

        let text = encode_breakpoint_reached(&info, &frames, &scripts, 9).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["method"], "Debugger.paused");
        assert_eq!(value["params"]["reason"], "exception");
        assert_eq!(value["params"]["data"]["description"], "TypeError: \"boom\"\n");
        let top = &value["params"]["callFrames"][0];
        assert_eq!(top["location"]["lineNumber"], 4);
        assert_eq!(top["location"]["scriptId"], "1");
        assert_eq!(top["callFrameId"], r#"{"ordinal":0,"injectedScriptId":9}"#);
        assert_eq!(top["scopeChain"][1]["object"]["objectId"], "0.002");

        let decoded = decode_breakpoint_reached(&text).unwrap();
        assert_eq!(decoded.exception.as_deref(), Some("TypeError: \"boom\"\n"));
    }

    #[test]
    fn scope_ids_sort_within_and_separate_frames() {
        let a = ScopeId { frame: 0, index: 0 }.to_string();
        let b = ScopeId { frame: 0, index: 1 }.to_string();
        let c = ScopeId { frame: 1, index: 0 }.to_string();
        assert!(a < b && b < c);
        assert_eq!(b.parse::<ScopeId>().unwrap(), ScopeId { frame: 0, index: 1 });
        assert!("3.000".parse::<ScopeId>().is_err());
        assert!("3.1".parse::<ScopeId>().is_err());
    }

    #[test]
    fn deep_scope_chains_are_cut_to_parseable_ids() {
        let mut frame = CallFrame::new("deep", "a.js", 1);
        frame.scopes = vec![ScopeKind::Closure; MAX_SCOPES + 5];
        let stack = encode_call_stack(&[frame], &ScriptTable::new(), 1);
        let chain = stack[0]["scopeChain"].as_array().unwrap();
        assert_eq!(chain.len(), MAX_SCOPES);
        let last = chain[MAX_SCOPES - 1]["object"]["objectId"].as_str().unwrap();
        assert_eq!(last, "0.999");
        assert_eq!(
            last.parse::<ScopeId>().unwrap(),
            ScopeId {
                frame: 0,
                index: 998
            }
        );
    }

    #[test]
    fn call_frame_id_parses_back() {
        let id = CallFrameId {
            ordinal: 2,
            injected_script_id: 7,
        };
        assert_eq!(id.to_string().parse::<CallFrameId>().unwrap(), id);
    }

    #[test_case("a.js", 12, 3; "plain")]
    #[test_case("http://host:8080/a.js", 1, 0; "url with colons")]
    fn breakpoint_id_round_trip(url: &str, line: u32, column: u32) {
        let id = breakpoint_id(url, line, column);
        assert_eq!(parse_breakpoint_id(&id).unwrap(), (url.to_owned(), line));
    }

    #[test]
    fn set_breakpoint_converts_to_one_based_line() {
        let command = decode_ok(
            r#"{"method":"Debugger.setBreakpointByUrl","params":{"url":"a.js","lineNumber":11,"columnNumber":0},"id":4}"#,
        );
        assert_eq!(command.id, RequestId::from(4));
        assert_eq!(
            command.verb,
            Verb::SetBreakpointByUrl {
                url: "a.js".into(),
                line: 12,
                column: 0
            }
        );
    }

    #[test_case(r#"{"method":"Debugger.setBreakpointByUrl","params":{},"id":1}"#; "empty params")]
    #[test_case(r#"{"method":"Debugger.setBreakpointByUrl","params":{"url":"a.js"},"id":1}"#; "missing line")]
    #[test_case(r#"{"method":"Debugger.setBreakpointByUrl","id":1}"#; "no params")]
    #[test_case(r#"{"method":"Debugger.setBreakpointByUrl","params":{"lineNumber":"x","url":"a.js"},"id":1}"#; "ill typed line")]
    #[test_case(r#"{"method":"Debugger.setBreakpointByUrl","params":{"url":"a.js","lineNumber":4294967295},"id":1}"#; "line past u32")]
    #[test_case(r#"{"method":"Debugger.removeBreakpoint","params":{"breakpointId":"a.js:4294967295:0"},"id":1}"#; "breakpoint id line past u32")]
    #[test_case(r#"{"method":"Debugger.removeBreakpoint","params":{"breakpointId":"a.js"},"id":1}"#; "breakpoint id without line")]
    fn malformed_breakpoint_is_invalid_parameter(text: &str) {
        let err = decode_command(text).unwrap_err();
        assert_eq!(err.code, INVALID_PARAMS);
        assert_eq!(err.id, Some(RequestId::from(1)));
        assert!(matches!(err.error, BridgeError::InvalidParameter(_)));
    }

    #[test]
    fn missing_breakpoint_params_without_id_still_errors() {
        let err = decode_command(r#"{"method":"Debugger.setBreakpointByUrl","params":{}}"#)
            .unwrap_err();
        assert!(err.id.is_none());
        assert!(matches!(err.error, BridgeError::InvalidParameter(_)));
    }

    #[test_case("Network.enable", Verb::Acknowledge)]
    #[test_case("CSS.disable", Verb::Acknowledge)]
    #[test_case("Debugger.setPauseOnExceptions", Verb::Acknowledge)]
    #[test_case("Debugger.canSetScriptSource", Verb::Capability(false))]
    #[test_case("Page.canScreencast", Verb::Capability(false))]
    #[test_case("Debugger.supportsSeparateScriptCompilationAndExecution", Verb::Capability(false))]
    #[test_case("Inspector.enable", Verb::InspectorEnable)]
    #[test_case("Debugger.stepOut", Verb::StepOut)]
    #[test_case("DOM.getDocument", Verb::Stub(Stub::GetDocument))]
    fn lifecycle_methods(method: &str, expected: Verb) {
        let text = format!(r#"{{"method":"{method}","id":1}}"#);
        assert_eq!(decode_ok(&text).verb, expected);
    }

    #[test]
    fn unknown_method_is_reported_with_its_id() {
        let err = decode_command(r#"{"method":"Foo.bar","id":"abc"}"#).unwrap_err();
        assert_eq!(err.code, METHOD_NOT_FOUND);
        assert_eq!(err.id, Some(RequestId::from("abc")));
    }

    #[test]
    fn get_properties_distinguishes_scopes_and_objects() {
        let scope = decode_ok(
            r#"{"method":"Runtime.getProperties","params":{"objectId":"1.003"},"id":2}"#,
        );
        assert_eq!(
            scope.verb,
            Verb::GetProperties {
                target: LookupTarget::Scope { frame: 1, index: 2 }
            }
        );
        let object = decode_ok(
            r#"{"method":"Runtime.getProperties","params":{"objectId":"obj:arr#4"},"id":3}"#,
        );
        assert_eq!(
            object.verb,
            Verb::GetProperties {
                target: LookupTarget::Object("arr#4".into())
            }
        );
        assert!(decode_command(
            r#"{"method":"Runtime.getProperties","params":{"objectId":"weird"},"id":3}"#
        )
        .is_err());
    }

    #[test]
    fn evaluate_on_call_frame_reads_the_ordinal() {
        let text = indoc! {r#"
            {
              "method": "Debugger.evaluateOnCallFrame",
              "params": {
                "callFrameId": "{\"ordinal\":1,\"injectedScriptId\":2}",
                "expression": "a + \"b\""
              },
              "id": 8
            }
        "#};
        assert_eq!(
            decode_ok(text).verb,
            Verb::EvaluateOnCallFrame {
                frame: 1,
                expression: "a + \"b\"".into()
            }
        );
    }

    #[test]
    fn request_ids_are_echoed_verbatim() {
        let string_id = RequestId::from("17");
        let text = encode_ack(&string_id).unwrap();
        assert_eq!(text, r#"{"result":{},"id":"17"}"#);
        let numeric = encode_ack(&RequestId::from(17)).unwrap();
        assert_eq!(numeric, r#"{"result":{},"id":17}"#);
    }

    #[test]
    fn strings_are_escaped() {
        let result = EvalResult::value(RemoteValue::String("quote \" backslash \\ nl \n\u{1}".into()));
        let text = encode_eval_result(&RequestId::from(1), &result).unwrap();
        assert!(text.contains(r#"quote \" backslash \\ nl \n\u0001"#));
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["result"]["wasThrown"], false);
    }

    #[test]
    fn thrown_evaluation_has_exception_details() {
        let text = encode_eval_result(&RequestId::from(1), &EvalResult::thrown("ReferenceError")).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["result"]["wasThrown"], true);
        assert_eq!(
            value["result"]["exceptionDetails"]["exception"]["value"],
            "ReferenceError"
        );
    }

    #[test]
    fn lookup_result_renders_remote_objects() {
        let properties = vec![
            Property::new("n", RemoteValue::Number(1.5)),
            Property::new("inf", RemoteValue::Number(f64::INFINITY)),
            Property::new(
                "list",
                RemoteValue::Object {
                    class_name: "Array".into(),
                    description: "Array(2)".into(),
                    object_ref: "7".into(),
                },
            ),
        ];
        let text = encode_lookup_result(&RequestId::from(5), &properties).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        let result = &value["result"]["result"];
        assert_eq!(result[0]["value"]["value"], 1.5);
        assert_eq!(result[1]["value"]["unserializableValue"], "Infinity");
        assert_eq!(result[2]["value"]["objectId"], "obj:7");
        assert_eq!(
            decode_object_id(result[2]["value"]["objectId"].as_str().unwrap()).unwrap(),
            LookupTarget::Object("7".into())
        );
    }

    #[test]
    fn script_table_announces_once_per_source() {
        let mut scripts = ScriptTable::new();
        let id = scripts.set_source("a.js", "x = 1".into());
        assert_eq!(scripts.intern("a.js"), id);
        assert!(scripts.mark_announced("a.js"));
        assert!(!scripts.mark_announced("a.js"));
        scripts.set_source("a.js", "x = 1".into());
        assert!(!scripts.mark_announced("a.js"));
        scripts.set_source("a.js", "x = 2".into());
        assert!(scripts.mark_announced("a.js"));
        assert_eq!(scripts.by_id(&id.to_string()).unwrap().url, "a.js");
    }

    #[test]
    fn script_parsed_describes_extent() {
        let text = encode_script_parsed(3, "a.js", "one\ntwo\nthree", 1).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["params"]["scriptId"], "3");
        assert_eq!(value["params"]["endLine"], 2);
        assert_eq!(value["params"]["endColumn"], 5);
    }

    #[test]
    fn call_stack_lists_scopes_in_order() {
        let mut frame = CallFrame::new("f", "a.js", 3);
        frame.scopes = vec![ScopeKind::Local, ScopeKind::Closure, ScopeKind::Global];
        let value = encode_call_stack(&[frame], &ScriptTable::new(), 1);
        let chain = value[0]["scopeChain"].as_array().unwrap();
        let kinds: Vec<_> = chain.iter().map(|s| s["type"].as_str().unwrap()).collect();
        assert_eq!(kinds, ["local", "closure", "global"]);
    }
}

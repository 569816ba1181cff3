//! Session handshake channel messages.
//!
//! Before any page is opened the client talks to `/devtools/session` with a
//! small flat JSON dialect:
//!
//! ```text
//! -> {"method":"connect","id":"client-1","params":{"user":"u","password":"p"}}
//! <- {"result":"ok","solution":"default","needsAuthentication":true,"id":"client-1"}
//! <- {"method":"updateContext","contextId":"2","debugLineNb":12,...}
//! -> {"method":"getURL","id":"2"}
//! <- {"method":"setURLContext","contextId":"2","page":1,"url":"/devtools/page/1","id":"2"}
//! ```

use super::wire::RequestId;
use crate::auth::Credentials;
use crate::error::{BridgeError, BridgeResult};
use crate::message::BreakInfo;
use crate::registry::ContextId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Path prefix of page channels.
pub const PAGE_PATH: &str = "/devtools/page/";
/// Path of the session channel.
pub const SESSION_PATH: &str = "/devtools/session";

/// A decoded handshake request.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionRequest {
    /// Open the session.
    Connect {
        /// Client id, echoed back.
        id: RequestId,
        /// Credentials presented by the client.
        credentials: Credentials,
    },
    /// Bind a context to a page.
    GetUrl {
        /// Request id, echoed back.
        id: RequestId,
        /// The context to bind.
        context: ContextId,
    },
    /// Re-announce every waiting context.
    GetContexts {
        /// Request id, echoed back.
        id: RequestId,
    },
    /// Orderly teardown keeping paused contexts.
    Disconnect {
        /// Request id, echoed back.
        id: RequestId,
    },
    /// Teardown that aborts every context.
    Abort {
        /// Request id, echoed back.
        id: RequestId,
    },
}

#[derive(Deserialize)]
struct RawRequest {
    method: String,
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetUrlParams {
    context_id: Option<Value>,
}

fn context_from(value: &Value) -> BridgeResult<ContextId> {
    match value {
        Value::String(s) => s.parse(),
        Value::Number(n) => n.to_string().parse(),
        other => Err(BridgeError::invalid(format!("bad context id {other}"))),
    }
}

/// Decodes one handshake frame.
///
/// # Errors
///
/// Fails with [`BridgeError::InvalidParameter`] on malformed JSON, unknown
/// methods or a `getURL` without a usable context id.
pub fn decode_session_request(text: &str) -> BridgeResult<SessionRequest> {
    let raw: RawRequest =
        serde_json::from_str(text).map_err(|e| BridgeError::invalid(e.to_string()))?;
    let id = raw.id.unwrap_or_else(RequestId::missing);
    let request = match raw.method.as_str() {
        "connect" => {
            let credentials = match raw.params {
                Some(params) => serde_json::from_value(params)
                    .map_err(|e| BridgeError::invalid(format!("connect: {e}")))?,
                None => Credentials::default(),
            };
            SessionRequest::Connect { id, credentials }
        }
        "getURL" => {
            let explicit = raw
                .params
                .map(serde_json::from_value::<GetUrlParams>)
                .transpose()
                .map_err(|e| BridgeError::invalid(format!("getURL: {e}")))?
                .and_then(|params| params.context_id);
            let context = context_from(explicit.as_ref().unwrap_or(&id.0))?;
            SessionRequest::GetUrl { id, context }
        }
        "getContexts" => SessionRequest::GetContexts { id },
        "disconnect" => SessionRequest::Disconnect { id },
        "abort" => SessionRequest::Abort { id },
        other => return Err(BridgeError::invalid(format!("unknown session method `{other}`"))),
    };
    Ok(request)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectReply<'a> {
    result: &'a str,
    solution: &'a str,
    needs_authentication: bool,
    id: &'a RequestId,
}

/// Reply to `connect`; `accepted == false` renders `"ko"`.
///
/// # Errors
///
/// Fails only on serialization failure.
pub fn encode_connect_reply(
    id: &RequestId,
    accepted: bool,
    solution: &str,
    needs_authentication: bool,
) -> BridgeResult<String> {
    Ok(serde_json::to_string(&ConnectReply {
        result: if accepted { "ok" } else { "ko" },
        solution,
        needs_authentication,
        id,
    })?)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SetUrlContext<'a> {
    method: &'static str,
    context_id: String,
    page: u32,
    url: String,
    id: &'a RequestId,
}

/// Reply to `getURL`.
///
/// # Errors
///
/// Fails only on serialization failure.
pub fn encode_set_url_context(id: &RequestId, context: ContextId, page: u32) -> BridgeResult<String> {
    Ok(serde_json::to_string(&SetUrlContext {
        method: "setURLContext",
        context_id: context.to_string(),
        page,
        url: page_path(page),
        id,
    })?)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateContext<'a> {
    method: &'static str,
    context_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    debug_line_nb: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    debug_file_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    debug_reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_line: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exception: Option<&'a str>,
}

/// `updateContext` event offering a context to the client.
///
/// # Errors
///
/// Fails only on serialization failure.
pub fn encode_update_context(context: ContextId, info: Option<&BreakInfo>) -> BridgeResult<String> {
    Ok(serde_json::to_string(&UpdateContext {
        method: "updateContext",
        context_id: context.to_string(),
        debug_line_nb: info.map(|info| info.line),
        debug_file_name: info.map(|info| info.url.as_str()),
        debug_reason: info.map(|info| info.reason.as_wire()),
        source_line: info.and_then(BreakInfo::source_line),
        exception: info.and_then(|info| info.exception.as_deref()),
    })?)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContextEvent {
    method: &'static str,
    context_id: String,
}

/// `removeContext` event: the context ended.
///
/// # Errors
///
/// Fails only on serialization failure.
pub fn encode_remove_context(context: ContextId) -> BridgeResult<String> {
    Ok(serde_json::to_string(&ContextEvent {
        method: "removeContext",
        context_id: context.to_string(),
    })?)
}

/// `hideContext` event: the context was aborted by the bridge.
///
/// # Errors
///
/// Fails only on serialization failure.
pub fn encode_hide_context(context: ContextId) -> BridgeResult<String> {
    Ok(serde_json::to_string(&ContextEvent {
        method: "hideContext",
        context_id: context.to_string(),
    })?)
}

#[derive(Serialize)]
struct SessionReply<'a> {
    result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    id: &'a RequestId,
}

/// Plain `{"result":"ok"}` reply.
///
/// # Errors
///
/// Fails only on serialization failure.
pub fn encode_session_ok(id: &RequestId) -> BridgeResult<String> {
    Ok(serde_json::to_string(&SessionReply {
        result: "ok",
        error: None,
        id,
    })?)
}

/// `{"result":"ko","error":...}` reply.
///
/// # Errors
///
/// Fails only on serialization failure.
pub fn encode_session_error(id: &RequestId, error: &str) -> BridgeResult<String> {
    Ok(serde_json::to_string(&SessionReply {
        result: "ko",
        error: Some(error),
        id,
    })?)
}

/// WebSocket path of page `number`.
#[must_use]
pub fn page_path(number: u32) -> String {
    format!("{PAGE_PATH}{number}")
}

/// Page number addressed by `path`, if it is a page path.
#[must_use]
pub fn parse_page_path(path: &str) -> Option<u32> {
    path.strip_prefix(PAGE_PATH)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn connect_carries_credentials() {
        let request = decode_session_request(
            r#"{"method":"connect","id":"c1","params":{"user":"ann","password":"pw"}}"#,
        )
        .unwrap();
        let SessionRequest::Connect { id, credentials } = request else {
            panic!("expected connect");
        };
        assert_eq!(id, RequestId::from("c1"));
        assert_eq!(credentials.user.as_deref(), Some("ann"));
        assert_eq!(credentials.password.as_deref(), Some("pw"));
    }

    #[test]
    fn get_url_takes_context_from_id_or_params() {
        let from_id = decode_session_request(r#"{"method":"getURL","id":"7"}"#).unwrap();
        assert!(matches!(from_id, SessionRequest::GetUrl { context, .. } if context.as_u64() == 7));

        let from_params =
            decode_session_request(r#"{"method":"getURL","id":1,"params":{"contextId":"9"}}"#)
                .unwrap();
        assert!(
            matches!(from_params, SessionRequest::GetUrl { context, .. } if context.as_u64() == 9)
        );

        assert!(decode_session_request(r#"{"method":"getURL","id":"x"}"#).is_err());
        assert!(decode_session_request(r#"{"method":"nope","id":1}"#).is_err());
    }

    #[test]
    fn set_url_context_shape() {
        let context: ContextId = "2".parse().unwrap();
        let text = encode_set_url_context(&RequestId::from("2"), context, 3).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({
                "method": "setURLContext",
                "contextId": "2",
                "page": 3,
                "url": "/devtools/page/3",
                "id": "2",
            })
        );
        assert_eq!(parse_page_path("/devtools/page/3"), Some(3));
        assert_eq!(parse_page_path("/devtools/other"), None);
    }

    #[test]
    fn update_context_describes_pause() {
        let context: ContextId = "5".parse().unwrap();
        let info = BreakInfo::breakpoint("a.js", 2).with_source("x\ny = \"q\"\n");
        let value: Value =
            serde_json::from_str(&encode_update_context(context, Some(&info)).unwrap()).unwrap();
        assert_eq!(value["debugLineNb"], 2);
        assert_eq!(value["debugFileName"], "a.js");
        assert_eq!(value["sourceLine"], "y = \"q\"");
        assert!(value.get("exception").is_none());

        let bare: Value =
            serde_json::from_str(&encode_update_context(context, None).unwrap()).unwrap();
        assert_eq!(bare, json!({"method": "updateContext", "contextId": "5"}));
    }
}

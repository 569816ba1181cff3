//! Messages exchanged between engine threads and pages.
//!
//! Every message is immutable once built and moves through a
//! [`BoundedQueue`](crate::queue::BoundedQueue) by value.

/// Correlates an engine-bound request with the engine's reply.
pub type Ticket = u64;

/// Why an engine thread paused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PauseReason {
    /// A user breakpoint was hit.
    #[default]
    Breakpoint,
    /// A step command completed.
    Step,
    /// A `debugger` statement was executed.
    DebuggerStatement,
    /// An exception was thrown.
    Exception,
    /// The remote client asked for a pause.
    PauseRequest,
}

impl PauseReason {
    /// Protocol name of the reason, as carried by `Debugger.paused`.
    #[must_use]
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Breakpoint | Self::DebuggerStatement => "other",
            Self::Step => "step",
            Self::Exception => "exception",
            Self::PauseRequest => "debugCommand",
        }
    }

    /// Inverse of [`as_wire`](Self::as_wire). Unknown names map to `Breakpoint`.
    #[must_use]
    pub fn from_wire(name: &str) -> Self {
        match name {
            "step" => Self::Step,
            "exception" => Self::Exception,
            "debugCommand" => Self::PauseRequest,
            _ => Self::Breakpoint,
        }
    }
}

/// Where and why an engine thread stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreakInfo {
    /// Script URL or file name.
    pub url: String,
    /// 1-based line number.
    pub line: u32,
    /// 0-based column.
    pub column: u32,
    /// Why execution stopped.
    pub reason: PauseReason,
    /// Exception description when `reason` is [`PauseReason::Exception`].
    pub exception: Option<String>,
    /// Full source text of the script, if the engine has it.
    pub source: Option<String>,
}

impl BreakInfo {
    /// A plain breakpoint hit at `url:line`.
    #[must_use]
    pub fn breakpoint(url: impl Into<String>, line: u32) -> Self {
        Self {
            url: url.into(),
            line,
            ..Self::default()
        }
    }

    /// Attaches the script source.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Marks the pause as caused by an exception.
    #[must_use]
    pub fn with_exception(mut self, description: impl Into<String>) -> Self {
        self.reason = PauseReason::Exception;
        self.exception = Some(description.into());
        self
    }

    /// Sets the pause reason.
    #[must_use]
    pub fn with_reason(mut self, reason: PauseReason) -> Self {
        self.reason = reason;
        self
    }

    /// Text of the line execution stopped on, when the source is known.
    #[must_use]
    pub fn source_line(&self) -> Option<&str> {
        let index = usize::try_from(self.line.checked_sub(1)?).ok()?;
        self.source.as_deref()?.lines().nth(index)
    }
}

/// Kind of a scope in a call frame's scope chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Function locals.
    Local,
    /// Captured variables.
    Closure,
    /// `catch` block binding.
    Catch,
    /// Block scope.
    Block,
    /// The global object.
    Global,
}

impl ScopeKind {
    /// Protocol name of the scope type.
    #[must_use]
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Closure => "closure",
            Self::Catch => "catch",
            Self::Block => "block",
            Self::Global => "global",
        }
    }
}

/// One frame of an engine call stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFrame {
    /// Function name, empty for top-level code.
    pub function_name: String,
    /// Script URL.
    pub url: String,
    /// 1-based line number.
    pub line: u32,
    /// 0-based column.
    pub column: u32,
    /// Scope chain, innermost first.
    pub scopes: Vec<ScopeKind>,
}

impl CallFrame {
    /// A frame with a local and a global scope.
    #[must_use]
    pub fn new(function_name: impl Into<String>, url: impl Into<String>, line: u32) -> Self {
        Self {
            function_name: function_name.into(),
            url: url.into(),
            line,
            column: 0,
            scopes: vec![ScopeKind::Local, ScopeKind::Global],
        }
    }
}

/// A value as seen by the remote inspector.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteValue {
    /// `undefined`.
    Undefined,
    /// `null`.
    Null,
    /// A boolean.
    Bool(bool),
    /// A number.
    Number(f64),
    /// A string.
    String(String),
    /// An object the client may expand through `object_ref`.
    Object {
        /// Constructor name, e.g. `Array`.
        class_name: String,
        /// Short human readable rendering.
        description: String,
        /// Engine-opaque reference used by later lookups.
        object_ref: String,
    },
    /// A function object.
    Function {
        /// Source-like rendering of the function.
        description: String,
        /// Engine-opaque reference used by later lookups.
        object_ref: String,
    },
}

/// A named property returned by a lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    /// Property name.
    pub name: String,
    /// Property value.
    pub value: RemoteValue,
}

impl Property {
    /// Builds a property.
    #[must_use]
    pub fn new(name: impl Into<String>, value: RemoteValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Outcome of evaluating an expression on a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalResult {
    /// The value, or the thrown value when `was_thrown` is set.
    pub value: RemoteValue,
    /// Whether evaluation threw.
    pub was_thrown: bool,
}

impl EvalResult {
    /// A successful evaluation.
    #[must_use]
    pub fn value(value: RemoteValue) -> Self {
        Self {
            value,
            was_thrown: false,
        }
    }

    /// An evaluation that threw `description`.
    #[must_use]
    pub fn thrown(description: impl Into<String>) -> Self {
        Self {
            value: RemoteValue::String(description.into()),
            was_thrown: true,
        }
    }
}

/// What a lookup should enumerate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupTarget {
    /// The variables of one scope of one frame.
    Scope {
        /// 0-based frame ordinal.
        frame: u32,
        /// 0-based index into the frame's scope chain.
        index: u32,
    },
    /// The properties of an engine object.
    Object(String),
}

/// A command an engine thread executes while paused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    /// Resume execution.
    Continue,
    /// Run to the next line in the same frame.
    StepOver,
    /// Step into the next call.
    StepInto,
    /// Run until the current frame returns.
    StepOut,
    /// Terminate the execution unit.
    Abort,
    /// Reply with the current call stack.
    GetCallStack {
        /// Reply correlation.
        ticket: Ticket,
    },
    /// Evaluate `expression` on frame `frame` and reply.
    Evaluate {
        /// Reply correlation.
        ticket: Ticket,
        /// 0-based frame ordinal.
        frame: u32,
        /// Source text to evaluate.
        expression: String,
    },
    /// Enumerate properties of `target` and reply.
    Lookup {
        /// Reply correlation.
        ticket: Ticket,
        /// What to enumerate.
        target: LookupTarget,
    },
}

impl EngineCommand {
    /// Whether the command lets the engine thread leave the pause.
    #[must_use]
    pub fn resumes(&self) -> bool {
        matches!(
            self,
            Self::Continue | Self::StepOver | Self::StepInto | Self::StepOut | Self::Abort
        )
    }
}

/// A message carried by a page FIFO.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// The engine paused; sent engine → page.
    BreakpointReached(BreakInfo),
    /// Call stack reply; sent engine → page.
    CallStack {
        /// Correlation with the request.
        ticket: Ticket,
        /// Frames, innermost first.
        frames: Vec<CallFrame>,
    },
    /// Lookup reply; sent engine → page.
    Lookup {
        /// Correlation with the request.
        ticket: Ticket,
        /// Enumerated properties.
        properties: Vec<Property>,
    },
    /// Evaluation reply; sent engine → page.
    Eval {
        /// Correlation with the request.
        ticket: Ticket,
        /// Evaluation outcome.
        result: EvalResult,
    },
    /// Script source announcement; sent engine → page.
    SetSource {
        /// Script URL.
        url: String,
        /// Full source text.
        source: String,
    },
    /// A command for the engine; sent page → engine.
    SendEngineCommand(EngineCommand),
    /// Ask the page loop to stop.
    Stop,
    /// Ask the page loop to stop and the engine to abort.
    Abort,
    /// Ask the page loop to let go of its socket; the engine stays paused.
    Detach,
    /// Nothing arrived within the poll window.
    NoMessage,
}

impl Message {
    /// The reply ticket, for reply messages.
    #[must_use]
    pub fn ticket(&self) -> Option<Ticket> {
        match self {
            Self::CallStack { ticket, .. }
            | Self::Lookup { ticket, .. }
            | Self::Eval { ticket, .. } => Some(*ticket),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_line_is_one_based() {
        let info = BreakInfo::breakpoint("a.js", 2).with_source("let a = 1;\nlet b = 2;\n");
        assert_eq!(info.source_line(), Some("let b = 2;"));
        assert_eq!(BreakInfo::breakpoint("a.js", 0).source_line(), None);
    }

    #[test]
    fn pause_reason_wire_names_round_trip() {
        for reason in [
            PauseReason::Breakpoint,
            PauseReason::Step,
            PauseReason::Exception,
            PauseReason::PauseRequest,
        ] {
            assert_eq!(PauseReason::from_wire(reason.as_wire()), reason);
        }
    }

    #[test]
    fn only_flow_commands_resume() {
        assert!(EngineCommand::StepOut.resumes());
        assert!(EngineCommand::Abort.resumes());
        assert!(!EngineCommand::GetCallStack { ticket: 1 }.resumes());
    }
}

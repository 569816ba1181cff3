//! A line-oriented toy script language, just rich enough to be debugged.
//!
//! One statement per line:
//!
//! ```text
//! # comment
//! let total = 0
//! total = total + 1
//! print "total is " + total
//! fn bump
//!   let step = 2
//!   total = total + step
//! end
//! call bump
//! debugger
//! sleep 100
//! throw "boom"
//! ```
//!
//! Expressions are evaluated left to right over numbers and strings with
//! `+`, `-` and `*`; there is no precedence.

use cdp_bridge::{
    BreakInfo, CallFrame, ContextId, DebuggerServer, EngineAdapter, EvalResult, LookupTarget,
    PauseReason, Property, RemoteValue, ResumeAction, ScopeKind, pause_here,
};
use color_eyre::eyre::{self, bail, eyre};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Write;
use std::thread;
use std::time::Duration;

const MAX_DEPTH: usize = 64;

/// A runtime value.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Value {
    Number(f64),
    Str(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl Value {
    fn to_remote(&self) -> RemoteValue {
        match self {
            Self::Number(n) => RemoteValue::Number(*n),
            Self::Str(s) => RemoteValue::String(s.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Add,
    Sub,
    Mul,
}

#[derive(Debug, Clone, PartialEq)]
enum Term {
    Number(f64),
    Str(String),
    Var(String),
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Expr {
    first: Term,
    rest: Vec<(Op, Term)>,
}

fn is_ident(word: &str) -> bool {
    let mut chars = word.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

struct Tokens<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Tokens<'a> {
    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn term(&mut self) -> Result<Term, String> {
        self.skip_whitespace();
        let rest = self.rest();
        if let Some(body) = rest.strip_prefix('"') {
            let end = body
                .find('"')
                .ok_or_else(|| "unterminated string".to_owned())?;
            self.pos += end + 2;
            return Ok(Term::Str(body[..end].to_owned()));
        }
        let len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(format!("expected a value at `{rest}`"));
        }
        let word = &rest[..len];
        self.pos += len;
        if word.starts_with(|c: char| c.is_ascii_digit()) {
            word.parse()
                .map(Term::Number)
                .map_err(|_| format!("bad number `{word}`"))
        } else if is_ident(word) {
            Ok(Term::Var(word.to_owned()))
        } else {
            Err(format!("bad name `{word}`"))
        }
    }

    fn op(&mut self) -> Result<Option<Op>, String> {
        self.skip_whitespace();
        let op = match self.rest().chars().next() {
            None => return Ok(None),
            Some('+') => Op::Add,
            Some('-') => Op::Sub,
            Some('*') => Op::Mul,
            Some(c) => return Err(format!("unexpected `{c}`")),
        };
        self.pos += 1;
        Ok(Some(op))
    }
}

impl Expr {
    pub(crate) fn parse(text: &str) -> Result<Self, String> {
        let mut tokens = Tokens { text, pos: 0 };
        let first = tokens.term()?;
        let mut rest = Vec::new();
        while let Some(op) = tokens.op()? {
            rest.push((op, tokens.term()?));
        }
        Ok(Self { first, rest })
    }

    fn eval(&self, scope: &Scope<'_>) -> Result<Value, String> {
        let mut acc = scope.term(&self.first)?;
        for (op, term) in &self.rest {
            acc = apply(*op, acc, scope.term(term)?)?;
        }
        Ok(acc)
    }
}

fn apply(op: Op, left: Value, right: Value) -> Result<Value, String> {
    match (op, left, right) {
        (Op::Add, Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
        (Op::Add, a, b) => Ok(Value::Str(format!("{a}{b}"))),
        (Op::Sub, Value::Number(a), Value::Number(b)) => Ok(Value::Number(a - b)),
        (Op::Mul, Value::Number(a), Value::Number(b)) => Ok(Value::Number(a * b)),
        (op, a, b) => Err(format!("TypeError: cannot apply {op:?} to `{a}` and `{b}`")),
    }
}

/// Variables visible from one frame.
struct Scope<'s> {
    locals: Option<&'s BTreeMap<String, Value>>,
    globals: &'s BTreeMap<String, Value>,
}

impl Scope<'_> {
    fn term(&self, term: &Term) -> Result<Value, String> {
        match term {
            Term::Number(n) => Ok(Value::Number(*n)),
            Term::Str(s) => Ok(Value::Str(s.clone())),
            Term::Var(name) => self
                .locals
                .and_then(|locals| locals.get(name))
                .or_else(|| self.globals.get(name))
                .cloned()
                .ok_or_else(|| format!("ReferenceError: {name} is not defined")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Stmt {
    Nop,
    Let(String, Expr),
    Assign(String, Expr),
    Print(Expr),
    Debugger,
    Fn { name: String, end: usize },
    End,
    Call(String),
    Throw(Expr),
    Sleep(u64),
}

fn assignment(text: &str, declare: bool) -> Result<Stmt, String> {
    let (name, expr) = text
        .split_once('=')
        .ok_or_else(|| format!("expected `=` in `{text}`"))?;
    let name = name.trim();
    if !is_ident(name) {
        return Err(format!("bad name `{name}`"));
    }
    let expr = Expr::parse(expr)?;
    Ok(if declare {
        Stmt::Let(name.to_owned(), expr)
    } else {
        Stmt::Assign(name.to_owned(), expr)
    })
}

fn parse_line(line: &str) -> Result<Stmt, String> {
    if line.is_empty() || line.starts_with('#') {
        return Ok(Stmt::Nop);
    }
    let (word, rest) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(word, rest)| (word, rest.trim()));
    match word {
        "let" => assignment(rest, true),
        "print" => Expr::parse(rest).map(Stmt::Print),
        "throw" => Expr::parse(rest).map(Stmt::Throw),
        "debugger" if rest.is_empty() => Ok(Stmt::Debugger),
        "end" if rest.is_empty() => Ok(Stmt::End),
        "fn" if is_ident(rest) => Ok(Stmt::Fn {
            name: rest.to_owned(),
            end: 0,
        }),
        "call" if is_ident(rest) => Ok(Stmt::Call(rest.to_owned())),
        "sleep" => rest
            .parse()
            .map(Stmt::Sleep)
            .map_err(|_| format!("bad duration `{rest}`")),
        _ if line.contains('=') => assignment(line, false),
        _ => Err(format!("unknown statement `{line}`")),
    }
}

/// A parsed script.
#[derive(Debug)]
pub(crate) struct Script {
    url: String,
    source: String,
    stmts: Vec<Stmt>,
    /// Function name to the index of its first body line.
    functions: HashMap<String, usize>,
}

impl Script {
    pub(crate) fn parse(url: impl Into<String>, source: impl Into<String>) -> eyre::Result<Self> {
        let (url, source) = (url.into(), source.into());
        let mut stmts = Vec::new();
        let mut functions = HashMap::new();
        let mut open = None;

        for (index, raw) in source.lines().enumerate() {
            let line = index + 1;
            let stmt = parse_line(raw.trim()).map_err(|e| eyre!("{url}:{line}: {e}"))?;
            match &stmt {
                Stmt::Fn { name, .. } => {
                    if open.is_some() {
                        bail!("{url}:{line}: nested functions are not supported");
                    }
                    if functions.insert(name.clone(), index + 1).is_some() {
                        bail!("{url}:{line}: function `{name}` is defined twice");
                    }
                    open = Some(index);
                }
                Stmt::End => {
                    let Some(start) = open.take() else {
                        bail!("{url}:{line}: `end` without `fn`");
                    };
                    if let Some(Stmt::Fn { end, .. }) = stmts.get_mut(start) {
                        *end = index;
                    }
                }
                _ => {}
            }
            stmts.push(stmt);
        }
        if let Some(start) = open {
            bail!("{url}:{}: `fn` without `end`", start + 1);
        }

        Ok(Self {
            url,
            source,
            stmts,
            functions,
        })
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }
}

fn line_of(index: usize) -> u32 {
    u32::try_from(index + 1).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Run,
    Into,
    Over(usize),
    Out(usize),
}

impl Step {
    fn hits(self, depth: usize) -> bool {
        match self {
            Self::Run => false,
            Self::Into => true,
            Self::Over(from) => depth <= from,
            Self::Out(from) => depth < from,
        }
    }
}

#[derive(Debug)]
struct Frame {
    function: String,
    pc: usize,
    line: u32,
    locals: BTreeMap<String, Value>,
}

impl Frame {
    fn new(function: impl Into<String>, pc: usize) -> Self {
        Self {
            function: function.into(),
            pc,
            line: line_of(pc),
            locals: BTreeMap::new(),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    Finished,
    Aborted,
    Thrown(String),
    Failed(String),
}

enum Stop {
    Aborted,
    Thrown(String),
    Failed(String),
}

/// Executes one script in one debugger context.
pub(crate) struct Runner<'a, W> {
    script: &'a Script,
    server: &'a dyn DebuggerServer,
    context: ContextId,
    out: W,
    globals: BTreeMap<String, Value>,
    frames: Vec<Frame>,
    step: Step,
}

impl<'a, W: Write> Runner<'a, W> {
    pub(crate) fn new(
        script: &'a Script,
        server: &'a dyn DebuggerServer,
        context: ContextId,
        out: W,
    ) -> Self {
        Self {
            script,
            server,
            context,
            out,
            globals: BTreeMap::new(),
            frames: Vec::new(),
            step: Step::Run,
        }
    }

    #[cfg(test)]
    pub(crate) fn into_output(self) -> W {
        self.out
    }

    pub(crate) fn run(&mut self) -> Outcome {
        let script = self.script;
        if let Err(err) = self.server.send_source(self.context, &script.url, &script.source) {
            log::debug!("source of {} not announced: {err}", script.url);
        }
        self.frames = vec![Frame::new("", 0)];
        self.globals.clear();
        self.step = Step::Run;

        while let Some(frame) = self.frames.last_mut() {
            let index = frame.pc;
            let Some(stmt) = script.stmts.get(index) else {
                break;
            };
            frame.line = line_of(index);
            let executed = self
                .checkpoint(index, stmt)
                .and_then(|()| self.exec(index, stmt));
            match executed {
                Ok(()) => {}
                Err(Stop::Aborted) => return Outcome::Aborted,
                Err(Stop::Thrown(text)) => return Outcome::Thrown(text),
                Err(Stop::Failed(message)) => {
                    return Outcome::Failed(format!("{}:{}: {message}", script.url, line_of(index)));
                }
            }
        }
        Outcome::Finished
    }

    fn checkpoint(&mut self, index: usize, stmt: &Stmt) -> Result<(), Stop> {
        if matches!(stmt, Stmt::Nop | Stmt::Fn { .. }) {
            return Ok(());
        }
        let line = line_of(index);
        let reason = if matches!(stmt, Stmt::Debugger) {
            PauseReason::DebuggerStatement
        } else if self.server.has_breakpoint(&self.script.url, line) {
            PauseReason::Breakpoint
        } else if self.step.hits(self.frames.len()) {
            PauseReason::Step
        } else if self.server.pause_requested(self.context) {
            PauseReason::PauseRequest
        } else {
            return Ok(());
        };
        self.pause(BreakInfo::breakpoint(self.script.url.as_str(), line).with_reason(reason))
    }

    fn pause(&mut self, info: BreakInfo) -> Result<(), Stop> {
        let depth = self.frames.len();
        let mut inspector = Inspector {
            url: &self.script.url,
            frames: &self.frames,
            globals: &self.globals,
        };
        let info = info.with_source(self.script.source.as_str());
        self.step = match pause_here(self.server, &mut inspector, self.context, info) {
            ResumeAction::Continue => Step::Run,
            ResumeAction::StepInto => Step::Into,
            ResumeAction::StepOver => Step::Over(depth),
            ResumeAction::StepOut => Step::Out(depth),
            ResumeAction::Abort => return Err(Stop::Aborted),
        };
        Ok(())
    }

    fn eval(&self, expr: &Expr) -> Result<Value, Stop> {
        let locals = match self.frames.as_slice() {
            [_, .., top] => Some(&top.locals),
            _ => None,
        };
        expr.eval(&Scope {
            locals,
            globals: &self.globals,
        })
        .map_err(Stop::Failed)
    }

    fn jump(&mut self, pc: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.pc = pc;
        }
    }

    fn exec(&mut self, index: usize, stmt: &Stmt) -> Result<(), Stop> {
        let next = index + 1;
        match stmt {
            Stmt::Nop | Stmt::Debugger => self.jump(next),
            Stmt::Let(name, expr) => {
                let value = self.eval(expr)?;
                match self.frames.as_mut_slice() {
                    [_, .., top] => top.locals.insert(name.clone(), value),
                    _ => self.globals.insert(name.clone(), value),
                };
                self.jump(next);
            }
            Stmt::Assign(name, expr) => {
                let value = self.eval(expr)?;
                match self.frames.as_mut_slice() {
                    [_, .., top] if top.locals.contains_key(name) => {
                        top.locals.insert(name.clone(), value);
                    }
                    _ => {
                        self.globals.insert(name.clone(), value);
                    }
                }
                self.jump(next);
            }
            Stmt::Print(expr) => {
                let text = self.eval(expr)?.to_string();
                if let Err(err) = writeln!(self.out, "{text}") {
                    log::warn!("script output lost: {err}");
                }
                self.server.trace(self.context, &text);
                self.jump(next);
            }
            Stmt::Fn { end, .. } => self.jump(end + 1),
            Stmt::End => {
                self.frames.pop();
            }
            Stmt::Call(name) => {
                let start = *self
                    .script
                    .functions
                    .get(name)
                    .ok_or_else(|| Stop::Failed(format!("ReferenceError: {name} is not defined")))?;
                if self.frames.len() >= MAX_DEPTH {
                    return Err(Stop::Failed("RangeError: call stack exceeded".to_owned()));
                }
                self.jump(next);
                self.frames.push(Frame::new(name.as_str(), start));
            }
            Stmt::Throw(expr) => {
                let text = self.eval(expr)?.to_string();
                let info = BreakInfo::breakpoint(self.script.url.as_str(), line_of(index))
                    .with_exception(text.as_str());
                self.pause(info)?;
                return Err(Stop::Thrown(text));
            }
            Stmt::Sleep(ms) => {
                thread::sleep(Duration::from_millis(*ms));
                self.jump(next);
            }
        }
        Ok(())
    }
}

/// Read-only view of a paused run.
struct Inspector<'s> {
    url: &'s str,
    frames: &'s [Frame],
    globals: &'s BTreeMap<String, Value>,
}

impl Inspector<'_> {
    /// Stack index of the frame with the given ordinal, 0 being innermost.
    fn stack_index(&self, ordinal: u32) -> Option<usize> {
        let ordinal = usize::try_from(ordinal).ok()?;
        self.frames.len().checked_sub(ordinal + 1)
    }
}

impl EngineAdapter for Inspector<'_> {
    fn call_stack(&mut self) -> Vec<CallFrame> {
        self.frames
            .iter()
            .enumerate()
            .rev()
            .map(|(index, frame)| CallFrame {
                scopes: if index == 0 {
                    vec![ScopeKind::Global]
                } else {
                    vec![ScopeKind::Local, ScopeKind::Global]
                },
                ..CallFrame::new(frame.function.as_str(), self.url, frame.line)
            })
            .collect()
    }

    fn evaluate(&mut self, frame: u32, expression: &str) -> EvalResult {
        let Some(index) = self.stack_index(frame) else {
            return EvalResult::thrown(format!("no frame {frame}"));
        };
        let scope = Scope {
            locals: (index > 0).then(|| &self.frames[index].locals),
            globals: self.globals,
        };
        match Expr::parse(expression).and_then(|expr| expr.eval(&scope)) {
            Ok(value) => EvalResult::value(value.to_remote()),
            Err(message) => EvalResult::thrown(message),
        }
    }

    fn lookup(&mut self, target: &LookupTarget) -> Vec<Property> {
        let LookupTarget::Scope { frame, index: scope } = target else {
            return Vec::new();
        };
        let Some(index) = self.stack_index(*frame) else {
            return Vec::new();
        };
        let variables = if index > 0 && *scope == 0 {
            &self.frames[index].locals
        } else {
            self.globals
        };
        variables
            .iter()
            .map(|(name, value)| Property::new(name.as_str(), value.to_remote()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp_bridge::message::Ticket;
    use cdp_bridge::{BridgeResult, DisabledServer, EngineCommand};
    use indoc::indoc;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use test_case::test_case;

    /// Pauses at fixed lines and answers with a scripted list of commands.
    #[derive(Default)]
    struct Scripted {
        breakpoints: Vec<u32>,
        commands: Mutex<VecDeque<EngineCommand>>,
        pauses: Mutex<Vec<(u32, PauseReason)>>,
        stacks: Mutex<Vec<Vec<CallFrame>>>,
        evals: Mutex<Vec<EvalResult>>,
        sources: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(breakpoints: &[u32], commands: impl IntoIterator<Item = EngineCommand>) -> Self {
            Self {
                breakpoints: breakpoints.to_vec(),
                commands: Mutex::new(commands.into_iter().collect()),
                ..Self::default()
            }
        }
    }

    impl DebuggerServer for Scripted {
        fn add_context(&self) -> BridgeResult<ContextId> {
            Ok(ContextId::from(1))
        }

        fn remove_context(&self, _context: ContextId) -> BridgeResult<()> {
            Ok(())
        }

        fn has_breakpoint(&self, _url: &str, line: u32) -> bool {
            self.breakpoints.contains(&line)
        }

        fn breakpoint_reached(&self, _context: ContextId, info: BreakInfo) -> BridgeResult<()> {
            self.pauses.lock().unwrap().push((info.line, info.reason));
            Ok(())
        }

        fn wait_from(&self, _context: ContextId) -> BridgeResult<EngineCommand> {
            Ok(self
                .commands
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(EngineCommand::Continue))
        }

        fn send_call_stack(&self, _: ContextId, _: Ticket, frames: Vec<CallFrame>) -> BridgeResult<()> {
            self.stacks.lock().unwrap().push(frames);
            Ok(())
        }

        fn send_eval(&self, _: ContextId, _: Ticket, result: EvalResult) -> BridgeResult<()> {
            self.evals.lock().unwrap().push(result);
            Ok(())
        }

        fn send_lookup(&self, _: ContextId, _: Ticket, _: Vec<Property>) -> BridgeResult<()> {
            Ok(())
        }

        fn send_source(&self, _: ContextId, url: &str, _: &str) -> BridgeResult<()> {
            self.sources.lock().unwrap().push(url.to_owned());
            Ok(())
        }

        fn trace(&self, _context: ContextId, _text: &str) {}

        fn pause_requested(&self, _context: ContextId) -> bool {
            false
        }
    }

    const BUMP: &str = indoc! {r#"
        let total = 1
        fn bump
          total = total + 1
          total = total * 10
        end
        call bump
        print "total: " + total
    "#};

    fn run(server: &dyn DebuggerServer, source: &str) -> (Outcome, String) {
        let script = Script::parse("test.script", source).unwrap();
        let mut runner = Runner::new(&script, server, ContextId::from(1), Vec::new());
        let outcome = runner.run();
        (outcome, String::from_utf8(runner.into_output()).unwrap())
    }

    #[test]
    fn runs_functions_without_a_debugger() {
        let (outcome, output) = run(&DisabledServer::new(), BUMP);
        assert_eq!(outcome, Outcome::Finished);
        assert_eq!(output, "total: 20\n");
    }

    #[test]
    fn every_run_announces_its_source_first() {
        let server = Scripted::new(&[], []);
        let script = Script::parse("test.script", BUMP).unwrap();
        let mut runner = Runner::new(&script, &server, ContextId::from(1), Vec::new());
        runner.run();
        runner.run();
        assert_eq!(*server.sources.lock().unwrap(), ["test.script", "test.script"]);
    }

    #[test]
    fn steps_into_and_out_of_a_call() {
        let server = Scripted::new(&[6], [EngineCommand::StepInto, EngineCommand::StepOut]);
        let (outcome, output) = run(&server, BUMP);
        assert_eq!(outcome, Outcome::Finished);
        assert_eq!(output, "total: 20\n");
        assert_eq!(
            *server.pauses.lock().unwrap(),
            [
                (6, PauseReason::Breakpoint),
                (3, PauseReason::Step),
                (7, PauseReason::Step),
            ]
        );
    }

    #[test]
    fn step_over_stays_in_the_frame() {
        let server = Scripted::new(&[6], [EngineCommand::StepOver]);
        run(&server, BUMP);
        assert_eq!(
            *server.pauses.lock().unwrap(),
            [(6, PauseReason::Breakpoint), (7, PauseReason::Step)]
        );
    }

    #[test]
    fn paused_call_stack_and_evaluation() {
        let server = Scripted::new(
            &[4],
            [
                EngineCommand::GetCallStack { ticket: 1 },
                EngineCommand::Evaluate {
                    ticket: 2,
                    frame: 0,
                    expression: "total + 1".into(),
                },
            ],
        );
        run(&server, BUMP);

        let stacks = server.stacks.lock().unwrap();
        let names: Vec<_> = stacks[0]
            .iter()
            .map(|frame| (frame.function_name.as_str(), frame.line))
            .collect();
        assert_eq!(names, [("bump", 4), ("", 6)]);
        assert_eq!(
            server.evals.lock().unwrap()[0],
            EvalResult::value(RemoteValue::Number(3.0))
        );
    }

    #[test]
    fn abort_stops_the_run() {
        let server = Scripted::new(&[3], [EngineCommand::Abort]);
        let (outcome, output) = run(&server, BUMP);
        assert_eq!(outcome, Outcome::Aborted);
        assert!(output.is_empty());
    }

    #[test]
    fn throw_pauses_with_the_exception() {
        let server = Scripted::new(&[], []);
        let (outcome, _) = run(&server, "let a = 1\nthrow \"bad \" + a\n");
        assert_eq!(outcome, Outcome::Thrown("bad 1".into()));
        assert_eq!(*server.pauses.lock().unwrap(), [(2, PauseReason::Exception)]);
    }

    #[test]
    fn debugger_statement_pauses() {
        let server = Scripted::new(&[], []);
        run(&server, "print 1\ndebugger\nprint 2\n");
        assert_eq!(
            *server.pauses.lock().unwrap(),
            [(2, PauseReason::DebuggerStatement)]
        );
    }

    #[test_case("1 + 2 * 3", &Value::Number(9.0); "left to right")]
    #[test_case("\"a\" + 1", &Value::Str("a1".into()); "string concatenation")]
    #[test_case("10 - 4", &Value::Number(6.0); "subtraction")]
    fn expressions(text: &str, expected: &Value) {
        let globals = BTreeMap::new();
        let scope = Scope {
            locals: None,
            globals: &globals,
        };
        assert_eq!(&Expr::parse(text).unwrap().eval(&scope).unwrap(), expected);
    }

    #[test_case("let = 3"; "missing name")]
    #[test_case("print \"open"; "unterminated string")]
    #[test_case("end"; "end without fn")]
    #[test_case("fn a\nfn b\nend"; "nested functions")]
    #[test_case("fn a\nprint 1"; "unclosed function")]
    #[test_case("jump 3"; "unknown statement")]
    fn rejects_bad_scripts(source: &str) {
        assert!(Script::parse("bad.script", source).is_err());
    }

    #[test]
    fn unknown_variables_fail_the_run() {
        let (outcome, _) = run(&DisabledServer::new(), "print missing\n");
        assert!(matches!(outcome, Outcome::Failed(message) if message.contains("missing")));
    }
}

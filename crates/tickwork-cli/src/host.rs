//! Runs parsed scripts cooperatively on the simulation thread

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use parking_lot::Mutex;
use tickwork_runtime::{
    content_hash, ExecutionContext, ExpressionEvaluator, ScopeContext, ScopeEvaluator,
    ScriptRuntime, SourceLocation, Value,
};
use tracing::{debug, error, info};

use crate::script::{self, Op, Program};

/// Statements a script may run in one step before it is forced to yield
const MAX_STATEMENTS_PER_STEP: usize = 1_000;

/// Simulated latency of a `fetch`
const FETCH_LATENCY: Duration = Duration::from_millis(20);

pub type Runtime = ScriptRuntime<Program>;

enum RunState {
    Ready,
    Waiting(Arc<AtomicBool>),
    Fetching {
        name: Arc<str>,
        slot: Arc<Mutex<Option<anyhow::Result<Value>>>>,
    },
    Done,
}

pub struct ScriptInstance {
    id: Arc<str>,
    program: Arc<Program>,
    pc: usize,
    returns: Vec<usize>,
    ctx: ScopeContext,
    state: RunState,
}

/// Parse `text`, reusing the cached program if the text hasn't changed
pub fn load_program(rt: &Runtime, script_id: &str, text: &str) -> Result<Arc<Program>> {
    let hash = content_hash(text);
    if let Some(program) = rt.cache().get(script_id, hash) {
        debug!(target: "cache", "Using cached program for {}", script_id);
        return Ok(program);
    }
    let program = script::parse(text, rt.interner())
        .with_context(|| format!("failed to parse {}", script_id))?;
    Ok(rt.cache().put(script_id, hash, program))
}

impl ScriptInstance {
    pub fn from_file(rt: &Runtime, path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow!("invalid script path {}", path.display()))?;
        Self::from_source(rt, id, &text)
    }

    pub fn from_source(rt: &Runtime, script_id: &str, text: &str) -> Result<Self> {
        let program = load_program(rt, script_id, text)?;
        let id = rt.interner().intern(script_id);

        let mut ctx = rt.contexts().borrow();
        let start = program
            .statements
            .first()
            .map_or(SourceLocation::line(1), |s| SourceLocation::line(s.line));
        ctx.push_frame("<main>", &*id, start);

        info!(target: "runtime", "Loaded script {} ({} statements)", id, program.statements.len());
        Ok(Self {
            id,
            program,
            pc: 0,
            returns: Vec::new(),
            ctx,
            state: RunState::Ready,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, RunState::Done)
    }

    pub fn context(&self) -> &ScopeContext {
        &self.ctx
    }

    /// Give the execution context back to the runtime's pool
    pub fn into_context(self) -> ScopeContext {
        self.ctx
    }

    /// Run until the script waits, fetches, finishes or uses up its statement budget
    ///
    /// A runtime error ends the script; the error is logged, not returned.
    pub fn run(&mut self, rt: &Runtime) {
        if !self.poll_blocked() {
            return;
        }
        for _ in 0..MAX_STATEMENTS_PER_STEP {
            if !matches!(self.state, RunState::Ready) {
                return;
            }
            if let Err(e) = self.exec_next(rt) {
                error!(target: "runtime", "Script {} failed: {:#}", self.id, e);
                self.state = RunState::Done;
                return;
            }
        }
        debug!(target: "runtime", "Script {} yielded after {} statements", self.id, MAX_STATEMENTS_PER_STEP);
    }

    /// Returns true if the script is ready to run
    fn poll_blocked(&mut self) -> bool {
        match &self.state {
            RunState::Ready => true,
            RunState::Done => false,
            RunState::Waiting(woken) => {
                if woken.load(Ordering::Acquire) {
                    self.state = RunState::Ready;
                }
                matches!(self.state, RunState::Ready)
            }
            RunState::Fetching { name, slot } => {
                let Some(result) = slot.lock().take() else {
                    return false;
                };
                let name = name.clone();
                match result {
                    Ok(value) => {
                        self.assign(&name, value);
                        self.state = RunState::Ready;
                        true
                    }
                    Err(e) => {
                        error!(target: "runtime", "Script {} fetch of {} failed: {:#}", self.id, name, e);
                        self.state = RunState::Done;
                        false
                    }
                }
            }
        }
    }

    fn exec_next(&mut self, rt: &Runtime) -> Result<()> {
        let program = self.program.clone();
        let Some(stmt) = program.statements.get(self.pc) else {
            info!(target: "runtime", "Script {} finished", self.id);
            self.state = RunState::Done;
            return Ok(());
        };

        let location = SourceLocation::line(stmt.line);
        self.ctx.set_location(location);
        rt.debugger().should_pause(&self.id, location, &self.ctx);
        self.pc += 1;

        match &stmt.op {
            Op::Set { name, expr } => {
                let value = self.eval(expr)?;
                self.assign(name, value);
            }
            Op::Add { name, expr } => {
                let delta = self.eval(expr)?;
                let current = self.ctx.lookup(name).unwrap_or(Value::Int(0));
                self.ctx.assign(name, add(&current, &delta)?);
            }
            Op::Say(expr) => {
                match self.eval(expr)? {
                    Value::Str(text) => println!("[{}] {}", self.id, text),
                    value => println!("[{}] {}", self.id, value),
                }
            }
            Op::Wait(steps) => {
                let woken = Arc::new(AtomicBool::new(false));
                let flag = woken.clone();
                rt.scheduler().schedule_delayed_named(
                    format!("{}:{} wait", self.id, stmt.line),
                    move || flag.store(true, Ordering::Release),
                    *steps,
                );
                self.state = RunState::Waiting(woken);
            }
            Op::Fetch { name, expr } => {
                let value = self.eval(expr)?;
                let slot = Arc::new(Mutex::new(None));
                let sink = slot.clone();
                rt.execute_async_then_main(
                    move || {
                        thread::sleep(FETCH_LATENCY);
                        Ok(value)
                    },
                    move |result| *sink.lock() = Some(result),
                )?;
                self.state = RunState::Fetching {
                    name: name.clone(),
                    slot,
                };
            }
            Op::Call(name) => {
                let Some(&entry) = program.functions.get(name) else {
                    bail!("line {}: undefined function `{}`", stmt.line, name);
                };
                self.returns.push(self.pc);
                self.ctx.push_frame(&**name, &*self.id, location);
                self.pc = entry;
            }
            Op::Define { end } => self.pc = *end,
            Op::Return => {
                let Some(ret) = self.returns.pop() else {
                    bail!("line {}: `end` reached outside a call", stmt.line);
                };
                self.ctx.pop_frame();
                self.pc = ret;
            }
        }
        Ok(())
    }

    fn eval(&self, expr: &str) -> Result<Value> {
        Ok(ScopeEvaluator.evaluate(expr, &self.ctx)?)
    }

    fn assign(&mut self, name: &str, value: Value) {
        if self.returns.is_empty() {
            self.ctx.set_global(name, value);
        } else {
            self.ctx.set(name, value);
        }
    }
}

fn add(lhs: &Value, rhs: &Value) -> Result<Value> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(*b))),
        (Value::Str(a), b) => Ok(Value::Str(format!("{}{}", a, b))),
        _ => match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => Ok(Value::Float(a + b)),
            _ => bail!("cannot add {} to {}", rhs.type_name(), lhs.type_name()),
        },
    }
}

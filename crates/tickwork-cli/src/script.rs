//! Parser for the line-oriented demo script format
//!
//! ```text
//! # comment
//! set hp = 10          assign (global at top level, local inside a function)
//! add hp -3            add a number to a variable
//! say hp < 5           print the value of an expression
//! wait 4               sleep for 4 simulation steps
//! fetch loot = "gold"  resolve a value on the worker pool
//! fn heal ... end      define a function
//! call heal            call it
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tickwork_runtime::StringInterner;

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Set { name: Arc<str>, expr: String },
    Add { name: Arc<str>, expr: String },
    Say(String),
    Wait(i64),
    Fetch { name: Arc<str>, expr: String },
    Call(Arc<str>),
    /// Start of a function body; top-level execution jumps to `end`
    Define { end: usize },
    Return,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub line: u32,
    pub op: Op,
}

/// A parsed script, shared through the script cache
#[derive(Debug, Default)]
pub struct Program {
    pub statements: Vec<Stmt>,
    /// Function name to the index of its first body statement
    pub functions: HashMap<Arc<str>, usize>,
}

pub fn parse(text: &str, interner: &StringInterner) -> Result<Program> {
    let mut program = Program::default();
    let mut open_fn: Option<(usize, u32)> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line = idx as u32 + 1;
        let source = raw.trim();
        if source.is_empty() || source.starts_with('#') {
            continue;
        }

        let (keyword, rest) = source
            .split_once(char::is_whitespace)
            .map(|(k, r)| (k, r.trim()))
            .unwrap_or((source, ""));

        let op = match keyword {
            "set" => {
                let (name, expr) = assignment(rest, interner).with_context(|| at(line))?;
                Op::Set { name, expr }
            }
            "fetch" => {
                let (name, expr) = assignment(rest, interner).with_context(|| at(line))?;
                Op::Fetch { name, expr }
            }
            "add" => {
                let (name, expr) = rest
                    .split_once(char::is_whitespace)
                    .with_context(|| format!("{}: expected `add <name> <expr>`", at(line)))?;
                Op::Add {
                    name: interner.intern(name),
                    expr: expr.trim().to_string(),
                }
            }
            "say" => Op::Say(rest.to_string()),
            "wait" => Op::Wait(
                rest.parse()
                    .with_context(|| format!("{}: invalid step count `{}`", at(line), rest))?,
            ),
            "call" => Op::Call(interner.intern(identifier(rest).with_context(|| at(line))?)),
            "fn" => {
                if open_fn.is_some() {
                    bail!("{}: nested functions are not supported", at(line));
                }
                let name = interner.intern(identifier(rest).with_context(|| at(line))?);
                let start = program.statements.len();
                program.functions.insert(name, start + 1);
                open_fn = Some((start, line));
                Op::Define { end: start }
            }
            "end" => {
                let Some((start, _)) = open_fn.take() else {
                    bail!("{}: `end` without `fn`", at(line));
                };
                let end = program.statements.len() + 1;
                program.statements[start].op = Op::Define { end };
                Op::Return
            }
            other => bail!("{}: unknown statement `{}`", at(line), other),
        };
        program.statements.push(Stmt { line, op });
    }

    if let Some((_, line)) = open_fn {
        bail!("{}: function is missing `end`", at(line));
    }
    for stmt in &program.statements {
        if let Op::Call(name) = &stmt.op {
            if !program.functions.contains_key(name) {
                bail!("{}: call to undefined function `{}`", at(stmt.line), name);
            }
        }
    }
    Ok(program)
}

fn at(line: u32) -> String {
    format!("line {}", line)
}

fn assignment(rest: &str, interner: &StringInterner) -> Result<(Arc<str>, String)> {
    let (name, expr) = rest
        .split_once('=')
        .context("expected `<name> = <expr>`")?;
    let expr = expr.trim();
    if expr.is_empty() {
        bail!("missing expression");
    }
    Ok((interner.intern(identifier(name.trim())?), expr.to_string()))
}

fn identifier(s: &str) -> Result<&str> {
    let valid = s
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        bail!("invalid name `{}`", s);
    }
    Ok(s)
}

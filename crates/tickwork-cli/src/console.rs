//! Interactive debugger console driven from stdin

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context, Result};
use tickwork_events::DebugEvent;
use tickwork_runtime::Debugger;
use tracing::{debug, warn};

const HELP: &str = "\
commands:
  c | continue          resume until the next breakpoint
  n | next              step over
  s | step              step into
  o | out               step out
  p <name>              print a variable
  vars                  print every variable in scope
  bt                    print the call stack
  w <expr>              add a watch expression
  b <script>:<line> [condition]
                        add a breakpoint
  d <script>:<line>     delete a breakpoint
  q | quit              disable the debugger and run to the end";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Continue,
    StepOver,
    StepInto,
    StepOut,
    Print(String),
    Variables,
    Backtrace,
    Watch(String),
    Break {
        script_id: String,
        line: u32,
        condition: Option<String>,
    },
    Delete {
        script_id: String,
        line: u32,
    },
    Quit,
    Help,
}

impl Command {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let (word, rest) = input
            .split_once(char::is_whitespace)
            .map(|(w, r)| (w, r.trim()))
            .unwrap_or((input, ""));

        let command = match word {
            "c" | "continue" => Command::Continue,
            "n" | "next" => Command::StepOver,
            "s" | "step" => Command::StepInto,
            "o" | "out" => Command::StepOut,
            "vars" => Command::Variables,
            "bt" => Command::Backtrace,
            "q" | "quit" => Command::Quit,
            "h" | "help" | "?" => Command::Help,
            "p" | "print" if !rest.is_empty() => Command::Print(rest.to_string()),
            "w" | "watch" if !rest.is_empty() => Command::Watch(rest.to_string()),
            "b" | "break" => {
                let (target, condition) = rest
                    .split_once(char::is_whitespace)
                    .map(|(t, c)| (t, Some(c.trim().to_string())))
                    .unwrap_or((rest, None));
                let (script_id, line) = parse_location(target)?;
                Command::Break {
                    script_id,
                    line,
                    condition,
                }
            }
            "d" | "delete" => {
                let (script_id, line) = parse_location(rest)?;
                Command::Delete { script_id, line }
            }
            _ => bail!("unknown command `{}`, try `help`", input),
        };
        Ok(command)
    }
}

/// Parse `SCRIPT:LINE`
pub fn parse_location(s: &str) -> Result<(String, u32)> {
    let (script_id, line) = s
        .rsplit_once(':')
        .with_context(|| format!("expected SCRIPT:LINE, got `{}`", s))?;
    if script_id.is_empty() {
        bail!("missing script name in `{}`", s);
    }
    let line = line
        .parse()
        .with_context(|| format!("invalid line number `{}`", line))?;
    Ok((script_id.to_string(), line))
}

/// Print pause notifications and read commands on a background thread
///
/// The simulation thread blocks while paused, so commands have to come from
/// another thread.
pub fn spawn(debugger: Arc<Debugger>) -> io::Result<thread::JoinHandle<()>> {
    debugger.add_listener(|event: &DebugEvent| match event {
        DebugEvent::Paused {
            script_id,
            location,
            reason,
        } => {
            eprintln!("paused at {}:{} ({:?})", script_id, location, reason);
            eprint!("(debug) ");
            let _ = io::stderr().flush();
        }
        DebugEvent::WatchUpdated {
            expression,
            value,
            error,
            ..
        } => match (value, error) {
            (Some(value), _) => eprintln!("  watch {} = {}", expression, value),
            (None, Some(error)) => eprintln!("  watch {} failed: {}", expression, error),
            (None, None) => {}
        },
        _ => {}
    });

    thread::Builder::new()
        .name("tickwork-console".into())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match Command::parse(&line) {
                    Ok(Command::Quit) => {
                        debugger.set_enabled(false);
                        break;
                    }
                    Ok(command) => {
                        if let Err(e) = execute(&debugger, command) {
                            eprintln!("{:#}", e);
                        }
                    }
                    Err(e) => eprintln!("{:#}", e),
                }
            }
            debug!(target: "debugger", "Console input closed");
        })
}

fn execute(debugger: &Debugger, command: Command) -> Result<()> {
    match command {
        Command::Continue => debugger.resume()?,
        Command::StepOver => debugger.step_over()?,
        Command::StepInto => debugger.step_into()?,
        Command::StepOut => debugger.step_out()?,
        Command::Print(name) => match debugger.inspect_variable(&name) {
            Some(value) => eprintln!("{} = {} ({})", name, value, value.type_name()),
            None if debugger.is_paused() => eprintln!("{} is not defined", name),
            None => bail!("not paused"),
        },
        Command::Variables => {
            if !debugger.is_paused() {
                bail!("not paused");
            }
            for (name, value) in debugger.inspect_all_variables() {
                eprintln!("{} = {}", name, value);
            }
        }
        Command::Backtrace => {
            for (depth, frame) in debugger.get_call_stack().iter().rev().enumerate() {
                eprintln!("#{} {} at {}:{}", depth, frame.function, frame.script_id, frame.location);
            }
        }
        Command::Watch(expression) => {
            let id = debugger.add_watch(expression);
            if let Some(watch) = debugger.watches().iter().find(|w| w.id == id) {
                eprintln!("watch {}: {} = {}", id, watch.expression, watch.display_value());
            }
        }
        Command::Break {
            script_id,
            line,
            condition,
        } => {
            if !debugger.add_breakpoint(&script_id, line, condition) {
                warn!(target: "debugger", "Replaced existing breakpoint at {}:{}", script_id, line);
            }
        }
        Command::Delete { script_id, line } => {
            if !debugger.remove_breakpoint(&script_id, line) {
                bail!("no breakpoint at {}:{}", script_id, line);
            }
        }
        Command::Help => eprintln!("{}", HELP),
        Command::Quit => debugger.set_enabled(false),
    }
    Ok(())
}

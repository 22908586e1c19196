use std::cell::{Cell, RefCell};

use anyhow::Result;
use url::Url;

use crate::exec::{CommandOutput, CommandRunner, ExternalCommand, OutputMode};
use crate::registry::ReadinessProbe;

type Responder = Box<dyn Fn(&ExternalCommand) -> CommandOutput>;

/// Records every invocation and answers from a closure. In `Tee` mode the
/// answer's stdout is written to the log file like a real build would.
pub struct FakeRunner {
    calls: RefCell<Vec<ExternalCommand>>,
    responder: Responder,
}

impl FakeRunner {
    pub fn new(responder: impl Fn(&ExternalCommand) -> CommandOutput + 'static) -> FakeRunner {
        FakeRunner {
            calls: RefCell::new(Vec::new()),
            responder: Box::new(responder),
        }
    }

    pub fn succeeding() -> FakeRunner {
        FakeRunner::new(|_| ok(""))
    }

    pub fn calls(&self) -> Vec<ExternalCommand> {
        self.calls.borrow().clone()
    }

    pub fn call_lines(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c.to_string()).collect()
    }

    pub fn position(&self, prefix: &[&str]) -> Option<usize> {
        self.calls.borrow().iter().position(|c| c.starts_with(prefix))
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, command: &ExternalCommand, mode: &OutputMode) -> Result<CommandOutput> {
        self.calls.borrow_mut().push(command.clone());
        let output = (self.responder)(command);
        if let OutputMode::Tee(log_path) = mode {
            std::fs::write(log_path, &output.stdout)?;
        }
        Ok(output)
    }
}

pub fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        status: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn failed(status: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        status,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

/// Becomes ready on the given attempt (1-based), or never.
pub struct ScriptedProbe {
    ready_on: Option<u32>,
    attempts: Cell<u32>,
}

impl ScriptedProbe {
    pub fn ready_on(attempt: u32) -> ScriptedProbe {
        ScriptedProbe {
            ready_on: Some(attempt),
            attempts: Cell::new(0),
        }
    }

    pub fn never() -> ScriptedProbe {
        ScriptedProbe {
            ready_on: None,
            attempts: Cell::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.get()
    }
}

impl ReadinessProbe for ScriptedProbe {
    fn is_ready(&self, _url: &Url) -> bool {
        let attempt = self.attempts.get() + 1;
        self.attempts.set(attempt);
        self.ready_on.map(|n| attempt >= n).unwrap_or(false)
    }
}

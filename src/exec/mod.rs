use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use log::debug;

#[cfg(test)]
pub mod fake;

/// An external program invocation, e.g. `docker image inspect ubuntu:20.04`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
}

impl ExternalCommand {
    pub fn new(program: &str) -> ExternalCommand {
        ExternalCommand {
            program: program.to_string(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn docker() -> ExternalCommand {
        ExternalCommand::new("docker")
    }

    pub fn arg(mut self, arg: impl Into<String>) -> ExternalCommand {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> ExternalCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> ExternalCommand {
        self.envs.push((key.to_string(), value.to_string()));
        self
    }

    /// Leading arguments, handy for matching in fakes: `starts_with(&["image", "inspect"])`.
    #[cfg(test)]
    pub fn starts_with(&self, prefix: &[&str]) -> bool {
        self.args.len() >= prefix.len() && self.args.iter().zip(prefix).all(|(a, p)| a == p)
    }
}

impl Display for ExternalCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// What to do with the child's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputMode {
    /// Keep it in memory and hand it back.
    Capture,
    /// Stream stdout+stderr line by line to the terminal and append to the file.
    Tee(PathBuf),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Runs external tools. The only seam between orchestration and the host.
pub trait CommandRunner {
    /// Runs the command to completion. A non-zero exit is reported through
    /// [`CommandOutput::status`]; `Err` means the command could not be run at all.
    fn run(&self, command: &ExternalCommand, mode: &OutputMode) -> Result<CommandOutput>;
}

pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, command: &ExternalCommand, mode: &OutputMode) -> Result<CommandOutput> {
        debug!("Running: {}", command);
        let mut process = Command::new(&command.program);
        process.args(&command.args);
        for (key, value) in &command.envs {
            process.env(key, value);
        }
        match mode {
            OutputMode::Capture => {
                let output = process
                    .stdin(Stdio::null())
                    .output()
                    .with_context(|| format!("failed to execute '{}'", command.program))?;
                Ok(CommandOutput {
                    status: exit_code(output.status),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
            OutputMode::Tee(log_path) => tee(process, command, log_path),
        }
    }
}

fn tee(mut process: Command, command: &ExternalCommand, log_path: &Path) -> Result<CommandOutput> {
    let mut log_file =
        File::create(log_path).with_context(|| format!("can not create log file '{}'", log_path.display()))?;
    let mut child = process
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to execute '{}'", command.program))?;
    let stdout = child.stdout.take().ok_or_else(|| anyhow!("child stdout not captured"))?;
    let stderr = child.stderr.take().ok_or_else(|| anyhow!("child stderr not captured"))?;

    let (sender, receiver) = mpsc::channel::<String>();
    let readers = vec![forward_lines(stdout, sender.clone()), forward_lines(stderr, sender)];

    // Keep draining after a failed write so the child never blocks on a full pipe.
    let mut terminal = std::io::stdout().lock();
    let mut combined = String::new();
    let mut write_error = None;
    for line in receiver {
        if write_error.is_none() {
            write_error = write_line(&mut terminal, &mut log_file, &line).err();
        }
        combined.push_str(&line);
    }
    let reader_panicked = readers.into_iter().fold(false, |panicked, reader| reader.join().is_err() || panicked);
    let status = child.wait()?;
    if let Err(err) = log_file.flush() {
        write_error.get_or_insert(err);
    }
    if let Some(err) = write_error {
        return Err(anyhow!(err).context(format!(
            "writing output of '{}' failed (exit code {})",
            command.program,
            exit_code(status)
        )));
    }
    if reader_panicked {
        return Err(anyhow!("output reader of '{}' panicked (exit code {})", command.program, exit_code(status)));
    }
    Ok(CommandOutput {
        status: exit_code(status),
        stdout: combined,
        stderr: String::new(),
    })
}

fn write_line(terminal: &mut impl Write, log_file: &mut File, line: &str) -> std::io::Result<()> {
    terminal.write_all(line.as_bytes())?;
    terminal.flush()?;
    log_file.write_all(line.as_bytes())
}

fn forward_lines<R: Read + Send + 'static>(stream: R, sender: mpsc::Sender<String>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if sender.send(line.clone()).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.code().or_else(|| status.signal().map(|s| 128 + s)).unwrap_or(1)
}

//! External process boundary -- every collection step goes through a `CommandRunner`.

use std::fmt;
use std::io;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

/// How an external command is invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    /// Passed verbatim to `<shell> -c`, so pipes, quotes and globs work.
    Shell(String),
    /// Spawned directly: program followed by its arguments.
    Args(Vec<String>),
}

impl CommandLine {
    pub fn shell(cmd: impl Into<String>) -> Self {
        CommandLine::Shell(cmd.into())
    }

    pub fn args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandLine::Args(args.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandLine::Shell(cmd) => write!(f, "{}", cmd),
            CommandLine::Args(args) => write!(f, "{}", args.join(" ")),
        }
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Trait for anything that can run a command to completion and capture its output.
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the command and wait for it to exit.
    /// An `Err` means the process could not be spawned at all.
    async fn run(&self, cmd: &CommandLine) -> io::Result<CommandOutput>;
}

/// Runs commands on the local machine through `tokio::process`.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new("/bin/sh")
    }
}

#[async_trait::async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, cmd: &CommandLine) -> io::Result<CommandOutput> {
        let mut command = match cmd {
            CommandLine::Shell(line) => {
                let mut c = Command::new(&self.shell);
                c.arg("-c").arg(line);
                c
            }
            CommandLine::Args(args) => {
                let (program, rest) = args.split_first().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, "empty argument list")
                })?;
                let mut c = Command::new(program);
                c.args(rest);
                c
            }
        };

        // Own process group: a terminal Ctrl-C reaches this tool, not the
        // running command, so a started step finishes with complete output.
        #[cfg(unix)]
        command.process_group(0);

        debug!(command = %cmd, "spawning");
        let out = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        Ok(CommandOutput {
            stdout: out.stdout,
            stderr: out.stderr,
            exit_code: out.status.code(),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording fake used by the pipeline tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeRunner {
        pub calls: Mutex<Vec<CommandLine>>,
        responses: HashMap<String, io::Result<CommandOutput>>,
    }

    impl FakeRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(mut self, cmd: &str, stdout: &str, stderr: &str, code: i32) -> Self {
            self.responses.insert(
                cmd.to_string(),
                Ok(CommandOutput {
                    stdout: stdout.as_bytes().to_vec(),
                    stderr: stderr.as_bytes().to_vec(),
                    exit_code: Some(code),
                }),
            );
            self
        }

        pub fn fail_spawn(mut self, cmd: &str) -> Self {
            self.responses.insert(
                cmd.to_string(),
                Err(io::Error::new(io::ErrorKind::NotFound, "no such file")),
            );
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn recorded(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|c| c.to_string())
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(&self, cmd: &CommandLine) -> io::Result<CommandOutput> {
            self.calls.lock().unwrap().push(cmd.clone());
            match self.responses.get(&cmd.to_string()) {
                Some(Ok(out)) => Ok(out.clone()),
                Some(Err(e)) => Err(io::Error::new(e.kind(), e.to_string())),
                None => Ok(CommandOutput {
                    exit_code: Some(0),
                    ..Default::default()
                }),
            }
        }
    }
}

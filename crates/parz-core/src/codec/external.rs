use std::io::{self, Write};
use std::process::{Command, Stdio};
use std::thread;

use crate::ParzError;
use crate::telemetry::tags;
use crate::types::Result;

/// A stand-alone compression program used when no in-process routine exists.
///
/// Raw bytes are written to the program's stdin and the compressed member is
/// captured from its stdout. A non-zero exit status is reported as
/// [`ParzError::ExternalProcess`] together with whatever the program printed
/// on stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    program: String,
    args: Vec<String>,
}

impl ExternalCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Checks that the program can be spawned at all.
    ///
    /// Any exit status counts as success; only a spawn failure (typically
    /// `NotFound`) is reported.
    pub fn probe(&self) -> std::result::Result<(), String> {
        let spawned = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match spawned {
            Ok(status) => {
                tracing::debug!(
                    target: tags::TARGET_CODEC,
                    program = %self.program,
                    %status,
                    "external compressor probed"
                );
                Ok(())
            }
            Err(err) => Err(format!("cannot run `{}`: {err}", self.program)),
        }
    }

    /// Runs the program over `input` and returns everything it wrote to stdout.
    pub fn run(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| self.failure(format!("spawn failed: {err}"), String::new()))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.failure("stdin unavailable".to_string(), String::new()))?;

        // stdin is fed from a second thread so a full stdout pipe cannot deadlock us.
        let (output, fed) = thread::scope(|scope| {
            let feeder = scope.spawn(move || -> io::Result<()> {
                stdin.write_all(input)?;
                stdin.flush()
            });
            let output = child.wait_with_output();
            (output, feeder.join())
        });

        let output = output?;
        if !output.status.success() {
            return Err(self.failure(
                output.status.to_string(),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        match fed {
            Ok(Ok(())) => Ok(output.stdout),
            Ok(Err(err)) => Err(ParzError::from(err)
                .with_context(format!("feeding input to `{}`", self.program))),
            Err(_) => Err(ParzError::CompressionError(format!(
                "stdin feeder for `{}` panicked",
                self.program
            ))),
        }
    }

    fn failure(&self, status: String, stderr: String) -> ParzError {
        ParzError::ExternalProcess {
            program: self.program.clone(),
            status,
            stderr,
        }
    }
}

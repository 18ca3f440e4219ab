use super::LandmarkProvider;
use crate::{
    config::DetectorSettings,
    error::Error,
    pose::{Pose, PoseDocument},
};
use std::{
    io::{self, ErrorKind, Read, Write},
    path::PathBuf,
    process::{Child, Command, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use tracing::{debug, instrument, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A landmark detector run as a child process.
///
/// The encoded image is written to the child's stdin. The child answers on stdout with a single
/// JSON pose document, or `null` when nobody is in frame. On unix the child leads its own process
/// group, so a detector that overruns its deadline is killed along with anything it spawned.
#[derive(Debug, Clone)]
pub(crate) struct ExternalDetector {
    program: PathBuf,
    args: Vec<String>,
}

impl ExternalDetector {
    pub(crate) fn new(settings: &DetectorSettings) -> Result<Self, Error> {
        let program = &settings.program;
        if program.as_os_str().is_empty() {
            return Err(Error::EmptyDetectorProgram);
        }
        // bare names are resolved through PATH at spawn time
        let program = if program.components().count() > 1 {
            program
                .canonicalize()
                .map_err(|e| Error::CanonicalizePath(e, program.clone()))?
        } else {
            program.clone()
        };
        Ok(Self {
            program,
            args: settings.args.clone(),
        })
    }

    fn spawn(&self) -> Result<Child, Error> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        command
            .spawn()
            .map_err(|e| Error::SpawnDetector(e, self.program.clone()))
    }
}

fn feed(mut stdin: impl Write + Send + 'static, image: Vec<u8>) -> JoinHandle<io::Result<()>> {
    thread::spawn(move || match stdin.write_all(&image) {
        // the exit status says whether the detector actually failed
        Err(e) if e.kind() == ErrorKind::BrokenPipe => {
            debug!(message = "detector closed stdin early");
            Ok(())
        }
        result => result,
    })
}

fn drain(mut pipe: impl Read + Send + 'static) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn join<T>(handle: JoinHandle<io::Result<T>>) -> Result<io::Result<T>, Error> {
    handle.join().map_err(|_| Error::DetectorDisconnected)
}

/// Kill `child` and its process group, then reap it.
fn terminate(child: &mut Child) -> Result<(), Error> {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        if let Err(e) = Command::new("kill")
            .args(["-KILL", "--", group.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            debug!(message = "failed to signal detector process group", error = %e);
        }
    }
    match child.kill() {
        // already exited
        Err(e) if e.kind() == ErrorKind::InvalidInput => {}
        result => result.map_err(Error::KillDetector)?,
    }
    child.wait().map_err(Error::WaitDetector)?;
    Ok(())
}

impl LandmarkProvider for ExternalDetector {
    #[instrument(name = "ExternalDetector::detect", skip(self, image), fields(program = ?self.program, bytes = image.len()))]
    fn detect(&self, image: &[u8], timeout: Duration) -> Result<Option<Pose>, Error> {
        let deadline = Instant::now() + timeout;
        let mut child = self.spawn()?;

        let writer = feed(
            child.stdin.take().ok_or(Error::GetDetectorPipe("stdin"))?,
            image.to_vec(),
        );
        let stdout = drain(child.stdout.take().ok_or(Error::GetDetectorPipe("stdout"))?);
        let stderr = drain(child.stderr.take().ok_or(Error::GetDetectorPipe("stderr"))?);

        let status = loop {
            if let Some(status) = child.try_wait().map_err(Error::WaitDetector)? {
                break status;
            }
            if Instant::now() >= deadline {
                terminate(&mut child)?;
                warn!(
                    message = "killed detector after timeout",
                    timeout_ms = timeout.as_millis() as u64
                );
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL);
        };

        join(writer)?.map_err(Error::WriteDetectorInput)?;
        let stdout = join(stdout)?.map_err(Error::ReadDetectorOutput)?;
        let stderr = join(stderr)?.map_err(Error::ReadDetectorOutput)?;

        if !status.success() {
            return Err(Error::DetectorExit(
                status,
                String::from_utf8_lossy(&stderr).trim().to_owned(),
            ));
        }

        let document: Option<PoseDocument> =
            serde_json::from_slice(&stdout).map_err(Error::ParseDetectorOutput)?;
        debug!(message = "detector finished", found = document.is_some());
        document.map(Pose::try_from).transpose()
    }
}

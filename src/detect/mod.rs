use crate::{error::Error, pose::Pose};
use std::{
    sync::{mpsc, Arc},
    thread,
    time::Duration,
};
use tracing::warn;

mod external;

pub(crate) use external::ExternalDetector;

pub(crate) trait LandmarkProvider {
    /// Detect the most prominent pose in an encoded image, or `None` if nobody is in frame.
    ///
    /// A detection still running after `timeout` is abandoned, releasing whatever it holds, and
    /// reported as `None`.
    fn detect(&self, image: &[u8], timeout: Duration) -> Result<Option<Pose>, Error>;
}

/// How long past its own deadline a provider gets to clean up before it is given up on.
const GRACE: Duration = Duration::from_millis(250);

/// Run `provider` on `image`, treating a detection that outlasts `timeout` as no pose.
///
/// A provider that ignores its deadline is left running on its own thread once the grace period
/// ends; its result is dropped.
pub(crate) fn detect_within<P>(
    provider: &Arc<P>,
    image: Vec<u8>,
    timeout: Duration,
) -> Result<Option<Pose>, Error>
where
    P: LandmarkProvider + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::channel();
    let provider = Arc::clone(provider);

    thread::spawn(move || {
        // the receiver is gone if we already timed out
        let _ = tx.send(provider.detect(&image, timeout));
    });

    match rx.recv_timeout(timeout + GRACE) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            warn!(
                message = "detector timed out",
                timeout_ms = timeout.as_millis() as u64
            );
            Ok(None)
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::DetectorDisconnected),
    }
}

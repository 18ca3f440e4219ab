use crate::pose::KeypointKind;
use std::{path::PathBuf, process::ExitStatus};

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("failed to construct NotNan from f32: {1}")]
    ConstructNotNan(#[source] ordered_float::FloatIsNan, f32),

    #[error("coordinate is infinite: {0}")]
    InfiniteCoordinate(f32),

    #[error("{0} must be within [0, 1], got {1}")]
    ConfidenceOutOfRange(&'static str, f32),

    #[error("failed to convert usize value to keypoint kind: {0}")]
    ConvertUSizeToKeypointKind(usize),

    #[error("expected 17 (COCO) or 33 (BlazePose) unnamed landmarks, got {0}")]
    LandmarkCount(usize),

    #[error("landmark appears more than once: {0:?}")]
    DuplicateLandmark(KeypointKind),

    #[error("landmark is missing from pose: {0:?}")]
    MissingLandmark(KeypointKind),

    #[error("pose mixes named and unnamed landmarks")]
    MixedLandmarkNames,

    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),

    #[error("failed to parse request: {1:?}")]
    ParseRequest(#[source] serde_json::Error, PathBuf),

    #[error("failed to decode base64 image data")]
    DecodeBase64(#[source] base64::DecodeError),

    #[error("image is {0} bytes, larger than the {1} byte limit")]
    ImageTooLarge(usize, usize),

    #[error("image is empty")]
    EmptyImage,

    #[error("failed to read input: {1:?}")]
    ReadInput(#[source] std::io::Error, PathBuf),

    #[error("failed to canonicalize path: {1:?}")]
    CanonicalizePath(#[source] std::io::Error, PathBuf),

    #[error("an image was given but no detector is configured")]
    NoDetectorConfigured,

    #[error("detector program must not be empty")]
    EmptyDetectorProgram,

    #[error("failed to spawn detector: {1:?}")]
    SpawnDetector(#[source] std::io::Error, PathBuf),

    #[error("detector {0} was not piped")]
    GetDetectorPipe(&'static str),

    #[error("failed to write image to detector")]
    WriteDetectorInput(#[source] std::io::Error),

    #[error("failed to wait for detector")]
    WaitDetector(#[source] std::io::Error),

    #[error("failed to kill detector")]
    KillDetector(#[source] std::io::Error),

    #[error("failed to read detector output")]
    ReadDetectorOutput(#[source] std::io::Error),

    #[error("detector exited with {0}: {1}")]
    DetectorExit(ExitStatus, String),

    #[error("failed to parse detector output")]
    ParseDetectorOutput(#[source] serde_json::Error),

    #[error("detector thread exited without producing a result")]
    DetectorDisconnected,

    #[error("failed to read config file: {1:?}")]
    ReadConfig(#[source] std::io::Error, PathBuf),

    #[error("failed to parse config file: {1:?}")]
    ParseConfig(#[source] toml::de::Error, PathBuf),

    #[error("invalid setting {0}: {1}")]
    InvalidSetting(&'static str, String),

    #[error("failed to open session log: {1:?}")]
    OpenSessionLog(#[source] std::io::Error, PathBuf),

    #[error("failed to write session record")]
    WriteSessionRecord(#[source] std::io::Error),

    #[error("failed to serialize session record")]
    SerializeSessionRecord(#[source] serde_json::Error),

    #[error("failed to parse session record on line {1}")]
    ParseSessionRecord(#[source] serde_json::Error, usize),
}

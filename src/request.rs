use crate::{
    error::Error,
    pose::{Pose, PoseDocument},
};
use base64::Engine as _;
use serde::Deserialize;

/// A single analysis request: either an encoded image or an already-detected pose.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct AnalyzeRequest {
    /// Base64 image data, optionally wrapped in a `data:` URL.
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    pose: Option<PoseDocument>,
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Input {
    Image(Vec<u8>),
    Pose(Pose),
}

impl AnalyzeRequest {
    pub(crate) fn validate(self, max_image_bytes: usize) -> Result<Input, Error> {
        match (self.image, self.pose) {
            (Some(image), None) => decode_image(&image, max_image_bytes).map(Input::Image),
            (None, Some(pose)) => Pose::try_from(pose).map(Input::Pose),
            _ => Err(Error::InvalidRequest(
                "exactly one of `image` or `pose` is required",
            )),
        }
    }
}

/// Decode base64 image data, stripping a `data:<mime>;base64,` prefix if present.
pub(crate) fn decode_image(data: &str, max_image_bytes: usize) -> Result<Vec<u8>, Error> {
    let payload = data
        .split_once(',')
        .map_or(data, |(_, payload)| payload)
        .trim();

    // reject before decoding; every four base64 characters carry three bytes
    let estimate = payload.len() / 4 * 3;
    if estimate > max_image_bytes + 2 {
        return Err(Error::ImageTooLarge(estimate, max_image_bytes));
    }

    let image = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(Error::DecodeBase64)?;
    check_image(image, max_image_bytes)
}

pub(crate) fn check_image(image: Vec<u8>, max_image_bytes: usize) -> Result<Vec<u8>, Error> {
    if image.is_empty() {
        Err(Error::EmptyImage)
    } else if image.len() > max_image_bytes {
        Err(Error::ImageTooLarge(image.len(), max_image_bytes))
    } else {
        Ok(image)
    }
}

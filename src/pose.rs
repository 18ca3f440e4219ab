use crate::{error::Error, point::Point};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    num_derive::FromPrimitive,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub(crate) enum KeypointKind {
    Nose,
    LeftEye,
    RightEye,
    LeftEar,
    RightEar,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

impl KeypointKind {
    #[inline]
    pub(crate) fn idx(self) -> usize {
        self as usize
    }

    pub(crate) fn from_idx(idx: usize) -> Result<Self, Error> {
        Self::from_usize(idx).ok_or(Error::ConvertUSizeToKeypointKind(idx))
    }
}

pub(crate) const NUM_KEYPOINTS: usize = 17;

#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) struct Keypoint {
    pub(crate) kind: KeypointKind,
    pub(crate) point: Point,
    pub(crate) score: f32,
}

pub(crate) type Keypoints = [Keypoint; NUM_KEYPOINTS];

/// One detected person: every body keypoint, indexed by [`KeypointKind`].
#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) struct Pose {
    keypoints: Keypoints,
    pub(crate) score: f32,
}

impl Pose {
    #[inline]
    pub(crate) fn keypoint(&self, kind: KeypointKind) -> &Keypoint {
        &self.keypoints[kind.idx()]
    }

    #[cfg(test)]
    pub(crate) fn keypoints(&self) -> &Keypoints {
        &self.keypoints
    }
}

/// The wire form of a pose, as produced by a detector or embedded in a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct PoseDocument {
    #[serde(default = "full_confidence")]
    pub(crate) score: f32,
    pub(crate) landmarks: Vec<LandmarkDocument>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub(crate) struct LandmarkDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) name: Option<KeypointKind>,
    pub(crate) x: f32,
    pub(crate) y: f32,
    /// Depth from 3-D detectors. Accepted on the wire; joint angles are measured in the image plane.
    #[serde(default)]
    pub(crate) z: f32,
    #[serde(default = "full_confidence")]
    pub(crate) visibility: f32,
}

fn full_confidence() -> f32 {
    1.0
}

pub(crate) mod constants {
    use super::NUM_KEYPOINTS;

    pub(crate) const NUM_BLAZEPOSE_LANDMARKS: usize = 33;

    /// Position of each COCO body keypoint within a 33-landmark BlazePose result.
    pub(crate) const BLAZEPOSE_INDICES: [usize; NUM_KEYPOINTS] = [
        0,  // nose
        2,  // left eye
        5,  // right eye
        7,  // left ear
        8,  // right ear
        11, // left shoulder
        12, // right shoulder
        13, // left elbow
        14, // right elbow
        15, // left wrist
        16, // right wrist
        23, // left hip
        24, // right hip
        25, // left knee
        26, // right knee
        27, // left ankle
        28, // right ankle
    ];
}

/// `value` itself when it lies in [0, 1]. NaN is out of range.
fn confidence(name: &'static str, value: f32) -> Result<f32, Error> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(Error::ConfidenceOutOfRange(name, value))
    }
}

fn keypoint(kind: KeypointKind, doc: &LandmarkDocument) -> Result<Keypoint, Error> {
    Ok(Keypoint {
        kind,
        point: Point::new(doc.x, doc.y)?,
        score: confidence("landmark visibility", doc.visibility)?,
    })
}

impl TryFrom<PoseDocument> for Pose {
    type Error = Error;

    fn try_from(doc: PoseDocument) -> Result<Self, Self::Error> {
        let score = confidence("pose score", doc.score)?;
        let named = doc.landmarks.iter().filter(|l| l.name.is_some()).count();
        let mut slots: [Option<Keypoint>; NUM_KEYPOINTS] = [None; NUM_KEYPOINTS];

        if named == doc.landmarks.len() && named > 0 {
            for landmark in &doc.landmarks {
                if let Some(kind) = landmark.name {
                    let slot = &mut slots[kind.idx()];
                    if slot.is_some() {
                        return Err(Error::DuplicateLandmark(kind));
                    }
                    *slot = Some(keypoint(kind, landmark)?);
                }
            }
        } else if named == 0 {
            let indices: Vec<usize> = match doc.landmarks.len() {
                NUM_KEYPOINTS => (0..NUM_KEYPOINTS).collect(),
                constants::NUM_BLAZEPOSE_LANDMARKS => constants::BLAZEPOSE_INDICES.to_vec(),
                count => return Err(Error::LandmarkCount(count)),
            };
            for (i, &source) in indices.iter().enumerate() {
                let kind = KeypointKind::from_idx(i)?;
                slots[i] = Some(keypoint(kind, &doc.landmarks[source])?);
            }
        } else {
            return Err(Error::MixedLandmarkNames);
        }

        let keypoints = slots
            .iter()
            .enumerate()
            .map(|(i, slot)| match slot {
                Some(keypoint) => Ok(*keypoint),
                None => Err(Error::MissingLandmark(KeypointKind::from_idx(i)?)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let keypoints: Keypoints = keypoints
            .try_into()
            .map_err(|keypoints: Vec<Keypoint>| Error::LandmarkCount(keypoints.len()))?;

        Ok(Self { keypoints, score })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{KeypointKind, LandmarkDocument, Pose, PoseDocument, NUM_KEYPOINTS};

    /// Build a pose document from the given keypoints; every other keypoint sits at the origin
    /// with zero visibility.
    pub(crate) fn document(points: &[(KeypointKind, f32, f32)]) -> PoseDocument {
        let landmarks = (0..NUM_KEYPOINTS)
            .map(|i| {
                let kind = KeypointKind::from_idx(i).unwrap();
                match points.iter().find(|(k, _, _)| *k == kind) {
                    Some(&(_, x, y)) => LandmarkDocument {
                        name: Some(kind),
                        x,
                        y,
                        z: 0.0,
                        visibility: 1.0,
                    },
                    None => LandmarkDocument {
                        name: Some(kind),
                        x: 0.0,
                        y: 0.0,
                        z: 0.0,
                        visibility: 0.0,
                    },
                }
            })
            .collect();
        PoseDocument {
            score: 1.0,
            landmarks,
        }
    }

    pub(crate) fn pose(points: &[(KeypointKind, f32, f32)]) -> Pose {
        Pose::try_from(document(points)).unwrap()
    }
}

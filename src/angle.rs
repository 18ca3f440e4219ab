use crate::{
    point::Point,
    pose::{KeypointKind, Pose},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Limb segments shorter than this are treated as coincident endpoints.
const MIN_SEGMENT_LENGTH: f32 = f32::EPSILON;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Side {
    Left,
    Right,
}

impl Side {
    pub(crate) const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

/// A tracked joint without regard to side.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Joint {
    Shoulder,
    Elbow,
    Hip,
    Knee,
}

impl Joint {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Shoulder => "shoulder",
            Self::Elbow => "elbow",
            Self::Hip => "hip",
            Self::Knee => "knee",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum JointKind {
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
}

impl JointKind {
    pub(crate) const ALL: [JointKind; 8] = [
        JointKind::LeftShoulder,
        JointKind::RightShoulder,
        JointKind::LeftElbow,
        JointKind::RightElbow,
        JointKind::LeftHip,
        JointKind::RightHip,
        JointKind::LeftKnee,
        JointKind::RightKnee,
    ];

    pub(crate) fn new(side: Side, joint: Joint) -> Self {
        match (side, joint) {
            (Side::Left, Joint::Shoulder) => Self::LeftShoulder,
            (Side::Right, Joint::Shoulder) => Self::RightShoulder,
            (Side::Left, Joint::Elbow) => Self::LeftElbow,
            (Side::Right, Joint::Elbow) => Self::RightElbow,
            (Side::Left, Joint::Hip) => Self::LeftHip,
            (Side::Right, Joint::Hip) => Self::RightHip,
            (Side::Left, Joint::Knee) => Self::LeftKnee,
            (Side::Right, Joint::Knee) => Self::RightKnee,
        }
    }

    pub(crate) fn side(self) -> Side {
        match self {
            Self::LeftShoulder | Self::LeftElbow | Self::LeftHip | Self::LeftKnee => Side::Left,
            Self::RightShoulder | Self::RightElbow | Self::RightHip | Self::RightKnee => {
                Side::Right
            }
        }
    }

    pub(crate) fn joint(self) -> Joint {
        match self {
            Self::LeftShoulder | Self::RightShoulder => Joint::Shoulder,
            Self::LeftElbow | Self::RightElbow => Joint::Elbow,
            Self::LeftHip | Self::RightHip => Joint::Hip,
            Self::LeftKnee | Self::RightKnee => Joint::Knee,
        }
    }

    /// The (proximal, vertex, distal) landmarks the angle is measured from.
    pub(crate) fn landmarks(self) -> [KeypointKind; 3] {
        use KeypointKind::*;

        match self {
            Self::LeftShoulder => [LeftHip, LeftShoulder, LeftElbow],
            Self::RightShoulder => [RightHip, RightShoulder, RightElbow],
            Self::LeftElbow => [LeftShoulder, LeftElbow, LeftWrist],
            Self::RightElbow => [RightShoulder, RightElbow, RightWrist],
            Self::LeftHip => [LeftShoulder, LeftHip, LeftKnee],
            Self::RightHip => [RightShoulder, RightHip, RightKnee],
            Self::LeftKnee => [LeftHip, LeftKnee, LeftAnkle],
            Self::RightKnee => [RightHip, RightKnee, RightAnkle],
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("limb segment has zero length at the joint vertex")]
pub(crate) struct DegenerateGeometry;

/// Angle at `b` between the rays `b -> a` and `b -> c`, in degrees.
pub(crate) fn angle_at(a: Point, b: Point, c: Point) -> Result<f32, DegenerateGeometry> {
    let ba = a - b;
    let bc = c - b;
    let ba_norm = ba.norm();
    let bc_norm = bc.norm();

    if ba_norm <= MIN_SEGMENT_LENGTH || bc_norm <= MIN_SEGMENT_LENGTH {
        return Err(DegenerateGeometry);
    }

    let cosine = (ba.dot(bc) / (ba_norm * bc_norm)).clamp(-1.0, 1.0);
    Ok(cosine.acos().to_degrees().clamp(0.0, 180.0))
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) struct JointAngle {
    pub(crate) joint: JointKind,
    pub(crate) degrees: f32,
    pub(crate) landmarks: [KeypointKind; 3],
}

/// Measured joint angles for one frame, keyed by joint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct JointAngles(BTreeMap<JointKind, f32>);

impl JointAngles {
    pub(crate) fn get(&self, joint: JointKind) -> Option<f32> {
        self.0.get(&joint).copied()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = JointAngle> + '_ {
        self.0.iter().map(|(&joint, &degrees)| JointAngle {
            joint,
            degrees,
            landmarks: joint.landmarks(),
        })
    }

    /// Only the angles measured on the given sides.
    pub(crate) fn on_sides(&self, sides: &[Side]) -> Self {
        self.0
            .iter()
            .filter(|(joint, _)| sides.contains(&joint.side()))
            .map(|(&joint, &degrees)| (joint, degrees))
            .collect()
    }
}

impl FromIterator<(JointKind, f32)> for JointAngles {
    fn from_iter<I: IntoIterator<Item = (JointKind, f32)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Unmeasured {
    LowVisibility,
    DegenerateGeometry,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct UnmeasuredJoint {
    pub(crate) joint: JointKind,
    pub(crate) reason: Unmeasured,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Measurement {
    pub(crate) angles: JointAngles,
    pub(crate) unmeasured: Vec<UnmeasuredJoint>,
}

/// Measure every tracked joint whose landmarks clear `min_keypoint_score`.
pub(crate) fn measure(pose: &Pose, min_keypoint_score: f32) -> Measurement {
    let mut measurement = Measurement::default();

    for joint in JointKind::ALL {
        let [a, b, c] = joint.landmarks().map(|kind| pose.keypoint(kind));

        let reason = if [a, b, c].iter().any(|k| k.score < min_keypoint_score) {
            Unmeasured::LowVisibility
        } else {
            match angle_at(a.point, b.point, c.point) {
                Ok(degrees) => {
                    measurement.angles.0.insert(joint, degrees);
                    continue;
                }
                Err(DegenerateGeometry) => Unmeasured::DegenerateGeometry,
            }
        };

        debug!(message = "joint unmeasured", ?joint, ?reason);
        measurement
            .unmeasured
            .push(UnmeasuredJoint { joint, reason });
    }

    measurement
}

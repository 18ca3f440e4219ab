use crate::{
    angle::{Joint, JointAngles, JointKind, Side},
    pose::{KeypointKind, Pose},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Exercise {
    BicepCurl,
    TricepExtension,
    ShoulderPress,
    Squat,
    Pushup,
    Unknown,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum MuscleGroup {
    Biceps,
    Triceps,
    Shoulders,
    Quadriceps,
    Chest,
    Unknown,
}

impl fmt::Display for Exercise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BicepCurl => "bicep_curl",
            Self::TricepExtension => "tricep_extension",
            Self::ShoulderPress => "shoulder_press",
            Self::Squat => "squat",
            Self::Pushup => "pushup",
            Self::Unknown => "unknown",
        })
    }
}

impl fmt::Display for MuscleGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Biceps => "biceps",
            Self::Triceps => "triceps",
            Self::Shoulders => "shoulders",
            Self::Quadriceps => "quadriceps",
            Self::Chest => "chest",
            Self::Unknown => "unknown",
        })
    }
}

/// An inclusive band of joint angles, in degrees.
#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) struct Band {
    pub(crate) joint: Joint,
    pub(crate) min: f32,
    pub(crate) max: f32,
}

impl Band {
    pub(crate) const fn new(joint: Joint, min: f32, max: f32) -> Self {
        Self { joint, min, max }
    }

    pub(crate) fn contains(&self, degrees: f32) -> bool {
        self.min <= degrees && degrees <= self.max
    }
}

/// A relative-position check between landmarks on one side of the body.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Placement {
    /// The wrist is higher in the image than the shoulder.
    WristAboveShoulder,
    /// The shoulder-to-hip segment is closer to horizontal than vertical.
    TorsoHorizontal,
}

impl Placement {
    fn holds(self, pose: &Pose, side: Side, min_keypoint_score: f32) -> bool {
        let (upper, lower) = match (self, side) {
            (Self::WristAboveShoulder, Side::Left) => {
                (KeypointKind::LeftWrist, KeypointKind::LeftShoulder)
            }
            (Self::WristAboveShoulder, Side::Right) => {
                (KeypointKind::RightWrist, KeypointKind::RightShoulder)
            }
            (Self::TorsoHorizontal, Side::Left) => {
                (KeypointKind::LeftShoulder, KeypointKind::LeftHip)
            }
            (Self::TorsoHorizontal, Side::Right) => {
                (KeypointKind::RightShoulder, KeypointKind::RightHip)
            }
        };
        let (a, b) = (pose.keypoint(upper), pose.keypoint(lower));
        if a.score < min_keypoint_score || b.score < min_keypoint_score {
            return false;
        }

        match self {
            // image y grows downward
            Self::WristAboveShoulder => a.point.y() < b.point.y(),
            Self::TorsoHorizontal => {
                (a.point.y() - b.point.y()).abs() < (a.point.x() - b.point.x()).abs()
            }
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) struct Rule {
    pub(crate) exercise: Exercise,
    pub(crate) muscle: MuscleGroup,
    pub(crate) bands: &'static [Band],
    pub(crate) placement: Option<Placement>,
}

/// Classifier rules in priority order: the first rule that matches wins.
///
/// Bands overlap in places (an elbow at exactly 90 degrees with the arm overhead satisfies both
/// the tricep extension and the shoulder press bands); the order of this table decides.
pub(crate) const RULES: [Rule; 5] = [
    Rule {
        exercise: Exercise::Squat,
        muscle: MuscleGroup::Quadriceps,
        bands: &[Band::new(Joint::Knee, 0.0, 120.0), Band::new(Joint::Hip, 0.0, 130.0)],
        placement: None,
    },
    Rule {
        exercise: Exercise::Pushup,
        muscle: MuscleGroup::Chest,
        bands: &[Band::new(Joint::Hip, 150.0, 180.0), Band::new(Joint::Knee, 150.0, 180.0)],
        placement: Some(Placement::TorsoHorizontal),
    },
    Rule {
        exercise: Exercise::TricepExtension,
        muscle: MuscleGroup::Triceps,
        bands: &[
            Band::new(Joint::Shoulder, 140.0, 180.0),
            Band::new(Joint::Elbow, 0.0, 90.0),
        ],
        placement: None,
    },
    Rule {
        exercise: Exercise::ShoulderPress,
        muscle: MuscleGroup::Shoulders,
        bands: &[
            Band::new(Joint::Shoulder, 70.0, 180.0),
            Band::new(Joint::Elbow, 90.0, 180.0),
        ],
        placement: Some(Placement::WristAboveShoulder),
    },
    Rule {
        exercise: Exercise::BicepCurl,
        muscle: MuscleGroup::Biceps,
        bands: &[
            Band::new(Joint::Elbow, 0.0, 50.0),
            Band::new(Joint::Shoulder, 0.0, 30.0),
        ],
        placement: None,
    },
];

/// Landmark context for placement checks.
#[derive(Debug, Copy, Clone)]
pub(crate) struct Landmarks<'a> {
    pub(crate) pose: &'a Pose,
    pub(crate) min_keypoint_score: f32,
}

impl Rule {
    /// Whether every band (and the placement check, if any) holds on `side`.
    pub(crate) fn matches(&self, angles: &JointAngles, side: Side, landmarks: Option<Landmarks>) -> bool {
        let bands = self.bands.iter().all(|band| {
            angles
                .get(JointKind::new(side, band.joint))
                .map_or(false, |degrees| band.contains(degrees))
        });
        bands
            && self.placement.map_or(true, |placement| {
                landmarks.map_or(false, |l| placement.holds(l.pose, side, l.min_keypoint_score))
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Classification {
    pub(crate) exercise: Exercise,
    pub(crate) muscle: MuscleGroup,
    /// Index into [`RULES`] of the rule that fired.
    pub(crate) rule: Option<usize>,
    /// Sides of the body the rule fired on.
    pub(crate) sides: Vec<Side>,
    pub(crate) confidence: f32,
}

impl Classification {
    pub(crate) fn unknown() -> Self {
        Self {
            exercise: Exercise::Unknown,
            muscle: MuscleGroup::Unknown,
            rule: None,
            sides: Vec::new(),
            confidence: 0.0,
        }
    }

    pub(crate) fn is_unknown(&self) -> bool {
        self.exercise == Exercise::Unknown
    }
}

pub(crate) fn classify(angles: &JointAngles, landmarks: Option<Landmarks>) -> Classification {
    RULES
        .iter()
        .enumerate()
        .find_map(|(index, rule)| {
            let sides: Vec<Side> = Side::BOTH
                .iter()
                .copied()
                .filter(|&side| rule.matches(angles, side, landmarks))
                .collect();
            if sides.is_empty() {
                None
            } else {
                Some(Classification {
                    exercise: rule.exercise,
                    muscle: rule.muscle,
                    rule: Some(index),
                    sides,
                    confidence: 1.0,
                })
            }
        })
        .unwrap_or_else(Classification::unknown)
}

/// Muscle groups showing activation on any measured side, plus the classified muscle.
pub(crate) fn activated_muscles(
    angles: &JointAngles,
    classification: &Classification,
) -> Vec<MuscleGroup> {
    let mut muscles = BTreeSet::new();

    for angle in angles.iter() {
        let degrees = angle.degrees;
        match angle.joint.joint() {
            Joint::Elbow if degrees < 90.0 => {
                muscles.insert(MuscleGroup::Biceps);
            }
            Joint::Elbow if degrees > 120.0 => {
                muscles.insert(MuscleGroup::Triceps);
            }
            Joint::Shoulder if degrees > 90.0 => {
                muscles.insert(MuscleGroup::Shoulders);
            }
            Joint::Knee if degrees < 120.0 => {
                muscles.insert(MuscleGroup::Quadriceps);
            }
            _ => {}
        }
    }

    if !classification.is_unknown() {
        muscles.insert(classification.muscle);
    }

    muscles.into_iter().collect()
}

use crate::{
    angle::{Joint, JointAngles, Side},
    classify::{Band, Exercise},
};
use tracing::trace;

/// Points deducted per degree outside the ideal range.
const DEGREE_PENALTY: f32 = 2.0;
const LOW_SCORE: f32 = 70.0;

pub(crate) const GREAT_FORM: &str = "Great form!";
pub(crate) const LOW_SCORE_FEEDBACK: &str = "Focus on maintaining proper form.";
pub(crate) const UNRECOGNIZED_FEEDBACK: &str =
    "Could not recognize the exercise. Please position yourself clearly in the camera view.";
pub(crate) const NOT_IN_VIEW_FEEDBACK: &str =
    "Could not measure the joints this exercise is scored on. Keep your whole body in view.";

const BICEP_CURL: &[Band] = &[
    Band::new(Joint::Elbow, 20.0, 45.0),
    Band::new(Joint::Shoulder, 0.0, 20.0),
];
const TRICEP_EXTENSION: &[Band] = &[
    Band::new(Joint::Elbow, 40.0, 90.0),
    Band::new(Joint::Shoulder, 160.0, 180.0),
];
const SHOULDER_PRESS: &[Band] = &[
    Band::new(Joint::Shoulder, 150.0, 180.0),
    Band::new(Joint::Elbow, 150.0, 180.0),
];
const SQUAT: &[Band] = &[
    Band::new(Joint::Knee, 70.0, 100.0),
    Band::new(Joint::Hip, 60.0, 110.0),
];
const PUSHUP: &[Band] = &[
    Band::new(Joint::Elbow, 70.0, 100.0),
    Band::new(Joint::Hip, 165.0, 180.0),
    Band::new(Joint::Knee, 160.0, 180.0),
];

/// Per-joint ideal angle ranges an exercise is scored against.
pub(crate) fn ideal_ranges(exercise: Exercise) -> &'static [Band] {
    match exercise {
        Exercise::BicepCurl => BICEP_CURL,
        Exercise::TricepExtension => TRICEP_EXTENSION,
        Exercise::ShoulderPress => SHOULDER_PRESS,
        Exercise::Squat => SQUAT,
        Exercise::Pushup => PUSHUP,
        Exercise::Unknown => &[],
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Deviation {
    Below,
    Above,
}

fn deviation(band: &Band, degrees: f32) -> Option<(Deviation, f32)> {
    if degrees < band.min {
        Some((Deviation::Below, band.min - degrees))
    } else if degrees > band.max {
        Some((Deviation::Above, degrees - band.max))
    } else {
        None
    }
}

/// Score of a single angle against its ideal band, in [0, 100].
pub(crate) fn angle_score(band: &Band, degrees: f32) -> f32 {
    let outside = deviation(band, degrees).map_or(0.0, |(_, outside)| outside);
    (100.0 - outside * DEGREE_PENALTY).max(0.0)
}

fn correction(joint: Joint, side: Side, deviation: Deviation) -> String {
    let side = side.name();
    match (joint, deviation) {
        (Joint::Elbow, Deviation::Below) => format!("Extend your {} elbow further.", side),
        (Joint::Elbow, Deviation::Above) => {
            format!("Bend your {} elbow more to increase elbow flexion.", side)
        }
        (Joint::Shoulder, Deviation::Below) => {
            format!("Raise your {} upper arm further from your torso.", side)
        }
        (Joint::Shoulder, Deviation::Above) => {
            format!("Bring your {} upper arm closer to your torso.", side)
        }
        (Joint::Hip, Deviation::Below) => format!("Open your {} hip more.", side),
        (Joint::Hip, Deviation::Above) => format!("Hinge further at your {} hip.", side),
        (Joint::Knee, Deviation::Below) => format!("Ease off the bend in your {} knee.", side),
        (Joint::Knee, Deviation::Above) => {
            format!("Bend your {} knee more to deepen the movement.", side)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FormScore {
    /// Absent when the exercise was not recognized.
    pub(crate) score: Option<f32>,
    pub(crate) feedback: String,
}

/// Score `angles` against the ideal ranges of `exercise`.
pub(crate) fn assess(exercise: Exercise, angles: &JointAngles) -> FormScore {
    if exercise == Exercise::Unknown {
        return FormScore {
            score: None,
            feedback: UNRECOGNIZED_FEEDBACK.to_owned(),
        };
    }

    let bands = ideal_ranges(exercise);
    let mut scores = Vec::new();
    let mut corrections = Vec::new();

    for angle in angles.iter() {
        let joint = angle.joint.joint();
        let band = match bands.iter().find(|band| band.joint == joint) {
            Some(band) => band,
            None => continue,
        };
        let score = angle_score(band, angle.degrees);
        trace!(
            joint = ?angle.joint,
            landmarks = ?angle.landmarks,
            degrees = angle.degrees,
            score
        );
        scores.push(score);
        if let Some((deviation, _)) = deviation(band, angle.degrees) {
            corrections.push(correction(joint, angle.joint.side(), deviation));
        }
    }

    if scores.is_empty() {
        return FormScore {
            score: Some(0.0),
            feedback: NOT_IN_VIEW_FEEDBACK.to_owned(),
        };
    }

    let score = scores.iter().sum::<f32>() / scores.len() as f32;
    let feedback = if corrections.is_empty() {
        GREAT_FORM.to_owned()
    } else {
        if score < LOW_SCORE {
            corrections.insert(0, LOW_SCORE_FEEDBACK.to_owned());
        }
        corrections.join(" ")
    };

    FormScore {
        score: Some(score),
        feedback,
    }
}

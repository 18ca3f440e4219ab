use crate::{
    angle::{self, JointAngles, JointKind, Unmeasured, UnmeasuredJoint},
    classify::{self, Exercise, Landmarks, MuscleGroup},
    detect::{self, LandmarkProvider},
    error::Error,
    pose::Pose,
    request::Input,
    score,
};
use serde::{Deserialize, Serialize};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, instrument};

#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) struct Thresholds {
    pub(crate) min_pose_score: f32,
    pub(crate) min_keypoint_score: f32,
}

/// What the pipeline concluded about one recognizable pose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct FormAssessment {
    pub(crate) exercise: Exercise,
    pub(crate) muscle: MuscleGroup,
    /// 1 when a rule fired, 0 otherwise.
    #[serde(default)]
    pub(crate) confidence: f32,
    /// Absent when the exercise was not recognized.
    pub(crate) score: Option<f32>,
    pub(crate) feedback: String,
    pub(crate) angles: JointAngles,
    #[serde(default)]
    pub(crate) activated_muscles: Vec<MuscleGroup>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) unmeasured: Vec<UnmeasuredJoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub(crate) enum Analysis {
    Assessed(FormAssessment),
    /// Nobody in frame, the detector timed out, or the pose was too uncertain to use.
    NoPoseDetected,
    /// Landmarks were visible but every measurable joint collapsed onto a point.
    DegenerateGeometry { joints: Vec<JointKind> },
    UnrecognizedExercise(FormAssessment),
}

impl Analysis {
    pub(crate) fn assessment(&self) -> Option<&FormAssessment> {
        match self {
            Self::Assessed(assessment) | Self::UnrecognizedExercise(assessment) => Some(assessment),
            Self::NoPoseDetected | Self::DegenerateGeometry { .. } => None,
        }
    }
}

/// Measure, classify and score a single pose.
pub(crate) fn analyze_pose(pose: &Pose, thresholds: Thresholds) -> Analysis {
    if pose.score < thresholds.min_pose_score {
        debug!(
            message = "pose below threshold",
            score = pose.score,
            min_pose_score = thresholds.min_pose_score
        );
        return Analysis::NoPoseDetected;
    }

    let angle::Measurement { angles, unmeasured } =
        angle::measure(pose, thresholds.min_keypoint_score);

    if angles.is_empty() {
        let joints: Vec<JointKind> = unmeasured
            .iter()
            .filter(|u| u.reason == Unmeasured::DegenerateGeometry)
            .map(|u| u.joint)
            .collect();
        return if joints.is_empty() {
            Analysis::NoPoseDetected
        } else {
            Analysis::DegenerateGeometry { joints }
        };
    }

    let classification = classify::classify(
        &angles,
        Some(Landmarks {
            pose,
            min_keypoint_score: thresholds.min_keypoint_score,
        }),
    );
    debug!(
        exercise = %classification.exercise,
        rule = ?classification.rule,
        sides = ?classification.sides
    );

    let form = score::assess(
        classification.exercise,
        &angles.on_sides(&classification.sides),
    );
    let activated_muscles = classify::activated_muscles(&angles, &classification);

    let assessment = FormAssessment {
        exercise: classification.exercise,
        muscle: classification.muscle,
        confidence: classification.confidence,
        score: form.score,
        feedback: form.feedback,
        angles,
        activated_muscles,
        unmeasured,
    };

    if classification.is_unknown() {
        Analysis::UnrecognizedExercise(assessment)
    } else {
        Analysis::Assessed(assessment)
    }
}

pub(crate) struct Engine {
    thresholds: Thresholds,
    detector_timeout: Duration,
    pub(crate) timing: Timing,
}

#[derive(Debug, Copy, Clone, Default)]
pub(crate) struct Timing {
    pub(crate) detection: Duration,
    pub(crate) frames: usize,
}

impl std::ops::AddAssign for Timing {
    fn add_assign(&mut self, other: Self) {
        self.detection += other.detection;
        self.frames += other.frames;
    }
}

impl Engine {
    pub(crate) fn new(thresholds: Thresholds, detector_timeout: Duration) -> Self {
        Self {
            thresholds,
            detector_timeout,
            timing: Default::default(),
        }
    }

    /// Analyze a validated input.
    ///
    /// `provider` is only called for image inputs, so a pose-only run never starts a detector.
    pub(crate) fn analyze<P, F>(&mut self, input: Input, provider: F) -> Result<Analysis, Error>
    where
        P: LandmarkProvider + Send + Sync + 'static,
        F: FnOnce() -> Result<Arc<P>, Error>,
    {
        match input {
            Input::Pose(pose) => {
                self.timing.frames += 1;
                Ok(analyze_pose(&pose, self.thresholds))
            }
            Input::Image(image) => self.analyze_image(&provider()?, image),
        }
    }

    #[instrument(name = "Engine::analyze_image", skip(self, provider, image), fields(bytes = image.len()))]
    pub(crate) fn analyze_image<P>(
        &mut self,
        provider: &Arc<P>,
        image: Vec<u8>,
    ) -> Result<Analysis, Error>
    where
        P: LandmarkProvider + Send + Sync + 'static,
    {
        let start_detection = Instant::now();
        let detected = detect::detect_within(provider, image, self.detector_timeout);
        self.timing.detection += start_detection.elapsed();
        self.timing.frames += 1;

        Ok(match detected? {
            Some(pose) => analyze_pose(&pose, self.thresholds),
            None => Analysis::NoPoseDetected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{analyze_pose, Analysis, Engine, Thresholds};
    use crate::{
        angle::JointKind,
        classify::{Exercise, MuscleGroup},
        detect::testing::StubProvider,
        error::Error,
        pose::{testing, KeypointKind, Pose},
        request::Input,
        score::{GREAT_FORM, UNRECOGNIZED_FEEDBACK},
    };
    use assert_approx_eq::assert_approx_eq;
    use std::{sync::Arc, time::Duration};

    const THRESHOLDS: Thresholds = Thresholds {
        min_pose_score: 0.5,
        min_keypoint_score: 0.3,
    };

    /// Left arm curled to 35 degrees at the elbow with the upper arm against the torso.
    fn bicep_curl() -> Pose {
        testing::pose(&[
            (KeypointKind::LeftHip, 100.0, 300.0),
            (KeypointKind::LeftShoulder, 100.0, 100.0),
            (KeypointKind::LeftElbow, 100.0, 200.0),
            (KeypointKind::LeftWrist, 145.886, 134.468),
        ])
    }

    fn standing() -> Pose {
        testing::pose(&[
            (KeypointKind::LeftShoulder, 100.0, 100.0),
            (KeypointKind::LeftElbow, 100.0, 200.0),
            (KeypointKind::LeftWrist, 100.0, 300.0),
            (KeypointKind::LeftHip, 120.0, 300.0),
            (KeypointKind::LeftKnee, 120.0, 400.0),
            (KeypointKind::LeftAnkle, 120.0, 500.0),
        ])
    }

    fn engine() -> Engine {
        Engine::new(THRESHOLDS, Duration::from_secs(5))
    }

    #[test]
    fn bicep_curl_is_assessed() {
        let assessment = match analyze_pose(&bicep_curl(), THRESHOLDS) {
            Analysis::Assessed(assessment) => assessment,
            other => panic!("unexpected analysis: {:?}", other),
        };
        assert_eq!(assessment.exercise, Exercise::BicepCurl);
        assert_eq!(assessment.muscle, MuscleGroup::Biceps);
        assert_eq!(assessment.confidence, 1.0);
        assert_eq!(assessment.score, Some(100.0));
        assert_eq!(assessment.feedback, GREAT_FORM);
        assert_approx_eq!(assessment.angles.get(JointKind::LeftElbow).unwrap(), 35.0, 1e-2);
        assert_approx_eq!(assessment.angles.get(JointKind::LeftShoulder).unwrap(), 0.0, 1e-2);
        assert_eq!(assessment.activated_muscles, vec![MuscleGroup::Biceps]);
        assert_eq!(assessment.unmeasured.len(), 6);
    }

    #[test]
    fn standing_is_unrecognized() {
        let assessment = match analyze_pose(&standing(), THRESHOLDS) {
            Analysis::UnrecognizedExercise(assessment) => assessment,
            other => panic!("unexpected analysis: {:?}", other),
        };
        assert_eq!(assessment.exercise, Exercise::Unknown);
        assert_eq!(assessment.confidence, 0.0);
        assert_eq!(assessment.score, None);
        assert_eq!(assessment.feedback, UNRECOGNIZED_FEEDBACK);
        assert_eq!(assessment.angles.iter().count(), 4);
    }

    #[test]
    fn uncertain_pose_is_not_detected() {
        let mut pose = bicep_curl();
        pose.score = 0.2;
        assert_eq!(analyze_pose(&pose, THRESHOLDS), Analysis::NoPoseDetected);
    }

    #[test]
    fn invisible_landmarks_are_not_detected() {
        assert_eq!(analyze_pose(&testing::pose(&[]), THRESHOLDS), Analysis::NoPoseDetected);
    }

    #[test]
    fn coincident_landmarks_are_degenerate() {
        let pose = testing::pose(&[
            (KeypointKind::LeftShoulder, 50.0, 50.0),
            (KeypointKind::LeftElbow, 50.0, 50.0),
            (KeypointKind::LeftWrist, 50.0, 50.0),
        ]);
        assert_eq!(
            analyze_pose(&pose, THRESHOLDS),
            Analysis::DegenerateGeometry {
                joints: vec![JointKind::LeftElbow]
            }
        );
    }

    #[test]
    fn analysis_serializes_with_status() {
        let value = serde_json::to_value(analyze_pose(&bicep_curl(), THRESHOLDS)).unwrap();
        assert_eq!(value["status"], "assessed");
        assert_eq!(value["exercise"], "bicep_curl");
        assert_eq!(value["muscle"], "biceps");
        assert_eq!(value["feedback"], GREAT_FORM);
        assert!(value["angles"]["left_elbow"].is_number());

        let value = serde_json::to_value(Analysis::NoPoseDetected).unwrap();
        assert_eq!(value, serde_json::json!({"status": "no_pose_detected"}));
    }

    #[test]
    fn image_without_pose() {
        let provider = Arc::new(StubProvider::new(None));
        let analysis = engine().analyze_image(&provider, vec![0xff, 0xd8]).unwrap();
        assert_eq!(analysis, Analysis::NoPoseDetected);
    }

    #[test]
    fn image_with_pose() {
        let provider = Arc::new(StubProvider::new(Some(bicep_curl())));
        let mut engine = engine();
        let analysis = engine.analyze_image(&provider, vec![0xff, 0xd8]).unwrap();
        assert!(matches!(analysis, Analysis::Assessed(_)));
        assert_eq!(engine.timing.frames, 1);
    }

    #[test]
    fn slow_detector_is_no_pose() {
        let provider = Arc::new(StubProvider {
            pose: Some(bicep_curl()),
            delay: Duration::from_millis(500),
        });
        let mut engine = Engine::new(THRESHOLDS, Duration::from_millis(10));
        let analysis = engine.analyze_image(&provider, vec![0]).unwrap();
        assert_eq!(analysis, Analysis::NoPoseDetected);
    }

    #[test]
    fn pose_input_skips_the_detector() {
        let analysis = engine()
            .analyze(Input::Pose(bicep_curl()), || -> Result<Arc<StubProvider>, Error> {
                Err(Error::NoDetectorConfigured)
            })
            .unwrap();
        assert!(matches!(analysis, Analysis::Assessed(_)));
    }

    #[test]
    fn image_input_needs_a_detector() {
        let result = engine().analyze(Input::Image(vec![1]), || -> Result<Arc<StubProvider>, Error> {
            Err(Error::NoDetectorConfigured)
        });
        assert!(matches!(result, Err(Error::NoDetectorConfigured)));
    }
}

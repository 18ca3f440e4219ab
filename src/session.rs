use crate::{
    classify::{Exercise, MuscleGroup},
    engine::FormAssessment,
    error::Error,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::{File, OpenOptions},
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::debug;
use uuid::Uuid;

/// One analyzed input, as stored in the session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SessionRecord {
    pub(crate) id: Uuid,
    pub(crate) created_at: DateTime<Utc>,
    /// Where the input came from, usually a file path.
    pub(crate) source: String,
    pub(crate) assessment: FormAssessment,
}

impl SessionRecord {
    pub(crate) fn new(source: impl Into<String>, assessment: FormAssessment) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            source: source.into(),
            assessment,
        }
    }
}

/// An append-only JSON-lines file of [`SessionRecord`]s.
#[derive(Debug, Clone)]
pub(crate) struct SessionLog {
    path: PathBuf,
}

impl SessionLog {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn append(&self, records: &[SessionRecord]) -> Result<(), Error> {
        if records.is_empty() {
            return Ok(());
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::OpenSessionLog(e, self.path.clone()))?;
        let mut writer = BufWriter::new(file);

        for record in records {
            serde_json::to_writer(&mut writer, record).map_err(Error::SerializeSessionRecord)?;
            writer.write_all(b"\n").map_err(Error::WriteSessionRecord)?;
        }
        writer.flush().map_err(Error::WriteSessionRecord)?;

        debug!(message = "appended session records", count = records.len(), path = ?self.path);
        Ok(())
    }

    /// The newest `limit` records, newest first.
    pub(crate) fn recent(&self, limit: usize) -> Result<Vec<SessionRecord>, Error> {
        Ok(self.records()?.into_iter().rev().take(limit).collect())
    }

    /// Every record in the order it was appended. A log that does not exist yet is empty.
    pub(crate) fn records(&self) -> Result<Vec<SessionRecord>, Error> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::OpenSessionLog(e, self.path.clone())),
        };

        let mut records = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| Error::OpenSessionLog(e, self.path.clone()))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: SessionRecord = serde_json::from_str(&line)
                .map_err(|e| Error::ParseSessionRecord(e, index + 1))?;
            records.push(record);
        }
        Ok(records)
    }
}

/// Totals over a session log.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub(crate) struct SessionStats {
    pub(crate) total_sessions: usize,
    /// Mean score of the recognized assessments, to one decimal place. Absent when none were.
    pub(crate) average_form_accuracy: Option<f32>,
    pub(crate) muscle_groups: BTreeMap<MuscleGroup, usize>,
    pub(crate) exercises: BTreeMap<Exercise, usize>,
}

impl SessionStats {
    pub(crate) fn from_records(records: &[SessionRecord]) -> Self {
        let mut stats = Self {
            total_sessions: records.len(),
            ..Self::default()
        };

        let scores: Vec<f32> = records
            .iter()
            .filter_map(|record| record.assessment.score)
            .collect();
        if !scores.is_empty() {
            let mean = scores.iter().sum::<f32>() / scores.len() as f32;
            stats.average_form_accuracy = Some((mean * 10.0).round() / 10.0);
        }

        for record in records {
            *stats
                .muscle_groups
                .entry(record.assessment.muscle)
                .or_default() += 1;
            *stats
                .exercises
                .entry(record.assessment.exercise)
                .or_default() += 1;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::{SessionLog, SessionRecord, SessionStats};
    use assert_approx_eq::assert_approx_eq;
    use crate::{
        angle::JointKind,
        classify::{Exercise, MuscleGroup},
        engine::FormAssessment,
        error::Error,
        score::GREAT_FORM,
    };
    use std::fs;

    fn assessment(score: f32) -> FormAssessment {
        FormAssessment {
            exercise: Exercise::BicepCurl,
            muscle: MuscleGroup::Biceps,
            confidence: 1.0,
            score: Some(score),
            feedback: GREAT_FORM.to_owned(),
            angles: [(JointKind::LeftElbow, 35.0)].iter().copied().collect(),
            activated_muscles: vec![MuscleGroup::Biceps],
            unmeasured: Vec::new(),
        }
    }

    #[test]
    fn missing_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::new(dir.path().join("sessions.jsonl"));
        assert!(log.recent(10).unwrap().is_empty());
    }

    #[test]
    fn recent_is_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::new(dir.path().join("sessions.jsonl"));

        let records: Vec<_> = (0..5)
            .map(|i| SessionRecord::new(format!("frame-{}.jpg", i), assessment(i as f32)))
            .collect();
        log.append(&records[..3]).unwrap();
        log.append(&records[3..]).unwrap();

        let recent = log.recent(2).unwrap();
        assert_eq!(recent, vec![records[4].clone(), records[3].clone()]);
        assert_eq!(log.recent(100).unwrap().len(), 5);
    }

    #[test]
    fn stats_over_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::new(dir.path().join("sessions.jsonl"));

        let squat = FormAssessment {
            exercise: Exercise::Squat,
            muscle: MuscleGroup::Quadriceps,
            ..assessment(71.0)
        };
        let unrecognized = FormAssessment {
            exercise: Exercise::Unknown,
            muscle: MuscleGroup::Unknown,
            confidence: 0.0,
            score: None,
            ..assessment(0.0)
        };
        log.append(&[
            SessionRecord::new("a.jpg", assessment(90.0)),
            SessionRecord::new("b.jpg", assessment(80.0)),
            SessionRecord::new("c.jpg", squat),
            SessionRecord::new("d.jpg", unrecognized),
        ])
        .unwrap();

        let stats = SessionStats::from_records(&log.records().unwrap());
        assert_eq!(stats.total_sessions, 4);
        assert_approx_eq!(stats.average_form_accuracy.unwrap(), 80.3, 1e-4);
        assert_eq!(stats.muscle_groups[&MuscleGroup::Biceps], 2);
        assert_eq!(stats.muscle_groups[&MuscleGroup::Quadriceps], 1);
        assert_eq!(stats.muscle_groups[&MuscleGroup::Unknown], 1);
        assert_eq!(stats.exercises[&Exercise::BicepCurl], 2);
        assert_eq!(stats.exercises[&Exercise::Squat], 1);
        assert_eq!(stats.exercises[&Exercise::Unknown], 1);

        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["muscle_groups"]["biceps"], 2);
        assert_eq!(value["exercises"]["bicep_curl"], 2);
    }

    #[test]
    fn stats_of_an_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::new(dir.path().join("sessions.jsonl"));
        let stats = SessionStats::from_records(&log.records().unwrap());
        assert_eq!(stats, SessionStats::default());
        assert!(serde_json::to_value(&stats).unwrap()["average_form_accuracy"].is_null());
    }

    #[test]
    fn records_keep_append_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::new(dir.path().join("sessions.jsonl"));
        let records: Vec<_> = (0..3)
            .map(|i| SessionRecord::new(format!("frame-{}.jpg", i), assessment(i as f32)))
            .collect();
        log.append(&records).unwrap();
        assert_eq!(log.records().unwrap(), records);
    }

    #[test]
    fn corrupt_line_reports_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::new(dir.path().join("sessions.jsonl"));
        log.append(&[SessionRecord::new("a.jpg", assessment(90.0))])
            .unwrap();
        let mut contents = fs::read_to_string(log.path()).unwrap();
        contents.push_str("{not json\n");
        fs::write(log.path(), contents).unwrap();

        assert!(matches!(
            log.recent(10),
            Err(Error::ParseSessionRecord(_, 2))
        ));
    }
}

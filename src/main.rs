use anyhow::{anyhow, Context, Result};
use classify::Band;
use config::{DetectorSettings, Settings};
use detect::{ExternalDetector, LandmarkProvider};
use engine::{Analysis, Engine, Timing};
use error::Error;
use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::OnceCell;
use request::{AnalyzeRequest, Input};
use serde::Serialize;
use session::{SessionLog, SessionRecord, SessionStats};
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use structopt::StructOpt;
use tracing::{error, info, instrument, warn};
use tracing_subscriber::layer::SubscriberExt;

mod angle;
mod classify;
mod config;
mod detect;
mod engine;
mod error;
mod point;
mod pose;
mod request;
mod score;
mod session;

#[derive(structopt::StructOpt)]
struct Opt {
    /// Path to a TOML settings file.
    #[structopt(short, long, env = "FORM_SCORE_CONFIG")]
    config: Option<PathBuf>,

    #[structopt(short, long, default_value = "info", env = "RUST_LOG")]
    log_level: tracing_subscriber::filter::EnvFilter,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Score the exercise form in pose requests (*.json) or encoded images.
    Analyze(Analyze),

    /// Print the classifier rules in priority order, with each exercise's ideal ranges.
    Rules,

    /// Print the most recent assessments from the session log, newest first.
    History {
        #[structopt(short = "n", long, default_value = "10")]
        limit: usize,

        #[structopt(long)]
        session_log: Option<PathBuf>,
    },

    /// Summarize the session log: session count, average form score, and counts per muscle group
    /// and exercise.
    Stats {
        #[structopt(long)]
        session_log: Option<PathBuf>,
    },
}

#[derive(structopt::StructOpt)]
struct Analyze {
    #[structopt(required = true)]
    inputs: Vec<PathBuf>,

    /// Landmark detector program, fed encoded images on stdin.
    #[structopt(short, long)]
    detector: Option<PathBuf>,

    /// Argument passed to the detector program; may be repeated.
    #[structopt(long = "detector-arg", number_of_values = 1, allow_hyphen_values = true)]
    detector_args: Vec<String>,

    /// Milliseconds to wait for the detector before treating a frame as empty.
    #[structopt(long)]
    timeout_ms: Option<u64>,

    /// Pose score threshold.
    #[structopt(long)]
    min_pose_score: Option<f32>,

    /// Keypoint score threshold.
    #[structopt(short = "t", long)]
    min_keypoint_score: Option<f32>,

    #[structopt(short, long, default_value = "1")]
    jobs: usize,

    /// Append assessments to this JSON-lines file.
    #[structopt(long)]
    session_log: Option<PathBuf>,

    #[structopt(short, long)]
    show_progress: bool,
}

impl Analyze {
    /// Layer command line flags over `settings`.
    fn apply(&self, mut settings: Settings) -> Settings {
        if let Some(program) = &self.detector {
            settings.detector = Some(DetectorSettings {
                program: program.clone(),
                args: self.detector_args.clone(),
            });
        } else if let Some(detector) = settings.detector.as_mut() {
            if !self.detector_args.is_empty() {
                detector.args = self.detector_args.clone();
            }
        }
        if let Some(timeout_ms) = self.timeout_ms {
            settings.detector_timeout_ms = timeout_ms;
        }
        if let Some(min_pose_score) = self.min_pose_score {
            settings.min_pose_score = min_pose_score;
        }
        if let Some(min_keypoint_score) = self.min_keypoint_score {
            settings.min_keypoint_score = min_keypoint_score;
        }
        if let Some(session_log) = &self.session_log {
            settings.session_log = Some(session_log.clone());
        }
        settings
    }
}

#[derive(Serialize)]
struct Report<'a> {
    input: &'a Path,
    #[serde(skip_serializing_if = "Option::is_none")]
    analysis: Option<&'a Analysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

static DETECTOR: OnceCell<Arc<ExternalDetector>> = OnceCell::new();

/// The process-wide detector, started on first use.
fn shared_detector(settings: &Settings) -> Result<Arc<ExternalDetector>, Error> {
    DETECTOR
        .get_or_try_init(|| {
            let detector = settings
                .detector
                .as_ref()
                .ok_or(Error::NoDetectorConfigured)?;
            info!(message = "initializing detector", program = ?detector.program);
            ExternalDetector::new(detector).map(Arc::new)
        })
        .map(Arc::clone)
}

/// Analysis outcome per input, in input order. `None` marks an input skipped after an interrupt.
type Outcomes = Vec<Option<Result<Analysis, Error>>>;

#[instrument(skip(engine, settings, provider))]
fn analyze_input<P, F>(
    engine: &mut Engine,
    settings: &Settings,
    path: &Path,
    provider: F,
) -> Result<Analysis, Error>
where
    P: LandmarkProvider + Send + Sync + 'static,
    F: FnOnce() -> Result<Arc<P>, Error>,
{
    let bytes = fs::read(path).map_err(|e| Error::ReadInput(e, path.to_owned()))?;
    let input = if path.extension().map_or(false, |ext| ext == "json") {
        let request: AnalyzeRequest = serde_json::from_slice(&bytes)
            .map_err(|e| Error::ParseRequest(e, path.to_owned()))?;
        request.validate(settings.max_image_bytes)?
    } else {
        Input::Image(request::check_image(bytes, settings.max_image_bytes)?)
    };
    engine.analyze(input, provider)
}

/// Run `analyze` over `inputs` on up to `jobs` worker threads, each with its own [`Engine`].
///
/// Workers stop picking up inputs once `running` is cleared. `on_result` is called on the calling
/// thread after each input with the detector time that input took.
fn run_workers<F>(
    inputs: &[PathBuf],
    jobs: usize,
    settings: &Settings,
    running: &AtomicBool,
    analyze: F,
    mut on_result: impl FnMut(Duration),
) -> Result<(Outcomes, Timing)>
where
    F: Fn(&mut Engine, &Path) -> Result<Analysis, Error> + Sync,
{
    let (inputs_tx, inputs_rx) = crossbeam::channel::unbounded();
    for (index, path) in inputs.iter().enumerate() {
        inputs_tx.send((index, path.clone()))?;
    }
    drop(inputs_tx);

    let (results_tx, results_rx) = crossbeam::channel::unbounded();
    let jobs = jobs.clamp(1, inputs.len().max(1));
    let analyze = &analyze;

    crossbeam::thread::scope(|scope| {
        let workers: Vec<_> = (0..jobs)
            .map(|_| {
                let inputs_rx = inputs_rx.clone();
                let results_tx = results_tx.clone();
                scope.spawn(move |_| {
                    let mut engine =
                        Engine::new(settings.thresholds(), settings.detector_timeout());
                    while running.load(Ordering::SeqCst) {
                        let (index, path) = match inputs_rx.recv() {
                            Ok(job) => job,
                            Err(_) => break,
                        };
                        let before = engine.timing.detection;
                        let result = analyze(&mut engine, &path);
                        let detection = engine.timing.detection - before;
                        if results_tx.send((index, result, detection)).is_err() {
                            break;
                        }
                    }
                    engine.timing
                })
            })
            .collect();
        drop(results_tx);

        let mut results: Outcomes = inputs.iter().map(|_| None).collect();
        for (index, result, detection) in results_rx.iter() {
            on_result(detection);
            results[index] = Some(result);
        }

        let mut timing = Timing::default();
        for worker in workers {
            timing += worker
                .join()
                .map_err(|_| anyhow!("analysis worker panicked"))?;
        }
        Ok::<_, anyhow::Error>((results, timing))
    })
    .map_err(|_| anyhow!("analysis worker panicked"))?
}

/// The run's exit status once every report has been written.
fn conclude(total: usize, failed: usize, skipped: usize) -> Result<()> {
    if skipped > 0 {
        warn!(message = "interrupted before all inputs were analyzed", skipped);
        return Err(anyhow!(
            "interrupted: {} of {} inputs were not analyzed",
            skipped,
            total
        ));
    }
    if failed > 0 {
        return Err(anyhow!("{} of {} inputs failed", failed, total));
    }
    Ok(())
}

fn analyze(args: Analyze, settings: Settings) -> Result<()> {
    let settings = args.apply(settings).validate().context("invalid settings")?;

    let running = Arc::new(AtomicBool::new(true));
    let running_ctrl_c = running.clone();

    ctrlc::set_handler(move || {
        running_ctrl_c.store(false, Ordering::SeqCst);
    })
    .context("failed setting Ctrl-C handler")?;

    let pb = if args.show_progress {
        Some(
            ProgressBar::new(args.inputs.len() as u64).with_style(
                ProgressStyle::default_bar()
                    .template("{prefix:.bold.dim} [{bar:40}] {pos}/{len} {wide_msg}"),
            ),
        )
    } else {
        None
    };

    let start = Instant::now();
    let mut done = 0;
    let mut detection = Duration::default();

    let (results, timing) = run_workers(
        &args.inputs,
        args.jobs,
        &settings,
        &running,
        |engine, path| analyze_input(engine, &settings, path, || shared_detector(&settings)),
        |spent| {
            done += 1;
            detection += spent;
            if let Some(pb) = &pb {
                let done = done as f64;
                pb.set_message(format!(
                    "inputs/s: {:.1}, detector: {:.1}ms/input",
                    done / start.elapsed().as_secs_f64(),
                    detection.as_secs_f64() * 1000.0 / done
                ));
                pb.inc(1);
            }
        },
    )?;

    if let Some(pb) = &pb {
        pb.finish_and_clear();
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut records = Vec::new();
    let mut failed = 0;
    let mut skipped = 0;

    for (path, result) in args.inputs.iter().zip(results) {
        match result {
            None => skipped += 1,
            Some(Ok(analysis)) => {
                serde_json::to_writer(
                    &mut out,
                    &Report {
                        input: path,
                        analysis: Some(&analysis),
                        error: None,
                    },
                )?;
                writeln!(out)?;
                if let Some(assessment) = analysis.assessment() {
                    records.push(SessionRecord::new(
                        path.display().to_string(),
                        assessment.clone(),
                    ));
                }
            }
            Some(Err(e)) => {
                failed += 1;
                let message = format!("{:#}", anyhow::Error::from(e));
                error!(message = "analysis failed", input = ?path, error = %message);
                serde_json::to_writer(
                    &mut out,
                    &Report {
                        input: path,
                        analysis: None,
                        error: Some(message),
                    },
                )?;
                writeln!(out)?;
            }
        }
    }

    if let Some(session_log) = &settings.session_log {
        SessionLog::new(session_log)
            .append(&records)
            .context("failed writing session log")?;
    }

    info!(
        message = "finished",
        frames = timing.frames,
        elapsed_ms = start.elapsed().as_millis() as u64,
        detection_ms = timing.detection.as_millis() as u64
    );

    conclude(args.inputs.len(), failed, skipped)
}

fn describe(bands: &[Band]) -> String {
    bands
        .iter()
        .map(|band| format!("{} [{}, {}]", band.joint.name(), band.min, band.max))
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_rules() {
    for (priority, rule) in classify::RULES.iter().enumerate() {
        println!("{}. {} ({})", priority + 1, rule.exercise, rule.muscle);
        println!("   matches when: {}", describe(rule.bands));
        if let Some(placement) = rule.placement {
            println!("   placement:    {:?}", placement);
        }
        println!(
            "   ideal ranges: {}",
            describe(score::ideal_ranges(rule.exercise))
        );
    }
}

fn session_log(flag: Option<PathBuf>, settings: Settings) -> Result<SessionLog> {
    flag.or(settings.session_log)
        .map(SessionLog::new)
        .ok_or_else(|| anyhow!("no session log given and none configured"))
}

fn history(limit: usize, log: SessionLog) -> Result<()> {
    let records = log
        .recent(limit)
        .with_context(|| format!("failed reading session log {:?}", log.path()))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for record in &records {
        serde_json::to_writer(&mut out, record)?;
        writeln!(out)?;
    }
    Ok(())
}

fn stats(log: SessionLog) -> Result<()> {
    let records = log
        .records()
        .with_context(|| format!("failed reading session log {:?}", log.path()))?;
    let stats = SessionStats::from_records(&records);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, &stats)?;
    writeln!(out)?;
    Ok(())
}

fn main() -> Result<()> {
    let opt = Opt::from_args();

    tracing::subscriber::set_global_default(
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .with(opt.log_level),
    )?;

    let settings = Settings::load(opt.config.as_deref()).context("failed loading settings")?;

    match opt.command {
        Command::Analyze(args) => analyze(args, settings),
        Command::Rules => {
            print_rules();
            Ok(())
        }
        Command::History {
            limit,
            session_log: flag,
        } => history(limit, session_log(flag, settings)?),
        Command::Stats { session_log: flag } => stats(session_log(flag, settings)?),
    }
}

#[cfg(test)]
mod tests {
    use super::{analyze_input, conclude, run_workers, Analyze};
    use crate::{
        config::{DetectorSettings, Settings},
        detect::testing::StubProvider,
        engine::Analysis,
        pose::{testing::pose, KeypointKind},
    };
    use std::{
        fs,
        path::{Path, PathBuf},
        sync::{atomic::AtomicBool, Arc},
        time::Duration,
    };
    use structopt::StructOpt;

    fn flags(args: &[&str]) -> Analyze {
        let mut argv = vec!["analyze"];
        argv.extend_from_slice(args);
        Analyze::from_iter(argv)
    }

    fn configured_detector() -> Settings {
        Settings {
            detector: Some(DetectorSettings {
                program: PathBuf::from("pose-detector"),
                args: vec!["--model".to_owned(), "full".to_owned()],
            }),
            ..Settings::default()
        }
    }

    #[test]
    fn flags_override_settings() {
        let settings = Settings {
            session_log: Some(PathBuf::from("old.jsonl")),
            ..Settings::default()
        };
        let args = flags(&[
            "--timeout-ms",
            "250",
            "--min-pose-score",
            "0.7",
            "-t",
            "0.4",
            "--session-log",
            "new.jsonl",
            "squat.json",
        ]);
        let settings = args.apply(settings);
        assert_eq!(settings.detector_timeout_ms, 250);
        assert_eq!(settings.min_pose_score, 0.7);
        assert_eq!(settings.min_keypoint_score, 0.4);
        assert_eq!(settings.session_log, Some(PathBuf::from("new.jsonl")));
    }

    #[test]
    fn absent_flags_keep_settings() {
        let settings = Settings {
            min_keypoint_score: 0.6,
            session_log: Some(PathBuf::from("sessions.jsonl")),
            ..configured_detector()
        };
        assert_eq!(flags(&["squat.json"]).apply(settings.clone()), settings);
    }

    #[test]
    fn detector_args_replace_configured_args() {
        let args = flags(&[
            "--detector-arg",
            "--model",
            "--detector-arg",
            "lite",
            "frame.jpg",
        ]);
        assert_eq!(
            args.apply(configured_detector()).detector,
            Some(DetectorSettings {
                program: PathBuf::from("pose-detector"),
                args: vec!["--model".to_owned(), "lite".to_owned()],
            })
        );
    }

    #[test]
    fn detector_args_without_a_detector_are_ignored() {
        let args = flags(&["--detector-arg", "lite", "frame.jpg"]);
        assert_eq!(args.apply(Settings::default()).detector, None);
    }

    #[test]
    fn detector_flag_replaces_configured_detector() {
        let args = flags(&["-d", "other-detector", "--detector-arg", "-v", "frame.jpg"]);
        assert_eq!(
            args.apply(configured_detector()).detector,
            Some(DetectorSettings {
                program: PathBuf::from("other-detector"),
                args: vec!["-v".to_owned()],
            })
        );
    }

    fn frames(dir: &Path, count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|i| {
                let path = dir.join(format!("frame-{}.jpg", i));
                fs::write(&path, [0xff, 0xd8, i as u8]).unwrap();
                path
            })
            .collect()
    }

    fn frame_index(path: &Path) -> usize {
        path.file_stem()
            .unwrap()
            .to_str()
            .unwrap()
            .trim_start_matches("frame-")
            .parse()
            .unwrap()
    }

    #[test]
    fn parallel_results_follow_input_order() {
        const COUNT: usize = 8;
        let dir = tempfile::tempdir().unwrap();
        let inputs = frames(dir.path(), COUNT);
        let curl = pose(&[
            (KeypointKind::LeftHip, 100.0, 300.0),
            (KeypointKind::LeftShoulder, 100.0, 100.0),
            (KeypointKind::LeftElbow, 100.0, 200.0),
            (KeypointKind::LeftWrist, 145.886, 134.468),
        ]);
        // later frames finish first; odd frames contain a person
        let providers: Vec<_> = (0..COUNT)
            .map(|i| {
                Arc::new(StubProvider {
                    pose: if i % 2 == 1 { Some(curl) } else { None },
                    delay: Duration::from_millis(15 * (COUNT - i) as u64),
                })
            })
            .collect();
        let settings = Settings::default();
        let running = AtomicBool::new(true);
        let mut reported = 0;

        let (results, timing) = run_workers(
            &inputs,
            4,
            &settings,
            &running,
            |engine, path| {
                let provider = Arc::clone(&providers[frame_index(path)]);
                analyze_input(engine, &settings, path, || Ok(provider))
            },
            |_| reported += 1,
        )
        .unwrap();

        assert_eq!(reported, COUNT);
        assert_eq!(timing.frames, COUNT);
        assert_eq!(results.len(), COUNT);
        for (i, result) in results.into_iter().enumerate() {
            let analysis = result.unwrap().unwrap();
            if i % 2 == 1 {
                assert!(matches!(analysis, Analysis::Assessed(_)), "frame {}", i);
            } else {
                assert_eq!(analysis, Analysis::NoPoseDetected, "frame {}", i);
            }
        }
    }

    #[test]
    fn stopped_run_skips_every_input() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = frames(dir.path(), 3);
        let settings = Settings::default();
        let running = AtomicBool::new(false);

        let (results, _) = run_workers(
            &inputs,
            2,
            &settings,
            &running,
            |engine, path| {
                analyze_input(engine, &settings, path, || {
                    Ok(Arc::new(StubProvider::new(None)))
                })
            },
            |_| {},
        )
        .unwrap();
        assert!(results.iter().all(Option::is_none));
    }

    #[test]
    fn unreadable_input_is_reported_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let mut inputs = frames(dir.path(), 2);
        inputs.insert(1, dir.path().join("missing.jpg"));
        let settings = Settings::default();
        let running = AtomicBool::new(true);

        let (results, _) = run_workers(
            &inputs,
            3,
            &settings,
            &running,
            |engine, path| {
                analyze_input(engine, &settings, path, || {
                    Ok(Arc::new(StubProvider::new(None)))
                })
            },
            |_| {},
        )
        .unwrap();
        assert!(matches!(results[0], Some(Ok(Analysis::NoPoseDetected))));
        assert!(matches!(
            results[1],
            Some(Err(crate::error::Error::ReadInput(..)))
        ));
        assert!(matches!(results[2], Some(Ok(Analysis::NoPoseDetected))));
    }

    #[test]
    fn interrupted_run_is_an_error() {
        assert!(conclude(5, 0, 0).is_ok());

        let message = conclude(5, 0, 2).unwrap_err().to_string();
        assert!(message.contains("2 of 5 inputs were not analyzed"), "{}", message);

        let message = conclude(5, 1, 0).unwrap_err().to_string();
        assert!(message.contains("1 of 5 inputs failed"), "{}", message);
    }
}

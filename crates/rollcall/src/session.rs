//! The capture loop: frames → identities → presence events → attendance table.

use crate::overlay::Overlay;
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use rollcall_attendance::{AttendanceSink, PresenceEvent, PresenceTracker};
use rollcall_core::{FaceAnalyzer, Identifier, Identity};
use rollcall_hw::FrameSource;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Loop knobs that do not belong to any component.
#[derive(Debug, Clone, Default)]
pub struct LoopOptions {
    pub max_frames: Option<u64>,
    pub preview_path: Option<PathBuf>,
}

/// Counters reported when the loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub frames: u64,
    pub entries: u64,
    pub exits: u64,
    pub suppressed: u64,
}

/// Run until the quit flag is set, `max_frames` is reached, or capture fails.
///
/// A capture failure ends the loop normally. Analyzer and store failures
/// are returned as errors.
pub fn run_capture<F, A, S>(
    source: &mut F,
    identifier: &mut Identifier<A>,
    tracker: &mut PresenceTracker,
    sink: &mut S,
    quit: &AtomicBool,
    options: &LoopOptions,
    mut now: impl FnMut() -> NaiveDateTime,
) -> Result<SessionSummary>
where
    F: FrameSource,
    A: FaceAnalyzer,
    S: AttendanceSink,
{
    let mut summary = SessionSummary::default();
    let overlay = match options.preview_path {
        Some(_) => Some(Overlay::new().context("loading overlay font")?),
        None => None,
    };

    loop {
        if quit.load(Ordering::Relaxed) {
            tracing::info!("quit requested");
            break;
        }
        if options.max_frames.is_some_and(|max| summary.frames >= max) {
            tracing::info!(frames = summary.frames, "frame limit reached");
            break;
        }

        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "failed to capture frame, stopping");
                break;
            }
        };
        summary.frames += 1;

        let sequence = frame.sequence;
        let mut image = match frame.into_image() {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!(sequence, error = %e, "dropping malformed frame");
                continue;
            }
        };

        let matches = identifier.identify(&image).context("face analysis failed")?;
        let seen_at = now();

        let mut handled: Vec<&Identity> = Vec::with_capacity(matches.len());
        for m in &matches {
            tracing::debug!(sequence, label = %m.label(), distance = m.distance, "face");

            let Some(identity) = &m.identity else {
                continue;
            };
            if handled.contains(&identity) {
                continue;
            }
            handled.push(identity);

            match tracker.observe(identity, seen_at, sink).context("writing attendance")? {
                PresenceEvent::Entry => summary.entries += 1,
                PresenceEvent::Exit => summary.exits += 1,
                PresenceEvent::Suppressed => summary.suppressed += 1,
                PresenceEvent::Ignored => {}
            }
        }

        if let (Some(path), Some(overlay)) = (&options.preview_path, &overlay) {
            overlay.draw_matches(&mut image, &matches);
            if let Err(e) = image.save(path) {
                tracing::warn!(path = %path.display(), error = %e, "could not write preview");
            }
        }
    }

    Ok(summary)
}

/// Watch stdin for the quit key (`q` followed by Enter).
///
/// End of input does not count as quitting.
pub fn spawn_quit_listener() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let setter = Arc::clone(&flag);

    std::thread::Builder::new()
        .name("rollcall-quit".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if is_quit_command(&line) {
                    setter.store(true, Ordering::Relaxed);
                    break;
                }
            }
        })
        .context("spawning quit listener")?;

    Ok(flag)
}

fn is_quit_command(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("q")
}

/// Open `path` with the platform's default application. Failures are only logged.
pub fn open_in_viewer(path: &Path) {
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

    #[cfg(target_os = "macos")]
    let mut cmd = std::process::Command::new("open");
    #[cfg(target_os = "windows")]
    let mut cmd = {
        let mut c = std::process::Command::new("cmd");
        c.args(["/C", "start", ""]);
        c
    };
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let mut cmd = std::process::Command::new("xdg-open");

    match cmd.arg(&path).spawn() {
        Ok(_) => tracing::info!(path = %path.display(), "opened attendance table"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not open viewer"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use rollcall_attendance::{CsvAttendanceStore, PresenceConfig, SessionPolicy};
    use rollcall_core::{
        AnalyzerError, BoundingBox, DetectedFace, DistanceMatcher, Embedding, EnrollmentRecord,
    };
    use rollcall_hw::{CameraError, Frame};
    use std::collections::VecDeque;

    /// Yields `count` blank frames, then fails.
    struct ScriptedSource {
        remaining: u64,
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Frame, CameraError> {
            if self.remaining == 0 {
                return Err(CameraError::CaptureFailed("end of script".into()));
            }
            self.remaining -= 1;
            Ok(Frame {
                data: vec![0; 8 * 8 * 3],
                width: 8,
                height: 8,
                timestamp: std::time::Instant::now(),
                sequence: 0,
            })
        }
    }

    /// Returns one scripted face list per call; empty once the script runs out.
    struct ScriptedAnalyzer {
        frames: VecDeque<Vec<Vec<f32>>>,
    }

    impl FaceAnalyzer for ScriptedAnalyzer {
        fn analyze(&mut self, _image: &image::RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError> {
            let faces = self.frames.pop_front().unwrap_or_default();
            Ok(faces
                .into_iter()
                .map(|values| DetectedFace {
                    bbox: BoundingBox { x: 1.0, y: 1.0, width: 2.0, height: 2.0, confidence: 0.9 },
                    embedding: Embedding::new(values),
                })
                .collect())
        }
    }

    fn identifier(frames: Vec<Vec<Vec<f32>>>) -> Identifier<ScriptedAnalyzer> {
        let roster = vec![EnrollmentRecord {
            identity: Identity::new("Anushka", "2310990376"),
            embedding: Embedding::new(vec![1.0, 0.0]),
            source: PathBuf::from("1111.png"),
        }];
        Identifier::new(ScriptedAnalyzer { frames: frames.into() }, roster, DistanceMatcher::default())
            .with_downscale(1.0)
    }

    /// Clock starting at 09:00:00 that advances `step` seconds per call.
    fn ticking_clock(step: i64) -> impl FnMut() -> NaiveDateTime {
        let mut t = NaiveDate::from_ymd_opt(2026, 10, 16)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        move || {
            let current = t;
            t += Duration::seconds(step);
            current
        }
    }

    fn store(dir: &tempfile::TempDir) -> CsvAttendanceStore {
        CsvAttendanceStore::open(dir.path().join("log.csv"), SessionPolicy::OncePerDay, false).unwrap()
    }

    #[test]
    fn capture_failure_ends_loop_normally() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let mut sink = store(&dir);
        let known = vec![vec![1.0, 0.0]];

        let summary = run_capture(
            &mut ScriptedSource { remaining: 3 },
            &mut identifier(vec![known.clone(), known.clone(), known]),
            &mut PresenceTracker::default(),
            &mut sink,
            &AtomicBool::new(false),
            &LoopOptions::default(),
            ticking_clock(6),
        )
        .unwrap();

        // 09:00:00 entry, 09:00:06 ignored, 09:00:12 exit.
        assert_eq!(summary, SessionSummary { frames: 3, entries: 1, exits: 1, suppressed: 0 });
        assert_eq!(sink.records()[0].exit_time, chrono::NaiveTime::from_hms_opt(9, 0, 12));
    }

    #[test]
    fn quit_flag_stops_before_first_frame() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let summary = run_capture(
            &mut ScriptedSource { remaining: 10 },
            &mut identifier(vec![]),
            &mut PresenceTracker::default(),
            &mut store(&dir),
            &AtomicBool::new(true),
            &LoopOptions::default(),
            ticking_clock(1),
        )
        .unwrap();
        assert_eq!(summary.frames, 0);
    }

    #[test]
    fn max_frames_bounds_the_loop() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let options = LoopOptions { max_frames: Some(2), preview_path: None };
        let summary = run_capture(
            &mut ScriptedSource { remaining: 10 },
            &mut identifier(vec![]),
            &mut PresenceTracker::default(),
            &mut store(&dir),
            &AtomicBool::new(false),
            &options,
            ticking_clock(1),
        )
        .unwrap();
        assert_eq!(summary.frames, 2);
    }

    #[test]
    fn same_identity_twice_in_one_frame_counts_once() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let mut tracker = PresenceTracker::new(PresenceConfig::new(0, true));
        let mut sink = store(&dir);

        // With a zero window a second observation in the same frame would be an exit.
        let summary = run_capture(
            &mut ScriptedSource { remaining: 1 },
            &mut identifier(vec![vec![vec![1.0, 0.0], vec![0.9, 0.0], vec![-5.0, 0.0]]]),
            &mut tracker,
            &mut sink,
            &AtomicBool::new(false),
            &LoopOptions::default(),
            ticking_clock(1),
        )
        .unwrap();

        assert_eq!(summary.entries, 1);
        assert_eq!(summary.exits, 0);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn preview_is_written_when_configured() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let preview = dir.path().join("preview.png");
        let options = LoopOptions { max_frames: None, preview_path: Some(preview.clone()) };

        run_capture(
            &mut ScriptedSource { remaining: 1 },
            &mut identifier(vec![vec![vec![1.0, 0.0]]]),
            &mut PresenceTracker::default(),
            &mut store(&dir),
            &AtomicBool::new(false),
            &options,
            ticking_clock(1),
        )
        .unwrap();

        let img = image::open(&preview).unwrap().to_rgb8();
        assert_eq!(img.get_pixel(1, 1).0, [0, 255, 0]);
    }

    #[test]
    fn quit_command_parsing() {
        assert!(is_quit_command("q"));
        assert!(is_quit_command(" Q \n"));
        assert!(!is_quit_command("quit"));
        assert!(!is_quit_command(""));
    }
}

// Motion run state machine
//
// Idle → ModeSwitching → Streaming → Stopping → Restoring → Homing → Retrieving → Idle
//
// Streaming paces one jog command per profile sample against absolute
// deadlines (start + i·Δt). Any failure after the first command takes the
// abort path: zero velocity, settle, disable. The controller is never left
// jogging and never left armed after an error.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::chair::command::ControllerMode;
use crate::chair::controller::{Controller, SequencerState};
use crate::chair::error::ChairError;
use crate::chair::transport::Transport;
use crate::clock::Clock;
use crate::config::MotionConfig;
use crate::keshner::MotionProfile;
use crate::messages::{Phase, RunStatus};
use crate::recording::{RecordingSession, RecordingSink};

/// Cooperative stop signal, polled between samples
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub samples_sent: usize,
    pub total_samples: usize,
    pub cancelled: bool,
    pub recorded_lines: usize,
    /// Worst wake-up delay of any sample behind its deadline
    pub max_lateness: Duration,
}

/// A run that ended on an error, with the phase it failed in
#[derive(Debug, thiserror::Error)]
#[error("Motion run failed while {phase}: {error}")]
pub struct RunFailure {
    pub phase: Phase,
    #[source]
    pub error: ChairError,
}

struct StreamOutcome {
    sent: usize,
    cancelled: bool,
    max_lateness: Duration,
}

/// Drives one Keshner run over an exclusively borrowed transport
pub struct MotionSequencer<C: Clock> {
    config: MotionConfig,
    profile: MotionProfile,
    clock: C,
    cancel: CancelToken,
    status: Option<watch::Sender<RunStatus>>,
    state: SequencerState,
    phase: Phase,
}

impl<C: Clock> MotionSequencer<C> {
    pub fn new(config: MotionConfig, profile: MotionProfile, clock: C, cancel: CancelToken) -> Self {
        let state = SequencerState {
            acceleration: config.nominal_acceleration,
            ..SequencerState::default()
        };
        Self {
            config,
            profile,
            clock,
            cancel,
            status: None,
            state,
            phase: Phase::Idle,
        }
    }

    /// Publish run progress on a watch channel
    pub fn with_status(mut self, status: watch::Sender<RunStatus>) -> Self {
        self.status = Some(status);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &SequencerState {
        &self.state
    }

    pub fn profile(&self) -> &MotionProfile {
        &self.profile
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn enter(&mut self, phase: Phase) {
        info!("Run phase: {} → {}", self.phase, phase);
        self.phase = phase;
        self.publish(|s| s.phase = phase);
    }

    fn publish(&self, update: impl FnOnce(&mut RunStatus)) {
        if let Some(tx) = &self.status {
            tx.send_modify(update);
        }
    }

    /// Run the whole sequence, recording into `sink`
    pub fn run<T, S>(&mut self, transport: &mut T, sink: &mut S) -> Result<RunReport, RunFailure>
    where
        T: Transport + ?Sized,
        S: RecordingSink + ?Sized,
    {
        // Everything that can be rejected is rejected before the first byte goes out
        let session = RecordingSession::spanning(
            self.profile.total_duration(),
            self.config.record_samples,
            self.config.record_variables.clone(),
        )
        .and_then(|s| self.config.validate().map(|_| s))
        .map_err(|error| RunFailure {
            phase: Phase::Idle,
            error,
        })?;

        self.publish(|s| {
            *s = RunStatus {
                total_samples: self.profile.len(),
                ..RunStatus::default()
            }
        });

        let mut ctl = Controller::new(transport, self.state.clone());
        let result = self.drive(&mut ctl, &session, sink);
        let outcome = match result {
            Ok(report) => Ok(report),
            Err(error) => {
                let phase = self.phase;
                error!("Run failed while {}: {}", phase, error);
                self.abort(&mut ctl);
                Err(RunFailure { phase, error })
            }
        };

        self.state = ctl.into_state();
        self.enter(Phase::Idle);
        outcome
    }

    fn drive<T, S>(
        &mut self,
        ctl: &mut Controller<'_, T>,
        session: &RecordingSession,
        sink: &mut S,
    ) -> Result<RunReport, ChairError>
    where
        T: Transport + ?Sized,
        S: RecordingSink + ?Sized,
    {
        self.enter(Phase::ModeSwitching);
        ctl.switch_mode(
            ControllerMode::VelocityControl,
            &self.clock,
            self.config.mode_settle(),
        )?;

        self.enter(Phase::Streaming);
        ctl.set_acceleration(self.config.stream_acceleration)?;
        if self.config.quiet_during_stream {
            ctl.quiet()?;
        }
        // armed before the first jog so sample 0 is captured
        ctl.start_recording(session)?;
        let stream = self.stream(ctl)?;

        self.enter(Phase::Stopping);
        ctl.stop()?;
        self.clock.sleep(self.config.stop_settle());

        self.enter(Phase::Restoring);
        if ctl.state().quiet {
            ctl.dequiet()?;
        }
        ctl.switch_mode(
            ControllerMode::PositionControl,
            &self.clock,
            self.config.mode_settle(),
        )?;
        ctl.set_acceleration(self.config.nominal_acceleration)?;

        self.enter(Phase::Homing);
        ctl.move_absolute(0.0, self.config.homing_velocity)?;

        self.enter(Phase::Retrieving);
        let recorded_lines = ctl.retrieve_recording(session, sink)?;

        info!(
            "Run complete: {}/{} samples{}, {} recorded lines, worst lateness {:?}",
            stream.sent,
            self.profile.len(),
            if stream.cancelled { " (cancelled)" } else { "" },
            recorded_lines,
            stream.max_lateness
        );
        Ok(RunReport {
            samples_sent: stream.sent,
            total_samples: self.profile.len(),
            cancelled: stream.cancelled,
            recorded_lines,
            max_lateness: stream.max_lateness,
        })
    }

    fn stream<T: Transport + ?Sized>(
        &mut self,
        ctl: &mut Controller<'_, T>,
    ) -> Result<StreamOutcome, ChairError> {
        let dt = Duration::from_secs_f64(self.profile.sampling_interval());
        let mut deadline = self.clock.now();
        let mut outcome = StreamOutcome {
            sent: 0,
            cancelled: false,
            max_lateness: Duration::ZERO,
        };

        info!(
            "Streaming {} samples every {:?}",
            self.profile.len(),
            dt
        );
        for (t, speed) in self.profile.samples() {
            self.clock.sleep_until(deadline);
            if self.cancel.is_cancelled() {
                warn!("Run cancelled after {} samples", outcome.sent);
                outcome.cancelled = true;
                break;
            }

            let lateness = self.clock.now().saturating_duration_since(deadline);
            if lateness > dt {
                warn!("Sample at {:.2} s is {:?} late", t, lateness);
            }
            outcome.max_lateness = outcome.max_lateness.max(lateness);

            ctl.jog(speed, Some(format!("t={:.2} s", t)))?;
            outcome.sent += 1;
            self.publish(|s| {
                s.sample = outcome.sent;
                s.time_s = t;
                s.speed_deg_s = speed;
            });

            deadline += dt;
        }
        Ok(outcome)
    }

    /// Best effort: stop rotating, let it decelerate, disarm
    fn abort<T: Transport + ?Sized>(&mut self, ctl: &mut Controller<'_, T>) {
        warn!("Aborting run: stopping and disabling the motor");
        if let Err(e) = ctl.stop() {
            error!("Stop command failed during abort: {}", e);
        }
        self.clock.sleep(self.config.stop_settle());
        if let Err(e) = ctl.disable() {
            error!("Disable command failed during abort: {}", e);
        }
        self.publish(|s| s.speed_deg_s = 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chair::mock::MockTransport;
    use crate::clock::ManualClock;
    use crate::keshner::HarmonicSet;
    use crate::recording::MemorySink;

    fn config() -> MotionConfig {
        MotionConfig {
            sampling_interval_s: 0.1,
            total_duration_s: 0.9,
            record_samples: 100,
            ..MotionConfig::default()
        }
    }

    /// 10 samples: t = 0.0 .. 0.9
    fn sequencer(clock: ManualClock, cancel: CancelToken) -> MotionSequencer<ManualClock> {
        let config = config();
        let profile = MotionProfile::new(
            HarmonicSet::keshner(),
            config.sampling_interval_s,
            config.total_duration_s,
        )
        .unwrap();
        MotionSequencer::new(config, profile, clock, cancel)
    }

    /// Sets the cancel flag once `after` jogs went out
    struct CancelAfterJogs {
        inner: MockTransport,
        cancel: CancelToken,
        after: usize,
    }

    impl Transport for CancelAfterJogs {
        fn write_line(&mut self, line: &str) -> crate::chair::error::Result<()> {
            self.inner.write_line(line)?;
            if self.inner.written_with("j ").len() == self.after {
                self.cancel.cancel();
            }
            Ok(())
        }

        fn read_line(&mut self) -> crate::chair::error::Result<Option<String>> {
            self.inner.read_line()
        }

        fn clear_input(&mut self) -> crate::chair::error::Result<()> {
            self.inner.clear_input()
        }
    }

    #[test]
    fn test_full_run_command_order() {
        let mut seq = sequencer(ManualClock::new(), CancelToken::new());
        let mut t = MockTransport::new().with_recording(["1 2", "3 4"]);
        let mut sink = MemorySink::default();

        let report = seq.run(&mut t, &mut sink).unwrap();
        assert_eq!(report.samples_sent, 10);
        assert_eq!(report.total_samples, 10);
        assert!(!report.cancelled);
        assert_eq!(report.recorded_lines, 2);
        assert_eq!(sink.lines(), ["1 2", "3 4"]);
        assert!(sink.header().unwrap().starts_with("Sampling Time: 0.009"));

        let w = t.written();
        assert_eq!(
            &w[..8],
            [
                "k",
                "opmode 0",
                "en",
                "acc 100.00",
                "dec 100.00",
                "quiet",
                "record 288 100 \"MECHANGLE \"V",
                "rectrig \"CMD",
            ]
        );
        let jogs = &w[8..18];
        assert!(jogs.iter().all(|l| l.starts_with("j ")));
        assert_eq!(jogs[0], "j 0.00");
        assert_eq!(
            &w[18..],
            [
                "j 0.00",
                "dequiet",
                "k",
                "opmode 8",
                "en",
                "acc 10.00",
                "dec 10.00",
                "moveabs 0 2.50",
                "get",
            ]
        );

        assert_eq!(seq.phase(), Phase::Idle);
        assert_eq!(seq.state().mode, ControllerMode::PositionControl);
        assert!(seq.state().motor_enabled);
        assert!(!seq.state().quiet);
        assert_eq!(seq.state().acceleration, 60.0);
    }

    #[test]
    fn test_jogs_follow_profile() {
        let mut seq = sequencer(ManualClock::new(), CancelToken::new());
        let mut t = MockTransport::new().with_recording(Vec::<String>::new());
        seq.run(&mut t, &mut MemorySink::default()).unwrap();

        let expected: Vec<String> = seq
            .profile()
            .speed_table()
            .iter()
            .map(|&v| crate::chair::command::jog(v, None).unwrap().to_string())
            .collect();
        let jogs = t.written_with("j ");
        assert_eq!(&jogs[..10], expected.as_slice());
    }

    #[test]
    fn test_deadlines_do_not_drift() {
        // every wake-up overshoots by 7 ms
        let clock = ManualClock::with_jitter(Duration::from_millis(7));
        let mut seq = sequencer(clock, CancelToken::new());
        let mut t = MockTransport::new().with_recording(Vec::<String>::new());
        let report = seq.run(&mut t, &mut MemorySink::default()).unwrap();

        // mode settle (100 ms) plus its jitter comes first
        let deadlines = seq.clock().deadlines();
        let stream = &deadlines[1..11];
        let start = stream[0];
        for (i, d) in stream.iter().enumerate() {
            assert_eq!(*d - start, Duration::from_millis(100) * i as u32);
        }
        assert_eq!(report.max_lateness, Duration::from_millis(7));
    }

    #[test]
    fn test_cancel_after_three_samples() {
        let cancel = CancelToken::new();
        let mut seq = sequencer(ManualClock::new(), cancel.clone());
        let mut t = CancelAfterJogs {
            inner: MockTransport::new().with_recording(Vec::<String>::new()),
            cancel,
            after: 3,
        };

        let report = seq.run(&mut t, &mut MemorySink::default()).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.samples_sent, 3);

        let w = t.inner.written();
        assert_eq!(t.inner.written_with("j ").len(), 4);
        let stop = w.iter().position(|l| l == "dequiet").unwrap();
        assert_eq!(w[stop - 1], "j 0.00");
        // still restores and homes
        assert!(w.iter().any(|l| l == "opmode 8"));
        assert!(w.iter().any(|l| l == "moveabs 0 2.50"));
    }

    #[test]
    fn test_write_failure_mid_stream_stops_and_disables() {
        let config = MotionConfig {
            sampling_interval_s: 0.25,
            total_duration_s: 4.75,
            record_samples: 100,
            ..MotionConfig::default()
        };
        let profile = MotionProfile::new(HarmonicSet::keshner(), 0.25, 4.75).unwrap();
        assert_eq!(profile.len(), 20);
        let mut seq = MotionSequencer::new(config, profile, ManualClock::new(), CancelToken::new());
        let mut t = MockTransport::new().fail_on_nth("j ", 5);

        let failure = seq.run(&mut t, &mut MemorySink::default()).unwrap_err();
        assert_eq!(failure.phase, Phase::Streaming);
        assert!(matches!(failure.error, ChairError::TransportWrite(_)));

        let w = t.written();
        let failed = w.iter().enumerate().filter(|(_, l)| l.starts_with("j ")).nth(4).unwrap().0;
        assert_eq!(&w[failed + 1..], ["j 0.00", "k"]);
        assert!(!seq.state().motor_enabled);
        assert_eq!(seq.phase(), Phase::Idle);
    }

    #[test]
    fn test_missing_end_marker_fails_in_retrieving() {
        let mut seq = sequencer(ManualClock::new(), CancelToken::new());
        let mut t = MockTransport::new();
        let failure = seq.run(&mut t, &mut MemorySink::default()).unwrap_err();
        assert_eq!(failure.phase, Phase::Retrieving);
        assert!(matches!(failure.error, ChairError::ProtocolViolation(_)));
        assert_eq!(&t.written()[t.written().len() - 2..], ["j 0.00", "k"]);
        assert!(!seq.state().motor_enabled);
    }

    #[test]
    fn test_invalid_recording_sends_nothing() {
        let config = MotionConfig {
            record_samples: 5000,
            ..config()
        };
        let profile = MotionProfile::new(HarmonicSet::keshner(), 0.1, 0.9).unwrap();
        let mut seq = MotionSequencer::new(config, profile, ManualClock::new(), CancelToken::new());
        let mut t = MockTransport::new();
        let failure = seq.run(&mut t, &mut MemorySink::default()).unwrap_err();
        assert_eq!(failure.phase, Phase::Idle);
        assert!(matches!(failure.error, ChairError::InvalidArgument(_)));
        assert!(t.written().is_empty());
    }

    #[test]
    fn test_status_channel_tracks_run() {
        let (tx, rx) = watch::channel(RunStatus::default());
        let mut seq = sequencer(ManualClock::new(), CancelToken::new()).with_status(tx);
        let mut t = MockTransport::new().with_recording(Vec::<String>::new());
        seq.run(&mut t, &mut MemorySink::default()).unwrap();

        let status = rx.borrow().clone();
        assert_eq!(status.phase, Phase::Idle);
        assert_eq!(status.sample, 10);
        assert_eq!(status.total_samples, 10);
        assert_eq!(status.speed_deg_s, *seq.profile().speed_table().last().unwrap());
    }

    #[test]
    fn test_echo_kept_when_quiet_disabled() {
        let config = MotionConfig {
            quiet_during_stream: false,
            ..config()
        };
        let profile = MotionProfile::new(HarmonicSet::keshner(), 0.1, 0.9).unwrap();
        let mut seq = MotionSequencer::new(config, profile, ManualClock::new(), CancelToken::new());
        let mut t = MockTransport::new().with_recording(Vec::<String>::new());
        seq.run(&mut t, &mut MemorySink::default()).unwrap();
        assert!(t.written_with("quiet").is_empty());
        assert!(t.written_with("dequiet").is_empty());
    }

    #[test]
    fn test_recording_excludes_controller_echo() {
        let config = MotionConfig {
            quiet_during_stream: false,
            record_samples: 4,
            ..config()
        };
        // 91 echoed jogs alone would overrun the transfer cap of a 4-sample recording
        let profile = MotionProfile::new(HarmonicSet::keshner(), 0.1, 9.0).unwrap();
        let mut seq = MotionSequencer::new(config, profile, ManualClock::new(), CancelToken::new());
        let mut t = MockTransport::new()
            .with_echo()
            .with_recording(["DATA1", "DATA2"]);
        let mut sink = MemorySink::default();

        let report = seq.run(&mut t, &mut sink).unwrap();
        assert_eq!(report.recorded_lines, 2);
        assert_eq!(sink.lines(), ["DATA1", "DATA2"]);
    }
}

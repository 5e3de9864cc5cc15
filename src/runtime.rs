// Top-level orchestration for the command line tool
//
// Motion and serial I/O block, so each operation runs on a blocking task while
// this side waits for Ctrl-C and, with --zenoh, bridges status and stop requests.

use std::fs::File;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tracing::{info, warn};

use crate::chair::command::{self, BlendMode};
use crate::chair::{
    Channel, Controller, ControllerMode, MockTransport, SequencerState, SerialTransport, Transport,
};
use crate::cli::{Cli, Command};
use crate::clock::{Clock, HybridClock};
use crate::config::{
    BRIDGE_FLUSH, ChairConfig, MotionConfig, SCRIPT_LINE_DELAY, STATUS_HZ, TOPIC_STATUS,
    TOPIC_STOP,
};
use crate::keshner::MotionProfile;
use crate::messages::{RunStatus, StopRequest};
use crate::recording::FileSink;
use crate::script;
use crate::sequencer::{CancelToken, MotionSequencer};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub async fn run(cli: Cli) -> Result<(), BoxError> {
    let Cli {
        port,
        baud,
        config: config_path,
        dry_run,
        zenoh,
        command: request,
    } = cli;

    let mut config = match &config_path {
        Some(path) => {
            info!("Loading config from {}", path.display());
            ChairConfig::load(path)?
        }
        None => ChairConfig::default(),
    };
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(baud) = baud {
        config.baud_rate = baud;
    }

    match request {
        // Needs no controller
        Command::Profile { dt, duration, out } => write_profile(&config, dt, duration, out),
        other => {
            let channel = open_channel(&config, dry_run)?;
            drive(other, channel, config, zenoh).await
        }
    }
}

async fn drive(
    request: Command,
    channel: Channel,
    mut config: ChairConfig,
    zenoh: bool,
) -> Result<(), BoxError> {
    let cancel = CancelToken::new();

    match request {
        Command::Keshner {
            dt,
            duration,
            record_dir,
        } => {
            if let Some(dt) = dt {
                config.motion.sampling_interval_s = dt;
            }
            if let Some(duration) = duration {
                config.motion.total_duration_s = duration;
            }
            if let Some(dir) = record_dir {
                config.record_dir = dir;
            }
            run_keshner(channel, config, cancel, zenoh).await
        }
        Command::Home { ensure_mode } => {
            let task = tokio::task::spawn_blocking(move || -> Result<(), BoxError> {
                let mut link = channel.try_claim()?;
                let clock = HybridClock::default();
                position_move(&mut link, &config.motion, &clock, Move::Home, ensure_mode)
            });
            until_done(task, &cancel).await
        }
        Command::OneTour { ensure_mode } => {
            let task = tokio::task::spawn_blocking(move || -> Result<(), BoxError> {
                let mut link = channel.try_claim()?;
                let clock = HybridClock::default();
                position_move(&mut link, &config.motion, &clock, Move::OneTour, ensure_mode)
            });
            until_done(task, &cancel).await
        }
        Command::Send { line } => {
            let cmd = command::raw(&line)?;
            channel.send_raw(&cmd)?;
            info!("→ {}", cmd);
            Ok(())
        }
        Command::Script { file } => {
            let text = std::fs::read_to_string(&file)?;
            let commands = script::parse(&text)?;
            let token = cancel.clone();
            let task = tokio::task::spawn_blocking(move || -> Result<(), BoxError> {
                let mut link = channel.try_claim()?;
                let clock = HybridClock::default();
                let sent = script::play(&mut link, &commands, &clock, SCRIPT_LINE_DELAY, &token)?;
                info!("Script done: {}/{} line(s) sent", sent, commands.len());
                Ok(())
            });
            until_done(task, &cancel).await
        }
        Command::Listen { seconds } => {
            let token = cancel.clone();
            let task = tokio::task::spawn_blocking(move || {
                listen(&channel, Duration::from_secs(seconds), &token)
            });
            until_done(task, &cancel).await
        }
        Command::Profile { dt, duration, out } => write_profile(&config, dt, duration, out),
    }
}

fn open_channel(config: &ChairConfig, dry_run: bool) -> Result<Channel, BoxError> {
    if dry_run {
        info!("Dry run: commands are logged, nothing is sent");
        return Ok(Channel::new(MockTransport::dry_run()));
    }
    info!(
        "Opening controller link on {} at {} baud",
        config.port, config.baud_rate
    );
    let transport = SerialTransport::open(&config.port, config.baud_rate, config.read_timeout())?;
    Ok(Channel::new(transport))
}

/// Wait for a blocking task; Ctrl-C asks it to wind down instead of killing it
async fn until_done<R>(
    mut task: JoinHandle<Result<R, BoxError>>,
    cancel: &CancelToken,
) -> Result<R, BoxError> {
    loop {
        tokio::select! {
            joined = &mut task => return joined?,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, stopping");
                cancel.cancel();
            }
        }
    }
}

async fn run_keshner(
    channel: Channel,
    config: ChairConfig,
    cancel: CancelToken,
    use_zenoh: bool,
) -> Result<(), BoxError> {
    config.validate()?;
    let profile = MotionProfile::new(
        config.harmonics.clone(),
        config.motion.sampling_interval_s,
        config.motion.total_duration_s,
    )?;
    info!(
        "Keshner run: {} samples every {} s over {} s, peak {:.1} deg/s",
        profile.len(),
        profile.sampling_interval(),
        profile.total_duration(),
        config.harmonics.peak_speed()
    );

    let (status_tx, status_rx) = watch::channel(RunStatus::default());
    let mut sequencer = MotionSequencer::new(
        config.motion.clone(),
        profile,
        HybridClock::default(),
        cancel.clone(),
    )
    .with_status(status_tx);

    let bridge = use_zenoh.then(|| {
        let token = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_bridge(status_rx, token).await {
                warn!("Status bridge stopped: {}", e);
            }
        })
    });

    let record_dir = config.record_dir.clone();
    let task = tokio::task::spawn_blocking(move || -> Result<(), BoxError> {
        let mut link = channel.try_claim()?;
        let mut sink = FileSink::new(record_dir);
        let report = sequencer.run(&mut link, &mut sink)?;
        info!(
            "Sent {}/{} samples{}, worst lateness {:?}, {} recorded line(s)",
            report.samples_sent,
            report.total_samples,
            if report.cancelled { " (cancelled)" } else { "" },
            report.max_lateness,
            report.recorded_lines
        );
        if let Some(path) = sink.path() {
            info!("Recording saved to {}", path.display());
        }
        Ok(())
    });
    let result = until_done(task, &cancel).await;

    if let Some(mut bridge) = bridge {
        if timeout(BRIDGE_FLUSH, &mut bridge).await.is_err() {
            warn!("Status bridge did not publish the final status in time");
            bridge.abort();
        }
    }
    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Move {
    Home,
    OneTour,
}

/// Home or one full turn, both in position control
///
/// With `ensure_mode` the controller is switched to position control, enabled
/// and given the nominal acceleration first. Otherwise it is assumed to be there
/// already, as after a completed run or a power-up.
fn position_move<T, C>(
    link: &mut T,
    motion: &MotionConfig,
    clock: &C,
    target: Move,
    ensure_mode: bool,
) -> Result<(), BoxError>
where
    T: Transport + ?Sized,
    C: Clock,
{
    let state = SequencerState {
        acceleration: motion.nominal_acceleration,
        ..SequencerState::default()
    };
    let mut ctl = Controller::new(link, state);
    if ensure_mode {
        ctl.switch_mode(ControllerMode::PositionControl, clock, motion.mode_settle())?;
        ctl.set_acceleration(motion.nominal_acceleration)?;
    } else {
        info!("Assuming the controller is enabled in position control");
    }

    let speed = motion.homing_velocity;
    match target {
        Move::OneTour => {
            info!("One tour at {} deg/s", speed);
            ctl.move_incremental(360.0, speed, BlendMode::Queue)?;
        }
        Move::Home => {
            info!("Homing at {} deg/s", speed);
            ctl.move_absolute(0.0, speed)?;
        }
    }
    Ok(())
}

fn listen(channel: &Channel, span: Duration, cancel: &CancelToken) -> Result<(), BoxError> {
    let mut link = channel.try_claim()?;
    let until = Instant::now() + span;
    while Instant::now() < until && !cancel.is_cancelled() {
        match link.read_line()? {
            Some(line) => info!("← {}", line),
            None => std::thread::sleep(Duration::from_millis(50)),
        }
    }
    Ok(())
}

fn write_profile(
    config: &ChairConfig,
    dt: Option<f64>,
    duration: Option<f64>,
    out: Option<PathBuf>,
) -> Result<(), BoxError> {
    let profile = MotionProfile::new(
        config.harmonics.clone(),
        dt.unwrap_or(config.motion.sampling_interval_s),
        duration.unwrap_or(config.motion.total_duration_s),
    )?;
    match out {
        Some(path) => {
            profile.write_csv(File::create(&path)?)?;
            info!("Wrote {} samples to {}", profile.len(), path.display());
        }
        None => profile.write_csv(std::io::stdout().lock())?,
    }
    Ok(())
}

/// Republish run status and turn remote stop requests into cancellation
async fn serve_bridge(
    mut status: watch::Receiver<RunStatus>,
    cancel: CancelToken,
) -> Result<(), BoxError> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let subscriber = session.declare_subscriber(TOPIC_STOP).await?;
    let pub_status = session.declare_publisher(TOPIC_STATUS).await?;
    info!("Publishing status on {}, stop requests on {}", TOPIC_STATUS, TOPIC_STOP);

    let mut tick = interval(Duration::from_millis(1000 / STATUS_HZ));
    loop {
        tick.tick().await;

        // 1. Any stop request cancels, even one we cannot parse
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<StopRequest>(&payload) {
                Ok(req) => warn!(
                    "Remote stop requested: {}",
                    req.reason.as_deref().unwrap_or("no reason given")
                ),
                Err(e) => warn!("Unreadable stop request ({}), stopping anyway", e),
            }
            cancel.cancel();
        }

        // 2. Publish status when it changed; the last one goes out after the run ends
        match poll_status(&mut status) {
            StatusUpdate::Unchanged => {}
            StatusUpdate::Changed(snapshot) => {
                pub_status.put(serde_json::to_string(&snapshot)?).await?;
            }
            StatusUpdate::Final(snapshot) => {
                pub_status.put(serde_json::to_string(&snapshot)?).await?;
                info!("Run ended in phase {}, status bridge done", snapshot.phase);
                return Ok(());
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum StatusUpdate {
    Unchanged,
    Changed(RunStatus),
    /// The run dropped its sender; this is the status it ended with
    Final(RunStatus),
}

fn poll_status(status: &mut watch::Receiver<RunStatus>) -> StatusUpdate {
    match status.has_changed() {
        Ok(true) => StatusUpdate::Changed(status.borrow_and_update().clone()),
        Ok(false) => StatusUpdate::Unchanged,
        Err(_) => StatusUpdate::Final(status.borrow().clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chair::mock::MockTransport;
    use crate::clock::ManualClock;
    use crate::messages::Phase;

    #[test]
    fn test_final_status_survives_sender_drop() {
        let (tx, mut rx) = watch::channel(RunStatus::default());
        tx.send_modify(|s| s.phase = Phase::Streaming);
        assert!(matches!(poll_status(&mut rx), StatusUpdate::Changed(s) if s.phase == Phase::Streaming));
        assert_eq!(poll_status(&mut rx), StatusUpdate::Unchanged);

        // last update and sender drop land within one bridge tick
        tx.send_modify(|s| {
            s.phase = Phase::Idle;
            s.sample = 10;
        });
        drop(tx);
        match poll_status(&mut rx) {
            StatusUpdate::Final(s) => {
                assert_eq!(s.phase, Phase::Idle);
                assert_eq!(s.sample, 10);
            }
            other => panic!("expected final status, got {:?}", other),
        }
    }

    #[test]
    fn test_home_assumes_position_control() {
        let mut t = MockTransport::new();
        let clock = ManualClock::new();
        position_move(&mut t, &MotionConfig::default(), &clock, Move::Home, false).unwrap();
        assert_eq!(t.written(), ["moveabs 0 2.50"]);
    }

    #[test]
    fn test_ensure_mode_switches_before_moving() {
        let mut t = MockTransport::new();
        let clock = ManualClock::new();
        let motion = MotionConfig::default();
        position_move(&mut t, &motion, &clock, Move::OneTour, true).unwrap();
        assert_eq!(
            t.written(),
            ["k", "opmode 8", "en", "acc 10.00", "dec 10.00", "moveinc 8388608 2.50 2"]
        );
        assert_eq!(clock.elapsed(), motion.mode_settle());
    }
}

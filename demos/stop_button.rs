// Remote stop button: SPACE/S publishes a stop request, Q quits.
// Prints run status published by `rotation-chair --zenoh keshner`.
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use rotation_chair::config::{TOPIC_STATUS, TOPIC_STOP};
use rotation_chair::messages::{RunStatus, StopRequest};
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    info!("Controls: SPACE/S=stop run, Q=quit");

    enable_raw_mode()?;
    let result = run_button(&session).await;
    disable_raw_mode()?;

    result
}

async fn run_button(
    session: &zenoh::Session,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let publisher = session.declare_publisher(TOPIC_STOP).await?;
    let subscriber = session.declare_subscriber(TOPIC_STATUS).await?;
    let mut last_phase = None;

    loop {
        // Poll for key with 50ms timeout
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                if kind == KeyEventKind::Press {
                    match code {
                        KeyCode::Char(' ') | KeyCode::Char('s') => {
                            let req = StopRequest {
                                reason: Some("operator stop button".to_string()),
                            };
                            publisher.put(serde_json::to_string(&req)?).await?;
                            warn!("Stop request sent");
                        }
                        KeyCode::Char('q') | KeyCode::Esc => break,
                        _ => {}
                    }
                }
            }
        }

        // Show phase changes and progress
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            let Ok(status) = serde_json::from_slice::<RunStatus>(&payload) else {
                continue;
            };
            if last_phase != Some(status.phase) {
                info!("Phase: {}", status.phase);
                last_phase = Some(status.phase);
            }
            if status.sample > 0 && status.sample % 20 == 0 {
                info!(
                    "Sample {}/{} at {:.2} s: {:.2} deg/s",
                    status.sample, status.total_samples, status.time_s, status.speed_deg_s
                );
            }
        }
    }

    Ok(())
}

// Keyboard teleop: WASD translate, Z/X rotate, R/F speed, C zero encoders, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::info;

use swerve_zenoh_runtime::config::{TOPIC_CMD_DRIVE, TOPIC_CMD_ZERO};
use swerve_zenoh_runtime::messages::DriveCommand;

const SPEEDS: [f64; 3] = [0.2, 0.5, 1.0]; // fraction of full scale
const TURN_SPEEDS: [f64; 3] = [0.2, 0.4, 0.8];
const INPUT_TIMEOUT_MS: u64 = 100; // Reset command after this much time with no input

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let pub_drive = session.declare_publisher(TOPIC_CMD_DRIVE).await?;
    let pub_zero = session.declare_publisher(TOPIC_CMD_ZERO).await?;

    info!("Controls: WASD=move, Z/X=rotate, R/F=speed, C=zero encoders, Q=quit");
    info!("Speed: LOW");

    enable_raw_mode()?;
    let result = run_teleop(&pub_drive, &pub_zero).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(
    pub_drive: &zenoh::pubsub::Publisher<'_>,
    pub_zero: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 0;

    // Persistent command state
    let mut cmd = DriveCommand::default();
    let mut last_movement_input = Instant::now();

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    KeyCode::Char('w') if pressed => {
                        cmd.forward = SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        cmd.forward = -SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    // Strafe is positive to the right
                    KeyCode::Char('d') if pressed => {
                        cmd.strafe = SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('a') if pressed => {
                        cmd.strafe = -SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }

                    KeyCode::Char('x') if pressed => {
                        cmd.rotate = TURN_SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('z') if pressed => {
                        cmd.rotate = -TURN_SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }

                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(2);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                    }

                    // Only meaningful while the base is still
                    KeyCode::Char('c') if pressed => {
                        info!("Zeroing encoders");
                        pub_zero.put("{}").await?;
                    }

                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            cmd = DriveCommand::default();
        }

        // Always publish at ~50Hz
        pub_drive.put(serde_json::to_string(&cmd)?).await?;
    }

    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {}", label);
}

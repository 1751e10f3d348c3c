//! Line-oriented operator console
//!
//! The thinnest possible presentation layer: reads commands from stdin,
//! prints snapshots, and logs state transitions as they happen. It only
//! ever reads engine snapshots or queues intents; all mutation stays in
//! the engine task.
//!
//! Commands:
//!   on <device>    switch a device on
//!   off <device>   switch a device off
//!   status         print connection, temperature, and device states
//!   help           list commands

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::device::PowerState;
use crate::engine::EngineHandle;

/// Read operator commands from stdin until EOF or shutdown
pub async fn run_console(handle: EngineHandle, shutdown: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => return,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    info!("Console input closed");
                    return;
                }
                Err(e) => {
                    warn!("Failed to read console input: {}", e);
                    return;
                }
            },
        };

        handle_command(&handle, line.trim()).await;
    }
}

async fn handle_command(handle: &EngineHandle, line: &str) {
    let mut words = line.split_whitespace();
    match (words.next(), words.next()) {
        (None, _) => {}
        (Some("on"), Some(id)) => {
            if !handle.set_power(id, PowerState::On).await {
                warn!("Engine is gone, command ignored");
            }
        }
        (Some("off"), Some(id)) => {
            if !handle.set_power(id, PowerState::Off).await {
                warn!("Engine is gone, command ignored");
            }
        }
        (Some("status"), _) => print_status(handle),
        (Some("help"), _) => {
            println!("commands: on <device> | off <device> | status | help");
        }
        (Some(other), _) => {
            println!("unknown command {:?}, try 'help'", other);
        }
    }
}

fn print_status(handle: &EngineHandle) {
    let status = handle.connection.borrow().clone();
    println!("connection: {}", status.detail);

    match handle.temperature.borrow().as_ref() {
        Some(reading) => println!("temperature: {}", reading.raw),
        None => println!("temperature: ----"),
    }

    for view in handle.devices.borrow().iter() {
        println!("{}: {}", view.id, view.state);
    }
}

/// Log engine state transitions (the headless stand-in for a redraw)
pub async fn run_display(handle: EngineHandle, shutdown: CancellationToken) {
    let mut connection = handle.connection.clone();
    let mut temperature = handle.temperature.clone();
    let mut devices = handle.devices.clone();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            changed = connection.changed() => {
                if changed.is_err() {
                    return;
                }
                let status = connection.borrow_and_update().clone();
                info!("Status: {}", status.detail);
            }
            changed = temperature.changed() => {
                if changed.is_err() {
                    return;
                }
                if let Some(reading) = temperature.borrow_and_update().as_ref() {
                    info!("Temperature: {}", reading.raw);
                }
            }
            changed = devices.changed() => {
                if changed.is_err() {
                    return;
                }
                let snapshot = devices.borrow_and_update().clone();
                let line: Vec<String> = snapshot
                    .iter()
                    .map(|v| format!("{}={}", v.id, v.state))
                    .collect();
                info!("Devices: {}", line.join(" "));
            }
        }
    }
}

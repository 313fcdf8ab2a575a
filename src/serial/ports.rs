//! Serial port discovery and setup.

use console::{style, Term};
use log::{debug, info};
use serialport::{available_ports, SerialPort, SerialPortType};

use std::{
    sync::mpsc::{self, RecvTimeoutError},
    thread,
    time::Duration,
};

use super::keyboard::poll_escape;
use crate::{
    dialog::Dialog,
    error::{Error, Result},
    job, Settings,
};

const WAITING_PERIOD: u64 = 2;

//==============================================================================
// Public Interface
//==============================================================================

/// The port to talk to the device on: the one named in `settings` once it
/// shows up, or the operator's pick among the connected ones.
pub fn resolve_port(settings: &Settings, dialog: &mut dyn Dialog) -> Result<String> {
    match settings.path.as_deref() {
        Some(path) if !settings.auto_port() => {
            if wait_for_port(path) {
                return Err(Error::Declined);
            }
            Ok(path.to_owned())
        }
        _ => select_port(dialog),
    }
}

/// Wait for USB serial controllers to be connected, then ask which one to use
/// when there is more than one.
pub fn select_port(dialog: &mut dyn Dialog) -> Result<String> {
    let found = wait_for_any_port()?;
    let index = if found.len() == 1 {
        0
    } else {
        dialog.select("Select the serial port of the device", &found, 0)?
    };
    let name = port_name(&found[index]).to_owned();
    println!("[+] 👍 Serial port {} is ready", style(&name).green());
    Ok(name)
}

/// Check for a device with the given path in the system. If not immediately
/// found, enter into a waiting loop, checking every period of time whether the
/// device has been created or not. While waiting, the user can interactively
/// cancel waiting by pressing the `ESC` key.
///
/// The function will return `true` when the wait was cancelled by the user
/// hitting `Esc`.
pub fn wait_for_port(path: &str) -> bool {
    if check_requested_port(&enumerate_usb_serial_ports(), path) {
        return false;
    }

    let pb = job::spinner();
    pb.enable_steady_tick(120);
    pb.set_message(format!(
        "⏳ Waiting for {} to be ready (ESC to cancel)...",
        style(path).cyan()
    ));

    // The main thread polls for the device while a second thread listens for
    // `ESC`. Each side tells the other when it is done: `cancel` from the key
    // listener, `done` from the main thread once the device is there.
    let (cancel_tx, cancel_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel::<()>();

    let cancelation_thread = thread::spawn(move || loop {
        if done_rx.try_recv().is_ok() {
            break;
        }
        if let Ok(true) = poll_escape(Duration::from_millis(500)) {
            let _ = cancel_tx.send(());
            break;
        }
    });

    let mut attempt = 1;
    let cancelled = loop {
        let found_ports = enumerate_usb_serial_ports();
        if check_requested_port(&found_ports, path) {
            let _ = done_tx.send(());
            pb.finish_with_message(format!("👍 Serial port {} is ready", style(path).green()));
            break false;
        }

        let waited = attempt * WAITING_PERIOD;
        pb.set_message(format!(
            "[{:03}s {}] ⏳ Waiting for {} to be ready (ESC to cancel)...",
            style(waited).dim(),
            found_ports.len(),
            style(path).cyan()
        ));

        match cancel_rx.recv_timeout(Duration::from_secs(WAITING_PERIOD)) {
            Ok(()) => {
                pb.finish_with_message(format!(
                    "❌ Waiting on port {} canceled after {} seconds",
                    style(path).cyan(),
                    style(waited).dim()
                ));
                break true;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break true,
        }
        attempt += 1;
    };

    if cancelation_thread.join().is_err() {
        debug!("the ESC listener panicked");
    }
    cancelled
}

/// Open `path` with the line parameters of `settings`, retrying while the
/// device node settles.
pub fn open_and_setup_port(settings: &Settings, path: &str) -> Result<Box<dyn SerialPort>> {
    use retry::{delay, retry_with_index};

    let result = retry_with_index(
        delay::Fixed::from_millis(1000).take(4),
        |index| -> std::result::Result<Box<dyn SerialPort>, serialport::Error> {
            debug!("Trying to connect {}", index);
            serialport::new(path, settings.baud_rate)
                .data_bits(settings.data_bits)
                .stop_bits(settings.stop_bits)
                .parity(settings.parity)
                .flow_control(settings.flow_control)
                .timeout(Duration::from_millis(100))
                .open()
        },
    );
    let port = match result {
        Ok(port) => port,
        Err(retry::Error::Operation {
            error,
            total_delay,
            tries,
        }) => {
            info!(
                "Failed to open the port after {:?} and {} tries: {}",
                total_delay, tries, error,
            );
            return Err(error.into());
        }
        Err(retry::Error::Internal(msg)) => {
            info!("Internal retry error while opening port");
            return Err(Error::Transport(msg));
        }
    };

    let baud_rate = port.baud_rate()?;
    info!("Connected to {} at {} baud", path, baud_rate);
    debug!("data_bits    : {:#?}", port.data_bits()?);
    debug!("stop_bits    : {:#?}", port.stop_bits()?);
    debug!("parity       : {:#?}", port.parity()?);
    debug!("flow control : {:#?}", port.flow_control()?);

    if baud_rate != settings.baud_rate {
        return Err(Error::Transport(format!(
            "{} does not support {} baud",
            path, settings.baud_rate
        )));
    }
    Ok(port)
}

/// Enumerates serial devices on the system, USB ones with their
/// manufacturer and product.
pub fn enumerate_usb_serial_ports() -> Vec<String> {
    match available_ports() {
        Ok(ports) => ports
            .into_iter()
            .map(|p| match p.port_type {
                SerialPortType::UsbPort(info) => format!(
                    "{}: ({} / {})",
                    p.port_name,
                    info.manufacturer.as_deref().unwrap_or(""),
                    info.product.as_deref().unwrap_or("")
                ),
                // Virtual ports are handy for testing.
                _ => p.port_name,
            })
            .collect(),
        Err(e) => {
            info!("error: {}", e);
            Vec::new()
        }
    }
}

/// The device path part of an enumerated port description.
pub fn port_name(entry: &str) -> &str {
    // Windows names (`COM3`) and unix paths contain no `: `.
    entry.split(": ").next().unwrap_or(entry)
}

//==============================================================================
// Private stuff
//==============================================================================

fn check_requested_port(ports: &[String], path: &str) -> bool {
    ports.iter().any(|port| port_name(port) == path)
}

fn wait_for_any_port() -> Result<Vec<String>> {
    let found = enumerate_usb_serial_ports();
    if !found.is_empty() {
        return Ok(found);
    }

    let pb = job::spinner();
    pb.enable_steady_tick(120);
    // Avoid cursor flicker during the waiting.
    let _ = Term::stdout().hide_cursor();
    let mut attempt = 1;
    let result = loop {
        let found = enumerate_usb_serial_ports();
        if !found.is_empty() {
            pb.finish_with_message("Serial controller connected");
            break Ok(found);
        }
        pb.set_message(format!(
            "[{:03}s] ⌛ Waiting for a USB serial controller to be connected (ESC to cancel)...",
            style(attempt * WAITING_PERIOD).dim()
        ));
        if let Ok(true) = poll_escape(Duration::from_secs(WAITING_PERIOD)) {
            pb.finish_with_message("❌ Waiting canceled");
            break Err(Error::Declined);
        }
        attempt += 1;
    };
    let _ = Term::stdout().show_cursor();
    result
}

// =============================================================================
// Unit Tests
// =============================================================================

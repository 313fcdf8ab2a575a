//! Serial line access for the devices flashed and configured over a console.

mod console;
mod keyboard;
mod ports;

pub use console::{classify, AtTarget, ConsoleSignal, Port, SerialConsole, ShellTarget, SHELL_TIMEOUT};
pub use ports::{
    enumerate_usb_serial_ports, open_and_setup_port, port_name, resolve_port, select_port,
    wait_for_port,
};

use std::io::stdout;
use std::{process, time::Duration};

use crossterm::{
    cursor::{Hide, MoveToColumn, Show},
    event::{poll, read, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode},
    Result,
};

/// Wait up to `timeout` for a key press and report whether it was `Esc`.
pub(crate) fn poll_escape(timeout: Duration) -> Result<bool> {
    enable_raw_mode()?;
    execute!(stdout(), Hide)?;
    let ready = poll(timeout);
    execute!(stdout(), MoveToColumn(0), Show)?;
    disable_raw_mode()?;

    if !ready? {
        return Ok(false);
    }

    // `read` does not block after a successful `poll`.
    match read()? {
        Event::Key(KeyEvent {
            code: KeyCode::Esc, ..
        }) => Ok(true),
        Event::Key(KeyEvent {
            modifiers: KeyModifiers::CONTROL,
            code: KeyCode::Char('c'),
        }) => {
            // Raw mode swallows the signal, so Ctrl+C arrives as a key.
            println!();
            process::exit(0);
        }
        _ => Ok(false),
    }
}

use std::{
    io::{self, BufRead},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use log::{debug, info};

pub const QUIT_COMMAND: &str = "quit";

/// Reads control lines until one says `quit` (any case). Returns `false` if input ran out first.
pub fn wait_for_quit<R: BufRead>(reader: R) -> io::Result<bool> {
    for line in reader.lines() {
        let line = line?;
        if line.trim().eq_ignore_ascii_case(QUIT_COMMAND) {
            return Ok(true);
        }
        debug!("Ignoring control input {:?}", line);
    }

    Ok(false)
}

/// Watches stdin on its own thread and raises `shutdown` when `quit` arrives.
pub fn spawn_stdin_control(shutdown: Arc<AtomicBool>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("control".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            match wait_for_quit(stdin.lock()) {
                Ok(true) => {
                    info!("Quitting...");
                    shutdown.store(true, Ordering::SeqCst);
                }
                Ok(false) => info!("Control input closed, quit is no longer available"),
                Err(e) => info!("Control input failed: {}", e),
            }
        })
}

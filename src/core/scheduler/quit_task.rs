// src/core/scheduler/quit_task.rs - Interactive quit
//
// The quit stage only observes: it polls a `QuitSource` and cancels the shared
// `ShutdownToken` when asked to. Every other stage notices the token on its
// own and the end-of-stream cascade does the rest.

use crate::core::scheduler::{StageState, StageStatus};
use crate::core::sync::ShutdownToken;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, info};
use std::thread::JoinHandle;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Something that can ask the pipeline to stop.
pub trait QuitSource: Send {
    /// Waits up to `timeout` and returns `true` when a quit was requested.
    fn wait_for_quit(&mut self, timeout: Duration) -> bool;
}

fn is_quit_key(byte: u8) -> bool {
    byte == b'q' || byte == b'Q'
}

/// Quits when `q` is typed on standard input.
pub struct StdinQuitSource {
    #[cfg(not(unix))]
    keys: Receiver<u8>,
    eof: bool,
}

impl StdinQuitSource {
    #[cfg(unix)]
    pub fn new() -> Self {
        Self { eof: false }
    }

    #[cfg(not(unix))]
    pub fn new() -> Self {
        let (sender, keys) = crossbeam_channel::unbounded();
        let spawned = std::thread::Builder::new()
            .name("stdin-reader".to_string())
            .spawn(move || {
                use std::io::Read;
                for byte in std::io::stdin().lock().bytes() {
                    let Ok(byte) = byte else { break };
                    if sender.send(byte).is_err() {
                        break;
                    }
                }
            });
        if let Err(e) = spawned {
            log::warn!("stdin reader unavailable: {e}");
        }
        Self { keys, eof: false }
    }
}

impl Default for StdinQuitSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
impl QuitSource for StdinQuitSource {
    fn wait_for_quit(&mut self, timeout: Duration) -> bool {
        if self.eof {
            std::thread::sleep(timeout);
            return false;
        }

        let mut pollfd = libc::pollfd {
            fd: libc::STDIN_FILENO,
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
        // SAFETY: pollfd is a valid, exclusively borrowed array of length 1.
        let ready = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        if ready <= 0 {
            return false;
        }

        let mut buf = [0u8; 64];
        // SAFETY: buf is writable for buf.len() bytes.
        let read = unsafe { libc::read(libc::STDIN_FILENO, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if read <= 0 {
            debug!("stdin closed, interactive quit disabled");
            self.eof = true;
            return false;
        }
        buf[..read as usize].iter().copied().any(is_quit_key)
    }
}

#[cfg(not(unix))]
impl QuitSource for StdinQuitSource {
    fn wait_for_quit(&mut self, timeout: Duration) -> bool {
        if self.eof {
            std::thread::sleep(timeout);
            return false;
        }
        match self.keys.recv_timeout(timeout) {
            Ok(byte) => is_quit_key(byte),
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("stdin closed, interactive quit disabled");
                self.eof = true;
                false
            }
        }
    }
}

/// Quits when a message arrives on a channel. Used for signal handlers and
/// embedding applications.
pub struct ChannelQuitSource {
    receiver: Receiver<()>,
}

impl ChannelQuitSource {
    pub fn new(receiver: Receiver<()>) -> Self {
        Self { receiver }
    }
}

impl QuitSource for ChannelQuitSource {
    fn wait_for_quit(&mut self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Ok(()) => true,
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                std::thread::sleep(timeout);
                false
            }
        }
    }
}

pub(crate) fn quit_init(
    source: Box<dyn QuitSource>,
    shutdown: ShutdownToken,
    status: StageStatus,
) -> std::io::Result<JoinHandle<crate::error::Result<()>>> {
    std::thread::Builder::new()
        .name("quit".to_string())
        .spawn(move || {
            let mut source = source;
            status.set(StageState::Running);
            while !shutdown.is_cancelled() {
                if source.wait_for_quit(POLL_INTERVAL) {
                    info!("Quit requested, stopping the pipeline.");
                    shutdown.cancel();
                }
            }
            status.set(StageState::Stopped);
            Ok(())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_quit_cancels_token() {
        let _ = env_logger::builder().is_test(true).try_init();

        let (sender, receiver) = crossbeam_channel::bounded(1);
        let shutdown = ShutdownToken::new();
        let handle = quit_init(
            Box::new(ChannelQuitSource::new(receiver)),
            shutdown.clone(),
            StageStatus::new(),
        )
        .unwrap();

        assert!(!shutdown.is_cancelled());
        sender.send(()).unwrap();
        handle.join().unwrap().unwrap();
        assert!(shutdown.is_cancelled());
    }

    #[test]
    fn test_quit_stage_exits_on_external_cancel() {
        let (_sender, receiver) = crossbeam_channel::bounded::<()>(1);
        let shutdown = ShutdownToken::new();
        let status = StageStatus::new();
        let handle = quit_init(
            Box::new(ChannelQuitSource::new(receiver)),
            shutdown.clone(),
            status.clone(),
        )
        .unwrap();

        shutdown.cancel();
        handle.join().unwrap().unwrap();
        assert_eq!(status.get(), StageState::Stopped);
    }

    #[test]
    fn test_quit_keys() {
        assert!(is_quit_key(b'q'));
        assert!(is_quit_key(b'Q'));
        assert!(!is_quit_key(b'\n'));
    }
}

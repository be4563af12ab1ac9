//! Channel hopper: round-robin tuning over a hop list.
//!
//! One hopper per interface, running as a long-lived task. Control flows
//! through a command channel rather than direct field access so the
//! locker can pause and resume without lifecycle coupling; queued
//! commands are always drained before the radio is touched, which gives
//! the ordering guarantee the locker needs — a `Lock` issued before a
//! tick is observed before that tick tunes.
//!
//! ```text
//! State Transitions:
//!
//! ┌──────┐ start  ┌─────────┐ pause(d)  ┌────────┐
//! │ Idle │───────►│ Hopping │──────────►│ Paused │
//! └──────┘        └─────────┘◄──────────└────────┘
//!                   │     ▲    resume / deadline
//!         lock(ch)  │     │ unlock
//!                   ▼     │
//!                 ┌─────────┐
//!                 │ Locked  │
//!                 └─────────┘
//!
//! Any state ── stop ──► Stopped (terminal)
//! ```

use super::switcher::ChannelSwitcher;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopperState {
    Idle,
    Hopping,
    Paused,
    Locked,
    Stopped,
}

enum Command {
    Start,
    Pause(Duration),
    Resume,
    Lock(u16),
    Unlock,
    SetChannels(Vec<u16>),
    Stop,
}

struct Inner {
    state: HopperState,
    channels: Vec<u16>,
    index: usize,
    locked_channel: Option<u16>,
    pause_until: Option<tokio::time::Instant>,
    /// Consecutive tune failures since the last success.
    consecutive_errors: u64,
    total_errors: u64,
    tunes: u64,
}

/// Cloneable handle to a hopper task.
#[derive(Clone)]
pub struct ChannelHopper {
    interface: Arc<str>,
    shared: Arc<Mutex<Inner>>,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl ChannelHopper {
    /// Create the hopper task in the Idle state.
    pub fn new(
        interface: impl Into<String>,
        channels: Vec<u16>,
        dwell: Duration,
        switcher: Arc<dyn ChannelSwitcher>,
    ) -> Self {
        let interface: Arc<str> = interface.into().into();
        let shared = Arc::new(Mutex::new(Inner {
            state: HopperState::Idle,
            channels,
            index: 0,
            locked_channel: None,
            pause_until: None,
            consecutive_errors: 0,
            total_errors: 0,
            tunes: 0,
        }));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let iface = interface.clone();
        let state = shared.clone();
        tokio::spawn(run(iface, state, cmd_rx, switcher, dwell));

        Self { interface, shared, cmd_tx }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn start(&self) {
        let _ = self.cmd_tx.send(Command::Start);
    }

    /// Pause hopping for `duration`, then auto-resume. Only meaningful
    /// while hopping.
    pub fn pause(&self, duration: Duration) {
        let _ = self.cmd_tx.send(Command::Pause(duration));
    }

    pub fn resume(&self) {
        let _ = self.cmd_tx.send(Command::Resume);
    }

    /// Enter the locked state and hold `channel`. The channel is tuned
    /// once on entry; no further tuning happens until unlock.
    pub fn lock(&self, channel: u16) {
        let _ = self.cmd_tx.send(Command::Lock(channel));
    }

    pub fn unlock(&self) {
        let _ = self.cmd_tx.send(Command::Unlock);
    }

    /// Terminal stop.
    pub fn stop(&self) {
        let _ = self.cmd_tx.send(Command::Stop);
    }

    /// Hot-swap the hop list; the index restarts at 0.
    pub fn set_channels(&self, channels: Vec<u16>) {
        let _ = self.cmd_tx.send(Command::SetChannels(channels));
    }

    /// Defensive copy of the current hop list.
    pub fn get_channels(&self) -> Vec<u16> {
        self.shared.lock().channels.clone()
    }

    pub fn state(&self) -> HopperState {
        self.shared.lock().state
    }

    /// Channel held while locked.
    pub fn locked_channel(&self) -> Option<u16> {
        self.shared.lock().locked_channel
    }

    /// Total successful tunes (test observability).
    pub fn tunes(&self) -> u64 {
        self.shared.lock().tunes
    }

    pub fn tune_errors(&self) -> u64 {
        self.shared.lock().total_errors
    }
}

async fn run(
    interface: Arc<str>,
    shared: Arc<Mutex<Inner>>,
    mut rx: mpsc::UnboundedReceiver<Command>,
    switcher: Arc<dyn ChannelSwitcher>,
    dwell: Duration,
) {
    loop {
        // Apply every queued control message before touching the radio.
        while let Ok(cmd) = rx.try_recv() {
            apply(&interface, &shared, switcher.as_ref(), cmd);
        }

        let (state, pause_until) = {
            let g = shared.lock();
            (g.state, g.pause_until)
        };

        match state {
            HopperState::Stopped => break,

            HopperState::Idle | HopperState::Locked => match rx.recv().await {
                Some(cmd) => apply(&interface, &shared, switcher.as_ref(), cmd),
                None => break,
            },

            HopperState::Paused => {
                let deadline = pause_until.unwrap_or_else(tokio::time::Instant::now);
                tokio::select! {
                    cmd = rx.recv() => match cmd {
                        Some(cmd) => apply(&interface, &shared, switcher.as_ref(), cmd),
                        None => break,
                    },
                    _ = tokio::time::sleep_until(deadline) => {
                        let mut g = shared.lock();
                        if g.state == HopperState::Paused {
                            g.state = HopperState::Hopping;
                            g.pause_until = None;
                        }
                    }
                }
            }

            HopperState::Hopping => {
                tune_next(&interface, &shared, switcher.as_ref());
                tokio::select! {
                    cmd = rx.recv() => match cmd {
                        Some(cmd) => apply(&interface, &shared, switcher.as_ref(), cmd),
                        None => break,
                    },
                    _ = tokio::time::sleep(dwell) => {}
                }
            }
        }
    }
    debug!("Hopper for {} exited", interface);
}

fn apply(
    interface: &str,
    shared: &Arc<Mutex<Inner>>,
    switcher: &dyn ChannelSwitcher,
    cmd: Command,
) {
    let mut g = shared.lock();
    if g.state == HopperState::Stopped {
        return;
    }
    match cmd {
        Command::Start => {
            if g.state == HopperState::Idle {
                g.state = HopperState::Hopping;
                info!("Hopper on {} started ({} channels)", interface, g.channels.len());
            }
        }
        Command::Pause(duration) => {
            if g.state == HopperState::Hopping {
                g.state = HopperState::Paused;
                g.pause_until = Some(tokio::time::Instant::now() + duration);
            }
        }
        Command::Resume => {
            if g.state == HopperState::Paused {
                g.state = HopperState::Hopping;
                g.pause_until = None;
            }
        }
        Command::Lock(channel) => {
            g.state = HopperState::Locked;
            g.locked_channel = Some(channel);
            g.pause_until = None;
            // Applied once on lock entry, then held.
            drop(g);
            tune(interface, shared, switcher, channel);
        }
        Command::Unlock => {
            if g.state == HopperState::Locked {
                g.state = HopperState::Hopping;
                g.locked_channel = None;
            }
        }
        Command::SetChannels(channels) => {
            g.channels = channels;
            g.index = 0;
        }
        Command::Stop => {
            g.state = HopperState::Stopped;
            info!("Hopper on {} stopped", interface);
        }
    }
}

fn tune_next(interface: &str, shared: &Arc<Mutex<Inner>>, switcher: &dyn ChannelSwitcher) {
    let channel = {
        let mut g = shared.lock();
        if g.channels.is_empty() {
            return;
        }
        let ch = g.channels[g.index % g.channels.len()];
        g.index = (g.index + 1) % g.channels.len();
        ch
    };
    tune(interface, shared, switcher, channel);
}

fn tune(interface: &str, shared: &Arc<Mutex<Inner>>, switcher: &dyn ChannelSwitcher, channel: u16) {
    match switcher.set_channel(interface, channel) {
        Ok(()) => {
            let mut g = shared.lock();
            g.tunes += 1;
            if g.consecutive_errors > 0 {
                info!(
                    "Hopper on {} recovered after {} failed tunes",
                    interface, g.consecutive_errors
                );
                g.consecutive_errors = 0;
            }
        }
        Err(e) => {
            let mut g = shared.lock();
            g.consecutive_errors += 1;
            g.total_errors += 1;
            // First failure, then every tenth, to keep a dead radio from
            // flooding the log at hop rate.
            if (g.consecutive_errors - 1) % 10 == 0 {
                warn!(
                    "Hopper on {} failed to tune channel {} ({} consecutive): {}",
                    interface, channel, g.consecutive_errors, e
                );
            }
        }
    }
}

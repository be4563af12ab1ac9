//! Channel switcher: the one place the radio dial is actually turned.

use super::RadioError;
use crate::types::MAX_CHANNEL;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, warn};

/// Applies a channel to a named interface. The trait seam exists so the
/// hopper and locker can be exercised against a recording fake; the
/// production implementation shells out to the platform tool.
pub trait ChannelSwitcher: Send + Sync {
    fn set_channel(&self, interface: &str, channel: u16) -> Result<(), RadioError>;
}

/// Production switcher driving `iw dev <if> set channel <n>`.
pub struct IwSwitcher {
    tool: String,
}

impl IwSwitcher {
    pub fn new() -> Self {
        Self { tool: "iw".to_string() }
    }

    pub fn with_tool(tool: impl Into<String>) -> Self {
        Self { tool: tool.into() }
    }
}

impl Default for IwSwitcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelSwitcher for IwSwitcher {
    fn set_channel(&self, interface: &str, channel: u16) -> Result<(), RadioError> {
        if channel == 0 || channel > MAX_CHANNEL {
            return Err(RadioError::InvalidChannel(channel));
        }

        let output = Command::new(&self.tool)
            .args(["dev", interface, "set", "channel", &channel.to_string()])
            .output()
            .map_err(|e| RadioError::ChannelSetFailed {
                interface: interface.to_string(),
                channel,
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(RadioError::ChannelSetFailed {
                interface: interface.to_string(),
                channel,
                reason: if stderr.is_empty() {
                    format!("exit status {}", output.status)
                } else {
                    stderr
                },
            });
        }

        debug!("{} tuned to channel {}", interface, channel);
        Ok(())
    }
}

/// Retry a channel set with linear-growth backoff (100 ms × attempt).
/// Surfaces the last error when every attempt fails.
pub async fn set_with_retry(
    switcher: &dyn ChannelSwitcher,
    interface: &str,
    channel: u16,
    max_retries: u32,
) -> Result<(), RadioError> {
    if channel == 0 || channel > MAX_CHANNEL {
        return Err(RadioError::InvalidChannel(channel));
    }

    let mut last_err = None;
    for attempt in 1..=max_retries.max(1) {
        match switcher.set_channel(interface, channel) {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(
                    "Channel set attempt {}/{} on {} failed: {}",
                    attempt, max_retries, interface, e
                );
                last_err = Some(e);
            }
        }
        if attempt < max_retries {
            tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
        }
    }
    Err(last_err.unwrap_or(RadioError::InvalidChannel(channel)))
}

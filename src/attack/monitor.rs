//! Effectiveness monitor.
//!
//! Consumes the injector's passive observations of the victim and turns
//! them into controller effects:
//!
//! - `Handshake` — the goal: mark it captured and cancel the attack.
//! - `Disconnected` — the victim was knocked off; stop the attack.
//! - `Probe` — positive signal only (the victim is scanning), no state
//!   change.
//!
//! Runs on a child token of the attack so it is torn down with it but
//! never outlives it.

use super::controller::AttackController;
use super::AttackStatus;
use crate::radio::MonitorEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub async fn run(
    controller: Arc<AttackController>,
    mut events: mpsc::Receiver<MonitorEvent>,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            ev = events.recv() => match ev {
                Some(ev) => ev,
                None => break,
            },
        };

        match event {
            MonitorEvent::Handshake => {
                info!("Attack {}: handshake captured, stopping", controller.id);
                controller.mark_handshake();
                controller.cancel();
                break;
            }
            MonitorEvent::Disconnected => {
                info!("Attack {}: target disconnected", controller.id);
                controller.set_status(AttackStatus::Stopped);
                controller.cancel();
                break;
            }
            MonitorEvent::Probe => {
                debug!("Attack {}: target probing (working)", controller.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attack::AttackKind;

    fn controller() -> Arc<AttackController> {
        let c = AttackController::new(AttackKind::Deauth, serde_json::json!({}));
        c.set_status(AttackStatus::Running);
        c
    }

    #[tokio::test]
    async fn test_handshake_marks_and_cancels() {
        let c = controller();
        let (tx, rx) = mpsc::channel(4);
        let token = c.cancel_token().child_token();
        let task = tokio::spawn(run(c.clone(), rx, token));

        tx.send(MonitorEvent::Probe).await.unwrap();
        tx.send(MonitorEvent::Handshake).await.unwrap();
        task.await.unwrap();

        assert!(c.handshake_captured());
        assert!(c.is_cancelled());
        // Status is left to the attack worker's epilogue.
        assert_eq!(c.status(), AttackStatus::Running);
    }

    #[tokio::test]
    async fn test_disconnect_stops() {
        let c = controller();
        let (tx, rx) = mpsc::channel(4);
        let token = c.cancel_token().child_token();
        let task = tokio::spawn(run(c.clone(), rx, token));

        tx.send(MonitorEvent::Disconnected).await.unwrap();
        task.await.unwrap();

        assert_eq!(c.status(), AttackStatus::Stopped);
        assert!(c.is_cancelled());
    }

    #[tokio::test]
    async fn test_token_cancellation_ends_monitor() {
        let c = controller();
        let (_tx, rx) = mpsc::channel(4);
        let token = c.cancel_token().child_token();
        let task = tokio::spawn(run(c.clone(), rx, token.clone()));
        token.cancel();
        task.await.unwrap();
        assert_eq!(c.status(), AttackStatus::Running);
    }
}

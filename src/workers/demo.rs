//! Two in-process peers over a loopback network.
//!
//! `alice` sends the requested files and chat message to `bob` and can place
//! a call; `bob` accepts every invite and stores whatever arrives. Every UI
//! event is logged through tracing at its notification level.

use crate::workers::args::Args;
use anyhow::{bail, Context, Result};
use peerlink::core::connection::memory::LoopbackNetwork;
use peerlink::core::connection::{PeerTransport, Signaling};
use peerlink::core::protocol::MessageStatus;
use peerlink::ui::{NotifyLevel, Popup};
use peerlink::{Orchestrator, SessionConfig, UiEvent, UiSink};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const SENDER: &str = "alice";
const RECEIVER: &str = "bob";

/// Milestones the driver waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Registered,
    FileDone,
    MessageDelivered,
    CallSettled,
}

struct Participant {
    orchestrator: Orchestrator,
    tasks: Vec<JoinHandle<()>>,
}

impl Participant {
    fn join(
        net: &LoopbackNetwork,
        username: &str,
        config: &SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let endpoint = net.join(username);
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let orchestrator = Orchestrator::new(
            config.clone(),
            endpoint.transport as Arc<dyn PeerTransport>,
            endpoint.signaling as Arc<dyn Signaling>,
            Arc::new(ui_tx) as Arc<dyn UiSink>,
        );
        let run = tokio::spawn(orchestrator.clone().run(endpoint.events, endpoint.signals));
        (
            Self {
                orchestrator,
                tasks: vec![run],
            },
            ui_rx,
        )
    }

    fn shutdown(self) {
        self.tasks.iter().for_each(JoinHandle::abort);
    }
}

pub async fn run(args: Args, config: SessionConfig) -> Result<()> {
    let net = LoopbackNetwork::new();
    let (outcome_tx, mut outcomes) = mpsc::unbounded_channel();

    let (mut alice, alice_ui) = Participant::join(&net, SENDER, &config);
    let (mut bob, bob_ui) = Participant::join(&net, RECEIVER, &config);

    alice
        .tasks
        .push(tokio::spawn(watch_sender(alice_ui, outcome_tx.clone())));
    bob.tasks.push(tokio::spawn(watch_receiver(
        bob.orchestrator.clone(),
        bob_ui,
        args.output.clone(),
        outcome_tx,
    )));

    let deadline = Duration::from_secs(args.timeout_secs);
    wait_for(&mut outcomes, Outcome::Registered, 2, deadline)
        .await
        .context("Peers never registered")?;

    let sender = &alice.orchestrator;
    let mut files = 0;
    for path in &args.files {
        match sender.submit_path(path, RECEIVER).await {
            Ok(file_id) => {
                debug!(event = "file_submitted", %file_id, path = %path.display());
                files += 1;
            }
            Err(e) => warn!(event = "file_rejected", path = %path.display(), %e),
        }
    }
    if let Some(text) = &args.message {
        sender.send_text(RECEIVER, text).await?;
    }
    if let Some(channel) = args.call {
        sender.request_media_stream(RECEIVER, channel).await?;
    }

    let expected = [
        (Outcome::FileDone, files),
        (Outcome::MessageDelivered, usize::from(args.message.is_some())),
        (Outcome::CallSettled, usize::from(args.call.is_some())),
    ];
    let settled = wait_all(&mut outcomes, &expected, deadline).await;

    alice.orchestrator.logout().await;
    bob.orchestrator.logout().await;
    net.leave(SENDER);
    net.leave(RECEIVER);
    alice.shutdown();
    bob.shutdown();

    settled
}

async fn wait_for(
    outcomes: &mut mpsc::UnboundedReceiver<Outcome>,
    wanted: Outcome,
    count: usize,
    deadline: Duration,
) -> Result<()> {
    wait_all(outcomes, &[(wanted, count)], deadline).await
}

/// Wait until each outcome has been seen the given number of times.
/// Outcomes not listed are dropped.
async fn wait_all(
    outcomes: &mut mpsc::UnboundedReceiver<Outcome>,
    expected: &[(Outcome, usize)],
    deadline: Duration,
) -> Result<()> {
    let mut remaining: Vec<(Outcome, usize)> =
        expected.iter().copied().filter(|(_, n)| *n > 0).collect();
    let wait = async {
        while !remaining.is_empty() {
            let Some(outcome) = outcomes.recv().await else {
                break;
            };
            if let Some(entry) = remaining.iter_mut().find(|(o, _)| *o == outcome) {
                entry.1 -= 1;
            }
            remaining.retain(|(_, n)| *n > 0);
        }
    };
    if tokio::time::timeout(deadline, wait).await.is_err() || !remaining.is_empty() {
        bail!("Gave up waiting for {remaining:?}");
    }
    Ok(())
}

fn log_event(peer: &str, event: &UiEvent) {
    let note = event.notification();
    match note.level {
        NotifyLevel::Error => error!(event = "ui", %peer, "{note}"),
        NotifyLevel::Warning => warn!(event = "ui", %peer, "{note}"),
        NotifyLevel::Success | NotifyLevel::Info => info!(event = "ui", %peer, "{note}"),
    }
}

async fn watch_sender(
    mut events: mpsc::UnboundedReceiver<UiEvent>,
    outcomes: mpsc::UnboundedSender<Outcome>,
) {
    while let Some(event) = events.recv().await {
        if matches!(event, UiEvent::FileProgress { .. }) {
            debug!(event = "ui", peer = SENDER, "{}", event.notification());
        } else {
            log_event(SENDER, &event);
        }
        let outcome = match event {
            UiEvent::Registered { .. } => Some(Outcome::Registered),
            // Successful files are counted once the receiver stored them.
            UiEvent::FileShareError { .. } => Some(Outcome::FileDone),
            UiEvent::MessageStatusChanged {
                status: MessageStatus::Delivered,
                ..
            } => Some(Outcome::MessageDelivered),
            UiEvent::MediaStreamReady { .. }
            | UiEvent::Popup(Popup::Declined { .. })
            | UiEvent::Popup(Popup::InviteTimedOut { .. }) => Some(Outcome::CallSettled),
            _ => None,
        };
        if let Some(outcome) = outcome {
            let _ = outcomes.send(outcome);
        }
    }
}

async fn watch_receiver(
    orchestrator: Orchestrator,
    mut events: mpsc::UnboundedReceiver<UiEvent>,
    output: PathBuf,
    outcomes: mpsc::UnboundedSender<Outcome>,
) {
    while let Some(event) = events.recv().await {
        if matches!(event, UiEvent::FileProgress { .. }) {
            debug!(event = "ui", peer = RECEIVER, "{}", event.notification());
            continue;
        }
        log_event(RECEIVER, &event);
        match event {
            UiEvent::Registered { .. } => {
                let _ = outcomes.send(Outcome::Registered);
            }
            UiEvent::Popup(Popup::IncomingInvite { username, kind, .. }) => {
                if let Err(e) = orchestrator.accept_invite(&username, kind).await {
                    warn!(event = "invite_accept_failed", peer = %username, %kind, %e);
                }
            }
            UiEvent::MessageReceived { message, .. } => {
                if let Err(e) = orchestrator
                    .acknowledge_seen(&message.from, &[message.id])
                    .await
                {
                    warn!(event = "ack_failed", peer = %message.from, %e);
                }
            }
            UiEvent::FileReceived { file_id, .. } => {
                if let Some(file) = orchestrator.remove_received_file(&file_id).await {
                    match file.save_into(&output).await {
                        Ok(path) => info!(event = "file_saved", path = %path.display()),
                        Err(e) => error!(event = "file_save_failed", name = %file.name, %e),
                    }
                }
                let _ = outcomes.send(Outcome::FileDone);
            }
            UiEvent::Popup(Popup::Disconnected { username, .. }) => {
                debug!(event = "peer_left_session", peer = %username);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[tokio::test(start_paused = true)]
    async fn test_chat_and_call_settle() {
        let args = Args::parse_from(["peerlink", "-m", "hello", "--call", "audio"]);
        let config = SessionConfig {
            control_fragment_delay_ms: 0,
            ..SessionConfig::default()
        };
        run(args, config).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_to_do_finishes() {
        let args = Args::parse_from(["peerlink"]);
        run(args, SessionConfig::default()).await.unwrap();
    }
}

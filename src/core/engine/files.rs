//! File transfer: outbound queue drain and inbound reassembly.
//!
//! Wire sequence per file, on the file's channel:
//!
//! ```text
//! START (json) ─► DATA (raw) × total_fragments ─► END (json)
//! ```
//!
//! Before every frame the sender waits for the channel's buffered amount
//! to fall to the configured threshold. Files to one peer go out strictly
//! one after another.

use super::Orchestrator;
use crate::core::connection::{wait_for_buffer_space, BackpressureError, DataChannel};
use crate::core::error::{FileSendErrorType, SessionError};
use crate::core::peer_store::ChannelStatus;
use crate::core::pipeline::{progress_percent, FileStreamer, OutgoingFile};
use crate::core::protocol::{Channel, FileFragment, FragmentType, Message};
use crate::ui::notify::UiEvent;
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

impl Orchestrator {
    // ── Outbound ─────────────────────────────────────────────────────────

    /// Queue a file for `file.to`. Sending starts right away when the
    /// file's channel is open, otherwise the channel is requested.
    pub async fn submit_file(&self, file: OutgoingFile) -> Result<Uuid, SessionError> {
        if !file.channel.is_data_channel() {
            return Err(SessionError::NotADataChannel(file.channel));
        }
        let (id, to, channel) = (file.id, file.to.clone(), file.channel);
        info!(
            event = "file_queued",
            peer = %to,
            file_id = %id,
            file_name = %file.name,
            size = file.size,
            "File queued"
        );
        let status = {
            let mut store = self.inner.store.lock().await;
            store.get_or_create(&to).enqueue_file(file);
            store.channel_status(&to, channel)
        };
        match status {
            ChannelStatus::Connected => self.start_file_drain(&to, channel).await,
            ChannelStatus::Connecting => {}
            ChannelStatus::NotConnected => self.request_open(&to, channel).await,
        }
        Ok(id)
    }

    /// Queue a file from disk.
    pub async fn submit_path(&self, path: &Path, to: &str) -> Result<Uuid, SessionError> {
        let file = OutgoingFile::from_path(path, to).await?;
        self.submit_file(file).await
    }

    /// Start the per-peer drain when `channel` carries the head file and no
    /// drain is running yet.
    pub(super) async fn start_file_drain(&self, username: &str, channel: Channel) {
        let generation = {
            let mut store = self.inner.store.lock().await;
            let generation = store.next_token();
            let Some(peer) = store.get_mut(username) else {
                return;
            };
            let head_matches = peer.front_file().is_some_and(|f| f.channel == channel);
            if !head_matches || !peer.begin_drain(generation) {
                return;
            }
            generation
        };
        debug!(event = "file_drain_started", peer = %username, generation);
        let this = self.clone();
        let user = username.to_string();
        tokio::spawn(async move { this.drain_files(&user, generation).await });
    }

    /// Send queued files until the queue is empty or the head file's channel
    /// is gone. Exits quietly once `generation` no longer owns the drain.
    async fn drain_files(&self, username: &str, generation: u64) {
        loop {
            let next = {
                let mut store = self.inner.store.lock().await;
                let Some(peer) = store.get_mut(username) else {
                    return;
                };
                if !peer.owns_drain(generation) {
                    return;
                }
                match peer.front_file() {
                    Some(file) => {
                        let handle = store.open_handle(username, file.channel);
                        Some((file, handle))
                    }
                    None => {
                        peer.end_drain(generation);
                        None
                    }
                }
            };
            let Some((file, handle)) = next else {
                debug!(event = "file_drain_finished", peer = %username, generation);
                return;
            };

            let result = match &handle {
                Some(handle) => self.send_file(&file, handle.clone()).await,
                None => Err(SessionError::ChannelNotOpen {
                    username: username.to_string(),
                    channel: file.channel,
                }),
            };

            let Err(err) = result else {
                if let Some(peer) = self.inner.store.lock().await.get_mut(username) {
                    if peer.owns_drain(generation) {
                        peer.pop_file(file.id);
                    }
                }
                continue;
            };

            let kind = FileSendErrorType::classify(&err);
            warn!(
                event = "file_send_failed",
                peer = %username,
                file_id = %file.id,
                file_name = %file.name,
                error = ?kind,
                %err,
                "File transfer failed"
            );
            self.emit(UiEvent::FileShareError {
                file_id: file.id,
                to: username.to_string(),
                error: kind,
                reason: err.to_string(),
            });

            let mut store = self.inner.store.lock().await;
            let reopened = store
                .open_handle(username, file.channel)
                .filter(|fresh| !handle.as_ref().is_some_and(|used| Arc::ptr_eq(used, fresh)))
                .is_some();
            let Some(peer) = store.get_mut(username) else {
                return;
            };
            if !peer.owns_drain(generation) {
                return;
            }
            match kind {
                // The channel came back while this file was failing: resend it
                // from START on the new handle.
                FileSendErrorType::ChannelNotOpen if reopened => {
                    info!(event = "file_drain_resumed", peer = %username, file_id = %file.id);
                }
                FileSendErrorType::ChannelNotOpen => {
                    // The file stays at the head until the channel reopens.
                    peer.end_drain(generation);
                    return;
                }
                FileSendErrorType::GenericError => {
                    peer.pop_file(file.id);
                }
            }
        }
    }

    async fn send_file(
        &self,
        file: &OutgoingFile,
        dc: Arc<dyn DataChannel>,
    ) -> Result<(), SessionError> {
        let cfg = &self.inner.config;
        let mut streamer = FileStreamer::open(file, cfg.chunk_size).await?;
        let total = streamer.total_fragments();

        let start = FileFragment::start(
            file.id,
            &file.name,
            streamer.size(),
            &file.mime,
            total,
            &self.me().await,
            &file.to,
        );
        info!(
            event = "file_send_start",
            peer = %file.to,
            file_id = %file.id,
            size = streamer.size(),
            fragments = total,
            "Sending file"
        );
        self.send_control(file, dc.as_ref(), &start).await?;
        self.emit(UiEvent::FileMetadata {
            fragment: start.clone(),
            sent: true,
        });

        while !streamer.is_end_of_file() {
            let block = streamer.read_block().await?;
            self.wait_for_space(file, dc.as_ref()).await?;
            dc.send_binary(block)
                .await
                .map_err(|e| send_error(file, dc.as_ref(), e))?;

            let offset = streamer.offset();
            self.inner.store.lock().await.touch_channel(&file.to, file.channel);
            self.emit(UiEvent::FileProgress {
                username: file.to.clone(),
                file_id: file.id,
                fragment_offset: offset,
                progress: progress_percent(offset, total),
                sent: true,
            });
        }
        if total == 0 {
            self.emit(UiEvent::FileProgress {
                username: file.to.clone(),
                file_id: file.id,
                fragment_offset: 0,
                progress: progress_percent(0, 0),
                sent: true,
            });
        }

        let end = start.end();
        self.send_control(file, dc.as_ref(), &end).await?;
        self.emit(UiEvent::FileMetadata {
            fragment: end,
            sent: true,
        });
        info!(event = "file_sent", peer = %file.to, file_id = %file.id, "File sent");
        self.emit(UiEvent::FileSent {
            username: file.to.clone(),
            file_id: file.id,
            file_name: file.name.clone(),
        });
        Ok(())
    }

    async fn send_control(
        &self,
        file: &OutgoingFile,
        dc: &dyn DataChannel,
        fragment: &FileFragment,
    ) -> Result<(), SessionError> {
        let text = Message::File(fragment.clone())
            .to_json()
            .map_err(|e| SessionError::GenericTransfer {
                file_id: file.id,
                reason: e.to_string(),
            })?;
        self.wait_for_space(file, dc).await?;
        dc.send_text(text)
            .await
            .map_err(|e| send_error(file, dc, e))?;
        tokio::time::sleep(self.inner.config.control_fragment_delay()).await;
        Ok(())
    }

    async fn wait_for_space(
        &self,
        file: &OutgoingFile,
        dc: &dyn DataChannel,
    ) -> Result<(), SessionError> {
        let cfg = &self.inner.config;
        wait_for_buffer_space(
            dc,
            cfg.buffer_threshold,
            cfg.backpressure_poll(),
            cfg.backpressure_max_wait(),
        )
        .await
        .map(|_| ())
        .map_err(|e| match e {
            BackpressureError::Closed => SessionError::ChannelNotOpen {
                username: file.to.clone(),
                channel: file.channel,
            },
            BackpressureError::TimedOut => SessionError::GenericTransfer {
                file_id: file.id,
                reason: format!(
                    "send buffer did not drain within {:?}",
                    cfg.backpressure_max_wait()
                ),
            },
        })
    }

    // ── Inbound ──────────────────────────────────────────────────────────

    pub(super) async fn handle_file_fragment(&self, channel: Channel, fragment: FileFragment) {
        match fragment.fragment_type {
            FragmentType::Start => {
                info!(
                    event = "file_receive_start",
                    peer = %fragment.from,
                    file_id = %fragment.file_id,
                    file_name = %fragment.file_name,
                    size = fragment.file_size,
                    fragments = fragment.total_fragments,
                    "Receiving file"
                );
                self.inner
                    .assembler
                    .lock()
                    .await
                    .start(channel, fragment.clone());
                self.emit(UiEvent::FileMetadata {
                    fragment,
                    sent: false,
                });
            }
            FragmentType::End => {
                let done = self.inner.assembler.lock().await.finish(channel, &fragment);
                let Some(done) = done else {
                    warn!(
                        event = "file_end_without_start",
                        peer = %fragment.from,
                        file_id = %fragment.file_id,
                        "END fragment without a matching START"
                    );
                    return;
                };
                if let Some(announced) = done.size_mismatch {
                    warn!(
                        event = "file_size_mismatch",
                        file_id = %done.file.id,
                        announced,
                        received = done.file.size(),
                        "Received size differs from the announced size"
                    );
                }
                info!(event = "file_received", peer = %done.file.from, file_id = %done.file.id);
                self.emit(UiEvent::FileMetadata {
                    fragment,
                    sent: false,
                });
                self.emit(UiEvent::FileReceived {
                    username: done.file.from.clone(),
                    file_id: done.file.id,
                    file_name: done.file.name.clone(),
                    size: done.file.size(),
                });
            }
        }
    }

    pub(super) async fn handle_file_data(&self, username: &str, channel: Channel, data: Bytes) {
        let len = data.len();
        let progress = self.inner.assembler.lock().await.push(username, channel, data);
        match progress {
            Some(p) => self.emit(UiEvent::FileProgress {
                username: username.to_string(),
                file_id: p.file_id,
                fragment_offset: p.fragment_offset,
                progress: p.progress,
                sent: false,
            }),
            None => error!(
                event = "file_data_corrupted",
                peer = %username,
                %channel,
                bytes = len,
                "DATA fragment without a file in flight, dropping"
            ),
        }
    }
}

fn send_error(file: &OutgoingFile, dc: &dyn DataChannel, err: anyhow::Error) -> SessionError {
    if dc.is_open() {
        SessionError::GenericTransfer {
            file_id: file.id,
            reason: err.to_string(),
        }
    } else {
        SessionError::ChannelNotOpen {
            username: file.to.clone(),
            channel: file.channel,
        }
    }
}

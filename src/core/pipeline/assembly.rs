//! Receiver side of the file pipeline.
//!
//! One assembly per (sender, channel): START opens it, raw DATA frames are
//! appended in arrival order, END concatenates them into a [`ReceivedFile`].

use super::progress_percent;
use crate::core::config::{MAX_PREALLOCATED_FRAGMENTS, MAX_RETAINED_FILES};
use crate::core::protocol::{Channel, FileFragment};
use crate::utils::formatters::sanitize_file_name;
use bytes::{Bytes, BytesMut};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// A fully received inbound file.
#[derive(Debug, Clone)]
pub struct ReceivedFile {
    pub id: Uuid,
    pub name: String,
    pub mime: Option<String>,
    pub from: String,
    pub data: Bytes,
}

impl ReceivedFile {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Write into `dir` under a sanitized version of the sender's file name.
    pub async fn save_into(&self, dir: &Path) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(sanitize_file_name(&self.name));
        tokio::fs::write(&path, &self.data).await?;
        Ok(path)
    }
}

/// Progress of one DATA fragment appended to an assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentProgress {
    pub file_id: Uuid,
    pub fragment_offset: u32,
    pub progress: f64,
}

/// Outcome of an END fragment.
#[derive(Debug)]
pub struct Completed {
    pub file: ReceivedFile,
    /// Announced size, when it differs from the bytes received.
    pub size_mismatch: Option<u64>,
}

struct Assembly {
    start: FileFragment,
    fragments: Vec<Bytes>,
}

/// In-flight and completed inbound files.
///
/// At most [`MAX_RETAINED_FILES`] completed files are kept; older ones are
/// evicted in completion order.
#[derive(Default)]
pub struct FileAssembler {
    active: HashMap<(String, Channel), Assembly>,
    completed: HashMap<Uuid, ReceivedFile>,
    completion_order: VecDeque<Uuid>,
}

impl FileAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an assembly. A previous unfinished one from the same sender and
    /// channel is discarded.
    pub fn start(&mut self, channel: Channel, start: FileFragment) {
        let key = (start.from.clone(), channel);
        // `totalFragments` is peer input.
        let capacity = (start.total_fragments as usize).min(MAX_PREALLOCATED_FRAGMENTS);
        if let Some(prev) = self.active.insert(
            key,
            Assembly {
                start,
                fragments: Vec::with_capacity(capacity),
            },
        ) {
            warn!(
                event = "assembly_replaced",
                file_id = %prev.start.file_id,
                file_name = %prev.start.file_name,
                "New START before END, dropping partial file"
            );
        }
    }

    /// Append a DATA frame. `None` when no START is in flight.
    pub fn push(&mut self, from: &str, channel: Channel, data: Bytes) -> Option<FragmentProgress> {
        let assembly = self.active.get_mut(&(from.to_string(), channel))?;
        assembly.fragments.push(data);
        let offset = assembly.fragments.len() as u32;
        Some(FragmentProgress {
            file_id: assembly.start.file_id,
            fragment_offset: offset,
            progress: progress_percent(offset, assembly.start.total_fragments),
        })
    }

    /// Close the assembly matching an END fragment. `None` when there is no
    /// assembly for this sender and channel, or its file id differs.
    pub fn finish(&mut self, channel: Channel, end: &FileFragment) -> Option<Completed> {
        let key = (end.from.clone(), channel);
        if self.active.get(&key)?.start.file_id != end.file_id {
            return None;
        }
        let assembly = self.active.remove(&key)?;

        let total: usize = assembly.fragments.iter().map(Bytes::len).sum();
        let mut data = BytesMut::with_capacity(total);
        for fragment in &assembly.fragments {
            data.extend_from_slice(fragment);
        }

        let announced = assembly.start.file_size;
        let file = ReceivedFile {
            id: assembly.start.file_id,
            name: assembly.start.file_name,
            mime: assembly.start.file_type,
            from: assembly.start.from,
            data: data.freeze(),
        };
        let size_mismatch = (file.size() != announced).then_some(announced);
        self.retain(file.clone());
        Some(Completed {
            file,
            size_mismatch,
        })
    }

    fn retain(&mut self, file: ReceivedFile) {
        let id = file.id;
        if self.completed.insert(id, file).is_none() {
            self.completion_order.push_back(id);
        }
        while self.completed.len() > MAX_RETAINED_FILES {
            let Some(oldest) = self.completion_order.pop_front() else {
                break;
            };
            if self.completed.remove(&oldest).is_some() {
                debug!(event = "received_file_evicted", file_id = %oldest);
            }
        }
    }

    pub fn in_flight(&self, from: &str, channel: Channel) -> Option<Uuid> {
        self.active
            .get(&(from.to_string(), channel))
            .map(|a| a.start.file_id)
    }

    /// Drop the partial file arriving on a channel that went away.
    pub fn drop_channel(&mut self, from: &str, channel: Channel) -> Option<Uuid> {
        self.active
            .remove(&(from.to_string(), channel))
            .map(|a| a.start.file_id)
    }

    /// Drop every partial file from `from`.
    pub fn drop_peer(&mut self, from: &str) {
        self.active.retain(|(sender, _), _| sender != from);
    }

    pub fn received_file(&self, file_id: &Uuid) -> Option<&ReceivedFile> {
        self.completed.get(file_id)
    }

    pub fn remove_received_file(&mut self, file_id: &Uuid) -> Option<ReceivedFile> {
        let file = self.completed.remove(file_id)?;
        self.completion_order.retain(|id| id != file_id);
        Some(file)
    }

    pub fn clear(&mut self) {
        self.active.clear();
        self.completed.clear();
        self.completion_order.clear();
    }
}

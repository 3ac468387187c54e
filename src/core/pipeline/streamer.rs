//! Sender side of the file pipeline: outgoing file descriptors and the
//! fixed-size fragment reader.

use crate::core::error::SessionError;
use crate::core::protocol::Channel;
use bytes::{Bytes, BytesMut};
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

// ── Outgoing files ───────────────────────────────────────────────────────────

/// Where the bytes of an outgoing file come from.
#[derive(Debug, Clone)]
pub enum FileSource {
    Path(PathBuf),
    Memory(Bytes),
}

/// A file waiting in a peer's outbound queue.
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    pub id: Uuid,
    pub name: String,
    pub size: u64,
    pub mime: String,
    pub source: FileSource,
    pub to: String,
    pub channel: Channel,
}

impl OutgoingFile {
    /// Describe a file on disk. The MIME type is guessed from the extension.
    pub async fn from_path(path: impl AsRef<Path>, to: &str) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(SessionError::Read(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            )));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        Ok(Self {
            id: Uuid::new_v4(),
            mime: guess_mime(&name),
            name,
            size: meta.len(),
            source: FileSource::Path(path.to_path_buf()),
            to: to.to_string(),
            channel: Channel::File,
        })
    }

    /// Describe an in-memory blob.
    pub fn from_bytes(name: &str, data: Bytes, to: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            size: data.len() as u64,
            mime: guess_mime(name),
            source: FileSource::Memory(data),
            to: to.to_string(),
            channel: Channel::File,
        }
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }
}

fn guess_mime(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

// ── Streamer ─────────────────────────────────────────────────────────────────

/// Number of `chunk_size` fragments needed for `size` bytes.
pub fn fragment_count(size: u64, chunk_size: usize) -> u32 {
    size.div_ceil(chunk_size as u64) as u32
}

/// Splits a file source into sequential fixed-size fragments.
pub struct FileStreamer {
    reader: Box<dyn AsyncRead + Unpin + Send>,
    chunk_size: usize,
    size: u64,
    total_fragments: u32,
    fragments_read: u32,
}

impl FileStreamer {
    /// Open the file's source. For disk files the size is taken from the
    /// file as it is now, not from when it was queued.
    pub async fn open(file: &OutgoingFile, chunk_size: usize) -> Result<Self, SessionError> {
        let (reader, size): (Box<dyn AsyncRead + Unpin + Send>, u64) = match &file.source {
            FileSource::Path(path) => {
                let f = tokio::fs::File::open(path).await?;
                let size = f.metadata().await?.len();
                (Box::new(f), size)
            }
            FileSource::Memory(data) => {
                (Box::new(io::Cursor::new(data.clone())), data.len() as u64)
            }
        };
        Ok(Self::from_reader(reader, size, chunk_size))
    }

    pub fn from_reader(
        reader: Box<dyn AsyncRead + Unpin + Send>,
        size: u64,
        chunk_size: usize,
    ) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            reader,
            chunk_size,
            size,
            total_fragments: fragment_count(size, chunk_size),
            fragments_read: 0,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn total_fragments(&self) -> u32 {
        self.total_fragments
    }

    /// Fragments handed out so far.
    pub fn offset(&self) -> u32 {
        self.fragments_read
    }

    pub fn is_end_of_file(&self) -> bool {
        self.fragments_read >= self.total_fragments
    }

    /// Read the next fragment. The last one may be shorter than `chunk_size`.
    pub async fn read_block(&mut self) -> Result<Bytes, SessionError> {
        if self.is_end_of_file() {
            return Err(SessionError::Read(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past the last fragment",
            )));
        }
        let consumed = self.fragments_read as u64 * self.chunk_size as u64;
        let len = (self.chunk_size as u64).min(self.size.saturating_sub(consumed)) as usize;

        let mut buf = BytesMut::zeroed(len);
        self.reader.read_exact(&mut buf).await?;
        self.fragments_read += 1;
        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("peerlink_test")
            .join("streamer")
            .join(name);
        let _ = std::fs::create_dir_all(&dir);
        dir
    }

    #[test]
    fn test_fragment_count() {
        assert_eq!(fragment_count(0, 16384), 0);
        assert_eq!(fragment_count(1, 16384), 1);
        assert_eq!(fragment_count(16384, 16384), 1);
        assert_eq!(fragment_count(16385, 16384), 2);
        assert_eq!(fragment_count(30000, 16384), 2);
    }

    #[tokio::test]
    async fn test_memory_source_fragments() {
        let data = Bytes::from(vec![7u8; 30000]);
        let file = OutgoingFile::from_bytes("a.bin", data, "bob");
        let mut streamer = FileStreamer::open(&file, 16384).await.unwrap();
        assert_eq!(streamer.total_fragments(), 2);

        let first = streamer.read_block().await.unwrap();
        assert_eq!(first.len(), 16384);
        assert!(!streamer.is_end_of_file());
        let second = streamer.read_block().await.unwrap();
        assert_eq!(second.len(), 13616);
        assert!(streamer.is_end_of_file());
        assert!(streamer.read_block().await.is_err());
    }

    #[tokio::test]
    async fn test_empty_file_is_immediately_done() {
        let file = OutgoingFile::from_bytes("empty.txt", Bytes::new(), "bob");
        let streamer = FileStreamer::open(&file, 16384).await.unwrap();
        assert_eq!(streamer.total_fragments(), 0);
        assert!(streamer.is_end_of_file());
    }

    #[tokio::test]
    async fn test_disk_source_and_mime() {
        let dir = test_dir("disk");
        let path = dir.join("notes.txt");
        std::fs::write(&path, b"hello peer").unwrap();

        let file = OutgoingFile::from_path(&path, "bob").await.unwrap();
        assert_eq!(file.name, "notes.txt");
        assert_eq!(file.size, 10);
        assert_eq!(file.mime, "text/plain");
        assert_eq!(file.channel, Channel::File);

        let mut streamer = FileStreamer::open(&file, 4).await.unwrap();
        assert_eq!(streamer.total_fragments(), 3);
        let mut out = Vec::new();
        while !streamer.is_end_of_file() {
            out.extend_from_slice(&streamer.read_block().await.unwrap());
        }
        assert_eq!(out, b"hello peer");
    }

    #[tokio::test]
    async fn test_missing_file_is_read_error() {
        let path = test_dir("missing").join("does-not-exist.bin");
        let err = OutgoingFile::from_path(&path, "bob").await.unwrap_err();
        assert!(matches!(err, SessionError::Read(_)));
    }

    #[tokio::test]
    async fn test_truncated_source_fails() {
        let reader = Box::new(io::Cursor::new(vec![1u8; 10]));
        let mut streamer = FileStreamer::from_reader(reader, 100, 64);
        assert!(matches!(streamer.read_block().await, Err(SessionError::Read(_))));
    }
}

//! Offline fallback music library.
//!
//! A flat directory of audio files the broadcast falls back to whenever the
//! queue is empty or the extractor cannot produce a stream URL.

use std::fs;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use tracing::warn;

const AUDIO_EXTENSIONS: &[&str] = &["aac", "flac", "m4a", "mp3", "ogg", "opus", "wav"];

/// One playable file from the library directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryTrack {
    /// Plain file name, valid as a `/stream-offline/{filename}` segment.
    pub filename: String,
    /// Display title derived from the file stem.
    pub title: String,
}

/// Handle on the local library directory.
pub struct Library {
    root: PathBuf,
}

impl Library {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Pick a random playable track, or `None` when the library is empty or
    /// unreadable.
    pub fn random_track(&self) -> Option<LibraryTrack> {
        let tracks = self.tracks();
        tracks.choose(&mut rand::thread_rng()).cloned()
    }

    /// Resolve a requested file name to a path inside the library directory.
    ///
    /// Rejects anything that is not a plain file name of an existing library
    /// file, so a crafted request can never escape the directory.
    pub fn resolve(&self, filename: &str) -> Option<PathBuf> {
        resolve_within(&self.root, filename)
    }

    fn tracks(&self) -> Vec<LibraryTrack> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %self.root.display(), error = %err, "cannot read library directory");
                return Vec::new();
            }
        };

        let mut tracks: Vec<LibraryTrack> = entries
            .flatten()
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| {
                let path = entry.path();
                let extension = path.extension()?.to_str()?.to_ascii_lowercase();
                if !AUDIO_EXTENSIONS.contains(&extension.as_str()) {
                    return None;
                }
                let filename = path.file_name()?.to_str()?.to_string();
                let title = path.file_stem()?.to_str()?.replace('_', " ");
                Some(LibraryTrack { filename, title })
            })
            .collect();
        tracks.sort_by(|a, b| a.filename.cmp(&b.filename));
        tracks
    }
}

/// Shared traversal guard for directory-serving endpoints.
pub fn resolve_within(root: &Path, filename: &str) -> Option<PathBuf> {
    if filename.is_empty()
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains("..")
    {
        return None;
    }
    let path = root.join(filename);
    path.is_file().then_some(path)
}

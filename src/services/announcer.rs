//! DJ announcement synthesis.
//!
//! Songs carrying a dedication get a spoken introduction: a templated script
//! rendered to audio by an external TTS command, cached on disk under the
//! content hash of the script text. Synthesis failures degrade to text-only;
//! listeners then fall back to client-side speech synthesis.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use md5::{Digest, Md5};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::dao::models::SongEntity;

/// Hard deadline for one synthesis run.
pub const SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(30);

const SCRIPT_TEMPLATES: &[&str] = &[
    "Up next on the air: {title} by {artist}. It comes with a message: {dedication}.",
    "Here is {title} from {artist}, going out with these words: {dedication}.",
    "Coming up: {artist} with {title}. The dedication reads: {dedication}.",
];

/// A spoken introduction prepared for one song.
#[derive(Debug, Clone, PartialEq)]
pub struct Announcement {
    pub text: String,
    /// URL of the synthesized audio, absent when synthesis was unavailable.
    pub audio_url: Option<String>,
}

/// Failures surfaced by the TTS boundary.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("no synthesizer configured")]
    Disabled,
    #[error("synthesizer exited with failure: {0}")]
    Command(String),
    #[error("failed to run synthesizer: {0}")]
    Io(#[from] std::io::Error),
}

/// Text-to-speech capability injected into the announcer.
pub trait SpeechSynthesizer: Send + Sync {
    /// Render `text` into an audio file at `out_path`.
    fn synthesize(
        &self,
        text: &str,
        out_path: &Path,
    ) -> BoxFuture<'static, Result<(), SynthesisError>>;
}

/// Synthesizer used when no TTS command is configured.
pub struct NullSynthesizer;

impl SpeechSynthesizer for NullSynthesizer {
    fn synthesize(
        &self,
        _text: &str,
        _out_path: &Path,
    ) -> BoxFuture<'static, Result<(), SynthesisError>> {
        Box::pin(std::future::ready(Err(SynthesisError::Disabled)))
    }
}

/// Synthesizer shelling out to a configured command template.
///
/// The template is whitespace-split; `{text}` and `{out}` tokens are replaced
/// with the script text and the output path.
pub struct CommandSynthesizer {
    template: String,
}

impl CommandSynthesizer {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

impl SpeechSynthesizer for CommandSynthesizer {
    fn synthesize(
        &self,
        text: &str,
        out_path: &Path,
    ) -> BoxFuture<'static, Result<(), SynthesisError>> {
        let mut tokens = self.template.split_whitespace().map(|token| match token {
            "{text}" => text.to_string(),
            "{out}" => out_path.to_string_lossy().into_owned(),
            other => other.to_string(),
        });
        let program = tokens.next();
        let args: Vec<String> = tokens.collect();

        Box::pin(async move {
            let Some(program) = program else {
                return Err(SynthesisError::Command("empty command template".into()));
            };

            let output = Command::new(&program)
                .args(&args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(SynthesisError::Command(
                    stderr.lines().last().unwrap_or("unknown error").to_string(),
                ));
            }
            Ok(())
        })
    }
}

/// Builds announcements and manages their on-disk audio cache.
pub struct Announcer {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    cache_dir: PathBuf,
}

impl Announcer {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, cache_dir: PathBuf) -> Self {
        Self {
            synthesizer,
            cache_dir,
        }
    }

    /// Render the spoken script for a song, or `None` when it carries no
    /// dedication.
    pub fn build_script(song: &SongEntity) -> Option<String> {
        let dedication = song.dedication.as_deref()?.trim();
        if dedication.is_empty() {
            return None;
        }
        let template =
            SCRIPT_TEMPLATES[(song.id.unsigned_abs() as usize) % SCRIPT_TEMPLATES.len()];
        Some(
            template
                .replace("{title}", &song.title)
                .replace("{artist}", &song.artist)
                .replace("{dedication}", dedication),
        )
    }

    /// Prepare the announcement for a song: script plus cached audio when the
    /// synthesizer can deliver it.
    pub async fn announce(&self, song: &SongEntity) -> Option<Announcement> {
        let text = Self::build_script(song)?;
        let file_name = cache_file_name(song.id, &text);
        let path = self.cache_dir.join(&file_name);

        if path.is_file() {
            debug!(song_id = song.id, "announcement audio served from cache");
            return Some(Announcement {
                text,
                audio_url: Some(announcement_url(&file_name)),
            });
        }

        if let Err(err) = std::fs::create_dir_all(&self.cache_dir) {
            warn!(dir = %self.cache_dir.display(), error = %err, "cannot create announcement cache");
            return Some(Announcement {
                text,
                audio_url: None,
            });
        }

        let audio_url = match timeout(SYNTHESIS_TIMEOUT, self.synthesizer.synthesize(&text, &path))
            .await
        {
            Ok(Ok(())) => Some(announcement_url(&file_name)),
            Ok(Err(SynthesisError::Disabled)) => None,
            Ok(Err(err)) => {
                warn!(song_id = song.id, error = %err, "announcement synthesis failed");
                None
            }
            Err(_) => {
                warn!(song_id = song.id, "announcement synthesis timed out");
                None
            }
        };

        Some(Announcement { text, audio_url })
    }
}

/// Cache file name: song id plus the MD5 of the script text.
pub fn cache_file_name(song_id: i64, text: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
    format!("{song_id}-{hex}.mp3")
}

fn announcement_url(file_name: &str) -> String {
    format!("/announcements/{file_name}")
}

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::error::SessionError;
use crate::registry::Model;
use crate::resources::PlayableHandle;
use crate::types::GenerationMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Busy {
    #[default]
    Idle,
    LoadingModel,
    Generating,
}

impl Busy {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::LoadingModel => "Loading model",
            Self::Generating => "Generating",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub model: String,
    pub duration_seconds: Option<f32>,
    pub has_vocals: bool,
    pub content_prompt: String,
    pub style_prompt: String,
    pub created_at: DateTime<Utc>,
    pub audio: PlayableHandle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    pub size: usize,
    pub server_id: String,
    pub audio: PlayableHandle,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PromptFields {
    pub content: String,
    pub style: String,
    pub has_vocals: bool,
    pub duration_hint: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptField {
    Content(String),
    Style(String),
    Vocals(bool),
    Duration(Option<u32>),
}

impl PromptFields {
    pub fn apply(&mut self, field: PromptField) {
        match field {
            PromptField::Content(value) => self.content = value,
            PromptField::Style(value) => self.style = value,
            PromptField::Vocals(value) => self.has_vocals = value,
            PromptField::Duration(value) => self.duration_hint = value,
        }
    }
}

/// Generated tracks in creation order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    tracks: IndexMap<String, Track>,
}

impl History {
    /// Appends a track. A track already stored under the same id is displaced
    /// and returned so its audio can be released.
    pub fn push(&mut self, track: Track) -> Option<Track> {
        let displaced = self.tracks.shift_remove(&track.id);
        self.tracks.insert(track.id.clone(), track);
        displaced
    }

    /// Puts `track` where `original` was. Returns the original plus any other
    /// entry that already used the replacement's id, or hands `track` back when
    /// `original` is not in the history.
    pub fn replace(
        &mut self,
        original: &str,
        track: Track,
    ) -> Result<(Track, Option<Track>), Track> {
        let Some((index, _, previous)) = self.tracks.shift_remove_full(original) else {
            return Err(track);
        };
        let duplicate = self.tracks.shift_remove(&track.id);
        let index = index.min(self.tracks.len());
        self.tracks.shift_insert(index, track.id.clone(), track);
        Ok((previous, duplicate))
    }

    pub fn get(&self, id: &str) -> Option<&Track> {
        self.tracks.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tracks.contains_key(id)
    }

    pub fn references(&self, handle: PlayableHandle) -> bool {
        self.tracks.values().any(|track| track.audio == handle)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn newest_first(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values().rev()
    }

    #[cfg(test)]
    pub fn ids(&self) -> Vec<String> {
        self.tracks.keys().cloned().collect()
    }

    pub fn drain(&mut self) -> Vec<Track> {
        self.tracks.drain(..).map(|(_, track)| track).collect()
    }
}

/// Everything the presentation layer may observe.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub models: Vec<Model>,
    pub selected_model: Option<String>,
    pub pending_model: Option<String>,
    pub prompt: PromptFields,
    pub mode: GenerationMode,
    pub uploaded_file: Option<UploadedFile>,
    pub history: History,
    pub current_track: Option<String>,
    pub busy: Busy,
    pub last_error: Option<SessionError>,
    pub last_export: Option<PathBuf>,
    pub revision: u64,
}

impl SessionState {
    pub fn current(&self) -> Option<&Track> {
        self.current_track.as_deref().and_then(|id| self.history.get(id))
    }

    pub fn selected(&self) -> Option<&Model> {
        let id = self.selected_model.as_deref()?;
        self.models.iter().find(|model| model.id == id)
    }

    /// Handles that must stay live for this state to render and play.
    pub fn referenced_handles(&self) -> Vec<PlayableHandle> {
        self.history
            .iter()
            .map(|track| track.audio)
            .chain(self.uploaded_file.as_ref().map(|file| file.audio))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{AudioSource, ResourcePool};
    use std::sync::Arc;

    fn track(pool: &mut ResourcePool, id: &str) -> Track {
        Track {
            id: id.into(),
            name: id.into(),
            model: "m1".into(),
            duration_seconds: None,
            has_vocals: false,
            content_prompt: "x".into(),
            style_prompt: String::new(),
            created_at: Utc::now(),
            audio: pool.acquire(AudioSource::Generated(Arc::from(id.as_bytes()))),
        }
    }

    #[test]
    fn replace_keeps_position() {
        let mut pool = ResourcePool::new();
        let mut history = History::default();
        history.push(track(&mut pool, "t1"));
        history.push(track(&mut pool, "t2"));
        history.push(track(&mut pool, "t3"));

        let (previous, duplicate) = history.replace("t2", track(&mut pool, "t2b")).unwrap();

        assert_eq!(previous.id, "t2");
        assert!(duplicate.is_none());
        assert_eq!(history.ids(), vec!["t1", "t2b", "t3"]);
        assert_eq!(history.newest_first().next().map(|t| t.id.as_str()), Some("t3"));
    }

    #[test]
    fn replace_missing_hands_track_back() {
        let mut pool = ResourcePool::new();
        let mut history = History::default();
        let rejected = history.replace("ghost", track(&mut pool, "t1")).unwrap_err();
        assert_eq!(rejected.id, "t1");
        assert!(history.is_empty());
    }

    #[test]
    fn push_displaces_duplicate_ids() {
        let mut pool = ResourcePool::new();
        let mut history = History::default();
        let first = track(&mut pool, "t1");
        let handle = first.audio;
        history.push(first);
        let displaced = history.push(track(&mut pool, "t1")).unwrap();
        assert_eq!(displaced.audio, handle);
        assert_eq!(history.len(), 1);
        assert!(!history.references(handle));
    }
}

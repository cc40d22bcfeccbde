use serde::{Deserialize, Serialize};

/// A catalog entry as the backend lists it. Older backends list bare ids.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ModelEntry {
    Id(String),
    Descriptor(ModelDescriptor),
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ModelEntry {
    pub fn into_descriptor(self) -> ModelDescriptor {
        match self {
            Self::Id(id) => ModelDescriptor { id, name: None, description: None },
            Self::Descriptor(descriptor) => descriptor,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    #[default]
    Generate,
    Remix,
    Extend,
}

impl GenerationMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Generate => "Generate",
            Self::Remix => "Remix",
            Self::Extend => "Extend",
        }
    }

    pub fn next(&self) -> Self {
        match self {
            Self::Generate => Self::Remix,
            Self::Remix | Self::Extend => Self::Generate,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Wav,
    Mp3,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
        }
    }
}

/// How the backend answers generate/extend calls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseShape {
    /// Decide per response from its content type.
    #[default]
    Auto,
    Inline,
    Identifier,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelCommand<'a> {
    pub id: &'a str,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerateBody {
    pub model: String,
    pub prompt: String,
    pub style_prompt: String,
    pub has_vocals: bool,
    pub mode: GenerationMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtendBody {
    pub track_id: String,
    pub model: String,
    pub duration: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackCreated {
    #[serde(alias = "trackId", alias = "track_id")]
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileUploaded {
    #[serde(alias = "fileId", alias = "file_id")]
    pub id: String,
}

/// What a generate or extend call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutput {
    Inline(Vec<u8>),
    Pending { track_id: String },
}

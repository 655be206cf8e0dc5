//! Typed job payloads, one shape per job type.

use serde::{Deserialize, Serialize};

/// The only render length the preview provider accepts.
pub const PREVIEW_DURATION_SECS: u32 = 8;

/// Closed set of job types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Preview,
    Compile,
    Export,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Preview => "preview",
            JobKind::Compile => "compile",
            JobKind::Export => "export",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Landscape => "16:9",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quality {
    #[default]
    #[serde(rename = "720p")]
    Hd,
    #[serde(rename = "1080p")]
    FullHd,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Hd => "720p",
            Quality::FullHd => "1080p",
        }
    }
}

/// Render a short preview clip for an existing VEO3 prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewPayload {
    pub veo3_id: String,
    pub prompt: String,
    #[serde(rename = "duration")]
    pub duration_secs: u32,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    #[serde(default)]
    pub quality: Quality,
}

impl PreviewPayload {
    pub fn new(veo3_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            veo3_id: veo3_id.into(),
            prompt: prompt.into(),
            duration_secs: PREVIEW_DURATION_SECS,
            aspect_ratio: AspectRatio::default(),
            quality: Quality::default(),
        }
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }
}

/// Compile a free-form prompt into a VEO3 prompt document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilePayload {
    pub prompt: String,
    #[serde(rename = "duration")]
    pub duration_secs: u32,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    #[serde(default)]
    pub quality: Quality,
}

impl CompilePayload {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            duration_secs: PREVIEW_DURATION_SECS,
            aspect_ratio: AspectRatio::default(),
            quality: Quality::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Brief,
    Vdp,
}

/// Export a stored document in one of the supported formats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPayload {
    pub source_id: String,
    pub format: ExportFormat,
}

/// Job payload, tagged by job type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum JobPayload {
    Preview(PreviewPayload),
    Compile(CompilePayload),
    Export(ExportPayload),
}

impl JobPayload {
    /// The tag of this payload; the only part the queue looks at.
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Preview(_) => JobKind::Preview,
            JobPayload::Compile(_) => JobKind::Compile,
            JobPayload::Export(_) => JobKind::Export,
        }
    }

    /// Check the shape constraints the provider enforces.
    pub fn validate(&self) -> Result<(), PayloadError> {
        match self {
            JobPayload::Preview(p) => {
                require_non_empty("veo3Id", &p.veo3_id)?;
                require_non_empty("prompt", &p.prompt)?;
                require_duration(p.duration_secs)
            }
            JobPayload::Compile(p) => {
                require_non_empty("prompt", &p.prompt)?;
                require_duration(p.duration_secs)
            }
            JobPayload::Export(p) => require_non_empty("sourceId", &p.source_id),
        }
    }
}

impl From<PreviewPayload> for JobPayload {
    fn from(payload: PreviewPayload) -> Self {
        JobPayload::Preview(payload)
    }
}

impl From<CompilePayload> for JobPayload {
    fn from(payload: CompilePayload) -> Self {
        JobPayload::Compile(payload)
    }
}

impl From<ExportPayload> for JobPayload {
    fn from(payload: ExportPayload) -> Self {
        JobPayload::Export(payload)
    }
}

/// Payload shape violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("field `{0}` must not be empty")]
    Empty(&'static str),

    #[error("duration must be {expected}s, got {actual}s")]
    Duration { expected: u32, actual: u32 },
}

fn require_non_empty(field: &'static str, value: &str) -> Result<(), PayloadError> {
    if value.trim().is_empty() {
        return Err(PayloadError::Empty(field));
    }
    Ok(())
}

fn require_duration(actual: u32) -> Result<(), PayloadError> {
    if actual != PREVIEW_DURATION_SECS {
        return Err(PayloadError::Duration {
            expected: PREVIEW_DURATION_SECS,
            actual,
        });
    }
    Ok(())
}

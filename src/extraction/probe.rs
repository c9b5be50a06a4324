//! Parsing `mkvmerge -J` identification output

use crate::error::{ExtractionError, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct Identification {
    #[serde(default)]
    tracks: Vec<IdentifiedTrack>,
}

#[derive(Debug, Deserialize)]
struct IdentifiedTrack {
    id: u64,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    codec: String,
    #[serde(default)]
    properties: TrackProperties,
}

#[derive(Debug, Default, Deserialize)]
struct TrackProperties {
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    language_ietf: Option<String>,
    #[serde(default, rename = "languageIETF")]
    language_ietf_legacy: Option<String>,
    #[serde(default)]
    codec_id: Option<String>,
}

/// A subtitle track found in the container
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbedTrack {
    /// mkvmerge track id, used as the mkvextract selector
    pub id: u64,
    /// Language code, "und" when unknown
    pub language: String,
    /// Output file extension
    pub format: &'static str,
}

impl ProbedTrack {
    /// `<stem>_<lang>_<id>.<ext>`
    pub fn output_name(&self, stem: &str) -> String {
        let language = self.language.replace(['/', '\\'], "_");
        format!("{}_{}_{}.{}", stem, language, self.id, self.format)
    }
}

/// Subtitle tracks listed in mkvmerge's JSON identification of `file`
pub fn parse_identification(json: &str, file: &Path) -> Result<Vec<ProbedTrack>> {
    let info: Identification =
        serde_json::from_str(json).map_err(|e| ExtractionError::ProbeFailed {
            file: file.to_path_buf(),
            reason: format!("Failed to parse mkvmerge JSON: {}", e),
        })?;

    Ok(info
        .tracks
        .into_iter()
        .filter(|t| t.kind == "subtitles")
        .map(|t| {
            let props = t.properties;
            let language = [props.language, props.language_ietf, props.language_ietf_legacy]
                .into_iter()
                .flatten()
                .find(|l| !l.is_empty())
                .unwrap_or_else(|| "und".to_string());
            let codec = format!("{} {}", props.codec_id.unwrap_or_default(), t.codec);
            ProbedTrack {
                id: t.id,
                language,
                format: extension_for_codec(&codec),
            }
        })
        .collect())
}

/// File extension for a subtitle codec name or codec id
pub fn extension_for_codec(codec: &str) -> &'static str {
    let codec = codec.to_lowercase();
    if codec.contains("pgs") || codec.contains("hdmv") {
        "sup"
    } else if codec.contains("vobsub") {
        "idx"
    } else if codec.contains("ssa") {
        "ssa"
    } else if codec.contains("ass") || codec.contains("substationalpha") {
        "ass"
    } else {
        "srt"
    }
}

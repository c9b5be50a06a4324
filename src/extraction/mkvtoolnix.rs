//! MKVToolNix-based extractor using the external mkvmerge and mkvextract binaries

use super::probe::parse_identification;
use super::process::CommandRunner;
use super::traits::SubtitleExtractor;
use crate::config::ToolsConfig;
use crate::error::{Error, ExtractionError, Result};
use crate::types::SubtitleTrack;
use crate::utils::remove_path_quietly;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Extracts subtitle tracks with `mkvmerge -J` and `mkvextract tracks`
///
/// # Examples
///
/// ```no_run
/// use subtitle_dl::config::ToolsConfig;
/// use subtitle_dl::extraction::{MkvToolNixExtractor, SubtitleExtractor};
/// use std::path::Path;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let extractor = MkvToolNixExtractor::from_config(&ToolsConfig::default())?;
/// let tracks = extractor
///     .extract(Path::new("movie.mkv"), Path::new("out"), &CancellationToken::new())
///     .await?;
/// for track in tracks {
///     println!("{} {} {}", track.language, track.format, track.path.display());
/// }
/// # Ok(())
/// # }
/// ```
pub struct MkvToolNixExtractor {
    mkvmerge: PathBuf,
    mkvextract: PathBuf,
    runner: CommandRunner,
}

impl MkvToolNixExtractor {
    /// Create an extractor with explicit binary paths
    pub fn new(mkvmerge: PathBuf, mkvextract: PathBuf, config: &ToolsConfig) -> Self {
        Self {
            mkvmerge,
            mkvextract,
            runner: CommandRunner::new(config.nice_level, config.command_timeout),
        }
    }

    /// Resolve binaries from the configuration, searching PATH if allowed
    ///
    /// # Errors
    ///
    /// [`ExtractionError::ToolNotFound`] if a binary is neither configured nor on PATH.
    pub fn from_config(config: &ToolsConfig) -> Result<Self> {
        let mkvmerge = resolve_binary("mkvmerge", config.mkvmerge_path.as_ref(), config.search_path)?;
        let mkvextract =
            resolve_binary("mkvextract", config.mkvextract_path.as_ref(), config.search_path)?;
        tracing::info!(
            mkvmerge = %mkvmerge.display(),
            mkvextract = %mkvextract.display(),
            "Using MKVToolNix binaries"
        );
        Ok(Self::new(mkvmerge, mkvextract, config))
    }

    /// Attempt to find both binaries in PATH
    pub fn from_path() -> Option<Self> {
        Self::from_config(&ToolsConfig {
            search_path: true,
            ..Default::default()
        })
        .ok()
    }

    async fn extract_track(
        &self,
        video: &Path,
        track_id: u64,
        out_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let mut selector = OsString::from(format!("{}:", track_id));
        selector.push(out_path.as_os_str());
        let args = vec![
            video.as_os_str().to_owned(),
            OsString::from("tracks"),
            selector,
        ];
        self.runner.run(&self.mkvextract, &args, cancel).await?;

        match tokio::fs::metadata(out_path).await {
            Ok(meta) if meta.len() > 0 => Ok(true),
            _ => {
                remove_path_quietly(out_path).await;
                Ok(false)
            }
        }
    }
}

fn resolve_binary(
    name: &'static str,
    configured: Option<&PathBuf>,
    search_path: bool,
) -> Result<PathBuf> {
    if let Some(path) = configured {
        return Ok(path.clone());
    }
    if search_path {
        if let Ok(path) = which::which(name) {
            return Ok(path);
        }
    }
    Err(ExtractionError::ToolNotFound { tool: name }.into())
}

#[async_trait]
impl SubtitleExtractor for MkvToolNixExtractor {
    async fn extract(
        &self,
        video: &Path,
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<SubtitleTrack>> {
        if !tokio::fs::try_exists(video).await.unwrap_or(false) {
            return Err(ExtractionError::InputMissing {
                path: video.to_path_buf(),
            }
            .into());
        }

        let json = self
            .runner
            .run(
                &self.mkvmerge,
                &[OsString::from("-J"), video.as_os_str().to_owned()],
                cancel,
            )
            .await?;
        let probed = parse_identification(&json, video)?;
        tracing::info!(video = %video.display(), tracks = probed.len(), "Identified subtitle tracks");
        if probed.is_empty() {
            return Ok(Vec::new());
        }

        tokio::fs::create_dir_all(output_dir).await?;
        let stem = video
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string());

        let mut extracted = Vec::with_capacity(probed.len());
        for track in probed {
            if cancel.is_cancelled() {
                return Err(Error::Canceled(format!("extraction of {}", video.display())));
            }

            let out_path = output_dir.join(track.output_name(&stem));
            match self.extract_track(video, track.id, &out_path, cancel).await {
                Ok(true) => extracted.push(SubtitleTrack {
                    language: track.language,
                    format: track.format.to_string(),
                    path: out_path,
                }),
                Ok(false) => {
                    tracing::warn!(track_id = track.id, "Extracted subtitle track is empty, skipping");
                }
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => {
                    tracing::warn!(track_id = track.id, error = %e, "Failed to extract track");
                    remove_path_quietly(&out_path).await;
                }
            }
        }

        Ok(extracted)
    }

    fn name(&self) -> &'static str {
        "mkvtoolnix"
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_path_wins() {
        let path = resolve_binary("mkvmerge", Some(&PathBuf::from("/opt/mkvmerge")), false).unwrap();
        assert_eq!(path, PathBuf::from("/opt/mkvmerge"));
    }

    #[test]
    fn test_missing_tool_without_search() {
        let err = resolve_binary("mkvmerge", None, false).unwrap_err();
        assert!(matches!(
            err,
            Error::Extraction(ExtractionError::ToolNotFound { tool: "mkvmerge" })
        ));
    }

    #[tokio::test]
    async fn test_missing_input_is_reported_before_running_tools() {
        let extractor = MkvToolNixExtractor::new(
            PathBuf::from("/nonexistent/mkvmerge"),
            PathBuf::from("/nonexistent/mkvextract"),
            &ToolsConfig::default(),
        );
        let dir = tempfile::tempdir().unwrap();
        let err = extractor
            .extract(
                &dir.path().join("missing.mkv"),
                dir.path(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Extraction(ExtractionError::InputMissing { .. })
        ));
    }

    /// Fake mkvmerge/mkvextract pair written as shell scripts
    #[cfg(unix)]
    fn fake_tools(dir: &Path, identify_json: &str) -> (PathBuf, PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let mkvmerge = dir.join("mkvmerge");
        std::fs::write(
            &mkvmerge,
            format!("#!/bin/sh\ncat <<'EOF'\n{}\nEOF\n", identify_json),
        )
        .unwrap();

        // Writes "subtitle" into the output named by "<id>:<path>", except track 3 which fails
        let mkvextract = dir.join("mkvextract");
        std::fs::write(
            &mkvextract,
            "#!/bin/sh\nsel=\"$3\"\nid=\"${sel%%:*}\"\nout=\"${sel#*:}\"\n\
             if [ \"$id\" = \"3\" ]; then echo 'track 3 is broken' >&2; exit 2; fi\n\
             printf subtitle > \"$out\"\n",
        )
        .unwrap();

        for path in [&mkvmerge, &mkvextract] {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        (mkvmerge, mkvextract)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_extracts_tracks_and_skips_failures() {
        let dir = tempfile::tempdir().unwrap();
        let json = r#"{"tracks": [
            {"id": 2, "type": "subtitles", "codec": "SubRip/SRT", "properties": {"language": "eng"}},
            {"id": 3, "type": "subtitles", "codec": "SubRip/SRT", "properties": {"language": "ger"}},
            {"id": 4, "type": "subtitles", "codec": "HDMV PGS", "properties": {}}
        ]}"#;
        let (mkvmerge, mkvextract) = fake_tools(dir.path(), json);
        let config = ToolsConfig {
            nice_level: None,
            ..Default::default()
        };
        let extractor = MkvToolNixExtractor::new(mkvmerge, mkvextract, &config);

        let video = dir.path().join("Movie.mkv");
        std::fs::write(&video, b"matroska").unwrap();
        let out_dir = dir.path().join("out");

        let tracks = extractor
            .extract(&video, &out_dir, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].language, "eng");
        assert_eq!(tracks[0].path, out_dir.join("Movie_eng_2.srt"));
        assert_eq!(tracks[1].format, "sup");
        assert_eq!(tracks[1].path, out_dir.join("Movie_und_4.sup"));
        assert!(!out_dir.join("Movie_ger_3.srt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_no_subtitle_tracks_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let json = r#"{"tracks": [{"id": 0, "type": "video", "codec": "AVC"}]}"#;
        let (mkvmerge, mkvextract) = fake_tools(dir.path(), json);
        let extractor = MkvToolNixExtractor::new(mkvmerge, mkvextract, &ToolsConfig::default());

        let video = dir.path().join("clip.mkv");
        std::fs::write(&video, b"matroska").unwrap();

        let tracks = extractor
            .extract(&video, &dir.path().join("out"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(tracks.is_empty());
    }
}

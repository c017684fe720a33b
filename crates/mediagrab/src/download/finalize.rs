//! Promote a finished `.part` file to its final name and check that it looks
//! like the container its extension claims.

use std::path::Path;

use tokio::io::AsyncReadExt;
use tracing::debug;

use super::file::part_path;
use crate::error::{DownloadError, Result};
use crate::resume;

const SNIFF_LEN: usize = 16;

/// Rename `<output>.part` to `output`, replacing an existing file.
pub(crate) async fn promote(output: &Path) -> Result<()> {
    let part = part_path(output);
    // Windows refuses to rename over an existing file.
    if cfg!(windows) && tokio::fs::try_exists(output).await.unwrap_or(false) {
        tokio::fs::remove_file(output)
            .await
            .map_err(|e| DownloadError::io("replacing", output, e))?;
    }
    tokio::fs::rename(&part, output)
        .await
        .map_err(|e| DownloadError::io("renaming", &part, e))?;
    debug!(path = %output.display(), "Promoted partial file");
    Ok(())
}

/// Check the leading bytes of a file against its extension.
pub fn validate_container(ext: &str, header: &[u8], len: u64) -> std::result::Result<(), String> {
    if len == 0 {
        return Err("file is empty".to_owned());
    }
    let ok = match ext.to_ascii_lowercase().as_str() {
        "mp4" | "m4a" | "m4v" | "mov" | "3gp" => {
            header.len() >= 8 && matches!(&header[4..8], b"ftyp" | b"styp" | b"moov" | b"free")
        }
        "webm" | "mkv" => header.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]),
        "ts" => header.first() == Some(&0x47),
        "flv" => header.starts_with(b"FLV"),
        "mp3" => {
            header.starts_with(b"ID3")
                || (header.len() >= 2 && header[0] == 0xFF && header[1] & 0xE0 == 0xE0)
        }
        "ogg" | "oga" | "opus" => header.starts_with(b"OggS"),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(format!("content does not look like a .{ext} file"))
    }
}

/// Validate the file at `output`. The file stays on disk either way.
pub(crate) async fn validate(output: &Path, ext: &str) -> Result<()> {
    let mut file = tokio::fs::File::open(output)
        .await
        .map_err(|e| DownloadError::io("opening", output, e))?;
    let len = file
        .metadata()
        .await
        .map_err(|e| DownloadError::io("inspecting", output, e))?
        .len();

    let mut header = [0u8; SNIFF_LEN];
    let mut filled = 0;
    while filled < SNIFF_LEN {
        let n = file
            .read(&mut header[filled..])
            .await
            .map_err(|e| DownloadError::io("reading", output, e))?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    validate_container(ext, &header[..filled], len)
        .map_err(|reason| DownloadError::validation(output, reason))
}

/// Promote, validate, then drop the resume checkpoint.
pub(crate) async fn finalize(output: &Path, ext: &str) -> Result<()> {
    promote(output).await?;
    validate(output, ext).await?;
    resume::remove(output).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::resume::ResumeState;
    use tempfile::TempDir;

    #[test]
    fn container_signatures() {
        assert!(validate_container("mp4", b"\0\0\0\x20ftypisom", 100).is_ok());
        assert!(validate_container("mp4", b"<html>", 100).is_err());
        assert!(validate_container("webm", &[0x1A, 0x45, 0xDF, 0xA3, 0x01], 100).is_ok());
        assert!(validate_container("ts", &[0x47, 0x40], 188).is_ok());
        assert!(validate_container("flv", b"FLV\x01", 9).is_ok());
        assert!(validate_container("mp3", b"ID3\x04", 10).is_ok());
        assert!(validate_container("mp3", &[0xFF, 0xFB, 0x90], 10).is_ok());
        assert!(validate_container("ogg", b"OggS", 10).is_ok());
        assert!(validate_container("aac", b"anything", 8).is_ok());
    }

    #[test]
    fn empty_files_never_validate() {
        assert!(validate_container("bin", b"", 0).is_err());
    }

    #[tokio::test]
    async fn finalize_renames_and_clears_checkpoint() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("clip.ts");
        std::fs::write(part_path(&output), [0x47u8; 376]).unwrap();
        resume::save(&output, &ResumeState::new("http://h/clip.ts", 376)).await.unwrap();

        finalize(&output, "ts").await.unwrap();

        assert!(output.exists());
        assert!(!part_path(&output).exists());
        assert!(!resume::sidecar_path(&output).exists());
    }

    #[tokio::test]
    async fn invalid_content_stays_on_disk() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("clip.mp4");
        std::fs::write(part_path(&output), b"<html>not a video</html>").unwrap();

        let err = finalize(&output, "mp4").await.unwrap_err();

        assert_eq!(err.category(), ErrorCategory::Unsupported);
        assert_eq!(std::fs::read(&output).unwrap(), b"<html>not a video</html>");
    }

    #[tokio::test]
    async fn promote_replaces_existing_output() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("song.mp3");
        std::fs::write(&output, b"old").unwrap();
        std::fs::write(part_path(&output), b"ID3new").unwrap();

        promote(&output).await.unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"ID3new");
    }
}

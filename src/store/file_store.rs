use std::collections::HashSet;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::AsyncWriteExt;

use crate::error::AppError;

const CHUNK_SIZE_HINT: usize = 8 * 1024;
const HEAD_CHUNK_CAP: usize = 2048;
const MIN_GCODE_MATCHES: usize = 3;

static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]").unwrap());
static REPEATED_UNDERSCORE: Lazy<Regex> = Lazy::new(|| Regex::new(r"_+").unwrap());

/// One G-code sniffing pattern and whether it matched the head chunk.
static GCODE_PATTERNS: Lazy<[Regex; 6]> = Lazy::new(|| {
    [
        Regex::new(r"G[0-9]+").unwrap(),
        Regex::new(r"M[0-9]+").unwrap(),
        Regex::new(r"X-?[0-9]*\.?[0-9]+").unwrap(),
        Regex::new(r"Y-?[0-9]*\.?[0-9]+").unwrap(),
        Regex::new(r"Z-?[0-9]*\.?[0-9]+").unwrap(),
        Regex::new(r";").unwrap(),
    ]
});

/// The outcome of streaming an upload to disk: where it landed, its total
/// size, and the first bytes retained for content sniffing.
pub struct CapturedUpload {
    pub path: PathBuf,
    pub size: u64,
    pub head_chunk: Vec<u8>,
}

/// Deterministic path derivation, filename sanitization, streaming capture
/// with size enforcement, and G-code sniffing (`spec.md` §4.1).
#[derive(Debug, Clone)]
pub struct FileStore {
    upload_dir: PathBuf,
    output_dir: PathBuf,
    allowed_extensions: HashSet<String>,
    max_upload_size: u64,
}

impl FileStore {
    pub fn new(
        upload_dir: PathBuf,
        output_dir: PathBuf,
        allowed_extensions: HashSet<String>,
        max_upload_size: u64,
    ) -> Self {
        Self {
            upload_dir,
            output_dir,
            allowed_extensions,
            max_upload_size,
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Strips the extension, replaces any character outside
    /// `[A-Za-z0-9._-]` with `_`, collapses runs of `_`, trims leading and
    /// trailing `_`, truncates the stem to 100 characters, and re-attaches
    /// the lowercased original extension.
    pub fn sanitize(raw_name: &str) -> Result<String, AppError> {
        if raw_name.contains("..")
            || raw_name.contains('/')
            || raw_name.contains('\\')
            || raw_name.contains('\0')
        {
            return Err(AppError::InvalidFilename(
                "Filename contains invalid path characters".into(),
            ));
        }
        if raw_name.trim().is_empty() {
            return Err(AppError::InvalidFilename("Filename is empty".into()));
        }

        let path = Path::new(raw_name);
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut cleaned = UNSAFE_CHARS.replace_all(&stem, "_").to_string();
        cleaned = REPEATED_UNDERSCORE.replace_all(&cleaned, "_").to_string();
        let cleaned = cleaned.trim_matches('_');
        let truncated: String = cleaned.chars().take(100).collect();

        Ok(if ext.is_empty() {
            truncated
        } else {
            format!("{truncated}.{ext}")
        })
    }

    /// Validates that the (lowercased) extension of `name` is in the
    /// configured allow-list.
    pub fn validate_extension(&self, name: &str) -> Result<(), AppError> {
        let ext = Path::new(name)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()));
        match ext {
            Some(ext) if self.allowed_extensions.contains(&ext) => Ok(()),
            Some(ext) => {
                let allowed: Vec<&str> = self.allowed_extensions.iter().map(String::as_str).collect();
                Err(AppError::InvalidExtension(format!(
                    "File extension '{ext}' not allowed. Allowed extensions: {}",
                    allowed.join(", ")
                )))
            }
            None => Err(AppError::InvalidExtension("File has no extension".into())),
        }
    }

    /// `UPLOAD_DIR/{id}_{sanitized_name}` — pure path derivation.
    pub fn upload_path(&self, id: &str, sanitized_name: &str) -> PathBuf {
        self.upload_dir.join(format!("{id}_{sanitized_name}"))
    }

    /// `OUTPUT_DIR/{id}_{stem}_processed{ext}` — pure path derivation.
    pub fn output_path(&self, id: &str, sanitized_name: &str) -> PathBuf {
        let path = Path::new(sanitized_name);
        let ext = path.extension().map(|e| e.to_string_lossy().to_string()).unwrap_or_default();
        let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
        let processed_name = if ext.is_empty() {
            format!("{stem}_processed")
        } else {
            format!("{stem}_processed.{ext}")
        };
        self.output_dir.join(format!("{id}_{processed_name}"))
    }

    /// Streams `stream` to `upload_path(id, sanitized_name)` in bounded
    /// chunks, aborting and deleting the partial file if the running total
    /// exceeds `max_upload_size`. Returns up to the first 2048 bytes for
    /// content sniffing without a second read pass.
    pub async fn capture_upload<S, E>(
        &self,
        id: &str,
        sanitized_name: &str,
        mut stream: S,
    ) -> Result<CapturedUpload, AppError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let path = self.upload_path(id, sanitized_name);
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to create upload file: {e}"))?;

        let mut total: u64 = 0;
        let mut head_chunk: Vec<u8> = Vec::with_capacity(HEAD_CHUNK_CAP);

        while let Some(next) = stream.next().await {
            let chunk = match next {
                Ok(c) => c,
                Err(e) => {
                    self.delete(&path).await;
                    return Err(anyhow::anyhow!("error reading upload stream: {e}").into());
                }
            };

            for sub in chunk.chunks(CHUNK_SIZE_HINT) {
                total += sub.len() as u64;
                if total > self.max_upload_size {
                    self.delete(&path).await;
                    let max_mb = self.max_upload_size as f64 / (1024.0 * 1024.0);
                    let actual_mb = total as f64 / (1024.0 * 1024.0);
                    return Err(AppError::FileTooLarge(format!(
                        "File size ({actual_mb:.2}MB) exceeds maximum allowed size ({max_mb:.2}MB)"
                    )));
                }

                if head_chunk.len() < HEAD_CHUNK_CAP {
                    let take = (HEAD_CHUNK_CAP - head_chunk.len()).min(sub.len());
                    head_chunk.extend_from_slice(&sub[..take]);
                }

                file.write_all(sub)
                    .await
                    .map_err(|e| anyhow::anyhow!("failed to write upload chunk: {e}"))?;
            }
        }

        file.flush().await.map_err(|e| anyhow::anyhow!("failed to flush upload file: {e}"))?;
        drop(file);

        if total == 0 {
            self.delete(&path).await;
            return Err(AppError::EmptyFile);
        }

        Ok(CapturedUpload { path, size: total, head_chunk })
    }

    /// Decodes `head_chunk` as UTF-8 (replacing invalid sequences) and
    /// requires at least 3 distinct G-code pattern categories to match.
    pub fn sniff_gcode(head_chunk: &[u8]) -> Result<(), AppError> {
        let text = String::from_utf8_lossy(head_chunk);
        let matched = GCODE_PATTERNS.iter().filter(|re| re.is_match(&text)).count();
        if matched < MIN_GCODE_MATCHES {
            return Err(AppError::NotGcode);
        }
        Ok(())
    }

    /// Idempotent deletion; a missing file is not an error.
    pub async fn delete(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "failed to delete file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let outputs = dir.path().join("outputs");
        std::fs::create_dir_all(&uploads).unwrap();
        std::fs::create_dir_all(&outputs).unwrap();
        let extensions: HashSet<String> = [".gcode", ".gco", ".g"].iter().map(|s| s.to_string()).collect();
        (dir, FileStore::new(uploads, outputs, extensions, 1024 * 1024))
    }

    #[test]
    fn sanitize_rejects_path_traversal() {
        assert!(matches!(
            FileStore::sanitize("../../etc/passwd.gcode"),
            Err(AppError::InvalidFilename(_))
        ));
        assert!(matches!(FileStore::sanitize("a/b.gcode"), Err(AppError::InvalidFilename(_))));
        assert!(matches!(FileStore::sanitize("a\\b.gcode"), Err(AppError::InvalidFilename(_))));
        assert!(matches!(FileStore::sanitize("bad\0name.gcode"), Err(AppError::InvalidFilename(_))));
    }

    #[test]
    fn sanitize_replaces_unsafe_characters_and_collapses_runs() {
        let sanitized = FileStore::sanitize("my   weird!!file@@name.GCODE").unwrap();
        assert!(!sanitized.contains("  "));
        assert!(!sanitized.contains("__"));
        assert!(sanitized.ends_with(".gcode"));
    }

    #[test]
    fn sanitize_truncates_long_stems() {
        let long_name = format!("{}.gcode", "a".repeat(500));
        let sanitized = FileStore::sanitize(&long_name).unwrap();
        let stem = Path::new(&sanitized).file_stem().unwrap().to_string_lossy().to_string();
        assert!(stem.len() <= 100);
    }

    #[test]
    fn sanitize_is_idempotent() {
        let once = FileStore::sanitize("My File (final) v2.GCode").unwrap();
        let twice = FileStore::sanitize(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn sanitize_equal_inputs_yield_equal_paths() {
        let (_dir, store) = store();
        let a = FileStore::sanitize("My File.gcode").unwrap();
        let b = FileStore::sanitize("My File.gcode").unwrap();
        assert_eq!(store.upload_path("job-1", &a), store.upload_path("job-1", &b));
    }

    #[test]
    fn output_path_inserts_processed_suffix() {
        let (_dir, store) = store();
        let sanitized = FileStore::sanitize("benchy.gcode").unwrap();
        let output = store.output_path("job-1", &sanitized);
        assert_eq!(output.file_name().unwrap().to_string_lossy(), "job-1_benchy_processed.gcode");
    }

    #[test]
    fn validate_extension_rejects_disallowed() {
        let (_dir, store) = store();
        assert!(store.validate_extension("file.txt").is_err());
        assert!(store.validate_extension("file").is_err());
        assert!(store.validate_extension("file.GCODE").is_ok());
    }

    #[tokio::test]
    async fn capture_upload_reports_correct_size_and_head_chunk() {
        let (_dir, store) = store();
        let body = b";LAYER_CHANGE\nG1 X0 Y0 Z0.2 E1 F1800\n".repeat(20);
        let chunks: Vec<Result<Bytes, std::io::Error>> = body
            .chunks(10)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let captured = store
            .capture_upload("job-1", "benchy.gcode", stream::iter(chunks))
            .await
            .unwrap();
        assert_eq!(captured.size, body.len() as u64);
        assert_eq!(captured.head_chunk.len(), body.len().min(2048));
        assert_eq!(&captured.head_chunk[..], &body[..captured.head_chunk.len()]);
        let on_disk = tokio::fs::metadata(&captured.path).await.unwrap();
        assert_eq!(on_disk.len(), body.len() as u64);
    }

    #[tokio::test]
    async fn capture_upload_rejects_empty_stream() {
        let (_dir, store) = store();
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![];
        let err = store
            .capture_upload("job-1", "benchy.gcode", stream::iter(chunks))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EmptyFile));
    }

    #[tokio::test]
    async fn capture_upload_aborts_and_deletes_when_over_limit() {
        let (_dir, store) = store();
        let big_chunk = vec![b'x'; 2 * 1024 * 1024];
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![Ok(Bytes::from(big_chunk))];
        let err = store
            .capture_upload("job-1", "benchy.gcode", stream::iter(chunks))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::FileTooLarge(_)));
        let path = store.upload_path("job-1", "benchy.gcode");
        assert!(!path.exists());
    }

    #[test]
    fn sniff_gcode_accepts_valid_content() {
        let body = b";LAYER_CHANGE\nG1 X0 Y0 Z0.2 E1 F1800\n";
        assert!(FileStore::sniff_gcode(body).is_ok());
    }

    #[test]
    fn sniff_gcode_rejects_plain_text() {
        let body = b"just some ordinary prose with no commands in it at all";
        assert!(matches!(FileStore::sniff_gcode(body), Err(AppError::NotGcode)));
    }

    #[tokio::test]
    async fn delete_is_idempotent_for_missing_file() {
        let (_dir, store) = store();
        let missing = store.upload_dir().join("does-not-exist.gcode");
        store.delete(&missing).await;
        store.delete(&missing).await;
    }
}

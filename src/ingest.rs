use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::constants::generate_file_token;
use crate::encode::create_new_file;
use crate::error::{ArchiveError, ArchiveResult, ValidationError};
use crate::session::Session;
use crate::storage::StoragePaths;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadKind {
    Audio,
    Video,
    Image,
    Text,
}

impl UploadKind {
    /// Extensions accepted for this kind, compared case-insensitively
    pub fn allowed_extensions(&self) -> &'static [&'static str] {
        match self {
            UploadKind::Audio => &["wav"],
            UploadKind::Video => &["mp4"],
            UploadKind::Image => &["jpg", "jpeg", "png"],
            UploadKind::Text => &["txt", "pdf", "docx"],
        }
    }

    pub fn dir<'a>(&self, paths: &'a StoragePaths) -> &'a Path {
        match self {
            UploadKind::Audio => &paths.audio_dir,
            UploadKind::Video => &paths.video_dir,
            UploadKind::Image => &paths.image_dir,
            UploadKind::Text => &paths.text_dir,
        }
    }

    /// Stored file name. Audio keeps only the token; other kinds append the
    /// original name after it.
    pub fn stored_name(&self, token: &str, original: &str) -> String {
        match self {
            UploadKind::Audio => format!("{}.wav", token),
            _ => format!("{}_{}", token, original),
        }
    }
}

impl fmt::Display for UploadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadKind::Audio => "audio",
            UploadKind::Video => "video",
            UploadKind::Image => "image",
            UploadKind::Text => "text",
        };
        f.write_str(name)
    }
}

/// Last path component of a client-declared name, accepting either separator
fn base_name(declared: &str) -> &str {
    declared
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(declared)
        .trim()
}

/// Check the declared file name against the kind's allowlist.
///
/// Only the declared extension is looked at; content is never sniffed.
pub fn check_extension(kind: UploadKind, declared: &str) -> Result<String, ValidationError> {
    let name = base_name(declared);
    let accepted = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            kind.allowed_extensions()
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false);

    if name.is_empty() || name == "." || name == ".." || !accepted {
        return Err(ValidationError::UnsupportedExtension {
            kind,
            filename: declared.to_string(),
        });
    }
    Ok(name.to_string())
}

/// Copy an uploaded stream verbatim into the kind's content directory.
///
/// Nothing is left behind when the copy fails part way.
pub fn store_upload<R: Read>(
    paths: &StoragePaths,
    kind: UploadKind,
    declared_name: &str,
    mut reader: R,
) -> ArchiveResult<PathBuf> {
    let name = check_extension(kind, declared_name)?;
    let path = kind
        .dir(paths)
        .join(kind.stored_name(&generate_file_token(), &name));

    let file = create_new_file(&path)?;
    let mut writer = BufWriter::new(file);
    let copied = io::copy(&mut reader, &mut writer).and_then(|n| writer.flush().map(|_| n));
    let written = match copied {
        Ok(n) => n,
        Err(e) => {
            drop(writer);
            if let Err(remove_err) = std::fs::remove_file(&path) {
                warn!(
                    "Failed to remove partial upload {}: {}",
                    path.display(),
                    remove_err
                );
            }
            return Err(ArchiveError::io(&path, e));
        }
    };

    info!(
        "Stored {} upload '{}' ({} bytes) at {}",
        kind,
        name,
        written,
        path.display()
    );
    Ok(path)
}

/// Note a stored upload on the session.
///
/// Audio and video uploads become the session's most recent artifact.
/// Image and text uploads are only staged as present for the next submit.
pub fn record_upload(session: &mut Session, kind: UploadKind, path: PathBuf) {
    match kind {
        UploadKind::Audio => session.set_last_audio_path(path),
        UploadKind::Video => session.set_last_video_path(path),
        UploadKind::Image => session.stage_image(path),
        UploadKind::Text => session.stage_text(path),
    }
}

/// Store an upload and record it on the session
pub fn ingest_upload<R: Read>(
    paths: &StoragePaths,
    session: &mut Session,
    kind: UploadKind,
    declared_name: &str,
    reader: R,
) -> ArchiveResult<PathBuf> {
    let path = store_upload(paths, kind, declared_name, reader)?;
    record_upload(session, kind, path.clone());
    Ok(path)
}

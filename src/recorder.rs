use chrono::{DateTime, Local};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::config::Category;
use crate::constants::{CSV_HEADER, TIMESTAMP_FORMAT};
use crate::error::{ArchiveError, ArchiveResult, ValidationError};
use crate::session::Session;

/// Text fields of the submission form as entered by the user
#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionForm {
    pub name: String,
    pub category: Category,
    #[serde(default)]
    pub english_prompt: String,
    #[serde(default)]
    pub telugu_response: String,
}

/// One row of the submission log. Absent paths are stored as empty strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    #[serde(rename = "User ID")]
    pub user_id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "Category")]
    pub category: Category,
    #[serde(rename = "English Prompt")]
    pub english_prompt: String,
    #[serde(rename = "Telugu Response")]
    pub telugu_response: String,
    #[serde(rename = "Audio Path")]
    pub audio_path: String,
    #[serde(rename = "Video Path")]
    pub video_path: String,
}

impl SubmissionRecord {
    fn to_row(&self) -> [&str; 8] {
        [
            self.user_id.as_str(),
            self.name.as_str(),
            self.timestamp.as_str(),
            self.category.as_str(),
            self.english_prompt.as_str(),
            self.telugu_response.as_str(),
            self.audio_path.as_str(),
            self.video_path.as_str(),
        ]
    }
}

/// What the session and the form offer as content for a submission
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentPresence {
    pub image_uploaded: bool,
    pub text_uploaded: bool,
}

fn path_string(path: Option<&Path>) -> String {
    path.map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Validate the form and assemble a record stamped with `now`
pub fn build_record(
    session: &Session,
    form: &SubmissionForm,
    presence: ContentPresence,
    now: DateTime<Local>,
) -> Result<SubmissionRecord, ValidationError> {
    let name = form.name.trim();
    if name.is_empty() {
        return Err(ValidationError::MissingName);
    }

    let has_content = session.last_audio_path().is_some()
        || session.last_video_path().is_some()
        || presence.image_uploaded
        || presence.text_uploaded;
    if !has_content {
        return Err(ValidationError::NoContent);
    }

    Ok(SubmissionRecord {
        user_id: session.user_id().to_string(),
        name: name.to_string(),
        timestamp: now.format(TIMESTAMP_FORMAT).to_string(),
        category: form.category,
        english_prompt: form.english_prompt.trim().to_string(),
        telugu_response: form.telugu_response.trim().to_string(),
        audio_path: path_string(session.last_audio_path()),
        video_path: path_string(session.last_video_path()),
    })
}

/// Validate, append to the log, then clear the session's artifact paths.
///
/// A failed validation or write leaves both the log and the session as they were.
pub fn submit(
    log: &SubmissionLog,
    session: &mut Session,
    form: &SubmissionForm,
    presence: ContentPresence,
) -> ArchiveResult<SubmissionRecord> {
    let record = record_submission(log, session, form, presence)?;
    session.reset_after_submit();
    Ok(record)
}

/// Validate and append without changing the session.
///
/// Callers holding a snapshot of the session clear what was submitted once this returns.
pub fn record_submission(
    log: &SubmissionLog,
    session: &Session,
    form: &SubmissionForm,
    presence: ContentPresence,
) -> ArchiveResult<SubmissionRecord> {
    let record = match build_record(session, form, presence, Local::now()) {
        Ok(record) => record,
        Err(e) => {
            warn!("Rejected submission for user {}: {}", session.user_id(), e);
            return Err(e.into());
        }
    };

    log.append(&record)?;

    info!(
        "Submission saved for user {} ({}, category {})",
        record.user_id, record.name, record.category
    );
    Ok(record)
}

/// Append-only CSV table of accepted submissions.
///
/// Every append rereads the whole table and rewrites it. There is no lock:
/// two concurrent appends can race and the later rewrite wins.
#[derive(Debug, Clone)]
pub struct SubmissionLog {
    path: PathBuf,
}

impl SubmissionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Existing header and rows, or `None` when the log was never written
    fn read_table(&self) -> ArchiveResult<Option<(StringRecord, Vec<StringRecord>)>> {
        if !self.exists() {
            return Ok(None);
        }
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.path)?;
        let header = reader.headers()?.clone();
        let rows = reader.records().collect::<Result<Vec<_>, _>>()?;
        Ok(Some((header, rows)))
    }

    /// Append one record, creating the log with its header on first use
    pub fn append(&self, record: &SubmissionRecord) -> ArchiveResult<()> {
        let rows = match self.read_table()? {
            Some((header, rows)) => {
                if header.iter().ne(CSV_HEADER.iter().copied()) {
                    return Err(ArchiveError::LogHeader {
                        path: self.path.clone(),
                    });
                }
                rows
            }
            None => Vec::new(),
        };

        // Rewrite into a sibling temp file and rename it over the log so a
        // crash mid-write cannot truncate what was already there.
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let temp = NamedTempFile::new_in(dir).map_err(|e| ArchiveError::io(dir, e))?;
        {
            let mut writer = WriterBuilder::new().from_writer(temp.as_file());
            writer.write_record(CSV_HEADER)?;
            for row in &rows {
                writer.write_record(row)?;
            }
            writer.write_record(record.to_row())?;
            writer.flush().map_err(|e| ArchiveError::io(temp.path(), e))?;
        }
        temp.as_file()
            .sync_all()
            .map_err(|e| ArchiveError::io(temp.path(), e))?;
        temp.persist(&self.path)
            .map_err(|e| ArchiveError::io(&self.path, e.error))?;
        Ok(())
    }

    /// All rows, oldest first
    pub fn records(&self) -> ArchiveResult<Vec<SubmissionRecord>> {
        if !self.exists() {
            return Ok(Vec::new());
        }
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.path)?;
        let records = reader
            .deserialize()
            .collect::<Result<Vec<SubmissionRecord>, _>>()?;
        Ok(records)
    }

    pub fn row_count(&self) -> ArchiveResult<usize> {
        Ok(self.read_table()?.map(|(_, rows)| rows.len()).unwrap_or(0))
    }

    /// Raw bytes of the log for download, `None` when nothing was submitted yet
    pub fn download(&self) -> ArchiveResult<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ArchiveError::io(&self.path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn form(name: &str) -> SubmissionForm {
        SubmissionForm {
            name: name.to_string(),
            category: Category::Culture,
            english_prompt: "  What is your village festival?  ".to_string(),
            telugu_response: "సంక్రాంతి, \"పెద్ద పండుగ\"".to_string(),
        }
    }

    #[test]
    fn test_build_record_trims_and_formats() {
        let mut session = Session::with_user_id("1a2b3c4d");
        session.set_last_video_path(PathBuf::from("video_clips/v.mkv"));
        let now = Local.with_ymd_and_hms(2024, 1, 14, 9, 5, 7).unwrap();

        let record = build_record(&session, &form("  Ravi "), ContentPresence::default(), now).unwrap();
        assert_eq!(record.user_id, "1a2b3c4d");
        assert_eq!(record.name, "Ravi");
        assert_eq!(record.timestamp, "2024-01-14 09:05:07");
        assert_eq!(record.english_prompt, "What is your village festival?");
        assert_eq!(record.audio_path, "");
        assert_eq!(record.video_path, "video_clips/v.mkv");
    }

    #[test]
    fn test_validation_order() {
        let session = Session::with_user_id("1a2b3c4d");
        let now = Local::now();
        assert_eq!(
            build_record(&session, &form("   "), ContentPresence::default(), now),
            Err(ValidationError::MissingName)
        );
        assert_eq!(
            build_record(&session, &form("Ravi"), ContentPresence::default(), now),
            Err(ValidationError::NoContent)
        );
        let presence = ContentPresence {
            image_uploaded: false,
            text_uploaded: true,
        };
        assert!(build_record(&session, &form("Ravi"), presence, now).is_ok());
    }

    #[test]
    fn test_log_quotes_and_reads_back() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log = SubmissionLog::new(temp_dir.path().join("submissions.csv"));
        let mut session = Session::with_user_id("1a2b3c4d");
        session.set_last_audio_path(PathBuf::from("audio_clips/a,b.wav"));

        let record = submit(&log, &mut session, &form("Ravi"), ContentPresence::default()).unwrap();

        let text = std::fs::read_to_string(log.path()).unwrap();
        assert!(text.starts_with(
            "User ID,Name,Timestamp,Category,English Prompt,Telugu Response,Audio Path,Video Path\n"
        ));
        assert!(text.contains("\"audio_clips/a,b.wav\""));
        assert!(text.contains("\"\"పెద్ద పండుగ\"\"\""));

        assert_eq!(log.records().unwrap(), vec![record]);
        assert_eq!(session.last_audio_path(), None);
    }

    #[test]
    fn test_foreign_header_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("submissions.csv");
        std::fs::write(&path, "a,b\n1,2\n").unwrap();
        let log = SubmissionLog::new(&path);
        let mut session = Session::with_user_id("1a2b3c4d");
        session.set_last_audio_path(PathBuf::from("a.wav"));

        let err = submit(&log, &mut session, &form("Ravi"), ContentPresence::default()).unwrap_err();
        assert!(matches!(err, ArchiveError::LogHeader { .. }));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a,b\n1,2\n");
        assert!(session.last_audio_path().is_some());
    }

    #[test]
    fn test_download_missing_log() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log = SubmissionLog::new(temp_dir.path().join("submissions.csv"));
        assert_eq!(log.download().unwrap(), None);
        assert_eq!(log.row_count().unwrap(), 0);
    }
}

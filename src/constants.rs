use rand::Rng;

pub const AUDIO_DIR: &str = "audio_clips";
pub const VIDEO_DIR: &str = "video_clips";
pub const TEXT_DIR: &str = "text_uploads";
pub const IMAGE_DIR: &str = "image_uploads";

/// Persistent submission log, relative to the data directory
pub const DATA_FILE: &str = "submissions.csv";

/// File name offered when the whole log is downloaded
pub const DATA_FILE_DOWNLOAD_NAME: &str = "telugu_archive_submissions.csv";

/// Column order of the submission log
pub const CSV_HEADER: [&str; 8] = [
    "User ID",
    "Name",
    "Timestamp",
    "Category",
    "English Prompt",
    "Telugu Response",
    "Audio Path",
    "Video Path",
];

/// Recorded video is paced by frame count at this rate, not by wall clock
pub const VIDEO_FPS: u32 = 15;

/// Recorded audio is always written at this rate
pub const AUDIO_SAMPLE_RATE: u32 = 48000;

/// Timestamp format stored in the log (second precision, local time)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Generate the per-session user identifier (8 lowercase hex characters)
pub fn generate_user_id() -> String {
    let value: u32 = rand::thread_rng().gen();
    format!("{:08x}", value)
}

/// Generate a unique token used as the stem of stored file names
pub fn generate_file_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_is_eight_hex_chars() {
        for _ in 0..100 {
            let id = generate_user_id();
            assert_eq!(id.len(), 8);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn test_file_tokens_are_distinct() {
        let a = generate_file_token();
        let b = generate_file_token();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}

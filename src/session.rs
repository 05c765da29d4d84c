use dashmap::DashMap;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::capture::{CaptureBuffer, CaptureSink};
use crate::constants::generate_user_id;
use crate::error::{ArchiveError, ArchiveResult};

/// Per-browser-session state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    user_id: String,
    last_audio_path: Option<PathBuf>,
    last_video_path: Option<PathBuf>,
    // Image/text uploads only mark the next submit as having content.
    // They are never written into the record's path columns.
    staged_image: Option<PathBuf>,
    staged_text: Option<PathBuf>,
}

impl Session {
    pub fn init() -> Self {
        Self::with_user_id(generate_user_id())
    }

    pub fn with_user_id(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            last_audio_path: None,
            last_video_path: None,
            staged_image: None,
            staged_text: None,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn last_audio_path(&self) -> Option<&Path> {
        self.last_audio_path.as_deref()
    }

    pub fn set_last_audio_path(&mut self, path: PathBuf) {
        self.last_audio_path = Some(path);
    }

    pub fn last_video_path(&self) -> Option<&Path> {
        self.last_video_path.as_deref()
    }

    pub fn set_last_video_path(&mut self, path: PathBuf) {
        self.last_video_path = Some(path);
    }

    pub fn reset_after_submit(&mut self) {
        self.last_audio_path = None;
        self.last_video_path = None;
    }

    /// Clear what `submitted` carried, keeping anything newer
    pub fn clear_submitted(&mut self, submitted: &Session) {
        if self.last_audio_path == submitted.last_audio_path {
            self.last_audio_path = None;
        }
        if self.last_video_path == submitted.last_video_path {
            self.last_video_path = None;
        }
        if self.staged_image == submitted.staged_image {
            self.staged_image = None;
        }
        if self.staged_text == submitted.staged_text {
            self.staged_text = None;
        }
    }

    pub fn stage_image(&mut self, path: PathBuf) {
        self.staged_image = Some(path);
    }

    pub fn stage_text(&mut self, path: PathBuf) {
        self.staged_text = Some(path);
    }

    pub fn has_staged_image(&self) -> bool {
        self.staged_image.is_some()
    }

    pub fn has_staged_text(&self) -> bool {
        self.staged_text.is_some()
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            user_id: self.user_id.clone(),
            last_audio_path: self.last_audio_path.clone(),
            last_video_path: self.last_video_path.clone(),
            image_uploaded: self.has_staged_image(),
            text_uploaded: self.has_staged_text(),
        }
    }
}

/// Serializable snapshot of a session for the HTTP surface
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub user_id: String,
    pub last_audio_path: Option<PathBuf>,
    pub last_video_path: Option<PathBuf>,
    pub image_uploaded: bool,
    pub text_uploaded: bool,
}

/// A session plus its current capture session, if one was started
pub struct SessionSlot {
    pub session: Session,
    pub capture: Option<CaptureBuffer>,
    last_touched: Instant,
}

impl SessionSlot {
    fn new(session: Session) -> Self {
        Self {
            session,
            capture: None,
            last_touched: Instant::now(),
        }
    }

    /// Begin a fresh capture session; anything buffered before is discarded
    pub fn start_capture(&mut self) -> CaptureSink {
        let buffer = CaptureBuffer::new();
        let sink = buffer.sink();
        self.capture = Some(buffer);
        sink
    }
}

/// In-process registry of live sessions keyed by an opaque session token
#[derive(Default)]
pub struct SessionStore {
    slots: DashMap<String, SessionSlot>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session; returns its token and user id
    pub fn create(&self) -> (String, String) {
        let session_id = uuid::Uuid::new_v4().to_string();
        let session = Session::init();
        let user_id = session.user_id().to_string();
        self.slots.insert(session_id.clone(), SessionSlot::new(session));
        (session_id, user_id)
    }

    /// Run `f` with exclusive access to one session and mark it as active.
    ///
    /// Keep `f` short: it holds the shard lock for this session.
    pub fn with_slot<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut SessionSlot) -> R,
    ) -> ArchiveResult<R> {
        let mut slot = self
            .slots
            .get_mut(session_id)
            .ok_or_else(|| ArchiveError::SessionNotFound(session_id.to_string()))?;
        let slot = slot.value_mut();
        slot.last_touched = Instant::now();
        Ok(f(slot))
    }

    /// Drop every session not touched within `idle`; returns how many went
    pub fn evict_idle(&self, idle: Duration) -> usize {
        match Instant::now().checked_sub(idle) {
            Some(cutoff) => self.evict_untouched_since(cutoff),
            None => 0,
        }
    }

    fn evict_untouched_since(&self, cutoff: Instant) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.last_touched >= cutoff);
        before.saturating_sub(self.slots.len())
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.slots.remove(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::VideoFrame;

    #[test]
    fn test_setters_are_independent() {
        let mut session = Session::with_user_id("abcd1234");
        session.set_last_audio_path(PathBuf::from("audio_clips/a.wav"));
        assert_eq!(session.last_audio_path(), Some(Path::new("audio_clips/a.wav")));
        assert_eq!(session.last_video_path(), None);

        session.set_last_video_path(PathBuf::from("video_clips/v.mkv"));
        session.set_last_audio_path(PathBuf::from("audio_clips/b.wav"));
        assert_eq!(session.last_video_path(), Some(Path::new("video_clips/v.mkv")));
        assert_eq!(session.last_audio_path(), Some(Path::new("audio_clips/b.wav")));
    }

    #[test]
    fn test_reset_after_submit_clears_both() {
        let mut session = Session::init();
        let user_id = session.user_id().to_string();
        session.set_last_audio_path(PathBuf::from("a.wav"));
        session.set_last_video_path(PathBuf::from("v.mkv"));
        session.stage_image(PathBuf::from("i.png"));

        session.reset_after_submit();
        assert_eq!(session.last_audio_path(), None);
        assert_eq!(session.last_video_path(), None);
        assert_eq!(session.user_id(), user_id);
        // staged uploads are managed separately
        assert!(session.has_staged_image());

        session.reset_after_submit();
        assert_eq!(session.last_audio_path(), None);
    }

    #[test]
    fn test_clear_submitted_keeps_newer_artifacts() {
        let mut session = Session::with_user_id("abcd1234");
        session.set_last_audio_path(PathBuf::from("a.wav"));
        session.set_last_video_path(PathBuf::from("v.mkv"));
        session.stage_text(PathBuf::from("t.txt"));
        let submitted = session.clone();

        // a new recording lands while the row is being written
        session.set_last_audio_path(PathBuf::from("b.wav"));
        session.clear_submitted(&submitted);

        assert_eq!(session.last_audio_path(), Some(Path::new("b.wav")));
        assert_eq!(session.last_video_path(), None);
        assert!(!session.has_staged_text());
        assert!(!session.has_staged_image());
    }

    #[test]
    fn test_store_create_and_lookup() {
        let store = SessionStore::new();
        let (sid, user_id) = store.create();
        assert_eq!(user_id.len(), 8);

        let seen = store.with_slot(&sid, |slot| slot.session.user_id().to_string()).unwrap();
        assert_eq!(seen, user_id);

        assert!(matches!(
            store.with_slot("missing", |_| ()),
            Err(ArchiveError::SessionNotFound(_))
        ));
        assert!(store.remove(&sid));
        assert!(store.is_empty());
    }

    #[test]
    fn test_idle_sessions_are_evicted() {
        let store = SessionStore::new();
        let (stale, _) = store.create();
        let (active, _) = store.create();
        store.with_slot(&stale, |slot| slot.start_capture()).unwrap();

        std::thread::sleep(Duration::from_millis(5));
        let cutoff = Instant::now();
        std::thread::sleep(Duration::from_millis(5));
        store.with_slot(&active, |_| ()).unwrap();

        assert_eq!(store.evict_untouched_since(cutoff), 1);
        assert!(matches!(
            store.with_slot(&stale, |_| ()),
            Err(ArchiveError::SessionNotFound(_))
        ));
        assert!(store.with_slot(&active, |_| ()).is_ok());

        assert_eq!(store.evict_idle(Duration::from_secs(3600)), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_start_capture_discards_previous_buffer() {
        let store = SessionStore::new();
        let (sid, _) = store.create();

        let old_sink = store.with_slot(&sid, |slot| slot.start_capture()).unwrap();
        old_sink.push_video_frame(VideoFrame::solid(1, 1, [9, 9, 9]));

        let new_sink = store.with_slot(&sid, |slot| slot.start_capture()).unwrap();
        assert!(!old_sink.push_video_frame(VideoFrame::solid(1, 1, [9, 9, 9])));
        new_sink.push_video_frame(VideoFrame::solid(1, 1, [1, 1, 1]));

        let media = store
            .with_slot(&sid, |slot| slot.capture.as_ref().map(|c| c.drain()))
            .unwrap()
            .unwrap();
        assert_eq!(media.video_frames.len(), 1);
        assert_eq!(media.video_frames[0].data, vec![1, 1, 1]);
    }
}

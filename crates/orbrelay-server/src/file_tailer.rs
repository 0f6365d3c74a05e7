//! The File Tailer: watches a directory for file growth and feeds new bytes
//! through the HRPT parser into the Holder.
//!
//! Split in two: [`spawn_watcher`] is the swappable OS notification source,
//! producing a channel of modified paths; [`FileTailer`] is the adapter that
//! owns per-path parser state and calls the pure parser. The two halves are
//! tested independently — `FileTailer::handle_event` with synthetic bytes on
//! disk, `spawn_watcher` with a real `notify` watcher.

use std::{collections::HashMap, path::{Path, PathBuf}, sync::Arc};

use glob::Pattern;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use orbrelay_core::{env::Environment, Holder, PayloadSource};
use orbrelay_proto::{CaduReader, Elevation, HrptReader};
use tokio::{
    io::{AsyncReadExt, AsyncSeekExt},
    sync::{mpsc, Mutex, Notify},
};

use crate::error::ServerError;

/// Which format reader, if any, has been bound to a path. Cadu is tried
/// first and always rejects; it is represented here purely to preserve the
/// registration-order probing contract, not because it ever does anything
/// once bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recognizer {
    Cadu,
    Hrpt,
}

struct PathState {
    recognizer: Option<Recognizer>,
    offset: u64,
}

impl Default for PathState {
    fn default() -> Self {
        Self { recognizer: None, offset: 0 }
    }
}

/// Owns per-path parser state and the Holder handle. Stateless `HrptReader`
/// calls are made for each modify event; file handles are opened and closed
/// within a single event, never held across events.
pub struct FileTailer<E: Environment> {
    holder: Arc<Holder>,
    elevation: Arc<dyn Elevation>,
    env: E,
    states: Mutex<HashMap<PathBuf, Arc<Mutex<PathState>>>>,
}

impl<E: Environment> FileTailer<E> {
    /// Build a tailer that stores decoded scanlines in `holder`, using
    /// `elevation` as the injected collaborator the parser calls, and `env`
    /// for the wall clock the parser resolves timecodes against.
    pub fn new(holder: Arc<Holder>, elevation: Arc<dyn Elevation>, env: E) -> Self {
        Self { holder, elevation, env, states: Mutex::new(HashMap::new()) }
    }

    /// Process one modification event for `path`: read any bytes past the
    /// recorded offset, probe/bind a format recognizer if none is bound yet,
    /// decode as many scanlines as the bytes contain, and add each to the
    /// Holder.
    ///
    /// Concurrent events for the same path serialize on that path's own
    /// mutex; events for different paths proceed independently.
    pub async fn handle_event(&self, path: &Path) -> Result<(), ServerError> {
        let path_state = {
            let mut states = self.states.lock().await;
            Arc::clone(states.entry(path.to_path_buf()).or_insert_with(|| Arc::new(Mutex::new(PathState::default()))))
        };
        let mut state = path_state.lock().await;

        let mut file = tokio::fs::File::open(path).await?;
        file.seek(std::io::SeekFrom::Start(state.offset)).await?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;
        drop(file);

        if state.recognizer.is_none() {
            state.recognizer = if CaduReader::probe(&buf) {
                Some(Recognizer::Cadu)
            } else if HrptReader::probe(&buf) {
                Some(Recognizer::Hrpt)
            } else {
                None
            };
        }

        match state.recognizer {
            Some(Recognizer::Hrpt) => {
                let reader = HrptReader;
                let (scanlines, consumed) = reader.read(&buf, self.env.utc_now(), self.elevation.as_ref());
                state.offset += consumed as u64;
                drop(state);

                for scanline in scanlines {
                    self.holder
                        .add(scanline.satellite, scanline.timestamp, scanline.elevation, PayloadSource::Owned(scanline.data))
                        .await;
                }
            },
            Some(Recognizer::Cadu) | None => {},
        }

        Ok(())
    }

    /// Drive the tailer from a channel of modified paths until it closes or
    /// `shutdown` fires. Each path is handled on its own spawned task so
    /// slow I/O on one file never blocks another.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<PathBuf>, shutdown: Arc<Notify>) {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(path) => {
                            let this = Arc::clone(&self);
                            tokio::spawn(async move {
                                if let Err(error) = this.handle_event(&path).await {
                                    tracing::warn!(?path, %error, "file tailer event failed");
                                }
                            });
                        },
                        None => break,
                    }
                },
                () = shutdown.notified() => break,
            }
        }
    }
}

/// Start a filesystem watcher on `data_dir`, forwarding paths whose file
/// name matches `file_pattern` on every `modify` event. The watcher itself
/// must be kept alive for as long as events are wanted; dropping it stops
/// delivery.
pub fn spawn_watcher(data_dir: &Path, file_pattern: &str) -> notify::Result<(RecommendedWatcher, mpsc::UnboundedReceiver<PathBuf>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let pattern = Pattern::new(file_pattern).map_err(|e| notify::Error::generic(&e.to_string()))?;

    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        let Ok(event) = result else { return };
        if !matches!(event.kind, EventKind::Modify(_)) {
            return;
        }
        for path in event.paths {
            let matches = path.file_name().map(|name| pattern.matches(&name.to_string_lossy())).unwrap_or(false);
            if matches {
                let _ = tx.send(path);
            }
        }
    })?;
    watcher.watch(data_dir, RecursiveMode::NonRecursive)?;

    Ok((watcher, rx))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use chrono::{DateTime, TimeZone, Utc};
    use orbrelay_core::Announcer;
    use orbrelay_proto::Message;

    use super::*;

    struct FixedEnv(DateTime<Utc>);

    impl Clone for FixedEnv {
        fn clone(&self) -> Self {
            Self(self.0)
        }
    }

    impl Environment for FixedEnv {
        type Instant = std::time::Instant;

        #[allow(clippy::disallowed_methods)]
        fn now(&self) -> Self::Instant {
            std::time::Instant::now()
        }

        fn utc_now(&self) -> DateTime<Utc> {
            self.0
        }

        fn sleep(&self, duration: std::time::Duration) -> impl std::future::Future<Output = ()> + Send {
            tokio::time::sleep(duration)
        }
    }

    struct NullAnnouncer;

    #[async_trait::async_trait]
    impl Announcer for NullAnnouncer {
        async fn publish(&self, _message: Message) {}
    }

    struct ZeroElevation;

    impl Elevation for ZeroElevation {
        fn elevation(&self, _satellite: &str, _timestamp: DateTime<Utc>) -> f64 {
            0.0
        }
    }

    fn valid_frame(satellite_code: u8, day: u16, msecs: u32) -> Vec<u8> {
        use orbrelay_proto::{encode_timecode, LINE_SIZE};
        let mut frame = vec![0u8; LINE_SIZE];
        let frame_sync: [u16; 6] = [644, 367, 860, 413, 527, 149];
        for (i, word) in frame_sync.iter().enumerate() {
            frame[i * 2..i * 2 + 2].copy_from_slice(&word.to_be_bytes());
        }
        let id_word = u16::from(satellite_code) << 3;
        frame[12..14].copy_from_slice(&id_word.to_be_bytes());
        for (i, word) in encode_timecode(day, msecs).iter().enumerate() {
            frame[16 + i * 2..16 + i * 2 + 2].copy_from_slice(&word.to_be_bytes());
        }
        frame
    }

    #[tokio::test]
    async fn short_write_does_not_bind_a_recognizer_yet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.hrpt");
        std::fs::File::create(&path).unwrap().write_all(&[0u8; 10]).unwrap();

        let holder = Arc::new(Holder::new("station1:9000", Arc::new(NullAnnouncer)));
        let tailer = FileTailer::new(holder.clone(), Arc::new(ZeroElevation), FixedEnv(Utc::now()));

        tailer.handle_event(&path).await.unwrap();
        assert_eq!(holder.satellite_count(), 0);
    }

    #[tokio::test]
    async fn valid_frame_is_parsed_into_holder() {
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.hrpt");
        std::fs::File::create(&path).unwrap().write_all(&valid_frame(7, 180, 43_200_000)).unwrap();

        let holder = Arc::new(Holder::new("station1:9000", Arc::new(NullAnnouncer)));
        let tailer = FileTailer::new(holder.clone(), Arc::new(ZeroElevation), FixedEnv(now));

        tailer.handle_event(&path).await.unwrap();
        assert_eq!(holder.satellites(), vec!["NOAA 15".to_string()]);
    }

    #[tokio::test]
    async fn offset_advances_so_reprocessing_does_not_duplicate() {
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.hrpt");
        {
            let mut file = std::fs::File::create(&path).unwrap();
            file.write_all(&valid_frame(7, 180, 43_200_000)).unwrap();
        }

        let holder = Arc::new(Holder::new("station1:9000", Arc::new(NullAnnouncer)));
        let tailer = FileTailer::new(holder.clone(), Arc::new(ZeroElevation), FixedEnv(now));
        tailer.handle_event(&path).await.unwrap();
        tailer.handle_event(&path).await.unwrap(); // no new bytes
        assert_eq!(holder.timestamps_for("NOAA 15").len(), 1);

        {
            let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&valid_frame(3, 181, 0)).unwrap();
        }
        tailer.handle_event(&path).await.unwrap();
        assert_eq!(holder.timestamps_for("NOAA 16").len(), 1);
    }

    #[tokio::test]
    async fn garbage_line_advances_offset_without_adding_scanline() {
        use orbrelay_proto::LINE_SIZE;
        let now = Utc::now();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.hrpt");
        std::fs::File::create(&path).unwrap().write_all(&vec![0u8; LINE_SIZE]).unwrap();

        let holder = Arc::new(Holder::new("station1:9000", Arc::new(NullAnnouncer)));
        let tailer = FileTailer::new(holder.clone(), Arc::new(ZeroElevation), FixedEnv(now));
        tailer.handle_event(&path).await.unwrap();

        assert_eq!(holder.satellite_count(), 0);
        // Subsequent valid frame still processed (offset did advance).
        {
            let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&valid_frame(7, 180, 43_200_000)).unwrap();
        }
        tailer.handle_event(&path).await.unwrap();
        assert_eq!(holder.satellite_count(), 1);
    }

    #[test]
    fn glob_pattern_matches_file_name_only() {
        let pattern = Pattern::new("*.hrpt").unwrap();
        assert!(pattern.matches("a.hrpt"));
        assert!(!pattern.matches("a.cadu"));
    }
}

use std::{
    io,
    sync::{
        mpsc::{self, RecvTimeoutError, Sender},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, info, warn};

use crate::cache::CacheStore;

pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(600);
// Floor for the sweep interval. A zero timeout would spin on the cache lock.
pub const MIN_CLEANUP_INTERVAL: Duration = Duration::from_millis(10);

/// Handle to the background thread that periodically drops expired cache entries.
///
/// The thread runs until [`Sweeper::stop`] is called or the handle is dropped.
pub struct Sweeper {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    pub fn spawn(cache: Arc<CacheStore>, interval: Duration) -> io::Result<Self> {
        let interval = interval.max(MIN_CLEANUP_INTERVAL);
        let (stop, stopped) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("cache-sweeper".to_string())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let removed = cache.sweep();
                        debug!("Sweep removed {} expired entries", removed);
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        info!("Cache sweeper running every {:?}", interval);
        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// Wakes the sweeper thread and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            // a closed channel means the thread is already gone
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Cache sweeper panicked");
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cache::CachedRecord;
    use std::time::{Instant, SystemTime};

    fn record() -> CachedRecord {
        CachedRecord {
            name: "example.com".to_string(),
            rtype: 1,
            class: 1,
            ttl: 5,
            data: vec![127, 0, 0, 1],
        }
    }

    #[test]
    fn removes_expired_entries_on_each_tick() {
        let cache = Arc::new(CacheStore::new());
        let past = SystemTime::now() - Duration::from_secs(60);
        cache.put_at("stale.example.", 1, vec![record()], 5, past);
        cache.put("live.example.", 1, vec![record()], 600);

        let sweeper = Sweeper::spawn(Arc::clone(&cache), Duration::from_millis(20)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while cache.len() > 1 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        sweeper.stop();

        assert_eq!(cache.len(), 1);
        assert!(cache.get("live.example.", 1).is_some());
    }

    #[test]
    fn stop_returns_promptly() {
        let cache = Arc::new(CacheStore::new());
        let sweeper = Sweeper::spawn(cache, DEFAULT_CLEANUP_INTERVAL).unwrap();

        let started = Instant::now();
        sweeper.stop();

        assert!(started.elapsed() < Duration::from_secs(5));
    }
}

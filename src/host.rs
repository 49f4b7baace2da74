//! Driving sessions from a host which owns buffer memory and guards it with one global lock.
//!
//! Engine work runs with the host lock released, so other host work can proceed while a session
//! is busy. Buffer shape inspection, output allocation and handing buffers back to the host
//! happen with the lock held.
//!
//! Lock order: a session's mutex is only ever acquired while the host lock is released. A thread
//! may reacquire the host lock while it holds a session mutex, but never the other way round.

use std::sync::Arc;

use parking_lot::{const_mutex, Mutex, MutexGuard};

use crate::buffer::{AudioBuffer, CHANNEL_AXIS};
use crate::{Availability, Error, Result, StretchSession};

// -------------------------------------------------------------------------------------------------

/// The host's exclusivity lock.
pub struct HostLock {
    mutex: Mutex<()>,
}

impl HostLock {
    pub const fn new() -> Self {
        Self {
            mutex: const_mutex(()),
        }
    }

    /// Process wide host lock instance.
    pub fn global() -> &'static HostLock {
        static GLOBAL: HostLock = HostLock::new();
        &GLOBAL
    }

    /// Blocks until the lock is held by the calling thread.
    pub fn acquire(&self) -> HostGuard<'_> {
        HostGuard {
            lock: self,
            guard: self.mutex.lock(),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.mutex.is_locked()
    }
}

impl Default for HostLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof that the calling thread holds a [`HostLock`].
pub struct HostGuard<'a> {
    lock: &'a HostLock,
    guard: MutexGuard<'a, ()>,
}

impl<'a> HostGuard<'a> {
    pub fn lock(&self) -> &'a HostLock {
        self.lock
    }

    /// Runs `f` with the host lock released and reacquires it before returning.
    pub fn allow_threads<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        MutexGuard::unlocked(&mut self.guard, f)
    }
}

// -------------------------------------------------------------------------------------------------

/// A [`StretchSession`] which can be shared between host threads.
///
/// Calls on one session are serialized by a per-session mutex. Calls on independent sessions
/// run in parallel, as all engine work happens with the host lock released.
#[derive(Clone)]
pub struct SharedSession {
    inner: Arc<Mutex<StretchSession>>,
    channels: usize,
}

impl SharedSession {
    pub fn new(session: StretchSession) -> Self {
        let channels = session.channels();
        Self {
            inner: Arc::new(Mutex::new(session)),
            channels,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    fn check_shape(&self, buffer: &AudioBuffer) -> Result<()> {
        let actual = buffer.shape()[CHANNEL_AXIS];
        if actual != self.channels {
            return Err(Error::InvalidShape {
                axis: "channel",
                expected: self.channels,
                actual,
            });
        }
        Ok(())
    }

    /// Runs `f` on the session with the host lock released. Use this for setters and getters.
    pub fn with_session<F, R>(&self, host: &mut HostGuard<'_>, f: F) -> R
    where
        F: FnOnce(&mut StretchSession) -> R,
    {
        host.allow_threads(|| f(&mut self.inner.lock()))
    }

    /// See [`StretchSession::study`].
    pub fn study(
        &self,
        host: &mut HostGuard<'_>,
        input: &AudioBuffer,
        final_chunk: bool,
    ) -> Result<()> {
        self.check_shape(input)?;
        self.with_session(host, |session| session.study(input, final_chunk))
    }

    /// See [`StretchSession::process`].
    pub fn process(
        &self,
        host: &mut HostGuard<'_>,
        input: &AudioBuffer,
        final_chunk: bool,
    ) -> Result<()> {
        self.check_shape(input)?;
        self.with_session(host, |session| session.process(input, final_chunk))
    }

    /// See [`StretchSession::retrieve`]. The output buffer is allocated, and released on
    /// errors, with the host lock held.
    pub fn retrieve(&self, host: &mut HostGuard<'_>, max_wanted: usize) -> Result<AudioBuffer> {
        let lock = host.lock();
        self.with_session(host, |session| {
            let count = session.retrievable(max_wanted);
            let mut output = {
                let _host = lock.acquire();
                AudioBuffer::new(self.channels, count, 0.0)?
            };
            match session.retrieve_into(&mut output) {
                Ok(_) => Ok(output),
                Err(err) => {
                    let _host = lock.acquire();
                    drop(output);
                    Err(err)
                }
            }
        })
    }

    pub fn availability(&self, host: &mut HostGuard<'_>) -> Availability {
        self.with_session(host, |session| session.availability())
    }

    pub fn available_sample_count(&self, host: &mut HostGuard<'_>) -> usize {
        self.with_session(host, |session| session.available_sample_count())
    }

    pub fn is_finished(&self, host: &mut HostGuard<'_>) -> bool {
        self.with_session(host, |session| session.is_finished())
    }

    pub fn reset(&self, host: &mut HostGuard<'_>) {
        self.with_session(host, |session| session.reset())
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Preset, ProcessMode, SessionConfig, StretchOptions};
    use elastic_engine::{Engine, Parameter};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn session(channels: usize, time_ratio: f64) -> SharedSession {
        SharedSession::new(
            StretchSession::new(22050, channels, Preset::Default.options(), time_ratio, 1.0)
                .unwrap(),
        )
    }

    fn drain(shared: &SharedSession, host: &mut HostGuard<'_>) -> usize {
        let mut total = 0;
        while !shared.is_finished(host) {
            total += shared.retrieve(host, 4096).unwrap().sample_count();
        }
        total
    }

    #[test]
    fn allow_threads_releases_the_lock() {
        let lock = HostLock::new();
        let mut host = lock.acquire();
        assert!(lock.is_locked());
        let was_locked = host.allow_threads(|| lock.is_locked());
        assert!(!was_locked);
        assert!(lock.is_locked());
        drop(host);
        assert!(!lock.is_locked());
    }

    #[test]
    fn shape_is_checked_before_engine_work() {
        let lock = HostLock::new();
        let mut host = lock.acquire();
        let shared = session(2, 1.0);
        assert!(matches!(
            shared.process(&mut host, &AudioBuffer::new(1, 64, 0.0).unwrap(), false),
            Err(Error::InvalidShape { .. })
        ));
        assert!(matches!(
            shared.study(&mut host, &AudioBuffer::new(3, 64, 0.0).unwrap(), false),
            Err(Error::InvalidShape { .. })
        ));
        assert!(shared
            .process(&mut host, &AudioBuffer::new(2, 64, 0.0).unwrap(), true)
            .is_ok());
        assert_eq!(drain(&shared, &mut host), 64);
        assert_eq!(shared.availability(&mut host), Availability::Finished);
    }

    /// Engine which records whether the host lock was held while it was working.
    struct LockCheckingEngine {
        host: &'static HostLock,
        locked_while_working: Arc<AtomicBool>,
    }

    impl LockCheckingEngine {
        fn check_host_lock(&self) {
            if self.host.is_locked() {
                self.locked_while_working.store(true, Ordering::SeqCst);
            }
        }
    }

    impl Engine for LockCheckingEngine {
        fn channel_count(&self) -> usize {
            1
        }
        fn engine_version(&self) -> u32 {
            0
        }
        fn samples_required(&self) -> usize {
            0
        }
        fn frequency_cutoff(&self, _index: usize) -> f32 {
            0.0
        }
        fn start_delay(&self) -> usize {
            0
        }
        fn preferred_start_pad(&self) -> usize {
            0
        }
        fn input_increment(&self) -> usize {
            1
        }
        fn set_parameter(&mut self, _parameter: Parameter) {}
        fn study(&mut self, _input: &[&[f32]], _final_chunk: bool) {
            self.check_host_lock();
        }
        fn process(&mut self, _input: &[&[f32]], _final_chunk: bool) {
            self.check_host_lock();
        }
        fn available(&self) -> isize {
            16
        }
        fn retrieve(&mut self, output: &mut [&mut [f32]]) -> usize {
            self.check_host_lock();
            output[0].fill(1.0);
            output[0].len()
        }
        fn reset(&mut self) {}
    }

    #[test]
    fn engine_work_runs_without_the_host_lock() {
        static HOST: HostLock = HostLock::new();
        let locked_while_working = Arc::new(AtomicBool::new(false));
        let engine = LockCheckingEngine {
            host: &HOST,
            locked_while_working: Arc::clone(&locked_while_working),
        };
        let config = SessionConfig::new(44100, 1);
        let shared = SharedSession::new(StretchSession::with_engine(&config, Box::new(engine)).unwrap());

        let mut host = HOST.acquire();
        let input = AudioBuffer::new(1, 32, 0.0).unwrap();
        shared.study(&mut host, &input, true).unwrap();
        shared.process(&mut host, &input, true).unwrap();
        let output = shared.retrieve(&mut host, 8).unwrap();
        assert!(HOST.is_locked());
        drop(host);

        assert_eq!(output.shape(), [1, 8]);
        assert!(output.as_slice().iter().all(|sample| *sample == 1.0));
        assert!(!locked_while_working.load(Ordering::SeqCst));
    }

    #[test]
    fn independent_sessions_run_concurrently() {
        let lock = HostLock::new();
        let input = AudioBuffer::new(2, 4000, 0.2).unwrap();
        let totals: Vec<usize> = std::thread::scope(|scope| {
            let handles: Vec<_> = [0.5, 1.0, 1.5, 2.0]
                .into_iter()
                .map(|ratio| {
                    let (lock, input) = (&lock, &input);
                    scope.spawn(move || {
                        let mut host = lock.acquire();
                        let shared = session(2, ratio);
                        shared.study(&mut host, input, true).unwrap();
                        shared.process(&mut host, input, true).unwrap();
                        drain(&shared, &mut host)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(totals, vec![2000, 4000, 6000, 8000]);
    }

    #[test]
    fn shared_session_serializes_calls() {
        let lock = HostLock::new();
        let options = StretchOptions::default().process_mode(ProcessMode::RealTime);
        let shared =
            SharedSession::new(StretchSession::new(22050, 1, options, 1.5, 1.0).unwrap());
        let input = AudioBuffer::new(1, 500, 0.1).unwrap();
        let retrieved = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let (lock, shared, input, retrieved) = (&lock, shared.clone(), &input, &retrieved);
                scope.spawn(move || {
                    let mut host = lock.acquire();
                    for _ in 0..5 {
                        shared.process(&mut host, input, false).unwrap();
                        let output = shared.retrieve(&mut host, 100).unwrap();
                        retrieved.fetch_add(output.sample_count(), Ordering::SeqCst);
                    }
                });
            }
        });

        let mut host = lock.acquire();
        shared
            .with_session(&mut host, |session| {
                session.process(&AudioBuffer::new(1, 0, 0.0).unwrap(), true)
            })
            .unwrap();
        // 20 chunks of 500 samples at a time ratio of 1.5
        let total = retrieved.load(Ordering::SeqCst) + drain(&shared, &mut host);
        assert_eq!(total, 15_000);
    }
}

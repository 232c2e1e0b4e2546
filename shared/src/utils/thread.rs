//! Thread identity

/// OS-level id of the calling thread.
///
/// Dispatch interception runs on the thread that issued the dispatch, so this
/// identifies the application thread behind a kernel launch.
#[cfg(target_os = "linux")]
pub fn current_thread_id() -> u64 {
    // SAFETY: gettid takes no arguments and cannot fail.
    unsafe { libc::syscall(libc::SYS_gettid) as u64 }
}

/// Process-unique id of the calling thread, assigned on first use.
#[cfg(not(target_os = "linux"))]
pub fn current_thread_id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};

    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static THREAD_ID: u64 = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    }
    THREAD_ID.with(|id| *id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_within_thread() {
        assert_eq!(current_thread_id(), current_thread_id());
    }

    #[test]
    fn test_distinct_across_threads() {
        let here = current_thread_id();
        let there = std::thread::spawn(current_thread_id).join().unwrap();
        assert_ne!(here, there);
    }
}

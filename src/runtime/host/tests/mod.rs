//! Host context tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel;
use parking_lot::Mutex;

use crate::runtime::async_value::{AsyncValueRef, Chain, Diagnostic, ErrorCode};
use crate::runtime::errors::RuntimeError;
use crate::runtime::host::HostContext;
use crate::runtime::memory::MallocAllocator;
use crate::runtime::scheduler::{SchedulerConfig, SingleThreadedWorkQueue};
use crate::util::config::RuntimeConfig;

fn threaded_host(num_workers: usize) -> Arc<HostContext> {
    let mut config = RuntimeConfig::default();
    config.scheduler = SchedulerConfig {
        num_workers,
        thread_name_prefix: "host-test".to_string(),
        ..SchedulerConfig::default()
    };
    Arc::new(HostContext::from_config(&config).unwrap())
}

fn single_threaded_host() -> HostContext {
    HostContext::new(
        Arc::new(MallocAllocator),
        Arc::new(SingleThreadedWorkQueue::new()),
    )
}

#[cfg(test)]
mod work_tests {
    use super::*;

    #[test]
    fn test_enqueue_work_and_quiesce() {
        let host = threaded_host(2);
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let hits = hits.clone();
            host.enqueue_work(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        host.quiesce().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 10);
        assert_eq!(host.parallelism(), 2);
    }

    #[test]
    fn test_run_async_produces_value() {
        let host = threaded_host(2);
        let value = host.run_async(|| 6 * 7);
        host.await_value(&*value).unwrap();
        assert_eq!(*value.get(), 42);
    }

    #[test]
    fn test_try_run_async_error() {
        let host = single_threaded_host();
        let value = host.try_run_async::<u8, _>(|| Err(Diagnostic::new("no input")));
        host.await_value(&*value).unwrap();
        assert_eq!(value.get_error().message(), "no input");
    }

    #[test]
    fn test_run_async_panic_becomes_error() {
        let host = single_threaded_host();
        let value = host.run_async::<u8, _>(|| panic!("kernel failure"));
        host.await_value(&*value).unwrap();
        assert_eq!(value.get_error().code(), Some(ErrorCode::Internal));
    }
}

#[cfg(test)]
mod await_tests {
    use super::*;

    #[test]
    fn test_await_available_value_from_worker() {
        let host = threaded_host(1);
        let ready = AsyncValueRef::create_available(Chain);
        let (tx, rx) = channel::unbounded();
        {
            let worker_host = host.clone();
            host.enqueue_work(move || {
                tx.send(worker_host.await_value(&*ready).is_ok()).unwrap();
            });
        }
        assert!(rx.recv().unwrap());
    }

    #[test]
    fn test_await_pending_value_from_worker_fails_fast() {
        let host = threaded_host(1);
        let pending = AsyncValueRef::<Chain>::create_unconstructed();
        let (tx, rx) = channel::unbounded();
        {
            let worker_host = host.clone();
            let pending = pending.clone();
            host.enqueue_work(move || {
                tx.send(worker_host.await_value(&*pending)).unwrap();
            });
        }
        let result = rx.recv().unwrap();
        assert!(matches!(result, Err(RuntimeError::WouldDeadlock { .. })));
        pending.emplace(Chain);
    }

    #[test]
    fn test_quiesce_from_worker_fails_fast() {
        let host = threaded_host(2);
        let (tx, rx) = channel::unbounded();
        {
            let worker_host = host.clone();
            host.enqueue_work(move || {
                tx.send(worker_host.quiesce()).unwrap();
            });
        }
        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(result, Err(RuntimeError::WouldDeadlock { .. })));
        host.quiesce().unwrap();
    }

    #[test]
    fn test_await_all_single_threaded() {
        let host = single_threaded_host();
        let a = host.run_async(|| 1u32);
        let b = host.run_async(|| 2u32);
        host.await_all(&[&*a, &*b]).unwrap();
        assert_eq!(*a.get() + *b.get(), 3);
        assert!(!host.is_in_worker_thread());
    }
}

#[cfg(test)]
mod diagnostic_tests {
    use super::*;

    #[test]
    fn test_emit_error_reaches_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let host = {
            let seen = seen.clone();
            single_threaded_host()
                .with_diag_handler(move |d: &Diagnostic| seen.lock().push(d.message().to_string()))
        };

        let diagnostic = host.emit_error("bad shape");
        assert_eq!(diagnostic.message(), "bad shape");
        assert_eq!(*seen.lock(), vec!["bad shape".to_string()]);
    }

    #[test]
    fn test_make_error_async_value() {
        let seen = Arc::new(AtomicUsize::new(0));
        let host = {
            let seen = seen.clone();
            single_threaded_host().with_diag_handler(move |_: &Diagnostic| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
        };

        let value = host.make_error_async_value::<Vec<f32>>(Diagnostic::with_code(
            "out of memory",
            ErrorCode::ResourceExhausted,
        ));
        assert!(value.is_error());
        assert_eq!(value.get_error().code(), Some(ErrorCode::ResourceExhausted));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_from_env() {
        if std::env::var(crate::util::config::ENV_NUM_WORKERS).is_ok()
            || std::env::var(crate::util::config::ENV_LOG).is_ok()
        {
            return;
        }
        let host = HostContext::from_env().unwrap();
        assert!(host.parallelism() >= 1);
    }

    #[test]
    fn test_debug_output() {
        let host = single_threaded_host();
        assert!(format!("{:?}", host).contains("HostContext"));
    }
}

//! Bridge integration tests
//!
//! Drives tokens, values and groups the way compiled kernels do: create,
//! launch work through `execute`, complete from the work item, await.

use std::sync::Arc;

use jitrt::runtime::scheduler::{MultiThreadedWorkQueue, SchedulerConfig, WorkQueue};
use jitrt::util::config::RuntimeConfig;
use jitrt::{host_context_from_config, AsyncRuntime, Token, Value};

struct Shared<T>(*const T);

unsafe impl<T> Send for Shared<T> {}

fn runtime_with_external_pool() -> AsyncRuntime {
    let mut config = RuntimeConfig::default();
    config.scheduler.num_workers = 2;
    let host = host_context_from_config(&config).unwrap();
    let external: Arc<dyn WorkQueue> = Arc::new(
        MultiThreadedWorkQueue::new(&SchedulerConfig {
            num_workers: 2,
            thread_name_prefix: "kernel-pool".to_string(),
            ..SchedulerConfig::default()
        })
        .unwrap(),
    );
    AsyncRuntime::new(host, Some(external))
}

#[test]
fn test_fan_out_values_then_join() {
    let rt = runtime_with_external_pool();
    let group = rt.create_group(16);
    let mut values: Vec<*const Value> = Vec::new();

    for i in 0..16u64 {
        let value = rt.create_value(8, 8);
        let token = rt.create_token();
        unsafe { AsyncRuntime::add_token_to_group(group, token) };

        let (v, t) = (Shared(value), Shared(token));
        rt.execute(move || {
            let (v, t) = (v, t);
            unsafe {
                (AsyncRuntime::get_storage(v.0) as *mut u64).write(i * i);
                AsyncRuntime::set_available(v.0);
                AsyncRuntime::set_available(t.0);
            }
        });
        unsafe { AsyncRuntime::drop_ref(token, 1) };
        values.push(value);
    }

    unsafe {
        rt.await_group(group).unwrap();
        assert!(!AsyncRuntime::is_error_group(group));
        for (i, value) in values.iter().enumerate() {
            rt.await_value(*value).unwrap();
            let storage = AsyncRuntime::value_async_value(*value);
            assert_eq!((storage.get().data() as *const u64).read(), (i * i) as u64);
            AsyncRuntime::drop_ref(*value, 1);
        }
        AsyncRuntime::drop_ref(group, 1);
    }
}

#[test]
fn test_caller_drops_before_completion() {
    let rt = runtime_with_external_pool();
    let token: *const Token = rt.create_token();
    let chain = unsafe { AsyncRuntime::token_async_value(token) };
    unsafe { AsyncRuntime::drop_ref(token, 1) };

    let producer = Shared(token);
    rt.execute(move || {
        let producer = producer;
        unsafe { AsyncRuntime::set_error_with(producer.0, "device lost") };
    });

    let (tx, rx) = crossbeam::channel::bounded(1);
    chain.on_error(move |error| {
        tx.send(error.map(|d| d.message().to_string())).unwrap();
    });
    assert_eq!(rx.recv().unwrap().as_deref(), Some("device lost"));
}

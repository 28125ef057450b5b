//! Host context integration tests

use std::io::Write;

use jitrt::util::config::RuntimeConfig;
use jitrt::{async_runtime_from_file, host_context_from_config, host_context_from_file};

#[test]
fn test_host_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[scheduler]\nnum_workers = 2\nthread_name_prefix = \"it-host\"").unwrap();

    let host = host_context_from_file(file.path()).unwrap();
    let value = host.run_async(|| "ok".to_string());
    host.await_value(&*value).unwrap();
    assert_eq!(value.get(), "ok");
    host.quiesce().unwrap();
}

#[test]
fn test_missing_file_has_context() {
    let dir = tempfile::tempdir().unwrap();
    let err = host_context_from_file(dir.path().join("nope.toml")).unwrap_err();
    assert!(err.to_string().contains("failed to load runtime config"));
}

#[test]
fn test_runtime_from_file_single_threaded() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[scheduler]\nsingle_threaded = true").unwrap();

    let rt = async_runtime_from_file(file.path()).unwrap();
    let token = rt.create_token();
    let producer = token as usize;
    rt.execute(move || unsafe {
        jitrt::AsyncRuntime::set_available(producer as *const jitrt::Token);
    });
    unsafe {
        rt.await_token(token).unwrap();
        jitrt::AsyncRuntime::drop_ref(token, 1);
    }
}

#[test]
fn test_quiesce_waits_for_all_work() {
    let host = host_context_from_config(&RuntimeConfig::default()).unwrap();
    let values: Vec<_> = (0..32u32).map(|i| host.run_async(move || i * 2)).collect();
    host.quiesce().unwrap();
    assert!(values.iter().all(|v| v.is_concrete()));
    assert_eq!(values.iter().map(|v| *v.get()).sum::<u32>(), 992);
}

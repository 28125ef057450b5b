//! Continuation integration tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use jitrt::{AnyAsyncValueRef, AsyncValueRef, Diagnostic, ErrorCode};

#[test]
fn test_continuations_fire_once_across_threads() {
    for _ in 0..20 {
        let value = AsyncValueRef::<Vec<u32>>::create_unconstructed();
        let fired = Arc::new(AtomicUsize::new(0));

        let registrars: Vec<_> = (0..4)
            .map(|_| {
                let value = value.clone();
                let fired = fired.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        let fired = fired.clone();
                        value.on_result(move |result| {
                            assert_eq!(result.unwrap().len(), 3);
                            fired.fetch_add(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();

        let producer = {
            let value = value.clone();
            thread::spawn(move || value.emplace(vec![1, 2, 3]))
        };

        for r in registrars {
            r.join().unwrap();
        }
        producer.join().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 100);
        assert!(value.is_unique());
    }
}

#[test]
fn test_erased_handles_round_trip() {
    let value = AsyncValueRef::<String>::create_unconstructed();
    let erased: AnyAsyncValueRef = value.clone().erase();
    assert_eq!(erased.ref_count(), 2);
    assert!(!erased.is_available());

    erased.set_error(Diagnostic::with_code("missing", ErrorCode::NotFound));
    assert!(value.is_error());

    let typed = erased.downcast::<String>().unwrap();
    assert!(typed.ptr_eq(&value));
    assert_eq!(typed.get_error().code(), Some(ErrorCode::NotFound));
}

mod common;

use std::sync::Arc;
use std::thread;

use common::{CountingRuntime, ScriptDir, CAMERA_SCRIPT};
use scriptdev::hub::Hub;
use scriptdev::reflection::enumerate_properties;
use scriptdev::{loader, BridgeContext, ScriptDevice};

const THREADS: usize = 8;
const ROUNDS: usize = 10;

#[test]
fn test_runtime_calls_never_overlap() {
    let scripts = ScriptDir::new();
    let ctx = Arc::new(BridgeContext::new(CountingRuntime::default()));
    ctx.initialize_interpreter(Some(scripts.path())).unwrap();

    let paths: Vec<_> = (0..THREADS)
        .map(|i| scripts.write(&format!("hub{i}.rhai"), CAMERA_SCRIPT))
        .collect();

    let workers: Vec<_> = paths
        .into_iter()
        .enumerate()
        .map(|(i, path)| {
            let ctx = ctx.clone();
            thread::spawn(move || {
                let hub = Arc::new(Hub::new(path));
                loader::load(&ctx, &hub).unwrap();
                let id = format!("Camera[cam1@hub{i}.rhai]");
                for _ in 0..ROUNDS {
                    let handle = ctx.registry().lookup(&id).unwrap().unwrap();
                    assert_eq!(enumerate_properties(&ctx, &handle).unwrap().len(), 4);

                    let mut device = ScriptDevice::new(ctx.clone(), &id).unwrap();
                    device.initialize().unwrap();
                    device.shutdown();
                }
                ctx.unregister_hub(&hub);
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    let runtime = ctx.runtime();
    assert!(runtime.calls() > THREADS * ROUNDS);
    assert_eq!(runtime.peak(), 1);
    assert!(!ctx.lock().is_locked());
    assert!(ctx.registry().hub_ids().is_empty());
}

#[test]
fn test_concurrent_start_requests_agree() {
    let scripts = ScriptDir::new();
    let ctx = Arc::new(BridgeContext::new(CountingRuntime::default()));
    let location = scripts.path().to_path_buf();

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let ctx = ctx.clone();
            let location = location.clone();
            thread::spawn(move || ctx.initialize_interpreter(Some(location.as_path())).unwrap())
        })
        .collect();

    for worker in workers {
        assert_eq!(worker.join().unwrap(), location);
    }
    // only the first request starts the runtime
    assert_eq!(ctx.runtime().calls(), 1);
    assert_eq!(ctx.runtime().peak(), 1);
}

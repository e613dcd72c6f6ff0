//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use scriptdev::runtime::{RhaiObject, RhaiRuntime, Scalar, ScriptSource};
use scriptdev::{BridgeContext, BridgeResult, ScriptRuntime};
use tempfile::TempDir;

/// Temporary directory holding device scripts.
pub struct ScriptDir {
    dir: TempDir,
}

impl ScriptDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `code` to `relative` (parent directories are created).
    pub fn write(&self, relative: &str, code: &str) -> PathBuf {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, code).unwrap();
        path
    }
}

/// Context over a started Rhai runtime whose module directory is `dir`.
pub fn rhai_context(dir: &Path) -> Arc<BridgeContext<RhaiRuntime>> {
    let ctx = Arc::new(BridgeContext::new(RhaiRuntime::new()));
    ctx.initialize_interpreter(Some(dir)).unwrap();
    ctx
}

/// Rhai runtime that records how many calls run inside it at the same time.
#[derive(Default)]
pub struct CountingRuntime {
    inner: RhaiRuntime,
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
    released: AtomicUsize,
}

struct Entered<'a>(&'a CountingRuntime);

impl Drop for Entered<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CountingRuntime {
    /// Highest number of simultaneous calls observed.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of handles passed to `release` so far.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Entered<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        // widen the window for overlapping calls
        thread::sleep(Duration::from_micros(50));
        Entered(self)
    }
}

impl ScriptRuntime for CountingRuntime {
    type Object = RhaiObject;

    fn backend_name(&self) -> &'static str {
        "counting-rhai"
    }

    fn default_location(&self) -> Option<PathBuf> {
        self.inner.default_location()
    }

    fn start(&self, location: &Path) -> BridgeResult<()> {
        let _entered = self.enter();
        self.inner.start(location)
    }

    fn declare_script_path(&self, script_path: &Path) -> String {
        self.inner.declare_script_path(script_path)
    }

    fn bootstrap(&self) -> &'static str {
        self.inner.bootstrap()
    }

    fn execute(&self, source: &ScriptSource) -> BridgeResult<RhaiObject> {
        let _entered = self.enter();
        self.inner.execute(source)
    }

    fn get_item(&self, mapping: &RhaiObject, key: &str) -> BridgeResult<Option<RhaiObject>> {
        let _entered = self.enter();
        self.inner.get_item(mapping, key)
    }

    fn get_attr(&self, object: &RhaiObject, name: &str) -> BridgeResult<Option<RhaiObject>> {
        let _entered = self.enter();
        self.inner.get_attr(object, name)
    }

    fn set_attr_str(&self, object: &RhaiObject, name: &str, value: &str) -> BridgeResult<()> {
        let _entered = self.enter();
        self.inner.set_attr_str(object, name, value)
    }

    fn mapping_items(&self, mapping: &RhaiObject) -> BridgeResult<Vec<(RhaiObject, RhaiObject)>> {
        let _entered = self.enter();
        self.inner.mapping_items(mapping)
    }

    fn sequence_items(&self, sequence: &RhaiObject) -> BridgeResult<Vec<RhaiObject>> {
        let _entered = self.enter();
        self.inner.sequence_items(sequence)
    }

    fn scalar(&self, object: &RhaiObject) -> BridgeResult<Scalar> {
        let _entered = self.enter();
        self.inner.scalar(object)
    }

    fn release(&self, objects: Vec<RhaiObject>) {
        let _entered = self.enter();
        self.released.fetch_add(objects.len(), Ordering::SeqCst);
        self.inner.release(objects)
    }
}

/// A camera script with a handful of properties.
pub const CAMERA_SCRIPT: &str = r#"
let cam = camera()
    .time_property("exposure_ms", "Exposure", 0.001, 10000.0)
    .int_property("gain", "Gain", 0, 48)
    .enum_property("binning", "Binning", #{ "1x1": 1, "2x2": 2 })
    .string_property("serial", "SerialNumber").read_only();
let devices = #{ cam1: cam };
"#;

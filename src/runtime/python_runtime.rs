//! CPython implementation of [`ScriptRuntime`] (feature `python`).
//!
//! The interpreter is started with the PEP 587 configuration API instead of
//! `Py_Initialize`, because the latter terminates the process when the Python
//! installation cannot be found; the configuration API reports a status that we
//! turn into [`BridgeError::RuntimeNotFound`].
//!
//! Once started, the interpreter is never finalized. Finalizing and starting it
//! again is undefined for several native extension modules (numpy among them),
//! so a different interpreter or virtual environment requires restarting the
//! host process.
//!
//! After start-up the GIL is released with `PyEval_SaveThread` so that host
//! worker threads can take it through `Python::with_gil`. The saved thread state
//! is kept for the process lifetime.

#![allow(unsafe_code)]

use std::ffi::{CStr, CString};
use std::mem::MaybeUninit;
use std::path::{Path, PathBuf};
use std::ptr::addr_of_mut;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pyo3::ffi;
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyDict, PyFloat, PyInt, PyMapping, PyString, PyTuple};
use tracing::{debug, info};

use super::{quote_literal, Scalar, ScriptRuntime, ScriptSource};
use crate::error::{BridgeError, BridgeResult};

const BOOTSTRAP: &str = include_str!("../bootstrap/bootstrap.py");

/// Reference to a Python object.
///
/// Wraps the object in an `Arc` so clones do not need the GIL. The reference
/// count of the Python object itself drops when the last clone is released.
#[derive(Debug, Clone)]
pub struct PyHandle(Arc<PyObject>);

impl PyHandle {
    fn new(object: PyObject) -> Self {
        Self(Arc::new(object))
    }

    fn from_bound(object: Bound<'_, PyAny>) -> Self {
        Self::new(object.unbind())
    }

    /// Borrow the object for the lifetime of a GIL token.
    pub fn bind<'py>(&self, py: Python<'py>) -> &Bound<'py, PyAny> {
        self.0.bind(py)
    }
}

/// Embedded CPython interpreter.
#[derive(Default)]
pub struct PythonRuntime {
    thread_state: AtomicUsize,
}

impl PythonRuntime {
    /// Create a handle to the (not yet started) interpreter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the interpreter was started by this runtime.
    pub fn is_started(&self) -> bool {
        self.thread_state.load(Ordering::SeqCst) != 0
    }
}

fn status_message(status: &ffi::PyStatus) -> String {
    if status.err_msg.is_null() {
        "interpreter initialization failed".to_string()
    } else {
        // SAFETY: CPython sets err_msg to a static, NUL-terminated string.
        unsafe { CStr::from_ptr(status.err_msg) }
            .to_string_lossy()
            .into_owned()
    }
}

/// Error text of a failed status, `None` on success.
unsafe fn failure_of(status: ffi::PyStatus) -> Option<String> {
    let message = status_message(&status);
    (ffi::PyStatus_Exception(status) != 0).then_some(message)
}

fn describe(py: Python<'_>, err: &PyErr) -> String {
    let traceback = err
        .traceback(py)
        .and_then(|tb| tb.format().ok())
        .unwrap_or_default();
    format!("{}{}", traceback, err)
}

fn translate(py: Python<'_>, err: PyErr) -> BridgeError {
    BridgeError::RuntimeException(describe(py, &err))
}

/// Rewrite `<string>` positions in a traceback onto the user's file.
///
/// Frames inside the generated prelude are labelled `<prelude>`. Returns the
/// rewritten text and the innermost position inside user code, if any.
fn remap_positions(text: &str, source: &ScriptSource) -> (String, Option<usize>) {
    // traceback frames, then the `(file, line N)` suffix of a SyntaxError
    const MARKERS: [(&str, bool); 2] = [("\"<string>\", line ", true), ("<string>, line ", false)];

    let origin = source.origin.display().to_string();
    let mut out = String::with_capacity(text.len());
    let mut innermost = None;
    let mut rest = text;

    loop {
        let next = MARKERS
            .iter()
            .filter_map(|&(marker, quoted)| rest.find(marker).map(|at| (at, marker, quoted)))
            .min_by_key(|&(at, _, _)| at);
        let Some((at, marker, quoted)) = next else {
            break;
        };
        out.push_str(&rest[..at]);
        let after = &rest[at + marker.len()..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        let line = after[..digits].parse::<usize>().ok();

        let (file, line) = match line.and_then(|line| source.user_line(line)) {
            Some(user) => {
                innermost = Some(user);
                (origin.as_str(), user.to_string())
            }
            None => ("<prelude>", after[..digits].to_string()),
        };
        if quoted {
            out.push_str(&format!("\"{}\", line {}", file, line));
        } else {
            out.push_str(&format!("{}, line {}", file, line));
        }
        rest = &after[digits..];
    }
    out.push_str(rest);
    (out, innermost)
}

impl ScriptRuntime for PythonRuntime {
    type Object = PyHandle;

    fn backend_name(&self) -> &'static str {
        "python"
    }

    fn default_location(&self) -> Option<PathBuf> {
        let relative = if cfg!(windows) {
            "Scripts/python.exe"
        } else {
            "bin/python"
        };
        if let Some(venv) = std::env::var_os("VIRTUAL_ENV") {
            let candidate = PathBuf::from(venv).join(relative);
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        let names: &[&str] = if cfg!(windows) {
            &["python.exe"]
        } else {
            &["python3", "python"]
        };
        let search = std::env::var_os("PATH")?;
        std::env::split_paths(&search)
            .flat_map(|dir| names.iter().map(move |name| dir.join(name)))
            .find(|candidate| candidate.is_file())
    }

    fn start(&self, location: &Path) -> BridgeResult<()> {
        let not_found = |reason: String| BridgeError::RuntimeNotFound {
            path: location.to_path_buf(),
            reason,
        };
        if !location.is_file() {
            return Err(not_found("interpreter executable does not exist".to_string()));
        }
        let executable = CString::new(location.to_string_lossy().as_bytes())
            .map_err(|e| not_found(e.to_string()))?;

        // SAFETY: the config is initialized by PyConfig_InitPythonConfig before
        // any field is touched and cleared exactly once. Everything runs on the
        // calling thread before any other thread can reach the interpreter,
        // because the lifecycle manager holds the execution lock.
        unsafe {
            if ffi::Py_IsInitialized() != 0 {
                debug!("Python interpreter was already initialized by the host");
                return Ok(());
            }

            let mut config = MaybeUninit::<ffi::PyConfig>::uninit();
            let config = config.as_mut_ptr();
            ffi::PyConfig_InitPythonConfig(config);

            let mut failure = failure_of(ffi::PyConfig_SetBytesString(
                config,
                addr_of_mut!((*config).executable),
                executable.as_ptr(),
            ));
            if failure.is_none() {
                failure = failure_of(ffi::Py_InitializeFromConfig(config));
            }
            ffi::PyConfig_Clear(config);

            if let Some(message) = failure {
                return Err(not_found(message));
            }

            let state = ffi::PyEval_SaveThread();
            self.thread_state.store(state as usize, Ordering::SeqCst);
        }

        info!(executable = %location.display(), "Python interpreter started");
        Ok(())
    }

    fn declare_script_path(&self, script_path: &Path) -> String {
        format!(
            "SCRIPT_PATH = {}\n",
            quote_literal(&script_path.to_string_lossy())
        )
    }

    fn bootstrap(&self) -> &'static str {
        BOOTSTRAP
    }

    fn execute(&self, source: &ScriptSource) -> BridgeResult<PyHandle> {
        let code = CString::new(source.code.as_str()).map_err(|_| {
            BridgeError::RuntimeException(format!(
                "{}: script contains a NUL byte",
                source.origin.display()
            ))
        })?;

        Python::with_gil(|py| {
            let namespace = PyDict::new(py);
            py.run(&code, Some(&namespace), Some(&namespace))
                .map_err(|err| {
                    let (text, line) = remap_positions(&describe(py, &err), source);
                    let origin = source.origin.display();
                    BridgeError::RuntimeException(match line {
                        Some(line) => format!("{}:{}: {}", origin, line, text),
                        None => format!("{}: {}", origin, text),
                    })
                })?;
            Ok(PyHandle::from_bound(namespace.into_any()))
        })
    }

    fn get_item(&self, mapping: &PyHandle, key: &str) -> BridgeResult<Option<PyHandle>> {
        Python::with_gil(|py| {
            let dict = mapping.bind(py).downcast::<PyDict>().map_err(|_| {
                BridgeError::metadata(format!("expected a dict when looking up '{}'", key))
            })?;
            let item = dict.get_item(key).map_err(|err| translate(py, err))?;
            Ok(item.map(PyHandle::from_bound))
        })
    }

    fn get_attr(&self, object: &PyHandle, name: &str) -> BridgeResult<Option<PyHandle>> {
        Python::with_gil(|py| {
            let object = object.bind(py);
            if !object.hasattr(name).map_err(|err| translate(py, err))? {
                return Ok(None);
            }
            let value = object.getattr(name).map_err(|err| translate(py, err))?;
            Ok(Some(PyHandle::from_bound(value)))
        })
    }

    fn set_attr_str(&self, object: &PyHandle, name: &str, value: &str) -> BridgeResult<()> {
        Python::with_gil(|py| {
            object
                .bind(py)
                .setattr(name, value)
                .map_err(|err| translate(py, err))
        })
    }

    fn mapping_items(&self, mapping: &PyHandle) -> BridgeResult<Vec<(PyHandle, PyHandle)>> {
        Python::with_gil(|py| {
            let mapping = mapping.bind(py);
            let mapping = mapping.downcast::<PyMapping>().map_err(|_| {
                BridgeError::metadata(format!(
                    "expected a mapping, found {}",
                    type_name(mapping)
                ))
            })?;
            let items = mapping.items().map_err(|err| translate(py, err))?;
            items
                .iter()
                .map(|pair| {
                    let pair = pair
                        .downcast::<PyTuple>()
                        .map_err(|_| BridgeError::metadata("mapping item is not a pair"))?;
                    let key = pair.get_item(0).map_err(|err| translate(py, err))?;
                    let value = pair.get_item(1).map_err(|err| translate(py, err))?;
                    Ok((PyHandle::from_bound(key), PyHandle::from_bound(value)))
                })
                .collect()
        })
    }

    fn sequence_items(&self, sequence: &PyHandle) -> BridgeResult<Vec<PyHandle>> {
        Python::with_gil(|py| {
            let sequence = sequence.bind(py);
            if sequence.is_instance_of::<PyString>() {
                return Err(BridgeError::metadata("expected a sequence, found str"));
            }
            let iter = sequence.try_iter().map_err(|_| {
                BridgeError::metadata(format!(
                    "expected a sequence, found {}",
                    type_name(sequence)
                ))
            })?;
            iter.map(|item| {
                item.map(PyHandle::from_bound)
                    .map_err(|err| translate(py, err))
            })
            .collect()
        })
    }

    fn scalar(&self, object: &PyHandle) -> BridgeResult<Scalar> {
        Python::with_gil(|py| {
            let object = object.bind(py);
            if object.is_none() {
                return Ok(Scalar::None);
            }
            // bool is a subclass of int, so it is checked first
            if let Ok(b) = object.downcast::<PyBool>() {
                return Ok(Scalar::Bool(b.is_true()));
            }
            if object.is_instance_of::<PyInt>() {
                return match object.extract::<i64>() {
                    Ok(i) => Ok(Scalar::Int(i)),
                    Err(_) => object
                        .extract::<f64>()
                        .map(Scalar::Float)
                        .map_err(|err| translate(py, err)),
                };
            }
            if let Ok(f) = object.downcast::<PyFloat>() {
                return Ok(Scalar::Float(f.value()));
            }
            if object.is_instance_of::<PyString>() {
                return object
                    .extract::<String>()
                    .map(Scalar::Str)
                    .map_err(|err| translate(py, err));
            }
            Ok(Scalar::Other(type_name(object)))
        })
    }

    fn release(&self, objects: Vec<PyHandle>) {
        // dropping with the GIL held decrements reference counts immediately
        Python::with_gil(|_py| drop(objects));
    }
}

fn type_name(object: &Bound<'_, PyAny>) -> String {
    object
        .get_type()
        .name()
        .map(|name| name.to_string())
        .unwrap_or_else(|_| "object".to_string())
}

//! LibreOfficeKit bindings.
//!
//! The engine ships as a shared library inside the LibreOffice `program`
//! directory. It is opened at runtime with `dlopen` and bootstrapped through
//! the `libreofficekit_hook` entry point, which hands back a vtable object.
//! Only the vtable members this crate calls are mirrored here; members that
//! newer releases appended are `Option` function pointers guarded by the
//! `n_size` the engine reports.
//!
//! All unsafe code in the worker is confined to this module.

use std::ffi::{c_char, c_int, CStr, CString};
use std::path::Path;
use std::sync::Arc;

use libloading::Library;
use tracing::{debug, warn};

use super::{Engine, EngineDocument, EngineError};

#[cfg(target_os = "linux")]
const ENGINE_LIB: &str = "libsofficeapp.so";
#[cfg(target_os = "macos")]
const ENGINE_LIB: &str = "libsofficeapp.dylib";
#[cfg(target_os = "windows")]
const ENGINE_LIB: &str = "sofficeapp.dll";
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
const ENGINE_LIB: &str = "libsofficeapp.so";

#[repr(C)]
struct LibreOfficeKit {
    class: *mut LibreOfficeKitClass,
}

// Later members exist only to keep the layout aligned with the C header.
#[allow(dead_code)]
#[repr(C)]
struct LibreOfficeKitClass {
    n_size: usize,
    destroy: unsafe extern "C" fn(*mut LibreOfficeKit),
    document_load:
        unsafe extern "C" fn(*mut LibreOfficeKit, *const c_char) -> *mut LibreOfficeKitDocument,
    get_error: unsafe extern "C" fn(*mut LibreOfficeKit) -> *mut c_char,
    document_load_with_options: Option<
        unsafe extern "C" fn(
            *mut LibreOfficeKit,
            *const c_char,
            *const c_char,
        ) -> *mut LibreOfficeKitDocument,
    >,
    free_error: Option<unsafe extern "C" fn(*mut LibreOfficeKit, *mut c_char)>,
    register_callback: Option<unsafe extern "C" fn()>,
    get_filter_types: Option<unsafe extern "C" fn(*mut LibreOfficeKit) -> *mut c_char>,
    set_optional_features: Option<unsafe extern "C" fn(*mut LibreOfficeKit, u64)>,
    set_document_password:
        Option<unsafe extern "C" fn(*mut LibreOfficeKit, *const c_char, *const c_char)>,
    get_version_info: Option<unsafe extern "C" fn(*mut LibreOfficeKit) -> *mut c_char>,
}

#[repr(C)]
struct LibreOfficeKitDocument {
    class: *mut LibreOfficeKitDocumentClass,
}

#[allow(dead_code)]
#[repr(C)]
struct LibreOfficeKitDocumentClass {
    n_size: usize,
    destroy: unsafe extern "C" fn(*mut LibreOfficeKitDocument),
    save_as: unsafe extern "C" fn(
        *mut LibreOfficeKitDocument,
        *const c_char,
        *const c_char,
        *const c_char,
    ) -> c_int,
}

type HookFn = unsafe extern "C" fn(*const c_char) -> *mut LibreOfficeKit;

/// Shared handle to the loaded engine. The `Library` must stay resident for
/// as long as any vtable pointer is callable, so documents keep an `Arc`.
struct LokApi {
    kit: *mut LibreOfficeKit,
    _lib: Library,
}

impl LokApi {
    unsafe fn class(&self) -> &LibreOfficeKitClass {
        &*(*self.kit).class
    }

    /// Fetch and clear the engine's last error string.
    fn take_error(&self) -> Option<String> {
        unsafe {
            let class = self.class();
            let raw = (class.get_error)(self.kit);
            if raw.is_null() {
                return None;
            }
            let text = CStr::from_ptr(raw).to_string_lossy().into_owned();
            if let Some(free_error) = class.free_error {
                free_error(self.kit, raw);
            }
            if text.is_empty() {
                None
            } else {
                Some(text)
            }
        }
    }

    /// True when the engine's reported vtable size covers `get_version_info`.
    fn has_version_info(&self) -> bool {
        unsafe {
            let class = self.class();
            class.n_size >= std::mem::size_of::<LibreOfficeKitClass>()
                && class.get_version_info.is_some()
        }
    }
}

impl Drop for LokApi {
    fn drop(&mut self) {
        unsafe {
            (self.class().destroy)(self.kit);
        }
    }
}

/// The real engine. Exactly one instance exists per worker process.
pub struct LokEngine {
    api: Arc<LokApi>,
    version: String,
}

impl LokEngine {
    /// Load the engine from the installation's program directory and
    /// bootstrap it. `resource_path` is the directory holding
    /// `libsofficeapp` and the engine's resource tree.
    pub fn init(resource_path: &Path) -> Result<Self, EngineError> {
        let lib_path = resource_path.join(ENGINE_LIB);
        let lib = unsafe { Library::new(&lib_path) }.map_err(|e| {
            EngineError::Init(format!("cannot load {}: {}", lib_path.display(), e))
        })?;

        let hook: libloading::Symbol<'_, HookFn> =
            unsafe { lib.get(b"libreofficekit_hook\0") }.map_err(|e| {
                EngineError::Init(format!(
                    "{} does not export libreofficekit_hook: {}",
                    lib_path.display(),
                    e
                ))
            })?;

        let install = cstring(resource_path.to_string_lossy().as_ref())
            .map_err(EngineError::Init)?;
        let kit = unsafe { hook(install.as_ptr()) };
        if kit.is_null() {
            return Err(EngineError::Init(format!(
                "engine refused to initialize from {}",
                resource_path.display()
            )));
        }
        drop(hook); // release the borrow on `lib` before it moves

        let api = Arc::new(LokApi { kit, _lib: lib });
        let version = query_version(&api);
        debug!("engine up: {}", version);

        Ok(Self { api, version })
    }
}

impl Engine for LokEngine {
    fn version(&self) -> String {
        self.version.clone()
    }

    fn load_document(
        &mut self,
        url: &str,
        load_options: Option<&str>,
    ) -> Result<Box<dyn EngineDocument>, EngineError> {
        let c_url = cstring(url).map_err(EngineError::Load)?;

        let doc = unsafe {
            let class = self.api.class();
            match (load_options, class.document_load_with_options) {
                (Some(opts), Some(load_with_options)) => {
                    let c_opts = cstring(opts).map_err(EngineError::Load)?;
                    load_with_options(self.api.kit, c_url.as_ptr(), c_opts.as_ptr())
                }
                (Some(_), None) => {
                    warn!("engine predates load options; loading without them");
                    (class.document_load)(self.api.kit, c_url.as_ptr())
                }
                (None, _) => (class.document_load)(self.api.kit, c_url.as_ptr()),
            }
        };

        if doc.is_null() {
            return Err(EngineError::Load(
                self.api
                    .take_error()
                    .unwrap_or_else(|| "document load failed".to_string()),
            ));
        }

        Ok(Box::new(LokDocument {
            api: Arc::clone(&self.api),
            doc,
        }))
    }
}

struct LokDocument {
    api: Arc<LokApi>,
    doc: *mut LibreOfficeKitDocument,
}

impl LokDocument {
    unsafe fn class(&self) -> &LibreOfficeKitDocumentClass {
        &*(*self.doc).class
    }
}

impl EngineDocument for LokDocument {
    fn save_as(
        &mut self,
        url: &str,
        filter: &str,
        filter_options: Option<&str>,
    ) -> Result<(), EngineError> {
        let c_url = cstring(url).map_err(EngineError::Export)?;
        let c_filter = cstring(filter).map_err(EngineError::Export)?;
        let c_opts = match filter_options {
            Some(opts) => Some(cstring(opts).map_err(EngineError::Export)?),
            None => None,
        };

        let ok = unsafe {
            (self.class().save_as)(
                self.doc,
                c_url.as_ptr(),
                c_filter.as_ptr(),
                c_opts
                    .as_ref()
                    .map(|o| o.as_ptr())
                    .unwrap_or(std::ptr::null()),
            )
        };

        if ok == 0 {
            return Err(EngineError::Export(
                self.api
                    .take_error()
                    .unwrap_or_else(|| "PDF export failed".to_string()),
            ));
        }
        Ok(())
    }
}

impl Drop for LokDocument {
    fn drop(&mut self) {
        unsafe {
            (self.class().destroy)(self.doc);
        }
    }
}

fn query_version(api: &Arc<LokApi>) -> String {
    if api.has_version_info() {
        unsafe {
            let class = api.class();
            if let Some(get_version_info) = class.get_version_info {
                let raw = get_version_info(api.kit);
                if !raw.is_null() {
                    let text = CStr::from_ptr(raw).to_string_lossy().into_owned();
                    if let Some(free_error) = class.free_error {
                        free_error(api.kit, raw);
                    }
                    // {"ProductName":"...","ProductVersion":"...",...}
                    if let Ok(info) = serde_json::from_str::<serde_json::Value>(&text) {
                        let name = info["ProductName"].as_str().unwrap_or("LibreOfficeKit");
                        if let Some(ver) = info["ProductVersion"].as_str() {
                            return format!("{} {}", name, ver);
                        }
                    }
                }
            }
        }
    }
    "LibreOfficeKit".to_string()
}

fn cstring(text: &str) -> Result<CString, String> {
    CString::new(text).map_err(|_| format!("embedded NUL in engine argument: {:?}", text))
}

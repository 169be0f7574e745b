//! Dynamic module loading
//!
//! Opens a shared library with dlopen/LoadLibrary and resolves its module
//! export entry point. The library stays mapped while any method registered
//! from it is alive.

use core::ffi::c_void;
use core::ptr::NonNull;
use std::ffi::CString;
use std::path::{Path, PathBuf};

use crate::registry::ModuleBuilder;

/// Symbol every loadable module exports
pub const MODULE_ENTRY_SYMBOL: &str = "hyperion_module_export";

/// Signature of [`MODULE_ENTRY_SYMBOL`].
///
/// The builder is a Rust type; modules must be built against the same
/// version of this crate with the same compiler.
pub type ModuleEntryFn = unsafe extern "C" fn(builder: *mut ModuleBuilder);

/// Loaded shared library
pub struct Library {
    handle: NonNull<c_void>,
    path: PathBuf,
}

impl Library {
    /// Open the library at `path`
    pub fn open(path: &Path) -> Result<Self, LoadError> {
        let display = path.display().to_string();
        let handle = Self::open_impl(path).map_err(|reason| LoadError::OpenFailed {
            path: display,
            reason,
        })?;
        Ok(Self {
            handle,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn open_impl(path: &Path) -> Result<NonNull<c_void>, String> {
        use core::ffi::c_char;
        use std::os::unix::ffi::OsStrExt;

        extern "C" {
            fn dlopen(filename: *const c_char, flag: i32) -> *mut c_void;
            fn dlerror() -> *const c_char;
        }

        const RTLD_NOW: i32 = 2;

        let name = CString::new(path.as_os_str().as_bytes()).map_err(|_| "path contains NUL".to_string())?;

        unsafe {
            NonNull::new(dlopen(name.as_ptr(), RTLD_NOW)).ok_or_else(|| {
                let err = dlerror();
                if err.is_null() {
                    "unknown dlopen error".to_string()
                } else {
                    core::ffi::CStr::from_ptr(err).to_string_lossy().into_owned()
                }
            })
        }
    }

    #[cfg(windows)]
    fn open_impl(path: &Path) -> Result<NonNull<c_void>, String> {
        use std::os::windows::ffi::OsStrExt;

        extern "system" {
            fn LoadLibraryW(filename: *const u16) -> *mut c_void;
            fn GetLastError() -> u32;
        }

        let wide: Vec<u16> = path.as_os_str().encode_wide().chain(Some(0)).collect();

        unsafe {
            NonNull::new(LoadLibraryW(wide.as_ptr()))
                .ok_or_else(|| format!("LoadLibraryW failed with error code {}", GetLastError()))
        }
    }

    /// Resolve a raw symbol address
    pub fn symbol(&self, name: &str) -> Result<NonNull<c_void>, SymbolError> {
        let cname = CString::new(name).map_err(|_| SymbolError::InvalidName)?;
        NonNull::new(self.symbol_impl(&cname)).ok_or(SymbolError::NotFound)
    }

    #[cfg(unix)]
    fn symbol_impl(&self, name: &CString) -> *mut c_void {
        use core::ffi::c_char;

        extern "C" {
            fn dlsym(handle: *mut c_void, symbol: *const c_char) -> *mut c_void;
        }

        unsafe { dlsym(self.handle.as_ptr(), name.as_ptr()) }
    }

    #[cfg(windows)]
    fn symbol_impl(&self, name: &CString) -> *mut c_void {
        extern "system" {
            fn GetProcAddress(module: *mut c_void, name: *const u8) -> *mut c_void;
        }

        unsafe { GetProcAddress(self.handle.as_ptr(), name.as_ptr() as *const u8) }
    }

    /// Resolve the module export entry point
    pub fn entry_point(&self) -> Result<ModuleEntryFn, SymbolError> {
        let address = self.symbol(MODULE_ENTRY_SYMBOL)?;
        // SAFETY: modules export the entry with the ModuleEntryFn signature
        Ok(unsafe { core::mem::transmute::<*mut c_void, ModuleEntryFn>(address.as_ptr()) })
    }
}

impl Drop for Library {
    #[cfg(unix)]
    fn drop(&mut self) {
        extern "C" {
            fn dlclose(handle: *mut c_void) -> i32;
        }
        unsafe {
            dlclose(self.handle.as_ptr());
        }
    }

    #[cfg(windows)]
    fn drop(&mut self) {
        extern "system" {
            fn FreeLibrary(module: *mut c_void) -> i32;
        }
        unsafe {
            FreeLibrary(self.handle.as_ptr());
        }
    }
}

// The handle is an immutable token owned by the OS loader
unsafe impl Send for Library {}
unsafe impl Sync for Library {}

impl core::fmt::Debug for Library {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Library").field("path", &self.path).finish()
    }
}

/// Library loading errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    OpenFailed { path: String, reason: String },
}

impl core::fmt::Display for LoadError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::OpenFailed { path, reason } => write!(f, "Failed to open '{}': {}", path, reason),
        }
    }
}

impl std::error::Error for LoadError {}

/// Symbol lookup errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolError {
    InvalidName,
    NotFound,
}

impl core::fmt::Display for SymbolError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidName => write!(f, "Invalid symbol name"),
            Self::NotFound => write!(f, "Symbol not found"),
        }
    }
}

impl std::error::Error for SymbolError {}

//! Native dependency loading
//!
//! The runtime links against a handful of shared libraries that must be in
//! memory before it starts. They are loaded one at a time, in dependency
//! order, because some platforms' loaders do not resolve transitive
//! dependencies from the application's library directory on their own.

use std::ffi::CString;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

/// Cryptography library.
pub const CRYPTO_LIBRARY: &str = "crypto_warmstart";

/// Secure transport library; links against [`CRYPTO_LIBRARY`].
pub const TLS_LIBRARY: &str = "ssl_warmstart";

/// Embedded database library.
pub const DATABASE_LIBRARY: &str = "sqlite3_warmstart";

/// Bridge between the host and the runtime; links against the runtime.
pub const BRIDGE_LIBRARY: &str = "warmstart_bridge";

/// Default language runtime library.
pub const DEFAULT_RUNTIME_LIBRARY: &str = "python3.12";

/// Errors that can occur while loading native libraries
#[derive(Debug, Error)]
pub enum LoadError {
    /// The platform loader refused the library
    #[error("Failed to load native library {library}: {reason}")]
    Failed {
        /// Library identifier
        library: String,
        /// Loader message
        reason: String,
    },

    /// Library name cannot be passed to the platform loader
    #[error("Invalid library name: {0}")]
    InvalidName(String),
}

impl LoadError {
    /// Identifier of the library that failed.
    pub fn library(&self) -> &str {
        match self {
            LoadError::Failed { library, .. } => library,
            LoadError::InvalidName(name) => name,
        }
    }
}

/// Loads one shared library by identifier.
pub trait LibraryLoader {
    /// Keeps the library loaded while alive.
    type Handle;

    /// Load `name` (an identifier such as `ssl_warmstart`, not a file name).
    fn load(&mut self, name: &str) -> Result<Self::Handle, LoadError>;
}

/// The fixed, ordered set of native dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeLibraries {
    runtime: String,
}

impl NativeLibraries {
    /// Use `runtime` as the language runtime library name.
    pub fn new(runtime: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
        }
    }

    /// Library identifiers in load order.
    pub fn ordered(&self) -> [&str; 5] {
        [
            CRYPTO_LIBRARY,
            TLS_LIBRARY,
            DATABASE_LIBRARY,
            self.runtime.as_str(),
            BRIDGE_LIBRARY,
        ]
    }

    /// Load every library in order, stopping at the first failure.
    pub fn load_all<L: LibraryLoader>(
        &self,
        loader: &mut L,
    ) -> Result<LoadedLibraries<L::Handle>, LoadError> {
        let mut loaded = LoadedLibraries {
            entries: Vec::with_capacity(5),
        };
        for name in self.ordered() {
            let handle = loader.load(name)?;
            debug!(library = name, "loaded native library");
            loaded.entries.push((name.to_string(), handle));
        }
        info!(count = loaded.entries.len(), "native libraries loaded");
        Ok(loaded)
    }
}

impl Default for NativeLibraries {
    fn default() -> Self {
        Self::new(DEFAULT_RUNTIME_LIBRARY)
    }
}

/// Libraries loaded by [`NativeLibraries::load_all`], in load order.
///
/// Dropping this value may unload them, most recently loaded first; hold it
/// for the life of the runtime.
#[derive(Debug)]
pub struct LoadedLibraries<H> {
    entries: Vec<(String, H)>,
}

impl<H> LoadedLibraries<H> {
    /// Identifiers in load order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Number of loaded libraries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing was loaded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<H> Drop for LoadedLibraries<H> {
    fn drop(&mut self) {
        // Dependents go before the libraries they link against
        while let Some((name, handle)) = self.entries.pop() {
            drop(handle);
            debug!(library = %name, "released native library");
        }
    }
}

impl<H> Default for LoadedLibraries<H> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

/// Loads libraries through the operating system's dynamic loader.
#[derive(Debug, Clone, Default)]
pub struct SystemLoader {
    dir: Option<PathBuf>,
}

impl SystemLoader {
    /// Resolve bare file names through the loader's default search path.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve library files inside `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    /// Platform file name for a library identifier.
    pub fn file_name(name: &str) -> String {
        if cfg!(windows) {
            format!("{}.dll", name)
        } else if cfg!(target_os = "macos") {
            format!("lib{}.dylib", name)
        } else {
            format!("lib{}.so", name)
        }
    }

    /// Path handed to the platform loader.
    pub fn resolve(&self, name: &str) -> PathBuf {
        let file = Self::file_name(name);
        match &self.dir {
            Some(dir) => dir.join(file),
            None => PathBuf::from(file),
        }
    }
}

impl LibraryLoader for SystemLoader {
    type Handle = Library;

    fn load(&mut self, name: &str) -> Result<Library, LoadError> {
        Library::open(name, &self.resolve(name))
    }
}

/// A shared library kept loaded until dropped.
pub struct Library {
    handle: LibraryHandle,
    name: String,
}

impl Library {
    /// Load the file at `path`, reporting failures under `name`.
    pub fn open(name: &str, path: &Path) -> Result<Self, LoadError> {
        let handle = LibraryHandle::load(name, path)?;
        Ok(Library {
            handle,
            name: name.to_string(),
        })
    }

    /// Library identifier.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("name", &self.name)
            .field("handle", &self.handle.raw())
            .finish()
    }
}

fn c_path(name: &str, path: &Path) -> Result<CString, LoadError> {
    let text = path
        .to_str()
        .ok_or_else(|| LoadError::InvalidName(format!("{}: {:?}", name, path)))?;
    CString::new(text).map_err(|_| LoadError::InvalidName(name.to_string()))
}

// ============================================================================
// Unix Implementation (Linux, Android, macOS, BSD)
// ============================================================================

#[cfg(unix)]
struct LibraryHandle(*mut libc::c_void);

#[cfg(unix)]
impl LibraryHandle {
    fn load(name: &str, path: &Path) -> Result<Self, LoadError> {
        let c_path = c_path(name, path)?;

        // RTLD_GLOBAL: later libraries resolve symbols against earlier ones
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_GLOBAL) };

        if handle.is_null() {
            let reason = unsafe {
                let err = libc::dlerror();
                if err.is_null() {
                    "unknown error".to_string()
                } else {
                    std::ffi::CStr::from_ptr(err).to_string_lossy().into_owned()
                }
            };
            return Err(LoadError::Failed {
                library: name.to_string(),
                reason,
            });
        }

        Ok(LibraryHandle(handle))
    }

    fn raw(&self) -> *mut libc::c_void {
        self.0
    }
}

#[cfg(unix)]
impl Drop for LibraryHandle {
    fn drop(&mut self) {
        unsafe {
            libc::dlclose(self.0);
        }
    }
}

// ============================================================================
// Windows Implementation
// ============================================================================

#[cfg(windows)]
struct LibraryHandle(*mut std::ffi::c_void);

#[cfg(windows)]
impl LibraryHandle {
    fn load(name: &str, path: &Path) -> Result<Self, LoadError> {
        use std::os::windows::ffi::OsStrExt;

        // Validates the name the same way as on unix
        c_path(name, path)?;
        let wide: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        let handle = unsafe { LoadLibraryW(wide.as_ptr()) };
        if handle.is_null() {
            let code = unsafe { GetLastError() };
            return Err(LoadError::Failed {
                library: name.to_string(),
                reason: format!("error code {}", code),
            });
        }

        Ok(LibraryHandle(handle))
    }

    fn raw(&self) -> *mut std::ffi::c_void {
        self.0
    }
}

#[cfg(windows)]
impl Drop for LibraryHandle {
    fn drop(&mut self) {
        unsafe {
            FreeLibrary(self.0);
        }
    }
}

#[cfg(windows)]
extern "system" {
    fn LoadLibraryW(filename: *const u16) -> *mut std::ffi::c_void;
    fn FreeLibrary(module: *mut std::ffi::c_void) -> i32;
    fn GetLastError() -> u32;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records load order and fails on a chosen library.
    struct RecordingLoader {
        loaded: Vec<String>,
        fail_on: Option<&'static str>,
    }

    impl LibraryLoader for RecordingLoader {
        type Handle = ();

        fn load(&mut self, name: &str) -> Result<(), LoadError> {
            if self.fail_on == Some(name) {
                return Err(LoadError::Failed {
                    library: name.to_string(),
                    reason: "not found".to_string(),
                });
            }
            self.loaded.push(name.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_load_order() {
        let mut loader = RecordingLoader {
            loaded: Vec::new(),
            fail_on: None,
        };
        let loaded = NativeLibraries::new("python3.11")
            .load_all(&mut loader)
            .unwrap();

        assert_eq!(
            loader.loaded,
            vec![
                "crypto_warmstart",
                "ssl_warmstart",
                "sqlite3_warmstart",
                "python3.11",
                "warmstart_bridge"
            ]
        );
        assert_eq!(loaded.names(), loader.loaded);
    }

    #[test]
    fn test_failure_stops_loading() {
        let mut loader = RecordingLoader {
            loaded: Vec::new(),
            fail_on: Some(DATABASE_LIBRARY),
        };
        let err = NativeLibraries::default().load_all(&mut loader).unwrap_err();

        assert_eq!(err.library(), DATABASE_LIBRARY);
        assert_eq!(loader.loaded, vec![CRYPTO_LIBRARY, TLS_LIBRARY]);
    }

    /// Handle that records its library name when released.
    struct Tracked {
        name: String,
        released: Rc<RefCell<Vec<String>>>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.released.borrow_mut().push(self.name.clone());
        }
    }

    struct TrackingLoader {
        released: Rc<RefCell<Vec<String>>>,
    }

    impl LibraryLoader for TrackingLoader {
        type Handle = Tracked;

        fn load(&mut self, name: &str) -> Result<Tracked, LoadError> {
            Ok(Tracked {
                name: name.to_string(),
                released: Rc::clone(&self.released),
            })
        }
    }

    #[test]
    fn test_release_in_reverse_load_order() {
        let released = Rc::new(RefCell::new(Vec::new()));
        let mut loader = TrackingLoader {
            released: Rc::clone(&released),
        };
        let loaded = NativeLibraries::default().load_all(&mut loader).unwrap();
        assert!(released.borrow().is_empty());

        drop(loaded);
        assert_eq!(
            *released.borrow(),
            vec![
                BRIDGE_LIBRARY,
                DEFAULT_RUNTIME_LIBRARY,
                DATABASE_LIBRARY,
                TLS_LIBRARY,
                CRYPTO_LIBRARY
            ]
        );
    }

    #[test]
    fn test_partial_load_released_in_reverse() {
        struct FailingTail(TrackingLoader);

        impl LibraryLoader for FailingTail {
            type Handle = Tracked;

            fn load(&mut self, name: &str) -> Result<Tracked, LoadError> {
                if name == DATABASE_LIBRARY {
                    return Err(LoadError::Failed {
                        library: name.to_string(),
                        reason: "not found".to_string(),
                    });
                }
                self.0.load(name)
            }
        }

        let released = Rc::new(RefCell::new(Vec::new()));
        let mut loader = FailingTail(TrackingLoader {
            released: Rc::clone(&released),
        });
        assert!(NativeLibraries::default().load_all(&mut loader).is_err());
        assert_eq!(*released.borrow(), vec![TLS_LIBRARY, CRYPTO_LIBRARY]);
    }

    #[test]
    fn test_file_names() {
        let loader = SystemLoader::in_dir("/opt/app/lib");
        let path = loader.resolve("ssl_warmstart");
        if cfg!(windows) {
            assert!(path.ends_with("ssl_warmstart.dll"));
        } else if cfg!(target_os = "macos") {
            assert!(path.ends_with("libssl_warmstart.dylib"));
        } else {
            assert_eq!(path, PathBuf::from("/opt/app/lib/libssl_warmstart.so"));
        }
        assert_eq!(
            SystemLoader::new().resolve("x"),
            PathBuf::from(SystemLoader::file_name("x"))
        );
    }

    #[test]
    fn test_missing_library() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut loader = SystemLoader::in_dir(temp.path());
        match loader.load("does_not_exist") {
            Err(LoadError::Failed { library, .. }) => assert_eq!(library, "does_not_exist"),
            other => panic!("Expected Failed, got {:?}", other.map(|_| ())),
        }
    }
}

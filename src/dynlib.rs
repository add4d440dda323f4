// Copyright 2026 The kvikk authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Loadable content modules.
//!
//! A module is a shared object exporting `cgi_function`, a C function that
//! takes one writable descriptor and writes a complete HTTP/1.0 response to
//! it. [`Module`] wraps the OS handle; dropping the last reference releases
//! it (the `dlclose` happens in [`libloading::Library`]'s drop).
//!
//! [`ModuleLoader`] resolves resource names under the cgi root and consults
//! the module cache when caching is enabled. In cached mode an
//! execution-path mutex serializes load and execute so a concurrent
//! revalidation can never release a handle mid-call; in uncached mode every
//! request opens, executes and drops its own handle.

use std::fs;
use std::io::{self, Write};
use std::os::raw::c_int;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use libloading::{Library, Symbol};
use log::{debug, info, warn};

use crate::cache::{EvictCallback, ModuleCache};
use crate::http::{write_status_line, Status};

/// Entry point every content module must export.
const ENTRY_SYMBOL: &[u8] = b"cgi_function\0";

type CgiFunction = unsafe extern "C" fn(c_int);

/// A loaded content module.
#[derive(Debug)]
pub struct Module {
    lib: Library,
}

impl Module {
    /// Opens the shared object at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        // Lazy binding, same as the usual dlopen(RTLD_LAZY) for plugins.
        let lib = unsafe { Library::new(path) }
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(Self { lib })
    }

    /// Resolves the entry symbol and invokes it with `fd`.
    ///
    /// The module writes its whole response, status line included, to the
    /// descriptor.
    pub fn execute(&self, fd: c_int) -> io::Result<()> {
        let func: Symbol<'_, CgiFunction> = unsafe { self.lib.get(ENTRY_SYMBOL) }
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        unsafe { func(fd) };
        Ok(())
    }
}

/// Resolves and runs content modules for worker agents.
#[derive(Debug)]
pub struct ModuleLoader {
    cgi_root: PathBuf,
    cache: Option<Arc<ModuleCache<Arc<Module>>>>,
    /// Serializes load and execute while caching is on, so an eviction or
    /// revalidation sweep cannot overlap a call into module code.
    exec_lock: Mutex<()>,
}

impl ModuleLoader {
    /// Creates a loader rooted at `cgi_root`. Passing `None` for the cache
    /// disables caching entirely.
    pub fn new(cgi_root: PathBuf, cache: Option<Arc<ModuleCache<Arc<Module>>>>) -> Self {
        Self {
            cgi_root,
            cache,
            exec_lock: Mutex::new(()),
        }
    }

    /// Resolves `path` to a module handle, consulting the cache first.
    ///
    /// On a miss the module is opened, its byte size recorded, and the
    /// handle inserted with an eviction callback that releases it. An
    /// insertion rejected for capacity still yields the handle; the module
    /// is simply served uncached.
    fn load(&self, path: &Path) -> Option<Arc<Module>> {
        let Some(cache) = &self.cache else {
            return match Module::open(path) {
                Ok(module) => Some(Arc::new(module)),
                Err(e) => {
                    debug!("cannot load {}: {e}", path.display());
                    None
                }
            };
        };

        let key = path.to_string_lossy().into_owned();
        if let Some(handle) = cache.lookup(&key) {
            return Some(handle);
        }

        let module = match Module::open(path) {
            Ok(module) => module,
            Err(e) => {
                debug!("cannot load {}: {e}", path.display());
                return None;
            }
        };
        let size = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!("cannot stat {}: {e}", path.display());
                0
            }
        };
        let handle = Arc::new(module);
        let evicted_key = key.clone();
        let on_evict: EvictCallback<Arc<Module>> = Box::new(move |handle| {
            info!("unloading module {evicted_key}");
            drop(handle);
        });
        if cache
            .insert(key, Arc::clone(&handle), size, Some(on_evict))
            .is_err()
        {
            warn!(
                "module {} does not fit the cache, serving uncached",
                path.display()
            );
        }
        Some(handle)
    }

    /// Serves one dynamic request on `conn`: load the module named by
    /// `resource`, run its entry point against the connection's descriptor,
    /// or answer 404 when the module cannot be loaded.
    pub fn handle_dynamic<C>(&self, conn: &mut C, resource: &str)
    where
        C: Write + AsRawFd,
    {
        let path = self.cgi_root.join(format!("{resource}.so"));
        let _exec_guard = self
            .cache
            .is_some()
            .then(|| self.exec_lock.lock().expect("execution lock poisoned"));
        match self.load(&path) {
            Some(handle) => {
                if let Err(e) = handle.execute(conn.as_raw_fd()) {
                    warn!("module {} has no usable entry point: {e}", path.display());
                }
                // Uncached mode: the handle drops here and the module is
                // released, so load and unload always pair per request.
            }
            None => {
                if let Err(e) = write_status_line(conn, Status::NotFound) {
                    debug!("client went away before 404 could be sent: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::net::{TcpListener, TcpStream};

    use super::*;

    fn stream_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (server, client)
    }

    #[test]
    fn open_missing_module_fails() {
        assert!(Module::open(Path::new("./does-not-exist.so")).is_err());
    }

    #[test]
    fn missing_module_answers_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ModuleLoader::new(dir.path().to_path_buf(), None);
        let (mut server, mut client) = stream_pair();
        loader.handle_dynamic(&mut server, "nope");
        drop(server);
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).unwrap();
        assert_eq!(reply, Status::NotFound.as_bytes());
    }

    #[test]
    fn cached_loader_answers_not_found_too() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ModuleCache::new(1024));
        let loader = ModuleLoader::new(dir.path().to_path_buf(), Some(Arc::clone(&cache)));
        let (mut server, mut client) = stream_pair();
        loader.handle_dynamic(&mut server, "nope");
        drop(server);
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).unwrap();
        assert_eq!(reply, Status::NotFound.as_bytes());
        assert!(cache.is_empty());
    }
}

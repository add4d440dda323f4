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

//! Background revalidation of cached modules.
//!
//! Every sweep walks the cache under its write lock and compares each
//! entry's on-disk size against the recorded one; a changed size is taken
//! as "the module was rebuilt" and the entry's handle is replaced. A module
//! whose file can no longer be stat'ed (or re-opened) keeps its old handle:
//! stale is better than missing. The sweep holds the cache write lock for
//! its whole duration, so no lookup can hand out a handle mid-replacement;
//! module calls already in progress keep the old handle alive through their
//! own reference.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::cache::ModuleCache;
use crate::dynlib::Module;

/// Probe result for one cache entry.
#[derive(Debug)]
pub enum Probe<V> {
    /// Backing file unchanged; leave the entry alone.
    Unchanged,
    /// Backing file gone or unreadable; keep the stale handle.
    Missing,
    /// Backing file changed: the replacement value and its new size.
    Changed(V, u64),
}

/// Runs one revalidation pass, applying `probe` to every entry under the
/// cache write lock.
pub fn sweep<V, P>(cache: &ModuleCache<V>, mut probe: P)
where
    P: FnMut(&str, u64) -> Probe<V>,
{
    cache.for_each_locked(|key, value, size| match probe(key, *size) {
        Probe::Unchanged => {}
        Probe::Missing => debug!("{key} is gone from disk, keeping stale module"),
        Probe::Changed(fresh, new_size) => {
            info!("refreshed {key}");
            *value = fresh;
            *size = new_size;
        }
    });
}

/// The production probe: stat the key path and reload the module when the
/// size changed.
fn module_probe(key: &str, recorded_size: u64) -> Probe<Arc<Module>> {
    let meta = match fs::metadata(key) {
        Ok(meta) => meta,
        Err(e) => {
            warn!("cannot stat {key}: {e}");
            return Probe::Missing;
        }
    };
    if meta.len() == recorded_size {
        return Probe::Unchanged;
    }
    match Module::open(Path::new(key)) {
        Ok(module) => Probe::Changed(Arc::new(module), meta.len()),
        Err(e) => {
            warn!("cannot reload {key}: {e}");
            Probe::Missing
        }
    }
}

/// Spawns the detached revalidator thread, sweeping every `period`.
pub fn spawn_revalidator(cache: Arc<ModuleCache<Arc<Module>>>, period: Duration) {
    thread::spawn(move || loop {
        thread::sleep(period);
        debug!("revalidation sweep");
        sweep(&cache, module_probe);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_entries_are_untouched() {
        let cache = ModuleCache::new(100);
        cache.insert("a", 1u32, 10, None).unwrap();
        cache.insert("b", 2u32, 10, None).unwrap();
        sweep(&cache, |_, _| Probe::Unchanged);
        assert_eq!(cache.lookup("a"), Some(1));
        assert_eq!(cache.lookup("b"), Some(2));
        assert_eq!(cache.total_size(), 20);
    }

    #[test]
    fn changed_entries_get_fresh_value_and_size() {
        let cache = ModuleCache::new(100);
        cache.insert("mod", 1u32, 10, None).unwrap();
        sweep(&cache, |key, size| {
            assert_eq!(key, "mod");
            assert_eq!(size, 10);
            Probe::Changed(7, 14)
        });
        assert_eq!(cache.lookup("mod"), Some(7));
        assert_eq!(cache.total_size(), 14);
    }

    #[test]
    fn missing_files_keep_the_stale_value() {
        let cache = ModuleCache::new(100);
        cache.insert("mod", 3u32, 10, None).unwrap();
        sweep(&cache, |_, _| Probe::Missing);
        assert_eq!(cache.lookup("mod"), Some(3));
    }

    #[test]
    fn sweep_visits_every_entry_once() {
        let cache = ModuleCache::new(100);
        for key in ["a", "b", "c"] {
            cache.insert(key, 0u32, 10, None).unwrap();
        }
        let mut visited = Vec::new();
        sweep(&cache, |key, _| {
            visited.push(key.to_owned());
            Probe::Unchanged
        });
        visited.sort();
        assert_eq!(visited, ["a", "b", "c"]);
    }
}

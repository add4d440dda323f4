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

//! Server entry point: CLI, process setup and component wiring.

use std::io;
use std::sync::Arc;

use clap::Parser;
use log::warn;

use kvikk::cache::ModuleCache;
use kvikk::config::{ServerConfig, DEFAULT_LISTEN_PORT, MAX_FD_LIMIT, STAT_INTERVAL};
use kvikk::dynlib::ModuleLoader;
use kvikk::reactor::Reactor;
use kvikk::{net, revalidate, stats, worker};

/// High-throughput HTTP/1.0 origin server with loadable content modules.
#[derive(Debug, Parser)]
#[command(name = "kvikk", version)]
struct Args {
    /// Port to listen on.
    #[arg(default_value_t = DEFAULT_LISTEN_PORT)]
    port: u16,
}

fn main() -> io::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = Arc::new(ServerConfig {
        port: args.port,
        ..ServerConfig::default()
    });

    net::ignore_sigpipe();
    if let Err(e) = net::raise_fd_limit(MAX_FD_LIMIT) {
        warn!("cannot raise fd limit to {MAX_FD_LIMIT}: {e}");
    }

    let cache = config
        .caching
        .then(|| Arc::new(ModuleCache::new(config.cache_capacity)));
    let loader = Arc::new(ModuleLoader::new(config.cgi_root.clone(), cache.clone()));

    let worker_port = worker::spawn_agents(&config, loader)?;
    if let Some(cache) = cache {
        revalidate::spawn_revalidator(cache, config.revalidation_period);
    }

    let counters = Arc::new(stats::Stats::new());
    stats::spawn_reporter(Arc::clone(&counters), STAT_INTERVAL);

    let mut reactor = Reactor::new(config, worker_port, counters)?;
    reactor.run()
}

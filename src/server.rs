use std::{
    io,
    net::SocketAddr,
    sync::{atomic::AtomicBool, Arc},
};

use log::info;

use crate::{
    cache::CacheStore,
    config::Config,
    forwarder::Forwarder,
    listener::{Listener, Resolver},
    persistence,
    sweeper::Sweeper,
};

/// The whole resolver: cache restored from disk, listener bound, upstream configured.
pub struct Server {
    config: Config,
    cache: Arc<CacheStore>,
    listener: Listener<Forwarder>,
}

impl Server {
    pub fn bind(config: Config) -> anyhow::Result<Self> {
        let cache = Arc::new(persistence::load(&config.cache_file));
        let forwarder = Forwarder::new(config.upstream, config.upstream_timeout);
        let listener = Listener::bind(config.listen, Resolver::new(Arc::clone(&cache), forwarder))?;

        info!(
            "Listening on {} forwarding to {}",
            listener.local_addr()?,
            config.upstream
        );

        Ok(Self {
            config,
            cache,
            listener,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves until `shutdown` is raised, then stops the sweeper and saves the cache.
    pub fn run(&self, shutdown: &AtomicBool) -> anyhow::Result<()> {
        let sweeper = Sweeper::spawn(Arc::clone(&self.cache), self.config.cleanup_interval)?;

        self.listener.run(shutdown);

        sweeper.stop();
        persistence::save(&self.config.cache_file, &self.cache);

        Ok(())
    }
}

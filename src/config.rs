use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use structopt::StructOpt;
use typed_builder::TypedBuilder;

use crate::{
    forwarder::UPSTREAM_TIMEOUT, persistence::DEFAULT_CACHE_FILE, sweeper::DEFAULT_CLEANUP_INTERVAL,
};

pub const DEFAULT_LISTEN: (Ipv4Addr, u16) = (Ipv4Addr::new(127, 0, 0, 1), 53);
pub const UPSTREAM_DNS_SERVER: (Ipv4Addr, u16) = (Ipv4Addr::new(8, 8, 8, 8), 53);

#[derive(Debug, StructOpt)]
#[structopt(name = "fwdns", about = "Caching DNS forwarder")]
pub struct Opt {
    /// Address to listen on
    #[structopt(short, long, default_value = "127.0.0.1")]
    pub address: IpAddr,

    /// UDP port to listen on
    #[structopt(short, long, default_value = "53")]
    pub port: u16,

    /// Where the cache is loaded from at startup and saved to on quit
    #[structopt(short, long, default_value = "dns_cache.json", parse(from_os_str))]
    pub cache_file: PathBuf,

    /// Seconds between sweeps of expired cache entries, at least 1
    #[structopt(long, default_value = "600", parse(try_from_str = parse_interval))]
    pub cleanup_interval: u64,
}

fn parse_interval(src: &str) -> anyhow::Result<u64> {
    match src.parse::<u64>()? {
        0 => anyhow::bail!("cleanup interval must be at least one second"),
        secs => Ok(secs),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub struct Config {
    #[builder(default = SocketAddr::from(DEFAULT_LISTEN))]
    pub listen: SocketAddr,
    #[builder(default = SocketAddr::from(UPSTREAM_DNS_SERVER))]
    pub upstream: SocketAddr,
    #[builder(default = UPSTREAM_TIMEOUT)]
    pub upstream_timeout: Duration,
    #[builder(default = PathBuf::from(DEFAULT_CACHE_FILE))]
    pub cache_file: PathBuf,
    #[builder(default = DEFAULT_CLEANUP_INTERVAL)]
    pub cleanup_interval: Duration,
}

impl From<Opt> for Config {
    fn from(opt: Opt) -> Self {
        Config::builder()
            .listen(SocketAddr::new(opt.address, opt.port))
            .cache_file(opt.cache_file)
            .cleanup_interval(Duration::from_secs(opt.cleanup_interval))
            .build()
    }
}

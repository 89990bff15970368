use std::sync::{atomic::AtomicBool, Arc};

use log::info;
use structopt::StructOpt;

use fwdns::{control, Config, Opt, Server};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from(Opt::from_args());
    info!("Starting DNS Server: {:?}", config);

    let server = Server::bind(config)?;
    let shutdown = Arc::new(AtomicBool::new(false));
    // Not joined: it may still be blocked on stdin when the listener returns.
    let _control = control::spawn_stdin_control(Arc::clone(&shutdown))?;

    server.run(&shutdown)
}

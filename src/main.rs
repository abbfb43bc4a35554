use std::sync::atomic::{
    AtomicBool,
    Ordering,
};
use std::sync::Arc;
use std::thread;

use log::{
    debug,
    error,
    info,
    warn,
};
use signal_hook::consts::{
    SIGINT,
    SIGTERM,
};
use signal_hook::iterator::Signals;
use tiny_http::Server;

use ldpd::arg::Settings;
use ldpd::ldp::Ldp;
use ldpd::request::process_request;
use ldpd::response::exec_response;

fn serve(server: &Server, ldp: &Ldp, stopping: &AtomicBool) {
    loop {
        let mut req = match server.recv() {
            Ok(v) => v,
            Err(e) => {
                if !stopping.load(Ordering::SeqCst) {
                    error!("{}", e);
                }
                break;
            },
        };
        debug!("request {} {} from {:?}", req.method(), req.url(), req.remote_addr());
        let res = process_request(ldp, &mut req);
        exec_response(req, res);
    }
}

fn main() {
    env_logger::init();

    let settings = Settings::from_args();
    let ldp = match Ldp::from_settings(&settings) {
        Ok(v) => Arc::new(v),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        },
    };

    let server = match Server::http((settings.host.as_str(), settings.port)) {
        Ok(v) => Arc::new(v),
        Err(e) => {
            error!("cannot bind {}:{}: {}", settings.host, settings.port, e);
            std::process::exit(1);
        },
    };
    info!("listening on {}:{} with {} workers", settings.host, settings.port, settings.threads);

    let stopping = Arc::new(AtomicBool::new(false));
    let mut signals = match Signals::new([SIGINT, SIGTERM]) {
        Ok(v) => v,
        Err(e) => {
            error!("cannot register signal handlers: {}", e);
            std::process::exit(1);
        },
    };
    {
        let server = Arc::clone(&server);
        let stopping = Arc::clone(&stopping);
        let threads = settings.threads;
        thread::spawn(move || {
            if let Some(sig) = signals.forever().next() {
                info!("signal {} received, shutting down", sig);
                stopping.store(true, Ordering::SeqCst);
                for _ in 0..threads {
                    server.unblock();
                }
            }
        });
    }

    let mut workers = vec!();
    for i in 0..settings.threads {
        let server = Arc::clone(&server);
        let ldp = Arc::clone(&ldp);
        let stopping = Arc::clone(&stopping);
        let worker = thread::Builder::new()
            .name(format!("ldpd-worker-{}", i))
            .spawn(move || serve(&server, &ldp, &stopping));
        match worker {
            Ok(v) => workers.push(v),
            Err(e) => {
                error!("cannot start worker {}: {}", i, e);
                std::process::exit(1);
            },
        }
    }
    for w in workers {
        if w.join().is_err() {
            warn!("worker panicked");
        }
    }
    info!("stopped");
}

//! The proxy daemon binary. Wires the CLI flag groups from `zorp-proc`
//! into logging setup, privilege drop, daemonizing, and a restart-
//! supervised worker that accepts connections and relays them to a
//! single configured upstream — a transparent passthrough, since any
//! actual application-protocol logic is out of scope for this runtime.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use clap::Parser;

use zorp_addr::{BindOptions, SockAddr};
use zorp_errors::{ZorpError, ZorpResult};
use zorp_log::Logger;
use zorp_proc::cli::{LoggingArgs, ProcessArgs, ThreadArgs};
use zorp_proc::{daemonize, run_supervised, PrivilegeDrop, RestartPolicy};
use zorp_stream::connector::{self, ConnectRequest};
use zorp_stream::listener::{AcceptControl, Accepted, Listener};

#[derive(Parser, Debug, Clone)]
#[command(name = "zorpd", about = "Transparent stream-relay proxy daemon")]
struct Cli {
    /// Address to accept connections on, `ip:port`.
    #[arg(long)]
    listen: String,

    /// Address to relay each accepted connection to, `ip:port`.
    #[arg(long)]
    upstream: String,

    /// Directory pidfiles are written to when `--pidfile` is not given.
    #[arg(long, default_value = "/var/run")]
    pidfile_dir: PathBuf,

    #[command(flatten)]
    logging: LoggingArgs,
    #[command(flatten)]
    threads: ThreadArgs,
    #[command(flatten)]
    process: ProcessArgs,
}

fn parse_host_port(s: &str) -> ZorpResult<SockAddr> {
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| ZorpError::config(format!("expected host:port, got {s:?}")))?;
    let port: u16 = port
        .parse()
        .map_err(|_| ZorpError::config(format!("invalid port in {s:?}")))?;
    if let Ok(ip) = Ipv4Addr::from_str(host) {
        return Ok(SockAddr::v4(ip, port));
    }
    if let Ok(ip) = std::net::Ipv6Addr::from_str(host) {
        return Ok(SockAddr::v6(ip, port));
    }
    Err(ZorpError::config(format!(
        "{host:?} is not a literal address; run hostnames through zorp_stream::Resolver first"
    )))
}

fn init_logging(args: &LoggingArgs) -> Arc<Logger> {
    tracing_subscriber::fmt::init();
    let logger = Logger::new(args.verbose);
    if let Some(spec) = &args.log_spec {
        if let Err(e) = logger.set_spec(spec) {
            eprintln!("invalid --log-spec: {e}");
        }
    }
    if !args.no_syslog {
        match zorp_log::sink::SyslogSink::new("zorpd") {
            Ok(sink) => logger.add_sink(Arc::new(sink)),
            Err(e) => tracing::warn!(error = %e, "falling back to stderr logging"),
        }
    }
    let _ = args.log_tags;
    logger
}

/// The long-running relay loop: one task per accepted connection, each
/// dialing `upstream` and copying bytes in both directions until either
/// side closes.
async fn serve(listen: SockAddr, upstream: SockAddr, privilege: &PrivilegeDrop) -> ZorpResult<()> {
    let mut listener = Listener::bind(&listen, BindOptions::default())?;
    // Binding a privileged port needs root; drop to the configured
    // user/group/chroot/capabilities only once the socket is open.
    privilege.apply()?;
    listener
        .run(move |accepted| {
            let upstream = upstream.clone();
            let inbound = match accepted {
                Accepted::Tcp(fd, _peer) => fd,
                Accepted::Unix(fd) => fd,
            };
            tokio::spawn(async move {
                let req = ConnectRequest {
                    local: None,
                    remote: upstream,
                    bind_opts: BindOptions::default(),
                    timeout: Some(std::time::Duration::from_secs(10)),
                };
                match connector::connect(req, connector::Cancellation::new()).await {
                    Ok(mut outbound) => {
                        let mut inbound = inbound;
                        if let Err(e) = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await {
                            tracing::debug!(error = %e, "relay ended");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "upstream connect failed"),
                }
            });
            AcceptControl::Continue
        })
        .await
}

fn main() -> ZorpResult<()> {
    let cli = Cli::parse();
    let _logger = init_logging(&cli.logging);

    let listen = parse_host_port(&cli.listen)?;
    let upstream = parse_host_port(&cli.upstream)?;

    let readiness = daemonize(cli.process.effective_mode())?;

    let pidfile_path = zorp_proc::pidfile::resolve_path(
        cli.process.pidfile.as_deref(),
        &cli.pidfile_dir,
        "zorpd",
    );
    zorp_proc::pidfile::write(&pidfile_path, std::process::id())?;

    let privilege: PrivilegeDrop = (&cli.process).into();
    let restart_policy: RestartPolicy = (&cli.process).into();
    let thread_count = cli.threads.threads.max(1);

    // Reports readiness once the pidfile is down and the process model is
    // otherwise settled; the accept loop itself runs inside a supervised,
    // restartable child with no further handle back to this invocation,
    // so this is the last point a meaningful success/failure exists to
    // report upward.
    readiness.report(Ok(()));

    let status = run_supervised(cli.process.effective_mode(), restart_policy, || {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(thread_count)
            .enable_all()
            .build()
            .map_err(ZorpError::Io)?;
        rt.block_on(serve(listen.clone(), upstream.clone(), &privilege))
    })?;

    let _ = zorp_proc::pidfile::remove(&pidfile_path);
    std::process::exit(status.code());
}

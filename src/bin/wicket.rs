//! Admission client binary.
//!
//! Asks an external arbiter for admission to a shared resource: rounds are
//! launched inside the issuing window, each sending one request over the
//! shared FIFO and waiting for its reply on a private channel.
//!
//! # Usage
//!
//! ```sh
//! wicket --time 10 /run/arbiter/requests
//! ```
//!
//! Lifecycle entries go to standard output, diagnostics to standard error.

use std::time::Duration;

use wicket::ipc::sem::Timeout;
use wicket::runtime::client::{Client, ClientConfig, ClientError};

fn main() {
    if let Err(err) = run() {
        eprintln!("wicket: {err}");
        if matches!(err, Fault::Usage(_)) {
            print_usage();
        }
        std::process::exit(1);
    }
}

#[derive(Debug)]
enum Fault {
    Usage(String),
    Connect(ClientError),
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fault::Usage(msg) => write!(f, "{msg}"),
            Fault::Connect(err) => write!(f, "{err}"),
        }
    }
}

fn run() -> Result<(), Fault> {
    wicket::init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let config = parse_args(&args)?;

    let client = Client::connect(config).map_err(Fault::Connect)?;
    let report = client.run();

    eprintln!(
        "wicket: {} launched, {} admitted, {} closed, {} failed",
        report.launched, report.admitted, report.closed, report.failed
    );
    Ok(())
}

/// Parses command line arguments into a `ClientConfig`.
fn parse_args(args: &[String]) -> Result<ClientConfig, Fault> {
    let mut request_path: Option<String> = None;
    let mut window_secs: Option<u64> = None;
    let mut reply_timeout_secs: Option<u64> = None;
    let mut namespace: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--time" | "-t" => {
                i += 1;
                window_secs = Some(parse_secs(args, i, "--time")?);
            }
            "--reply-timeout" | "-r" => {
                i += 1;
                reply_timeout_secs = Some(parse_secs(args, i, "--reply-timeout")?);
            }
            "--namespace" | "-n" => {
                i += 1;
                let value = args
                    .get(i)
                    .ok_or_else(|| Fault::Usage("missing value for --namespace".into()))?;
                if value.is_empty() || value.contains('/') {
                    return Err(Fault::Usage(format!("invalid namespace: `{value}`")));
                }
                namespace = Some(value.clone());
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            arg if arg.starts_with('-') => {
                return Err(Fault::Usage(format!("unknown argument: {arg}")));
            }
            arg => {
                if request_path.replace(arg.to_string()).is_some() {
                    return Err(Fault::Usage("more than one request channel given".into()));
                }
            }
        }
        i += 1;
    }

    let request_path =
        request_path.ok_or_else(|| Fault::Usage("missing request channel path".into()))?;
    let window_secs =
        window_secs.ok_or_else(|| Fault::Usage("missing required --time <SECS>".into()))?;

    let mut config = ClientConfig::new(request_path, Duration::from_secs(window_secs));
    if let Some(ns) = namespace {
        config.namespace = ns;
    }
    if let Some(secs) = reply_timeout_secs {
        // Zero disables the bound.
        config.reply_timeout = if secs == 0 {
            Timeout::Infinite
        } else {
            Timeout::Duration(Duration::from_secs(secs))
        };
    }
    Ok(config)
}

fn parse_secs(args: &[String], i: usize, flag: &str) -> Result<u64, Fault> {
    let value = args
        .get(i)
        .ok_or_else(|| Fault::Usage(format!("missing value for {flag}")))?;
    value
        .parse()
        .map_err(|_| Fault::Usage(format!("invalid value for {flag}: `{value}`")))
}

fn print_usage() {
    eprintln!(
        r#"wicket - admission client for a named-pipe arbiter

USAGE:
    wicket [OPTIONS] --time <SECS> <REQUEST_FIFO>

ARGS:
    <REQUEST_FIFO>            Path of the arbiter's request FIFO

OPTIONS:
    -t, --time <SECS>         Request-issuing window in seconds (required)
    -r, --reply-timeout <SECS> Per-round reply wait bound (default: 5, 0 = no bound)
    -n, --namespace <NAME>    Semaphore namespace (default: wicket)
    -h, --help                Print this help message

EXAMPLE:
    wicket --time 10 /run/arbiter/requests
    wicket -t 30 -n bathroom /tmp/requests
"#
    );
}

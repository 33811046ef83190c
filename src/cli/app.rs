use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "salvage")]
#[command(about = "Recover deleted and orphaned records from SQLite database files")]
#[command(version)]
pub struct Cli {
    /// Control colored output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Write output to a file instead of stdout
    #[arg(short, long, global = true)]
    pub output: Option<String>,

    /// Number of worker threads for page carving (0 = one per core)
    #[arg(long, default_value_t = 0, global = true)]
    pub threads: usize,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

/// How to settle a page that rows for several tables were carved from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ConflictMode {
    /// Leave the page unattributed
    Skip,
    /// Attribute the page to the first matching table
    First,
    /// Ask on the terminal
    Prompt,
}

/// Line format for recovered rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum RowFormat {
    Raw,
    Tab,
    Csv,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Carve intact and corrupted rows out of a database file
    Recover {
        /// Path to the (damaged) SQLite database file
        #[arg(short, long)]
        file: String,

        /// Table catalog as written by `salvage schema --json`
        #[arg(long)]
        schema: Option<String>,

        /// Intact copy of the database to read the schema and live rows from
        #[arg(long)]
        reference: Option<String>,

        /// Only recover these tables (name or root page, repeatable)
        #[arg(short, long = "table")]
        tables: Vec<String>,

        /// Also recover rows whose key columns were overwritten
        #[arg(long)]
        corrupted: bool,

        /// Reject any value whose storage class disagrees with the column affinity
        #[arg(long)]
        strict: bool,

        /// Largest serial type code accepted before a header is discarded
        #[arg(long)]
        ceiling: Option<u64>,

        /// Content filters to apply (valid-text, zero-filler, control-bytes, cjk-leading)
        #[arg(long = "filter", value_delimiter = ',')]
        filters: Vec<String>,

        /// Only carve pages reachable from the table roots
        #[arg(long = "no-unknown")]
        no_unknown: bool,

        /// What to do with pages several tables match
        #[arg(long = "on-conflict", default_value = "skip")]
        on_conflict: ConflictMode,

        /// Output format for recovered rows
        #[arg(long, default_value = "raw")]
        format: RowFormat,

        /// Keep rows that are still present in the live tables
        #[arg(long = "include-known")]
        include_known: bool,

        /// Override page size (default: from the header)
        #[arg(long = "page-size")]
        page_size: Option<u32>,

        /// Use memory-mapped I/O for file access
        #[arg(long)]
        mmap: bool,

        /// Show row offsets and a hex dump of every recovered row
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the table catalog used for carving
    Schema {
        /// Intact database to read the schema from
        #[arg(long)]
        reference: Option<String>,

        /// Catalog JSON to print
        #[arg(long)]
        schema: Option<String>,

        /// Output in JSON format (reusable with `recover --schema`)
        #[arg(long)]
        json: bool,
    },

    /// Show database header fields and page kinds
    Info {
        /// Path to the SQLite database file
        #[arg(short, long)]
        file: String,

        /// List the kind of every page
        #[arg(short, long)]
        verbose: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,

        /// Override page size (default: from the header)
        #[arg(long = "page-size")]
        page_size: Option<u32>,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

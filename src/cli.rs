use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::settings::Overrides;

#[derive(Debug, Parser)]
#[command(
    name = "pagewise",
    about = "Question answering over document outlines with hybrid retrieval"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the embedding model name
    #[arg(long, global = true)]
    pub embedding_model: Option<String>,

    /// Override the language model name
    #[arg(long, global = true)]
    pub llm_model: Option<String>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            embedding_model: self.embedding_model.clone(),
            llm_model: self.llm_model.clone(),
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage the section similarity index
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },
    /// Ask a question about the indexed documents
    Query(QueryArgs),
    /// List documents known to the library, or remove one
    #[command(args_conflicts_with_subcommands = true)]
    Documents {
        #[command(subcommand)]
        action: Option<DocumentsAction>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show or change persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Index subcommands --

#[derive(Debug, Subcommand)]
pub enum IndexAction {
    /// Add an outline file to the library and index its sections
    Add {
        /// Path to a `*_structure.json` outline
        outline: PathBuf,
    },
    /// Remove a document's sections from the index
    Remove {
        /// Document name
        name: String,
    },
    /// Remove every document from the index (outlines are kept)
    Clear,
    /// Re-index every outline in the library
    Rebuild,
    /// Show index statistics
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

// -- Documents subcommands --

#[derive(Debug, Subcommand)]
pub enum DocumentsAction {
    /// Delete a document's index records, outline and uploaded source
    Remove {
        /// Document name
        name: String,
    },
}

// -- Config subcommands --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show every resolved setting
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a setting in config.redb
    Set { key: String, value: String },
    /// Remove a persisted setting (revert to environment or default)
    Clear { key: String },
}

// -- Query --

#[derive(Debug, Parser)]
pub struct QueryArgs {
    /// The question
    pub query: String,

    /// Number of sections to retrieve (default: the `top_k` setting)
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Print retrieved sections without generating an answer
    #[arg(long, conflicts_with = "outline")]
    pub raw: bool,

    /// Search document outlines with the language model instead of the
    /// similarity index
    #[arg(long)]
    pub outline: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "pagewise",
            &mut std::io::stdout(),
        );
    }
}

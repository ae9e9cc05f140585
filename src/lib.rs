//! pagewise - question answering over hierarchical document outlines.
//!
//! Every node of a document outline (`*_structure.json`) is embedded and
//! stored in a redb-backed similarity index. A question is answered by
//! retrieving the closest sections, recovering their full text from the
//! outline or the uploaded source, and asking a language model to
//! synthesize an answer. When no index exists, the language model walks
//! the outlines directly instead.
//!
//! # Quick start
//!
//! ```no_run
//! use pagewise::{ConfigDb, DataDir, Services, Settings};
//! use pagewise::settings::Overrides;
//!
//! # async fn run() -> pagewise::Result<()> {
//! let data_dir = DataDir::resolve(None)?;
//! let config_db = ConfigDb::open(&data_dir.config_db())?;
//! let settings = Settings::resolve(Some(&config_db), &Overrides::default())?;
//! let services = Services::open(&data_dir, settings)?;
//!
//! let answer = services.ask("What does the warranty cover?", 10, false).await?;
//! println!("{}", answer.answer);
//! for source in &answer.sources {
//!     println!("  {source}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config_db;
pub mod context;
pub mod data_dir;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod fallback;
pub mod flatten;
pub mod index;
pub mod library;
pub mod llm;
pub mod mcp;
pub mod outline;
pub mod query;
pub mod resolver;
pub mod services;
pub mod settings;
pub mod vector_store;

#[cfg(test)]
mod testing;

pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use index::SectionIndex;
pub use outline::OutlineDocument;
pub use services::Services;
pub use settings::Settings;
pub use vector_store::RedbVectorStore;

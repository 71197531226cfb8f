use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum, ValueHint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "codecontext",
    version,
    about = "Hybrid code search over indexed repositories"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Index a repository (full sync by default)
    Index {
        /// Repository path (defaults to current directory)
        #[arg(value_hint = ValueHint::DirPath)]
        path: Option<PathBuf>,
        /// Only re-index files whose checksum changed
        #[arg(long)]
        incremental: bool,
        /// Project name override. Also reads CODECONTEXT_PROJECT.
        #[arg(long, env = "CODECONTEXT_PROJECT")]
        project: Option<String>,
        /// Force a full re-index even when state exists
        #[arg(long)]
        force: bool,
    },
    /// Search an indexed project with a natural-language query
    Search {
        /// Query such as "where is the shipping cost calculated?"
        query: String,
        /// Project name. Also reads CODECONTEXT_PROJECT.
        #[arg(long, env = "CODECONTEXT_PROJECT")]
        project: Option<String>,
        /// Restrict to a language (java, python, kotlin, ...)
        #[arg(long)]
        language: Option<String>,
        /// Restrict to an object type (class, method, function, ...)
        #[arg(long = "type")]
        object_type: Option<String>,
        /// Restrict to files whose path contains this value
        #[arg(long = "file")]
        file_path: Option<String>,
        /// Maximum results to return
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Comma-separated expanded fields
        /// (signature,snippet,content,parent,relationships,complexity,impact)
        #[arg(long)]
        expand: Option<String>,
    },
    /// List indexed projects
    ListProjects,
    /// Delete a project's collection and state
    DeleteProject {
        /// Project name
        name: String,
        /// Skip the confirmation requirement
        #[arg(long)]
        yes: bool,
    },
    /// Show index status
    Status {
        /// Project name. Also reads CODECONTEXT_PROJECT.
        #[arg(long, env = "CODECONTEXT_PROJECT")]
        project: Option<String>,
    },
}

pub fn resolve_repo_path(path: Option<PathBuf>) -> Result<PathBuf> {
    match path {
        Some(p) => Ok(p),
        None => std::env::current_dir().context("failed to determine current directory"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_index_with_flags() {
        let cli = Cli::parse_from(["codecontext", "index", ".", "--incremental", "--project", "shop"]);
        match cli.command {
            Commands::Index {
                path,
                incremental,
                project,
                force,
            } => {
                assert_eq!(path, Some(PathBuf::from(".")));
                assert!(incremental);
                assert_eq!(project.as_deref(), Some("shop"));
                assert!(!force);
            }
            _ => panic!("expected index command"),
        }
    }

    #[test]
    fn parses_search_with_filters() {
        let cli = Cli::parse_from([
            "codecontext",
            "search",
            "payment gateway",
            "--language",
            "python",
            "--type",
            "function",
            "--file",
            "payment",
            "-n",
            "5",
            "--format",
            "json",
            "--expand",
            "signature,relationships",
        ]);
        match cli.command {
            Commands::Search {
                query,
                language,
                object_type,
                file_path,
                limit,
                format,
                expand,
                ..
            } => {
                assert_eq!(query, "payment gateway");
                assert_eq!(language.as_deref(), Some("python"));
                assert_eq!(object_type.as_deref(), Some("function"));
                assert_eq!(file_path.as_deref(), Some("payment"));
                assert_eq!(limit, 5);
                assert_eq!(format, OutputFormat::Json);
                assert_eq!(expand.as_deref(), Some("signature,relationships"));
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parses_delete_project_with_yes() {
        let cli = Cli::parse_from(["codecontext", "delete-project", "shop", "--yes"]);
        match cli.command {
            Commands::DeleteProject { name, yes } => {
                assert_eq!(name, "shop");
                assert!(yes);
            }
            _ => panic!("expected delete-project command"),
        }
    }

    #[test]
    fn parses_list_and_status() {
        assert!(matches!(
            Cli::parse_from(["codecontext", "list-projects"]).command,
            Commands::ListProjects
        ));
        assert!(matches!(
            Cli::parse_from(["codecontext", "status"]).command,
            Commands::Status { project: None }
        ));
    }

    #[test]
    fn search_limit_defaults_to_ten() {
        let cli = Cli::parse_from(["codecontext", "search", "anything"]);
        match cli.command {
            Commands::Search { limit, format, .. } => {
                assert_eq!(limit, 10);
                assert_eq!(format, OutputFormat::Text);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn resolve_repo_path_defaults_to_cwd() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(resolve_repo_path(None).unwrap(), cwd);
        assert_eq!(
            resolve_repo_path(Some(PathBuf::from("/x"))).unwrap(),
            PathBuf::from("/x")
        );
    }
}

use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use console::style;
use tracing_subscriber::EnvFilter;

use crate::cli::{resolve_repo_path, Cli, Commands, OutputFormat};
use crate::config::Config;
use crate::embedding::provider_from_name;
use crate::encoder::Bm25fEncoder;
use crate::error::{closest_matches, CoreError};
use crate::indexer::{project_root, IndexRequest, Indexer};
use crate::output::{build_record, parse_expand_fields, render_json, render_text};
use crate::project::{delete_project, detect_project_id, list_projects, project_status};
use crate::search::{CancelFlag, Retriever, SearchRequest};
use crate::store::{store_for_project, EmbeddedStore};
use crate::tokenizer::CodeTokenizer;

pub fn run() -> ExitCode {
    setup_tracing();
    let cli = Cli::parse();
    match run_with_cli(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err);
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn setup_tracing() {
    let default_level =
        std::env::var("CODECONTEXT_LOGGING__LEVEL").unwrap_or_else(|_| "warn".to_string());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<CoreError>()
        .map(|core| core.exit_code())
        .unwrap_or(2)
}

fn report_error(err: &anyhow::Error) {
    if let Some(core) = err.downcast_ref::<CoreError>() {
        eprintln!("{} {}", style("error:").red().bold(), core);
        if let Some(hint) = core.remediation() {
            eprintln!("{} {}", style("hint:").yellow().bold(), hint);
        }
    } else {
        eprintln!("{} {:#}", style("error:").red().bold(), err);
    }
}

pub fn run_with_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Index {
            path,
            incremental,
            project,
            force,
        } => handle_index(path, incremental && !force, project),
        Commands::Search {
            query,
            project,
            language,
            object_type,
            file_path,
            limit,
            format,
            expand,
        } => handle_search(SearchParams {
            query,
            project,
            language,
            object_type,
            file_path,
            limit,
            format,
            expand,
        }),
        Commands::ListProjects => handle_list_projects(),
        Commands::DeleteProject { name, yes } => handle_delete_project(&name, yes),
        Commands::Status { project } => handle_status(project),
    }
}

struct SearchParams {
    query: String,
    project: Option<String>,
    language: Option<String>,
    object_type: Option<String>,
    file_path: Option<String>,
    limit: usize,
    format: OutputFormat,
    expand: Option<String>,
}

fn handle_index(
    path: Option<std::path::PathBuf>,
    incremental: bool,
    project: Option<String>,
) -> Result<()> {
    let root = project_root(&resolve_repo_path(path)?);
    let config = Config::load(Some(&root))?;
    let project_id = detect_project_id(
        &root,
        project.as_deref().or(config.project.name.as_deref()),
    );

    let store = store_for_project(&config.storage.provider, &project_id)?;
    let provider = provider_from_name(&config.embeddings.provider, config.embeddings.dimension)?;
    let encoder = Bm25fEncoder::new(config.indexing.field_weights.clone(), CodeTokenizer::new());
    let indexer = Indexer::new(store, provider, encoder, config);

    let cancel: CancelFlag = Arc::new(AtomicBool::new(false));
    let summary = indexer
        .run(
            &IndexRequest {
                path: root,
                project_id: project_id.clone(),
                incremental,
            },
            &cancel,
        )
        .map_err(|err| match err.downcast::<CoreError>() {
            Ok(core) => anyhow::Error::new(core),
            Err(other) => anyhow::Error::new(CoreError::Indexing(other.to_string())),
        })?;

    println!(
        "{} indexed project '{}': {} files ({} skipped, {} deleted), {} objects, {} documents, {} relationships in {} ms",
        style("ok:").green().bold(),
        project_id,
        summary.files_indexed,
        summary.files_skipped,
        summary.files_deleted,
        summary.objects,
        summary.documents,
        summary.relationships,
        summary.duration_ms,
    );
    for error in &summary.errors {
        eprintln!("{} {}", style("warn:").yellow().bold(), error);
    }
    Ok(())
}

fn handle_search(params: SearchParams) -> Result<()> {
    if params.query.trim().is_empty() {
        return Err(CoreError::EmptyQuery.into());
    }

    let cwd = std::env::current_dir()?;
    let config = Config::load(Some(&cwd))?;
    let project_id = resolve_existing_project(&cwd, params.project.as_deref(), &config)?;

    let store = store_for_project(&config.storage.provider, &project_id)?;
    let provider = provider_from_name(&config.embeddings.provider, config.embeddings.dimension)?;
    let encoder = Bm25fEncoder::new(config.indexing.field_weights.clone(), CodeTokenizer::new());
    let retriever = Retriever::new(store, provider, encoder, config.search.clone())?;

    let expand_fields = parse_expand_fields(params.expand.as_deref().unwrap_or_default())?;
    let request = SearchRequest {
        query: params.query.clone(),
        limit: params.limit,
        language: params.language,
        object_type: params.object_type,
        file_path: params.file_path,
        min_score: 0.0,
    };

    let started = Instant::now();
    let cancel: CancelFlag = Arc::new(AtomicBool::new(false));
    let results = retriever.search(&request, &cancel)?;
    let elapsed = started.elapsed();

    let records: Vec<_> = results
        .iter()
        .map(|result| build_record(result, &expand_fields, &retriever))
        .collect();

    match params.format {
        OutputFormat::Text => print!("{}", render_text(&params.query, &records, elapsed)),
        OutputFormat::Json => println!("{}", render_json(&params.query, &records, elapsed)),
    }
    Ok(())
}

/// Map the request to an indexed project, or fail with suggestions.
fn resolve_existing_project(
    cwd: &Path,
    explicit: Option<&str>,
    config: &Config,
) -> Result<String> {
    let project_id = detect_project_id(cwd, explicit.or(config.project.name.as_deref()));
    if EmbeddedStore::exists(&project_id) {
        return Ok(project_id);
    }
    let known: Vec<String> = list_projects()?
        .into_iter()
        .map(|info| info.project_id)
        .collect();
    Err(CoreError::ProjectNotFound {
        suggestions: closest_matches(&project_id, &known),
        name: project_id,
    }
    .into())
}

fn handle_list_projects() -> Result<()> {
    let projects = list_projects()?;
    if projects.is_empty() {
        println!("No indexed projects.");
        return Ok(());
    }
    for info in projects {
        let last = info
            .last_indexed
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{}  files={} objects={} documents={} languages=[{}] last_indexed={}",
            style(&info.project_id).bold(),
            info.total_files,
            info.total_objects,
            info.total_documents,
            info.languages.join(","),
            last,
        );
    }
    Ok(())
}

fn handle_delete_project(name: &str, yes: bool) -> Result<()> {
    if !yes {
        return Err(CoreError::Configuration(format!(
            "refusing to delete project '{name}' without --yes"
        ))
        .into());
    }
    delete_project(name)?;
    println!("{} deleted project '{}'", style("ok:").green().bold(), name);
    Ok(())
}

fn handle_status(project: Option<String>) -> Result<()> {
    let project_id = match project {
        Some(name) => name,
        None => {
            let cwd = std::env::current_dir()?;
            let config = Config::load(Some(&cwd))?;
            detect_project_id(&cwd, config.project.name.as_deref())
        }
    };
    let info = project_status(&project_id)?;
    println!("project: {}", info.project_id);
    if let Some(path) = &info.project_path {
        println!("path: {path}");
    }
    println!("files: {}", info.total_files);
    println!("objects: {}", info.total_objects);
    println!("documents: {}", info.total_documents);
    println!("languages: {}", info.languages.join(", "));
    match info.last_indexed {
        Some(ts) => println!("last indexed: {}", ts.to_rfc3339()),
        None => println!("last indexed: never"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_map_error_kinds() {
        let user = anyhow::Error::new(CoreError::EmptyQuery);
        assert_eq!(exit_code_for(&user), 1);
        let operational = anyhow::Error::new(CoreError::Storage("down".into()));
        assert_eq!(exit_code_for(&operational), 2);
        let unknown = anyhow::anyhow!("mystery");
        assert_eq!(exit_code_for(&unknown), 2);
    }

    #[test]
    fn delete_without_yes_is_a_user_error() {
        let err = handle_delete_project("anything", false).unwrap_err();
        let core = err.downcast_ref::<CoreError>().unwrap();
        assert_eq!(core.exit_code(), 1);
    }

    #[test]
    fn empty_query_short_circuits() {
        let err = handle_search(SearchParams {
            query: "  ".into(),
            project: None,
            language: None,
            object_type: None,
            file_path: None,
            limit: 10,
            format: OutputFormat::Text,
            expand: None,
        })
        .unwrap_err();
        let core = err.downcast_ref::<CoreError>().unwrap();
        assert_eq!(core.kind(), "empty_query");
    }
}

use std::io::{self, BufRead, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{Result, bail, eyre};
use log::{debug, info, warn};

use ytscribe::captions::{CaptionSource, HttpCaptionClient};
use ytscribe::config::{self, Config};
use ytscribe::output;
use ytscribe::pipeline::{Generator, Origin};
use ytscribe::state::{GenerationState, Session};
use ytscribe::store::{LocalStore, RestStore, TranscriptStore};
use ytscribe::summarize::{Summarizer, edit_summary, summarize_stored};
use ytscribe::{TranscriptError, extract_video_id};

mod cli;

use cli::{Cli, Command, OutputFormat};

fn setup_logging() -> Result<()> {
    let log_dir = log_dir();
    std::fs::create_dir_all(&log_dir)?;
    let log_file = log_dir.join("ytscribe.log");

    let target = Box::new(std::fs::OpenOptions::new().create(true).append(true).open(&log_file)?);

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized: {}", log_file.display());
    Ok(())
}

fn log_dir() -> PathBuf {
    config::data_dir().join("logs")
}

fn build_after_help() -> String {
    let config_path = config::config_path();
    let config_line = if config_path.exists() {
        format!("  \x1b[32m✅\x1b[0m {}", config_path.display())
    } else {
        format!("  \x1b[33m–\x1b[0m {} (not found, using defaults)", config_path.display())
    };

    let log_path = log_dir().join("ytscribe.log");

    format!(
        "\nCONFIG:\n{config_line}\n\nENVIRONMENT:\n  YTSCRIBE_PROVIDER_KEY  caption provider API key\n  \
         YTSCRIBE_STORE_URL     hosted backend URL (local JSON store if unset)\n  \
         YTSCRIBE_STORE_KEY     hosted backend API key\n  \
         YTSCRIBE_ACCESS_TOKEN  signed-in user's access token\n  \
         YTSCRIBE_USER          owner id for generated transcripts\n\n\
         Logs are written to: {}",
        log_path.display()
    )
}

fn load_config(path: &Path) -> Config {
    let config = match Config::load_from(path) {
        Ok(config) => config,
        Err(e) => {
            warn!("Ignoring invalid config {}: {e}", path.display());
            eprintln!("Warning: ignoring invalid config {}: {e}", path.display());
            Config::default()
        }
    };
    config.with_env()
}

fn open_store(config: &Config, client: &reqwest::Client) -> Result<Arc<dyn TranscriptStore>> {
    match &config.store.url {
        Some(url) => {
            debug!("Using hosted store at {url}");
            Ok(Arc::new(RestStore::new(client.clone(), url, &config.store)))
        }
        None => {
            let path = config.local_store_path();
            debug!("Using local store at {}", path.display());
            Ok(Arc::new(LocalStore::from_config(&config.store, &path)?))
        }
    }
}

fn require_user(user: Option<&str>) -> Result<&str> {
    user.ok_or_else(|| eyre!("no user configured\n\nPass --user <ID>, set YTSCRIBE_USER, or add `user = \"...\"` to the config file"))
}

fn write_or_print(rendered: &str, out_path: Option<&Path>, file_name: &str, verbose: bool) -> Result<()> {
    match out_path {
        Some(path) => {
            let path = if path.is_dir() { path.join(file_name) } else { path.to_path_buf() };
            std::fs::write(&path, rendered)?;
            if verbose {
                eprintln!("Output written to: {}", path.display());
            }
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

async fn generate(
    generator: Generator,
    user: Option<&str>,
    url: Option<String>,
    format: OutputFormat,
    out_path: Option<PathBuf>,
    verbose: bool,
) -> Result<()> {
    // Collect URLs: from arg or stdin
    let urls = if let Some(url) = url {
        vec![url]
    } else {
        let stdin = io::stdin();
        stdin.lock().lines().collect::<Result<Vec<_>, _>>()?
    };

    let urls: Vec<String> = urls
        .into_iter()
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .collect();

    if urls.is_empty() {
        bail!("no URL provided\n\nUsage: ytscribe generate <URL>\n       echo <URL> | ytscribe generate");
    }

    let mut session = Session::new(generator, user.map(str::to_string));
    let mut failures = 0usize;

    for url in &urls {
        let state = session
            .submit_with(url, |s| debug!("Generation state for {url}: {}", s.label()))
            .await;

        match state {
            GenerationState::Ready { transcript, origin } => {
                if verbose {
                    eprintln!(
                        "Video: {} ({})\nLanguage: {}\nStored as: {} ({})",
                        transcript.video_title.as_deref().unwrap_or("(untitled)"),
                        transcript.video_id,
                        transcript.language_code,
                        transcript.id,
                        match origin {
                            Origin::Cached => "already saved",
                            Origin::Created => "saved now",
                        },
                    );
                }
                let rendered = match format {
                    OutputFormat::Text => output::render_text(transcript, false),
                    OutputFormat::Json => output::render_json(transcript)?,
                };
                write_or_print(
                    &rendered,
                    out_path.as_deref(),
                    &output::download_file_name(transcript),
                    verbose,
                )?;
            }
            GenerationState::Failed { error, content } => {
                failures += 1;
                eprintln!("{error}");
                if let Some(content) = content {
                    eprintln!("The transcript below was not saved.");
                    println!("{content}");
                }
            }
            other => bail!("generation stopped in unexpected state: {}", other.label()),
        }
    }

    if failures > 0 {
        bail!("{failures} of {} request(s) failed", urls.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging()?;

    let after_help = build_after_help();
    let cmd = <Cli as clap::CommandFactory>::command().after_help(after_help);
    let matches = cmd.get_matches();
    let cli = <Cli as clap::FromArgMatches>::from_arg_matches(&matches)?;

    let config_path = cli.config.clone().unwrap_or_else(config::config_path);
    let config = load_config(&config_path);
    if cli.verbose && config_path.exists() {
        eprintln!("Config: {}", config_path.display());
    }

    // CLI flags take priority over config and environment
    let user = cli.user.clone().or_else(|| config.user.clone());

    let client = reqwest::Client::builder().timeout(config.request_timeout()).build()?;
    let store = open_store(&config, &client)?;

    let result = run(cli, &config, user.as_deref(), client, store.clone()).await;
    store.close().await?;
    result
}

async fn run(
    cli: Cli,
    config: &Config,
    user: Option<&str>,
    client: reqwest::Client,
    store: Arc<dyn TranscriptStore>,
) -> Result<()> {
    match cli.command {
        Command::Generate {
            url,
            format,
            lang,
            output: out_path,
        } => {
            let captions = Arc::new(HttpCaptionClient::new(client, &config.provider));
            let mut generator = Generator::new(captions, store);
            if let Some(lang) = lang {
                generator = generator.with_language(lang);
            }
            generate(generator, user, url, format, out_path, cli.verbose).await
        }
        Command::Tracks { url } => {
            let video_id = extract_video_id(&url).ok_or_else(|| TranscriptError::InvalidUrl { url: url.clone() })?;
            let captions = HttpCaptionClient::new(client, &config.provider);
            let catalog = captions.list_caption_tracks(&video_id).await?;
            println!("{}", output::render_tracks(&catalog));
            Ok(())
        }
        Command::History => {
            let user = require_user(user)?;
            let rows = store.list_by_owner(user).await?;
            if rows.is_empty() {
                eprintln!("No saved transcripts for {user}");
            } else {
                println!("{}", output::render_listing(&rows));
            }
            Ok(())
        }
        Command::Community => {
            let rows = store.list_community().await?;
            if rows.is_empty() {
                eprintln!("No community transcripts yet");
            } else {
                println!("{}", output::render_listing(&rows));
            }
            Ok(())
        }
        Command::Show {
            id,
            format,
            with_summary,
        } => {
            let transcript = store
                .get(&id)
                .await?
                .ok_or_else(|| eyre!("transcript {id} not found"))?;
            let rendered = match format {
                OutputFormat::Text => output::render_text(&transcript, with_summary),
                OutputFormat::Json => output::render_json(&transcript)?,
            };
            println!("{rendered}");
            Ok(())
        }
        Command::Delete { id } => {
            let user = require_user(user)?;
            store.delete(&id, user).await?;
            eprintln!("Deleted transcript {id}");
            Ok(())
        }
        Command::Summarize { id, prompt, model } => {
            let mut summarizer = Summarizer::new(client, &config.summary);
            if let Some(model) = model.as_deref() {
                summarizer = summarizer.with_model(model);
            }
            let updated = summarize_stored(&summarizer, store.as_ref(), &id, prompt).await?;
            println!("{}", updated.summary.unwrap_or_default());
            Ok(())
        }
        Command::SetSummary { id, text } => {
            let user = require_user(user)?;
            let text = if text == "-" {
                let mut buf = String::new();
                io::stdin().read_to_string(&mut buf)?;
                buf
            } else {
                text
            };
            let text = text.trim();
            if text.is_empty() {
                bail!("summary text is empty");
            }
            edit_summary(store.as_ref(), &id, user, text).await?;
            eprintln!("Updated summary of transcript {id}");
            Ok(())
        }
        Command::Usage => {
            let user = require_user(user)?;
            let today = store.usage_today(user).await?;
            let total = store.list_by_owner(user).await?.len();
            println!(
                "Today: {today}/{} transcripts\nTotal saved: {total}",
                config.store.daily_limit
            );
            Ok(())
        }
    }
}

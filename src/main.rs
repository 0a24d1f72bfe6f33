use std::fs::{self, File};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::process;

use anyhow::{Context, Result};
use bskymodlist::batch::{self, InputSource, ListTarget};
use bskymodlist::config::{default_config_path, ConfigFile, Credentials};
use bskymodlist::identity::PostUrl;
use bskymodlist::lookup;
use bskymodlist::retry::{Backoff, Retry};
use bskymodlist::xrpc::{XrpcSession, DEFAULT_SERVICE};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use futures_util::TryStreamExt;
use tokio::sync::watch;
use tracing::subscriber;
use tracing::{error, info, metadata::LevelFilter, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

const USAGE_EXIT: i32 = 2;
/// Conventional status for a process ended by SIGINT.
const INTERRUPTED_EXIT: i32 = 130;

#[derive(Parser, Debug)]
#[command(
    name = "bskymodlist",
    version,
    about = "Search bluesky for users, then add them to a moderation list."
)]
struct Cli {
    /// Location of the configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// PDS to log in to
    #[arg(long, global = true, env = "ATPROTO_SERVICE", default_value = DEFAULT_SERVICE)]
    service: String,

    /// Where to write the JSON log
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search for a user on Bluesky by username
    Search {
        /// Username to search for on Bluesky
        #[arg(long)]
        username: Option<String>,
    },
    /// Find the account with exactly this handle
    FindHandle { handle: String },
    /// Add users from a newline delimited file to a moderation list
    Add {
        /// Name of a new list to create
        #[arg(long)]
        list_name: Option<String>,
        /// Description of the new list, defaults to its name
        #[arg(long, requires = "list_name")]
        description: Option<String>,
        /// Record key of one of your existing lists
        #[arg(long)]
        list_key: Option<String>,
        /// File with one DID per line, `-` or nothing for stdin
        file: Option<String>,
    },
    /// List your own lists
    Lists,
    /// Show one of your lists and its members
    ShowList { key: String },
    /// Print everyone who liked a post
    Likers { url: String },
}

/// A command whose arguments have been checked; nothing remote has happened yet.
enum Job {
    Search(Option<String>),
    FindHandle(String),
    Add {
        target: ListTarget,
        input: InputSource,
    },
    Lists,
    ShowList(String),
    Likers(PostUrl),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let job = prepare(cli.command);
    let _guard = init_tracing(cli.log_file.as_deref())?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("interrupted, finishing the current request (Ctrl-C again to quit now)");
        cancel_tx.send_replace(true);
        if tokio::signal::ctrl_c().await.is_ok() {
            error!("interrupted again, exiting");
            process::exit(INTERRUPTED_EXIT);
        }
    });
    let retry = Retry::with_cancel(Backoff::default(), cancel_rx);

    if let Err(err) = run(&cli.service, cli.config, job, &retry).await {
        error!("{err:#}");
    }
    Ok(())
}

/// Checks arguments that must be right before logging in. Exits on failure.
fn prepare(command: Command) -> Job {
    match command {
        Command::Search { username } => Job::Search(username),
        Command::FindHandle { handle } => Job::FindHandle(handle),
        Command::Add {
            list_name,
            description,
            list_key,
            file,
        } => {
            let target = match ListTarget::from_options(list_name, description, list_key) {
                Ok(target) => target,
                Err(err) => exit_with(USAGE_EXIT, &err),
            };
            let input = InputSource::from_arg(file.as_deref());
            if let InputSource::File(path) = &input {
                if !path.is_file() {
                    exit_with(
                        USAGE_EXIT,
                        &format!("file {} does not exist", path.display()),
                    );
                }
            }
            Job::Add { target, input }
        }
        Command::Lists => Job::Lists,
        Command::ShowList { key } => Job::ShowList(key),
        Command::Likers { url } => match PostUrl::parse(&url) {
            Ok(post) => Job::Likers(post),
            Err(err) => exit_with(1, &err),
        },
    }
}

fn exit_with(code: i32, err: &dyn std::fmt::Display) -> ! {
    eprintln!("error: {err}");
    process::exit(code)
}

fn init_tracing(log_file: Option<&Path>) -> Result<WorkerGuard> {
    let path = match log_file {
        Some(path) => path.to_path_buf(),
        None => ProjectDirs::from("", "", "bskymodlist")
            .context("cannot find a cache directory")?
            .cache_dir()
            .join("bskymodlist.log.json"),
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("cannot create log directory {parent:?}"))?;
    }
    let file = File::create(&path).with_context(|| format!("cannot create log file {path:?}"))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::default()
            .add_directive("hyper=info".parse().unwrap())
            .add_directive("reqwest=info".parse().unwrap())
            .add_directive("bskymodlist=debug".parse().unwrap())
            .add_directive("info".parse().unwrap())
    });
    let file_layer = fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(filter);
    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_filter(LevelFilter::INFO);
    let subscriber = Registry::default().with(file_layer).with(stderr_layer);
    subscriber::set_global_default(subscriber).context("Couldn't set subscriber")?;
    tracing_log::LogTracer::init().context("Couldn't bridge log records")?;
    Ok(guard)
}

async fn run(service: &str, config: Option<PathBuf>, job: Job, retry: &Retry) -> Result<()> {
    let session = login(service, config, retry).await?;
    match job {
        Job::Search(username) => {
            let username = match username {
                Some(username) => username,
                None => prompt("Enter the username to search for")?,
            };
            search(&session, retry, &username).await
        }
        Job::FindHandle(handle) => find_handle(&session, retry, &handle).await,
        Job::Add { target, input } => add(&session, retry, &target, &input).await,
        Job::Lists => lists(&session, retry).await,
        Job::ShowList(key) => show_list(&session, retry, &key).await,
        Job::Likers(post) => likers(&session, retry, &post).await,
    }
}

async fn login(service: &str, config: Option<PathBuf>, retry: &Retry) -> Result<XrpcSession> {
    let config_path = config.or_else(default_config_path);
    let credentials = Credentials::resolve(
        ConfigFile::load_or_default(config_path.as_deref()),
        |key| std::env::var(key).ok(),
        |question| Ok(prompt(question)?),
    )
    .context("cannot get credentials")?;
    let session = retry
        .call("login", || {
            XrpcSession::login(service, &credentials.username, &credentials.app_password)
        })
        .await
        .with_context(|| format!("Couldn't log in to {service} as {}", credentials.username))?;
    info!(handle = session.handle(), "session ready");
    Ok(session)
}

fn prompt(question: &str) -> io::Result<String> {
    let mut stdout = io::stdout().lock();
    let mut stdin = io::stdin().lock();

    write!(&mut stdout, "{question}: ")?;
    stdout.flush()?;

    let mut input = String::new();
    stdin.read_line(&mut input)?;

    Ok(input.trim().to_string())
}

async fn search(session: &XrpcSession, retry: &Retry, username: &str) -> Result<()> {
    let mut actors = pin!(lookup::search_actors(session, retry, username));
    while let Some(actor) = actors.try_next().await.context("Couldn't search actors")? {
        println!("{}", actor.summary());
        if retry.is_cancelled() {
            break;
        }
    }
    Ok(())
}

async fn find_handle(session: &XrpcSession, retry: &Retry, handle: &str) -> Result<()> {
    match lookup::find_actor_by_handle(session, retry, handle)
        .await
        .context("Couldn't search actors")?
    {
        Some(actor) => println!("{}", actor.summary()),
        None => println!("No account has the handle {handle}"),
    }
    Ok(())
}

async fn add(
    session: &XrpcSession,
    retry: &Retry,
    target: &ListTarget,
    input: &InputSource,
) -> Result<()> {
    let lines = input
        .read_lines()
        .with_context(|| format!("cannot read {input:?}"))?;
    let report = batch::add_to_list(session, retry, target, lines)
        .await
        .context("Couldn't resolve the moderation list")?;
    info!(?report, "batch finished");
    println!("Added {} user(s) to the moderation list.", report.processed);
    if !report.failed.is_empty() {
        println!(
            "{} of them could not be added: {}",
            report.failed.len(),
            report.failed.join(", ")
        );
    }
    if report.interrupted {
        println!("Stopped early, the rest of the input was not read.");
    }
    Ok(())
}

async fn lists(session: &XrpcSession, retry: &Retry) -> Result<()> {
    let mut lists = pin!(lookup::own_lists(session, retry));
    while let Some(list) = lists.try_next().await.context("Couldn't get lists")? {
        println!(
            "{}\t{}\t{}",
            list.uri,
            list.name,
            list.purpose.as_deref().unwrap_or("")
        );
        if retry.is_cancelled() {
            break;
        }
    }
    Ok(())
}

async fn show_list(session: &XrpcSession, retry: &Retry, key: &str) -> Result<()> {
    let list = lookup::get_list_by_key(session, retry, key)
        .await
        .with_context(|| format!("Couldn't get list {key}"))?;
    println!("{}", list.uri);
    println!("name: {}", list.name);
    println!("description: {}", list.description.as_deref().unwrap_or(""));
    println!("creator: {}", list.creator.summary());
    if let Some(count) = list.list_item_count {
        println!("items: {count}");
    }
    let mut members = pin!(lookup::list_members(session, retry, &list.uri));
    while let Some(item) = members.try_next().await.context("Couldn't get list items")? {
        println!("{}", item.subject.summary());
        if retry.is_cancelled() {
            break;
        }
    }
    Ok(())
}

async fn likers(session: &XrpcSession, retry: &Retry, post: &PostUrl) -> Result<()> {
    let uri = lookup::resolve_post(session, retry, post)
        .await
        .context("Couldn't resolve post")?;
    info!(%uri, "resolved post");
    let mut actors = pin!(lookup::likers(session, retry, &uri));
    while let Some(actor) = actors.try_next().await.context("Couldn't get likes")? {
        println!("{}", actor.summary());
        if retry.is_cancelled() {
            break;
        }
    }
    Ok(())
}

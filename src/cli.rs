//! CLI - manual access to the simulated store and the request cache
//!
//! Each invocation is one "page load": the durable and session files under
//! the data directory carry state between invocations.

use async_trait::async_trait;
use clap::Subcommand;
use futures::future::join_all;
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::cache::{HttpFetcher, RequestCoalescer};
use crate::remote::{HttpUserClient, RemoteUserClient};
use crate::simulated::{MemoryPost, SimulatedStore};
use crate::types::{Result, VibeError};

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Inspect or change the simulation mode
    #[command(subcommand)]
    Mode(ModeCommand),

    /// Deleted event markers
    #[command(subcommand)]
    Deleted(DeletedCommand),

    /// Cancelled event markers
    #[command(subcommand)]
    Cancel(CancelCommand),

    /// Group membership and join requests
    #[command(subcommand)]
    Groups(GroupCommand),

    /// Memory posts
    #[command(subcommand)]
    Posts(PostCommand),

    /// Current user profile edits
    #[command(subcommand)]
    User(UserCommand),

    /// Fetch JSON URLs concurrently through the request coalescer
    Fetch {
        /// URLs to fetch; repeats share one request
        #[arg(required = true)]
        urls: Vec<String>,
    },
}

#[derive(Debug, Subcommand, Clone)]
pub enum ModeCommand {
    /// Show the active mode
    Show,
    /// Enter elevated (durable) mode
    Elevated,
    /// Enter session (demo) mode
    Session,
    /// Leave the active mode and drop session data
    Exit,
}

#[derive(Debug, Subcommand, Clone)]
pub enum DeletedCommand {
    /// List deleted event ids
    List,
    /// Mark an event as deleted
    Add { event_id: String },
}

#[derive(Debug, Subcommand, Clone)]
pub enum CancelCommand {
    /// List cancelled events
    List,
    /// Mark an event as cancelled
    Add { event_id: String, message: String },
}

#[derive(Debug, Subcommand, Clone)]
pub enum GroupCommand {
    /// List joined groups and pending requests
    List,
    /// Join a group
    Join { group_id: String },
    /// Request to join a group
    Request { group_id: String },
    /// Withdraw a pending join request
    Withdraw { group_id: String },
}

#[derive(Debug, Subcommand, Clone)]
pub enum PostCommand {
    /// List memory posts, newest first
    List,
    /// Save a post given as a JSON object; an id is generated if missing
    Save { json: String },
    /// Patch a post with a JSON object
    Update { post_id: String, json: String },
    /// Delete a post
    Delete { post_id: String },
}

#[derive(Debug, Subcommand, Clone)]
pub enum UserCommand {
    /// Print a user JSON object with session overrides applied
    Show { json: String },
    /// Apply a JSON patch to the current user
    Update { json: String },
}

/// Everything a command may touch
pub struct CliContext {
    pub store: SimulatedStore,
    pub coalescer: RequestCoalescer,
    pub fetcher: HttpFetcher,
    pub remote: Option<HttpUserClient>,
}

/// Stand-in used when no remote URL is configured
struct NoRemote;

#[async_trait]
impl RemoteUserClient for NoRemote {
    async fn update_current_user(&self, _patch: &Map<String, Value>) -> Result<()> {
        Err(VibeError::Config(
            "REMOTE_URL is required for elevated-mode user updates".to_string(),
        ))
    }
}

fn parse_object(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(VibeError::InvalidInput(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run one command against the context
pub async fn execute(command: Command, ctx: &CliContext) -> Result<()> {
    let store = &ctx.store;

    match command {
        Command::Mode(cmd) => match cmd {
            ModeCommand::Show => println!("{}", store.mode()),
            ModeCommand::Elevated => store.enter_elevated()?,
            ModeCommand::Session => store.enter_session()?,
            ModeCommand::Exit => store.exit()?,
        },

        Command::Deleted(cmd) => match cmd {
            DeletedCommand::List => print_json(&store.get_deleted_event_ids())?,
            DeletedCommand::Add { event_id } => store.delete_event(&event_id)?,
        },

        Command::Cancel(cmd) => match cmd {
            CancelCommand::List => print_json(&store.get_cancelled_events())?,
            CancelCommand::Add { event_id, message } => store.cancel_event(&event_id, &message)?,
        },

        Command::Groups(cmd) => match cmd {
            GroupCommand::List => print_json(&serde_json::json!({
                "joined": store.get_joined_groups(),
                "pending": store.get_pending_group_requests(),
            }))?,
            GroupCommand::Join { group_id } => store.join_group(&group_id)?,
            GroupCommand::Request { group_id } => store.add_pending_group_request(&group_id)?,
            GroupCommand::Withdraw { group_id } => {
                store.remove_pending_group_request(&group_id)?
            }
        },

        Command::Posts(cmd) => match cmd {
            PostCommand::List => print_json(&store.get_memory_posts())?,
            PostCommand::Save { json } => {
                let fields = parse_object(&json)?;
                let id = match fields.get("id") {
                    Some(Value::String(id)) => id.clone(),
                    _ => Uuid::new_v4().to_string(),
                };
                store.save_memory_post(MemoryPost::new(id.clone(), fields))?;
                println!("{}", id);
            }
            PostCommand::Update { post_id, json } => {
                store.update_memory_post(&post_id, &parse_object(&json)?)?
            }
            PostCommand::Delete { post_id } => store.delete_memory_post(&post_id)?,
        },

        Command::User(cmd) => match cmd {
            UserCommand::Show { json } => {
                print_json(&store.apply_demo_overrides(parse_object(&json)?))?
            }
            UserCommand::Update { json } => {
                let patch = parse_object(&json)?;
                let remote: &dyn RemoteUserClient = match ctx.remote {
                    Some(ref client) => client,
                    None => &NoRemote,
                };
                let outcome = store.update_simulated_user(&patch, remote).await?;
                info!(outcome = ?outcome, "User update applied");
            }
        },

        Command::Fetch { urls } => {
            let requests = urls.iter().map(|url| {
                let fetcher = ctx.fetcher.clone();
                let target = url.clone();
                ctx.coalescer
                    .throttled_request(url, move || async move { fetcher.get_json(&target).await })
            });
            let results = join_all(requests).await;

            for (url, result) in urls.iter().zip(results) {
                match result {
                    Ok(value) => println!("{} => {}", url, value),
                    Err(e) => println!("{} => error: {}", url, e),
                }
            }
            let stats = ctx.coalescer.cache().stats();
            info!(hits = stats.hits, misses = stats.misses, "Fetch finished");
        }
    }

    Ok(())
}

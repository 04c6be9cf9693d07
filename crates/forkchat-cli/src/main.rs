use std::path::PathBuf;

use clap::{Parser, Subcommand};
use forkchat_db::{CreateConversationInput, NewMessage, Role, Store};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "forkchat", about = "Inspect and edit versioned conversations.")]
struct Cli {
    /// Database file. Defaults to the app data directory.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an empty conversation.
    New {
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        project: Option<String>,
    },
    /// List conversations, pinned first.
    List {
        #[arg(long)]
        project: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show a conversation and the messages on its active path.
    Show { conversation: String },
    /// Append a message to the active path.
    Add {
        conversation: String,
        content: String,
        #[arg(long, default_value = "user")]
        role: Role,
    },
    /// Correct a message in place without versioning it.
    Edit { message: String, content: String },
    /// Edit a message by forking the conversation at it.
    Revise {
        conversation: String,
        message: String,
        content: String,
    },
    /// List every version of a root message.
    Versions { root: String },
    /// Restore the path that was active with the given version.
    Switch {
        conversation: String,
        message: String,
    },
    /// Delete a message, keeping anything a branch still needs.
    Delete { message: String },
    /// Copy a conversation up to a message into a new conversation.
    Fork {
        conversation: String,
        message: String,
    },
    /// Pin or unpin a conversation.
    Pin {
        conversation: String,
        #[arg(long)]
        off: bool,
    },
    /// Replace a conversation's tags.
    Tag {
        conversation: String,
        tags: Vec<String>,
    },
    /// Show the operation log of a conversation.
    Ops {
        conversation: String,
        #[arg(long)]
        after: Option<i64>,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Manage projects.
    #[command(subcommand)]
    Project(ProjectCommand),
}

#[derive(Subcommand)]
enum ProjectCommand {
    Add { name: String },
    List,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let db_path = match cli.db {
        Some(path) => path,
        None => forkchat_app::db_path()?,
    };
    debug!(path = %db_path.display(), "opening store");
    let mut store = Store::open(&db_path)?;

    run(&mut store, cli.command)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(store: &mut Store, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::New { title, project } => print_json(
            &store
                .conversations()
                .create_conversation(CreateConversationInput {
                    title,
                    project_id: project,
                })?,
        ),
        Command::List { project, limit } => print_json(
            &store
                .conversations()
                .list_conversations(project.as_deref(), limit)?,
        ),
        Command::Show { conversation } => {
            let record = store
                .conversations()
                .get_conversation(&conversation)?
                .ok_or_else(|| format!("conversation not found: {conversation}"))?;
            let messages = store.conversations().conversation_messages(&conversation)?;
            print_json(&serde_json::json!({
                "conversation": record,
                "messages": messages,
            }))
        }
        Command::Add {
            conversation,
            content,
            role,
        } => print_json(
            &store
                .messages()
                .add_message(&conversation, NewMessage::new(role, content))?,
        ),
        Command::Edit { message, content } => {
            print_json(&store.messages().edit_message(&message, &content, None)?)
        }
        Command::Revise {
            conversation,
            message,
            content,
        } => print_json(&store.conversations().create_message_version(
            &conversation,
            &message,
            &content,
            None,
            None,
        )?),
        Command::Versions { root } => print_json(&store.messages().get_message_versions(&root)?),
        Command::Switch {
            conversation,
            message,
        } => print_json(
            &store
                .conversations()
                .switch_to_message_version(&conversation, &message)?,
        ),
        Command::Delete { message } => print_json(&store.messages().delete_message(&message)?),
        Command::Fork {
            conversation,
            message,
        } => print_json(
            &store
                .conversations()
                .branch_conversation(&conversation, &message)?,
        ),
        Command::Pin { conversation, off } => {
            print_json(&store.conversations().set_pinned(&conversation, !off)?)
        }
        Command::Tag { conversation, tags } => {
            print_json(&store.conversations().set_tags(&conversation, tags)?)
        }
        Command::Ops {
            conversation,
            after,
            limit,
        } => print_json(
            &store
                .conversations()
                .list_conversation_ops(&conversation, after, limit)?,
        ),
        Command::Project(ProjectCommand::Add { name }) => {
            print_json(&store.projects().create_project(&name)?)
        }
        Command::Project(ProjectCommand::List) => print_json(&store.projects().list_projects()?),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use shared::domain::{Role, TenantId, UserId};
use storage::Storage;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Operator tasks against the OKR database")]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/okr.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Creates a tenant with its owner and default board statuses.
    CreateTenant {
        name: String,
        slug: String,
        owner: String,
        #[arg(long)]
        display_name: Option<String>,
    },
    CreateUser {
        slug: String,
        username: String,
        #[arg(long, value_enum, default_value_t = RoleArg::Member)]
        role: RoleArg,
        #[arg(long)]
        display_name: Option<String>,
    },
    /// Adds demo rooms, members, messages and reactions. Rooms that already
    /// exist by name are left alone.
    SeedDemoChat { slug: String },
    ListTenants,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum RoleArg {
    Owner,
    Admin,
    Member,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Owner => Role::Owner,
            RoleArg::Admin => Role::Admin,
            RoleArg::Member => Role::Member,
        }
    }
}

struct DemoMessage {
    author: usize,
    body: &'static str,
    reactions: &'static [(usize, &'static str)],
}

struct DemoRoom {
    name: &'static str,
    /// Indexes into the demo cast; 0 is the tenant owner.
    members: &'static [usize],
    messages: &'static [DemoMessage],
}

const DEMO_USERS: &[(&str, &str)] = &[("alex", "Alex Rivera"), ("sam", "Sam Chen")];

const DEMO_ROOMS: &[DemoRoom] = &[
    DemoRoom {
        name: "general",
        members: &[0, 1, 2],
        messages: &[
            DemoMessage {
                author: 0,
                body: "Welcome everyone! Quarterly objectives are on the board.",
                reactions: &[(1, "🎉"), (2, "🎉")],
            },
            DemoMessage {
                author: 1,
                body: "I moved the onboarding objective to In progress.",
                reactions: &[(0, "👍")],
            },
            DemoMessage {
                author: 2,
                body: "Check-ins for my key results are due Friday.",
                reactions: &[],
            },
        ],
    },
    DemoRoom {
        name: "launch-planning",
        members: &[0, 1],
        messages: &[
            DemoMessage {
                author: 1,
                body: "Draft launch checklist is ready for review.",
                reactions: &[(0, "👀")],
            },
            DemoMessage {
                author: 0,
                body: "Looks good. Let's tie it to the Q3 launch objective.",
                reactions: &[(1, "✅")],
            },
        ],
    },
];

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    ensure_database_dir(&cli.database_url)?;
    let storage = Storage::new(&cli.database_url).await?;
    for line in run(&storage, cli.command).await? {
        println!("{line}");
    }
    Ok(())
}

/// Creates the parent directory of a file-backed SQLite url.
fn ensure_database_dir(database_url: &str) -> Result<()> {
    let Some(path) = database_url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path.starts_with(':') {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(())
}

async fn tenant_id_for(storage: &Storage, slug: &str) -> Result<TenantId> {
    storage
        .tenant_by_slug(slug)
        .await?
        .map(|tenant| tenant.tenant_id)
        .with_context(|| format!("no tenant with slug '{slug}'"))
}

async fn run(storage: &Storage, command: Command) -> Result<Vec<String>> {
    match command {
        Command::CreateTenant {
            name,
            slug,
            owner,
            display_name,
        } => {
            if storage.tenant_by_slug(&slug).await?.is_some() {
                bail!("tenant slug '{slug}' is taken");
            }
            let display_name = display_name.unwrap_or_else(|| owner.clone());
            let (tenant_id, owner_id) = storage
                .bootstrap_tenant(&name, &slug, &owner, &display_name)
                .await?;
            info!(tenant_id = tenant_id.0, %slug, "tenant created");
            Ok(vec![format!(
                "created tenant_id={} owner_user_id={}",
                tenant_id.0, owner_id.0
            )])
        }
        Command::CreateUser {
            slug,
            username,
            role,
            display_name,
        } => {
            let tenant_id = tenant_id_for(storage, &slug).await?;
            if storage.user_by_username(tenant_id, &username).await?.is_some() {
                bail!("user '{username}' already exists in '{slug}'");
            }
            let display_name = display_name.unwrap_or_else(|| username.clone());
            let user_id = storage
                .create_user(tenant_id, &username, &display_name, role.into())
                .await?;
            Ok(vec![format!("created user_id={}", user_id.0)])
        }
        Command::SeedDemoChat { slug } => seed_demo_chat(storage, &slug).await,
        Command::ListTenants => Ok(storage
            .list_tenants()
            .await?
            .into_iter()
            .map(|tenant| format!("{}\t{}\t{}", tenant.tenant_id.0, tenant.slug, tenant.name))
            .collect()),
    }
}

async fn seed_demo_chat(storage: &Storage, slug: &str) -> Result<Vec<String>> {
    let tenant_id = tenant_id_for(storage, slug).await?;
    let owner = storage
        .list_users(tenant_id)
        .await?
        .into_iter()
        .find(|user| user.role == Role::Owner && !user.deactivated)
        .with_context(|| format!("tenant '{slug}' has no active owner"))?;

    let mut cast: Vec<UserId> = vec![owner.user_id];
    for (username, display_name) in DEMO_USERS {
        let user_id = match storage.user_by_username(tenant_id, username).await? {
            Some(user) => user.user_id,
            None => {
                storage
                    .create_user(tenant_id, username, display_name, Role::Member)
                    .await?
            }
        };
        cast.push(user_id);
    }

    let mut report = Vec::new();
    for room in DEMO_ROOMS {
        if storage.room_by_name(tenant_id, room.name).await?.is_some() {
            report.push(format!("skipped room '{}' (exists)", room.name));
            continue;
        }
        let members: Vec<UserId> = room.members.iter().map(|&index| cast[index]).collect();
        let room_id = storage
            .create_room(tenant_id, room.name, false, owner.user_id, &members)
            .await?;
        for message in room.messages {
            let message_id = storage
                .insert_message(room_id, cast[message.author], message.body, &[])
                .await?;
            for &(reactor, emoji) in message.reactions {
                storage
                    .toggle_reaction(message_id, cast[reactor], emoji)
                    .await?;
            }
        }
        info!(room_id = room_id.0, room = room.name, "seeded demo room");
        report.push(format!(
            "seeded room '{}' room_id={} messages={}",
            room.name,
            room_id.0,
            room.messages.len()
        ));
    }
    Ok(report)
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;

use std::collections::HashSet;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use uuid::Uuid;

use role_graph::config::Settings;
use role_graph::events::{init_event_bus, start_activity_listener};
use role_graph::models::{EdgeMetadata, Lookup, NewPermission, NewRole, NewUser, PermissionRef, RoleRef};
use role_graph::{db, AccessQuery, AdminService, AuthorizationEngine, GraphStore, Match, MutationGuard, SqliteStore};

#[derive(Parser, Debug)]
#[command(author, version, about = "role graph administration and access checks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Entity arguments accept a UUID, a slug or a name.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    Migrate,
    CreateUser {
        name: String,
    },
    CreateRole {
        name: String,
        #[arg(long)]
        slug: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    CreatePermission {
        name: String,
        #[arg(long)]
        slug: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        parent: Option<String>,
    },
    /// Assign a role to a user
    AssignRole {
        user: String,
        role: String,
        #[arg(long)]
        notes: Option<String>,
    },
    RevokeRole {
        user: String,
        role: String,
    },
    /// Grant a permission directly to a user
    GrantPermission {
        user: String,
        permission: String,
        #[arg(long)]
        notes: Option<String>,
    },
    RevokePermission {
        user: String,
        permission: String,
    },
    /// Grant a permission to a role
    RoleGrant {
        role: String,
        permission: String,
        #[arg(long)]
        notes: Option<String>,
    },
    RoleRevoke {
        role: String,
        permission: String,
    },
    /// Make PARENT a parent role of CHILD
    AddParent {
        parent: String,
        child: String,
    },
    RemoveParent {
        parent: String,
        child: String,
    },
    /// Re-parent a permission; omit --parent to make it a root
    SetPermissionParent {
        permission: String,
        #[arg(long)]
        parent: Option<String>,
    },
    /// Check roles and/or permissions for a user
    Check {
        user: String,
        #[arg(long = "role")]
        roles: Vec<String>,
        #[arg(long = "permission")]
        permissions: Vec<String>,
        /// Require every role and permission instead of any one
        #[arg(long)]
        all: bool,
    },
    Ancestors {
        #[arg(value_enum)]
        kind: Kind,
        name: String,
    },
    Descendants {
        #[arg(value_enum)]
        kind: Kind,
        name: String,
    },
    /// Effective roles and permissions of a user
    Effective {
        user: String,
    },
    ListRoles,
    ListPermissions,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Kind {
    Role,
    Permission,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;
    let pool = db::init(&settings).await?;

    if let Commands::Migrate = cli.command {
        println!("Migrations applied");
        return Ok(());
    }

    let store: Arc<dyn GraphStore> = Arc::new(SqliteStore::new(pool.clone()));
    let engine = AuthorizationEngine::new(store.clone()).with_inheritance(settings.permission_inheritance);
    let guard = MutationGuard::new(store.clone()).with_retries(settings.conflict_retries);

    let (event_bus, event_rx) = init_event_bus();
    let listener = tokio::spawn(start_activity_listener(event_rx, pool.clone()));
    let admin = AdminService::new(store, guard, event_bus);

    let result = run(cli.command, &admin, &engine).await;

    // Dropping the last sender lets the listener flush and exit.
    drop(admin);
    listener.await?;

    result
}

async fn run(command: Commands, admin: &AdminService, engine: &AuthorizationEngine) -> anyhow::Result<()> {
    match command {
        Commands::Migrate => {}
        Commands::CreateUser { name } => print_json(&admin.create_user(NewUser::new(name)).await?)?,
        Commands::CreateRole { name, slug, description } => {
            let new = NewRole { name, slug, description };
            print_json(&admin.create_role(new).await?)?;
        }
        Commands::CreatePermission { name, slug, description, parent } => {
            let parent_id = match parent {
                Some(parent) => Some(engine.resolve_permission(&Lookup::parse(&parent)).await?.id),
                None => None,
            };
            let new = NewPermission { name, slug, description, parent_id };
            print_json(&admin.create_permission(new).await?)?;
        }
        Commands::AssignRole { user, role, notes } => {
            let edge = admin
                .assign_role(&Lookup::parse(&user), &Lookup::parse(&role), metadata(notes))
                .await?;
            print_json(&edge)?;
        }
        Commands::RevokeRole { user, role } => {
            print_json(&admin.revoke_role(&Lookup::parse(&user), &Lookup::parse(&role)).await?)?;
        }
        Commands::GrantPermission { user, permission, notes } => {
            let edge = admin
                .grant_permission(&Lookup::parse(&user), &Lookup::parse(&permission), metadata(notes))
                .await?;
            print_json(&edge)?;
        }
        Commands::RevokePermission { user, permission } => {
            let edge = admin
                .revoke_permission(&Lookup::parse(&user), &Lookup::parse(&permission))
                .await?;
            print_json(&edge)?;
        }
        Commands::RoleGrant { role, permission, notes } => {
            let edge = admin
                .grant_role_permission(&Lookup::parse(&role), &Lookup::parse(&permission), metadata(notes))
                .await?;
            print_json(&edge)?;
        }
        Commands::RoleRevoke { role, permission } => {
            let edge = admin
                .revoke_role_permission(&Lookup::parse(&role), &Lookup::parse(&permission))
                .await?;
            print_json(&edge)?;
        }
        Commands::AddParent { parent, child } => {
            let edge = admin
                .add_role_parent(&Lookup::parse(&parent), &Lookup::parse(&child), EdgeMetadata::new())
                .await?;
            print_json(&edge)?;
        }
        Commands::RemoveParent { parent, child } => {
            let edge = admin
                .remove_role_parent(&Lookup::parse(&parent), &Lookup::parse(&child))
                .await?;
            print_json(&edge)?;
        }
        Commands::SetPermissionParent { permission, parent } => {
            let parent = parent.as_deref().map(PermissionRef::parse);
            let change = admin
                .set_permission_parent(&Lookup::parse(&permission), parent.as_ref())
                .await?;
            print_json(&change)?;
        }
        Commands::Check { user, roles, permissions, all } => {
            let mut query = AccessQuery::new().with_mode(if all { Match::All } else { Match::Any });
            for role in &roles {
                query = query.role(RoleRef::parse(role));
            }
            for permission in &permissions {
                query = query.permission(PermissionRef::parse(permission));
            }
            let allowed = engine.check(&Lookup::parse(&user), &query).await?;
            println!("{}", if allowed { "allowed" } else { "denied" });
        }
        Commands::Ancestors { kind, name } => {
            let ids = match kind {
                Kind::Role => engine.role_ancestors(&Lookup::parse(&name)).await?,
                Kind::Permission => engine.permission_ancestors(&Lookup::parse(&name)).await?,
            };
            print_names(engine.store().as_ref(), kind, ids).await?;
        }
        Commands::Descendants { kind, name } => {
            let ids = match kind {
                Kind::Role => engine.role_descendants(&Lookup::parse(&name)).await?,
                Kind::Permission => engine.permission_descendants(&Lookup::parse(&name)).await?,
            };
            print_names(engine.store().as_ref(), kind, ids).await?;
        }
        Commands::Effective { user } => {
            let principal = engine.principal(&Lookup::parse(&user)).await?;
            println!("user {} ({})", user, principal.user_id);
            println!("roles:");
            print_names(engine.store().as_ref(), Kind::Role, principal.roles).await?;
            println!("permissions:");
            print_names(engine.store().as_ref(), Kind::Permission, principal.permissions).await?;
        }
        Commands::ListRoles => {
            println!("{:<38} {:<24} {}", "Id", "Slug", "Name");
            for role in admin.list_roles().await? {
                println!("{:<38} {:<24} {}", role.id, role.slug, role.name);
            }
        }
        Commands::ListPermissions => {
            println!("{:<38} {:<24} {:<38} {}", "Id", "Slug", "Parent", "Name");
            for permission in admin.list_permissions().await? {
                let parent = permission.parent_id.map(|id| id.to_string()).unwrap_or_default();
                println!("{:<38} {:<24} {:<38} {}", permission.id, permission.slug, parent, permission.name);
            }
        }
    }

    Ok(())
}

fn metadata(notes: Option<String>) -> EdgeMetadata {
    match notes {
        Some(notes) => EdgeMetadata::new().with_notes(notes),
        None => EdgeMetadata::new(),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn print_names(store: &dyn GraphStore, kind: Kind, ids: HashSet<Uuid>) -> anyhow::Result<()> {
    let mut names = Vec::with_capacity(ids.len());
    for id in ids {
        let name = match kind {
            Kind::Role => store.get_role(id).await?.map(|r| r.slug),
            Kind::Permission => store.get_permission(id).await?.map(|p| p.slug),
        };
        names.push(name.unwrap_or_else(|| id.to_string()));
    }
    names.sort();
    for name in names {
        println!("  {name}");
    }
    Ok(())
}

fn load_env() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    let _ = dotenvy::from_path(crate_env);
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr);

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

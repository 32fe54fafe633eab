//! deferq CLI: operator interface to the deferred-action ledger.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use deferq::config::Config;
use deferq::host::{
    DispatchAs, DispatchFailure, DispatchSink, FeedbackSink, Host, PermissionOracle,
    PlaceholderResolver, PresenceSource,
};
use deferq::model::{ExecutionContext, Identity, IdentityKey, NewAction, SoundCue};
use deferq::queue::Missing;
use deferq::telemetry::init_logging;
use deferq::{
    AddOutcome, Caller, DeliveryOutcome, IdentityRef, ListOutcome, QueueManager, RemoveOutcome,
    RemoveTarget, storage,
};

#[derive(Parser)]
#[command(name = "deferq", about = "Queue commands for identities that are not online")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List identities with queued actions
    List {
        #[arg(long, default_value_t = 1)]
        page: usize,
    },
    /// Queue an action for an identity (key or display name)
    Add {
        identity: String,
        /// Command text; placeholders are resolved at delivery
        payload: String,
        /// Who runs the command: system or target
        #[arg(long = "as", default_value = "system", value_parser = parse_context)]
        run_as: ExecutionContext,
        /// Permission the target must hold at delivery
        #[arg(long)]
        permission: Option<String>,
        /// Message shown to the target before the command runs
        #[arg(long)]
        message: Option<String>,
        /// Sound played to the target
        #[arg(long)]
        sound: Option<String>,
        #[arg(long, requires = "sound")]
        volume: Option<f32>,
        #[arg(long, requires = "sound")]
        pitch: Option<f32>,
        /// Keep the action queued after delivery
        #[arg(long)]
        recurring: bool,
    },
    /// Remove one action by identifier, or all with `*`
    Remove { identity: String, target: String },
    /// Show one action by identifier
    Show { identifier: String },
    /// Simulate an identity connecting and deliver its actions to this console
    Connect { key: IdentityKey, name: String },
}

fn parse_context(raw: &str) -> Result<ExecutionContext, String> {
    ExecutionContext::parse_lenient(raw).ok_or_else(|| format!("expected system or target, got {raw}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_logging(&config.log_level)?;

    let online = match &cli.command {
        Command::Connect { key, name } => Some(Identity::online(*key, name.clone())),
        _ => None,
    };
    let host = Host::from_shared(Arc::new(ConsoleHost { online }));
    let store = storage::open(&config.storage).await?;
    let queue = QueueManager::new(store, host, config.settings.clone());

    match cli.command {
        Command::List { page } => cmd_list(&queue, page).await,
        Command::Add {
            identity,
            payload,
            run_as,
            permission,
            message,
            sound,
            volume,
            pitch,
            recurring,
        } => {
            let mut draft = NewAction::new(payload).run_as(run_as).recurring(recurring);
            if let Some(permission) = permission {
                draft = draft.permission(permission);
            }
            if let Some(message) = message {
                draft = draft.message(message);
            }
            if let Some(sound) = sound {
                let sound = SoundCue::normalize_sound(&sound)
                    .ok_or_else(|| anyhow::anyhow!("invalid sound id: {sound}"))?;
                draft = draft.sound(
                    SoundCue::new(sound)
                        .volume(volume.unwrap_or(1.0))
                        .pitch(pitch.unwrap_or(1.0)),
                );
            }
            cmd_add(&queue, &identity, draft).await
        }
        Command::Remove { identity, target } => cmd_remove(&queue, &identity, &target).await,
        Command::Show { identifier } => cmd_show(&queue, &identifier).await,
        Command::Connect { key, name } => cmd_connect(&queue, key, name).await,
    }
}

async fn cmd_list(queue: &QueueManager, page: usize) -> anyhow::Result<()> {
    let page_size = queue.settings().page_size;
    match queue.list_actions(page, page_size).await? {
        ListOutcome::Empty => println!("No queued actions."),
        ListOutcome::InvalidPage {
            requested,
            total_pages,
        } => {
            anyhow::bail!("page {requested} does not exist (1-{total_pages})")
        }
        ListOutcome::Page(page) => {
            for entry in &page.entries {
                println!("{} ({})", entry.identity_key, entry.display_name);
                for action in &entry.actions {
                    println!("  {:<8}  {}", action.identifier, action.payload);
                }
            }
            match page.next_page {
                Some(next) => println!(
                    "\npage {}/{} ({} identities), next: --page {next}",
                    page.page, page.total_pages, page.total_entries
                ),
                None => println!(
                    "\npage {}/{} ({} identities), end of list",
                    page.page, page.total_pages, page.total_entries
                ),
            }
        }
    }
    Ok(())
}

async fn cmd_add(queue: &QueueManager, identity: &str, draft: NewAction) -> anyhow::Result<()> {
    let reference = IdentityRef::parse(identity);
    match queue.add_action(&reference, draft, &Caller::System).await? {
        AddOutcome::Queued {
            identity,
            identifier,
        } => println!("Queued {identifier} for {} ({})", identity.display_name, identity.key),
        AddOutcome::DeliveredImmediately {
            identity,
            identifier,
            retained,
        } => {
            println!("{} is online; ran {identifier} immediately", identity.display_name);
            if retained {
                println!("{identifier} is recurring and stays queued");
            }
        }
        AddOutcome::Denied => anyhow::bail!("not allowed to queue actions"),
        AddOutcome::IdentityNotFound { reference } => {
            anyhow::bail!("no identity matches '{reference}'")
        }
    }
    Ok(())
}

async fn cmd_remove(queue: &QueueManager, identity: &str, target: &str) -> anyhow::Result<()> {
    let reference = IdentityRef::parse(identity);
    match queue
        .remove_action(&reference, &RemoveTarget::parse(target))
        .await?
    {
        RemoveOutcome::Removed {
            identity,
            removed,
            remaining,
        } => {
            let ids: Vec<String> = removed.iter().map(ToString::to_string).collect();
            println!(
                "Removed {} from {} ({remaining} left)",
                ids.join(", "),
                identity.display_name
            );
        }
        RemoveOutcome::NotFound(Missing::Identity) => {
            anyhow::bail!("nothing is queued for '{identity}'")
        }
        RemoveOutcome::NotFound(Missing::Action) => {
            anyhow::bail!("'{identity}' has no action matching '{target}'")
        }
    }
    Ok(())
}

async fn cmd_show(queue: &QueueManager, identifier: &str) -> anyhow::Result<()> {
    let Some((entry, action)) = queue.find_action(identifier).await? else {
        anyhow::bail!("no action with identifier '{identifier}'");
    };

    let or_unset = |s: &str| if s.is_empty() { "UNSET".to_string() } else { s.to_string() };
    println!("Identifier:  {}", action.identifier);
    println!("Owner:       {} ({})", entry.display_name, entry.identity_key);
    println!("Payload:     {}", action.payload);
    println!("Runs as:     {}", action.execution_context);
    println!("Permission:  {}", or_unset(&action.required_permission));
    println!("Message:     {}", or_unset(&action.feedback_message));
    match &action.audio_cue {
        Some(cue) => println!(
            "Sound:       {} (volume {}, pitch {})",
            cue.sound, cue.volume, cue.pitch
        ),
        None => println!("Sound:       UNSET"),
    }
    println!("Recurring:   {}", action.recurring);
    Ok(())
}

async fn cmd_connect(queue: &QueueManager, key: IdentityKey, name: String) -> anyhow::Result<()> {
    let engine = queue.delivery_engine();
    match engine.identity_connected(key, name).await?? {
        DeliveryOutcome::Cancelled => println!("Identity left before delivery."),
        DeliveryOutcome::NothingQueued => println!("Nothing queued."),
        DeliveryOutcome::Delivered(report) => println!(
            "Ran {} action(s), {} denied, {} dispatch failure(s), {} still queued",
            report.executed.len(),
            report.denied.len(),
            report.dispatch_failures.len(),
            report.remaining
        ),
    }
    Ok(())
}

/// Host backed by this terminal. At most one identity is online: the one
/// passed to `connect`. Every permission is granted.
struct ConsoleHost {
    online: Option<Identity>,
}

impl PresenceSource for ConsoleHost {
    fn online_by_key(&self, key: IdentityKey) -> Option<Identity> {
        self.online.clone().filter(|i| i.key == key)
    }

    fn online_by_name(&self, name: &str) -> Option<Identity> {
        self.online
            .clone()
            .filter(|i| i.display_name.eq_ignore_ascii_case(name))
    }

    fn known_by_key(&self, key: IdentityKey) -> Option<String> {
        self.online_by_key(key).map(|i| i.display_name)
    }

    fn known_by_name(&self, name: &str) -> Option<IdentityKey> {
        self.online_by_name(name).map(|i| i.key)
    }
}

impl DispatchSink for ConsoleHost {
    fn dispatch(&self, runner: DispatchAs, command: &str) -> Result<(), DispatchFailure> {
        match runner {
            DispatchAs::System => println!("[system] {command}"),
            DispatchAs::Target(key) => println!("[{key}] {command}"),
        }
        Ok(())
    }
}

impl PermissionOracle for ConsoleHost {
    fn has_permission(&self, _key: IdentityKey, _permission: &str) -> bool {
        true
    }
}

impl PlaceholderResolver for ConsoleHost {
    fn resolve(&self, text: &str, identity: &Identity) -> String {
        const TOKEN: &str = "{playername}";
        let lower = text.to_ascii_lowercase();
        let mut out = String::with_capacity(text.len());
        let mut rest = 0;
        while let Some(found) = lower[rest..].find(TOKEN) {
            let start = rest + found;
            out.push_str(&text[rest..start]);
            out.push_str(&identity.display_name);
            rest = start + TOKEN.len();
        }
        out.push_str(&text[rest..]);
        out
    }
}

impl FeedbackSink for ConsoleHost {
    fn send_message(&self, key: IdentityKey, message: &str) {
        println!("[message to {key}] {message}");
    }

    fn play_sound(&self, key: IdentityKey, cue: &SoundCue) {
        println!(
            "[sound for {key}] {} (volume {}, pitch {})",
            cue.sound, cue.volume, cue.pitch
        );
    }
}

use anyhow::{anyhow, bail, Context, Result};
use applock_core::apps::{search, AppRegistry};
use applock_core::device::{import_device_secret, initialize_device_secret, DeviceSecretStatus};
use applock_core::gate::{GateDecision, LaunchGate};
use applock_core::partners::PartnerRegistry;
use applock_core::paths::{self, SETTINGS_FILE};
use applock_core::policy::{UnlockOutcome, UnlockPolicy};
use applock_core::settings::{load_settings, save_settings, LockSettings};
use applock_core::store::{FileStore, LockStore};
use applock_core::totp::{self, CodeSnapshot};
use applock_core::{generate_secret, LockedApp, Secret};
use chrono::{DateTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "applock")]
#[command(about = "Lock apps behind codes only an accountability partner can give", long_about = None)]
struct Cli {
    /// Data directory (default: $APPLOCK_DATA_DIR or the platform data dir)
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Evaluate codes and unlock windows at this Unix time instead of now
    #[arg(long, global = true, value_name = "UNIX_SECS", allow_hyphen_values = true)]
    at: Option<i64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory and the device secret
    Init {
        /// Use this Base32 secret instead of generating one
        #[arg(long, value_name = "SECRET")]
        import: Option<String>,
    },

    /// Device secret
    Secret {
        #[command(subcommand)]
        action: SecretCommand,
    },

    /// Show the code for a secret or a partner
    Code {
        #[arg(required_unless_present = "partner")]
        secret: Option<String>,

        /// Partner label to show the code for
        #[arg(long, conflicts_with = "secret")]
        partner: Option<String>,

        /// Refresh every second until interrupted
        #[arg(long)]
        watch: bool,
    },

    /// Check a code against a secret
    Verify { secret: String, code: String },

    /// Accountability partners
    Partner {
        #[command(subcommand)]
        action: PartnerCommand,
    },

    /// Lockable apps
    App {
        #[command(subcommand)]
        action: AppCommand,
    },

    /// Decide whether a launch of PACKAGE should be blocked
    Gate { package: String },
}

#[derive(Subcommand)]
enum SecretCommand {
    /// Print the device secret
    Show,
    /// Print a fresh random secret without storing it
    Generate,
}

#[derive(Subcommand)]
enum PartnerCommand {
    /// Add a partner's secret
    Add { label: String, secret: String },

    /// List partners
    List,

    /// Remove a partner by label or by list index
    Remove {
        #[arg(required_unless_present = "index")]
        label: Option<String>,

        #[arg(long, conflicts_with = "label")]
        index: Option<usize>,
    },

    /// Print the key that lifts a lock made with this partner's secret
    Override { label: String },
}

#[derive(Subcommand)]
enum AppCommand {
    /// Add an app, or rename a known one
    Register { package: String, name: String },

    /// List apps
    List {
        /// Filter by name or package
        #[arg(long)]
        query: Option<String>,
    },

    /// Show lock state of one app
    Status { package: String },

    /// Lock an app, provisioning a secret if it has none
    Lock { package: String },

    /// Unlock for the temporary window with a partner code
    Unlock { package: String, code: String },

    /// Remove the lock for good with a partner code
    Release { package: String, code: String },

    /// Remove the lock for good with an override key
    Override { package: String, key: String },

    /// Require partner codes, with a given or fresh secret
    TotpEnable {
        package: String,

        #[arg(long)]
        secret: Option<String>,
    },

    /// Stop requiring partner codes
    TotpDisable { package: String },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AppView {
    package_identifier: String,
    display_name: String,
    is_locked: bool,
    is_totp_enabled: bool,
    blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    unlock_remaining_secs: Option<i64>,
}

impl AppView {
    fn new(app: &LockedApp, policy: &UnlockPolicy, now: DateTime<Utc>) -> Self {
        Self {
            package_identifier: app.package_identifier.clone(),
            display_name: app.display_name.clone(),
            is_locked: app.is_locked,
            is_totp_enabled: app.is_totp_enabled,
            blocked: policy.is_blocked(app, now),
            unlock_remaining_secs: policy
                .unlock_window_remaining(app, now)
                .map(|left| left.num_seconds()),
        }
    }
}

#[derive(Serialize)]
struct PartnerView<'a> {
    index: usize,
    label: &'a str,
}

struct Workspace {
    store: Arc<dyn LockStore>,
    settings: LockSettings,
    data_dir: PathBuf,
}

impl Workspace {
    fn open(data_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match data_dir {
            Some(dir) => dir,
            None => paths::data_dir()?,
        };
        let store = FileStore::open(&data_dir)
            .with_context(|| format!("opening data directory {}", data_dir.display()))?;
        let settings = load_settings(&data_dir.join(SETTINGS_FILE))
            .context("reading settings.json")?;
        debug!(dir = %data_dir.display(), skew_steps = settings.skew_steps, "workspace opened");
        Ok(Self {
            store: Arc::new(store),
            settings,
            data_dir,
        })
    }

    fn apps(&self) -> AppRegistry {
        AppRegistry::new(self.store.clone(), UnlockPolicy::from_settings(&self.settings))
    }

    fn partners(&self) -> PartnerRegistry {
        PartnerRegistry::new(self.store.clone(), &self.settings)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn resolve_now(at: Option<i64>) -> Result<DateTime<Utc>> {
    match at {
        Some(secs) => Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| anyhow!("timestamp {secs} out of range")),
        None => Ok(Utc::now()),
    }
}

fn print_snapshot(snapshot: &CodeSnapshot) {
    println!("{}  ({}s left)", snapshot.code, snapshot.remaining_seconds);
}

async fn watch_code(secret: &Secret) -> Result<()> {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = ticker.tick() => print_snapshot(&totp::snapshot(secret, Utc::now())),
            res = &mut ctrl_c => {
                res.context("waiting for interrupt")?;
                debug!("code watch interrupted");
                return Ok(());
            }
        }
    }
}

fn describe_outcome(outcome: UnlockOutcome) -> &'static str {
    match outcome {
        UnlockOutcome::Verified { .. } => "code accepted",
        UnlockOutcome::Manual => "no code required",
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let Cli {
        data_dir,
        at,
        command,
    } = Cli::parse();
    let now = resolve_now(at)?;

    match command {
        Commands::Init { import } => {
            let ws = Workspace::open(data_dir)?;
            let settings_path = ws.data_dir.join(SETTINGS_FILE);
            if !settings_path.exists() {
                save_settings(&settings_path, &ws.settings)?;
                info!(path = %settings_path.display(), "default settings written");
            }
            match import {
                Some(text) => {
                    let secret = Secret::parse(&text).context("invalid secret")?;
                    import_device_secret(ws.store.as_ref(), &secret)?;
                    println!("device secret imported");
                }
                None => match initialize_device_secret(ws.store.as_ref())? {
                    DeviceSecretStatus::Generated(secret) => {
                        println!("device secret generated: {}", secret.as_str());
                    }
                    DeviceSecretStatus::Existing(_) => println!("device secret already exists"),
                },
            }
        }
        Commands::Secret { action } => match action {
            SecretCommand::Show => {
                let secret = Workspace::open(data_dir)?
                    .store
                    .device_secret()?
                    .ok_or_else(|| anyhow!("no device secret; run `applock init` first"))?;
                println!("{}", secret.as_str());
            }
            SecretCommand::Generate => println!("{}", generate_secret().as_str()),
        },
        Commands::Code {
            secret,
            partner,
            watch,
        } => {
            let secret = match (secret, partner) {
                (Some(text), _) => Secret::parse(&text).context("invalid secret")?,
                (None, Some(label)) => Workspace::open(data_dir)?.partners().get(&label)?.secret,
                (None, None) => bail!("give a secret or --partner"),
            };
            if watch {
                watch_code(&secret).await?;
            } else {
                print_snapshot(&totp::snapshot(&secret, now));
            }
        }
        Commands::Verify { secret, code } => {
            let secret = Secret::parse(&secret).context("invalid secret")?;
            let code = code.trim();
            if !totp::is_well_formed(code) {
                bail!("code must be exactly 6 digits");
            }
            let skew_steps = Workspace::open(data_dir)?.settings.skew_steps;
            match totp::verify_with_drift(&secret, code, now, skew_steps) {
                Some(drift) => println!("valid (drift {drift})"),
                None => {
                    debug!(skew_steps, at = now.timestamp(), "no step in the window matched");
                    bail!("code does not match");
                }
            }
        }
        Commands::Partner { action } => run_partner(action, &Workspace::open(data_dir)?)?,
        Commands::App { action } => run_app(action, &Workspace::open(data_dir)?, now)?,
        Commands::Gate { package } => {
            let ws = Workspace::open(data_dir)?;
            let apps = ws.store.load_apps()?;
            let mut gate = LaunchGate::new(&ws.settings);
            let decision = gate.check(&package, &apps, now);
            debug!(%package, ?decision, "launch checked");
            let decision = match decision {
                GateDecision::Ignore => "ignore",
                GateDecision::Allow => "allow",
                GateDecision::Debounced => "debounced",
                GateDecision::Block => "block",
            };
            println!("{decision}");
        }
    }
    Ok(())
}

fn run_partner(action: PartnerCommand, ws: &Workspace) -> Result<()> {
    let partners = ws.partners();
    match action {
        PartnerCommand::Add { label, secret } => {
            partners.add(&label, &secret)?;
            println!("added partner {}", label.trim());
        }
        PartnerCommand::List => {
            let entries = partners.list()?;
            let views: Vec<PartnerView<'_>> = entries
                .iter()
                .enumerate()
                .map(|(index, p)| PartnerView {
                    index,
                    label: &p.label,
                })
                .collect();
            print_json(&views)?;
        }
        PartnerCommand::Remove { label, index } => {
            let removed = match (label, index) {
                (_, Some(index)) => partners.remove_at(index)?,
                (Some(label), None) => partners.remove_by_label(&label)?,
                (None, None) => bail!("give a partner label or --index"),
            };
            println!("removed partner {}", removed.label);
        }
        PartnerCommand::Override { label } => {
            println!("{}", partners.override_key(&label)?);
        }
    }
    Ok(())
}

fn run_app(action: AppCommand, ws: &Workspace, now: DateTime<Utc>) -> Result<()> {
    let apps = ws.apps();
    let policy = apps.policy();
    match action {
        AppCommand::Register { package, name } => {
            let app = apps.register(&package, &name)?;
            print_json(&AppView::new(&app, policy, now))?;
        }
        AppCommand::List { query } => {
            let all = apps.list()?;
            let views: Vec<AppView> = search(&all, query.as_deref().unwrap_or(""))
                .into_iter()
                .map(|app| AppView::new(app, policy, now))
                .collect();
            print_json(&views)?;
        }
        AppCommand::Status { package } => {
            let app = apps.get(&package)?;
            print_json(&AppView::new(&app, policy, now))?;
        }
        AppCommand::Lock { package } => {
            let (app, provisioned) = apps.lock(&package)?;
            println!("locked {}", app.package_identifier);
            if let Some(secret) = provisioned {
                println!("partner secret: {}", secret.as_str());
            }
        }
        AppCommand::Unlock { package, code } => {
            let (app, outcome) = apps.unlock(&package, &code, now)?;
            let minutes = policy.unlock_window().num_minutes();
            println!(
                "{}: {}; unlocked for {minutes} minutes",
                app.package_identifier,
                describe_outcome(outcome)
            );
        }
        AppCommand::Release { package, code } => {
            let (app, outcome) = apps.release(&package, &code, now)?;
            println!(
                "{}: {}; lock removed",
                app.package_identifier,
                describe_outcome(outcome)
            );
        }
        AppCommand::Override { package, key } => {
            let app = apps.override_unlock(&package, &key)?;
            println!("{}: override accepted; lock removed", app.package_identifier);
        }
        AppCommand::TotpEnable { package, secret } => {
            let secret = match secret {
                Some(text) => Secret::parse(&text).context("invalid secret")?,
                None => generate_secret(),
            };
            let app = apps.enable_totp(&package, secret.clone())?;
            println!("locked {}", app.package_identifier);
            println!("partner secret: {}", secret.as_str());
        }
        AppCommand::TotpDisable { package } => {
            let app = apps.disable_totp(&package)?;
            println!("codes no longer required for {}", app.package_identifier);
        }
    }
    Ok(())
}

//! CLI entry point for `tempbox`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{CommandFactory, Parser, Subcommand};
use tokio::sync::{watch, Mutex};

use tempbox::backup::Backup;
use tempbox::config::Config;
use tempbox::model::message::Message;
use tempbox::provider::{HttpProvider, MailProvider};
use tempbox::search::{DateFilter, FilterSpec, StatusFilter, View};
use tempbox::session::Session;
use tempbox::store::FileEngine;
use tempbox::sync::TabSync;

#[derive(Parser)]
#[command(name = "tempbox", version, about = "Disposable mailbox client with a local cache")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory (overrides the config file)
    #[arg(long, global = true, value_name = "DIR", env = "TEMPBOX_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new address for the active account (clears its messages)
    Generate,
    /// Fetch the active account's inbox once
    Fetch,
    /// List messages of the active account
    List {
        /// all, read, unread
        #[arg(long, default_value = "all")]
        status: StatusFilter,
        /// all, today, week, month, custom
        #[arg(long, default_value = "all")]
        date: DateFilter,
        /// Start of a custom range (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// End of a custom range (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Text to look for in sender, subject, or body
        #[arg(long, short)]
        search: Option<String>,
        /// Page of the read list
        #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
        inbox_page: i64,
        /// Page of the unread list
        #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
        updates_page: i64,
        #[arg(long)]
        json: bool,
    },
    /// Show a message and mark it read
    Read { id: String },
    /// Toggle the starred flag of a message
    Star { id: String },
    /// Delete a message permanently
    Delete { id: String },
    /// Delete every read message of the active account
    DeleteRead,
    /// Delete every message of the active account
    Clear,
    /// Mark every message of the active account read
    MarkAllRead,
    /// List accounts
    Accounts {
        #[arg(long)]
        json: bool,
    },
    /// Register a new account
    AccountAdd {
        name: String,
        #[arg(long)]
        email: Option<String>,
    },
    /// Make another account active
    Switch { id: String },
    /// Write a backup (stdout when no file is given)
    Export { output: Option<PathBuf> },
    /// Restore a backup, replacing local state
    Import { path: PathBuf },
    /// Show usage statistics
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Refresh periodically and keep in sync with other sessions until Ctrl-C
    Watch {
        /// Seconds between inbox polls; saved as the new refresh interval
        #[arg(long, value_name = "SECS")]
        every: Option<u64>,
    },
    /// Toggle dark mode
    DarkMode,
    /// Write the default configuration file
    InitConfig,
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = tempbox::config::load_config();
    if let Some(dir) = cli.data_dir.clone() {
        config.general.data_dir = Some(dir);
    }

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Completions { shell } => return cmd_completions(shell),
        Commands::Manpage => return cmd_manpage(),
        Commands::InitConfig => return cmd_init_config(&config),
        _ => {}
    }

    let mut session = open_session(&config)?;
    let provider = || -> anyhow::Result<HttpProvider> {
        Ok(HttpProvider::new(
            &config.provider.base_url,
            config.provider.request_timeout(),
        )?)
    };

    match cli.command {
        Commands::Generate => {
            let address = session.generate_address(&provider()?).await?;
            println!("{address}");
        }
        Commands::Fetch => cmd_fetch(&mut session, &provider()?).await?,
        Commands::List {
            status,
            date,
            from,
            to,
            search,
            inbox_page,
            updates_page,
            json,
        } => {
            let spec = FilterSpec {
                status,
                date,
                date_from: from,
                date_to: to,
                search: search.unwrap_or_default(),
            };
            cmd_list(&mut session, spec, inbox_page, updates_page, json)?;
        }
        Commands::Read { id } => {
            let message = session.open_message(&id)?;
            print_message(&message);
        }
        Commands::Star { id } => {
            let starred = session.toggle_star(&id)?;
            println!("{}", if starred { "starred" } else { "unstarred" });
        }
        Commands::Delete { id } => {
            session.delete_message(&id)?;
            println!("deleted {id}");
        }
        Commands::DeleteRead => println!("deleted {} read message(s)", session.delete_read()?),
        Commands::Clear => println!("deleted {} message(s)", session.clear_account()?),
        Commands::MarkAllRead => println!("marked {} message(s) read", session.mark_all_read()?),
        Commands::Accounts { json } => cmd_accounts(&session, json)?,
        Commands::AccountAdd { name, email } => {
            let id = session.add_account(&name, email.as_deref())?;
            println!("{id}");
        }
        Commands::Switch { id } => {
            session.switch_account(&id)?;
            println!("active account: {id}");
        }
        Commands::Export { output } => {
            let text = session.export_backup()?.to_json()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, text)
                        .with_context(|| format!("writing {}", path.display()))?;
                    eprintln!("Backup written to {}", path.display());
                }
                None => println!("{text}"),
            }
        }
        Commands::Import { path } => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            session.import_backup(Backup::parse(&text)?)?;
            println!("backup restored");
        }
        Commands::Stats { json } => cmd_stats(&session, json)?,
        Commands::Watch { every } => {
            if let Some(secs) = every {
                session.set_refresh_interval(secs.saturating_mul(1_000))?;
            }
            cmd_watch(session, provider()?, &config).await?
        }
        Commands::DarkMode => {
            let on = session.toggle_dark_mode()?;
            println!("dark mode {}", if on { "on" } else { "off" });
        }
        Commands::Completions { .. } | Commands::Manpage | Commands::InitConfig => {}
    }
    Ok(())
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = tempbox::config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "tempbox.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

fn open_session(config: &Config) -> anyhow::Result<Session> {
    let dir = tempbox::config::data_dir(config);
    let engine = Arc::new(FileEngine::new(&dir));
    let session = Session::open(engine, config.view.page_size)
        .with_context(|| format!("opening store in {}", dir.display()))?
        .with_storage_limit(config.storage.max_storage_bytes);
    Ok(session)
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "tempbox", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

fn cmd_init_config(config: &Config) -> anyhow::Result<()> {
    let path = tempbox::config::save_config(config)?;
    println!("{}", path.display());
    Ok(())
}

async fn cmd_fetch(session: &mut Session, provider: &dyn MailProvider) -> anyhow::Result<()> {
    if session.accounts().active_record().email_address.is_none() {
        anyhow::bail!("the active account has no address yet; run `tempbox generate` first");
    }
    let outcome = session.refresh(provider).await?;
    println!(
        "{} new, {} already stored, {} deleted earlier",
        outcome.inserted, outcome.duplicates, outcome.tombstoned
    );
    Ok(())
}

fn cmd_list(
    session: &mut Session,
    spec: FilterSpec,
    inbox_page: i64,
    updates_page: i64,
    json: bool,
) -> anyhow::Result<()> {
    session.apply_filter(spec)?;
    session.change_page(View::Inbox, inbox_page)?;
    session.change_page(View::Updates, updates_page)?;
    let view = session.view()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    let cursors = view.cursors;
    println!();
    println!(
        "  Unread ({}), page {}/{}",
        view.unread_total_count, cursors.updates.page, cursors.updates.total_pages
    );
    print_message_table(&view.unread_items);
    println!(
        "  Read ({}), page {}/{}",
        view.read_total_count, cursors.inbox.page, cursors.inbox.total_pages
    );
    print_message_table(&view.read_items);
    Ok(())
}

fn print_message_table(messages: &[Message]) {
    if messages.is_empty() {
        println!("  (none)");
        println!();
        return;
    }
    println!(
        "  {:<2} {:<17} {:<25} {:<40} {}",
        "", "Date", "From", "Subject", "Id"
    );
    println!("  {}", "-".repeat(110));
    for m in messages {
        let date = m.created_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M");
        let from: String = m.from.chars().take(24).collect();
        let subject: String = m.subject.chars().take(39).collect();
        let star = if m.starred { "*" } else { "" };
        println!(
            "  {:<2} {:<17} {:<25} {:<40} {}",
            star,
            date.to_string(),
            from,
            subject,
            m.id
        );
    }
    println!();
}

fn print_message(m: &Message) {
    println!("From:    {}", m.from);
    println!("Subject: {}", m.subject);
    println!("Date:    {}", m.created_at.with_timezone(&chrono::Local).to_rfc2822());
    println!();
    println!("{}", m.body);
}

fn cmd_accounts(session: &Session, json: bool) -> anyhow::Result<()> {
    let active = session.active_account();
    if json {
        let items: Vec<serde_json::Value> = session
            .accounts()
            .records()
            .iter()
            .map(|(id, rec)| {
                serde_json::json!({
                    "id": id,
                    "displayName": rec.display_name,
                    "emailAddress": rec.email_address,
                    "active": id == active,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }
    for (id, rec) in session.accounts().records() {
        let marker = if id == active { "*" } else { " " };
        println!(
            "{marker} {:<22} {:<20} {}",
            id,
            rec.display_name,
            rec.email_address.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn cmd_stats(session: &Session, json: bool) -> anyhow::Result<()> {
    use humansize::{format_size, BINARY};

    let a = session.analytics();
    if json {
        println!("{}", serde_json::to_string_pretty(a)?);
        return Ok(());
    }
    let last_sync = a
        .last_sync
        .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());

    println!();
    println!("  {:<25} {}", "Account", session.active_account());
    println!("  {:<25} {}", "Messages received", a.messages_received);
    println!("  {:<25} {}", "Messages read", a.messages_read);
    println!("  {:<25} {}", "Addresses generated", a.emails_generated);
    println!("  {:<25} {}", "Storage used", format_size(a.storage_used, BINARY));
    println!("  {:<25} {}", "Last sync", last_sync);
    println!("  {:<25} {}", "Events logged", session.events().len());
    println!();
    Ok(())
}

async fn cmd_watch(session: Session, provider: HttpProvider, config: &Config) -> anyhow::Result<()> {
    let period = session.settings().refresh_period();
    let session = Arc::new(Mutex::new(session));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sync = tokio::spawn(TabSync::new().run(
        Arc::clone(&session),
        config.refresh.sync_interval(),
        config.refresh.trigger_poll(),
        shutdown_rx,
    ));

    let mut tick = tokio::time::interval(period);
    tracing::debug!(period_ms = period.as_millis() as u64, "Watch refresh period");
    eprintln!("Watching for new mail, Ctrl-C to stop");
    loop {
        tokio::select! {
            _ = tick.tick() => {
                let mut guard = session.lock().await;
                match guard.refresh(&provider).await {
                    Ok(outcome) if outcome.inserted > 0 => {
                        println!("{} new message(s)", outcome.inserted);
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "Refresh failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let _ = shutdown_tx.send(true);
    sync.await?;
    Ok(())
}

use std::{
    collections::BTreeMap,
    env,
    fs::File,
    io::{self, BufRead, Write},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use review_core::{
    coerce_score, sorted, AbstractForm, Direction, HttpReviewBackend, SortKey, Summary,
    SyncController, SyncOutcome,
};
use shared::domain::{AbstractId, Email, Slot};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod render;

#[derive(Parser, Debug)]
#[command(about = "Review conference abstracts against the review backend")]
struct Cli {
    #[arg(long, default_value = config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[arg(long)]
    server_url: Option<String>,
    /// Reviewer identity; every score and comment is attributed to it.
    #[arg(long)]
    user: Option<String>,
    #[arg(long)]
    contact: Option<String>,
    /// average, average-ignore-50 or ordinal
    #[arg(long)]
    aggregation: Option<String>,
    /// immediate or batched
    #[arg(long)]
    score_mode: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SortArg {
    Listed,
    Average,
    Title,
    Reviews,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every abstract with its primary-slot summary.
    Overview {
        #[arg(long, value_enum, default_value_t = SortArg::Listed)]
        sort: SortArg,
    },
    /// Write the export table as CSV to a file or stdout.
    Export {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show one abstract with its comments.
    Show { id: String },
    /// Record your score on one slot, e.g. `score X a 70`.
    Score { id: String, slot: Slot, value: String },
    /// Post a comment as the current reviewer.
    Comment { id: String, body: String },
    /// Move from one abstract to its neighbour, saving a pending comment first.
    Step {
        id: String,
        #[arg(long)]
        back: bool,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Create a new abstract.
    Create(AbstractArgs),
    /// Update an existing abstract; unspecified fields keep their values.
    Edit {
        id: String,
        #[command(flatten)]
        fields: EditArgs,
    },
    /// Delete an abstract after confirmation.
    Delete {
        id: String,
        #[arg(long)]
        yes: bool,
    },
    /// Report whether the configured reviewer is on the admin list.
    Whoami,
}

#[derive(clap::Args, Debug)]
struct AbstractArgs {
    #[arg(long)]
    title: String,
    #[arg(long, default_value = "")]
    body: String,
    #[arg(long)]
    author_email: String,
    #[arg(long)]
    author_name: String,
    /// Extra attribute as key=value (company, jobtitle, bio, picture_link,
    /// audience, notes).
    #[arg(long = "attr", value_parser = parse_key_value)]
    attributes: Vec<(String, String)>,
    #[arg(long = "tag")]
    tags: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct EditArgs {
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    body: Option<String>,
    #[arg(long)]
    author_email: Option<String>,
    #[arg(long)]
    author_name: Option<String>,
    #[arg(long = "attr", value_parser = parse_key_value)]
    attributes: Vec<(String, String)>,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let directives = env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(config::log_filter(directives.as_deref()))
        .with_writer(io::stderr)
        .init();
    let cli = Cli::parse();

    let mut settings = config::load_settings(&cli.config);
    if let Some(v) = cli.server_url.clone() {
        settings.server_url = v;
    }
    if let Some(v) = cli.user.clone() {
        settings.user_email = Some(v);
    }
    if let Some(v) = cli.contact.clone() {
        settings.contact = v;
    }
    if let Some(v) = cli.aggregation.clone() {
        settings.aggregation = v;
    }
    if let Some(v) = cli.score_mode.clone() {
        settings.score_mode = v;
    }
    let resolved = settings.resolve()?;

    info!(
        server_url = %resolved.server_url,
        user = %resolved.sync.current_user,
        "starting review session"
    );
    let backend = HttpReviewBackend::new(resolved.server_url.as_str())?;
    let controller = SyncController::new(Arc::new(backend), resolved.sync);
    let printer = render::spawn_event_printer(controller.subscribe_events());

    let result = run(&controller, cli.command).await;

    drop(controller);
    let _ = printer.await;
    result
}

async fn run(controller: &Arc<SyncController>, command: Command) -> Result<()> {
    let outcome = controller.load_all().await;
    if outcome == SyncOutcome::Failed {
        bail!("could not load abstracts");
    }

    let outcome = match command {
        Command::Overview { sort } => {
            let summaries = controller.summaries().await;
            let totals = controller.totals().await;
            let ordered: Vec<&Summary> = match sort {
                SortArg::Listed => summaries.iter().collect(),
                SortArg::Average => sorted(&summaries, SortKey::Average(Slot::PRIMARY)),
                SortArg::Title => sorted(&summaries, SortKey::Title),
                SortArg::Reviews => sorted(&summaries, SortKey::ReviewCount),
            };
            render::print_overview(ordered, totals.total, totals.scored_by_current_user);
            SyncOutcome::Completed
        }
        Command::Export { out } => {
            let table = controller.export_table().await;
            match out {
                Some(path) => {
                    let file = File::create(&path)
                        .with_context(|| format!("failed to create '{}'", path.display()))?;
                    render::write_export(&table, file)?;
                    info!(path = %path.display(), rows = table.rows.len(), "export written");
                }
                None => render::write_export(&table, io::stdout().lock())?,
            }
            SyncOutcome::Completed
        }
        Command::Show { id } => {
            let id = AbstractId::new(id);
            let outcome = controller.open_detail(&id).await;
            show(controller, &id).await?;
            controller.close_detail(&id).await;
            outcome
        }
        Command::Score { id, slot, value } => {
            let id = AbstractId::new(id);
            let score =
                coerce_score(&value).ok_or_else(|| anyhow!("'{value}' is not a number"))?;
            if controller.open_detail(&id).await == SyncOutcome::Skipped {
                bail!("no abstract with id '{id}'");
            }
            let outcome = controller.submit_score(&id, slot, score).await?;
            match controller.close_detail(&id).await {
                SyncOutcome::Failed => SyncOutcome::Failed,
                _ => outcome,
            }
        }
        Command::Comment { id, body } => {
            let id = AbstractId::new(id);
            if controller.open_detail(&id).await == SyncOutcome::Skipped {
                bail!("no abstract with id '{id}'");
            }
            let outcome = controller.submit_comment(&id, &body).await;
            show(controller, &id).await?;
            outcome
        }
        Command::Step { id, back, comment } => {
            let id = AbstractId::new(id);
            if controller.open_detail(&id).await == SyncOutcome::Skipped {
                bail!("no abstract with id '{id}'");
            }
            if let Some(comment) = comment {
                controller.set_comment_draft(&id, comment).await;
            }
            let direction = if back { Direction::Prev } else { Direction::Next };
            let outcome = controller.navigate(&id, direction).await;
            match outcome {
                SyncOutcome::Skipped => println!("no further abstract in that direction"),
                SyncOutcome::Completed => {
                    if let Some(target) = controller.open_modal_ids().await.first() {
                        show(controller, target).await?;
                    }
                }
                SyncOutcome::Failed => {}
            }
            outcome
        }
        Command::Create(args) => {
            let form = AbstractForm {
                id: None,
                title: args.title,
                body: args.body,
                author_email: Email::new(args.author_email),
                author_name: args.author_name,
                attributes: args.attributes.into_iter().collect::<BTreeMap<_, _>>(),
                tags: args.tags,
            };
            controller.save_abstract(form).await
        }
        Command::Edit { id, fields } => {
            let id = AbstractId::new(id);
            let Some(mut form) = controller.edit_form(&id).await else {
                bail!("could not load abstract '{id}'");
            };
            if let Some(title) = fields.title {
                form.title = title;
            }
            if let Some(body) = fields.body {
                form.body = body;
            }
            if let Some(email) = fields.author_email {
                form.author_email = Email::new(email);
            }
            if let Some(name) = fields.author_name {
                form.author_name = name;
            }
            form.attributes.extend(fields.attributes);
            controller.save_abstract(form).await
        }
        Command::Delete { id, yes } => {
            let id = AbstractId::new(id);
            controller.request_delete(&id).await;
            if yes || confirm(&format!("Delete abstract {id}? [y/N] "))? {
                controller.confirm_delete().await
            } else {
                controller.cancel_delete().await;
                println!("cancelled");
                SyncOutcome::Skipped
            }
        }
        Command::Whoami => {
            let outcome = controller.load_admins().await;
            let role = if controller.is_admin().await {
                "admin"
            } else {
                "reviewer"
            };
            println!("{} ({role})", controller.settings().current_user);
            outcome
        }
    };

    if outcome == SyncOutcome::Failed {
        bail!("request failed; see the error above");
    }
    Ok(())
}

async fn show(controller: &SyncController, id: &AbstractId) -> Result<()> {
    let summaries = controller.summaries().await;
    let summary = summaries
        .iter()
        .find(|summary| summary.id.as_ref() == Some(id))
        .ok_or_else(|| anyhow!("no abstract with id '{id}'"))?;
    let binding = controller.open_binding(id).await;
    render::print_detail(summary, binding.as_ref());
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

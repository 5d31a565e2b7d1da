use std::{fs::File, io::Read, path::PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use review_core::{HttpReviewBackend, ReviewBackend};
use shared::domain::{attr, Abstract, Authors, Email};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Converts a submission-form CSV export into abstracts.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long)]
    file: PathBuf,
    /// Create each abstract on this review backend.
    #[arg(long)]
    server_url: Option<String>,
    /// Dump the converted abstracts as pretty JSON to stdout.
    #[arg(long)]
    json: bool,
}

const FIRST: &str = "First";
const LAST: &str = "Last";
const EMAIL: &str = "Email";
const COMPANY: &str = "Company";
const JOB_TITLE: &str = "Title";
const BIO: &str = "Bio";
const PICTURE_URL: &str = "Picture URL";
const PRESENTATION_TITLE: &str = "Presentation Title";
const PRESENTATION_ABSTRACT: &str = "Presentation Abstract";
const EXPERIENCE_NEEDED: &str = "Experience Needed";
const NOTES: &str = "Notes";

const COLUMNS: [&str; 11] = [
    FIRST,
    LAST,
    EMAIL,
    COMPANY,
    JOB_TITLE,
    BIO,
    PICTURE_URL,
    PRESENTATION_TITLE,
    PRESENTATION_ABSTRACT,
    EXPERIENCE_NEEDED,
    NOTES,
];

/// Column name to attribute key for the columns stored as attributes.
const ATTRIBUTE_COLUMNS: [(&str, &str); 6] = [
    (PICTURE_URL, attr::PICTURE_LINK),
    (BIO, attr::BIO),
    (JOB_TITLE, attr::JOB_TITLE),
    (COMPANY, attr::COMPANY),
    (EXPERIENCE_NEEDED, attr::AUDIENCE),
    (NOTES, attr::NOTES),
];

fn read_abstracts<R: Read>(input: R) -> Result<Vec<Abstract>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(input);

    let headers = reader.headers().context("failed to read CSV header")?.clone();
    let mut index = [0usize; COLUMNS.len()];
    for (slot, column) in index.iter_mut().zip(COLUMNS) {
        match headers.iter().position(|header| header.trim() == column) {
            Some(position) => *slot = position,
            None => bail!("CSV header is missing column '{column}'"),
        }
    }
    let position = |column: &str| {
        COLUMNS
            .iter()
            .position(|known| *known == column)
            .map(|i| index[i])
    };

    let created = Utc::now();
    let mut abstracts = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("failed to read CSV row {}", line + 2))?;
        let field = |column: &str| {
            position(column)
                .and_then(|i| record.get(i))
                .unwrap_or_default()
                .trim()
                .to_string()
        };

        let name = format!("{} {}", field(FIRST), field(LAST));
        abstracts.push(Abstract {
            id: None,
            title: field(PRESENTATION_TITLE),
            body: field(PRESENTATION_ABSTRACT),
            created: Some(created),
            authors: Authors::single(Email::new(field(EMAIL)), name.trim()),
            attributes: ATTRIBUTE_COLUMNS
                .iter()
                .map(|(column, key)| (key.to_string(), field(column)))
                .collect(),
            ..Abstract::default()
        });
    }
    Ok(abstracts)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    let file = File::open(&cli.file)
        .with_context(|| format!("failed to open '{}' for read", cli.file.display()))?;
    let abstracts = read_abstracts(file)?;
    info!(count = abstracts.len(), "read abstracts");

    if let Some(server_url) = &cli.server_url {
        let backend = HttpReviewBackend::new(server_url)?;
        let mut saved = 0usize;
        for draft in &abstracts {
            match backend.create_abstract(draft).await {
                Ok(_) => saved += 1,
                Err(err) => error!(title = %draft.title, error = %format!("{err:#}"), "failed to save record"),
            }
        }
        info!(saved, total = abstracts.len(), "import finished");
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&abstracts)?);
    }

    Ok(())
}

//! Terminal presentation: prints what the controller asks to be shown.

use std::io::Write;

use anyhow::Result;
use review_core::{aggregate::Summary, ExportTable, ReviewEvent, WidgetBinding};
use shared::domain::Slot;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, warn};

/// Drains controller events until the channel closes. Alerts go to stderr;
/// everything else is only traced since the commands print their own
/// results.
pub fn spawn_event_printer(mut events: broadcast::Receiver<ReviewEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ReviewEvent::Alert { message }) => eprintln!("error: {message}"),
                Ok(ReviewEvent::ConfirmDelete { abstract_id }) => {
                    debug!(%abstract_id, "delete awaiting confirmation");
                }
                Ok(event) => debug!(?event, "review event"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event printer fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

pub fn print_overview<'a>(
    summaries: impl IntoIterator<Item = &'a Summary>,
    total: usize,
    scored: usize,
) {
    println!("{scored}/{total} abstracts scored by you");
    for summary in summaries {
        println!("{}", overview_line(summary));
    }
}

/// One overview row: id, own-review marker, primary slot average and count,
/// own primary score, title and authors.
fn overview_line(summary: &Summary) -> String {
    let primary = summary.slot(Slot::PRIMARY);
    let mine = primary
        .current_user_score
        .map(|score| score.to_string())
        .unwrap_or_else(|| "-".into());
    let id = summary
        .id
        .as_ref()
        .map(|id| id.as_str())
        .unwrap_or("<unsaved>");
    let marker = if summary.reviewed_by_current_user { "*" } else { " " };
    format!(
        "{id:<38} {marker} avg {average:>3} over {count:>3} reviews  mine {mine:>4}  {title}  [{authors}]",
        average = primary.average,
        count = primary.count,
        title = summary.title,
        authors = summary.authors_display,
    )
}

pub fn print_detail(summary: &Summary, binding: Option<&WidgetBinding>) {
    println!("{}", summary.title);
    println!("by {}", summary.authors_display);
    println!(
        "{} / {} / audience: {}",
        summary.company, summary.job_title, summary.audience
    );
    println!();
    println!("{}", summary.body);
    println!();
    for slot in Slot::ALL {
        let stats = summary.slot(slot);
        if stats.count == 0 && stats.current_user_score.is_none() {
            continue;
        }
        print!("{slot}: avg {} over {}", stats.average, stats.count);
        if let Some(tally) = stats.tally {
            print!(" (no {}, maybe {}, yes {})", tally.no, tally.maybe, tally.yes);
        }
        if let Some(mine) = stats.current_user_score {
            print!(", yours {mine}");
        }
        println!();
    }

    let Some(binding) = binding else {
        return;
    };
    if binding.comments.is_empty() {
        println!("no comments yet");
    }
    for comment in &binding.comments {
        println!("- {}: {}", comment.email, comment.body);
    }
}

pub fn write_export<W: Write>(table: &ExportTable, out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(&table.header)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use review_core::aggregate::{summarize, AggregationPolicy};
    use shared::domain::{Abstract, AbstractId, Authors, Email};

    fn words(line: &str) -> String {
        line.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn overview_line_puts_each_value_in_its_column() {
        let mut item = Abstract {
            id: Some(AbstractId::from("X")),
            title: "Rust at scale".into(),
            authors: Authors::single(Email::from("a@x.com"), "Ann"),
            ..Abstract::default()
        };
        item.scores.record(Slot::A, Email::from("r@y.com"), 70.0);
        item.scores.record(Slot::A, Email::from("s@y.com"), 81.0);
        let summary = summarize(&item, &Email::from("r@y.com"), AggregationPolicy::default());

        assert_eq!(
            words(&overview_line(&summary)),
            "X * avg 75 over 2 reviews mine 70 Rust at scale [Ann]"
        );
    }

    #[test]
    fn overview_line_for_unsaved_unscored_row() {
        let summary = summarize(
            &Abstract {
                title: "draft".into(),
                ..Abstract::default()
            },
            &Email::from("r@y.com"),
            AggregationPolicy::default(),
        );

        assert_eq!(
            words(&overview_line(&summary)),
            "<unsaved> avg 0 over 0 reviews mine - draft []"
        );
    }

    #[test]
    fn export_writes_header_then_rows_with_quoting() {
        let table = ExportTable {
            header: vec!["id".into(), "title".into()],
            rows: vec![vec!["X".into(), "Rust, fast".into()]],
        };
        let mut out = Vec::new();
        write_export(&table, &mut out).expect("export");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "id,title\nX,\"Rust, fast\"\n"
        );
    }
}

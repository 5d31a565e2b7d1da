//! Turns fetched abstracts into per-abstract summaries and export rows.
//!
//! Everything here is a pure function of its inputs: the same abstract list
//! and reviewer always produce the same summaries, and nothing is cached
//! between calls.

use std::{cmp::Ordering, fmt, str::FromStr};

use shared::domain::{attr, Abstract, AbstractId, Email, ScoreValue, Slot, SlotScores};
use thiserror::Error;

/// Placeholder for optional attributes the submitter never filled in.
pub const NOT_AVAILABLE: &str = "N/A";
pub const DISPLAY_AUTHOR_SEPARATOR: &str = ", ";
pub const CSV_AUTHOR_SEPARATOR: &str = ";";

/// How reviewer entries on a slot are folded into a slot summary. One policy
/// applies to every slot of a deployment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregationPolicy {
    /// Continuous 0-100 scores, reported as count/total/floored average.
    /// `ignore_sentinel` drops entries exactly equal to that value (the old
    /// untouched-slider default of 50).
    Average { ignore_sentinel: Option<f64> },
    /// Discrete choices: 1 = no, 2 = maybe, 3 = yes. Other values are skipped.
    Ordinal,
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        Self::Average {
            ignore_sentinel: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrdinalTally {
    pub no: u32,
    pub maybe: u32,
    pub yes: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotSummary {
    /// The current reviewer's own numeric entry; `None` when they have not
    /// scored this slot (or the entry is not a number).
    pub current_user_score: Option<f64>,
    pub count: u32,
    pub total: f64,
    pub average: i64,
    /// Only populated under [`AggregationPolicy::Ordinal`].
    pub tally: Option<OrdinalTally>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub id: Option<AbstractId>,
    pub title: String,
    pub body: String,
    pub company: String,
    pub job_title: String,
    pub bio: String,
    pub picture_link: String,
    pub audience: String,
    pub notes: String,
    pub authors_display: String,
    pub authors_csv: String,
    pub emails_csv: String,
    pub slots: [SlotSummary; 7],
    pub reviewed_by_current_user: bool,
}

impl Summary {
    pub fn slot(&self, slot: Slot) -> &SlotSummary {
        &self.slots[slot.index()]
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown export column '{0}'")]
pub struct UnknownCsvField(pub String);

/// One export column. Column names form the CSV header and are a
/// compatibility contract with whatever consumes the export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvField {
    Id,
    Title,
    Body,
    Authors,
    Emails,
    Company,
    JobTitle,
    Bio,
    PictureLink,
    Audience,
    Notes,
    Reviewed,
    Mine(Slot),
    Count(Slot),
    Total(Slot),
    Average(Slot),
    No(Slot),
    Maybe(Slot),
    Yes(Slot),
}

impl CsvField {
    pub fn default_columns() -> Vec<CsvField> {
        vec![
            CsvField::Id,
            CsvField::Title,
            CsvField::Authors,
            CsvField::Emails,
            CsvField::Company,
            CsvField::JobTitle,
            CsvField::Audience,
            CsvField::Average(Slot::A),
            CsvField::Count(Slot::A),
            CsvField::Average(Slot::B),
            CsvField::Count(Slot::B),
            CsvField::Average(Slot::C),
            CsvField::Count(Slot::C),
            CsvField::Reviewed,
        ]
    }

    pub fn name(&self) -> String {
        match self {
            CsvField::Id => "id".into(),
            CsvField::Title => "title".into(),
            CsvField::Body => "body".into(),
            CsvField::Authors => "authors".into(),
            CsvField::Emails => "emails".into(),
            CsvField::Company => attr::COMPANY.into(),
            CsvField::JobTitle => attr::JOB_TITLE.into(),
            CsvField::Bio => attr::BIO.into(),
            CsvField::PictureLink => attr::PICTURE_LINK.into(),
            CsvField::Audience => attr::AUDIENCE.into(),
            CsvField::Notes => attr::NOTES.into(),
            CsvField::Reviewed => "reviewed".into(),
            CsvField::Mine(slot) => format!("{slot}_mine"),
            CsvField::Count(slot) => format!("{slot}_count"),
            CsvField::Total(slot) => format!("{slot}_total"),
            CsvField::Average(slot) => format!("{slot}_average"),
            CsvField::No(slot) => format!("{slot}_no"),
            CsvField::Maybe(slot) => format!("{slot}_maybe"),
            CsvField::Yes(slot) => format!("{slot}_yes"),
        }
    }

    fn value(&self, summary: &Summary) -> String {
        let tally = |slot: &Slot, pick: fn(&OrdinalTally) -> u32| {
            summary
                .slot(*slot)
                .tally
                .as_ref()
                .map(|tally| pick(tally).to_string())
                .unwrap_or_default()
        };

        match self {
            CsvField::Id => summary
                .id
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            CsvField::Title => summary.title.clone(),
            CsvField::Body => summary.body.clone(),
            CsvField::Authors => summary.authors_csv.clone(),
            CsvField::Emails => summary.emails_csv.clone(),
            CsvField::Company => summary.company.clone(),
            CsvField::JobTitle => summary.job_title.clone(),
            CsvField::Bio => summary.bio.clone(),
            CsvField::PictureLink => summary.picture_link.clone(),
            CsvField::Audience => summary.audience.clone(),
            CsvField::Notes => summary.notes.clone(),
            CsvField::Reviewed => summary.reviewed_by_current_user.to_string(),
            CsvField::Mine(slot) => summary
                .slot(*slot)
                .current_user_score
                .map(|score| score.to_string())
                .unwrap_or_default(),
            CsvField::Count(slot) => summary.slot(*slot).count.to_string(),
            CsvField::Total(slot) => summary.slot(*slot).total.to_string(),
            CsvField::Average(slot) => summary.slot(*slot).average.to_string(),
            CsvField::No(slot) => tally(slot, |t| t.no),
            CsvField::Maybe(slot) => tally(slot, |t| t.maybe),
            CsvField::Yes(slot) => tally(slot, |t| t.yes),
        }
    }
}

impl fmt::Display for CsvField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for CsvField {
    type Err = UnknownCsvField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        let fixed = match name {
            "id" => Some(CsvField::Id),
            "title" => Some(CsvField::Title),
            "body" => Some(CsvField::Body),
            "authors" => Some(CsvField::Authors),
            "emails" => Some(CsvField::Emails),
            attr::COMPANY => Some(CsvField::Company),
            attr::JOB_TITLE => Some(CsvField::JobTitle),
            attr::BIO => Some(CsvField::Bio),
            attr::PICTURE_LINK => Some(CsvField::PictureLink),
            attr::AUDIENCE => Some(CsvField::Audience),
            attr::NOTES => Some(CsvField::Notes),
            "reviewed" => Some(CsvField::Reviewed),
            _ => None,
        };
        if let Some(field) = fixed {
            return Ok(field);
        }

        let (slot, stat) = name
            .rsplit_once('_')
            .ok_or_else(|| UnknownCsvField(name.to_string()))?;
        let slot: Slot = slot
            .parse()
            .map_err(|_| UnknownCsvField(name.to_string()))?;
        match stat {
            "mine" => Ok(CsvField::Mine(slot)),
            "count" => Ok(CsvField::Count(slot)),
            "total" => Ok(CsvField::Total(slot)),
            "average" => Ok(CsvField::Average(slot)),
            "no" => Ok(CsvField::No(slot)),
            "maybe" => Ok(CsvField::Maybe(slot)),
            "yes" => Ok(CsvField::Yes(slot)),
            _ => Err(UnknownCsvField(name.to_string())),
        }
    }
}

/// Parses a comma separated column list such as `"id,title,scores_a_average"`.
pub fn parse_csv_fields(raw: &str) -> Result<Vec<CsvField>, UnknownCsvField> {
    raw.split(',')
        .filter(|name| !name.trim().is_empty())
        .map(str::parse)
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateConfig {
    pub policy: AggregationPolicy,
    pub csv_fields: Vec<CsvField>,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            policy: AggregationPolicy::default(),
            csv_fields: CsvField::default_columns(),
        }
    }
}

/// The in-memory export matrix: a header row plus one row per abstract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub total: usize,
    pub scored_by_current_user: usize,
    pub summaries: Vec<Summary>,
    pub export: ExportTable,
}

pub fn aggregate(abstracts: &[Abstract], current_user: &Email, config: &AggregateConfig) -> Aggregate {
    let mut scored_by_current_user = 0;
    let mut summaries = Vec::with_capacity(abstracts.len());
    let mut rows: Vec<Vec<String>> = Vec::with_capacity(abstracts.len());

    for item in abstracts {
        let summary = summarize(item, current_user, config.policy);
        // assumes a reviewer scores every slot or none
        if summary.reviewed_by_current_user {
            scored_by_current_user += 1;
        }
        rows.push(
            config
                .csv_fields
                .iter()
                .map(|field| field.value(&summary))
                .collect(),
        );
        summaries.push(summary);
    }

    Aggregate {
        total: abstracts.len(),
        scored_by_current_user,
        summaries,
        export: ExportTable {
            header: config.csv_fields.iter().map(CsvField::name).collect(),
            rows,
        },
    }
}

pub fn summarize(item: &Abstract, current_user: &Email, policy: AggregationPolicy) -> Summary {
    let attribute_or = |key: &str, fallback: &str| {
        item.attribute(key)
            .filter(|value| !value.is_empty())
            .unwrap_or(fallback)
            .to_string()
    };

    let authors_display = item
        .authors
        .names()
        .collect::<Vec<_>>()
        .join(DISPLAY_AUTHOR_SEPARATOR);
    let authors_csv = item
        .authors
        .names()
        .collect::<Vec<_>>()
        .join(CSV_AUTHOR_SEPARATOR);
    let emails_csv = item
        .authors
        .emails()
        .map(Email::as_str)
        .collect::<Vec<_>>()
        .join(CSV_AUTHOR_SEPARATOR);

    let reviewed_by_current_user = item
        .scores
        .get(Slot::PRIMARY)
        .is_some_and(|scores| scores.contains_key(current_user));

    Summary {
        id: item.id.clone(),
        title: item.title.clone(),
        body: item.body.clone(),
        company: attribute_or(attr::COMPANY, NOT_AVAILABLE),
        job_title: attribute_or(attr::JOB_TITLE, NOT_AVAILABLE),
        bio: attribute_or(attr::BIO, NOT_AVAILABLE),
        picture_link: attribute_or(attr::PICTURE_LINK, ""),
        audience: attribute_or(attr::AUDIENCE, NOT_AVAILABLE),
        notes: attribute_or(attr::NOTES, NOT_AVAILABLE),
        authors_display,
        authors_csv,
        emails_csv,
        slots: Slot::ALL.map(|slot| summarize_slot(item.scores.get(slot), current_user, policy)),
        reviewed_by_current_user,
    }
}

fn summarize_slot(
    scores: Option<&SlotScores>,
    current_user: &Email,
    policy: AggregationPolicy,
) -> SlotSummary {
    let mut summary = SlotSummary {
        tally: matches!(policy, AggregationPolicy::Ordinal).then(OrdinalTally::default),
        ..SlotSummary::default()
    };
    let Some(scores) = scores else {
        return summary;
    };

    summary.current_user_score = scores.get(current_user).and_then(ScoreValue::as_number);

    for value in scores.values().filter_map(ScoreValue::as_number) {
        match policy {
            AggregationPolicy::Average { ignore_sentinel } => {
                if ignore_sentinel == Some(value) {
                    continue;
                }
            }
            AggregationPolicy::Ordinal => {
                let Some(tally) = summary.tally.as_mut() else {
                    continue;
                };
                let bucket = match value {
                    v if v == 1.0 => &mut tally.no,
                    v if v == 2.0 => &mut tally.maybe,
                    v if v == 3.0 => &mut tally.yes,
                    _ => continue,
                };
                *bucket += 1;
            }
        }
        summary.count += 1;
        summary.total += value;
    }

    summary.average = if summary.count == 0 {
        0
    } else {
        (summary.total / f64::from(summary.count)).floor() as i64
    };
    summary
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    /// Highest average first; ties fall back to title.
    Average(Slot),
    Title,
    /// Most reviewed first on the primary slot.
    ReviewCount,
}

/// Returns the summaries in display order without reordering the stored list.
pub fn sorted(summaries: &[Summary], key: SortKey) -> Vec<&Summary> {
    let mut ordered: Vec<&Summary> = summaries.iter().collect();
    ordered.sort_by(|left, right| {
        let primary = match key {
            SortKey::Average(slot) => right.slot(slot).average.cmp(&left.slot(slot).average),
            SortKey::Title => Ordering::Equal,
            SortKey::ReviewCount => right
                .slot(Slot::PRIMARY)
                .count
                .cmp(&left.slot(Slot::PRIMARY).count),
        };
        primary.then_with(|| left.title.cmp(&right.title))
    });
    ordered
}

#[cfg(test)]
mod tests {
    use shared::domain::Authors;

    use super::*;

    fn email(value: &str) -> Email {
        Email::from(value)
    }

    fn scored(id: &str, slot: Slot, entries: &[(&str, f64)]) -> Abstract {
        let mut item = Abstract {
            id: Some(AbstractId::from(id)),
            title: format!("talk {id}"),
            ..Abstract::default()
        };
        for (reviewer, score) in entries {
            item.scores.record(slot, email(reviewer), *score);
        }
        item
    }

    #[test]
    fn scenario_two_reviewers_on_primary_slot() {
        let mut item = scored("X", Slot::A, &[("a@x.com", 90.0), ("r@y.com", 70.0)]);
        item.authors = Authors::single(email("a@x.com"), "Alice");

        let result = aggregate(&[item], &email("r@y.com"), &AggregateConfig::default());
        let summary = &result.summaries[0];
        let slot = summary.slot(Slot::A);

        assert_eq!(slot.count, 2);
        assert_eq!(slot.total, 160.0);
        assert_eq!(slot.average, 80);
        assert_eq!(slot.current_user_score, Some(70.0));
        assert!(summary.reviewed_by_current_user);
        assert_eq!(result.total, 1);
        assert_eq!(result.scored_by_current_user, 1);
    }

    #[test]
    fn average_is_floored_and_zero_without_entries() {
        let even = scored("E", Slot::B, &[("a@x", 50.0), ("b@x", 50.0), ("c@x", 50.0)]);
        let uneven = scored("U", Slot::B, &[("a@x", 51.0), ("b@x", 50.0), ("c@x", 50.0)]);
        let empty = scored("Z", Slot::B, &[]);

        let result = aggregate(
            &[even, uneven, empty],
            &email("nobody@x"),
            &AggregateConfig::default(),
        );
        assert_eq!(result.summaries[0].slot(Slot::B).average, 50);
        assert_eq!(result.summaries[1].slot(Slot::B).total, 151.0);
        assert_eq!(result.summaries[1].slot(Slot::B).average, 50);

        let never = result.summaries[2].slot(Slot::C);
        assert_eq!((never.count, never.average), (0, 0));
        assert_eq!(never.current_user_score, None);
    }

    #[test]
    fn scoring_zero_still_counts_as_reviewed() {
        let item = scored("X", Slot::A, &[("r@y.com", 0.0)]);
        let result = aggregate(&[item], &email("r@y.com"), &AggregateConfig::default());

        assert_eq!(result.scored_by_current_user, 1);
        assert_eq!(result.summaries[0].slot(Slot::A).current_user_score, Some(0.0));
    }

    #[test]
    fn other_slots_alone_do_not_mark_reviewed() {
        let item = scored("X", Slot::B, &[("r@y.com", 80.0)]);
        let result = aggregate(&[item], &email("r@y.com"), &AggregateConfig::default());

        assert_eq!(result.scored_by_current_user, 0);
        assert!(!result.summaries[0].reviewed_by_current_user);
    }

    #[test]
    fn non_numeric_entries_are_skipped() {
        let mut item = scored("X", Slot::A, &[("a@x", 40.0)]);
        if let Some(slot) = item.scores.scores_a.as_mut() {
            slot.insert(email("r@y.com"), ScoreValue::Invalid(serde_json::json!("high")));
        }

        let result = aggregate(&[item], &email("r@y.com"), &AggregateConfig::default());
        let slot = result.summaries[0].slot(Slot::A);
        assert_eq!((slot.count, slot.average), (1, 40));
        assert_eq!(slot.current_user_score, None);
        assert!(result.summaries[0].reviewed_by_current_user);
    }

    #[test]
    fn sentinel_filter_is_opt_in() {
        let item = scored("X", Slot::A, &[("a@x", 50.0), ("b@x", 90.0)]);
        let plain = aggregate(
            std::slice::from_ref(&item),
            &email("a@x"),
            &AggregateConfig::default(),
        );
        assert_eq!(plain.summaries[0].slot(Slot::A).count, 2);

        let filtering = AggregateConfig {
            policy: AggregationPolicy::Average {
                ignore_sentinel: Some(50.0),
            },
            ..AggregateConfig::default()
        };
        let filtered = aggregate(&[item], &email("a@x"), &filtering);
        let slot = filtered.summaries[0].slot(Slot::A);
        assert_eq!((slot.count, slot.total, slot.average), (1, 90.0, 90));
        // the reviewer's own entry is still shown even when filtered out
        assert_eq!(slot.current_user_score, Some(50.0));
    }

    #[test]
    fn ordinal_policy_buckets_choices() {
        let item = scored(
            "X",
            Slot::A,
            &[("a@x", 1.0), ("b@x", 3.0), ("c@x", 3.0), ("d@x", 2.0), ("e@x", 7.0)],
        );
        let config = AggregateConfig {
            policy: AggregationPolicy::Ordinal,
            csv_fields: vec![
                CsvField::No(Slot::A),
                CsvField::Maybe(Slot::A),
                CsvField::Yes(Slot::A),
            ],
        };
        let result = aggregate(&[item], &email("a@x"), &config);
        let slot = result.summaries[0].slot(Slot::A);

        assert_eq!(
            slot.tally,
            Some(OrdinalTally {
                no: 1,
                maybe: 1,
                yes: 2
            })
        );
        assert_eq!(slot.count, 4);
        assert_eq!(result.export.rows[0], vec!["1", "1", "2"]);
    }

    #[test]
    fn authors_flatten_with_distinct_separators() {
        let mut authors = Authors::new();
        authors.insert(email("a@x.com"), "Alice");
        authors.insert(email("b@x.com"), "Bob");
        let item = Abstract {
            authors,
            ..Abstract::default()
        };

        let summary = summarize(&item, &email("r@y.com"), AggregationPolicy::default());
        assert_eq!(summary.authors_display, "Alice, Bob");
        assert_eq!(summary.authors_csv, "Alice;Bob");
        assert_eq!(summary.emails_csv, "a@x.com;b@x.com");
    }

    #[test]
    fn missing_authors_and_attributes_default_quietly() {
        let summary = summarize(&Abstract::default(), &email("r@y.com"), AggregationPolicy::default());
        assert_eq!(summary.authors_display, "");
        assert_eq!(summary.authors_csv, "");
        assert_eq!(summary.company, NOT_AVAILABLE);
        assert_eq!(summary.audience, NOT_AVAILABLE);
        assert_eq!(summary.picture_link, "");
    }

    #[test]
    fn aggregate_is_idempotent_and_leaves_input_alone() {
        let items = vec![
            scored("X", Slot::A, &[("a@x", 10.0)]),
            scored("Y", Slot::C, &[("r@y.com", 99.0)]),
        ];
        let before = items.clone();
        let config = AggregateConfig::default();

        let first = aggregate(&items, &email("r@y.com"), &config);
        let second = aggregate(&items, &email("r@y.com"), &config);
        assert_eq!(first, second);
        assert_eq!(items, before);
    }

    #[test]
    fn export_rows_follow_configured_columns() {
        let mut item = scored("X", Slot::A, &[("r@y.com", 70.0)]);
        item.authors = Authors::single(email("a@x.com"), "Alice");
        item.attributes
            .insert(attr::COMPANY.to_string(), "Acme".to_string());

        let config = AggregateConfig {
            policy: AggregationPolicy::default(),
            csv_fields: parse_csv_fields("id, authors,company,scores_a_mine,scores_a_average,reviewed")
                .expect("columns"),
        };
        let result = aggregate(&[item], &email("r@y.com"), &config);

        assert_eq!(
            result.export.header,
            vec!["id", "authors", "company", "scores_a_mine", "scores_a_average", "reviewed"]
        );
        assert_eq!(
            result.export.rows,
            vec![vec!["X", "Alice", "Acme", "70", "70", "true"]]
        );
    }

    #[test]
    fn unknown_export_column_is_rejected() {
        assert_eq!(
            parse_csv_fields("id,scores_q_average"),
            Err(UnknownCsvField("scores_q_average".to_string()))
        );
        assert!(parse_csv_fields("scores_b_median").is_err());
        assert_eq!(
            "scores_g_yes".parse::<CsvField>(),
            Ok(CsvField::Yes(Slot::G))
        );
    }

    #[test]
    fn sorting_by_average_keeps_stored_order() {
        let low = scored("L", Slot::A, &[("a@x", 20.0)]);
        let high = scored("H", Slot::A, &[("a@x", 95.0)]);
        let result = aggregate(&[low, high], &email("a@x"), &AggregateConfig::default());

        let ordered = sorted(&result.summaries, SortKey::Average(Slot::A));
        assert_eq!(ordered[0].title, "talk H");
        assert_eq!(result.summaries[0].title, "talk L");
    }
}

use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::{Abstract, AbstractId, Comment, Email, Slot},
    protocol::{NewComment, ScoreUpdate},
};

pub mod aggregate;
pub mod sync;
pub mod transport;
pub mod view_state;

pub use aggregate::{
    aggregate, parse_csv_fields, sorted, AggregateConfig, AggregationPolicy, CsvField,
    ExportTable, SortKey, Summary,
};
pub use sync::{AbstractForm, Direction, ScoreSubmitMode, SyncController, SyncSettings};
pub use transport::HttpReviewBackend;
pub use view_state::{CommentFormState, OverviewTotals, ViewStateStore, WidgetBinding};

/// The backend of record. Every call is one HTTP round trip; nothing here
/// retries, caches or orders requests.
#[async_trait]
pub trait ReviewBackend: Send + Sync {
    async fn list_abstracts(&self) -> Result<Vec<Abstract>>;
    async fn get_abstract(&self, id: &AbstractId) -> Result<Abstract>;
    /// `PUT /abstracts/`; the body never carries an id.
    async fn create_abstract(&self, draft: &Abstract) -> Result<Abstract>;
    /// `PATCH /abstracts/`; the body carries the id being updated.
    async fn update_abstract(&self, record: &Abstract) -> Result<Abstract>;
    async fn delete_abstract(&self, id: &AbstractId) -> Result<()>;
    async fn update_scores(&self, updates: &[ScoreUpdate]) -> Result<()>;
    /// Comments in creation order, as the backend stores them.
    async fn list_comments(&self, id: &AbstractId) -> Result<Vec<Comment>>;
    async fn create_comment(&self, comment: &NewComment) -> Result<()>;
    async fn list_admins(&self) -> Result<Vec<Email>>;
}

/// Render requests and notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewEvent {
    /// The overview must be redrawn from the store.
    OverviewRendered(OverviewTotals),
    DetailOpened {
        abstract_id: AbstractId,
    },
    DetailClosed {
        abstract_id: AbstractId,
    },
    CommentsUpdated {
        abstract_id: AbstractId,
        comments: Vec<Comment>,
    },
    CommentFormChanged {
        abstract_id: AbstractId,
        state: CommentFormState,
    },
    ScoreCellUpdated {
        abstract_id: AbstractId,
        slot: Slot,
        score: f64,
    },
    ConfirmDelete {
        abstract_id: AbstractId,
    },
    DeleteDialogDismissed {
        abstract_id: AbstractId,
    },
    /// Blocking user-facing notice; always names the ops contact.
    Alert {
        message: String,
    },
}

/// What a controller operation ended up doing. Failures have already been
/// reported through [`ReviewEvent::Alert`] by the time this is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed,
    Skipped,
    Failed,
}

/// Parses a score typed or slid in the UI into the number the backend
/// expects. Returns `None` for anything that is not a finite number.
pub fn coerce_score(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

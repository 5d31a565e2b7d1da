//! Request/response orchestration between the presentation layer, the
//! backend of record and the [`ViewStateStore`].
//!
//! Every operation reports failures as a [`ReviewEvent::Alert`] plus an
//! `error!` log line and leaves the stored view state as it was. Nothing is
//! retried and no request is cancelled; a completion that arrives after the
//! view it belonged to is gone is simply dropped.

use std::{collections::BTreeMap, sync::Arc};

use anyhow::Result;
use shared::{
    domain::{Abstract, AbstractId, Authors, Comment, Email, Slot},
    protocol::{NewComment, ScoreUpdate},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    aggregate::{AggregateConfig, ExportTable, Summary},
    view_state::{CommentFormState, OverviewTotals, ViewStateStore, WidgetBinding},
    ReviewBackend, ReviewEvent, SyncOutcome,
};

pub const DEFAULT_CONTACT: &str = "cfp-admin@example.com";

/// How slider releases reach the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoreSubmitMode {
    /// Each release posts a single-slot update right away.
    #[default]
    Immediate,
    /// Releases are collected per detail view and posted as one batch when
    /// the view closes, followed by a full overview refresh.
    Batched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Prev,
    Next,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Established once by the identity collaborator at startup.
    pub current_user: Email,
    pub aggregate: AggregateConfig,
    pub score_mode: ScoreSubmitMode,
    /// Address named in every alert.
    pub contact: String,
}

impl SyncSettings {
    pub fn new(current_user: Email) -> Self {
        Self {
            current_user,
            aggregate: AggregateConfig::default(),
            score_mode: ScoreSubmitMode::default(),
            contact: DEFAULT_CONTACT.to_string(),
        }
    }
}

/// Fields of the abstract editing form. The form edits exactly one author
/// even though a stored abstract may list several.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AbstractForm {
    pub id: Option<AbstractId>,
    pub title: String,
    pub body: String,
    pub author_email: Email,
    pub author_name: String,
    pub attributes: BTreeMap<String, String>,
    pub tags: Vec<String>,
}

impl AbstractForm {
    pub fn from_abstract(record: &Abstract) -> Self {
        let (author_email, author_name) = record
            .authors
            .first()
            .map(|(email, name)| (email.clone(), name.to_string()))
            .unwrap_or_default();
        Self {
            id: record.assigned_id().cloned(),
            title: record.title.clone(),
            body: record.body.clone(),
            author_email,
            author_name,
            attributes: record.attributes.clone(),
            tags: record.tags.clone(),
        }
    }

    fn into_abstract(self) -> Abstract {
        Abstract {
            id: self.id.filter(AbstractId::is_assigned),
            title: self.title,
            body: self.body,
            authors: Authors::single(self.author_email, self.author_name),
            attributes: self.attributes,
            tags: self.tags,
            ..Abstract::default()
        }
    }
}

pub struct SyncController {
    backend: Arc<dyn ReviewBackend>,
    settings: SyncSettings,
    store: Mutex<ViewStateStore>,
    events: broadcast::Sender<ReviewEvent>,
}

impl SyncController {
    pub fn new(backend: Arc<dyn ReviewBackend>, settings: SyncSettings) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            backend,
            settings,
            store: Mutex::new(ViewStateStore::new()),
            events,
        })
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ReviewEvent> {
        self.events.subscribe()
    }

    /// Fetches the full abstract list and swaps it into the store. Detail
    /// views still listed are rebuilt under a new generation and keep their
    /// draft, comments and staged scores; the rest are forgotten. On failure the previous state stays untouched.
    pub async fn load_all(&self) -> SyncOutcome {
        let abstracts = match self.backend.list_abstracts().await {
            Ok(abstracts) => abstracts,
            Err(err) => return self.fail("Loading the abstract list failed", err),
        };

        let totals = {
            let mut store = self.store.lock().await;
            let previous = store.clear();
            store.replace(abstracts, &self.settings.current_user, &self.settings.aggregate);
            for old in previous {
                if store.contains(&old.abstract_id) {
                    store.register_modal(old);
                }
            }
            store.totals()
        };

        info!(
            total = totals.total,
            scored = totals.scored_by_current_user,
            "overview refreshed"
        );
        self.emit(ReviewEvent::OverviewRendered(totals));
        SyncOutcome::Completed
    }

    pub async fn load_admins(&self) -> SyncOutcome {
        match self.backend.list_admins().await {
            Ok(admins) => {
                self.store.lock().await.set_admins(admins);
                SyncOutcome::Completed
            }
            Err(err) => self.fail("Loading the admin list failed", err),
        }
    }

    pub async fn is_admin(&self) -> bool {
        self.store.lock().await.is_admin(&self.settings.current_user)
    }

    /// Opens (or re-opens) the detail view for `id` and lazily fills in its
    /// comments. Re-opening keeps the draft and any staged scores.
    pub async fn open_detail(&self, id: &AbstractId) -> SyncOutcome {
        let generation = {
            let mut store = self.store.lock().await;
            if !store.contains(id) {
                warn!(abstract_id = %id, "cannot open detail view for unknown abstract");
                return SyncOutcome::Skipped;
            }
            let binding = match store.forget_modal(id) {
                Some(open) => {
                    debug!(abstract_id = %id, "re-opening detail view, staged scores kept");
                    open
                }
                None => WidgetBinding::new(id.clone()),
            };
            store.register_modal(binding).0
        };
        self.emit(ReviewEvent::DetailOpened {
            abstract_id: id.clone(),
        });

        match self.fetch_comments(id).await {
            Ok(comments) => {
                let applied = {
                    let mut store = self.store.lock().await;
                    match store.get_open_modal_mut(id) {
                        Some(binding) if binding.generation == generation => {
                            binding.comments = comments.clone();
                            true
                        }
                        _ => false,
                    }
                };
                if applied {
                    self.emit(ReviewEvent::CommentsUpdated {
                        abstract_id: id.clone(),
                        comments,
                    });
                } else {
                    debug!(abstract_id = %id, "dropping comments for superseded detail view");
                }
                SyncOutcome::Completed
            }
            Err(err) => self.fail("Loading comments failed", err),
        }
    }

    /// Closes the detail view. In batched mode the collected slider values
    /// are posted as one batch and the overview is refreshed afterwards.
    pub async fn close_detail(&self, id: &AbstractId) -> SyncOutcome {
        let Some(binding) = self.store.lock().await.forget_modal(id) else {
            return SyncOutcome::Skipped;
        };
        self.emit(ReviewEvent::DetailClosed {
            abstract_id: id.clone(),
        });

        if self.settings.score_mode != ScoreSubmitMode::Batched {
            return SyncOutcome::Completed;
        }
        if let Err(outcome) = self.flush_pending_scores(&binding).await {
            return outcome;
        }
        self.load_all().await
    }

    /// Slider released. In immediate mode the single-slot update is posted in
    /// the background and the returned handle may be ignored; in batched mode
    /// this is [`Self::stage_score`]. Either way the row cell is updated
    /// before any request is made.
    pub fn submit_score(
        self: &Arc<Self>,
        id: &AbstractId,
        slot: Slot,
        value: f64,
    ) -> JoinHandle<SyncOutcome> {
        let controller = Arc::clone(self);
        let id = id.clone();
        tokio::spawn(async move {
            if controller.settings.score_mode == ScoreSubmitMode::Batched {
                return controller.stage_score(&id, slot, value).await;
            }
            if !value.is_finite() {
                warn!(abstract_id = %id, %slot, "ignoring non-numeric score");
                return SyncOutcome::Skipped;
            }

            if let Some(binding) = controller.store.lock().await.get_open_modal_mut(&id) {
                binding.confirmed_scores.insert(slot, value);
            }
            controller.emit(ReviewEvent::ScoreCellUpdated {
                abstract_id: id.clone(),
                slot,
                score: value,
            });

            let update = ScoreUpdate {
                id: id.clone(),
                slot,
                email: controller.settings.current_user.clone(),
                score: value,
            };
            match controller.backend.update_scores(&[update]).await {
                Ok(()) => {
                    debug!(abstract_id = %id, %slot, score = value, "score saved");
                    SyncOutcome::Completed
                }
                Err(err) => controller.fail("Saving your score failed", err),
            }
        })
    }

    /// Records a slider value in the open detail view without posting it.
    /// The batch goes out when the view closes or is navigated away from.
    pub async fn stage_score(&self, id: &AbstractId, slot: Slot, value: f64) -> SyncOutcome {
        if !value.is_finite() {
            warn!(abstract_id = %id, %slot, "ignoring non-numeric score");
            return SyncOutcome::Skipped;
        }

        let staged = match self.store.lock().await.get_open_modal_mut(id) {
            Some(binding) => {
                binding.pending_scores.insert(slot, value);
                binding.confirmed_scores.insert(slot, value);
                true
            }
            None => false,
        };
        if !staged {
            warn!(abstract_id = %id, %slot, "no open detail view to stage score in");
            return SyncOutcome::Skipped;
        }

        self.emit(ReviewEvent::ScoreCellUpdated {
            abstract_id: id.clone(),
            slot,
            score: value,
        });
        SyncOutcome::Completed
    }

    /// Keeps the typed comment text so navigation can flush it later.
    pub async fn set_comment_draft(&self, id: &AbstractId, text: impl Into<String>) {
        if let Some(binding) = self.store.lock().await.get_open_modal_mut(id) {
            binding.comment_draft = text.into();
        }
    }

    /// Posts the draft held by the detail view, if any.
    pub async fn save_comment_draft(&self, id: &AbstractId) -> SyncOutcome {
        let draft = {
            let store = self.store.lock().await;
            store
                .get_open_modal(id)
                .map(|binding| binding.comment_draft.clone())
                .unwrap_or_default()
        };
        self.submit_comment(id, &draft).await
    }

    /// Posts a comment as the current reviewer. An empty body is a silent
    /// no-op. The form stays disabled while the request runs and also after
    /// a failure.
    pub async fn submit_comment(&self, id: &AbstractId, body: &str) -> SyncOutcome {
        if body.trim().is_empty() {
            debug!(abstract_id = %id, "skipping empty comment");
            return SyncOutcome::Skipped;
        }

        self.set_comment_form(id, CommentFormState::Disabled).await;

        let comment = NewComment {
            abstract_id: id.clone(),
            body: body.to_string(),
            email: self.settings.current_user.clone(),
        };
        if let Err(err) = self.backend.create_comment(&comment).await {
            return self.fail("Saving your comment failed", err);
        }

        let comments = match self.fetch_comments(id).await {
            Ok(comments) => comments,
            Err(err) => return self.fail("Reloading comments failed", err),
        };

        let still_open = {
            let mut store = self.store.lock().await;
            match store.get_open_modal_mut(id) {
                Some(binding) => {
                    binding.comments = comments.clone();
                    binding.comment_draft.clear();
                    binding.comment_form = CommentFormState::Enabled;
                    true
                }
                None => false,
            }
        };
        if still_open {
            self.emit(ReviewEvent::CommentsUpdated {
                abstract_id: id.clone(),
                comments,
            });
            self.emit(ReviewEvent::CommentFormChanged {
                abstract_id: id.clone(),
                state: CommentFormState::Enabled,
            });
        }
        SyncOutcome::Completed
    }

    /// Moves from the detail view of `id` to its neighbour. Any typed comment
    /// is saved first; if that save fails the view stays where it is. In
    /// batched mode the source's scores are posted and the overview refreshed
    /// before the target opens.
    pub async fn navigate(&self, id: &AbstractId, direction: Direction) -> SyncOutcome {
        if self.save_comment_draft(id).await == SyncOutcome::Failed {
            return SyncOutcome::Failed;
        }

        let target = {
            let store = self.store.lock().await;
            let (prev, next) = store.neighbours(id);
            match direction {
                Direction::Prev => prev,
                Direction::Next => next,
            }
        };
        let Some(target) = target else {
            return SyncOutcome::Skipped;
        };

        let forgotten = self.store.lock().await.forget_modal(id);
        if let Some(binding) = forgotten {
            self.emit(ReviewEvent::DetailClosed {
                abstract_id: id.clone(),
            });
            if self.settings.score_mode == ScoreSubmitMode::Batched {
                if let Err(outcome) = self.flush_pending_scores(&binding).await {
                    return outcome;
                }
                if self.load_all().await == SyncOutcome::Failed {
                    return SyncOutcome::Failed;
                }
            }
        }
        self.open_detail(&target).await
    }

    /// Builds the editing form for `id` from a fresh copy of the record.
    pub async fn edit_form(&self, id: &AbstractId) -> Option<AbstractForm> {
        match self.backend.get_abstract(id).await {
            Ok(record) => Some(AbstractForm::from_abstract(&record)),
            Err(err) => {
                self.fail("Loading the abstract failed", err);
                None
            }
        }
    }

    /// Creates the abstract when the form has no usable id, updates it
    /// otherwise, then refreshes the overview.
    pub async fn save_abstract(&self, form: AbstractForm) -> SyncOutcome {
        let mut record = form.into_abstract();
        let result = match record.id.clone() {
            Some(id) => {
                if let Some(existing) = self.store.lock().await.abstract_by_id(&id) {
                    record.created = existing.created;
                }
                info!(abstract_id = %id, "updating abstract");
                self.backend.update_abstract(&record).await
            }
            None => {
                info!(title = %record.title, "creating abstract");
                self.backend.create_abstract(&record).await
            }
        };

        if let Err(err) = result {
            return self.fail("Saving the abstract failed", err);
        }
        self.load_all().await
    }

    /// Opens the confirmation dialog. Nothing is removed yet.
    pub async fn request_delete(&self, id: &AbstractId) -> SyncOutcome {
        self.store.lock().await.set_pending_delete(id.clone());
        self.emit(ReviewEvent::ConfirmDelete {
            abstract_id: id.clone(),
        });
        SyncOutcome::Completed
    }

    pub async fn cancel_delete(&self) -> SyncOutcome {
        let Some(id) = self.store.lock().await.take_pending_delete() else {
            return SyncOutcome::Skipped;
        };
        self.emit(ReviewEvent::DeleteDialogDismissed { abstract_id: id });
        SyncOutcome::Completed
    }

    /// Issues the delete for the abstract awaiting confirmation, dismisses
    /// the dialog and refreshes. Rows are only removed by that refresh.
    pub async fn confirm_delete(&self) -> SyncOutcome {
        let Some(id) = self.store.lock().await.take_pending_delete() else {
            return SyncOutcome::Skipped;
        };

        let result = self.backend.delete_abstract(&id).await;
        self.emit(ReviewEvent::DeleteDialogDismissed {
            abstract_id: id.clone(),
        });
        if let Err(err) = result {
            return self.fail("Deleting the abstract failed", err);
        }

        info!(abstract_id = %id, "abstract deleted");
        if self.store.lock().await.forget_modal(&id).is_some() {
            self.emit(ReviewEvent::DetailClosed {
                abstract_id: id.clone(),
            });
        }
        self.load_all().await
    }

    pub async fn summaries(&self) -> Vec<Summary> {
        self.store.lock().await.summaries().to_vec()
    }

    pub async fn totals(&self) -> OverviewTotals {
        self.store.lock().await.totals()
    }

    pub async fn export_table(&self) -> ExportTable {
        self.store.lock().await.export().clone()
    }

    pub async fn open_binding(&self, id: &AbstractId) -> Option<WidgetBinding> {
        self.store.lock().await.get_open_modal(id).cloned()
    }

    pub async fn open_modal_ids(&self) -> Vec<AbstractId> {
        self.store.lock().await.open_modal_ids()
    }

    pub async fn pending_delete(&self) -> Option<AbstractId> {
        self.store.lock().await.pending_delete().cloned()
    }

    async fn fetch_comments(&self, id: &AbstractId) -> Result<Vec<Comment>> {
        let mut comments = self.backend.list_comments(id).await?;
        comments.reverse();
        Ok(comments)
    }

    async fn flush_pending_scores(&self, binding: &WidgetBinding) -> Result<(), SyncOutcome> {
        if binding.pending_scores.is_empty() {
            return Ok(());
        }
        let updates: Vec<ScoreUpdate> = binding
            .pending_scores
            .iter()
            .map(|(slot, score)| ScoreUpdate {
                id: binding.abstract_id.clone(),
                slot: *slot,
                email: self.settings.current_user.clone(),
                score: *score,
            })
            .collect();

        match self.backend.update_scores(&updates).await {
            Ok(()) => {
                debug!(
                    abstract_id = %binding.abstract_id,
                    count = updates.len(),
                    "score batch saved"
                );
                Ok(())
            }
            Err(err) => Err(self.fail("Saving your scores failed", err)),
        }
    }

    async fn set_comment_form(&self, id: &AbstractId, state: CommentFormState) {
        let changed = {
            let mut store = self.store.lock().await;
            match store.get_open_modal_mut(id) {
                Some(binding) => {
                    binding.comment_form = state;
                    true
                }
                None => false,
            }
        };
        if changed {
            self.emit(ReviewEvent::CommentFormChanged {
                abstract_id: id.clone(),
                state,
            });
        }
    }

    fn fail(&self, context: &str, err: anyhow::Error) -> SyncOutcome {
        error!(%context, error = %format!("{err:#}"), "review backend request failed");
        self.emit(ReviewEvent::Alert {
            message: format!(
                "{context}: {err}. Please contact {} if this keeps happening.",
                self.settings.contact
            ),
        });
        SyncOutcome::Failed
    }

    fn emit(&self, event: ReviewEvent) {
        // no subscribers is fine; nothing is rendering yet
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/sync_tests.rs"]
mod tests;

use serde::{Deserialize, Serialize};

use crate::domain::{AbstractId, Email, Slot};

/// One element of the `POST /updatescores` batch.
///
/// `score` is always a JSON number on the wire; the backend rejects numbers
/// encoded as strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreUpdate {
    pub id: AbstractId,
    pub slot: Slot,
    pub email: Email,
    pub score: f64,
}

/// Body of `PUT /comments/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewComment {
    pub abstract_id: AbstractId,
    pub body: String,
    pub email: Email,
}

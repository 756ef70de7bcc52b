//! Telling idempotent conflicts apart from real failures.
//!
//! The control plane only reports failures as text, so all matching on error
//! messages lives here.

use crate::client::ClientError;
use serde::Serialize;

/// Synthesized result for a mutation the remote side had already applied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Satisfied {
    pub status: String,
    pub note: String,
}

#[derive(Debug)]
pub enum Classification<T> {
    Success(T),
    AlreadySatisfied(Satisfied),
    Fatal(ClientError),
}

#[derive(Clone, Debug)]
struct ConflictRule {
    /// lowercase
    phrase: String,
    status: String,
    note: String,
}

#[derive(Clone, Debug, Default)]
pub struct OutcomeClassifier {
    rules: Vec<ConflictRule>,
}

impl OutcomeClassifier {
    /// A classifier without rules, every failure is fatal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Failures whose message contains `phrase` (case-insensitive) count as already satisfied.
    pub fn rule(
        mut self,
        phrase: impl AsRef<str>,
        status: impl Into<String>,
        note: impl Into<String>,
    ) -> Self {
        self.rules.push(ConflictRule {
            phrase: phrase.as_ref().to_lowercase(),
            status: status.into(),
            note: note.into(),
        });
        self
    }

    /// Conflicts reported when pushing a configuration to a node.
    pub fn config_propagation() -> Self {
        Self::new()
            .rule(
                "already applied",
                "applied",
                "configuration version was already applied on the node",
            )
            .rule(
                "already successfully completed",
                "completed",
                "configuration propagation had already completed",
            )
    }

    /// Conflicts reported when syncing from a peer that has nothing new.
    pub fn peer_sync() -> Self {
        Self::new().rule("already in sync", "synced", "target was already in sync")
    }

    pub fn already_satisfied(&self, err: &ClientError) -> Option<Satisfied> {
        let message = err.to_string().to_lowercase();
        self.rules
            .iter()
            .find(|rule| message.contains(&rule.phrase))
            .map(|rule| Satisfied {
                status: rule.status.clone(),
                note: rule.note.clone(),
            })
    }

    pub fn classify<T>(&self, result: Result<T, ClientError>) -> Classification<T> {
        let err = match result {
            Ok(value) => return Classification::Success(value),
            Err(err) => err,
        };
        match self.already_satisfied(&err) {
            Some(satisfied) => {
                log::info!("Treating failure as already satisfied: {err}");
                Classification::AlreadySatisfied(satisfied)
            }
            None => Classification::Fatal(err),
        }
    }
}

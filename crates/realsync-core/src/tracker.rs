//! Identity continuity tracking.
//!
//! For each (session, face slot) the tracker keeps a unit-length baseline
//! embedding. The first sighting stores the embedding verbatim and is
//! always trusted. Every later sighting is scored by its cosine distance
//! to the baseline ("shift"), and the baseline then moves towards the new
//! embedding by an exponential moving average.
//!
//! The moving average tolerates gradual lighting and pose change, but it
//! also slowly absorbs a genuine identity swap that persists for many
//! frames. Flagged frames still update the baseline.
//!
//! # Concurrency
//!
//! The session map sits behind an `RwLock` that is only held long enough
//! to find, create or remove a session entry. Each session's baselines
//! have their own `Mutex`, which serialises the read-modify-write of the
//! moving average for that session without blocking other sessions.

use image::RgbImage;
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;

use crate::capability::{FallbackReason, ModelStatus, Signal};
use crate::embedding::{cosine_similarity, l2_normalize, ProjectionEmbedder};
use crate::risk::RiskLevel;

/// Shift below this is low risk.
const SHIFT_LOW_RISK: f32 = 0.20;
/// Shift below this (and not below [`SHIFT_LOW_RISK`]) is medium risk.
const SHIFT_MEDIUM_RISK: f32 = 0.40;
/// Shift below this counts as the same person. Deliberately independent
/// of the risk tiers: shifts in [0.20, 0.25) are "same person" at medium risk.
const SAME_PERSON_MAX_SHIFT: f32 = 0.25;

pub const DEFAULT_BASELINE_ALPHA: f32 = 0.1;

#[derive(Error, Debug, PartialEq)]
pub enum IdentityError {
    #[error("empty embedding")]
    Empty,
    #[error("embedding contains NaN/Inf")]
    NonFinite,
    #[error("embedding dimension {got} does not match baseline dimension {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityAssessment {
    pub embedding_shift: f32,
    pub same_person: bool,
    pub risk_level: RiskLevel,
}

impl IdentityAssessment {
    /// Returned for a first sighting, for frames without faces, and when
    /// tracking fails (identity tracking fails open).
    pub fn neutral() -> Self {
        Self {
            embedding_shift: 0.0,
            same_person: true,
            risk_level: RiskLevel::Low,
        }
    }

    fn from_shift(shift: f32) -> Self {
        Self {
            embedding_shift: shift,
            same_person: shift < SAME_PERSON_MAX_SHIFT,
            risk_level: risk_for_shift(shift),
        }
    }
}

pub fn risk_for_shift(shift: f32) -> RiskLevel {
    if shift < SHIFT_LOW_RISK {
        RiskLevel::Low
    } else if shift < SHIFT_MEDIUM_RISK {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}

/// Face slot → baseline embedding for one session.
type SessionBaselines = HashMap<usize, Vec<f32>>;

/// Session-scoped store of identity baselines.
pub struct IdentityTracker {
    alpha: f32,
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionBaselines>>>>,
}

impl Default for IdentityTracker {
    fn default() -> Self {
        Self::new(DEFAULT_BASELINE_ALPHA)
    }
}

impl IdentityTracker {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the baseline map for `session_id`.
    fn session(&self, session_id: &str) -> Arc<Mutex<SessionBaselines>> {
        {
            let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(session) = sessions.get(session_id) {
                return Arc::clone(session);
            }
        }

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let session = sessions.entry(session_id.to_string()).or_insert_with(|| {
            tracing::debug!(session_id, "identity session created");
            Arc::new(Mutex::new(HashMap::new()))
        });
        Arc::clone(session)
    }

    /// Score `embedding` against the baseline for (session, slot) and fold
    /// it into the baseline.
    ///
    /// The first call for a pair stores `embedding` verbatim and returns
    /// [`IdentityAssessment::neutral`]. A rejected embedding leaves the
    /// stored baseline untouched.
    pub fn compare_to_baseline(
        &self,
        session_id: &str,
        slot: usize,
        embedding: &[f32],
    ) -> Result<IdentityAssessment, IdentityError> {
        if embedding.is_empty() {
            return Err(IdentityError::Empty);
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(IdentityError::NonFinite);
        }

        let session = self.session(session_id);
        let mut baselines = session.lock().unwrap_or_else(PoisonError::into_inner);

        let baseline = match baselines.entry(slot) {
            Entry::Vacant(vacant) => {
                vacant.insert(embedding.to_vec());
                tracing::debug!(session_id, slot, "identity baseline stored");
                return Ok(IdentityAssessment::neutral());
            }
            Entry::Occupied(occupied) => occupied.into_mut(),
        };

        if baseline.len() != embedding.len() {
            return Err(IdentityError::DimensionMismatch {
                expected: baseline.len(),
                got: embedding.len(),
            });
        }

        let similarity = cosine_similarity(baseline, embedding);
        let shift = (1.0 - similarity).clamp(0.0, 1.0);

        for (b, e) in baseline.iter_mut().zip(embedding) {
            *b = (1.0 - self.alpha) * *b + self.alpha * e;
        }
        l2_normalize(baseline);

        let assessment = IdentityAssessment::from_shift(shift);
        if assessment.risk_level != RiskLevel::Low {
            tracing::debug!(
                session_id,
                slot,
                shift,
                risk = %assessment.risk_level,
                "identity drift detected"
            );
        }
        Ok(assessment)
    }

    /// Drop every baseline of `session_id`. Returns whether the session existed.
    pub fn clear_session(&self, session_id: &str) -> bool {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
            .is_some();
        if removed {
            tracing::debug!(session_id, "identity session cleared");
        }
        removed
    }

    pub fn clear_all(&self) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Copy of the current baseline for (session, slot), if any.
    pub fn baseline(&self, session_id: &str, slot: usize) -> Option<Vec<f32>> {
        let session = {
            let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(sessions.get(session_id)?)
        };
        let baselines = session.lock().unwrap_or_else(PoisonError::into_inner);
        baselines.get(&slot).cloned()
    }
}

/// Identity adapter: embedding + continuity tracking behind the same
/// fail-open contract as the model adapters.
pub struct IdentityAdapter {
    embedder: ProjectionEmbedder,
    tracker: IdentityTracker,
}

impl IdentityAdapter {
    pub fn new(embedder: ProjectionEmbedder, tracker: IdentityTracker) -> Self {
        Self { embedder, tracker }
    }

    /// The embedder is in-process and always available.
    pub fn status(&self) -> ModelStatus {
        ModelStatus::Loaded
    }

    pub fn tracker(&self) -> &IdentityTracker {
        &self.tracker
    }

    pub fn embedder(&self) -> &ProjectionEmbedder {
        &self.embedder
    }

    pub fn assess(&self, session_id: &str, slot: usize, crop: &RgbImage) -> Signal<IdentityAssessment> {
        let embedding = self.embedder.compute_embedding(crop);
        match self.tracker.compare_to_baseline(session_id, slot, &embedding) {
            Ok(assessment) => Signal::Measured(assessment),
            Err(e) => {
                tracing::warn!(session_id, slot, error = %e, "identity analysis failed");
                Signal::Fallback(IdentityAssessment::neutral(), FallbackReason::Failed)
            }
        }
    }
}

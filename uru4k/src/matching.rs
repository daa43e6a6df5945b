//! Verification and identification decisions
//!
//! The matcher itself is an external capability behind [`Matcher`]. It
//! reports normalized scores; everything past that boundary uses [`Score`]
//! and the configured threshold.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use uru4k_core::DecodedImage;
use uru4k_transport::UsbTransport;
use uru4k_types::{Score, Template};

use crate::error::{Error, Result};

/// What the matcher compares against stored templates
#[derive(Debug, Clone)]
pub enum Probe {
    /// Image captured through the register protocol
    Image(DecodedImage),

    /// Template sampled by the matcher itself, or produced elsewhere
    Template(Template),
}

/// Failure reported by the matcher
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct MatcherError(pub String);

/// Native fingerprint matcher
///
/// Calls block, possibly on the sensor; they are always made from the
/// blocking thread pool. Scores are normalized to 0.0..=1.0 and a negative
/// value signals failure.
///
/// Methods taking a `session` drive the sensor through the reader this
/// process already holds open and claimed. The MODE register is returned
/// to READY once they return.
#[cfg_attr(test, mockall::automock)]
pub trait Matcher: Send + Sync {
    /// Run a complete multi-scan enrollment and return the merged template
    fn enroll(
        &self,
        session: &mut (dyn UsbTransport + 'static),
        scans: u32,
    ) -> std::result::Result<Template, MatcherError>;

    /// Sample one live finger and return its probe template
    fn capture(
        &self,
        session: &mut (dyn UsbTransport + 'static),
    ) -> std::result::Result<Template, MatcherError>;

    /// Merge captured images into one template
    fn create_template(
        &self,
        images: &[DecodedImage],
    ) -> std::result::Result<Template, MatcherError>;

    /// Score a probe against one template
    fn verify(&self, probe: &Probe, template: &Template) -> std::result::Result<f32, MatcherError>;

    /// Score a probe against every gallery template, one score per entry
    fn identify(
        &self,
        probe: &Probe,
        gallery: &[Template],
    ) -> std::result::Result<Vec<f32>, MatcherError>;
}

impl From<MatcherError> for Error {
    fn from(e: MatcherError) -> Self {
        Self::MatchingFailed(e.0)
    }
}

/// Threshold decisions over a [`Matcher`]
#[derive(Clone)]
pub struct MatchingFacade {
    matcher: Arc<dyn Matcher>,
    threshold: Score,
}

impl MatchingFacade {
    pub fn new(matcher: Arc<dyn Matcher>, threshold: Score) -> Self {
        Self { matcher, threshold }
    }

    pub fn threshold(&self) -> Score {
        self.threshold
    }

    pub fn enroll(
        &self,
        session: &mut (dyn UsbTransport + 'static),
        scans: u32,
    ) -> Result<Template> {
        let template = self.matcher.enroll(session, scans)?;
        non_empty(template)
    }

    /// Live probe sampled by the matcher
    pub fn capture_probe(
        &self,
        session: &mut (dyn UsbTransport + 'static),
    ) -> Result<Probe> {
        let template = self.matcher.capture(session)?;
        Ok(Probe::Template(non_empty(template)?))
    }

    pub fn create_template(&self, images: &[DecodedImage]) -> Result<Template> {
        let template = self.matcher.create_template(images)?;
        non_empty(template)
    }

    /// Score without applying the threshold
    pub fn score(&self, probe: &Probe, template: &Template) -> Result<Score> {
        let raw = self.matcher.verify(probe, template)?;
        to_score(raw)
    }

    /// 1:1 decision; fails with `VerificationFailed` below the threshold
    pub fn verify(&self, probe: &Probe, template: &Template) -> Result<Score> {
        let raw = self.matcher.verify(probe, template)?;
        let (score, matched) = self.decide(raw)?;
        debug!(raw, score = score.value(), threshold = self.threshold.value(), "Verify");

        if matched {
            Ok(score)
        } else {
            Err(Error::VerificationFailed {
                score,
                threshold: self.threshold,
            })
        }
    }

    /// 1:N decision; returns the index and score of the best entry
    ///
    /// The first of several equal best scores wins. Fails with
    /// `IdentificationFailed` when the best score is below the threshold.
    pub fn identify(&self, probe: &Probe, gallery: &[Template]) -> Result<(usize, Score)> {
        if gallery.is_empty() {
            return Err(Error::NoTemplatesInGallery);
        }

        let raw = self.matcher.identify(probe, gallery)?;
        if raw.len() != gallery.len() {
            return Err(Error::MatchingFailed(format!(
                "matcher returned {} scores for {} templates",
                raw.len(),
                gallery.len()
            )));
        }

        let (index, best) = best(&raw)?;
        let (score, matched) = self.decide(best)?;
        debug!(index, raw = best, score = score.value(), threshold = self.threshold.value(), "Identify");

        if matched {
            Ok((index, score))
        } else {
            Err(Error::IdentificationFailed { best: Some(score) })
        }
    }

    /// Apply the threshold to the raw matcher value
    ///
    /// The reported score of a rejection is kept below the threshold even
    /// when rounding would reach it.
    fn decide(&self, raw: f32) -> Result<(Score, bool)> {
        let score = to_score(raw)?;
        if raw >= self.threshold.as_normalized() {
            return Ok((score, true));
        }

        let below = Score::new(self.threshold.value().saturating_sub(1)).unwrap_or(Score::MIN);
        Ok((score.min(below), false))
    }
}

/// Index and raw value of the first highest score
fn best(raw: &[f32]) -> Result<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (index, value) in raw.iter().copied().enumerate() {
        to_score(value)?;
        if best.is_none_or(|(_, current)| value > current) {
            best = Some((index, value));
        }
    }
    best.ok_or(Error::NoTemplatesInGallery)
}

impl fmt::Debug for MatchingFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchingFacade")
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

fn to_score(raw: f32) -> Result<Score> {
    Score::from_normalized(raw)
        .ok_or_else(|| Error::MatchingFailed(format!("matcher reported {}", raw)))
}

fn non_empty(template: Template) -> Result<Template> {
    if template.is_empty() {
        return Err(Error::MatchingFailed("matcher produced an empty template".into()));
    }
    Ok(template)
}

//! Completion Validator (§4.8): enforces the tensor-completeness invariant
//! over every domain's claimed provider/prompt matrix. No teacher or pack
//! equivalent; grounded structurally on the Domain/Response Store
//! operations it composes, and on this project's history of domains being
//! marked complete before every response had actually landed (§9).

use anyhow::Result;
use tracing::{info, warn};

use crate::config::{ValidatorConfig, ValidatorMode};
use crate::store::domain::DomainStore;
use crate::store::response::ResponseStore;

pub struct CompletionValidator<'a> {
    domains: &'a DomainStore,
    responses: &'a ResponseStore,
    mode: ValidatorMode,
    min_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Complete,
    Incomplete { present: i64, expected: i64 },
}

impl<'a> CompletionValidator<'a> {
    pub fn new(domains: &'a DomainStore, responses: &'a ResponseStore, config: &ValidatorConfig) -> Self {
        Self { domains, responses, mode: config.mode, min_ratio: config.min_ratio }
    }

    /// `expected` is the domain's planned tensor size at claim time
    /// (|EnabledProviders| x |PromptSet|), fixed even if a provider is
    /// later short-circuited mid-cycle (§4.7 edge case).
    pub fn evaluate(&self, domain_id: &str, expected: i64) -> Result<Verdict> {
        let present = self.responses.distinct_pairs_by_domain(domain_id)?;
        let ratio = if expected == 0 { 1.0 } else { present as f64 / expected as f64 };
        let required_ratio = match self.mode {
            ValidatorMode::Strict => self.min_ratio,
            ValidatorMode::Relaxed => self.min_ratio.min(0.8),
        };
        if ratio >= required_ratio {
            Ok(Verdict::Complete)
        } else {
            Ok(Verdict::Incomplete { present, expected })
        }
    }

    /// Evaluate a domain and, if complete, transition it via the Domain
    /// Store. Returns the verdict either way; the caller decides whether an
    /// `Incomplete` verdict leaves the domain in `processing` or triggers a
    /// `failed` transition (§9: no automatic transition to `failed` here).
    pub fn validate_and_transition(&self, domain_id: &str, expected: i64) -> Result<Verdict> {
        let verdict = self.evaluate(domain_id, expected)?;
        if verdict == Verdict::Complete {
            self.domains.mark_completed(domain_id)?;
        }
        Ok(verdict)
    }

    /// Startup/periodic reconciliation (§4.8): re-validate every domain
    /// currently marked `completed` and reset any that no longer satisfy
    /// the tensor-completeness invariant. Guards against the historical
    /// defect of domains marked complete before their responses landed.
    pub fn reconcile(&self, expected: i64) -> Result<usize> {
        let completed_ids = self.domains.completed_ids()?;
        let mut reset_count = 0;
        for id in completed_ids {
            match self.evaluate(&id, expected)? {
                Verdict::Complete => {}
                Verdict::Incomplete { present, expected } => {
                    warn!(domain_id = %id, present, expected, "reconciliation found incomplete domain marked completed");
                    self.domains.reset(&id, "reconciliation: tensor-completeness violated")?;
                    reset_count += 1;
                }
            }
        }
        info!(reset_count, "reconciliation pass finished");
        Ok(reset_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::response::Response;
    use chrono::Utc;
    use tempfile::tempdir;

    fn stores() -> (DomainStore, ResponseStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let domains = DomainStore::open(&dir.path().join("d.db")).unwrap();
        let responses = ResponseStore::open(&dir.path().join("r.db")).unwrap();
        (domains, responses, dir)
    }

    fn strict_config() -> ValidatorConfig {
        ValidatorConfig { mode: ValidatorMode::Strict, min_ratio: 1.0, reconcile_every_n_cycles: 10 }
    }

    #[test]
    fn full_tensor_is_complete() {
        let (domains, responses, _dir) = stores();
        domains.insert_if_absent("example.com", 5, "legacy").unwrap();
        let claimed = domains.claim_pending(10, None).unwrap();
        let id = &claimed[0].id;
        responses
            .append(&Response {
                domain_id: id.clone(),
                model: "openai/gpt-4o-mini".to_string(),
                prompt_type: "business_analysis".to_string(),
                prompt: "p".to_string(),
                response: "r".to_string(),
                response_time_ms: 1,
                batch_id: "crawl_1".to_string(),
                created_at: Utc::now(),
            })
            .unwrap();
        let validator = CompletionValidator::new(&domains, &responses, &strict_config());
        assert_eq!(validator.evaluate(id, 1).unwrap(), Verdict::Complete);
    }

    #[test]
    fn partial_tensor_is_incomplete_under_strict_mode() {
        let (domains, responses, _dir) = stores();
        domains.insert_if_absent("example.com", 5, "legacy").unwrap();
        let claimed = domains.claim_pending(10, None).unwrap();
        let id = &claimed[0].id;
        let validator = CompletionValidator::new(&domains, &responses, &strict_config());
        assert_eq!(validator.evaluate(id, 3).unwrap(), Verdict::Incomplete { present: 0, expected: 3 });
    }

    #[test]
    fn validate_and_transition_marks_domain_completed_only_when_complete() {
        let (domains, responses, _dir) = stores();
        domains.insert_if_absent("example.com", 5, "legacy").unwrap();
        let claimed = domains.claim_pending(10, None).unwrap();
        let id = claimed[0].id.clone();
        let validator = CompletionValidator::new(&domains, &responses, &strict_config());
        validator.validate_and_transition(&id, 3).unwrap();
        assert_eq!(domains.get(&id).unwrap().unwrap().status as i32, crate::store::domain::DomainStatus::Processing as i32);
    }

    #[test]
    fn reconcile_resets_prematurely_completed_domains() {
        let (domains, responses, _dir) = stores();
        domains.insert_if_absent("example.com", 5, "legacy").unwrap();
        let claimed = domains.claim_pending(10, None).unwrap();
        let id = claimed[0].id.clone();
        domains.mark_completed(&id).unwrap();
        let validator = CompletionValidator::new(&domains, &responses, &strict_config());
        let reset_count = validator.reconcile(3).unwrap();
        assert_eq!(reset_count, 1);
        assert_eq!(domains.get(&id).unwrap().unwrap().status as i32, crate::store::domain::DomainStatus::Pending as i32);
    }
}

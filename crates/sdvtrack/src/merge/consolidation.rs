//! Multi-source value consolidation.
//!
//! Some logical values are recorded under several keys of one subject, e.g.
//! `AE_TERM_1 .. AE_TERM_K`. Candidates are scanned in ascending group-index
//! order; the first non-blank raw value becomes the source value of every
//! candidate. When all candidates are blank each keeps its own raw value.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use regex::Regex;
use rusqlite::Connection;

use crate::config::ConsolidationRule;
use crate::db::record_repo::{self, CandidateRow};
use crate::db::DatabaseError;
use crate::error::ConfigError;
use crate::model::{eq_folded, fold_case, normalize_component};

#[derive(Debug, Clone)]
struct CompiledRule {
    name: String,
    pattern: Regex,
    form: Option<String>,
}

impl CompiledRule {
    /// The candidate's group index, if the rule applies to it.
    fn group_index(&self, candidate: &CandidateRow) -> Option<u64> {
        if let Some(form) = &self.form {
            if !eq_folded(&candidate.form, form) {
                return None;
            }
        }
        let captures = self.pattern.captures(&candidate.field)?;
        let index = captures
            .get(1)
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .unwrap_or(u64::MAX);
        Some(index)
    }
}

/// Compiled consolidation rules.
#[derive(Debug, Clone, Default)]
pub struct Consolidator {
    rules: Vec<CompiledRule>,
}

impl Consolidator {
    pub fn new(rules: &[ConsolidationRule]) -> Result<Self, ConfigError> {
        let rules = rules
            .iter()
            .map(|rule| {
                let pattern =
                    Regex::new(&rule.field_pattern).map_err(|e| ConfigError::InvalidPattern {
                        name: rule.name.clone(),
                        reason: e.to_string(),
                    })?;
                Ok(CompiledRule {
                    name: rule.name.clone(),
                    pattern,
                    form: rule.form.as_deref().map(normalize_component),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Resolves the candidates of one subject. Returns the new source value
    /// of every candidate some rule applies to.
    ///
    /// A candidate matched by several rules belongs to the first.
    pub fn resolve(&self, candidates: &[CandidateRow]) -> Vec<(i64, String)> {
        let mut claimed: HashSet<i64> = HashSet::new();
        let mut resolved = Vec::new();

        for rule in &self.rules {
            let mut group: Vec<(u64, &CandidateRow)> = candidates
                .iter()
                .filter(|c| !claimed.contains(&c.id))
                .filter_map(|c| rule.group_index(c).map(|index| (index, c)))
                .collect();
            if group.is_empty() {
                continue;
            }
            group.sort_by(compare_candidates);

            let winner = group
                .iter()
                .map(|(_, c)| c.raw_value.trim())
                .find(|v| !v.is_empty())
                .map(str::to_string);

            log::trace!(
                "Consolidation rule '{}' resolved {} candidates to {:?}",
                rule.name,
                group.len(),
                winner
            );

            for (_, candidate) in group {
                claimed.insert(candidate.id);
                let value = winner.clone().unwrap_or_else(|| candidate.raw_value.clone());
                resolved.push((candidate.id, value));
            }
        }

        resolved
    }

    /// Re-resolves every subject in `subjects` against the records `job_id`
    /// has written so far. Returns the number of records resolved.
    pub fn apply(
        &self,
        conn: &Connection,
        company_id: &str,
        job_id: &str,
        subjects: &BTreeMap<(String, String), (String, String)>,
    ) -> Result<u64, DatabaseError> {
        if self.is_empty() {
            return Ok(0);
        }

        let mut count = 0u64;
        for (site, subject) in subjects.values() {
            let candidates =
                record_repo::consolidation_candidates(conn, company_id, job_id, site, subject)?;
            for (id, value) in self.resolve(&candidates) {
                record_repo::set_source_value(conn, id, &value)?;
                count += 1;
            }
        }
        Ok(count)
    }
}

fn compare_candidates(a: &(u64, &CandidateRow), b: &(u64, &CandidateRow)) -> Ordering {
    let key = |(index, c): &(u64, &CandidateRow)| {
        (
            *index,
            fold_case(&c.visit),
            fold_case(&c.form),
            fold_case(&c.field),
        )
    };
    key(a).cmp(&key(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str, pattern: &str, form: Option<&str>) -> ConsolidationRule {
        ConsolidationRule {
            name: name.to_string(),
            field_pattern: pattern.to_string(),
            form: form.map(str::to_string),
        }
    }

    fn candidate(id: i64, form: &str, field: &str, raw: &str) -> CandidateRow {
        CandidateRow {
            id,
            visit: "Visit 1".to_string(),
            form: form.to_string(),
            field: field.to_string(),
            raw_value: raw.to_string(),
        }
    }

    fn ae_terms() -> Consolidator {
        Consolidator::new(&[rule("ae_term", r"^AE_TERM_(\d+)$", None)]).unwrap()
    }

    #[test]
    fn test_first_non_blank_by_group_index_wins() {
        let candidates = vec![
            candidate(1, "AE", "AE_TERM_10", "Rash"),
            candidate(2, "AE", "AE_TERM_2", "Headache"),
            candidate(3, "AE", "AE_TERM_1", " "),
            candidate(4, "AE", "AE_GRADE", "2"),
        ];
        let mut resolved = ae_terms().resolve(&candidates);
        resolved.sort();
        assert_eq!(
            resolved,
            vec![
                (1, "Headache".to_string()),
                (2, "Headache".to_string()),
                (3, "Headache".to_string()),
            ]
        );
    }

    #[test]
    fn test_all_blank_candidates_keep_their_own_values() {
        let candidates = vec![
            candidate(1, "AE", "AE_TERM_1", ""),
            candidate(2, "AE", "AE_TERM_2", "  "),
        ];
        let mut resolved = ae_terms().resolve(&candidates);
        resolved.sort();
        assert_eq!(resolved, vec![(1, String::new()), (2, "  ".to_string())]);
    }

    #[test]
    fn test_form_restriction() {
        let consolidator =
            Consolidator::new(&[rule("cm", r"^CM_TRT_(\d+)$", Some("Con Meds"))]).unwrap();
        let candidates = vec![
            candidate(1, "con meds", "CM_TRT_1", "Aspirin"),
            candidate(2, "Other", "CM_TRT_2", "Ibuprofen"),
        ];
        assert_eq!(consolidator.resolve(&candidates), vec![(1, "Aspirin".to_string())]);
    }

    #[test]
    fn test_candidate_belongs_to_first_matching_rule() {
        let consolidator = Consolidator::new(&[
            rule("narrow", r"^AE_TERM_(1)$", None),
            rule("wide", r"^AE_TERM_(\d+)$", None),
        ])
        .unwrap();
        let candidates = vec![
            candidate(1, "AE", "AE_TERM_1", "Nausea"),
            candidate(2, "AE", "AE_TERM_2", "Fever"),
        ];
        let mut resolved = consolidator.resolve(&candidates);
        resolved.sort();
        assert_eq!(
            resolved,
            vec![(1, "Nausea".to_string()), (2, "Fever".to_string())]
        );
    }

    #[test]
    fn test_visit_breaks_index_ties() {
        let mut late = candidate(1, "AE", "AE_TERM_1", "Later");
        late.visit = "Visit 2".to_string();
        let early = candidate(2, "AE", "AE_TERM_1", "Earlier");
        let resolved = ae_terms().resolve(&[late, early]);
        assert!(resolved.iter().all(|(_, v)| v == "Earlier"));
    }

    #[test]
    fn test_no_rules_resolves_nothing() {
        let consolidator = Consolidator::default();
        assert!(consolidator.is_empty());
        assert!(consolidator
            .resolve(&[candidate(1, "AE", "AE_TERM_1", "x")])
            .is_empty());
    }

    #[test]
    fn test_invalid_pattern() {
        let err = Consolidator::new(&[rule("bad", "(", None)]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { .. }));
    }
}

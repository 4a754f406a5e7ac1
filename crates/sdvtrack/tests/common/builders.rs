//! Builders for configs and CSV extracts.

#![allow(dead_code)]

use sdvtrack::config::{ChunkConfig, Config, ConsolidationRule, HierarchyConfig};

/// Builder for creating `Config` instances.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Two workers, no prefetch, default estimate inputs.
    pub fn new() -> Self {
        Self {
            config: Config {
                worker_count: 2,
                hierarchy: HierarchyConfig {
                    prefetch_children: 0,
                    cache_capacity: None,
                },
                ..Config::default()
            },
        }
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.worker_count = count;
        self
    }

    /// Closes chunks after `max_rows` rows.
    pub fn chunk_rows(mut self, max_rows: usize) -> Self {
        self.config.chunk = ChunkConfig {
            max_rows,
            max_bytes: u64::MAX,
        };
        self
    }

    pub fn prefetch_children(mut self, count: usize) -> Self {
        self.config.hierarchy.prefetch_children = count;
        self
    }

    pub fn consolidation(mut self, name: &str, field_pattern: &str, form: Option<&str>) -> Self {
        self.config.consolidation.push(ConsolidationRule {
            name: name.to_string(),
            field_pattern: field_pattern.to_string(),
            form: form.map(str::to_string),
        });
        self
    }

    pub fn storage(mut self, database_path: &str, storage_directory: &str) -> Self {
        self.config.database_path = Some(database_path.to_string());
        self.config.storage_directory = Some(storage_directory.to_string());
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for primary extracts. Headers use the spelling EDC exports
/// typically carry, so normalization is exercised too.
pub struct PrimaryCsv {
    rows: Vec<[String; 6]>,
}

impl PrimaryCsv {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn row(
        mut self,
        site: &str,
        subject: &str,
        visit: &str,
        form: &str,
        field: &str,
        value: &str,
    ) -> Self {
        self.rows.push([
            site.to_string(),
            subject.to_string(),
            visit.to_string(),
            form.to_string(),
            field.to_string(),
            value.to_string(),
        ]);
        self
    }

    /// `count` fields `F1..=Fcount` of one form.
    pub fn fields(mut self, site: &str, subject: &str, visit: &str, form: &str, count: usize) -> Self {
        for i in 1..=count {
            self = self.row(site, subject, visit, form, &format!("F{}", i), &i.to_string());
        }
        self
    }

    pub fn build(&self) -> String {
        let mut csv = String::from("Site,Subject,Visit,Form,Field,Value,Entered By,Entered Date\n");
        for [site, subject, visit, form, field, value] in &self.rows {
            csv.push_str(&format!(
                "{},{},{},{},{},{},jdoe,2024-01-15\n",
                site, subject, visit, form, field, value
            ));
        }
        csv
    }
}

impl Default for PrimaryCsv {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for verification extracts.
pub struct VerificationCsv {
    rows: Vec<[String; 6]>,
}

impl VerificationCsv {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn row(
        mut self,
        site: &str,
        subject: &str,
        visit: &str,
        form: &str,
        field: &str,
        verified_by: &str,
    ) -> Self {
        self.rows.push([
            site.to_string(),
            subject.to_string(),
            visit.to_string(),
            form.to_string(),
            field.to_string(),
            verified_by.to_string(),
        ]);
        self
    }

    pub fn build(&self) -> String {
        let mut csv =
            String::from("Site,Subject,Visit,Form,Field,Verified By,Verified Date,Verification Status\n");
        for [site, subject, visit, form, field, by] in &self.rows {
            csv.push_str(&format!(
                "{},{},{},{},{},{},2024-02-01,Verified\n",
                site, subject, visit, form, field, by
            ));
        }
        csv
    }
}

impl Default for VerificationCsv {
    fn default() -> Self {
        Self::new()
    }
}

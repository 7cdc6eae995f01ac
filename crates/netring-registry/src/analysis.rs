//! ---
//! ring_section: "06-registry-service"
//! ring_subsection: "module"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Registry service: directory, aggregation, analysis."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use netring_msg::{
    AlertSeverity, AnalysisAlert, AnalysisSummary, Criticality, ExpectedMembersSpec,
    LocationReport, LocationStatus, MemberRecord, MissingAnalysis,
};
use netring_store::{keys, Store};
use parking_lot::Mutex;
use tracing::{debug, warn};

enum GraceOp {
    Persist(String, i64),
    Clear(String),
}

/// Compares actual per-location membership against the declared expectation.
///
/// First-below timestamps are held in memory and written through to the
/// store so grace tracking survives a registry restart. Store trouble only
/// degrades the write-through; the in-memory view keeps the analysis
/// serving.
pub struct LocationAnalyzer {
    spec: ExpectedMembersSpec,
    store: Arc<dyn Store>,
    first_below: Mutex<Option<HashMap<String, i64>>>,
}

impl LocationAnalyzer {
    pub fn new(spec: ExpectedMembersSpec, store: Arc<dyn Store>) -> Self {
        Self {
            spec,
            store,
            first_below: Mutex::new(None),
        }
    }

    /// Load the YAML declaration file.
    pub fn from_file(path: &Path, store: Arc<dyn Store>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read expected-members file {}", path.display()))?;
        let spec: ExpectedMembersSpec = serde_yaml::from_str(&raw).with_context(|| {
            format!("failed to parse expected-members file {}", path.display())
        })?;
        Ok(Self::new(spec, store))
    }

    /// Run the analysis against the current member list.
    pub async fn analyze(&self, members: &[MemberRecord], now: i64) -> MissingAnalysis {
        let mut actual: HashMap<&str, u32> = HashMap::new();
        for member in members.iter().filter(|m| m.is_active()) {
            *actual.entry(member.location.as_str()).or_default() += 1;
        }

        self.hydrate().await;

        let mut locations: IndexMap<String, LocationReport> = IndexMap::new();
        let mut alerts = Vec::new();
        let mut summary = AnalysisSummary::default();
        let mut grace_ops: Vec<GraceOp> = Vec::new();
        let mut critical_missing = 0u32;

        {
            let mut first_below = self.first_below.lock();
            let first_below = first_below.get_or_insert_with(HashMap::new);

            for (location, spec) in &self.spec.locations {
                let actual_count = actual.get(location.as_str()).copied().unwrap_or(0);
                let missing_count = spec.expected_count.saturating_sub(actual_count);
                summary.total_expected += spec.expected_count;

                let (status, below_since) = if actual_count < spec.expected_count {
                    let since = *first_below.entry(location.clone()).or_insert_with(|| {
                        grace_ops.push(GraceOp::Persist(location.clone(), now));
                        now
                    });
                    if now - since >= spec.grace_period_s as i64 {
                        (LocationStatus::MissingMembers, Some(since))
                    } else {
                        // still inside the grace window
                        (LocationStatus::Healthy, Some(since))
                    }
                } else {
                    if first_below.remove(location).is_some() {
                        grace_ops.push(GraceOp::Clear(location.clone()));
                    }
                    if actual_count > spec.expected_count {
                        (LocationStatus::ExtraMembers, None)
                    } else {
                        (LocationStatus::Healthy, None)
                    }
                };

                if status == LocationStatus::MissingMembers {
                    summary.total_missing_members += missing_count;
                    summary.locations_missing += 1;
                    match spec.criticality {
                        Criticality::High => {
                            critical_missing += 1;
                            alerts.push(AnalysisAlert {
                                severity: AlertSeverity::Error,
                                location: Some(location.clone()),
                                message: format!(
                                    "critical location {location} is missing {missing_count} of {} members",
                                    spec.expected_count
                                ),
                            });
                        }
                        Criticality::Medium | Criticality::Low => {
                            alerts.push(AnalysisAlert {
                                severity: AlertSeverity::Warning,
                                location: Some(location.clone()),
                                message: format!(
                                    "location {location} is missing {missing_count} of {} members",
                                    spec.expected_count
                                ),
                            });
                        }
                    }
                }

                locations.insert(
                    location.clone(),
                    LocationReport {
                        expected_count: spec.expected_count,
                        actual_count,
                        missing_count,
                        status,
                        criticality: Some(spec.criticality),
                        description: spec.description.clone(),
                        below_since,
                    },
                );
            }
        }

        let mut unexpected: Vec<&str> = actual
            .keys()
            .copied()
            .filter(|location| !self.spec.locations.contains_key(*location))
            .collect();
        unexpected.sort_unstable();
        for location in &unexpected {
            let actual_count = actual[*location];
            summary.locations_unexpected += 1;
            locations.insert(
                (*location).to_owned(),
                LocationReport {
                    expected_count: 0,
                    actual_count,
                    missing_count: 0,
                    status: LocationStatus::UnexpectedLocation,
                    criticality: None,
                    description: None,
                    below_since: None,
                },
            );
        }
        if !unexpected.is_empty() {
            alerts.push(AnalysisAlert {
                severity: AlertSeverity::Warning,
                location: None,
                message: format!("unexpected locations present: {}", unexpected.join(", ")),
            });
        }

        summary.total_actual = members.iter().filter(|m| m.is_active()).count() as u32;

        if critical_missing >= self.spec.settings.critical_missing_threshold
            && critical_missing > 0
        {
            alerts.push(AnalysisAlert {
                severity: AlertSeverity::Error,
                location: None,
                message: format!("{critical_missing} critical locations are missing members"),
            });
        }
        if summary.total_missing_members >= self.spec.settings.total_missing_threshold
            && summary.total_missing_members > 0
        {
            alerts.push(AnalysisAlert {
                severity: AlertSeverity::Warning,
                location: None,
                message: format!(
                    "{} members missing across all locations",
                    summary.total_missing_members
                ),
            });
        }

        self.apply_grace_ops(grace_ops).await;

        MissingAnalysis {
            enabled: true,
            timestamp: now,
            locations,
            alerts,
            summary,
        }
    }

    /// Restore first-below timestamps from the store once per process.
    async fn hydrate(&self) {
        if self.first_below.lock().is_some() {
            return;
        }
        let mut restored = HashMap::new();
        match self.store.scan(keys::FIRST_BELOW_PREFIX).await {
            Ok(entries) => {
                for (key, raw) in entries {
                    let Some(location) = keys::strip_prefix(&key, keys::FIRST_BELOW_PREFIX) else {
                        continue;
                    };
                    match raw.parse::<i64>() {
                        Ok(ts) => {
                            restored.insert(location.to_owned(), ts);
                        }
                        Err(_) => warn!(key = %key, "ignoring corrupt first-below timestamp"),
                    }
                }
                debug!(locations = restored.len(), "grace tracking hydrated from store");
            }
            Err(err) => {
                warn!(error = %err, "grace tracking starts empty; store scan failed");
            }
        }
        let mut guard = self.first_below.lock();
        if guard.is_none() {
            *guard = Some(restored);
        }
    }

    async fn apply_grace_ops(&self, ops: Vec<GraceOp>) {
        for op in ops {
            let result = match &op {
                GraceOp::Persist(location, ts) => {
                    self.store
                        .set(&keys::first_below_key(location), ts.to_string(), None)
                        .await
                }
                GraceOp::Clear(location) => {
                    self.store.delete(&keys::first_below_key(location)).await
                }
            };
            if let Err(err) = result {
                warn!(error = %err, "failed to persist grace-tracking update");
            }
        }
    }
}

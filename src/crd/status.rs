//! # Parent Status
//!
//! Condition-based status shared by the KnativeKafka, KnativeServing and
//! KnativeEventing parents, plus the condition-set bookkeeping used to keep it
//! consistent.
//!
//! A *living* set has a top-level `Ready` condition derived from its
//! dependents: `True` when every dependent is `True`, `False` as soon as one is
//! `False`, `Unknown` otherwise. A *batch* set only tracks its own condition
//! types and leaves everything else on the status alone.

use serde::{Deserialize, Serialize};

pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_DEPENDENCIES_INSTALLED: &str = "DependenciesInstalled";
pub const CONDITION_DEPLOYMENTS_AVAILABLE: &str = "DeploymentsAvailable";
pub const CONDITION_INSTALL_SUCCEEDED: &str = "InstallSucceeded";

pub const STATUS_TRUE: &str = "True";
pub const STATUS_FALSE: &str = "False";
pub const STATUS_UNKNOWN: &str = "Unknown";

/// A single status condition
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    /// True, False or Unknown
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Status of a parent resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Installed version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl ComponentStatus {
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == condition_type)
    }

    pub fn is_true(&self, condition_type: &str) -> bool {
        self.condition(condition_type)
            .is_some_and(|c| c.status == STATUS_TRUE)
    }
}

/// The set of condition types a reconciler owns on a parent status
#[derive(Debug, Clone, Copy)]
pub struct ConditionSet {
    happy: Option<&'static str>,
    dependents: &'static [&'static str],
}

impl ConditionSet {
    /// Set with a `Ready` condition derived from `dependents`
    pub const fn living(dependents: &'static [&'static str]) -> Self {
        Self {
            happy: Some(CONDITION_READY),
            dependents,
        }
    }

    /// Set that manages `types` only and derives nothing
    pub const fn batch(types: &'static [&'static str]) -> Self {
        Self {
            happy: None,
            dependents: types,
        }
    }

    /// Every condition type owned by this set
    pub fn types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.happy.into_iter().chain(self.dependents.iter().copied())
    }

    pub fn manage<'a>(&self, status: &'a mut ComponentStatus) -> ConditionManager<'a> {
        ConditionManager { set: *self, status }
    }

    /// Whether `status` satisfies this set
    pub fn is_happy(&self, status: &ComponentStatus) -> bool {
        match self.happy {
            Some(happy) => status.is_true(happy),
            None => self.dependents.iter().all(|t| status.is_true(t)),
        }
    }
}

/// Mutating view over a status, scoped to one condition set
#[derive(Debug)]
pub struct ConditionManager<'a> {
    set: ConditionSet,
    status: &'a mut ComponentStatus,
}

impl ConditionManager<'_> {
    /// Add every owned condition that is missing as `Unknown`
    pub fn initialize(&mut self) {
        for condition_type in self.set.types() {
            if self.status.condition(condition_type).is_none() {
                self.status.conditions.push(Condition {
                    r#type: condition_type.to_string(),
                    status: STATUS_UNKNOWN.to_string(),
                    last_transition_time: Some(now()),
                    reason: None,
                    message: None,
                });
            }
        }
    }

    pub fn mark_true(&mut self, condition_type: &str) {
        self.set(condition_type, STATUS_TRUE, None, None);
        self.recompute_happy();
    }

    pub fn mark_false(&mut self, condition_type: &str, reason: &str, message: impl Into<String>) {
        self.set(
            condition_type,
            STATUS_FALSE,
            Some(reason.to_string()),
            Some(message.into()),
        );
        self.recompute_happy();
    }

    pub fn mark_unknown(&mut self, condition_type: &str, reason: &str, message: impl Into<String>) {
        self.set(
            condition_type,
            STATUS_UNKNOWN,
            Some(reason.to_string()),
            Some(message.into()),
        );
        self.recompute_happy();
    }

    pub fn is_happy(&self) -> bool {
        self.set.is_happy(self.status)
    }

    /// Replace or insert a condition, keeping the transition time unless the
    /// status value flips
    fn set(
        &mut self,
        condition_type: &str,
        status: &str,
        reason: Option<String>,
        message: Option<String>,
    ) {
        match self
            .status
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition_type)
        {
            Some(existing) => {
                if existing.status != status {
                    existing.last_transition_time = Some(now());
                }
                existing.status = status.to_string();
                existing.reason = reason;
                existing.message = message;
            }
            None => self.status.conditions.push(Condition {
                r#type: condition_type.to_string(),
                status: status.to_string(),
                last_transition_time: Some(now()),
                reason,
                message,
            }),
        }
    }

    fn recompute_happy(&mut self) {
        let Some(happy) = self.set.happy else {
            return;
        };

        let mut first_false = None;
        let mut first_unknown = None;
        for dependent in self.set.dependents {
            match self.status.condition(dependent) {
                Some(c) if c.status == STATUS_TRUE => {}
                Some(c) if c.status == STATUS_FALSE => {
                    first_false.get_or_insert_with(|| c.clone());
                }
                Some(c) => {
                    first_unknown.get_or_insert_with(|| c.clone());
                }
                None => {
                    first_unknown.get_or_insert_with(|| Condition {
                        r#type: (*dependent).to_string(),
                        status: STATUS_UNKNOWN.to_string(),
                        last_transition_time: None,
                        reason: None,
                        message: None,
                    });
                }
            }
        }

        if let Some(c) = first_false {
            self.set(happy, STATUS_FALSE, c.reason, c.message);
        } else if let Some(c) = first_unknown {
            self.set(happy, STATUS_UNKNOWN, c.reason, c.message);
        } else {
            self.set(happy, STATUS_TRUE, None, None);
        }
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

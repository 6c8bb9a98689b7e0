//! Top-level cascade requests.

use cascade_core::{WorkItemKey, WorkItemTarget};
use serde::{Deserialize, Serialize};

/// A caller's payload plus the routing identifiers that build its cascade key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeRequest {
    /// Repository name
    pub repo: String,
    /// Branch name
    pub branch: String,
    /// Logical item the cascade produces
    pub target: WorkItemTarget,
    /// Tier 0 input
    pub payload: serde_json::Value,
}

impl CascadeRequest {
    /// Request producing an epic.
    pub fn epic(
        repo: impl Into<String>,
        branch: impl Into<String>,
        epic_id: impl Into<String>,
        epic_name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            repo: repo.into(),
            branch: branch.into(),
            target: WorkItemTarget::Epic {
                id: epic_id.into(),
                name: epic_name.into(),
            },
            payload,
        }
    }

    /// Request producing a QA assessment.
    pub fn assessment(
        repo: impl Into<String>,
        branch: impl Into<String>,
        assessment_id: impl Into<String>,
        assessment_name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            repo: repo.into(),
            branch: branch.into(),
            target: WorkItemTarget::Assessment {
                id: assessment_id.into(),
                name: assessment_name.into(),
            },
            payload,
        }
    }

    /// The deterministic cascade key for this request's routing identifiers.
    ///
    /// # Errors
    ///
    /// Returns an error if any routing identifier is not a valid key component.
    pub fn key(&self) -> cascade_core::Result<WorkItemKey> {
        WorkItemKey::new(self.repo.clone(), self.branch.clone(), self.target.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identical_identifiers_give_identical_keys() {
        let a = CascadeRequest::epic("acme", "feature-x", "EP001", "demo", json!({"x": 1}));
        let b = CascadeRequest::epic("acme", "feature-x", "EP001", "demo", json!({"x": 2}));

        let key_a = a.key().map(|k| k.to_string()).ok();
        assert_eq!(key_a, b.key().map(|k| k.to_string()).ok());
        assert_eq!(
            key_a.as_deref(),
            Some("repo-acme_branch-feature-x_epics-EP001-demo")
        );
    }

    #[test]
    fn test_assessment_key() {
        let request = CascadeRequest::assessment("acme", "main", "QA7", "smoke", json!({}));
        assert_eq!(
            request.key().map(|k| k.to_string()).ok().as_deref(),
            Some("repo-acme_branch-main_qa_assessments-QA7-smoke")
        );
    }

    #[test]
    fn test_invalid_identifier_rejected() {
        let request = CascadeRequest::epic("acme", "", "EP001", "demo", json!({}));
        assert!(request.key().is_err());
    }
}

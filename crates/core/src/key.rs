//! Cascade key format for work items.
//!
//! Keys are shared with external issue-sync and documentation tooling, so the
//! format is exact:
//!
//! ```text
//! repo-{repo}_branch-{branch}_epics-{epic_id}-{epic_name}
//! repo-{repo}_branch-{branch}_epics-{epic_id}-{epic_name}_stories-{story_id}-{story_name}
//! repo-{repo}_branch-{branch}_qa_assessments-{assessment_id}-{assessment_name}
//! ```
//!
//! Components are validated on construction so that every key parses back to
//! the exact same components.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Name of the global set holding every work-item key, swept by external sync.
pub const REPO_KEYS_INDEX: &str = "repo-keys";

const REPO_PREFIX: &str = "repo-";
const BRANCH_MARKER: &str = "_branch-";
const EPICS_MARKER: &str = "_epics-";
const STORIES_MARKER: &str = "_stories-";
const ASSESSMENTS_MARKER: &str = "_qa_assessments-";

const MARKERS: [&str; 4] = [BRANCH_MARKER, EPICS_MARKER, STORIES_MARKER, ASSESSMENTS_MARKER];

/// The type of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemKind {
    Epic,
    Story,
    Assessment,
}

impl std::fmt::Display for WorkItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Epic => write!(f, "epic"),
            Self::Story => write!(f, "story"),
            Self::Assessment => write!(f, "assessment"),
        }
    }
}

/// The type-specific identifier chain of a work item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkItemTarget {
    Epic {
        id: String,
        name: String,
    },
    Story {
        epic_id: String,
        epic_name: String,
        story_id: String,
        story_name: String,
    },
    Assessment {
        id: String,
        name: String,
    },
}

impl WorkItemTarget {
    /// The kind of work item this target addresses.
    #[must_use]
    pub const fn kind(&self) -> WorkItemKind {
        match self {
            Self::Epic { .. } => WorkItemKind::Epic,
            Self::Story { .. } => WorkItemKind::Story,
            Self::Assessment { .. } => WorkItemKind::Assessment,
        }
    }

    /// The innermost identifier (epic, story, or assessment id).
    #[must_use]
    pub fn item_id(&self) -> &str {
        match self {
            Self::Epic { id, .. } | Self::Assessment { id, .. } => id,
            Self::Story { story_id, .. } => story_id,
        }
    }

    /// The innermost name.
    #[must_use]
    pub fn item_name(&self) -> &str {
        match self {
            Self::Epic { name, .. } | Self::Assessment { name, .. } => name,
            Self::Story { story_name, .. } => story_name,
        }
    }

    fn validate(&self) -> Result<(), Error> {
        match self {
            Self::Epic { id, name } => {
                validate_id("epic_id", id)?;
                validate_name("epic_name", name)
            }
            Self::Story {
                epic_id,
                epic_name,
                story_id,
                story_name,
            } => {
                validate_id("epic_id", epic_id)?;
                validate_name("epic_name", epic_name)?;
                validate_id("story_id", story_id)?;
                validate_name("story_name", story_name)
            }
            Self::Assessment { id, name } => {
                validate_id("assessment_id", id)?;
                validate_name("assessment_name", name)
            }
        }
    }
}

/// Composite key of a durable work item: repository, branch, identifier chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkItemKey {
    repo: String,
    branch: String,
    target: WorkItemTarget,
}

impl WorkItemKey {
    /// Build a key from routing identifiers.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidComponent` if any component is empty, contains a
    /// key separator, or (for ids) contains `-`.
    pub fn new(
        repo: impl Into<String>,
        branch: impl Into<String>,
        target: WorkItemTarget,
    ) -> Result<Self, Error> {
        let repo = repo.into();
        let branch = branch.into();
        validate_name("repo", &repo)?;
        validate_name("branch", &branch)?;
        target.validate()?;
        Ok(Self {
            repo,
            branch,
            target,
        })
    }

    /// Key for an epic.
    ///
    /// # Errors
    ///
    /// Returns an error if any component is invalid.
    pub fn epic(
        repo: impl Into<String>,
        branch: impl Into<String>,
        epic_id: impl Into<String>,
        epic_name: impl Into<String>,
    ) -> Result<Self, Error> {
        Self::new(
            repo,
            branch,
            WorkItemTarget::Epic {
                id: epic_id.into(),
                name: epic_name.into(),
            },
        )
    }

    /// Key for a story under an epic.
    ///
    /// # Errors
    ///
    /// Returns an error if any component is invalid.
    pub fn story(
        repo: impl Into<String>,
        branch: impl Into<String>,
        epic_id: impl Into<String>,
        epic_name: impl Into<String>,
        story_id: impl Into<String>,
        story_name: impl Into<String>,
    ) -> Result<Self, Error> {
        Self::new(
            repo,
            branch,
            WorkItemTarget::Story {
                epic_id: epic_id.into(),
                epic_name: epic_name.into(),
                story_id: story_id.into(),
                story_name: story_name.into(),
            },
        )
    }

    /// Key for a QA assessment.
    ///
    /// # Errors
    ///
    /// Returns an error if any component is invalid.
    pub fn assessment(
        repo: impl Into<String>,
        branch: impl Into<String>,
        assessment_id: impl Into<String>,
        assessment_name: impl Into<String>,
    ) -> Result<Self, Error> {
        Self::new(
            repo,
            branch,
            WorkItemTarget::Assessment {
                id: assessment_id.into(),
                name: assessment_name.into(),
            },
        )
    }

    /// Key of a story nested under this epic.
    ///
    /// # Errors
    ///
    /// Returns an error if this key is not an epic or the story components are invalid.
    pub fn child_story(
        &self,
        story_id: impl Into<String>,
        story_name: impl Into<String>,
    ) -> Result<Self, Error> {
        match &self.target {
            WorkItemTarget::Epic { id, name } => Self::story(
                self.repo.clone(),
                self.branch.clone(),
                id.clone(),
                name.clone(),
                story_id,
                story_name,
            ),
            _ => Err(Error::invalid_key(
                self.to_string(),
                "only epics can have child stories",
            )),
        }
    }

    /// The epic a story belongs to.
    #[must_use]
    pub fn parent_epic(&self) -> Option<Self> {
        match &self.target {
            WorkItemTarget::Story {
                epic_id, epic_name, ..
            } => Some(Self {
                repo: self.repo.clone(),
                branch: self.branch.clone(),
                target: WorkItemTarget::Epic {
                    id: epic_id.clone(),
                    name: epic_name.clone(),
                },
            }),
            _ => None,
        }
    }

    /// Repository name.
    #[must_use]
    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Branch name.
    #[must_use]
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Identifier chain.
    #[must_use]
    pub const fn target(&self) -> &WorkItemTarget {
        &self.target
    }

    /// Work item kind.
    #[must_use]
    pub const fn kind(&self) -> WorkItemKind {
        self.target.kind()
    }
}

fn validate_name(field: &'static str, value: &str) -> Result<(), Error> {
    if value.is_empty() {
        return Err(Error::invalid_component(field, value, "must not be empty"));
    }
    if let Some(marker) = MARKERS.iter().find(|marker| value.contains(**marker)) {
        return Err(Error::invalid_component(
            field,
            value,
            format!("must not contain '{marker}'"),
        ));
    }
    Ok(())
}

fn validate_id(field: &'static str, value: &str) -> Result<(), Error> {
    validate_name(field, value)?;
    if value.contains('-') {
        return Err(Error::invalid_component(field, value, "must not contain '-'"));
    }
    Ok(())
}

fn split_id_name<'a>(key: &str, segment: &'a str) -> Result<(&'a str, &'a str), Error> {
    segment
        .split_once('-')
        .ok_or_else(|| Error::invalid_key(key, format!("'{segment}' is not '<id>-<name>'")))
}

impl FromStr for WorkItemKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix(REPO_PREFIX)
            .ok_or_else(|| Error::invalid_key(s, "missing 'repo-' prefix"))?;
        let (repo, rest) = rest
            .split_once(BRANCH_MARKER)
            .ok_or_else(|| Error::invalid_key(s, "missing '_branch-' segment"))?;

        let key = if let Some((branch, assessment)) = rest.split_once(ASSESSMENTS_MARKER) {
            let (id, name) = split_id_name(s, assessment)?;
            Self::assessment(repo, branch, id, name)?
        } else {
            let (branch, epic_part) = rest
                .split_once(EPICS_MARKER)
                .ok_or_else(|| Error::invalid_key(s, "missing '_epics-' or '_qa_assessments-'"))?;
            match epic_part.split_once(STORIES_MARKER) {
                Some((epic, story)) => {
                    let (epic_id, epic_name) = split_id_name(s, epic)?;
                    let (story_id, story_name) = split_id_name(s, story)?;
                    Self::story(repo, branch, epic_id, epic_name, story_id, story_name)?
                }
                None => {
                    let (epic_id, epic_name) = split_id_name(s, epic_part)?;
                    Self::epic(repo, branch, epic_id, epic_name)?
                }
            }
        };

        if key.to_string() == s {
            Ok(key)
        } else {
            Err(Error::invalid_key(s, "key is not in canonical form"))
        }
    }
}

impl TryFrom<String> for WorkItemKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WorkItemKey> for String {
    fn from(key: WorkItemKey) -> Self {
        key.to_string()
    }
}

impl std::fmt::Display for WorkItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{REPO_PREFIX}{}{BRANCH_MARKER}{}", self.repo, self.branch)?;
        match &self.target {
            WorkItemTarget::Epic { id, name } => write!(f, "{EPICS_MARKER}{id}-{name}"),
            WorkItemTarget::Story {
                epic_id,
                epic_name,
                story_id,
                story_name,
            } => write!(
                f,
                "{EPICS_MARKER}{epic_id}-{epic_name}{STORIES_MARKER}{story_id}-{story_name}"
            ),
            WorkItemTarget::Assessment { id, name } => {
                write!(f, "{ASSESSMENTS_MARKER}{id}-{name}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epic_key_exact_format() {
        let key = WorkItemKey::epic("acme", "feature-x", "EP001", "demo");
        assert_eq!(
            key.map(|k| k.to_string()).ok().as_deref(),
            Some("repo-acme_branch-feature-x_epics-EP001-demo")
        );
    }

    #[test]
    fn test_story_key_exact_format() {
        let key = WorkItemKey::story("acme", "main", "EP001", "demo", "ST7", "login-flow");
        assert_eq!(
            key.map(|k| k.to_string()).ok().as_deref(),
            Some("repo-acme_branch-main_epics-EP001-demo_stories-ST7-login-flow")
        );
    }

    #[test]
    fn test_assessment_key_exact_format() {
        let key = WorkItemKey::assessment("acme", "main", "QA3", "risk-review");
        assert_eq!(
            key.map(|k| k.to_string()).ok().as_deref(),
            Some("repo-acme_branch-main_qa_assessments-QA3-risk-review")
        );
    }

    #[test]
    fn test_key_construction_is_deterministic() {
        let a = WorkItemKey::epic("acme", "feature-x", "EP001", "demo").ok();
        let b = WorkItemKey::epic("acme", "feature-x", "EP001", "demo").ok();
        assert!(a.is_some());
        assert_eq!(a.map(|k| k.to_string()), b.map(|k| k.to_string()));
    }

    #[test]
    fn test_parse_reconstruct_roundtrip() {
        let keys = [
            "repo-acme_branch-feature-x_epics-EP001-demo",
            "repo-acme_branch-feature-x_epics-EP001-demo_stories-S1-first-story",
            "repo-my_repo_branch-release/1.2_qa_assessments-A9-smoke-check",
            "repo-acme_branch-main_epics-EP_2-name-with-dashes",
        ];
        for raw in keys {
            let parsed: Result<WorkItemKey, _> = raw.parse();
            assert!(parsed.is_ok(), "{raw} should parse: {parsed:?}");
            assert_eq!(parsed.map(|k| k.to_string()).ok().as_deref(), Some(raw));
        }
    }

    #[test]
    fn test_parse_extracts_components() {
        let parsed: Result<WorkItemKey, _> =
            "repo-acme_branch-feature-x_epics-EP001-demo_stories-S1-checkout".parse();
        assert!(parsed.is_ok());
        if let Ok(key) = parsed {
            assert_eq!(key.repo(), "acme");
            assert_eq!(key.branch(), "feature-x");
            assert_eq!(key.kind(), WorkItemKind::Story);
            assert_eq!(key.target().item_id(), "S1");
            assert_eq!(key.target().item_name(), "checkout");
            assert_eq!(
                key.parent_epic().map(|e| e.to_string()).as_deref(),
                Some("repo-acme_branch-feature-x_epics-EP001-demo")
            );
        }
    }

    #[test]
    fn test_parse_rejects_malformed_keys() {
        for raw in [
            "",
            "acme_branch-main_epics-E1-x",
            "repo-acme_epics-E1-x",
            "repo-acme_branch-main",
            "repo-acme_branch-main_epics-E1",
            "repo-acme_branch-main_epics--x",
            "repo-acme_branch-main_qa_assessments-A1",
        ] {
            assert!(raw.parse::<WorkItemKey>().is_err(), "{raw} should not parse");
        }
    }

    #[test]
    fn test_components_containing_separators_are_rejected() {
        assert!(WorkItemKey::epic("acme", "x_epics-y", "E1", "demo").is_err());
        assert!(WorkItemKey::epic("acme", "main", "E-1", "demo").is_err());
        assert!(WorkItemKey::epic("", "main", "E1", "demo").is_err());
        assert!(WorkItemKey::epic("acme", "main", "E1", "a_stories-b").is_err());
    }

    #[test]
    fn test_child_story_only_from_epic() {
        let epic = WorkItemKey::epic("acme", "main", "E1", "demo");
        assert!(epic.is_ok());
        if let Ok(epic) = epic {
            let story = epic.child_story("S2", "search");
            assert_eq!(
                story.map(|s| s.to_string()).ok().as_deref(),
                Some("repo-acme_branch-main_epics-E1-demo_stories-S2-search")
            );
        }

        let assessment = WorkItemKey::assessment("acme", "main", "A1", "qa");
        assert!(assessment.map(|a| a.child_story("S1", "x").is_err()).unwrap_or(false));
    }

    #[test]
    fn test_key_serde_as_string() {
        let key = WorkItemKey::epic("acme", "main", "E1", "demo").ok();
        let json = key.as_ref().and_then(|k| serde_json::to_string(k).ok());
        assert_eq!(json.as_deref(), Some("\"repo-acme_branch-main_epics-E1-demo\""));
        let back: Option<WorkItemKey> = json.and_then(|j| serde_json::from_str(&j).ok());
        assert_eq!(back, key);
    }
}

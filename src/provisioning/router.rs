//! Maps a free-form resource description to a provisioning handler.
//!
//! Rules are evaluated in order and the first match wins, so more specific
//! resource classes must come before broader ones. Matching is
//! case-insensitive. Routing never fails: anything unmatched goes to the
//! fallback handler.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A downstream provisioning routine for one resource class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Handler {
    Database,
    CloudInfra,
    SourceControl,
    IssueTracker,
    Messaging,
    Generic,
    /// Site-specific handler; carries its own tool name.
    Custom(String),
}

impl Handler {
    /// Name of the tool the executor is asked to run.
    pub fn tool_name(&self) -> &str {
        match self {
            Self::Database => "grant_database_access",
            Self::CloudInfra => "grant_aws_access",
            Self::SourceControl => "grant_github_access",
            Self::IssueTracker => "grant_jira_access",
            Self::Messaging => "grant_slack_access",
            Self::Generic => "grant_generic_access",
            Self::Custom(tool) => tool,
        }
    }

    /// Tool that undoes this handler's grant.
    pub fn revoke_tool_name(&self) -> String {
        format!("revoke_{}", self.tool_name())
    }
}

impl std::fmt::Display for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Database => write!(f, "database"),
            Self::CloudInfra => write!(f, "cloud_infra"),
            Self::SourceControl => write!(f, "source_control"),
            Self::IssueTracker => write!(f, "issue_tracker"),
            Self::Messaging => write!(f, "messaging"),
            Self::Generic => write!(f, "generic"),
            Self::Custom(tool) => write!(f, "custom:{}", tool),
        }
    }
}

/// Condition a resource description must satisfy for a rule to fire.
#[derive(Debug, Clone)]
pub enum RoutePredicate {
    /// Any keyword appears as a substring (keywords are stored lowercase).
    Keywords(Vec<String>),
    /// Case-insensitive regex.
    Pattern(Regex),
}

impl RoutePredicate {
    pub fn keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::Keywords(
            keywords
                .into_iter()
                .map(|k| k.as_ref().to_lowercase())
                .collect(),
        )
    }

    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self::Pattern(regex))
    }

    fn matches(&self, lowered: &str) -> bool {
        match self {
            Self::Keywords(keywords) => keywords.iter().any(|k| lowered.contains(k.as_str())),
            Self::Pattern(regex) => regex.is_match(lowered),
        }
    }
}

/// One (predicate, handler) row of the routing table.
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub predicate: RoutePredicate,
    pub handler: Handler,
}

impl RouteRule {
    pub fn new(predicate: RoutePredicate, handler: Handler) -> Self {
        Self { predicate, handler }
    }
}

/// Ordered routing table with a fallback handler.
#[derive(Debug, Clone)]
pub struct ResourceRouter {
    rules: Vec<RouteRule>,
    fallback: Handler,
}

impl ResourceRouter {
    /// The standard table: database, cloud, source control, issue tracker, messaging.
    pub fn default_rules() -> Self {
        let rules = vec![
            RouteRule::new(RoutePredicate::keywords(["database", "db"]), Handler::Database),
            RouteRule::new(
                RoutePredicate::keywords(["aws", "s3", "ec2"]),
                Handler::CloudInfra,
            ),
            RouteRule::new(
                RoutePredicate::keywords(["github", "repo"]),
                Handler::SourceControl,
            ),
            RouteRule::new(RoutePredicate::keywords(["jira"]), Handler::IssueTracker),
            RouteRule::new(RoutePredicate::keywords(["slack"]), Handler::Messaging),
        ];

        Self {
            rules,
            fallback: Handler::Generic,
        }
    }

    /// A router with no rules; everything goes to `fallback`.
    pub fn empty(fallback: Handler) -> Self {
        Self {
            rules: Vec::new(),
            fallback,
        }
    }

    /// Append a rule after the existing ones.
    pub fn push_rule(&mut self, rule: RouteRule) {
        self.rules.push(rule);
    }

    /// Insert a rule ahead of every existing rule.
    pub fn with_rule_first(mut self, rule: RouteRule) -> Self {
        self.rules.insert(0, rule);
        self
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    pub fn fallback(&self) -> &Handler {
        &self.fallback
    }

    /// Pick the handler for a resource description.
    pub fn route(&self, resource: &str) -> Handler {
        let lowered = resource.to_lowercase();
        let handler = self
            .rules
            .iter()
            .find(|rule| rule.predicate.matches(&lowered))
            .map(|rule| rule.handler.clone())
            .unwrap_or_else(|| self.fallback.clone());

        debug!(resource = %resource, handler = %handler, "Routed resource");
        handler
    }
}

impl Default for ResourceRouter {
    fn default() -> Self {
        Self::default_rules()
    }
}

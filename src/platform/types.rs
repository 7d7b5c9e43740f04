use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structured pull-request data handed to the engine.
///
/// Serialized with GitHub's GraphQL-style field names (`headRefName`, ...)
/// since the serialized form is what the agent sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestInfo {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub head_ref_name: String,
    #[serde(default)]
    pub base_ref_name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreatePullRequest {
    pub title: String,
    pub body: String,
    pub head_branch: String,
    pub base_branch: String,
}

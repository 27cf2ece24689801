//! Typed request variables and response payloads at the GraphQL boundary.
//!
//! The query and mutation documents themselves are opaque to the cache;
//! these types only mirror the JSON shapes going in and coming out so that
//! responses can be deserialized with `serde` and normalized into the store.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{fmt, str::FromStr};

use crate::pagination::PageInfo;

/// Issue state filter understood by the issues query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueState {
    Open,
    Closed,
}

impl IssueState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for IssueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The viewer's watch state on a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionState {
    Subscribed,
    Unsubscribed,
    Ignored,
}

impl SubscriptionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribed => "SUBSCRIBED",
            Self::Unsubscribed => "UNSUBSCRIBED",
            Self::Ignored => "IGNORED",
        }
    }

    /// Whether this state counts toward the repository's watcher total.
    #[must_use]
    pub const fn is_watching(self) -> bool {
        matches!(self, Self::Subscribed)
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUBSCRIBED" => Ok(Self::Subscribed),
            "UNSUBSCRIBED" => Ok(Self::Unsubscribed),
            "IGNORED" => Ok(Self::Ignored),
            _ => Err(ParseStateError { got: s.to_string() }),
        }
    }
}

/// Error returned when a subscription state string is not recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStateError {
    pub got: String,
}

impl fmt::Display for ParseStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid subscription state: '{}'", self.got)
    }
}

impl std::error::Error for ParseStateError {}

// ---------------------------------------------------------------------------
// GetIssuesOfRepository
// ---------------------------------------------------------------------------

/// Variables of the `GetIssuesOfRepository` query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuesQuery {
    pub repository_owner: String,
    pub repository_name: String,
    pub issue_state: IssueState,
    pub cursor: Option<String>,
    pub first: u32,
}

/// `data` of the `GetIssuesOfRepository` response.
///
/// `repository` is `null` when the owner/name pair does not resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuesResponse {
    pub repository: Option<IssuesRepository>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuesRepository {
    pub issues: IssueConnection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueConnection {
    pub edges: Vec<IssueEdge>,
    pub page_info: PageInfo,
}

/// The issues query does not select per-edge cursors, so `cursor` is
/// usually absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueEdge {
    #[serde(default)]
    pub cursor: Option<String>,
    pub node: IssueNode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueNode {
    pub id: String,
    pub number: i64,
    pub state: IssueState,
    pub title: String,
    pub url: String,
    #[serde(rename = "bodyHTML")]
    pub body_html: String,
}

// ---------------------------------------------------------------------------
// Repository listing
// ---------------------------------------------------------------------------

/// Repository node as selected by the repository list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryNode {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(rename = "descriptionHTML")]
    pub description_html: String,
    pub primary_language: Option<Language>,
    pub owner: Option<Owner>,
    pub stargazers: TotalCount,
    pub watchers: TotalCount,
    pub viewer_subscription: Option<SubscriptionState>,
    pub viewer_has_starred: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Language {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub login: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalCount {
    pub total_count: i64,
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

/// The mutations whose responses the reconciler knows how to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MutationOp {
    AddStar,
    RemoveStar,
    Subscribe,
    Unsubscribe,
}

impl MutationOp {
    /// Request variables for the mutation against node `id`.
    #[must_use]
    pub fn variables(self, id: &str) -> serde_json::Value {
        match self {
            Self::AddStar | Self::RemoveStar => json!({ "id": id }),
            Self::Subscribe => json!({
                "subscribableId": id,
                "state": SubscriptionState::Subscribed,
            }),
            Self::Unsubscribe => json!({
                "subscribableId": id,
                "state": SubscriptionState::Unsubscribed,
            }),
        }
    }

    /// Whether the op is a star/unstar counter mutation.
    #[must_use]
    pub const fn is_star(self) -> bool {
        matches!(self, Self::AddStar | Self::RemoveStar)
    }
}

impl fmt::Display for MutationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AddStar => "AddStar",
            Self::RemoveStar => "RemoveStar",
            Self::Subscribe => "Subscribe",
            Self::Unsubscribe => "Unsubscribe",
        };
        f.write_str(name)
    }
}

/// `{ starrable { id viewerHasStarred } }` as returned by add/remove star.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Starrable {
    pub id: String,
    pub viewer_has_starred: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StarPayload {
    pub starrable: Starrable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddStarData {
    pub add_star: StarPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveStarData {
    pub remove_star: StarPayload,
}

/// `{ subscribable { id viewerSubscription } }` as returned by update subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscribable {
    pub id: String,
    pub viewer_subscription: Option<SubscriptionState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPayload {
    pub subscribable: Subscribable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSubscriptionData {
    pub update_subscription: SubscriptionPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issues_query_uses_graphql_variable_names() {
        let query = IssuesQuery {
            repository_owner: "acme".into(),
            repository_name: "widgets".into(),
            issue_state: IssueState::Closed,
            cursor: None,
            first: 5,
        };
        let json = serde_json::to_value(&query).expect("serialize");
        assert_eq!(json["repositoryOwner"], "acme");
        assert_eq!(json["issueState"], "CLOSED");
        assert!(json["cursor"].is_null());
    }

    #[test]
    fn decodes_issue_page() {
        let raw = r#"{
            "repository": {
                "issues": {
                    "edges": [
                        { "node": { "id": "I1", "number": 7, "state": "OPEN",
                                    "title": "Crash", "url": "https://example.com/7",
                                    "bodyHTML": "<p>boom</p>" } }
                    ],
                    "pageInfo": { "endCursor": "Y3Vyc29yOjE=", "hasNextPage": true }
                }
            }
        }"#;
        let response: IssuesResponse = serde_json::from_str(raw).expect("decode");
        let issues = response.repository.expect("repository").issues;
        assert_eq!(issues.edges[0].node.body_html, "<p>boom</p>");
        assert_eq!(issues.edges[0].cursor, None);
        assert_eq!(issues.page_info.end_cursor.as_deref(), Some("Y3Vyc29yOjE="));
        assert!(issues.page_info.has_next_page);
    }

    #[test]
    fn decodes_mutation_payloads() {
        let star: AddStarData = serde_json::from_str(
            r#"{ "addStar": { "starrable": { "id": "R1", "viewerHasStarred": true } } }"#,
        )
        .expect("decode");
        assert!(star.add_star.starrable.viewer_has_starred);

        let sub: UpdateSubscriptionData = serde_json::from_str(
            r#"{ "updateSubscription": { "subscribable": { "id": "R1", "viewerSubscription": "SUBSCRIBED" } } }"#,
        )
        .expect("decode");
        assert_eq!(
            sub.update_subscription.subscribable.viewer_subscription,
            Some(SubscriptionState::Subscribed)
        );
    }

    #[test]
    fn subscription_variables_carry_target_state() {
        let vars = MutationOp::Unsubscribe.variables("R1");
        assert_eq!(vars["subscribableId"], "R1");
        assert_eq!(vars["state"], "UNSUBSCRIBED");
        assert_eq!(MutationOp::AddStar.variables("R1")["id"], "R1");
    }

    #[test]
    fn only_subscribed_counts_as_watching() {
        assert!(SubscriptionState::Subscribed.is_watching());
        assert!(!SubscriptionState::Ignored.is_watching());
        assert_eq!("IGNORED".parse(), Ok(SubscriptionState::Ignored));
        assert!("WATCHING".parse::<SubscriptionState>().is_err());
    }
}

//! Authoritative in-memory server the simulated viewer talks to.
//!
//! Holds the true star and watcher counts and answers the same typed
//! requests the real API does. Mutations are idempotent: starring an
//! already-starred repository changes nothing.

use hubcache_core::api::{
    IssueConnection, IssueEdge, IssueNode, IssueState, IssuesQuery, IssuesRepository,
    IssuesResponse, Language, MutationOp, Owner, RepositoryNode, Starrable, Subscribable,
    SubscriptionState, TotalCount,
};
use hubcache_core::pagination::PageInfo;

use crate::rng::DeterministicRng;

const CURSOR_PREFIX: &str = "cursor:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIssue {
    pub id: String,
    pub number: i64,
    pub state: IssueState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRepository {
    pub id: String,
    pub owner: String,
    pub name: String,
    pub stargazers: i64,
    pub viewer_has_starred: bool,
    pub watchers: i64,
    pub viewer_subscription: SubscriptionState,
    pub issues: Vec<ServerIssue>,
}

impl ServerRepository {
    fn generate(index: usize, rng: &mut DeterministicRng) -> Self {
        let viewer_has_starred = rng.hit_rate_percent(30);
        let viewer_subscription = match rng.next_bounded(3) {
            0 => SubscriptionState::Subscribed,
            1 => SubscriptionState::Ignored,
            _ => SubscriptionState::Unsubscribed,
        };
        let stargazers = rng.next_range(0, 20) + i64::from(viewer_has_starred);
        let watchers = rng.next_range(0, 8) + i64::from(viewer_subscription.is_watching());

        let issue_count = rng.next_bounded(13);
        let issues = (1..=issue_count)
            .map(|n| ServerIssue {
                id: format!("I_{index}_{n}"),
                number: i64::try_from(n).unwrap_or(i64::MAX),
                state: if rng.hit_rate_percent(60) {
                    IssueState::Open
                } else {
                    IssueState::Closed
                },
            })
            .collect();

        Self {
            id: format!("R_{index}"),
            owner: "acme".to_string(),
            name: format!("repo-{index}"),
            stargazers,
            viewer_has_starred,
            watchers,
            viewer_subscription,
            issues,
        }
    }

    fn matches(&self, owner: &str, name: &str) -> bool {
        self.owner == owner && self.name == name
    }

    fn url(&self) -> String {
        format!("https://example.com/{}/{}", self.owner, self.name)
    }

    #[must_use]
    pub fn node(&self) -> RepositoryNode {
        RepositoryNode {
            id: self.id.clone(),
            name: self.name.clone(),
            url: self.url(),
            description_html: format!("<p>{}</p>", self.name),
            primary_language: Some(Language {
                name: "Rust".to_string(),
            }),
            owner: Some(Owner {
                login: self.owner.clone(),
                url: format!("https://example.com/{}", self.owner),
            }),
            stargazers: TotalCount {
                total_count: self.stargazers,
            },
            watchers: TotalCount {
                total_count: self.watchers,
            },
            viewer_subscription: Some(self.viewer_subscription),
            viewer_has_starred: self.viewer_has_starred,
        }
    }

    /// Ids of the issues in `state`, in server order.
    pub fn issue_ids(&self, state: IssueState) -> impl Iterator<Item = &str> {
        self.issues
            .iter()
            .filter(move |issue| issue.state == state)
            .map(|issue| issue.id.as_str())
    }
}

/// Payload of a successful mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationPayload {
    Star(Starrable),
    Subscription(Subscribable),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedServer {
    repositories: Vec<ServerRepository>,
}

impl SimulatedServer {
    /// Generate `repository_count` repositories from `rng`.
    #[must_use]
    pub fn generate(repository_count: usize, rng: &mut DeterministicRng) -> Self {
        Self {
            repositories: (0..repository_count)
                .map(|index| ServerRepository::generate(index, rng))
                .collect(),
        }
    }

    #[must_use]
    pub fn repositories(&self) -> &[ServerRepository] {
        &self.repositories
    }

    #[must_use]
    pub fn repository(&self, id: &str) -> Option<&ServerRepository> {
        self.repositories.iter().find(|repo| repo.id == id)
    }

    /// Answer the repository list query.
    #[must_use]
    pub fn list_repositories(&self) -> Vec<RepositoryNode> {
        self.repositories
            .iter()
            .map(ServerRepository::node)
            .collect()
    }

    /// Answer `GetIssuesOfRepository`.
    ///
    /// The cursor is the number of matching issues already returned.
    #[must_use]
    pub fn issues(&self, query: &IssuesQuery) -> IssuesResponse {
        let (owner, name) = (&query.repository_owner, &query.repository_name);
        let Some(repo) = self
            .repositories
            .iter()
            .find(|repo| repo.matches(owner, name))
        else {
            return IssuesResponse { repository: None };
        };

        let start = query
            .cursor
            .as_deref()
            .and_then(|cursor| cursor.strip_prefix(CURSOR_PREFIX))
            .and_then(|offset| offset.parse::<usize>().ok())
            .unwrap_or(0);
        let page_size = usize::try_from(query.first).unwrap_or(usize::MAX);

        let matching: Vec<&ServerIssue> = repo
            .issues
            .iter()
            .filter(|issue| issue.state == query.issue_state)
            .collect();
        let end = start.saturating_add(page_size).min(matching.len());
        let page = matching.get(start..end).unwrap_or_default();

        let edges = page
            .iter()
            .map(|issue| IssueEdge {
                cursor: None,
                node: IssueNode {
                    id: issue.id.clone(),
                    number: issue.number,
                    state: issue.state,
                    title: format!("Issue #{}", issue.number),
                    url: format!("{}/issues/{}", repo.url(), issue.number),
                    body_html: String::new(),
                },
            })
            .collect();

        IssuesResponse {
            repository: Some(IssuesRepository {
                issues: IssueConnection {
                    edges,
                    page_info: PageInfo {
                        end_cursor: Some(format!("{CURSOR_PREFIX}{end}")),
                        has_next_page: end < matching.len(),
                    },
                },
            }),
        }
    }

    /// Apply a mutation. `None` if the node id does not resolve.
    pub fn mutate(&mut self, op: MutationOp, id: &str) -> Option<MutationPayload> {
        let repo = self.repositories.iter_mut().find(|repo| repo.id == id)?;

        match op {
            MutationOp::AddStar | MutationOp::RemoveStar => {
                let starred = op == MutationOp::AddStar;
                if repo.viewer_has_starred != starred {
                    repo.viewer_has_starred = starred;
                    repo.stargazers = if starred {
                        repo.stargazers + 1
                    } else {
                        (repo.stargazers - 1).max(0)
                    };
                }
                Some(MutationPayload::Star(Starrable {
                    id: repo.id.clone(),
                    viewer_has_starred: repo.viewer_has_starred,
                }))
            }
            MutationOp::Subscribe | MutationOp::Unsubscribe => {
                let next = if op == MutationOp::Subscribe {
                    SubscriptionState::Subscribed
                } else {
                    SubscriptionState::Unsubscribed
                };
                match (repo.viewer_subscription.is_watching(), next.is_watching()) {
                    (false, true) => repo.watchers += 1,
                    (true, false) => repo.watchers = (repo.watchers - 1).max(0),
                    _ => {}
                }
                repo.viewer_subscription = next;
                Some(MutationPayload::Subscription(Subscribable {
                    id: repo.id.clone(),
                    viewer_subscription: Some(next),
                }))
            }
        }
    }
}

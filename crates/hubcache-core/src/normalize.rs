//! Writing query responses into the entity store.
//!
//! Objects with an `id` become entities under their own key; objects without
//! one (owner, primary language, total counts) are stored inline as records
//! on their parent. List fields become [`Connection`]s of entity keys.

use crate::api::{IssueConnection, IssueNode, Language, Owner, RepositoryNode, SubscriptionState};
use crate::error::CacheError;
use crate::model::{EntityKey, Fields, Value, fields};
use crate::pagination::{Connection, Edge};
use crate::store::EntityStore;

/// Write a repository node and return its key.
///
/// # Errors
///
/// Returns [`CacheError::InvalidKey`] if the node id is empty.
pub fn write_repository(
    store: &mut EntityStore,
    repo: &RepositoryNode,
) -> Result<EntityKey, CacheError> {
    let key = EntityKey::repository(&repo.id)?;
    let language = repo.primary_language.as_ref().map(language_record);
    let owner = repo.owner.as_ref().map(owner_record);
    let subscription = repo.viewer_subscription.map(SubscriptionState::as_str);

    let data = fields([
        ("id", Value::from(repo.id.as_str())),
        ("name", Value::from(repo.name.as_str())),
        ("url", Value::from(repo.url.as_str())),
        (
            "descriptionHTML",
            Value::from(repo.description_html.as_str()),
        ),
        ("primaryLanguage", Value::from(language)),
        ("owner", Value::from(owner)),
        ("viewerHasStarred", Value::Bool(repo.viewer_has_starred)),
        ("viewerSubscription", Value::from(subscription)),
        ("stargazers", total_count(repo.stargazers.total_count)),
        ("watchers", total_count(repo.watchers.total_count)),
    ]);

    store.write(&key, data);
    Ok(key)
}

/// Write one issue node and return its key.
///
/// # Errors
///
/// Returns [`CacheError::InvalidKey`] if the node id is empty.
pub fn write_issue(store: &mut EntityStore, issue: &IssueNode) -> Result<EntityKey, CacheError> {
    let key = EntityKey::issue(&issue.id)?;
    store.write(
        &key,
        fields([
            ("id", Value::from(issue.id.as_str())),
            ("number", Value::Int(issue.number)),
            ("state", Value::from(issue.state.as_str())),
            ("title", Value::from(issue.title.as_str())),
            ("url", Value::from(issue.url.as_str())),
            ("bodyHTML", Value::from(issue.body_html.as_str())),
        ]),
    );
    Ok(key)
}

/// Write every issue of a page and return the page as a connection.
///
/// # Errors
///
/// Returns [`CacheError::InvalidKey`] if an issue id is empty. Issues
/// before the bad one have already been written.
pub fn write_issue_page(
    store: &mut EntityStore,
    page: &IssueConnection,
) -> Result<Connection, CacheError> {
    let edges = page
        .edges
        .iter()
        .map(|edge| {
            Ok(Edge {
                cursor: edge.cursor.clone(),
                node: write_issue(store, &edge.node)?,
            })
        })
        .collect::<Result<Vec<_>, CacheError>>()?;

    Ok(Connection::new(edges, page.page_info.clone()))
}

fn language_record(language: &Language) -> Value {
    Value::Record(fields([("name", language.name.as_str())]))
}

fn owner_record(owner: &Owner) -> Value {
    Value::Record(fields([
        ("login", owner.login.as_str()),
        ("url", owner.url.as_str()),
    ]))
}

fn total_count(count: i64) -> Value {
    let mut record = Fields::new();
    record.insert("totalCount".to_string(), Value::Int(count));
    Value::Record(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{IssueEdge, IssueState, TotalCount};
    use crate::fragment::{StarCountFragment, read_typed};
    use crate::pagination::PageInfo;

    fn repo() -> RepositoryNode {
        RepositoryNode {
            id: "R1".into(),
            name: "widgets".into(),
            url: "https://example.com/acme/widgets".into(),
            description_html: "<p>Widgets</p>".into(),
            primary_language: Some(Language {
                name: "Rust".into(),
            }),
            owner: Some(Owner {
                login: "acme".into(),
                url: "https://example.com/acme".into(),
            }),
            stargazers: TotalCount { total_count: 5 },
            watchers: TotalCount { total_count: 2 },
            viewer_subscription: Some(SubscriptionState::Unsubscribed),
            viewer_has_starred: false,
        }
    }

    fn issue(id: &str, number: i64) -> IssueNode {
        IssueNode {
            id: id.into(),
            number,
            state: IssueState::Open,
            title: format!("Issue {number}"),
            url: format!("https://example.com/acme/widgets/issues/{number}"),
            body_html: String::new(),
        }
    }

    #[test]
    fn repository_counters_are_readable_as_fragment() {
        let mut store = EntityStore::new();
        let key = write_repository(&mut store, &repo()).expect("written");

        let stars: StarCountFragment = read_typed(&store, &key).expect("fragment");
        assert_eq!(stars.total_count, 5);
        assert!(!stars.viewer_has_starred);

        let entity = store.read(&key).expect("cached");
        assert_eq!(entity.lookup("owner.login"), Some(&Value::from("acme")));
        assert_eq!(
            entity.lookup("primaryLanguage.name"),
            Some(&Value::from("Rust"))
        );
    }

    #[test]
    fn refetch_overwrites_locally_patched_counter() {
        let mut store = EntityStore::new();
        let key = write_repository(&mut store, &repo()).expect("written");
        crate::reconcile::patch_star_count(
            &mut store,
            &crate::api::Starrable {
                id: "R1".into(),
                viewer_has_starred: true,
            },
        )
        .expect("patched");

        let mut server = repo();
        server.stargazers.total_count = 9;
        server.viewer_has_starred = true;
        write_repository(&mut store, &server).expect("refetched");

        let stars: StarCountFragment = read_typed(&store, &key).expect("fragment");
        assert_eq!(stars.total_count, 9);
    }

    #[test]
    fn issue_page_becomes_connection_of_keys() {
        let mut store = EntityStore::new();
        let page = IssueConnection {
            edges: vec![
                IssueEdge {
                    cursor: None,
                    node: issue("I1", 1),
                },
                IssueEdge {
                    cursor: Some("e2".into()),
                    node: issue("I2", 2),
                },
            ],
            page_info: PageInfo {
                end_cursor: Some("c2".into()),
                has_next_page: true,
            },
        };

        let conn = write_issue_page(&mut store, &page).expect("normalized");
        assert_eq!(conn.len(), 2);
        assert_eq!(conn.edges[1].cursor.as_deref(), Some("e2"));
        assert_eq!(conn.next_cursor(), Some("c2"));
        let first = store.read(&conn.edges[0].node).expect("issue cached");
        assert_eq!(first.get("state"), Some(&Value::from("OPEN")));
        assert_eq!(first.get("number"), Some(&Value::Int(1)));
    }

    #[test]
    fn empty_issue_id_is_rejected() {
        let mut store = EntityStore::new();
        assert!(matches!(
            write_issue(&mut store, &issue("", 1)),
            Err(CacheError::InvalidKey(_))
        ));
    }
}

use hubcache_core::pagination::{Connection, Edge, PageInfo};
use hubcache_core::{EntityKey, StarCountFragment};
use proptest::prelude::*;

pub fn arb_issue_key() -> impl Strategy<Value = EntityKey> + Clone {
    "[A-Za-z0-9_=]{1,12}".prop_map(|id| EntityKey::issue(id).expect("non-empty id"))
}

pub fn arb_page_info() -> impl Strategy<Value = PageInfo> + Clone {
    (proptest::option::of("[a-z0-9]{1,8}"), any::<bool>()).prop_map(|(end_cursor, has_next_page)| {
        PageInfo {
            end_cursor,
            has_next_page,
        }
    })
}

pub fn arb_connection(max_edges: usize) -> impl Strategy<Value = Connection> + Clone {
    (
        prop::collection::vec(
            (proptest::option::of("[a-z0-9]{1,8}"), arb_issue_key())
                .prop_map(|(cursor, node)| Edge { cursor, node }),
            0..=max_edges,
        ),
        arb_page_info(),
    )
        .prop_map(|(edges, page_info)| Connection::new(edges, page_info))
}

pub fn arb_star_count() -> impl Strategy<Value = StarCountFragment> + Clone {
    ("[A-Za-z0-9]{1,12}", 0i64..1_000_000, any::<bool>()).prop_map(
        |(id, total_count, viewer_has_starred)| StarCountFragment {
            id,
            total_count,
            viewer_has_starred,
        },
    )
}

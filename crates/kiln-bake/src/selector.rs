//! Placement target selection.

use kiln_client::ClusterMember;

use crate::error::{BakeError, BakeResult};

/// Pick a placement target from the queried members.
///
/// Filters to members whose group memberships include `group` and takes
/// the first match in query order. The ordering is not re-sorted, so a
/// retry against an unchanged cluster picks the same target. Fails
/// closed: zero matches is an error, never a fallback to an unfiltered
/// default target.
pub fn select_member(members: &[ClusterMember], group: &str) -> BakeResult<String> {
    members
        .iter()
        .find(|m| m.groups.iter().any(|g| g == group))
        .map(|m| m.server_name.clone())
        .ok_or_else(|| BakeError::NoEligibleTarget {
            group: group.to_owned(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(name: &str, groups: &[&str]) -> ClusterMember {
        ClusterMember {
            server_name: name.to_owned(),
            groups: groups.iter().map(|g| (*g).to_owned()).collect(),
        }
    }

    #[test]
    fn picks_first_match_in_query_order() {
        let members = vec![
            member("node1", &["frontend"]),
            member("node2", &["builders", "frontend"]),
            member("node3", &["builders"]),
        ];
        assert_eq!(select_member(&members, "builders").unwrap(), "node2");
    }

    #[test]
    fn fails_closed_when_no_member_matches() {
        let members = vec![member("node1", &["frontend"]), member("node2", &[])];
        let err = select_member(&members, "builders").unwrap_err();
        match err {
            BakeError::NoEligibleTarget { group } => assert_eq!(group, "builders"),
            other => panic!("expected NoEligibleTarget, got {other:?}"),
        }
    }

    #[test]
    fn empty_member_list_fails_closed() {
        assert!(select_member(&[], "builders").is_err());
    }
}

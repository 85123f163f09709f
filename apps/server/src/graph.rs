//! Friend-graph bookkeeping: request state machine, incoming-request merging,
//! symmetric friendship lookup, and membership batching.
//!
//! Everything here works over rows already loaded from the database so it can
//! be exercised without a live connection.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{FriendRequest, Friendship, User};

/// Upper bound on ids passed to a single membership (`= ANY`) query.
pub const MEMBERSHIP_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FriendRequestStatus {
    Pending,
    Accepted,
    Declined,
    Cancelled,
}

impl FriendRequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FriendRequestStatus::Pending => "pending",
            FriendRequestStatus::Accepted => "accepted",
            FriendRequestStatus::Declined => "declined",
            FriendRequestStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(FriendRequestStatus::Pending),
            "accepted" => Some(FriendRequestStatus::Accepted),
            "declined" => Some(FriendRequestStatus::Declined),
            "cancelled" => Some(FriendRequestStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self != FriendRequestStatus::Pending
    }

    /// Pending is the only state that accepts an action; every resolution is final.
    pub fn apply(self, action: RequestAction) -> Result<Self, TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::AlreadyResolved(self));
        }
        Ok(action.resulting_status())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestAction {
    Accept,
    Decline,
    Cancel,
}

impl RequestAction {
    pub fn resulting_status(self) -> FriendRequestStatus {
        match self {
            RequestAction::Accept => FriendRequestStatus::Accepted,
            RequestAction::Decline => FriendRequestStatus::Declined,
            RequestAction::Cancel => FriendRequestStatus::Cancelled,
        }
    }

    pub fn permitted_for(self, role: RequestRole) -> bool {
        match self {
            RequestAction::Accept | RequestAction::Decline => role == RequestRole::Recipient,
            RequestAction::Cancel => role == RequestRole::Sender,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("Friend request is already {}", .0.as_str())]
    AlreadyResolved(FriendRequestStatus),
    #[error("Friend request has unknown status '{0}'")]
    UnknownStatus(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestRole {
    Sender,
    Recipient,
    Unrelated,
}

/// A request addressed to an e-mail counts as incoming for whoever signs in
/// with that e-mail, but only until `to_user_id` is bound to an account.
pub fn role_of(request: &FriendRequest, user_id: Uuid, user_email: &str) -> RequestRole {
    if request.from_user_id == user_id {
        return RequestRole::Sender;
    }
    let email_match = request.to_user_id.is_none() && request.to_user_email == user_email;
    if request.to_user_id == Some(user_id) || email_match {
        return RequestRole::Recipient;
    }
    RequestRole::Unrelated
}

pub fn current_status(request: &FriendRequest) -> Result<FriendRequestStatus, TransitionError> {
    FriendRequestStatus::parse(&request.status)
        .ok_or_else(|| TransitionError::UnknownStatus(request.status.clone()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendRejection {
    #[error("Please enter an email address")]
    EmptyEmail,
    #[error("You cannot send a friend request to yourself")]
    SelfRequest,
    #[error("Friend request already sent to this email address")]
    AlreadySent,
    #[error("This user has already sent you a friend request")]
    AlreadyReceived,
    #[error("You are already friends with this user")]
    AlreadyFriends,
}

/// Normalizes the target address and rejects self-requests. Runs before any
/// storage access.
pub fn normalize_target_email(raw: &str, own_email: &str) -> Result<String, SendRejection> {
    let target = raw.trim().to_lowercase();
    if target.is_empty() {
        return Err(SendRejection::EmptyEmail);
    }
    if target == own_email.trim().to_lowercase() {
        return Err(SendRejection::SelfRequest);
    }
    Ok(target)
}

/// Outcome of the duplicate checks performed before a request is written.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendRequestChecks {
    pub outgoing_pending: bool,
    pub incoming_pending: bool,
    pub already_friends: bool,
}

impl SendRequestChecks {
    pub fn verdict(&self) -> Result<(), SendRejection> {
        if self.outgoing_pending {
            return Err(SendRejection::AlreadySent);
        }
        if self.incoming_pending {
            return Err(SendRejection::AlreadyReceived);
        }
        if self.already_friends {
            return Err(SendRejection::AlreadyFriends);
        }
        Ok(())
    }
}

/// Maps the result of the conflict-guarded insert. No row back means another
/// pending request to the same address was written first.
pub fn inserted_request(row: Option<FriendRequest>) -> Result<FriendRequest, SendRejection> {
    row.ok_or(SendRejection::AlreadySent)
}

impl Friendship {
    pub fn other_member(&self, user_id: Uuid) -> Option<Uuid> {
        if self.user1_id == user_id {
            Some(self.user2_id)
        } else if self.user2_id == user_id {
            Some(self.user1_id)
        } else {
            None
        }
    }

    pub fn connects(&self, a: Uuid, b: Uuid) -> bool {
        (self.user1_id == a && self.user2_id == b) || (self.user1_id == b && self.user2_id == a)
    }
}

pub fn are_friends(friendships: &[Friendship], a: Uuid, b: Uuid) -> bool {
    friendships.iter().any(|f| f.connects(a, b))
}

/// Merges the by-id and by-email incoming queries. A request found by both
/// appears once, at its first position, holding the later copy.
pub fn merge_incoming(
    by_id: Vec<FriendRequest>,
    by_email: Vec<FriendRequest>,
) -> Vec<FriendRequest> {
    let mut positions: HashMap<Uuid, usize> = HashMap::new();
    let mut merged: Vec<FriendRequest> = Vec::new();

    for request in by_id.into_iter().chain(by_email) {
        match positions.get(&request.id) {
            Some(&index) => merged[index] = request,
            None => {
                positions.insert(request.id, merged.len());
                merged.push(request);
            }
        }
    }

    merged.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    merged
}

/// Deduplicates ids (keeping first occurrence) and splits them into groups of
/// at most [`MEMBERSHIP_BATCH_SIZE`].
pub fn membership_batches(ids: &[Uuid]) -> Vec<Vec<Uuid>> {
    let mut seen = HashSet::new();
    let unique: Vec<Uuid> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
    unique
        .chunks(MEMBERSHIP_BATCH_SIZE)
        .map(|chunk| chunk.to_vec())
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct FriendEntry {
    pub friendship_id: Uuid,
    pub friend_id: Uuid,
    pub friend: User,
    pub created_at: DateTime<Utc>,
    /// Whether the friend currently holds a live push connection.
    pub online: bool,
}

/// Resolves the caller's friendships to friend profiles, newest first.
/// Friendships whose other member has no profile are skipped.
pub fn resolve_friends(
    user_id: Uuid,
    friendships: &[Friendship],
    users: &HashMap<Uuid, User>,
) -> Vec<FriendEntry> {
    let mut friends: Vec<FriendEntry> = friendships
        .iter()
        .filter_map(|friendship| {
            let friend_id = friendship.other_member(user_id)?;
            let friend = users.get(&friend_id)?.clone();
            Some(FriendEntry {
                friendship_id: friendship.id,
                friend_id,
                friend,
                created_at: friendship.created_at,
                online: false,
            })
        })
        .collect();
    friends.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    friends
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OverviewItem {
    Friend(FriendEntry),
    Incoming(FriendRequest),
    Outgoing(FriendRequest),
}

impl OverviewItem {
    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            OverviewItem::Friend(entry) => entry.created_at,
            OverviewItem::Incoming(request) | OverviewItem::Outgoing(request) => {
                request.created_at
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FriendsOverview {
    pub friends: Vec<FriendEntry>,
    pub incoming: Vec<FriendRequest>,
    pub outgoing: Vec<FriendRequest>,
    pub all_items: Vec<OverviewItem>,
    pub friend_count: usize,
    pub pending_count: usize,
}

impl FriendsOverview {
    pub fn build(
        friends: Vec<FriendEntry>,
        incoming: Vec<FriendRequest>,
        mut outgoing: Vec<FriendRequest>,
    ) -> Self {
        outgoing.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut all_items: Vec<OverviewItem> = friends
            .iter()
            .cloned()
            .map(OverviewItem::Friend)
            .chain(incoming.iter().cloned().map(OverviewItem::Incoming))
            .chain(outgoing.iter().cloned().map(OverviewItem::Outgoing))
            .collect();
        all_items.sort_by(|a, b| b.created_at().cmp(&a.created_at()));

        Self {
            friend_count: friends.len(),
            pending_count: incoming.len() + outgoing.len(),
            friends,
            incoming,
            outgoing,
            all_items,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    pub(crate) fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(seconds)
    }

    pub(crate) fn request(id: Uuid, from: Uuid, to: Option<Uuid>, created: i64) -> FriendRequest {
        FriendRequest {
            id,
            from_user_id: from,
            to_user_id: to,
            to_user_email: "bob@example.com".to_string(),
            from_user_email: "alice@example.com".to_string(),
            from_user_name: "Alice".to_string(),
            from_user_photo_url: None,
            status: "pending".to_string(),
            created_at: at(created),
            responded_at: None,
        }
    }

    fn friendship(a: Uuid, b: Uuid, created: i64) -> Friendship {
        Friendship {
            id: Uuid::new_v4(),
            user1_id: a,
            user2_id: b,
            created_at: at(created),
        }
    }

    fn user(id: Uuid, name: &str) -> User {
        User {
            id,
            email: format!("{}@example.com", name.to_lowercase()),
            display_name: name.to_string(),
            photo_url: None,
            created_at: at(0),
            last_login_at: None,
        }
    }

    #[test]
    fn friendship_is_symmetric() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let friendships = vec![friendship(a, b, 1)];

        assert!(are_friends(&friendships, a, b));
        assert!(are_friends(&friendships, b, a));
        assert!(!are_friends(&friendships, a, c));
        assert_eq!(friendships[0].other_member(b), Some(a));
        assert_eq!(friendships[0].other_member(c), None);
    }

    #[test]
    fn pending_moves_to_each_terminal_state() {
        let pending = FriendRequestStatus::Pending;
        assert_eq!(
            pending.apply(RequestAction::Accept),
            Ok(FriendRequestStatus::Accepted)
        );
        assert_eq!(
            pending.apply(RequestAction::Decline),
            Ok(FriendRequestStatus::Declined)
        );
        assert_eq!(
            pending.apply(RequestAction::Cancel),
            Ok(FriendRequestStatus::Cancelled)
        );
    }

    #[test]
    fn terminal_states_reject_every_action() {
        for status in [
            FriendRequestStatus::Accepted,
            FriendRequestStatus::Declined,
            FriendRequestStatus::Cancelled,
        ] {
            for action in [
                RequestAction::Accept,
                RequestAction::Decline,
                RequestAction::Cancel,
            ] {
                assert_eq!(
                    status.apply(action),
                    Err(TransitionError::AlreadyResolved(status))
                );
            }
        }
    }

    #[test]
    fn status_round_trips_through_storage_text() {
        assert_eq!(
            FriendRequestStatus::parse(FriendRequestStatus::Cancelled.as_str()),
            Some(FriendRequestStatus::Cancelled)
        );
        assert_eq!(FriendRequestStatus::parse("rejected"), None);

        let mut req = request(Uuid::new_v4(), Uuid::new_v4(), None, 0);
        req.status = "bogus".to_string();
        assert!(matches!(
            current_status(&req),
            Err(TransitionError::UnknownStatus(_))
        ));
    }

    #[test]
    fn only_recipient_answers_and_only_sender_cancels() {
        let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let req = request(Uuid::new_v4(), alice, None, 0);

        assert_eq!(role_of(&req, alice, "alice@example.com"), RequestRole::Sender);
        assert_eq!(role_of(&req, bob, "bob@example.com"), RequestRole::Recipient);
        assert_eq!(role_of(&req, carol, "carol@example.com"), RequestRole::Unrelated);

        assert!(RequestAction::Accept.permitted_for(RequestRole::Recipient));
        assert!(!RequestAction::Accept.permitted_for(RequestRole::Sender));
        assert!(RequestAction::Cancel.permitted_for(RequestRole::Sender));
        assert!(!RequestAction::Cancel.permitted_for(RequestRole::Recipient));
        assert!(!RequestAction::Decline.permitted_for(RequestRole::Unrelated));
    }

    #[test]
    fn lost_insert_race_reports_already_sent() {
        let req = request(Uuid::new_v4(), Uuid::new_v4(), None, 0);
        assert_eq!(inserted_request(Some(req.clone())).map(|r| r.id), Ok(req.id));
        assert_eq!(inserted_request(None).map(|r| r.id), Err(SendRejection::AlreadySent));
    }

    #[test]
    fn email_match_does_not_override_bound_recipient() {
        let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let req = request(Uuid::new_v4(), alice, Some(bob), 0);

        assert_eq!(role_of(&req, bob, "bob@example.com"), RequestRole::Recipient);
        assert_eq!(role_of(&req, carol, "bob@example.com"), RequestRole::Unrelated);
    }

    #[test]
    fn self_request_is_rejected_case_insensitively() {
        assert_eq!(
            normalize_target_email("  Alice@Example.com ", "alice@example.com"),
            Err(SendRejection::SelfRequest)
        );
        assert_eq!(
            normalize_target_email("   ", "alice@example.com"),
            Err(SendRejection::EmptyEmail)
        );
        assert_eq!(
            normalize_target_email(" Bob@Example.com", "alice@example.com"),
            Ok("bob@example.com".to_string())
        );
    }

    #[test]
    fn send_checks_report_first_failing_condition() {
        assert_eq!(SendRequestChecks::default().verdict(), Ok(()));
        let all = SendRequestChecks {
            outgoing_pending: true,
            incoming_pending: true,
            already_friends: true,
        };
        assert_eq!(all.verdict(), Err(SendRejection::AlreadySent));
        let reverse = SendRequestChecks {
            incoming_pending: true,
            ..Default::default()
        };
        assert_eq!(reverse.verdict(), Err(SendRejection::AlreadyReceived));
        let friends = SendRequestChecks {
            already_friends: true,
            ..Default::default()
        };
        assert_eq!(friends.verdict(), Err(SendRejection::AlreadyFriends));
    }

    #[test]
    fn merge_incoming_keeps_each_request_once() {
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let shared = Uuid::new_v4();
        let by_id = vec![request(shared, alice, Some(bob), 5), request(Uuid::new_v4(), alice, Some(bob), 1)];
        let by_email = vec![request(shared, alice, Some(bob), 5), request(Uuid::new_v4(), alice, None, 9)];

        let merged = merge_incoming(by_id, by_email);

        let ids: HashSet<Uuid> = merged.iter().map(|r| r.id).collect();
        assert_eq!(merged.len(), 3);
        assert_eq!(ids.len(), 3);
        let times: Vec<_> = merged.iter().map(|r| r.created_at).collect();
        assert_eq!(times, vec![at(9), at(5), at(1)]);
    }

    #[test]
    fn batches_cover_every_id_once() {
        for n in [0usize, 1, 9, 10, 11, 25, 30] {
            let ids: Vec<Uuid> = (0..n).map(|_| Uuid::new_v4()).collect();
            let batches = membership_batches(&ids);

            assert_eq!(batches.len(), n.div_ceil(MEMBERSHIP_BATCH_SIZE));
            assert!(batches.iter().all(|b| b.len() <= MEMBERSHIP_BATCH_SIZE));
            let flattened: Vec<Uuid> = batches.into_iter().flatten().collect();
            assert_eq!(flattened, ids);
        }
    }

    #[test]
    fn batches_drop_repeated_ids() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let batches = membership_batches(&[a, b, a, a]);
        assert_eq!(batches, vec![vec![a, b]]);
    }

    #[test]
    fn overview_sorts_all_items_newest_first_and_counts() {
        let (me, bob, carol, dave) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let friendships = vec![friendship(me, bob, 3), friendship(carol, me, 7), friendship(me, dave, 8)];
        let users: HashMap<Uuid, User> = [user(bob, "Bob"), user(carol, "Carol")]
            .into_iter()
            .map(|u| (u.id, u))
            .collect();

        let friends = resolve_friends(me, &friendships, &users);
        assert_eq!(friends.len(), 2, "friend without a profile is skipped");
        assert_eq!(friends[0].friend_id, carol);

        let incoming = vec![request(Uuid::new_v4(), dave, Some(me), 5)];
        let outgoing = vec![request(Uuid::new_v4(), me, None, 1), request(Uuid::new_v4(), me, None, 10)];
        let overview = FriendsOverview::build(friends, incoming, outgoing);

        assert_eq!(overview.friend_count, 2);
        assert_eq!(overview.pending_count, 3);
        let times: Vec<_> = overview.all_items.iter().map(OverviewItem::created_at).collect();
        assert_eq!(times, vec![at(10), at(7), at(5), at(3), at(1)]);
        assert_eq!(overview.outgoing[0].created_at, at(10));

        let json = serde_json::to_value(&overview.all_items[0]).expect("serialize item");
        assert_eq!(json["type"], "outgoing");
    }
}

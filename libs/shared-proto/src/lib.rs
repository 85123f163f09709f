//! Wire types shared between the scrapbook server and its clients.

pub mod events {
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    /// Events pushed to a signed-in user over the `/ws` channel.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "type", content = "payload", rename_all = "snake_case")]
    pub enum ServerEvent {
        FriendRequestReceived {
            request_id: Uuid,
            from_user_id: Uuid,
            from_user_name: String,
        },
        FriendRequestResolved {
            request_id: Uuid,
            status: String,
        },
        FriendshipCreated {
            friendship_id: Uuid,
            friend_id: Uuid,
        },
        FriendshipRemoved {
            friendship_id: Uuid,
            friend_id: Uuid,
        },
        PostPublished {
            post_id: Uuid,
            author_id: Uuid,
        },
        PostUpdated {
            post_id: Uuid,
        },
        PostDeleted {
            post_id: Uuid,
        },
        CommentAdded {
            post_id: Uuid,
            comment_id: Uuid,
        },
        CommentDeleted {
            post_id: Uuid,
            comment_id: Uuid,
        },
        ReactionsChanged {
            target_type: String,
            target_id: Uuid,
        },
        Mentioned {
            context: String,
            target_id: Uuid,
            by_user_id: Uuid,
            /// Mention markup rendered as plain `@Name` text.
            excerpt: String,
        },
    }

    impl ServerEvent {
        pub fn kind(&self) -> &'static str {
            match self {
                ServerEvent::FriendRequestReceived { .. } => "friend_request_received",
                ServerEvent::FriendRequestResolved { .. } => "friend_request_resolved",
                ServerEvent::FriendshipCreated { .. } => "friendship_created",
                ServerEvent::FriendshipRemoved { .. } => "friendship_removed",
                ServerEvent::PostPublished { .. } => "post_published",
                ServerEvent::PostUpdated { .. } => "post_updated",
                ServerEvent::PostDeleted { .. } => "post_deleted",
                ServerEvent::CommentAdded { .. } => "comment_added",
                ServerEvent::CommentDeleted { .. } => "comment_deleted",
                ServerEvent::ReactionsChanged { .. } => "reactions_changed",
                ServerEvent::Mentioned { .. } => "mentioned",
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn events_are_adjacently_tagged() {
            let id = Uuid::new_v4();
            let event = ServerEvent::PostDeleted { post_id: id };
            let json = serde_json::to_value(&event).expect("serialize event");

            assert_eq!(json["type"], "post_deleted");
            assert_eq!(json["payload"]["post_id"], id.to_string());
            assert_eq!(event.kind(), "post_deleted");
        }
    }
}

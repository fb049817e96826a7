mod common;

use chat_sync_service::{
    error::AppError,
    fanout::{Channel, EventType},
    services::SeenOutcome,
    store::ChatStore,
};
use common::{drain, TestEnv};

#[tokio::test]
async fn sending_hi_updates_recency_and_fans_out() {
    let env = TestEnv::new();
    let ana = env.user("ana@example.com").await;
    let bo = env.user("bo@example.com").await;
    let detail = env
        .state
        .conversations
        .find_or_create_direct(&ana, bo.id)
        .await
        .unwrap();

    let mut room_rx = env.listen(Channel::Conversation(detail.id())).await;
    let mut ana_rx = env.listen(Channel::Personal(ana.email.clone())).await;
    let mut bo_rx = env.listen(Channel::Personal(bo.email.clone())).await;

    let sent = env
        .state
        .messages
        .append(detail.id(), &ana, "hi", None)
        .await
        .unwrap();
    assert_eq!(sent.message.seen_ids, vec![ana.id]);
    assert_eq!(sent.sender.id, ana.id);

    let conversation = env
        .store
        .find_conversation(detail.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conversation.last_message_at, sent.created_at());

    let room = drain(&mut room_rx);
    assert_eq!(room.len(), 1);
    assert_eq!(room[0].event, EventType::MessagesNew);
    assert_eq!(room[0].payload["content"], "hi");

    for rx in [&mut ana_rx, &mut bo_rx] {
        let events = drain(rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, EventType::ConversationUpdate);
        assert_eq!(events[0].payload["messages"].as_array().map(|m| m.len()), Some(1));
    }
}

#[tokio::test]
async fn recency_tracks_the_newest_message() {
    let env = TestEnv::new();
    let ana = env.user("ana@example.com").await;
    let bo = env.user("bo@example.com").await;
    let detail = env
        .state
        .conversations
        .find_or_create_direct(&ana, bo.id)
        .await
        .unwrap();

    let mut last = None;
    for (i, sender) in [&ana, &bo, &ana, &bo].into_iter().enumerate() {
        let sent = env
            .state
            .messages
            .append(detail.id(), sender, &format!("msg {i}"), None)
            .await
            .unwrap();
        last = Some(sent);
    }
    let last = last.unwrap();

    let conversation = env
        .store
        .find_conversation(detail.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conversation.last_message_at, last.created_at());

    let history = env
        .state
        .messages
        .list_messages(detail.id(), &ana)
        .await
        .unwrap();
    assert_eq!(history.len(), 4);
    assert!(history.windows(2).all(|w| w[0].created_at() <= w[1].created_at()));
    assert_eq!(history.last().map(|m| m.id()), Some(last.id()));
}

#[tokio::test]
async fn empty_message_is_rejected_and_nothing_is_published() {
    let env = TestEnv::new();
    let ana = env.user("ana@example.com").await;
    let bo = env.user("bo@example.com").await;
    let detail = env
        .state
        .conversations
        .find_or_create_direct(&ana, bo.id)
        .await
        .unwrap();
    let mut room_rx = env.listen(Channel::Conversation(detail.id())).await;

    let err = env
        .state
        .messages
        .append(detail.id(), &ana, "", None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(env.store.message_count(detail.id()).await, 0);
    assert!(drain(&mut room_rx).is_empty());

    // An image alone is a valid message
    let sent = env
        .state
        .messages
        .append(detail.id(), &ana, "", Some("https://cdn.example/cat.png".into()))
        .await
        .unwrap();
    assert_eq!(sent.message.image.as_deref(), Some("https://cdn.example/cat.png"));
}

#[tokio::test]
async fn append_to_unknown_conversation_is_not_found() {
    let env = TestEnv::new();
    let ana = env.user("ana@example.com").await;

    let err = env
        .state
        .messages
        .append(uuid::Uuid::new_v4(), &ana, "hello?", None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));
}

#[tokio::test]
async fn mark_seen_is_idempotent_and_monotonic() {
    let env = TestEnv::new();
    let ana = env.user("ana@example.com").await;
    let bo = env.user("bo@example.com").await;
    let detail = env
        .state
        .conversations
        .find_or_create_direct(&ana, bo.id)
        .await
        .unwrap();
    env.state
        .messages
        .append(detail.id(), &ana, "hi", None)
        .await
        .unwrap();

    let mut room_rx = env.listen(Channel::Conversation(detail.id())).await;
    let mut bo_rx = env.listen(Channel::Personal(bo.email.clone())).await;

    let first = env.state.messages.mark_seen(detail.id(), &bo).await.unwrap();
    let seen_after_first = match first {
        SeenOutcome::Marked(message) => {
            assert!(message.is_seen_by_email(&bo.email));
            message.message.seen_ids
        }
        other => panic!("expected Marked, got {other:?}"),
    };

    let second = env.state.messages.mark_seen(detail.id(), &bo).await.unwrap();
    assert!(matches!(second, SeenOutcome::AlreadySeen(_)));

    let latest = env
        .store
        .latest_message(detail.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.seen_ids, seen_after_first);
    assert!(latest.seen_ids.contains(&ana.id));

    // message:update once; conversation:update on each call
    let room = drain(&mut room_rx);
    assert_eq!(room.len(), 1);
    assert_eq!(room[0].event, EventType::MessageUpdate);
    let personal = drain(&mut bo_rx);
    assert_eq!(personal.len(), 2);
    assert!(personal.iter().all(|d| d.event == EventType::ConversationUpdate));
}

#[tokio::test]
async fn mark_seen_on_empty_conversation_publishes_nothing() {
    let env = TestEnv::new();
    let ana = env.user("ana@example.com").await;
    let bo = env.user("bo@example.com").await;
    let detail = env
        .state
        .conversations
        .find_or_create_direct(&ana, bo.id)
        .await
        .unwrap();
    let mut bo_rx = env.listen(Channel::Personal(bo.email.clone())).await;

    let outcome = env.state.messages.mark_seen(detail.id(), &bo).await.unwrap();
    assert!(matches!(outcome, SeenOutcome::Empty(ref c) if c.id() == detail.id()));
    assert!(drain(&mut bo_rx).is_empty());

    assert!(matches!(
        env.state.messages.mark_seen(uuid::Uuid::new_v4(), &bo).await,
        Err(AppError::NotFound)
    ));
}

#[tokio::test]
async fn failed_member_lookup_after_append_still_reports_success() {
    let env = TestEnv::with_flaky_reads();
    let ana = env.user("ana@example.com").await;
    let bo = env.user("bo@example.com").await;
    let detail = env
        .state
        .conversations
        .find_or_create_direct(&ana, bo.id)
        .await
        .unwrap();
    let mut room_rx = env.listen(Channel::Conversation(detail.id())).await;

    let sent = env
        .state
        .messages
        .append(detail.id(), &ana, "hi", None)
        .await
        .unwrap();
    assert_eq!(sent.seen.len(), 1);
    assert_eq!(env.store.message_count(detail.id()).await, 1);

    let room = drain(&mut room_rx);
    assert_eq!(room.len(), 1);
    assert_eq!(room[0].event, EventType::MessagesNew);
    assert_eq!(room[0].payload["id"], sent.id().to_string());
}

#[tokio::test]
async fn failed_reload_after_mark_seen_still_publishes_the_update() {
    let env = TestEnv::with_flaky_reads();
    let ana = env.user("ana@example.com").await;
    let bo = env.user("bo@example.com").await;
    let detail = env
        .state
        .conversations
        .find_or_create_direct(&ana, bo.id)
        .await
        .unwrap();
    env.state
        .messages
        .append(detail.id(), &ana, "hi", None)
        .await
        .unwrap();
    let mut room_rx = env.listen(Channel::Conversation(detail.id())).await;

    let outcome = env.state.messages.mark_seen(detail.id(), &bo).await.unwrap();
    match outcome {
        SeenOutcome::Marked(message) => {
            assert!(message.is_seen_by_email(&ana.email));
            assert!(message.is_seen_by_email(&bo.email));
        }
        other => panic!("expected Marked, got {other:?}"),
    }

    let room = drain(&mut room_rx);
    assert_eq!(room.len(), 1);
    assert_eq!(room[0].event, EventType::MessageUpdate);
}

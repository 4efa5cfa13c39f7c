use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use super::cursor::{CursorStore, FileCursorStore, SyncCursor};
use super::engine::{Propagation, SkipReason, SyncEngine};
use super::transition::TransitionOutcome;
use super::worker::MappingWorker;
use super::build_workers;
use crate::board::memory::MemoryBoard;
use crate::config::AppConfig;
use crate::error::RemoteError;
use crate::model::card::{
    BoardEvent, BoardInfo, BoardMember, CardField, CardPriority, CardType, CardUpdate, Lane, LocalCard,
};
use crate::model::mapping::{BoardMapping, LaneStates};
use crate::model::remote_item::RemoteItem;
use crate::providers::github;
use crate::providers::tests::{remote_item, MockAdapter};
use crate::providers::{AdapterRegistry, RemoteAdapter};
use crate::retry::RetryExecutor;

fn lanes(spec: &[(&str, &[&str])]) -> Vec<LaneStates> {
    spec.iter()
        .map(|(id, states)| LaneStates {
            lane_id: id.to_string(),
            states: states.iter().map(|s| s.to_string()).collect(),
        })
        .collect()
}

fn mapping() -> BoardMapping {
    BoardMapping {
        board_id: "b1".into(),
        target_system: "jira".into(),
        project: "ENG".into(),
        polling_frequency_secs: 60,
        lanes: lanes(&[
            ("todo", &["Open"]),
            ("doing", &["In Progress"]),
            ("done", &["In Progress>Resolved>Closed"]),
        ]),
        update_cards: true,
        update_card_lanes: true,
        tag_cards_with_target_system_name: false,
        create_remote_items: false,
        type_map: HashMap::new(),
        priority_map: HashMap::new(),
        default_card_type: None,
    }
}

fn board_info() -> BoardInfo {
    BoardInfo {
        id: "b1".into(),
        title: "Platform".into(),
        lanes: ["todo", "doing", "done"]
            .iter()
            .map(|id| Lane {
                id: id.to_string(),
                title: id.to_uppercase(),
            })
            .collect(),
        card_types: vec![
            CardType {
                id: "t1".into(),
                name: "Task".into(),
            },
            CardType {
                id: "t2".into(),
                name: "Bug".into(),
            },
        ],
        default_card_type_id: Some("t1".into()),
        members: vec![BoardMember {
            id: "u1".into(),
            user_name: "jcash".into(),
            full_name: "Johnny Cash".into(),
            email_address: "johnny@cash.com".into(),
        }],
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 0).unwrap()
}

fn engine(adapter: &Arc<MockAdapter>, board: &Arc<MemoryBoard>, mapping: BoardMapping) -> SyncEngine {
    SyncEngine::new(
        adapter.clone(),
        board.clone(),
        mapping,
        RetryExecutor::new(3, Duration::ZERO),
        "%Y-%m-%d",
    )
}

fn linked_card(id: &str, external_id: &str, lane: &str, title: &str) -> LocalCard {
    LocalCard {
        id: id.into(),
        title: title.into(),
        lane_id: lane.into(),
        external_system_name: Some("Jira".into()),
        external_id: Some(external_id.into()),
        ..Default::default()
    }
}

/// Workflow: Open → In Progress → Resolved → Closed, and back one step each.
fn workflow(adapter: MockAdapter) -> MockAdapter {
    adapter
        .with_edges("open", &["In Progress"])
        .with_edges("in progress", &["Open", "Resolved"])
        .with_edges("resolved", &["In Progress", "Closed"])
        .with_edges("closed", &["Resolved"])
}

// Inbound reconcile

#[tokio::test]
async fn new_remote_item_creates_card_in_mapped_lane() {
    let item = RemoteItem {
        display_key: Some("ENG-1".into()),
        assignee: Some("Johnny@Cash.com".into()),
        priority: Some("High".into()),
        labels: vec!["ui".into()],
        item_type: Some("Bug".into()),
        due_date: NaiveDate::from_ymd_opt(2026, 11, 1),
        body: Some("Steps to reproduce".into()),
        ..remote_item("10001", "Crash on save", "Open")
    };
    let adapter = Arc::new(MockAdapter::new("Jira").with_item(item));
    let board = Arc::new(MemoryBoard::new(board_info()));
    let engine = engine(&adapter, &board, mapping());

    let (report, cursor) = engine.reconcile(&SyncCursor::default(), now()).await.unwrap();
    assert_eq!(report.fetched, 1);
    assert_eq!(report.created, 1);
    assert_eq!(cursor.last_poll, Some(now()));

    let card = board.card("card-1");
    assert_eq!(card.lane_id, "todo");
    assert_eq!(card.title, "Crash on save");
    assert_eq!(card.description, "Steps to reproduce");
    assert_eq!(card.external_id.as_deref(), Some("10001|ENG-1"));
    assert_eq!(card.external_system_name.as_deref(), Some("Jira"));
    assert_eq!(card.assigned_user_ids, vec!["u1".to_string()]);
    assert_eq!(card.priority, CardPriority::High);
    assert_eq!(card.type_id.as_deref(), Some("t2"));
    assert_eq!(card.due_date.as_deref(), Some("2026-11-01"));
    assert_eq!(card.tags, vec!["ui".to_string()]);
}

#[tokio::test]
async fn reconcile_is_idempotent() {
    let item = RemoteItem {
        assignee: Some("jcash".into()),
        labels: vec!["ui".into(), "api".into()],
        due_date: NaiveDate::from_ymd_opt(2026, 11, 1),
        ..remote_item("7", "Crash on save", "In Progress")
    };
    let adapter = Arc::new(MockAdapter::new("Jira").with_item(item));
    let board = Arc::new(MemoryBoard::new(board_info()));
    let engine = engine(&adapter, &board, mapping());

    let (first, cursor) = engine.reconcile(&SyncCursor::default(), now()).await.unwrap();
    assert_eq!(first.created, 1);
    let later = now() + chrono::Duration::seconds(60);
    let (second, _) = engine.reconcile(&cursor, later).await.unwrap();

    assert_eq!(second.created, 0);
    assert_eq!(second.unchanged, 1);
    assert_eq!(board.adds(), 1);
    assert!(board.updates().is_empty());
}

#[tokio::test]
async fn item_in_unmapped_state_is_skipped() {
    let adapter = Arc::new(MockAdapter::new("Jira").with_item(remote_item("7", "Triage me", "Triage")));
    let board = Arc::new(MemoryBoard::new(board_info()));
    let engine = engine(&adapter, &board, mapping());

    let (report, _) = engine.reconcile(&SyncCursor::default(), now()).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert!(board.cards().is_empty());
}

#[tokio::test]
async fn card_of_another_system_does_not_count_as_a_match() {
    let adapter = Arc::new(MockAdapter::new("Jira").with_item(remote_item("42", "Same id", "Open")));
    let other = LocalCard {
        external_system_name: Some("GitHub".into()),
        ..linked_card("gh-1", "42", "todo", "GitHub issue")
    };
    let board = Arc::new(MemoryBoard::new(board_info()).with_card(other));
    let engine = engine(&adapter, &board, mapping());

    let (report, _) = engine.reconcile(&SyncCursor::default(), now()).await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(board.cards().len(), 2);
    assert_eq!(board.card("gh-1").title, "GitHub issue");
}

#[tokio::test]
async fn remote_change_updates_only_differing_fields() {
    let adapter = Arc::new(MockAdapter::new("Jira").with_item(remote_item("7", "New title", "In Progress")));
    let board = Arc::new(MemoryBoard::new(board_info()).with_card(linked_card("c1", "7", "todo", "Old title")));
    let engine = engine(&adapter, &board, mapping());

    let (report, _) = engine.reconcile(&SyncCursor::default(), now()).await.unwrap();
    assert_eq!(report.updated, 1);
    let updates = board.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(
        updates[0].1,
        CardUpdate {
            title: Some("New title".into()),
            lane_id: Some("doing".into()),
            ..Default::default()
        }
    );
}

#[tokio::test]
async fn card_stays_in_a_lane_that_already_accepts_the_state() {
    let mut m = mapping();
    m.lanes = lanes(&[("done", &["Closed"]), ("archive", &["Resolved>Closed"])]);
    let adapter = Arc::new(MockAdapter::new("Jira").with_item(remote_item("7", "T", "Closed")));
    let board = Arc::new(MemoryBoard::new(board_info()).with_card(linked_card("c1", "7", "archive", "T")));
    let engine = engine(&adapter, &board, m);

    let (report, _) = engine.reconcile(&SyncCursor::default(), now()).await.unwrap();
    assert_eq!(report.unchanged, 1);
    assert_eq!(board.card("c1").lane_id, "archive");
}

#[tokio::test]
async fn lane_updates_can_be_disabled() {
    let mut m = mapping();
    m.update_card_lanes = false;
    let adapter = Arc::new(MockAdapter::new("Jira").with_item(remote_item("7", "T", "In Progress")));
    let board = Arc::new(MemoryBoard::new(board_info()).with_card(linked_card("c1", "7", "todo", "T")));
    let engine = engine(&adapter, &board, m);

    engine.reconcile(&SyncCursor::default(), now()).await.unwrap();
    assert_eq!(board.card("c1").lane_id, "todo");
}

#[tokio::test]
async fn card_updates_can_be_disabled() {
    let mut m = mapping();
    m.update_cards = false;
    let adapter = Arc::new(MockAdapter::new("Jira").with_item(remote_item("7", "New", "In Progress")));
    let board = Arc::new(MemoryBoard::new(board_info()).with_card(linked_card("c1", "7", "todo", "Old")));
    let engine = engine(&adapter, &board, m);

    let (report, _) = engine.reconcile(&SyncCursor::default(), now()).await.unwrap();
    assert_eq!(report.unchanged, 1);
    assert!(board.updates().is_empty());
}

#[tokio::test]
async fn unknown_assignee_leaves_assignment_alone() {
    let item = RemoteItem {
        assignee: Some("nobody@example.com".into()),
        ..remote_item("7", "T", "Open")
    };
    let card = LocalCard {
        assigned_user_ids: vec!["u1".into()],
        ..linked_card("c1", "7", "todo", "T")
    };
    let adapter = Arc::new(MockAdapter::new("Jira").with_item(item));
    let board = Arc::new(MemoryBoard::new(board_info()).with_card(card));
    let engine = engine(&adapter, &board, mapping());

    let (report, _) = engine.reconcile(&SyncCursor::default(), now()).await.unwrap();
    assert_eq!(report.unchanged, 1);
    assert_eq!(board.card("c1").assigned_user_ids, vec!["u1".to_string()]);
}

#[tokio::test]
async fn card_creation_is_retried() {
    let adapter = Arc::new(MockAdapter::new("Jira").with_item(remote_item("7", "T", "Open")));
    let board = Arc::new(MemoryBoard::new(board_info()));
    board.fail_next_adds(2);
    let engine = engine(&adapter, &board, mapping());

    let (report, _) = engine.reconcile(&SyncCursor::default(), now()).await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(board.adds(), 1);
}

#[tokio::test]
async fn exhausted_retries_count_as_failures() {
    let adapter = Arc::new(
        MockAdapter::new("Jira")
            .with_item(remote_item("7", "T", "Open"))
            .with_item(remote_item("8", "U", "Open")),
    );
    let board = Arc::new(MemoryBoard::new(board_info()));
    board.fail_next_adds(3);
    let engine = engine(&adapter, &board, mapping());

    let (report, _) = engine.reconcile(&SyncCursor::default(), now()).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.created, 1);
}

#[tokio::test]
async fn listing_failure_fails_the_pass() {
    let adapter = Arc::new(MockAdapter::new("Jira"));
    adapter.fail("list", 1, RemoteError::transient("Jira", "HTTP 503"));
    let board = Arc::new(MemoryBoard::new(board_info()));
    let engine = engine(&adapter, &board, mapping());

    assert!(engine.reconcile(&SyncCursor::default(), now()).await.is_err());
}

// Outbound lane moves

#[tokio::test]
async fn lane_move_walks_the_whole_chain() {
    let adapter = Arc::new(workflow(MockAdapter::new("Jira")).with_item(remote_item("1", "T", "Open")));
    let board = Arc::new(MemoryBoard::new(board_info()));
    let engine = engine(&adapter, &board, mapping());

    let result = engine.propagate_lane_move(&linked_card("c1", "1", "done", "T")).await;
    assert_eq!(
        result,
        Propagation::Moved(TransitionOutcome::Transitioned {
            hops: vec!["In Progress".into(), "Resolved".into(), "Closed".into()]
        })
    );
    assert!(adapter.item("1").is_in_state("closed"));
}

#[tokio::test]
async fn lane_move_only_walks_forward_from_current_state() {
    let adapter = Arc::new(workflow(MockAdapter::new("Jira")).with_item(remote_item("1", "T", "In Progress")));
    let board = Arc::new(MemoryBoard::new(board_info()));
    let engine = engine(&adapter, &board, mapping());

    engine.propagate_lane_move(&linked_card("c1", "1", "done", "T")).await;
    assert_eq!(adapter.transitions(), vec!["Resolved", "Closed"]);
}

#[tokio::test]
async fn lane_move_to_current_state_does_nothing() {
    let adapter = Arc::new(workflow(MockAdapter::new("Jira")).with_item(remote_item("1", "T", "Closed")));
    let board = Arc::new(MemoryBoard::new(board_info()));
    let engine = engine(&adapter, &board, mapping());

    let result = engine.propagate_lane_move(&linked_card("c1", "1", "done", "T")).await;
    assert_eq!(result, Propagation::Moved(TransitionOutcome::AlreadyInState));
    assert!(adapter.transitions().is_empty());
}

#[tokio::test]
async fn lane_move_leaves_item_in_any_state_the_lane_accepts() {
    let mut m = mapping();
    m.lanes = lanes(&[("todo", &["Open", "Reopened"]), ("done", &["Closed"])]);
    let adapter = Arc::new(
        MockAdapter::new("Jira")
            .with_item(remote_item("1", "T", "Reopened"))
            .with_edges("reopened", &["Open", "Closed"]),
    );
    let board = Arc::new(MemoryBoard::new(board_info()));
    let engine = engine(&adapter, &board, m);

    let result = engine.propagate_lane_move(&linked_card("c1", "1", "todo", "T")).await;
    assert_eq!(result, Propagation::Moved(TransitionOutcome::AlreadyInState));
    assert!(adapter.transitions().is_empty());
    assert!(adapter.item("1").is_in_state("Reopened"));
}

#[tokio::test]
async fn blocked_chain_is_rolled_back() {
    let adapter = Arc::new(
        MockAdapter::new("Jira")
            .with_item(remote_item("1", "T", "Open"))
            .with_edges("open", &["In Progress"])
            .with_edges("in progress", &["Open"]),
    );
    let board = Arc::new(MemoryBoard::new(board_info()));
    let engine = engine(&adapter, &board, mapping());

    let result = engine.propagate_lane_move(&linked_card("c1", "1", "done", "T")).await;
    assert!(matches!(result, Propagation::Failed(_)));
    assert_eq!(adapter.transitions(), vec!["In Progress", "Open"]);
    assert!(adapter.item("1").is_in_state("Open"));
}

#[tokio::test]
async fn later_chains_are_tried_when_the_first_fails() {
    let mut m = mapping();
    m.lanes = lanes(&[("done", &["Review>Done", "Closed"])]);
    let adapter = Arc::new(
        MockAdapter::new("Jira")
            .with_item(remote_item("1", "T", "Open"))
            .with_edges("open", &["Closed"]),
    );
    let board = Arc::new(MemoryBoard::new(board_info()));
    let engine = engine(&adapter, &board, m);

    let result = engine.propagate_lane_move(&linked_card("c1", "1", "done", "T")).await;
    assert_eq!(
        result,
        Propagation::Moved(TransitionOutcome::Transitioned {
            hops: vec!["Closed".into()]
        })
    );
}

#[tokio::test]
async fn lane_without_states_is_skipped() {
    let adapter = Arc::new(MockAdapter::new("Jira").with_item(remote_item("1", "T", "Open")));
    let board = Arc::new(MemoryBoard::new(board_info()));
    let engine = engine(&adapter, &board, mapping());

    let result = engine.propagate_lane_move(&linked_card("c1", "1", "backlog", "T")).await;
    assert_eq!(result, Propagation::Skipped(SkipReason::NoStateMapping));
}

// Outbound field changes

#[tokio::test]
async fn unchanged_field_sends_no_patch() {
    let adapter = Arc::new(MockAdapter::new("Jira").with_item(remote_item("1", "Same", "Open")));
    let board = Arc::new(MemoryBoard::new(board_info()));
    let engine = engine(&adapter, &board, mapping());

    let result = engine
        .propagate_local_change(&linked_card("c1", "1", "todo", "Same"), &[CardField::Title])
        .await;
    assert_eq!(result, Propagation::NoChange);
    assert!(adapter.patches().is_empty());
}

#[tokio::test]
async fn only_real_differences_are_patched() {
    let item = RemoteItem {
        body: Some("same body".into()),
        ..remote_item("1", "Old", "Open")
    };
    let card = LocalCard {
        description: "same body".into(),
        ..linked_card("c1", "1", "todo", "Renamed")
    };
    let adapter = Arc::new(MockAdapter::new("Jira").with_item(item));
    let board = Arc::new(MemoryBoard::new(board_info()));
    let engine = engine(&adapter, &board, mapping());

    let result = engine
        .propagate_local_change(&card, &[CardField::Title, CardField::Description])
        .await;
    assert_eq!(result, Propagation::Patched { fields: 1 });
    let patches = adapter.patches();
    assert_eq!(patches[0].title.as_deref(), Some("Renamed"));
    assert_eq!(patches[0].body, None);
    assert_eq!(adapter.item("1").title, "Renamed");
}

#[tokio::test]
async fn local_fields_map_to_remote_values() {
    let card = LocalCard {
        priority: CardPriority::Critical,
        tags: vec!["api".into()],
        due_date: Some("2026-12-24".into()),
        assigned_user_ids: vec!["u1".into()],
        type_id: Some("t2".into()),
        is_blocked: true,
        block_reason: Some("waiting on vendor".into()),
        ..linked_card("c1", "1", "todo", "T")
    };
    let adapter = Arc::new(MockAdapter::new("Jira").with_item(remote_item("1", "T", "Open")));
    let board = Arc::new(MemoryBoard::new(board_info()));
    let engine = engine(&adapter, &board, mapping());

    let fields = [
        CardField::Priority,
        CardField::Tags,
        CardField::DueDate,
        CardField::AssignedUsers,
        CardField::Type,
        CardField::IsBlocked,
    ];
    let result = engine.propagate_local_change(&card, &fields).await;
    assert_eq!(result, Propagation::Patched { fields: 6 });

    let delta = &adapter.patches()[0];
    assert_eq!(delta.priority.as_deref(), Some("Highest"));
    assert_eq!(delta.labels, Some(vec!["api".to_string()]));
    assert_eq!(delta.due_date, Some(NaiveDate::from_ymd_opt(2026, 12, 24)));
    let assignee = delta.assignee.clone().flatten().unwrap();
    assert_eq!(assignee.email, "johnny@cash.com");
    assert_eq!(assignee.user_name, "jcash");
    assert_eq!(delta.item_type.as_deref(), Some("Bug"));
    assert_eq!(
        delta.blocked.as_ref().map(|b| b.note()),
        Some("Card blocked on the board: waiting on vendor".to_string())
    );
}

#[tokio::test]
async fn github_assignment_uses_the_member_login() {
    let mut m = mapping();
    m.target_system = "github".into();
    m.project = "acme/app".into();
    let adapter = Arc::new(MockAdapter::new("GitHub").with_item(remote_item("7", "T", "open")));
    let board = Arc::new(MemoryBoard::new(board_info()));
    let engine = engine(&adapter, &board, m);
    let card = LocalCard {
        assigned_user_ids: vec!["u1".into()],
        external_system_name: Some("GitHub".into()),
        ..linked_card("c1", "7", "todo", "T")
    };

    let result = engine.propagate_local_change(&card, &[CardField::AssignedUsers]).await;
    assert_eq!(result, Propagation::Patched { fields: 1 });

    let (body, notes) = github::patch_body(&adapter.patches()[0], None);
    assert_eq!(body["assignees"], serde_json::json!(["jcash"]));
    assert!(notes.is_empty());
}

#[tokio::test]
async fn malformed_external_id_is_skipped() {
    let adapter = Arc::new(MockAdapter::new("Jira"));
    let board = Arc::new(MemoryBoard::new(board_info()));
    let engine = engine(&adapter, &board, mapping());

    let result = engine
        .propagate_local_change(&linked_card("c1", "a|b|c", "todo", "T"), &[CardField::Title])
        .await;
    assert_eq!(result, Propagation::Skipped(SkipReason::MalformedExternalId));
    assert!(adapter.calls().is_empty());
}

#[tokio::test]
async fn vanished_remote_item_is_skipped() {
    let adapter = Arc::new(MockAdapter::new("Jira"));
    let board = Arc::new(MemoryBoard::new(board_info()));
    let engine = engine(&adapter, &board, mapping());

    let result = engine
        .propagate_local_change(&linked_card("c1", "99", "todo", "T"), &[CardField::Title])
        .await;
    assert_eq!(result, Propagation::Skipped(SkipReason::RemoteNotFound));
}

#[tokio::test]
async fn cards_of_other_systems_are_ignored() {
    let adapter = Arc::new(MockAdapter::new("Jira").with_item(remote_item("1", "T", "Open")));
    let board = Arc::new(MemoryBoard::new(board_info()));
    let engine = engine(&adapter, &board, mapping());
    let card = LocalCard {
        external_system_name: Some("GitHub".into()),
        ..linked_card("c1", "1", "todo", "Renamed")
    };

    let result = engine.propagate_local_change(&card, &[CardField::Title]).await;
    assert_eq!(result, Propagation::Skipped(SkipReason::NotTracked));
    assert!(adapter.calls().is_empty());
}

// New local cards

#[tokio::test]
async fn new_card_creates_and_links_remote_item() {
    let mut m = mapping();
    m.create_remote_items = true;
    let card = LocalCard {
        id: "c9".into(),
        title: "Write docs".into(),
        lane_id: "doing".into(),
        tags: vec!["docs".into()],
        priority: CardPriority::High,
        assigned_user_ids: vec!["u1".into()],
        ..Default::default()
    };
    let adapter = Arc::new(workflow(MockAdapter::new("Jira")));
    let board = Arc::new(MemoryBoard::new(board_info()).with_card(card.clone()));
    let engine = engine(&adapter, &board, m);

    let result = engine.propagate_new_card(&card).await;
    assert_eq!(
        result,
        Propagation::Created {
            external_id: "501".into()
        }
    );

    let linked = board.card("c9");
    assert_eq!(linked.external_id.as_deref(), Some("501"));
    assert_eq!(linked.external_system_name.as_deref(), Some("Jira"));

    let item = adapter.item("501");
    assert_eq!(item.title, "Write docs");
    assert_eq!(item.priority.as_deref(), Some("High"));
    assert_eq!(item.assignee.as_deref(), Some("johnny@cash.com"));
    assert!(item.is_in_state("In Progress"));
}

#[tokio::test]
async fn new_card_transition_is_attempted_once() {
    let mut m = mapping();
    m.create_remote_items = true;
    let card = LocalCard {
        id: "c9".into(),
        title: "Write docs".into(),
        lane_id: "doing".into(),
        ..Default::default()
    };
    let adapter = Arc::new(workflow(MockAdapter::new("Jira")));
    adapter.reject_transitions_to("In Progress");
    let board = Arc::new(MemoryBoard::new(board_info()).with_card(card.clone()));
    let engine = engine(&adapter, &board, m);

    let result = engine.propagate_new_card(&card).await;
    assert!(matches!(result, Propagation::Created { .. }));
    assert_eq!(adapter.transitions(), vec!["In Progress"]);
    assert!(adapter.item("501").is_in_state("Open"));
}

#[tokio::test]
async fn new_card_creation_respects_mapping_flag() {
    let adapter = Arc::new(MockAdapter::new("Jira"));
    let board = Arc::new(MemoryBoard::new(board_info()));
    let engine = engine(&adapter, &board, mapping());
    let card = LocalCard {
        id: "c9".into(),
        lane_id: "doing".into(),
        ..Default::default()
    };

    let result = engine.propagate_new_card(&card).await;
    assert_eq!(result, Propagation::Skipped(SkipReason::Disabled));
    assert_eq!(adapter.creates(), 0);
}

#[tokio::test]
async fn change_event_routes_fields_and_lane_separately() {
    let adapter = Arc::new(workflow(MockAdapter::new("Jira")).with_item(remote_item("1", "Old", "Open")));
    let board = Arc::new(MemoryBoard::new(board_info()));
    let engine = engine(&adapter, &board, mapping());

    let event = BoardEvent::CardChanged {
        card: linked_card("c1", "1", "doing", "New"),
        changed_fields: vec![CardField::Title, CardField::Lane],
    };
    let results = engine.handle_event(&event).await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0], Propagation::Patched { fields: 1 });
    assert!(matches!(results[1], Propagation::Moved(_)));
    assert!(adapter.item("1").is_in_state("In Progress"));
}

#[tokio::test]
async fn mappings_sharing_a_board_each_see_its_events() {
    let jira = Arc::new(MockAdapter::new("Jira"));
    let github = Arc::new(MockAdapter::new("GitHub").with_item(remote_item("7", "Old", "Open")));
    let board = Arc::new(MemoryBoard::new(board_info()));
    let jira_engine = engine(&jira, &board, mapping());
    let mut gh_mapping = mapping();
    gh_mapping.target_system = "github".into();
    gh_mapping.project = "acme/app".into();
    let github_engine = engine(&github, &board, gh_mapping);

    let mut card = linked_card("c9", "7", "todo", "New");
    card.external_system_name = Some("GitHub".into());
    board.push_event(BoardEvent::CardChanged {
        card,
        changed_fields: vec![CardField::Title],
    });

    assert_eq!(jira_engine.drain_board_events().await.unwrap(), 1);
    assert_eq!(github_engine.drain_board_events().await.unwrap(), 1);
    assert_eq!(github.patches().len(), 1);
    assert_eq!(github.item("7").title, "New");
    assert!(jira.patches().is_empty());

    // Already-read events are not delivered again.
    assert_eq!(github_engine.drain_board_events().await.unwrap(), 0);
}

// Workers

#[tokio::test]
async fn worker_cycle_handles_events_and_saves_cursor() {
    let dir = tempfile::tempdir().unwrap();
    let cursors: Arc<dyn CursorStore> = Arc::new(FileCursorStore::new(dir.path().to_path_buf()));
    let adapter = Arc::new(workflow(MockAdapter::new("Jira")).with_item(remote_item("1", "T", "Open")));
    let board = Arc::new(MemoryBoard::new(board_info()).with_card(linked_card("c1", "1", "doing", "T")));
    board.push_event(BoardEvent::CardChanged {
        card: linked_card("c1", "1", "doing", "T"),
        changed_fields: vec![CardField::Lane],
    });
    let worker = MappingWorker::new(engine(&adapter, &board, mapping()), cursors.clone());

    let report = worker.run_cycle().await.unwrap();
    assert_eq!(report.unchanged, 1);
    assert!(adapter.item("1").is_in_state("In Progress"));
    assert!(cursors.load("b1:jira:ENG").unwrap().last_poll.is_some());
}

#[tokio::test]
async fn worker_stops_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let cursors: Arc<dyn CursorStore> = Arc::new(FileCursorStore::new(dir.path().to_path_buf()));
    let adapter = Arc::new(MockAdapter::new("Jira"));
    let board = Arc::new(MemoryBoard::new(board_info()));
    let worker = MappingWorker::new(engine(&adapter, &board, mapping()), cursors);

    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(worker.run(rx));
    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker did not stop")
        .unwrap();
}

fn mock_factory(_: &AppConfig, mapping: &BoardMapping) -> anyhow::Result<Box<dyn RemoteAdapter>> {
    Ok(Box::new(MockAdapter::new(&mapping.target_system)))
}

#[test]
fn mappings_with_unknown_systems_are_left_out() {
    let mut registry = AdapterRegistry::new();
    registry.register("mock", mock_factory);
    let mut unknown = mapping();
    unknown.target_system = "linear".into();
    let mut known = mapping();
    known.target_system = "mock".into();
    let config = AppConfig {
        mappings: vec![unknown, known],
        ..Default::default()
    };
    let dir = tempfile::tempdir().unwrap();

    let workers = build_workers(
        &config,
        &registry,
        Arc::new(MemoryBoard::new(board_info())),
        Arc::new(FileCursorStore::new(dir.path().to_path_buf())),
        RetryExecutor::once(),
    );
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].label(), "b1:mock:ENG");
}

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::cursor::SyncCursor;
use super::transition::{HopRetry, TransitionOutcome, WorkflowTransitioner};
use crate::board::BoardClient;
use crate::mapper::FieldMapper;
use crate::model::card::{tags_equal, BoardEvent, CardField, CardUpdate, LocalCard};
use crate::model::external_id::ExternalId;
use crate::model::mapping::BoardMapping;
use crate::model::remote_item::{BlockedChange, FieldDelta, NewRemoteItem, RemoteItem};
use crate::providers::RemoteAdapter;
use crate::retry::RetryExecutor;

/// Counts from one inbound reconcile pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} fetched, {} created, {} updated, {} unchanged, {} skipped, {} failed",
            self.fetched, self.created, self.updated, self.unchanged, self.skipped, self.failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Created,
    Updated,
    Unchanged,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Card has no external id, or belongs to another system.
    NotTracked,
    AlreadyLinked,
    MalformedExternalId,
    RemoteNotFound,
    NoStateMapping,
    Disabled,
}

/// Result of pushing one local change to the remote system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Propagation {
    Skipped(SkipReason),
    NoChange,
    Patched { fields: usize },
    Moved(TransitionOutcome),
    Created { external_id: String },
    Failed(String),
}

/// Two-way synchronization for one board mapping.
pub struct SyncEngine {
    adapter: Arc<dyn RemoteAdapter>,
    board: Arc<dyn BoardClient>,
    mapping: BoardMapping,
    retry: RetryExecutor,
    date_format: String,
}

impl SyncEngine {
    pub fn new(
        adapter: Arc<dyn RemoteAdapter>,
        board: Arc<dyn BoardClient>,
        mapping: BoardMapping,
        retry: RetryExecutor,
        date_format: &str,
    ) -> Self {
        Self {
            adapter,
            board,
            mapping,
            retry,
            date_format: date_format.to_string(),
        }
    }

    pub fn mapping(&self) -> &BoardMapping {
        &self.mapping
    }

    fn system(&self) -> &str {
        self.adapter.name()
    }

    /// Pull items changed inside the look-back window and bring their cards
    /// up to date. Per-item failures are counted, not returned.
    pub async fn reconcile(
        &self,
        cursor: &SyncCursor,
        now: DateTime<Utc>,
    ) -> Result<(ReconcileReport, SyncCursor)> {
        let since = cursor.window_start(now, self.mapping.polling_interval());
        let items = self.adapter.list_changed_since(since).await?;
        let board = self.board.get_board(&self.mapping.board_id).await?;
        let mapper = FieldMapper::new(&self.mapping, &board, self.system(), &self.date_format);

        let mut report = ReconcileReport {
            fetched: items.len(),
            ..Default::default()
        };
        for item in &items {
            match self.reconcile_item(&mapper, item).await {
                Ok(ItemOutcome::Created) => report.created += 1,
                Ok(ItemOutcome::Updated) => report.updated += 1,
                Ok(ItemOutcome::Unchanged) => report.unchanged += 1,
                Ok(ItemOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!(item = item.key(), error = %e, "failed to reconcile item");
                    report.failed += 1;
                }
            }
        }
        Ok((report, SyncCursor::at(now)))
    }

    async fn reconcile_item(&self, mapper: &FieldMapper<'_>, item: &RemoteItem) -> Result<ItemOutcome> {
        let external_id = item.external_id().to_string();
        let existing = self
            .board
            .get_card_by_external_id(&self.mapping.board_id, self.system(), &external_id)
            .await?;
        match existing {
            Some(card) if card.belongs_to(self.system()) => self.update_card(mapper, &card, item).await,
            _ => self.create_card(mapper, item, &external_id).await,
        }
    }

    async fn create_card(
        &self,
        mapper: &FieldMapper<'_>,
        item: &RemoteItem,
        external_id: &str,
    ) -> Result<ItemOutcome> {
        let Some(lane_id) = self.mapping.lane_for_state(&item.state) else {
            tracing::info!(item = item.key(), state = %item.state, "no lane mapped for state, not creating card");
            return Ok(ItemOutcome::Skipped);
        };
        let new_card = mapper.new_card(item, lane_id);
        let board = self.board.as_ref();
        let board_id = self.mapping.board_id.as_str();
        let new_card = &new_card;
        let created = self
            .retry
            .attempt("create card", move || board.add_card(board_id, new_card))
            .await?;
        tracing::info!(item = item.key(), external_id, card = %created.id, lane = lane_id, "created card");
        Ok(ItemOutcome::Created)
    }

    async fn update_card(
        &self,
        mapper: &FieldMapper<'_>,
        card: &LocalCard,
        item: &RemoteItem,
    ) -> Result<ItemOutcome> {
        if !self.mapping.update_cards {
            tracing::debug!(card = %card.id, "card updates disabled for mapping");
            return Ok(ItemOutcome::Unchanged);
        }
        let update = self.card_update(mapper, card, item);
        if update.is_empty() {
            return Ok(ItemOutcome::Unchanged);
        }

        let board = self.board.as_ref();
        let board_id = self.mapping.board_id.as_str();
        let card_id = card.id.as_str();
        let update_ref = &update;
        self.retry
            .attempt("update card", move || board.update_card(board_id, card_id, update_ref))
            .await?;
        tracing::info!(card = %card.id, item = item.key(), fields = ?update.changed_fields(), "updated card");
        Ok(ItemOutcome::Updated)
    }

    /// Fields whose remote value differs from the card, mapped to board values.
    pub(crate) fn card_update(&self, mapper: &FieldMapper<'_>, card: &LocalCard, item: &RemoteItem) -> CardUpdate {
        let mut update = CardUpdate::default();

        if card.title != item.title {
            update.title = Some(item.title.clone());
        }
        let body = item.body.as_deref().unwrap_or_default();
        if card.description.trim() != body.trim() {
            update.description = Some(body.to_string());
        }
        let priority = mapper.priority(item.priority.as_deref());
        if card.priority != priority {
            update.priority = Some(priority);
        }
        let tags = mapper.tags(&item.labels);
        if !tags_equal(&card.tags, &tags) {
            update.tags = Some(tags);
        }
        let local_due = card.due_date.as_deref().and_then(|d| mapper.parse_date(d));
        if local_due != item.due_date {
            update.due_date = Some(item.due_date.map(|d| mapper.format_date(d)).unwrap_or_default());
        }
        if let Some(member) = mapper.assignee(item.assignee.as_deref()) {
            if !card.assigned_user_ids.contains(&member.id) {
                update.assigned_user_ids = Some(vec![member.id.clone()]);
            }
        }
        if self.mapping.update_card_lanes && !self.mapping.lane_accepts(&card.lane_id, &item.state) {
            if let Some(lane_id) = self.mapping.lane_for_state(&item.state) {
                update.lane_id = Some(lane_id.to_string());
            }
        }
        update
    }

    /// Push edited card fields to the remote item, sending only real differences.
    pub async fn propagate_local_change(&self, card: &LocalCard, fields: &[CardField]) -> Propagation {
        let id = match self.tracked_id(card) {
            Ok(id) => id,
            Err(reason) => return Propagation::Skipped(reason),
        };
        let board = match self.board.get_board(&self.mapping.board_id).await {
            Ok(board) => board,
            Err(e) => return Propagation::Failed(format!("{e:#}")),
        };
        let mapper = FieldMapper::new(&self.mapping, &board, self.system(), &self.date_format);

        let adapter = self.adapter.as_ref();
        let id_ref = &id;
        let item = match self
            .retry
            .attempt("fetch item", move || adapter.fetch(id_ref))
            .await
        {
            Ok(item) => item,
            Err(e) if e.last.is_not_found() => {
                tracing::debug!(card = %card.id, item = %id, "remote item no longer exists");
                return Propagation::Skipped(SkipReason::RemoteNotFound);
            }
            Err(e) => {
                tracing::warn!(card = %card.id, item = %id, error = %e, "failed to fetch remote item");
                return Propagation::Failed(e.to_string());
            }
        };

        let delta = self.field_delta(&mapper, card, &item, fields);
        if delta.is_empty() {
            tracing::debug!(card = %card.id, item = %id, "no remote changes needed");
            return Propagation::NoChange;
        }
        let delta_ref = &delta;
        match self
            .retry
            .attempt("patch item", move || adapter.patch(id_ref, delta_ref))
            .await
        {
            Ok(()) => {
                tracing::info!(card = %card.id, item = %id, fields = delta.field_count(), "patched remote item");
                Propagation::Patched {
                    fields: delta.field_count(),
                }
            }
            Err(e) => {
                tracing::warn!(card = %card.id, item = %id, error = %e, "failed to patch remote item");
                Propagation::Failed(e.to_string())
            }
        }
    }

    /// Differences between the card and the remote item for the named fields.
    pub(crate) fn field_delta(
        &self,
        mapper: &FieldMapper<'_>,
        card: &LocalCard,
        item: &RemoteItem,
        fields: &[CardField],
    ) -> FieldDelta {
        let mut delta = FieldDelta::default();
        for field in fields {
            match field {
                CardField::Title => {
                    if card.title != item.title {
                        delta.title = Some(card.title.clone());
                    }
                }
                CardField::Description => {
                    let body = item.body.as_deref().unwrap_or_default();
                    if card.description.trim() != body.trim() {
                        delta.body = Some(card.description.clone());
                    }
                }
                CardField::Priority => {
                    if mapper.priority(item.priority.as_deref()) != card.priority {
                        delta.priority = mapper.remote_priority(card.priority);
                    }
                }
                CardField::Tags => {
                    let labels = mapper.labels(&card.tags);
                    if !tags_equal(&labels, &item.labels) {
                        delta.labels = Some(labels);
                    }
                }
                CardField::DueDate => {
                    let local = card.due_date.as_deref().and_then(|d| mapper.parse_date(d));
                    if local != item.due_date {
                        delta.due_date = Some(local);
                    }
                }
                CardField::AssignedUsers => {
                    let remote_member = mapper.assignee(item.assignee.as_deref());
                    let same = remote_member.is_some_and(|m| card.assigned_user_ids.contains(&m.id));
                    if same {
                        continue;
                    }
                    if card.assigned_user_ids.is_empty() {
                        if item.assignee.is_some() {
                            delta.assignee = Some(None);
                        }
                    } else if let Some(identity) = mapper.remote_assignee(&card.assigned_user_ids) {
                        delta.assignee = Some(Some(identity));
                    }
                }
                CardField::IsBlocked => {
                    delta.blocked = Some(BlockedChange {
                        blocked: card.is_blocked,
                        reason: card.block_reason.clone(),
                    });
                }
                CardField::Type => {
                    if let Some(remote) = mapper.remote_type(card.type_id.as_deref()) {
                        let same = item
                            .item_type
                            .as_deref()
                            .is_some_and(|t| t.eq_ignore_ascii_case(&remote));
                        if !same {
                            delta.item_type = Some(remote);
                        }
                    }
                }
                CardField::Lane | CardField::StartDate => {}
            }
        }
        delta
    }

    /// Move the remote item to match the card's new lane. Each chain configured
    /// for the lane is tried in order until one succeeds.
    pub async fn propagate_lane_move(&self, card: &LocalCard) -> Propagation {
        if !self.mapping.update_card_lanes {
            return Propagation::Skipped(SkipReason::Disabled);
        }
        let id = match self.tracked_id(card) {
            Ok(id) => id,
            Err(reason) => return Propagation::Skipped(reason),
        };
        let chains = self.mapping.chains_for_lane(&card.lane_id);
        if chains.is_empty() {
            tracing::debug!(card = %card.id, lane = %card.lane_id, "lane has no mapped states");
            return Propagation::Skipped(SkipReason::NoStateMapping);
        }

        let adapter = self.adapter.as_ref();
        let id_ref = &id;
        let item = match self
            .retry
            .attempt("fetch item", move || adapter.fetch(id_ref))
            .await
        {
            Ok(item) => item,
            Err(e) if e.last.is_not_found() => {
                tracing::debug!(card = %card.id, item = %id, "remote item no longer exists");
                return Propagation::Skipped(SkipReason::RemoteNotFound);
            }
            Err(e) => {
                tracing::warn!(card = %card.id, item = %id, error = %e, "failed to fetch remote item");
                return Propagation::Failed(e.to_string());
            }
        };
        // Any state the lane accepts counts, not only the end of the first chain.
        if self.mapping.lane_accepts(&card.lane_id, &item.state) {
            tracing::debug!(card = %card.id, item = %id, state = %item.state, "remote item already in a lane state");
            return Propagation::Moved(TransitionOutcome::AlreadyInState);
        }

        let transitioner = WorkflowTransitioner::new(adapter, self.retry, HopRetry::Steady);
        let mut last_error = None;
        for chain in &chains {
            match transitioner.run(&id, chain).await {
                Ok(outcome) => {
                    tracing::info!(card = %card.id, item = %id, chain = %chain, ?outcome, "moved remote item");
                    return Propagation::Moved(outcome);
                }
                Err(e) if e.is_not_found() => {
                    tracing::debug!(card = %card.id, item = %id, "remote item no longer exists");
                    return Propagation::Skipped(SkipReason::RemoteNotFound);
                }
                Err(e) => {
                    tracing::warn!(card = %card.id, item = %id, chain = %chain, error = %e, "state chain failed");
                    last_error = Some(e.to_string());
                }
            }
        }
        Propagation::Failed(last_error.unwrap_or_default())
    }

    /// Create a remote item for a card added on the board, link the card to
    /// it and move the item to the card's lane.
    pub async fn propagate_new_card(&self, card: &LocalCard) -> Propagation {
        if !self.mapping.create_remote_items {
            return Propagation::Skipped(SkipReason::Disabled);
        }
        if card.external_id.as_deref().is_some_and(|id| !id.trim().is_empty()) {
            return Propagation::Skipped(SkipReason::AlreadyLinked);
        }
        let chains = self.mapping.chains_for_lane(&card.lane_id);
        if chains.is_empty() {
            tracing::debug!(card = %card.id, lane = %card.lane_id, "lane has no mapped states, not creating item");
            return Propagation::Skipped(SkipReason::NoStateMapping);
        }
        let board_info = match self.board.get_board(&self.mapping.board_id).await {
            Ok(board) => board,
            Err(e) => return Propagation::Failed(format!("{e:#}")),
        };
        let mapper = FieldMapper::new(&self.mapping, &board_info, self.system(), &self.date_format);

        let fields = NewRemoteItem {
            title: card.title.clone(),
            body: card.description.clone(),
            labels: mapper.labels(&card.tags),
            priority: mapper.remote_priority(card.priority),
            item_type: mapper.remote_type(card.type_id.as_deref()),
            assignee: mapper.remote_assignee(&card.assigned_user_ids),
            due_date: card.due_date.as_deref().and_then(|d| mapper.parse_date(d)),
        };
        let adapter = self.adapter.as_ref();
        let fields_ref = &fields;
        let created = match self
            .retry
            .attempt("create item", move || adapter.create(fields_ref))
            .await
        {
            Ok(item) => item,
            Err(e) => {
                tracing::warn!(card = %card.id, error = %e, "failed to create remote item");
                return Propagation::Failed(e.to_string());
            }
        };
        let id = created.external_id();
        tracing::info!(card = %card.id, item = %id, "created remote item");

        let update = CardUpdate {
            external_system_name: Some(self.system().to_string()),
            external_id: Some(id.to_string()),
            tags: self
                .mapping
                .tag_cards_with_target_system_name
                .then(|| mapper.tags(&card.tags))
                .filter(|tags| !tags_equal(tags, &card.tags)),
            ..Default::default()
        };
        let board = self.board.as_ref();
        let board_id = self.mapping.board_id.as_str();
        let card_id = card.id.as_str();
        let update_ref = &update;
        if let Err(e) = self
            .retry
            .attempt("link card", move || board.update_card(board_id, card_id, update_ref))
            .await
        {
            tracing::warn!(card = %card.id, item = %id, error = %e, "failed to link card to remote item");
            return Propagation::Failed(e.to_string());
        }

        if !chains.iter().any(|c| c.ends_at(&created.state)) {
            let transitioner = WorkflowTransitioner::new(adapter, self.retry, HopRetry::Once);
            let mut moved = false;
            for chain in &chains {
                match transitioner.run(&id, chain).await {
                    Ok(_) => {
                        moved = true;
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(card = %card.id, item = %id, chain = %chain, error = %e, "state chain failed");
                    }
                }
            }
            if !moved {
                tracing::warn!(card = %card.id, item = %id, lane = %card.lane_id, "new item left in its initial state");
            }
        }
        Propagation::Created {
            external_id: id.to_string(),
        }
    }

    /// Route one board notification to the matching propagation.
    pub async fn handle_event(&self, event: &BoardEvent) -> Vec<Propagation> {
        match event {
            BoardEvent::CardCreated(card) => vec![self.propagate_new_card(card).await],
            BoardEvent::CardChanged {
                card,
                changed_fields,
            } => {
                let mut results = Vec::new();
                if changed_fields.iter().any(|f| *f != CardField::Lane) {
                    results.push(self.propagate_local_change(card, changed_fields).await);
                }
                if changed_fields.contains(&CardField::Lane) {
                    results.push(self.propagate_lane_move(card).await);
                }
                results
            }
        }
    }

    /// Drain and handle pending board notifications for this mapping's board.
    /// Other mappings on the same board read the same events independently.
    pub async fn drain_board_events(&self) -> Result<usize> {
        let events = self
            .board
            .poll_events(&self.mapping.board_id, &self.mapping.label())
            .await?;
        for event in &events {
            for result in self.handle_event(event).await {
                tracing::debug!(?result, "board event handled");
            }
        }
        Ok(events.len())
    }

    fn tracked_id(&self, card: &LocalCard) -> Result<ExternalId, SkipReason> {
        if !card.belongs_to(self.system()) {
            return Err(SkipReason::NotTracked);
        }
        let Some(raw) = card.external_id.as_deref() else {
            return Err(SkipReason::NotTracked);
        };
        raw.parse::<ExternalId>().map_err(|e| {
            tracing::debug!(card = %card.id, error = %e, "skipping card with malformed external id");
            SkipReason::MalformedExternalId
        })
    }
}

//! In-memory `BoardClient` used by engine tests.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::BoardClient;
use crate::model::card::{BoardEvent, BoardInfo, CardUpdate, LocalCard, NewCard};

#[derive(Default)]
pub struct MemoryState {
    pub board: BoardInfo,
    pub cards: Vec<LocalCard>,
    pub updates: Vec<(String, CardUpdate)>,
    pub adds: usize,
    pub events: Vec<BoardEvent>,
    /// How far into `events` each subscriber has read.
    pub read_offsets: HashMap<String, usize>,
    /// Remaining `add_card` calls that fail before one succeeds.
    pub failing_adds: u32,
}

pub struct MemoryBoard {
    state: Mutex<MemoryState>,
}

impl MemoryBoard {
    pub fn new(board: BoardInfo) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                board,
                ..Default::default()
            }),
        }
    }

    pub fn with_card(self, card: LocalCard) -> Self {
        self.state.lock().unwrap().cards.push(card);
        self
    }

    pub fn push_event(&self, event: BoardEvent) {
        self.state.lock().unwrap().events.push(event);
    }

    pub fn fail_next_adds(&self, n: u32) {
        self.state.lock().unwrap().failing_adds = n;
    }

    pub fn cards(&self) -> Vec<LocalCard> {
        self.state.lock().unwrap().cards.clone()
    }

    pub fn card(&self, id: &str) -> LocalCard {
        self.cards().into_iter().find(|c| c.id == id).unwrap()
    }

    pub fn updates(&self) -> Vec<(String, CardUpdate)> {
        self.state.lock().unwrap().updates.clone()
    }

    pub fn adds(&self) -> usize {
        self.state.lock().unwrap().adds
    }
}

fn apply(card: &mut LocalCard, update: &CardUpdate) {
    if let Some(title) = &update.title {
        card.title = title.clone();
    }
    if let Some(description) = &update.description {
        card.description = description.clone();
    }
    if let Some(priority) = update.priority {
        card.priority = priority;
    }
    if let Some(tags) = &update.tags {
        card.tags = tags.clone();
    }
    if let Some(due) = &update.due_date {
        card.due_date = Some(due.clone()).filter(|d| !d.is_empty());
    }
    if let Some(ids) = &update.assigned_user_ids {
        card.assigned_user_ids = ids.clone();
    }
    if let Some(lane) = &update.lane_id {
        card.lane_id = lane.clone();
    }
    if let Some(system) = &update.external_system_name {
        card.external_system_name = Some(system.clone());
    }
    if let Some(id) = &update.external_id {
        card.external_id = Some(id.clone());
    }
}

#[async_trait]
impl BoardClient for MemoryBoard {
    async fn get_board(&self, _board_id: &str) -> Result<BoardInfo> {
        Ok(self.state.lock().unwrap().board.clone())
    }

    async fn get_card_by_external_id(
        &self,
        _board_id: &str,
        system: &str,
        external_id: &str,
    ) -> Result<Option<LocalCard>> {
        let state = self.state.lock().unwrap();
        let mut matching = state
            .cards
            .iter()
            .filter(|c| c.external_id.as_deref() == Some(external_id));
        let owned = matching.clone().find(|c| c.belongs_to(system));
        Ok(owned.or_else(|| matching.next()).cloned())
    }

    async fn add_card(&self, _board_id: &str, card: &NewCard) -> Result<LocalCard> {
        let mut state = self.state.lock().unwrap();
        if state.failing_adds > 0 {
            state.failing_adds -= 1;
            bail!("board unavailable");
        }
        state.adds += 1;
        let created = LocalCard {
            id: format!("card-{}", state.cards.len() + 1),
            title: card.title.clone(),
            description: card.description.clone(),
            priority: card.priority,
            tags: card.tags.clone(),
            due_date: card.due_date.clone(),
            lane_id: card.lane_id.clone(),
            type_id: card.type_id.clone(),
            external_system_name: Some(card.external_system_name.clone()),
            external_id: Some(card.external_id.clone()),
            assigned_user_ids: card.assigned_user_ids.clone(),
            ..Default::default()
        };
        state.cards.push(created.clone());
        Ok(created)
    }

    async fn update_card(&self, _board_id: &str, card_id: &str, update: &CardUpdate) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let Some(card) = state.cards.iter_mut().find(|c| c.id == card_id) else {
            bail!("card {card_id} not found");
        };
        apply(card, update);
        state.updates.push((card_id.to_string(), update.clone()));
        Ok(())
    }

    async fn poll_events(&self, _board_id: &str, subscriber: &str) -> Result<Vec<BoardEvent>> {
        let mut state = self.state.lock().unwrap();
        let total = state.events.len();
        let offset = state.read_offsets.insert(subscriber.to_string(), total).unwrap_or(0);
        Ok(state.events[offset..].to_vec())
    }
}

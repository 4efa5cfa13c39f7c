use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::BoardClient;
use crate::config::BoardConfig;
use crate::model::card::{BoardEvent, BoardInfo, CardField, CardUpdate, LocalCard, NewCard};

/// `BoardClient` over the board service's JSON REST API.
pub struct HttpBoard {
    base_url: String,
    token: String,
    client: reqwest::Client,
    /// Last event version seen per (board, subscriber).
    versions: Mutex<HashMap<(String, String), u64>>,
}

impl HttpBoard {
    pub fn new(config: &BoardConfig) -> Self {
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            client: reqwest::Client::new(),
            versions: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
    }

    fn last_version(&self, board_id: &str, subscriber: &str) -> Option<u64> {
        let key = (board_id.to_string(), subscriber.to_string());
        self.versions.lock().ok().and_then(|v| v.get(&key).copied())
    }

    fn set_version(&self, board_id: &str, subscriber: &str, version: u64) {
        if let Ok(mut versions) = self.versions.lock() {
            versions.insert((board_id.to_string(), subscriber.to_string()), version);
        }
    }
}

#[derive(Deserialize)]
struct EventsResponse {
    version: u64,
    #[serde(default)]
    events: Vec<WireEvent>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    kind: String,
    card: LocalCard,
    #[serde(default)]
    changed_fields: Vec<String>,
}

fn pick_card(cards: Vec<LocalCard>, system: &str, external_id: &str) -> Option<LocalCard> {
    let mut matching: Vec<LocalCard> = cards
        .into_iter()
        .filter(|c| c.external_id.as_deref() == Some(external_id))
        .collect();
    match matching.iter().position(|c| c.belongs_to(system)) {
        Some(idx) => Some(matching.swap_remove(idx)),
        None => matching.into_iter().next(),
    }
}

fn to_board_event(event: WireEvent) -> Option<BoardEvent> {
    match event.kind.to_ascii_lowercase().as_str() {
        "created" | "cardcreated" => Some(BoardEvent::CardCreated(event.card)),
        "changed" | "updated" | "cardchanged" | "moved" => {
            let changed_fields = event
                .changed_fields
                .iter()
                .filter_map(|name| match name.parse::<CardField>() {
                    Ok(field) => Some(field),
                    Err(e) => {
                        tracing::debug!(field = %name, error = %e, "ignoring untracked card field");
                        None
                    }
                })
                .collect();
            Some(BoardEvent::CardChanged {
                card: event.card,
                changed_fields,
            })
        }
        other => {
            tracing::debug!(kind = other, card = %event.card.id, "ignoring board event");
            None
        }
    }
}

#[async_trait]
impl BoardClient for HttpBoard {
    async fn get_board(&self, board_id: &str) -> Result<BoardInfo> {
        let board: BoardInfo = self
            .get(&format!("/boards/{board_id}"))
            .send()
            .await
            .context("Board request failed")?
            .error_for_status()?
            .json()
            .await
            .context("Failed to parse board")?;
        Ok(board)
    }

    async fn get_card_by_external_id(
        &self,
        board_id: &str,
        system: &str,
        external_id: &str,
    ) -> Result<Option<LocalCard>> {
        let cards: Vec<LocalCard> = self
            .get(&format!("/boards/{board_id}/cards"))
            .query(&[("externalId", external_id)])
            .send()
            .await
            .context("Card lookup failed")?
            .error_for_status()?
            .json()
            .await
            .context("Failed to parse card lookup")?;
        Ok(pick_card(cards, system, external_id))
    }

    async fn add_card(&self, board_id: &str, card: &NewCard) -> Result<LocalCard> {
        let created: LocalCard = self
            .client
            .post(format!("{}/boards/{board_id}/cards", self.base_url))
            .bearer_auth(&self.token)
            .json(card)
            .send()
            .await
            .context("Card creation failed")?
            .error_for_status()?
            .json()
            .await
            .context("Failed to parse created card")?;
        Ok(created)
    }

    async fn update_card(&self, board_id: &str, card_id: &str, update: &CardUpdate) -> Result<()> {
        self.client
            .patch(format!("{}/boards/{board_id}/cards/{card_id}", self.base_url))
            .bearer_auth(&self.token)
            .json(update)
            .send()
            .await
            .context("Card update failed")?
            .error_for_status()?;
        Ok(())
    }

    async fn poll_events(&self, board_id: &str, subscriber: &str) -> Result<Vec<BoardEvent>> {
        let since = self.last_version(board_id, subscriber);
        let mut req = self.get(&format!("/boards/{board_id}/events"));
        if let Some(version) = since {
            req = req.query(&[("since", version)]);
        }
        let resp: EventsResponse = req
            .send()
            .await
            .context("Board events request failed")?
            .error_for_status()?
            .json()
            .await
            .context("Failed to parse board events")?;

        self.set_version(board_id, subscriber, resp.version);
        // The first call only establishes the starting version.
        if since.is_none() {
            return Ok(Vec::new());
        }
        Ok(resp.events.into_iter().filter_map(to_board_event).collect())
    }
}

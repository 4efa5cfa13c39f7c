pub mod http;
#[cfg(test)]
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::card::{BoardEvent, BoardInfo, CardUpdate, LocalCard, NewCard};

/// The kanban board service the engine keeps in sync.
#[async_trait]
pub trait BoardClient: Send + Sync {
    async fn get_board(&self, board_id: &str) -> Result<BoardInfo>;

    /// Card holding `external_id`. A card owned by `system` is preferred, but
    /// a card from another system may be returned when it is the only match.
    async fn get_card_by_external_id(
        &self,
        board_id: &str,
        system: &str,
        external_id: &str,
    ) -> Result<Option<LocalCard>>;

    async fn add_card(&self, board_id: &str, card: &NewCard) -> Result<LocalCard>;

    async fn update_card(&self, board_id: &str, card_id: &str, update: &CardUpdate) -> Result<()>;

    /// Change notifications since `subscriber`'s previous call for this
    /// board. Each subscriber sees every event once.
    async fn poll_events(&self, board_id: &str, subscriber: &str) -> Result<Vec<BoardEvent>>;
}

pub mod card;
pub mod external_id;
pub mod mapping;
pub mod remote_item;

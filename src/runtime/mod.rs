pub mod events;
pub mod highlight;

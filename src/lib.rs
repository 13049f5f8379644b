//! Narrative Dialogue — turn-based NPC conversations over a text model.
//!
//! Resolves which agent persona answers an interaction, augments the prompt
//! with lexical knowledge retrieval and recent turns, runs generation on a
//! background worker per exchange, and keeps a navigable history of
//! exchanges and candidate player replies.

pub mod core;
pub mod schema;

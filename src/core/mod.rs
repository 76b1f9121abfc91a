//! Packed annotation storage engine
//!
//! - [`error`] - Error types
//! - [`arena`] - Byte arena contract and the default heap arena
//! - [`value`] - Value kinds and dynamic values
//! - [`converter`] - Typed encode/decode at a slot position
//! - [`substitute`] - Object ↔ index substitution
//! - [`handle`] - Package handles (field descriptors)
//! - [`layout`] - Slot layout computation
//! - [`seqlock`] - Version stamp for optimistic reads
//! - [`stats`] - Access counters
//! - [`config`] - Options and builder
//! - [`manager`] - The packed data manager

pub mod arena;
pub mod config;
pub mod converter;
pub mod error;
pub mod handle;
pub mod layout;
pub mod manager;
pub mod seqlock;
pub mod stats;
pub mod substitute;
pub mod value;

pub use manager::{PackedDataManager, SlotState};

#![forbid(unsafe_code)]

//! Observable collections with granular change notifications.
//!
//! Every collection publishes two streams: `changes`, a sequence of
//! [`ChangeBatch`]es describing each mutation position by position, and
//! `items`, which replays the latest snapshot to new subscribers.
//!
//! - [`ObservableList`] is the mutable base list.
//! - [`ObservableFilteredList`] derives a filtered view from any collection.
//! - [`LoadingMoreList`] pages items in from a [`PageLoader`].
//!
//! Bulk replacement is turned into a batch by a [`ChangesCalculator`]:
//! [`PositionalCalculator`] for cheap index-wise comparison, or
//! [`DiffCalculator`] for identity-aware diffs with moves.

pub mod calculator;
pub mod change;
pub mod collection;
pub mod error;
pub mod filtered;
pub mod loading_more;
pub mod observable_list;

pub use calculator::{ChangesCalculator, DiffCalculator, PositionalCalculator};
pub use change::{Change, ChangeBatch, ChangePayload, apply_changes};
pub use collection::{CollectionCore, Emission, ObservableCollection};
pub use error::{BoxError, Error, Result};
pub use filtered::ObservableFilteredList;
pub use loading_more::{
    FilterAction, LoadedItemsFilter, LoadingMoreConfig, LoadingMoreList, LoadingMoreSnapshot,
    MAX_STALE_ATTEMPTS, MoreRequest, Page, PageLoader, RemainingCount,
};
pub use observable_list::ObservableList;

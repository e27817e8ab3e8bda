#![forbid(unsafe_code)]

//! FrankenBind public facade crate.
//!
//! Observable collections with granular change notifications, plus
//! lifecycle-scoped subscriptions that stop delivering once their owner
//! stops or is destroyed.

pub mod prelude {
    pub use fbind_core::{Cx, CxController};
    pub use fbind_runtime::{
        Binding, Callbacks, Immediate, LifecycleBindable, LifecycleScope, MainQueue, Task,
        TaskError,
    };

    #[cfg(feature = "collections")]
    pub use fbind_collections::{
        Change, ChangeBatch, ChangesCalculator, DiffCalculator, LoadingMoreList, MoreRequest,
        ObservableCollection, ObservableFilteredList, ObservableList, Page, PageLoader,
        PositionalCalculator, RemainingCount,
    };

    pub use fbind_core as core;
    pub use fbind_runtime as runtime;

    #[cfg(feature = "collections")]
    pub use fbind_collections as collections;
}

//! Config entries and config flows
//!
//! A config entry is one configured integration instance. [`ConfigEntries`]
//! stores them and runs their setup, retry, unload and reload through the
//! [`EntrySetup`] hooks an integration registers. [`FlowManager`] drives the
//! [`ConfigFlow`] steps that create them.
//!
//! Entries persist in `.storage/core.config_entries`.

pub mod entry;
pub mod flow;
pub mod lifecycle;
pub mod manager;
pub mod storage;

pub use entry::{
    ConfigEntry, ConfigEntryDisabledBy, ConfigEntrySource, ConfigEntryState, ConfigEntryUpdate,
};

pub use flow::{
    ConfigFlow, FlowContext, FlowError, FlowFactory, FlowInput, FlowManager, FlowResult,
    FlowResultOutcome, FlowResultType, FormField, SelectOption, ABORT_ALREADY_CONFIGURED,
};

pub use lifecycle::{calculate_retry_delay, InvalidTransition};

pub use manager::{
    ConfigEntries, ConfigEntriesData, ConfigEntriesError, ConfigEntriesResult, EntrySetup,
    SetupError, STORAGE_KEY,
};

pub use storage::{Storable, Storage, StorageError, StorageFile, StorageResult};

//! taskdeck host crate: service wiring and the JSONL event log.

pub mod event_log;
pub mod service;

pub use event_log::*;
pub use service::*;

#[cfg(test)]
mod tests {
    use super::{DeckService, EventLogError, JsonlEventLog, ServiceError};
    use std::any::TypeId;

    #[test]
    fn crate_root_reexports_service_and_event_log() {
        let _ = TypeId::of::<ServiceError>();
        let _ = TypeId::of::<EventLogError>();
        let _ = TypeId::of::<JsonlEventLog>();
        let _ = TypeId::of::<DeckService>();
    }
}

/// Pin Service
///
/// Orchestrates the pin lifecycle: validation, ownership, the asynchronous
/// completion step, and storage accounting.

pub mod response;
pub mod service;

pub use response::{PinListResponse, PinObject, PinStatusResponse};
pub use service::{AddedContent, CompletionOutcome, NewPin, PinService, PinServiceOptions};

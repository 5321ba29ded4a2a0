pub mod channel;
pub mod gate;
pub mod types;

pub use channel::{ApprovalPayload, DeliveryStatus, FileChannel, InMemoryChannel, NotificationChannel, WebhookChannel};
pub use gate::{ApprovalGate, ApprovalOutcome};
pub use types::{ApprovalDecision, ApprovalRequest, ApprovalStatus, DecisionKind};

pub mod events;
pub mod grace;
mod handler;
pub mod lifecycle;
pub mod projection;
pub mod protocol;
pub mod registry;
mod relay;
pub mod rooms;
mod server;

pub use events::{
    replay, ActivityKind, ConnectionId, EventType, ExamId, MonitorEvent, SessionKey, StudentId,
    StudentIdentity, StudentStatus,
};
pub use handler::MonitorSignalingHandler;
pub use lifecycle::{ExamLifecycle, SweepReport};
pub use projection::{ExamProjection, ProjectionEntry};
pub use protocol::{ClientMessage, ServerMessage};
pub use relay::SignalingRelay;
pub use rooms::{ClientSender, RoomManager};
pub use server::{MonitorServer, MonitorSettings};

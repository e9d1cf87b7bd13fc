pub mod admin_request;
pub mod group;
pub mod message;
pub mod profile;

pub use admin_request::{AdminRequest, InvalidAction, RequestStatus, ReviewDecision};
pub use group::{Group, GroupChanges, Membership};
pub use message::Message;
pub use profile::{Profile, Role};

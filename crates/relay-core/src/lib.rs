pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;

pub use errors::RelayError;
pub use events::{InboundEvent, OutboundEvent, Profile};
pub use ids::{ConnectionId, MessageId};
pub use messages::{Message, NewMessage};

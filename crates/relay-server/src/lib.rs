pub mod connections;
pub mod dispatcher;
pub mod fanout;
pub mod http;
pub mod presence;
pub mod server;
pub mod service;

pub use connections::{ConnectionRegistry, Heartbeat};
pub use dispatcher::Dispatcher;
pub use fanout::{Audience, Fanout};
pub use presence::PresenceRegistry;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
pub use service::MessageService;

mod client;
mod error;
mod settings;
mod traits;
mod types;

pub mod prelude {
    pub use super::client::{
        ConnectionState, Connector, Deliver, Endpoints, WsConnection, WsStream, decorate,
    };
    pub use super::error::*;
    pub use super::settings::*;
    pub use super::traits::*;
    pub use super::types::*;
}

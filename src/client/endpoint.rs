/// Deriv endpoints
/// * DEFAULT_WS_URI - The production WebSocket API (<wss://ws.derivws.com/websockets/v3>)
/// * LEGACY_WS_URI - The older Binary.com host, still served (<wss://ws.binaryws.com/websockets/v3>)
/// * DEFAULT_CLOSE_CODE - Normal closure
pub struct Endpoints;

impl Endpoints {
    pub const DEFAULT_WS_URI: &str = "wss://ws.derivws.com/websockets/v3";
    pub const LEGACY_WS_URI: &str = "wss://ws.binaryws.com/websockets/v3";
    pub const DEFAULT_CLOSE_CODE: u16 = 1000;
    pub const DEFAULT_CLOSE_REASON: &str = "client disconnect";
}

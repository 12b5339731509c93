pub mod monitor_routes;
pub mod monitor_websocket;
